//! Ledger relayer collaborator.
//!
//! The relayer is the only component that talks to the chain. It receives a
//! Merkle root and returns the transaction hash of the anchoring write.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_merkle::MerkleHash;
use tracing::{debug, info_span, warn, Instrument};

/// Failures reported by a relayer call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayerError {
    /// Relayer could not be reached.
    #[error("relayer unreachable: {message}")]
    Network {
        /// Transport failure description.
        message: String,
    },

    /// Relayer did not answer in time.
    #[error("relayer request timed out after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout.
        timeout_seconds: u64,
    },

    /// Relayer refused the request (4xx).
    #[error("relayer rejected anchor: HTTP {status_code}")]
    Rejected {
        /// HTTP status.
        status_code: u16,
        /// Response body.
        body: String,
    },

    /// Relayer failed internally (5xx).
    #[error("relayer server error: HTTP {status_code}")]
    Server {
        /// HTTP status.
        status_code: u16,
        /// Response body.
        body: String,
    },

    /// Relayer answered with something other than a transaction hash.
    #[error("invalid relayer response: {message}")]
    InvalidResponse {
        /// What was wrong.
        message: String,
    },
}

impl RelayerError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates an invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse { message: message.into() }
    }

    /// Transport and server failures are worth retrying; rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::Server { .. } => true,
            Self::Rejected { .. } | Self::InvalidResponse { .. } => false,
        }
    }
}

/// Writes Merkle roots to the ledger.
#[async_trait]
pub trait LedgerRelayer: Send + Sync + std::fmt::Debug {
    /// Anchors `merkle_root` and returns the ledger transaction hash.
    async fn anchor(&self, merkle_root: &MerkleHash) -> Result<String, RelayerError>;
}

/// HTTP relayer client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// Anchor endpoint, e.g. `https://relayer.internal/v1/anchor`.
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent header.
    pub user_agent: String,
    /// Bearer token, if the relayer requires one.
    pub api_key: Option<String>,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8545/anchor".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: "Tessera-Anchor/1.0".to_string(),
            api_key: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnchorRequest<'a> {
    merkle_root: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnchorResponse {
    transaction_hash: String,
}

/// Relayer reached over HTTP.
///
/// Posts `{"merkleRoot": "<hex>"}` and expects `{"transactionHash": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpRelayer {
    client: reqwest::Client,
    config: RelayerConfig,
}

impl HttpRelayer {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `RelayerError::Network` if the client cannot be constructed.
    pub fn new(config: RelayerConfig) -> Result<Self, RelayerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| RelayerError::network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl LedgerRelayer for HttpRelayer {
    async fn anchor(&self, merkle_root: &MerkleHash) -> Result<String, RelayerError> {
        let root_hex = merkle_root.to_hex();
        let span = info_span!("relayer_anchor", merkle_root = %root_hex, endpoint = %self.config.endpoint);

        async move {
            let mut request =
                self.client.post(&self.config.endpoint).json(&AnchorRequest { merkle_root: &root_hex });
            if let Some(api_key) = &self.config.api_key {
                request = request.bearer_auth(api_key);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    warn!("relayer request timed out");
                    return Err(RelayerError::Timeout {
                        timeout_seconds: self.config.timeout.as_secs(),
                    });
                },
                Err(e) => {
                    warn!(error = %e, "relayer request failed");
                    return Err(RelayerError::network(e.to_string()));
                },
            };

            let status = response.status();
            if !status.is_success() {
                let status_code = status.as_u16();
                let body = response.text().await.unwrap_or_default();
                warn!(status = status_code, "relayer returned error status");
                return Err(if status.is_server_error() {
                    RelayerError::Server { status_code, body }
                } else {
                    RelayerError::Rejected { status_code, body }
                });
            }

            let parsed: AnchorResponse = response
                .json()
                .await
                .map_err(|e| RelayerError::invalid_response(e.to_string()))?;
            let tx_hash = parsed.transaction_hash.trim().to_string();
            if tx_hash.is_empty() {
                return Err(RelayerError::invalid_response("empty transaction hash"));
            }

            debug!(tx_hash = %tx_hash, "relayer accepted root");
            Ok(tx_hash)
        }
        .instrument(span)
        .await
    }
}

pub mod mock {
    //! Scripted relayer for tests.
    //!
    //! Results are served from a queue in call order; once the script runs
    //! out every call succeeds with a synthetic transaction hash.

    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tessera_merkle::MerkleHash;
    use tokio::sync::Mutex;

    use super::{LedgerRelayer, RelayerError};

    /// Relayer double with scripted outcomes and call recording.
    #[derive(Debug, Default)]
    pub struct MockRelayer {
        script: Mutex<VecDeque<Result<String, RelayerError>>>,
        roots: Mutex<Vec<MerkleHash>>,
        calls: AtomicUsize,
        latency: Option<Duration>,
    }

    impl MockRelayer {
        /// Creates a relayer that always succeeds.
        pub fn new() -> Self {
            Self::default()
        }

        /// Delays every call, making overlapping submissions observable.
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        /// Queues a failure for the next unscripted call.
        pub async fn fail_next(&self, error: RelayerError) {
            self.script.lock().await.push_back(Err(error));
        }

        /// Queues `count` consecutive network failures.
        pub async fn fail_times(&self, count: usize) {
            let mut script = self.script.lock().await;
            for n in 0..count {
                script.push_back(Err(RelayerError::network(format!("scripted failure {n}"))));
            }
        }

        /// Queues a success with a specific transaction hash.
        pub async fn succeed_with(&self, tx_hash: impl Into<String>) {
            self.script.lock().await.push_back(Ok(tx_hash.into()));
        }

        /// Number of `anchor` calls received.
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Roots received, in call order.
        pub async fn anchored_roots(&self) -> Vec<MerkleHash> {
            self.roots.lock().await.clone()
        }
    }

    #[async_trait]
    impl LedgerRelayer for MockRelayer {
        async fn anchor(&self, merkle_root: &MerkleHash) -> Result<String, RelayerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.roots.lock().await.push(merkle_root.clone());

            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            self.script.lock().await.pop_front().unwrap_or_else(|| Ok(format!("0x{call:064x}")))
        }
    }
}
