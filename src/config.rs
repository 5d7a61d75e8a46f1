//! Configuration management for the Tessera anchoring engine.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tessera_anchor::{AnchorConfig, RelayerConfig};
use tessera_core::{BackoffStrategy, RetryPolicy};
use tessera_queue::QueueConfig;
use tessera_status::{StatusListConfig, DEFAULT_LIST_CAPACITY};

const CONFIG_FILE: &str = "tessera.toml";
const ENV_PREFIX: &str = "TESSERA_";

/// Complete engine configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `TESSERA_` (highest priority)
/// 2. Configuration file (`tessera.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Without a `database_url` the engine keeps its snapshots in memory, which
/// is only suitable for local development.
///
/// # Example
///
/// ```no_run
/// use tessera::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// println!("anchoring through {}", config.relayer_endpoint);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL for snapshot persistence.
    ///
    /// Environment variable: `TESSERA_DATABASE_URL`
    #[serde(default)]
    pub database_url: Option<String>,
    /// Maximum number of database connections in the pool.
    ///
    /// Environment variable: `TESSERA_DATABASE_MAX_CONNECTIONS`
    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    ///
    /// Environment variable: `TESSERA_DATABASE_MIN_CONNECTIONS`
    #[serde(default = "default_min_connections")]
    pub database_min_connections: u32,
    /// Database connection acquire timeout in seconds.
    ///
    /// Environment variable: `TESSERA_DATABASE_CONNECTION_TIMEOUT`
    #[serde(default = "default_acquire_timeout")]
    pub database_connection_timeout: u64,

    // Relayer
    /// Ledger relayer anchor endpoint.
    ///
    /// Environment variable: `TESSERA_RELAYER_ENDPOINT`
    #[serde(default = "default_relayer_endpoint")]
    pub relayer_endpoint: String,
    /// Relayer request timeout in seconds.
    ///
    /// Environment variable: `TESSERA_RELAYER_TIMEOUT_SECONDS`
    #[serde(default = "default_relayer_timeout")]
    pub relayer_timeout_seconds: u64,
    /// Bearer token sent to the relayer.
    ///
    /// Environment variable: `TESSERA_RELAYER_API_KEY`
    #[serde(default)]
    pub relayer_api_key: Option<String>,

    // Anchoring
    /// Attempt ceiling for dead-lettered batches.
    ///
    /// Environment variable: `TESSERA_ANCHOR_MAX_ATTEMPTS`
    #[serde(default = "default_anchor_attempts")]
    pub anchor_max_attempts: u32,
    /// Base delay for anchoring backoff in milliseconds.
    ///
    /// Environment variable: `TESSERA_ANCHOR_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub anchor_base_delay_ms: u64,
    /// Maximum anchoring backoff delay in milliseconds.
    ///
    /// Environment variable: `TESSERA_ANCHOR_MAX_DELAY_MS`
    #[serde(default = "default_anchor_max_delay_ms")]
    pub anchor_max_delay_ms: u64,
    /// Jitter factor applied to anchoring retry times (0.0 to 1.0).
    ///
    /// Environment variable: `TESSERA_ANCHOR_JITTER_FACTOR`
    #[serde(default)]
    pub anchor_jitter_factor: f64,
    /// Seconds after submission at which an anchor counts as final.
    ///
    /// Environment variable: `TESSERA_FINALITY_DELAY_SECONDS`
    #[serde(default = "default_finality_delay")]
    pub finality_delay_seconds: u64,
    /// Confirmation poll interval in milliseconds.
    ///
    /// Environment variable: `TESSERA_CONFIRMATION_POLL_INTERVAL_MS`
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_interval_ms: u64,
    /// Replay due dead letters automatically.
    ///
    /// Environment variable: `TESSERA_AUTO_REPLAY`
    #[serde(default)]
    pub auto_replay: bool,
    /// Maximum dead letters replayed per poll.
    ///
    /// Environment variable: `TESSERA_REPLAY_BATCH_LIMIT`
    #[serde(default = "default_replay_batch_limit")]
    pub replay_batch_limit: usize,

    // Bulk issuance queue
    /// Queue name, scoping its persisted snapshot.
    ///
    /// Environment variable: `TESSERA_QUEUE_NAME`
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Number of concurrent queue workers.
    ///
    /// Environment variable: `TESSERA_WORKER_POOL_SIZE`
    #[serde(default = "default_worker_count")]
    pub worker_pool_size: usize,
    /// Items processed concurrently within one job.
    ///
    /// Environment variable: `TESSERA_ITEM_CONCURRENCY`
    #[serde(default = "default_item_concurrency")]
    pub item_concurrency: usize,
    /// Attempt ceiling for bulk jobs.
    ///
    /// Environment variable: `TESSERA_JOB_MAX_ATTEMPTS`
    #[serde(default = "default_job_attempts")]
    pub job_max_attempts: u32,
    /// Base delay for job backoff in milliseconds.
    ///
    /// Environment variable: `TESSERA_JOB_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub job_base_delay_ms: u64,
    /// Maximum job backoff delay in milliseconds.
    ///
    /// Environment variable: `TESSERA_JOB_MAX_DELAY_MS`
    #[serde(default = "default_job_max_delay_ms")]
    pub job_max_delay_ms: u64,
    /// Idle worker poll interval in milliseconds.
    ///
    /// Environment variable: `TESSERA_JOB_POLL_INTERVAL_MS`
    #[serde(default = "default_job_poll_ms")]
    pub job_poll_interval_ms: u64,

    // Status lists
    /// Capacity of implicitly created status lists.
    ///
    /// Environment variable: `TESSERA_STATUS_LIST_CAPACITY`
    #[serde(default = "default_status_list_capacity")]
    pub status_list_capacity: usize,

    /// Time allowed for background tasks to stop, in seconds.
    ///
    /// Environment variable: `TESSERA_SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Config {
    /// Loads configuration from defaults, `tessera.toml`, and `TESSERA_`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a source cannot be parsed or the result fails
    /// validation.
    pub fn load() -> Result<Self> {
        let config: Self = Self::figment().extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Layered configuration sources, lowest priority first.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Anchoring manager and poller settings.
    pub fn to_anchor_config(&self) -> AnchorConfig {
        AnchorConfig {
            retry_policy: RetryPolicy {
                max_attempts: self.anchor_max_attempts,
                base_delay: Duration::from_millis(self.anchor_base_delay_ms),
                max_delay: Duration::from_millis(self.anchor_max_delay_ms),
                jitter_factor: self.anchor_jitter_factor,
                backoff_strategy: BackoffStrategy::Exponential,
            },
            finality_delay: Duration::from_secs(self.finality_delay_seconds),
            poll_interval: Duration::from_millis(self.confirmation_poll_interval_ms),
            auto_replay: self.auto_replay,
            replay_batch_limit: self.replay_batch_limit,
            shutdown_timeout: self.shutdown_timeout(),
        }
    }

    /// Bulk issuance queue settings.
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            name: self.queue_name.clone(),
            worker_count: self.worker_pool_size,
            item_concurrency: self.item_concurrency,
            retry_policy: RetryPolicy {
                max_attempts: self.job_max_attempts,
                base_delay: Duration::from_millis(self.job_base_delay_ms),
                max_delay: Duration::from_millis(self.job_max_delay_ms),
                jitter_factor: 0.0,
                backoff_strategy: BackoffStrategy::Exponential,
            },
            poll_interval: Duration::from_millis(self.job_poll_interval_ms),
            shutdown_timeout: self.shutdown_timeout(),
        }
    }

    /// Status list settings.
    pub fn to_status_list_config(&self) -> StatusListConfig {
        StatusListConfig { default_capacity: self.status_list_capacity }
    }

    /// HTTP relayer client settings.
    pub fn to_relayer_config(&self) -> RelayerConfig {
        RelayerConfig {
            endpoint: self.relayer_endpoint.clone(),
            timeout: Duration::from_secs(self.relayer_timeout_seconds),
            api_key: self.relayer_api_key.clone(),
            ..RelayerConfig::default()
        }
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// Database URL with the password masked for logging.
    pub fn database_url_masked(&self) -> Option<String> {
        self.database_url.as_ref().map(|url| {
            if let Some(at_pos) = url.find('@') {
                if let Some(colon_pos) = url[..at_pos].rfind(':') {
                    let mut masked = url.clone();
                    masked.replace_range(colon_pos + 1..at_pos, "***");
                    return masked;
                }
            }
            url.clone()
        })
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.database_max_connections == 0 {
            anyhow::bail!("database max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database min_connections cannot exceed max_connections");
        }

        if self.relayer_endpoint.trim().is_empty() {
            anyhow::bail!("relayer_endpoint must not be empty");
        }

        if self.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }

        if self.item_concurrency == 0 {
            anyhow::bail!("item_concurrency must be greater than 0");
        }

        if self.status_list_capacity == 0 {
            anyhow::bail!("status_list_capacity must be greater than 0");
        }

        self.to_anchor_config()
            .retry_policy
            .validate()
            .context("invalid anchoring retry policy")?;
        self.to_queue_config().retry_policy.validate().context("invalid job retry policy")?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_connection_timeout: default_acquire_timeout(),
            relayer_endpoint: default_relayer_endpoint(),
            relayer_timeout_seconds: default_relayer_timeout(),
            relayer_api_key: None,
            anchor_max_attempts: default_anchor_attempts(),
            anchor_base_delay_ms: default_base_delay_ms(),
            anchor_max_delay_ms: default_anchor_max_delay_ms(),
            anchor_jitter_factor: 0.0,
            finality_delay_seconds: default_finality_delay(),
            confirmation_poll_interval_ms: default_confirmation_poll_ms(),
            auto_replay: false,
            replay_batch_limit: default_replay_batch_limit(),
            queue_name: default_queue_name(),
            worker_pool_size: default_worker_count(),
            item_concurrency: default_item_concurrency(),
            job_max_attempts: default_job_attempts(),
            job_base_delay_ms: default_base_delay_ms(),
            job_max_delay_ms: default_job_max_delay_ms(),
            job_poll_interval_ms: default_job_poll_ms(),
            status_list_capacity: default_status_list_capacity(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_relayer_endpoint() -> String {
    RelayerConfig::default().endpoint
}

fn default_relayer_timeout() -> u64 {
    30
}

fn default_anchor_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_anchor_max_delay_ms() -> u64 {
    512_000
}

fn default_finality_delay() -> u64 {
    30
}

fn default_confirmation_poll_ms() -> u64 {
    5000
}

fn default_replay_batch_limit() -> usize {
    10
}

fn default_queue_name() -> String {
    "bulk_issuance".to_string()
}

fn default_worker_count() -> usize {
    3
}

fn default_item_concurrency() -> usize {
    8
}

fn default_job_attempts() -> u32 {
    5
}

fn default_job_max_delay_ms() -> u64 {
    60_000
}

fn default_job_poll_ms() -> u64 {
    1000
}

fn default_status_list_capacity() -> usize {
    DEFAULT_LIST_CAPACITY
}

fn default_shutdown_timeout() -> u64 {
    30
}
