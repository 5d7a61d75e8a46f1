//! HTTP relayer behavior against a mock relayer endpoint.

use std::time::Duration;

use serde_json::json;
use tessera_anchor::{HttpRelayer, LedgerRelayer, RelayerConfig, RelayerError};
use tessera_merkle::MerkleHash;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn relayer(server: &MockServer, api_key: Option<&str>) -> HttpRelayer {
    HttpRelayer::new(RelayerConfig {
        endpoint: format!("{}/v1/anchor", server.uri()),
        timeout: Duration::from_millis(500),
        api_key: api_key.map(str::to_string),
        ..RelayerConfig::default()
    })
    .unwrap()
}

fn root() -> MerkleHash {
    MerkleHash::content_hash(b"batch root")
}

#[tokio::test]
async fn posts_root_and_returns_transaction_hash() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/anchor"))
        .and(header("authorization", "Bearer relayer-key"))
        .and(body_json(json!({ "merkleRoot": root().to_hex() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "transactionHash": "0xabc123" })))
        .expect(1)
        .mount(&server)
        .await;

    let tx_hash = relayer(&server, Some("relayer-key")).anchor(&root()).await.unwrap();

    assert_eq!(tx_hash, "0xabc123");
}

#[tokio::test]
async fn server_errors_are_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("node syncing"))
        .mount(&server)
        .await;

    let err = relayer(&server, None).anchor(&root()).await.unwrap_err();

    assert_eq!(err, RelayerError::Server { status_code: 503, body: "node syncing".into() });
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_errors_are_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("root already anchored"))
        .mount(&server)
        .await;

    let err = relayer(&server, None).anchor(&root()).await.unwrap_err();

    assert!(matches!(err, RelayerError::Rejected { status_code: 422, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&server)
        .await;

    let err = relayer(&server, None).anchor(&root()).await.unwrap_err();

    assert!(matches!(err, RelayerError::InvalidResponse { .. }));
}

#[tokio::test]
async fn slow_relayer_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "transactionHash": "0x1" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = relayer(&server, None).anchor(&root()).await.unwrap_err();

    assert!(matches!(err, RelayerError::Timeout { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_relayer_is_a_network_error() {
    let relayer = HttpRelayer::new(RelayerConfig {
        endpoint: "http://127.0.0.1:9/anchor".into(),
        timeout: Duration::from_millis(500),
        ..RelayerConfig::default()
    })
    .unwrap();

    let err = relayer.anchor(&root()).await.unwrap_err();

    assert!(err.is_retryable());
}
