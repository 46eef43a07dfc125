//! Integration tests for the validator websocket transport.

mod common;

use std::time::Duration;

use collector_node::envelope::{Envelope, RawObservation};
use collector_node::identity::Identity;
use collector_node::signer::{MessageSigner, SignedPayload};
use collector_node::validator::{SendOutcome, ValidatorClient, ValidatorSettings};
use collector_node::Error;
use common::{MockValidator, Reply};
use serde_json::{json, Map};

fn payload(feed: &str) -> SignedPayload {
    let mut data = Map::new();
    data.insert("price".to_string(), json!(0.42));
    let envelope = Envelope::new(
        RawObservation::new(feed, "2024-05-01T00:00:00Z", data),
        &Identity::new("node-1"),
    );
    MessageSigner::from_seed(&[9u8; 32]).sign(&envelope).unwrap()
}

fn settings(base_url: &str) -> ValidatorSettings {
    let mut settings = ValidatorSettings::new(base_url);
    settings.ack_timeout = Duration::from_millis(300);
    settings.open_timeout = Duration::from_secs(5);
    settings
}

#[tokio::test]
async fn test_acknowledged_payload_is_accepted() {
    let validator = MockValidator::accepting().await;
    let mut client = ValidatorClient::connect(&settings(&validator.base_url), "node-1").await.unwrap();

    let outcome = client.send(&payload("ADA/USD")).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Accepted(ref reply) if reply.contains("ADA/USD")));
    client.close().await;

    assert_eq!(validator.feeds(), vec!["ADA/USD".to_string()]);
}

#[tokio::test]
async fn test_error_marker_is_a_rejection() {
    let validator = MockValidator::start(|_| Reply::Error).await;
    let mut client = ValidatorClient::connect(&settings(&validator.base_url), "node-1").await.unwrap();

    let outcome = client.send(&payload("ADA/USD")).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Rejected(ref reply) if reply.contains("ERROR")));
    client.close().await;
}

#[tokio::test]
async fn test_ack_timeout_keeps_session_usable() {
    let validator = MockValidator::start(|feed| if feed == "SLOW/USD" { Reply::Silent } else { Reply::Ack }).await;
    let mut client = ValidatorClient::connect(&settings(&validator.base_url), "node-1").await.unwrap();

    assert_eq!(client.send(&payload("SLOW/USD")).await.unwrap(), SendOutcome::TimedOut);
    let next = client.send(&payload("FAST/USD")).await.unwrap();
    assert!(matches!(next, SendOutcome::Accepted(ref reply) if reply.contains("FAST/USD")));
    client.close().await;

    assert_eq!(validator.feeds(), vec!["SLOW/USD".to_string(), "FAST/USD".to_string()]);
}

#[tokio::test]
async fn test_server_close_is_connection_closed() {
    let validator = MockValidator::start(|_| Reply::Close).await;
    let mut client = ValidatorClient::connect(&settings(&validator.base_url), "node-1").await.unwrap();

    let err = client.send(&payload("ADA/USD")).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed(_)), "got {}", err);
    assert!(err.is_run_fatal());
    client.close().await;
}

#[tokio::test]
async fn test_refused_handshake_reports_status() {
    let validator = MockValidator::refusing(403).await;
    let err = ValidatorClient::connect(&settings(&validator.base_url), "node-1").await.err().unwrap();

    match err {
        | Error::HandshakeRejected { status, url } => {
            assert_eq!(status, 403);
            assert!(url.ends_with("/ws/node/node-1/"));
        }
        | other => panic!("expected HandshakeRejected, got {}", other),
    }
}

#[tokio::test]
async fn test_unreachable_validator_is_connect_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = ValidatorClient::connect(&settings(&format!("ws://{}", addr)), "node-1").await.err().unwrap();
    assert!(matches!(err, Error::ConnectError(_)), "got {}", err);
}

#[tokio::test]
async fn test_handshake_carries_node_path_and_user_agent() {
    let validator = MockValidator::accepting().await;
    let client = ValidatorClient::connect(&settings(&validator.base_url), "node-42").await.unwrap();
    assert!(client.url().as_str().ends_with("/ws/node/node-42/"));
    client.close().await;

    assert_eq!(validator.paths(), vec!["/ws/node/node-42/".to_string()]);
    let agents = validator.user_agents();
    assert_eq!(agents.len(), 1);
    assert!(agents[0].starts_with("collector-node/"), "got {}", agents[0]);
}
