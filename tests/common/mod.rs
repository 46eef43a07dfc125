//! Shared fixtures: a local websocket server standing in for the validator.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use collector_node::feeds::{FeedSource, FeedSpec};
use collector_node::signer::SignedPayload;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::Message;

/// How the mock answers one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Error,
    Silent,
    Close,
}

type ReplyFn = dyn Fn(&str) -> Reply + Send + Sync;

#[derive(Default)]
struct Recorded {
    payloads: Vec<SignedPayload>,
    paths: Vec<String>,
    user_agents: Vec<String>,
}

pub struct MockValidator {
    /// Base endpoint to hand to the collector, e.g. `ws://127.0.0.1:1234/ws/node`
    pub base_url: String,
    recorded: Arc<Mutex<Recorded>>,
    connections: Arc<AtomicUsize>,
}

impl MockValidator {
    /// Start a validator that answers every submission with `reply(feed)`.
    pub async fn start<F>(reply: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(Arc::new(reply), None).await
    }

    /// Start a validator that acknowledges everything.
    pub async fn accepting() -> Self {
        Self::start(|_| Reply::Ack).await
    }

    /// Start a validator that refuses the opening handshake with `status`.
    pub async fn refusing(status: u16) -> Self {
        Self::spawn(Arc::new(|_: &str| Reply::Ack), Some(status)).await
    }

    async fn spawn(reply: Arc<ReplyFn>, refuse: Option<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock validator");
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let connections = Arc::new(AtomicUsize::new(0));

        let server_recorded = recorded.clone();
        let server_connections = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                server_connections.fetch_add(1, Ordering::SeqCst);
                let recorded = server_recorded.clone();
                let reply = reply.clone();
                tokio::spawn(async move {
                    serve(stream, recorded, reply, refuse).await;
                });
            }
        });

        Self { base_url: format!("ws://{}/ws/node", addr), recorded, connections }
    }

    pub fn payloads(&self) -> Vec<SignedPayload> {
        self.recorded.lock().unwrap().payloads.clone()
    }

    /// Feed names in the order they arrived
    pub fn feeds(&self) -> Vec<String> {
        self.payloads().iter().map(feed_of).collect()
    }

    pub fn paths(&self) -> Vec<String> {
        self.recorded.lock().unwrap().paths.clone()
    }

    pub fn user_agents(&self) -> Vec<String> {
        self.recorded.lock().unwrap().user_agents.clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    recorded: Arc<Mutex<Recorded>>,
    reply: Arc<ReplyFn>,
    refuse: Option<u16>,
) {
    let handshake_recorded = recorded.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let mut rec = handshake_recorded.lock().unwrap();
        rec.paths.push(req.uri().path().to_string());
        if let Some(agent) = req.headers().get(http::header::USER_AGENT) {
            rec.user_agents.push(agent.to_str().unwrap_or_default().to_string());
        }
        match refuse {
            | Some(status) => Err(http::Response::builder().status(status).body(None).unwrap()),
            | None => Ok(resp),
        }
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    while let Some(Ok(msg)) = ws.next().await {
        let text = match msg {
            | Message::Text(text) => text,
            | Message::Close(_) => break,
            | _ => continue,
        };
        let payload: SignedPayload = serde_json::from_str(&text).expect("signed payload json");
        let feed = feed_of(&payload);
        recorded.lock().unwrap().payloads.push(payload);

        match reply(&feed) {
            | Reply::Ack => {
                let _ = ws.send(Message::Text(format!("OK: {}", feed))).await;
            }
            | Reply::Error => {
                let _ = ws.send(Message::Text(format!("ERROR: invalid data for {}", feed))).await;
            }
            | Reply::Silent => {}
            | Reply::Close => {
                let _ = ws.close(None).await;
                break;
            }
        }
    }
}

/// The feed name inside a signed payload's envelope.
pub fn feed_of(payload: &SignedPayload) -> String {
    let envelope: Value = serde_json::from_str(&payload.message).expect("envelope json");
    envelope["message"]["feed"].as_str().unwrap_or_default().to_string()
}

pub fn feed(label: &str, source: FeedSource) -> FeedSpec {
    FeedSpec {
        pair: label.to_string(),
        label: label.to_string(),
        interval: 3600,
        deviation: 2,
        source,
        calculation: "median".to_string(),
        status: "showcase".to_string(),
        feed_type: "CER".to_string(),
    }
}
