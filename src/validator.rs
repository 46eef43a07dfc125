//! Validator transport: one websocket session per run.
//!
//! The session is opened against `<base>/<node_id>/`, carries one signed
//! payload per text frame and expects one text response per payload. A
//! response containing [`ACK_ERROR_MARKER`] is a rejection. Silence longer
//! than the ack timeout abandons the wait but keeps the session open.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::signer::SignedPayload;
use crate::utils::error::{Error, Result};

/// Substring marking a validator-side rejection.
pub const ACK_ERROR_MARKER: &str = "ERROR";

/// Client identification sent with the opening handshake.
pub fn user_agent() -> String {
    format!("collector-node/{} (WebSocket)", env!("CARGO_PKG_VERSION"))
}

/// Everything needed to open a validator session
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    /// Base endpoint, e.g. `wss://validator.example/ws/node`
    pub base_url: String,
    /// PEM bundle of trusted roots; the bundled webpki roots when `None`
    pub ca_bundle: Option<PathBuf>,
    pub open_timeout: Duration,
    pub ack_timeout: Duration,
    pub user_agent: String,
}

impl ValidatorSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ca_bundle: None,
            open_timeout: Duration::from_secs(120),
            ack_timeout: Duration::from_secs(10),
            user_agent: user_agent(),
        }
    }
}

/// How the validator answered one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted(String),
    Rejected(String),
    TimedOut,
}

/// Append the node id as the trailing path segment of the base endpoint.
pub fn endpoint_url(base: &str, node_id: &str) -> Result<Url> {
    let url = Url::parse(&format!("{}/{}/", base.trim_end_matches('/'), node_id))
        .map_err(|e| Error::ConfigError(format!("invalid validator url '{}': {}", base, e)))?;
    match url.scheme() {
        | "ws" | "wss" => Ok(url),
        | other => Err(Error::ConfigError(format!("validator url must be ws:// or wss://, got {}://", other))),
    }
}

/// Certificate-validating TLS configuration. There is no way to disable verification.
pub fn tls_config(ca_bundle: Option<&Path>) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    match ca_bundle {
        | Some(path) => {
            let file = File::open(path).map_err(|e| {
                Error::ConfigError(format!("cannot open CA bundle {}: {}", path.display(), e))
            })?;
            let certs = rustls_pemfile::certs(&mut BufReader::new(file)).map_err(|e| {
                Error::ConfigError(format!("cannot parse CA bundle {}: {}", path.display(), e))
            })?;
            let (added, ignored) = roots.add_parsable_certificates(&certs);
            debug!("CA bundle {}: {} roots added, {} ignored", path.display(), added, ignored);
            if added == 0 {
                return Err(Error::ConfigError(format!(
                    "no usable certificates in CA bundle {}",
                    path.display()
                )));
            }
        }
        | None => {
            roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
                OwnedTrustAnchor::from_subject_spki_name_constraints(
                    ta.subject,
                    ta.spki,
                    ta.name_constraints,
                )
            }));
        }
    }
    Ok(Arc::new(
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    ))
}

/// An open validator session. Never shared across runs.
pub struct ValidatorClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    url: Url,
    ack_timeout: Duration,
}

impl ValidatorClient {
    /// Open the session for `node_id`.
    ///
    /// A handshake answered with a non-101 status yields
    /// [`Error::HandshakeRejected`]; any other failure [`Error::ConnectError`].
    pub async fn connect(settings: &ValidatorSettings, node_id: &str) -> Result<Self> {
        let url = endpoint_url(&settings.base_url, node_id)?;
        let connector = if url.scheme() == "wss" {
            debug!("ssl enabled, retrieving ssl context");
            Some(Connector::Rustls(tls_config(settings.ca_bundle.as_deref())?))
        } else {
            None
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::ConnectError(e.to_string()))?;
        let agent = HeaderValue::from_str(&settings.user_agent)
            .map_err(|e| Error::ConfigError(format!("invalid user agent: {}", e)))?;
        request.headers_mut().insert(USER_AGENT, agent);

        info!("validator connection: {}", url);
        let opening = connect_async_tls_with_config(request, None, false, connector);
        let (ws, response) = match tokio::time::timeout(settings.open_timeout, opening).await {
            | Ok(Ok(pair)) => pair,
            | Ok(Err(WsError::Http(response))) => {
                return Err(Error::HandshakeRejected {
                    status: response.status().as_u16(),
                    url: url.to_string(),
                });
            }
            | Ok(Err(e)) => return Err(Error::ConnectError(format!("{} (url: {})", e, url))),
            | Err(_) => {
                return Err(Error::ConnectError(format!(
                    "opening handshake timed out after {:?} (url: {})",
                    settings.open_timeout, url
                )));
            }
        };
        debug!("validator handshake status: {}", response.status());

        Ok(Self { ws, url, ack_timeout: settings.ack_timeout })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Send one payload and wait (bounded) for its acknowledgment.
    ///
    /// Only a lost connection is an error; timeouts and rejections are outcomes.
    pub async fn send(&mut self, payload: &SignedPayload) -> Result<SendOutcome> {
        debug!("attempting to send to websocket");
        self.ws
            .send(Message::Text(payload.to_json()?))
            .await
            .map_err(closed)?;

        match tokio::time::timeout(self.ack_timeout, self.next_text()).await {
            | Err(_) => Ok(SendOutcome::TimedOut),
            | Ok(reply) => {
                let reply = reply?;
                if reply.contains(ACK_ERROR_MARKER) {
                    Ok(SendOutcome::Rejected(reply))
                } else {
                    Ok(SendOutcome::Accepted(reply))
                }
            }
        }
    }

    /// Next textual frame; control frames are skipped.
    async fn next_text(&mut self) -> Result<String> {
        loop {
            match self.ws.next().await {
                | Some(Ok(Message::Text(txt))) => return Ok(txt),
                | Some(Ok(Message::Binary(bin))) => return Ok(String::from_utf8_lossy(&bin).into_owned()),
                | Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "no close frame".to_string());
                    return Err(Error::ConnectionClosed(reason));
                }
                | Some(Ok(_)) => continue,
                | Some(Err(e)) => return Err(closed(e)),
                | None => return Err(Error::ConnectionClosed("stream ended".to_string())),
            }
        }
    }

    /// Close the session. Failures are logged, never raised.
    pub async fn close(mut self) {
        debug!("closing validator connection: {}", self.url);
        if let Err(e) = self.ws.close(None).await {
            match e {
                | WsError::ConnectionClosed | WsError::AlreadyClosed => {}
                | other => warn!("error closing validator connection: {}", other),
            }
        }
    }
}

fn closed(e: WsError) -> Error {
    Error::ConnectionClosed(e.to_string())
}
