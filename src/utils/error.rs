//! Error handling for the collector node.

use thiserror::Error;

/// Main error type for the collector node
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (missing or invalid settings)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Node identity missing or malformed
    #[error("Identity error: {0}")]
    Identity(String),

    /// Feed definition file missing or malformed
    #[error("Feeds error: {0}")]
    Feeds(String),

    /// Signing key missing/malformed or signing failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// Another process already holds the named lock
    #[error("Lock already held: {0}")]
    LockHeld(String),

    /// Could not open the validator connection
    #[error("Connection error: {0}")]
    ConnectError(String),

    /// The validator answered the opening handshake with a non-success status
    #[error("Handshake rejected with status {status} (url: {url})")]
    HandshakeRejected { status: u16, url: String },

    /// The validator closed the connection mid-run
    #[error("Connection closed unexpectedly: {0}")]
    ConnectionClosed(String),

    /// Data-related errors (e.g. missing or malformed market data)
    #[error("Data error: {0}")]
    DataError(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// Transport errors: they end a run early but are not process failures.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectError(_) | Error::HandshakeRejected { .. } | Error::ConnectionClosed(_)
        )
    }
}

/// Result type for the collector node
pub type Result<T> = std::result::Result<T, Error>;

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DataError(format!("sqlite: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_error = Error::ConfigError("missing field".to_string());
        assert_eq!(config_error.to_string(), "Configuration error: missing field");

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let wrapped_io_error = Error::from(io_error);
        assert!(wrapped_io_error.to_string().contains("I/O error"));

        let rejected = Error::HandshakeRejected { status: 403, url: "wss://v/1/".to_string() };
        assert_eq!(rejected.to_string(), "Handshake rejected with status 403 (url: wss://v/1/)");
    }

    #[test]
    fn test_run_fatal_classification() {
        assert!(Error::ConnectionClosed("eof".into()).is_run_fatal());
        assert!(Error::HandshakeRejected { status: 500, url: String::new() }.is_run_fatal());
        assert!(Error::ConnectError("refused".into()).is_run_fatal());
        assert!(!Error::Signing("bad key".into()).is_run_fatal());
        assert!(!Error::Identity("missing".into()).is_run_fatal());
        assert!(!Error::LockHeld("cnode_runner".into()).is_run_fatal());
    }
}
