//! Client error types.

use std::path::PathBuf;
use std::time::Duration;

/// Error returned by client operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
    #[error("already connected")]
    AlreadyConnected,
    #[error("endpoint {0:?} was not requested on this connection")]
    UnknownEndpoint(String),
    /// Endpoint names may not contain `:`.
    #[error("invalid endpoint name {0:?}")]
    InvalidEndpoint(String),
    /// The socket's driver task has stopped.
    #[error("socket is closed")]
    Closed,
    /// The connection ended before the server acknowledged.
    #[error("acknowledgement abandoned by disconnect")]
    AckAbandoned,
}

/// Error performing the handshake request.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("handshake rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid handshake response: {0}")]
    Parse(#[from] sockio_core::HandshakeParseError),
    #[error("server does not offer the websocket transport (offered: {0:?})")]
    TransportUnsupported(Vec<String>),
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
}

/// Error from the underlying text transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("transport open timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport closed")]
    Closed,
}

/// Error loading client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}
