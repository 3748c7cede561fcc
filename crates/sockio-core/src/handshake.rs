//! Handshake response and server addressing.
//!
//! Handshake body format: `sid:heartbeat:close:transports`
//!
//! - `heartbeat` and `close` are whole seconds; empty (or `0`) disables them
//! - `transports` is a comma-separated list, e.g. `websocket,xhr-polling`

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Protocol revision spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default resource path on the server.
pub const DEFAULT_RESOURCE: &str = "socket.io";

/// The only transport this client speaks.
pub const WEBSOCKET_TRANSPORT: &str = "websocket";

/// Session parameters negotiated by the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub session_id: String,
    /// Heartbeat timeout; `None` means heartbeats are disabled.
    pub heartbeat_timeout: Option<Duration>,
    pub close_timeout: Option<Duration>,
    pub transports: Vec<String>,
}

impl Handshake {
    /// Whether the server offered the named transport.
    pub fn supports(&self, transport: &str) -> bool {
        self.transports.iter().any(|t| t == transport)
    }
}

impl FromStr for Handshake {
    type Err = HandshakeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.trim().splitn(4, ':');
        let (Some(sid), Some(heartbeat), Some(close), Some(transports)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(HandshakeParseError::MissingFields(s.to_string()));
        };

        if sid.is_empty() {
            return Err(HandshakeParseError::EmptySessionId);
        }

        Ok(Self {
            session_id: sid.to_string(),
            heartbeat_timeout: parse_seconds(heartbeat)?,
            close_timeout: parse_seconds(close)?,
            transports: transports
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

fn parse_seconds(field: &str) -> Result<Option<Duration>, HandshakeParseError> {
    if field.is_empty() {
        return Ok(None);
    }
    let secs: u64 = field
        .parse()
        .map_err(|_| HandshakeParseError::InvalidTimeout(field.to_string()))?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Error parsing a handshake response body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeParseError {
    #[error("handshake must have four ':'-separated fields, got: {0}")]
    MissingFields(String),
    #[error("handshake session id cannot be empty")]
    EmptySessionId,
    #[error("invalid handshake timeout: {0}")]
    InvalidTimeout(String),
}

/// Where a server lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Origin {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    /// URL the handshake request is sent to (query not included).
    pub fn handshake_url(&self, resource: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!(
            "{scheme}://{}:{}/{}/{PROTOCOL_VERSION}/",
            self.host,
            self.port,
            resource.trim_matches('/')
        )
    }

    /// URL of the WebSocket transport for an established session.
    pub fn websocket_url(&self, resource: &str, session_id: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}/{}/{PROTOCOL_VERSION}/{WEBSOCKET_TRANSPORT}/{session_id}",
            self.host,
            self.port,
            resource.trim_matches('/')
        )
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
