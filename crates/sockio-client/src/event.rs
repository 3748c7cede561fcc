//! Notifications raised by the connection engine.

use serde_json::Value;
use sockio_core::{DecodeError, ErrorAdvice, ErrorReason, Packet};
use std::fmt;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The application called `disconnect`.
    Requested,
    /// The server sent a root disconnect packet.
    Server,
    /// The transport closed cleanly.
    TransportClosed,
    /// The transport failed to open or errored.
    TransportError(String),
    /// Nothing was received within the heartbeat timeout.
    HeartbeatTimeout,
    /// The server sent a fatal error packet.
    Fatal(ErrorReason),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::Server => f.write_str("server disconnected"),
            Self::TransportClosed => f.write_str("transport closed"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::HeartbeatTimeout => f.write_str("heartbeat timeout"),
            Self::Fatal(reason) => write!(f, "fatal error: {reason}"),
        }
    }
}

/// An acknowledgement the server is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRequest {
    pub id: u64,
    pub endpoint: String,
}

/// One engine notification.
///
/// `R` is how a pending server-side acknowledgement is represented: the
/// engine emits plain [`AckRequest`]s, and the socket replaces them with
/// responders bound to its command channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification<R = AckRequest> {
    /// The root endpoint was confirmed.
    Connected,
    /// The session ended. Raised exactly once per teardown.
    Disconnected { reason: DisconnectReason },
    /// The handshake request failed; no session was established.
    HandshakeFailed { error: String },
    EndpointConnected { endpoint: String },
    EndpointDisconnected { endpoint: String },
    Message {
        endpoint: String,
        data: String,
        ack: Option<R>,
    },
    Json {
        endpoint: String,
        data: Value,
        ack: Option<R>,
    },
    Event {
        endpoint: String,
        name: String,
        args: Vec<Value>,
        ack: Option<R>,
    },
    /// A data packet was handed to the transport.
    MessageSent { packet: Packet },
    Error {
        endpoint: String,
        reason: Option<ErrorReason>,
        advice: Option<ErrorAdvice>,
    },
    /// An inbound frame could not be decoded and was dropped.
    DecodeFailed { frame: String, error: DecodeError },
}

impl<R> Notification<R> {
    /// Convert the ack representation, leaving everything else untouched.
    pub fn map_ack<S>(self, f: impl FnOnce(R) -> S) -> Notification<S> {
        match self {
            Self::Connected => Notification::Connected,
            Self::Disconnected { reason } => Notification::Disconnected { reason },
            Self::HandshakeFailed { error } => Notification::HandshakeFailed { error },
            Self::EndpointConnected { endpoint } => Notification::EndpointConnected { endpoint },
            Self::EndpointDisconnected { endpoint } => {
                Notification::EndpointDisconnected { endpoint }
            }
            Self::Message {
                endpoint,
                data,
                ack,
            } => Notification::Message {
                endpoint,
                data,
                ack: ack.map(f),
            },
            Self::Json {
                endpoint,
                data,
                ack,
            } => Notification::Json {
                endpoint,
                data,
                ack: ack.map(f),
            },
            Self::Event {
                endpoint,
                name,
                args,
                ack,
            } => Notification::Event {
                endpoint,
                name,
                args,
                ack: ack.map(f),
            },
            Self::MessageSent { packet } => Notification::MessageSent { packet },
            Self::Error {
                endpoint,
                reason,
                advice,
            } => Notification::Error {
                endpoint,
                reason,
                advice,
            },
            Self::DecodeFailed { frame, error } => Notification::DecodeFailed { frame, error },
        }
    }
}
