//! Packet framing for the 0.9 wire protocol.
//!
//! Wire format: `type:id[+]:endpoint[:data]`
//!
//! - `type` is the decimal index of a [`PacketType`]
//! - `id` is an optional correlation id; a trailing `+` asks the receiver to
//!   acknowledge with data rather than automatically
//! - `endpoint` is the namespace, empty for the root endpoint
//! - `data` is type-specific and may itself contain `:`

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// The nine packet kinds, in wire index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Disconnect,
    Connect,
    Heartbeat,
    Message,
    Json,
    Event,
    Ack,
    Error,
    Noop,
}

impl PacketType {
    const ALL: [PacketType; 9] = [
        PacketType::Disconnect,
        PacketType::Connect,
        PacketType::Heartbeat,
        PacketType::Message,
        PacketType::Json,
        PacketType::Event,
        PacketType::Ack,
        PacketType::Error,
        PacketType::Noop,
    ];

    /// Wire index of this type.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Look up a type by its wire index.
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Lowercase protocol name (e.g. "event").
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::Connect => "connect",
            Self::Heartbeat => "heartbeat",
            Self::Message => "message",
            Self::Json => "json",
            Self::Event => "event",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the receiver of a packet with an id should acknowledge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckMode {
    /// Bare id: the receiver acks immediately with no arguments.
    Auto,
    /// `id+`: the receiver's application supplies the ack arguments.
    Data,
}

/// Correlation id carried in the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId {
    pub id: u64,
    pub ack: AckMode,
}

impl PacketId {
    /// An id the receiver acknowledges automatically.
    pub fn auto(id: u64) -> Self {
        Self {
            id,
            ack: AckMode::Auto,
        }
    }

    /// An id the receiver acknowledges with data.
    pub fn data(id: u64) -> Self {
        Self {
            id,
            ack: AckMode::Data,
        }
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ack {
            AckMode::Auto => write!(f, "{}", self.id),
            AckMode::Data => write!(f, "{}+", self.id),
        }
    }
}

/// Reason carried by an error packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    TransportNotSupported,
    ClientNotHandshaken,
    Unauthorized,
}

impl ErrorReason {
    fn index(self) -> u8 {
        match self {
            Self::TransportNotSupported => 0,
            Self::ClientNotHandshaken => 1,
            Self::Unauthorized => 2,
        }
    }

    fn from_index(index: &str) -> Option<Self> {
        match index {
            "0" => Some(Self::TransportNotSupported),
            "1" => Some(Self::ClientNotHandshaken),
            "2" => Some(Self::Unauthorized),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransportNotSupported => "transport not supported",
            Self::ClientNotHandshaken => "client not handshaken",
            Self::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advice carried by an error packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorAdvice {
    Reconnect,
}

impl ErrorAdvice {
    fn index(self) -> u8 {
        match self {
            Self::Reconnect => 0,
        }
    }

    fn from_index(index: &str) -> Option<Self> {
        match index {
            "0" => Some(Self::Reconnect),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reconnect => "reconnect",
        }
    }
}

impl fmt::Display for ErrorAdvice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `endpoint` can be written to the wire.
///
/// The endpoint segment ends at the next `:`, so an endpoint containing one
/// would be read back as a shorter endpoint followed by data.
pub fn is_valid_endpoint(endpoint: &str) -> bool {
    !endpoint.contains(':')
}

/// One protocol packet.
///
/// Each variant carries exactly the fields its type allows, so a decoded
/// packet is never partially populated. Endpoints must satisfy
/// [`is_valid_endpoint`]; other packets do not survive a round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Leave an endpoint (or close the session, for the root endpoint).
    Disconnect { endpoint: String },
    /// Join an endpoint, optionally with a query string (no leading `?`).
    Connect {
        endpoint: String,
        query: Option<String>,
    },
    Heartbeat,
    Message {
        id: Option<PacketId>,
        endpoint: String,
        data: String,
    },
    Json {
        id: Option<PacketId>,
        endpoint: String,
        data: Value,
    },
    Event {
        id: Option<PacketId>,
        endpoint: String,
        name: String,
        args: Vec<Value>,
    },
    /// Reply to a packet that requested acknowledgement.
    Ack {
        endpoint: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    Error {
        endpoint: String,
        reason: Option<ErrorReason>,
        advice: Option<ErrorAdvice>,
    },
    Noop,
}

/// Body of an event packet.
#[derive(Deserialize)]
struct EventBody {
    name: String,
    #[serde(default)]
    args: Vec<Value>,
}

impl Packet {
    /// Connect packet for an endpoint.
    pub fn connect(endpoint: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            query: None,
        }
    }

    /// Disconnect packet for an endpoint.
    pub fn disconnect(endpoint: impl Into<String>) -> Self {
        Self::Disconnect {
            endpoint: endpoint.into(),
        }
    }

    /// Ack reply for a received correlation id.
    pub fn ack(endpoint: impl Into<String>, ack_id: u64, args: Vec<Value>) -> Self {
        Self::Ack {
            endpoint: endpoint.into(),
            ack_id,
            args,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Disconnect { .. } => PacketType::Disconnect,
            Self::Connect { .. } => PacketType::Connect,
            Self::Heartbeat => PacketType::Heartbeat,
            Self::Message { .. } => PacketType::Message,
            Self::Json { .. } => PacketType::Json,
            Self::Event { .. } => PacketType::Event,
            Self::Ack { .. } => PacketType::Ack,
            Self::Error { .. } => PacketType::Error,
            Self::Noop => PacketType::Noop,
        }
    }

    /// Endpoint this packet addresses; empty for the root endpoint.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Disconnect { endpoint }
            | Self::Connect { endpoint, .. }
            | Self::Message { endpoint, .. }
            | Self::Json { endpoint, .. }
            | Self::Event { endpoint, .. }
            | Self::Ack { endpoint, .. }
            | Self::Error { endpoint, .. } => endpoint,
            Self::Heartbeat | Self::Noop => "",
        }
    }

    /// Header correlation id, for the types that carry one.
    pub fn id(&self) -> Option<PacketId> {
        match self {
            Self::Message { id, .. } | Self::Json { id, .. } | Self::Event { id, .. } => *id,
            _ => None,
        }
    }

    /// Encode to wire text.
    pub fn encode(&self) -> String {
        let id = self.id().map(|id| id.to_string()).unwrap_or_default();
        let data = match self {
            Self::Connect { query, .. } => query.as_ref().map(|q| format!("?{q}")),
            Self::Message { data, .. } => (!data.is_empty()).then(|| data.clone()),
            Self::Json { data, .. } => Some(data.to_string()),
            Self::Event { name, args, .. } => {
                let name = Value::String(name.clone());
                Some(if args.is_empty() {
                    format!("{{\"name\":{name}}}")
                } else {
                    format!("{{\"name\":{name},\"args\":{}}}", Value::Array(args.clone()))
                })
            }
            Self::Ack { ack_id, args, .. } => Some(if args.is_empty() {
                ack_id.to_string()
            } else {
                format!("{ack_id}+{}", Value::Array(args.clone()))
            }),
            Self::Error { reason, advice, .. } => match (reason, advice) {
                (None, None) => None,
                (reason, advice) => {
                    let mut data = reason.map(|r| r.index().to_string()).unwrap_or_default();
                    if let Some(advice) = advice {
                        data.push('+');
                        data.push_str(&advice.index().to_string());
                    }
                    Some(data)
                }
            },
            Self::Disconnect { .. } | Self::Heartbeat | Self::Noop => None,
        };

        let mut out = format!("{}:{}:{}", self.packet_type().index(), id, self.endpoint());
        if let Some(data) = data {
            out.push(':');
            out.push_str(&data);
        }
        out
    }

    /// Decode wire text into a packet.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let mut parts = text.splitn(4, ':');
        let (Some(kind), Some(id), Some(endpoint)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DecodeError::MissingSeparator(text.to_string()));
        };
        let data = parts.next().unwrap_or("");

        let kind = kind
            .parse::<u8>()
            .ok()
            .and_then(PacketType::from_index)
            .ok_or_else(|| DecodeError::UnknownType(kind.to_string()))?;
        let id = parse_id(id)?;
        let endpoint = endpoint.to_string();

        let packet = match kind {
            PacketType::Disconnect => Self::Disconnect { endpoint },
            PacketType::Connect => Self::Connect {
                endpoint,
                query: match data {
                    "" => None,
                    q => Some(q.strip_prefix('?').unwrap_or(q).to_string()),
                },
            },
            PacketType::Heartbeat => Self::Heartbeat,
            PacketType::Message => Self::Message {
                id,
                endpoint,
                data: data.to_string(),
            },
            PacketType::Json => Self::Json {
                id,
                endpoint,
                data: serde_json::from_str(data).map_err(|e| DecodeError::InvalidPayload {
                    kind,
                    message: e.to_string(),
                })?,
            },
            PacketType::Event => {
                let body: EventBody =
                    serde_json::from_str(data).map_err(|e| DecodeError::InvalidPayload {
                        kind,
                        message: e.to_string(),
                    })?;
                Self::Event {
                    id,
                    endpoint,
                    name: body.name,
                    args: body.args,
                }
            }
            PacketType::Ack => {
                let (ack_id, args) = parse_ack(data)?;
                Self::Ack {
                    endpoint,
                    ack_id,
                    args,
                }
            }
            PacketType::Error => {
                let (reason, advice) = data.split_once('+').unwrap_or((data, ""));
                Self::Error {
                    endpoint,
                    reason: match reason {
                        "" => None,
                        r => Some(
                            ErrorReason::from_index(r)
                                .ok_or_else(|| DecodeError::UnknownReason(r.to_string()))?,
                        ),
                    },
                    advice: match advice {
                        "" => None,
                        a => Some(
                            ErrorAdvice::from_index(a)
                                .ok_or_else(|| DecodeError::UnknownAdvice(a.to_string()))?,
                        ),
                    },
                }
            }
            PacketType::Noop => Self::Noop,
        };
        Ok(packet)
    }
}

fn parse_id(segment: &str) -> Result<Option<PacketId>, DecodeError> {
    if segment.is_empty() {
        return Ok(None);
    }
    let (digits, ack) = match segment.strip_suffix('+') {
        Some(digits) => (digits, AckMode::Data),
        None => (segment, AckMode::Auto),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidId(segment.to_string()));
    }
    let id = digits
        .parse()
        .map_err(|_| DecodeError::InvalidId(segment.to_string()))?;
    Ok(Some(PacketId { id, ack }))
}

fn parse_ack(data: &str) -> Result<(u64, Vec<Value>), DecodeError> {
    let (id, args) = data.split_once('+').unwrap_or((data, ""));
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidAck(data.to_string()));
    }
    let id = id
        .parse()
        .map_err(|_| DecodeError::InvalidAck(data.to_string()))?;
    if args.is_empty() {
        return Ok((id, Vec::new()));
    }
    match serde_json::from_str(args) {
        Ok(Value::Array(args)) => Ok((id, args)),
        _ => Err(DecodeError::InvalidAck(data.to_string())),
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Packet {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Error decoding a packet from wire text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("packet must contain at least two ':' separators, got: {0}")]
    MissingSeparator(String),
    #[error("unknown packet type: {0}")]
    UnknownType(String),
    #[error("invalid packet id: {0}")]
    InvalidId(String),
    #[error("invalid {kind} payload: {message}")]
    InvalidPayload { kind: PacketType, message: String },
    #[error("invalid ack payload: {0}")]
    InvalidAck(String),
    #[error("unknown error reason: {0}")]
    UnknownReason(String),
    #[error("unknown error advice: {0}")]
    UnknownAdvice(String),
}
