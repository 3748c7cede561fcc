//! Core types for the socket.io 0.9 wire protocol.
//!
//! This crate provides the protocol primitives: the packet codec and the
//! handshake response format. It performs no I/O; `sockio-client` drives
//! a connection on top of it.

mod handshake;
mod packet;

pub use handshake::{
    DEFAULT_RESOURCE, Handshake, HandshakeParseError, Origin, PROTOCOL_VERSION,
    WEBSOCKET_TRANSPORT,
};
pub use packet::{
    AckMode, DecodeError, ErrorAdvice, ErrorReason, Packet, PacketId, PacketType,
    is_valid_endpoint,
};

/// Endpoint name of the root (default) namespace.
pub const ROOT_ENDPOINT: &str = "";
