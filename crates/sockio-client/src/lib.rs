//! Client for the socket.io 0.9 protocol.
//!
//! [`Socket`] is the entry point: it performs the HTTP handshake, opens a
//! WebSocket, keeps the session alive with heartbeats, multiplexes
//! endpoints over the one connection, and correlates acknowledgements.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use sockio_client::{ClientConfig, ConnectRequest, Socket, SocketEvent};
//!
//! let (socket, mut events) = Socket::spawn(ClientConfig::default());
//! socket.connect(ConnectRequest::new("localhost", 3000)).await?;
//! socket.send_event("hello", vec![serde_json::json!("world")])?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SocketEvent::Event { name, args, .. } = event {
//!         println!("{name}: {args:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The protocol logic lives in [`Engine`], which performs no I/O and can be
//! driven directly.

mod ack;
mod config;
mod endpoints;
mod engine;
mod error;
mod event;
mod handshake;
mod queue;
mod socket;
mod transport;
mod watchdog;

pub use ack::{AckCallback, AckRegistry};
pub use config::ClientConfig;
pub use endpoints::Endpoints;
pub use engine::{Action, ConnectRequest, ConnectionState, Engine, Payload};
pub use error::{ClientError, ConfigError, HandshakeError, TransportError};
pub use event::{AckRequest, DisconnectReason, Notification};
pub use handshake::{HandshakeRequest, Handshaker, HttpHandshaker};
pub use queue::{OutgoingQueue, Queued};
pub use socket::{AckResponder, Channel, Events, Socket, SocketEvent, Status};
pub use transport::{Connector, TextSink, TextStream, WsConnector};
pub use watchdog::{Watchdog, WatchdogTick};

pub use sockio_core as protocol;
pub use sockio_core::{ErrorAdvice, ErrorReason, Origin, Packet, PacketType, ROOT_ENDPOINT};
