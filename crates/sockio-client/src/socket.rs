//! Async driver and public handle.
//!
//! Every [`Socket`] talks to one driver task that owns the [`Engine`].
//! Application calls, collaborator results, inbound frames and watchdog
//! ticks all funnel into that task, so the engine is only ever touched
//! from one place.

use crate::ack::AckCallback;
use crate::config::ClientConfig;
use crate::endpoints::check_name;
use crate::engine::{Action, ConnectRequest, ConnectionState, Engine, Payload};
use crate::error::{ClientError, HandshakeError, TransportError};
use crate::event::{AckRequest, DisconnectReason, Notification};
use crate::handshake::{HandshakeRequest, Handshaker, HttpHandshaker};
use crate::transport::{Connector, TextSink, TextStream, WsConnector};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use sockio_core::Handshake;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Notification delivered to the application.
pub type SocketEvent = Notification<AckResponder>;

/// Receiving half of a socket's notifications. Keep draining it: the
/// driver waits when it is full.
pub type Events = mpsc::Receiver<SocketEvent>;

/// Snapshot of a socket's connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub current_endpoint: String,
    pub connected_endpoints: Vec<String>,
    pub pending_acks: usize,
    pub queued: usize,
}

enum Command {
    Connect {
        request: ConnectRequest,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Disconnect,
    Send {
        endpoint: Option<String>,
        payload: Payload,
        ack: Option<AckCallback>,
    },
    Ack {
        endpoint: Option<String>,
        id: u64,
        args: Vec<Value>,
    },
    Join {
        endpoint: String,
        query: Option<String>,
    },
    Leave {
        endpoint: String,
    },
    SetCurrent {
        endpoint: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Status {
        reply: oneshot::Sender<Status>,
    },
}

enum Input {
    Handshake {
        epoch: u64,
        result: Result<Handshake, HandshakeError>,
    },
    Opened {
        epoch: u64,
        sink: TextSink,
    },
    Frame {
        epoch: u64,
        text: String,
    },
    Closed {
        epoch: u64,
        reason: DisconnectReason,
    },
}

/// Replies to an acknowledgement the server asked for.
#[derive(Clone)]
pub struct AckResponder {
    request: AckRequest,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl AckResponder {
    pub fn id(&self) -> u64 {
        self.request.id
    }

    pub fn endpoint(&self) -> &str {
        &self.request.endpoint
    }

    /// Send the ack packet with `args`.
    pub fn respond(self, args: Vec<Value>) -> Result<(), ClientError> {
        let commands = self.commands.upgrade().ok_or(ClientError::Closed)?;
        commands
            .send(Command::Ack {
                endpoint: Some(self.request.endpoint),
                id: self.request.id,
                args,
            })
            .map_err(|_| ClientError::Closed)
    }
}

impl fmt::Debug for AckResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckResponder")
            .field("id", &self.request.id)
            .field("endpoint", &self.request.endpoint)
            .finish()
    }
}

/// Handle to one connection. Cheap to clone; the connection is
/// disconnected once every handle is dropped.
#[derive(Clone)]
pub struct Socket {
    commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl Socket {
    /// Spawn a socket using HTTP for the handshake and WebSocket transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: ClientConfig) -> (Self, Events) {
        Self::spawn_with(config, Arc::new(HttpHandshaker::new()), Arc::new(WsConnector))
    }

    /// Spawn a socket with custom collaborators.
    pub fn spawn_with(
        config: ClientConfig,
        handshaker: Arc<dyn Handshaker>,
        connector: Arc<dyn Connector>,
    ) -> (Self, Events) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            engine: Engine::new(&config),
            connect_timeout: config.connect_timeout(),
            handshaker,
            connector,
            commands: commands_tx.downgrade(),
            events: events_tx,
            inputs: inputs_tx,
            sink: None,
            reader: None,
        };
        tokio::spawn(driver.run(commands_rx, inputs_rx));

        (
            Self {
                commands: commands_tx,
            },
            events_rx,
        )
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx))?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Start a session. Fails if one is already connecting or connected.
    pub async fn connect(&self, request: ConnectRequest) -> Result<(), ClientError> {
        self.request(|reply| Command::Connect { request, reply })
            .await?
    }

    /// End the session, discarding queued sends and pending acks.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect)
    }

    fn send(
        &self,
        endpoint: Option<String>,
        payload: Payload,
        ack: Option<AckCallback>,
    ) -> Result<(), ClientError> {
        if let Some(endpoint) = &endpoint {
            check_name(endpoint)?;
        }
        self.command(Command::Send {
            endpoint,
            payload,
            ack,
        })
    }

    async fn send_awaiting_ack(
        &self,
        endpoint: Option<String>,
        payload: Payload,
    ) -> Result<Vec<Value>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.send(
            endpoint,
            payload,
            Some(Box::new(move |args| {
                let _ = tx.send(args);
            })),
        )?;
        rx.await.map_err(|_| ClientError::AckAbandoned)
    }

    pub fn send_message(&self, data: impl Into<String>) -> Result<(), ClientError> {
        self.send(None, Payload::Message(data.into()), None)
    }

    pub fn send_message_with_ack(
        &self,
        data: impl Into<String>,
        ack: impl FnOnce(Vec<Value>) + Send + 'static,
    ) -> Result<(), ClientError> {
        self.send(None, Payload::Message(data.into()), Some(Box::new(ack)))
    }

    pub fn send_json(&self, data: Value) -> Result<(), ClientError> {
        self.send(None, Payload::Json(data), None)
    }

    pub fn send_json_with_ack(
        &self,
        data: Value,
        ack: impl FnOnce(Vec<Value>) + Send + 'static,
    ) -> Result<(), ClientError> {
        self.send(None, Payload::Json(data), Some(Box::new(ack)))
    }

    pub fn send_event(&self, name: impl Into<String>, args: Vec<Value>) -> Result<(), ClientError> {
        let name = name.into();
        self.send(None, Payload::Event { name, args }, None)
    }

    pub fn send_event_with_ack(
        &self,
        name: impl Into<String>,
        args: Vec<Value>,
        ack: impl FnOnce(Vec<Value>) + Send + 'static,
    ) -> Result<(), ClientError> {
        let name = name.into();
        self.send(None, Payload::Event { name, args }, Some(Box::new(ack)))
    }

    /// Emit an event and wait for the server's acknowledgement.
    ///
    /// Resolves to [`ClientError::AckAbandoned`] if the session ends first.
    pub async fn emit_with_ack(
        &self,
        name: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, ClientError> {
        let name = name.into();
        self.send_awaiting_ack(None, Payload::Event { name, args })
            .await
    }

    /// Acknowledge a packet received on the current endpoint.
    pub fn send_acknowledgement(&self, id: u64, args: Vec<Value>) -> Result<(), ClientError> {
        self.command(Command::Ack {
            endpoint: None,
            id,
            args,
        })
    }

    /// Join an endpoint over the existing connection.
    pub fn join(&self, endpoint: impl Into<String>, query: Option<String>) -> Result<(), ClientError> {
        let endpoint = endpoint.into();
        check_name(&endpoint)?;
        self.command(Command::Join { endpoint, query })
    }

    pub fn leave(&self, endpoint: impl Into<String>) -> Result<(), ClientError> {
        let endpoint = endpoint.into();
        check_name(&endpoint)?;
        self.command(Command::Leave { endpoint })
    }

    /// Change the endpoint used by sends that do not name one.
    pub async fn set_current_endpoint(&self, endpoint: impl Into<String>) -> Result<(), ClientError> {
        let endpoint = endpoint.into();
        self.request(|reply| Command::SetCurrent { endpoint, reply })
            .await?
    }

    pub async fn status(&self) -> Result<Status, ClientError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Handle scoped to one endpoint.
    pub fn of(&self, endpoint: impl Into<String>) -> Channel {
        Channel {
            socket: self.clone(),
            endpoint: endpoint.into(),
        }
    }
}

/// Sends addressed to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct Channel {
    socket: Socket,
    endpoint: String,
}

impl Channel {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn send_message(&self, data: impl Into<String>) -> Result<(), ClientError> {
        self.socket
            .send(Some(self.endpoint.clone()), Payload::Message(data.into()), None)
    }

    pub fn send_json(&self, data: Value) -> Result<(), ClientError> {
        self.socket
            .send(Some(self.endpoint.clone()), Payload::Json(data), None)
    }

    pub fn send_event(&self, name: impl Into<String>, args: Vec<Value>) -> Result<(), ClientError> {
        let name = name.into();
        self.socket
            .send(Some(self.endpoint.clone()), Payload::Event { name, args }, None)
    }

    pub async fn emit_with_ack(
        &self,
        name: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, ClientError> {
        let name = name.into();
        self.socket
            .send_awaiting_ack(Some(self.endpoint.clone()), Payload::Event { name, args })
            .await
    }

    pub fn send_acknowledgement(&self, id: u64, args: Vec<Value>) -> Result<(), ClientError> {
        check_name(&self.endpoint)?;
        self.socket.command(Command::Ack {
            endpoint: Some(self.endpoint.clone()),
            id,
            args,
        })
    }

    pub fn leave(&self) -> Result<(), ClientError> {
        self.socket.leave(self.endpoint.clone())
    }
}

struct Driver {
    engine: Engine,
    connect_timeout: Duration,
    handshaker: Arc<dyn Handshaker>,
    connector: Arc<dyn Connector>,
    commands: mpsc::WeakUnboundedSender<Command>,
    events: mpsc::Sender<SocketEvent>,
    inputs: mpsc::UnboundedSender<Input>,
    sink: Option<TextSink>,
    /// Cancels the task that opens and reads the current transport.
    reader: Option<CancellationToken>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inputs: mpsc::UnboundedReceiver<Input>,
    ) {
        let mut ticker: Option<Interval> = None;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all socket handles dropped, shutting down");
                        self.engine.disconnect();
                        self.perform().await;
                        break;
                    }
                },
                Some(input) = inputs.recv() => self.handle_input(input).await,
                () = next_tick(&mut ticker) => self.engine.tick(now()),
            }
            self.perform().await;
            sync_ticker(&mut ticker, self.engine.tick_interval());
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { request, reply } => {
                let _ = reply.send(self.engine.connect(request));
            }
            Command::Disconnect => self.engine.disconnect(),
            Command::Send {
                endpoint,
                payload,
                ack,
            } => log_rejected(self.engine.send(endpoint.as_deref(), payload, ack)),
            Command::Ack { endpoint, id, args } => {
                log_rejected(self.engine.send_ack(endpoint.as_deref(), id, args));
            }
            Command::Join { endpoint, query } => log_rejected(self.engine.join(&endpoint, query)),
            Command::Leave { endpoint } => log_rejected(self.engine.leave(&endpoint)),
            Command::SetCurrent { endpoint, reply } => {
                let _ = reply.send(self.engine.set_current_endpoint(&endpoint));
            }
            Command::Status { reply } => {
                let endpoints = self.engine.endpoints();
                let _ = reply.send(Status {
                    state: self.engine.state(),
                    session_id: self.engine.session_id().map(str::to_string),
                    current_endpoint: endpoints.current().to_string(),
                    connected_endpoints: endpoints.connected(),
                    pending_acks: self.engine.pending_acks(),
                    queued: self.engine.queued(),
                });
            }
        }
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Handshake { epoch, result } => self.engine.handshake_completed(epoch, result),
            Input::Opened { epoch, mut sink } => {
                if epoch == self.engine.epoch() && self.engine.state() == ConnectionState::Connecting
                {
                    self.sink = Some(sink);
                    self.engine.transport_opened(epoch);
                } else {
                    debug!(epoch, "closing transport opened for a stale session");
                    let _ = sink.close().await;
                }
            }
            Input::Frame { epoch, text } => self.engine.receive(epoch, &text, now()),
            Input::Closed { epoch, reason } => self.engine.transport_closed(epoch, reason),
        }
    }

    /// Execute engine actions until none remain.
    async fn perform(&mut self) {
        while let Some(action) = self.engine.next_action() {
            match action {
                Action::Handshake { epoch, request } => self.spawn_handshake(epoch, request),
                Action::Open { epoch, url } => self.spawn_transport(epoch, url),
                Action::Send(text) => self.write(text).await,
                Action::Close => self.close().await,
                Action::Notify(notification) => self.deliver(notification).await,
            }
        }
    }

    fn spawn_handshake(&self, epoch: u64, request: HandshakeRequest) {
        let handshaker = self.handshaker.clone();
        let inputs = self.inputs.clone();
        let timeout = self.connect_timeout;
        tokio::spawn(async move {
            let result = match time::timeout(timeout, handshaker.handshake(&request)).await {
                Ok(result) => result,
                Err(_) => Err(HandshakeError::Timeout(timeout)),
            };
            let _ = inputs.send(Input::Handshake { epoch, result });
        });
    }

    fn spawn_transport(&mut self, epoch: u64, url: String) {
        let token = CancellationToken::new();
        if let Some(previous) = self.reader.replace(token.clone()) {
            previous.cancel();
        }
        let connector = self.connector.clone();
        let inputs = self.inputs.clone();
        let timeout = self.connect_timeout;
        tokio::spawn(async move {
            let opened = tokio::select! {
                () = token.cancelled() => return,
                opened = time::timeout(timeout, connector.connect(&url)) => opened,
            };
            let (sink, stream) = match opened {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    let reason = DisconnectReason::TransportError(e.to_string());
                    let _ = inputs.send(Input::Closed { epoch, reason });
                    return;
                }
                Err(_) => {
                    let reason =
                        DisconnectReason::TransportError(TransportError::Timeout(timeout).to_string());
                    let _ = inputs.send(Input::Closed { epoch, reason });
                    return;
                }
            };
            if inputs.send(Input::Opened { epoch, sink }).is_ok() {
                read_transport(epoch, stream, inputs, token).await;
            }
        });
    }

    async fn write(&mut self, text: String) {
        let Some(sink) = self.sink.as_mut() else {
            warn!(frame = %text, "transport not open, dropping frame");
            return;
        };
        if let Err(e) = sink.send(text).await {
            warn!(error = %e, "transport write failed");
            self.sink = None;
            let epoch = self.engine.epoch();
            self.engine
                .transport_closed(epoch, DisconnectReason::TransportError(e.to_string()));
        }
    }

    async fn close(&mut self) {
        if let Some(token) = self.reader.take() {
            token.cancel();
        }
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error closing transport");
            }
        }
    }

    async fn deliver(&mut self, notification: Notification) {
        let commands = &self.commands;
        let event = notification.map_ack(|request| AckResponder {
            request,
            commands: commands.clone(),
        });
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

async fn read_transport(
    epoch: u64,
    mut stream: TextStream,
    inputs: mpsc::UnboundedSender<Input>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(text)) => {
                    if inputs.send(Input::Frame { epoch, text }).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let reason = DisconnectReason::TransportError(e.to_string());
                    let _ = inputs.send(Input::Closed { epoch, reason });
                    break;
                }
                None => {
                    let _ = inputs.send(Input::Closed {
                        epoch,
                        reason: DisconnectReason::TransportClosed,
                    });
                    break;
                }
            },
        }
    }
}

/// Handles check endpoint names before queueing a command, so this only
/// sees what the engine still refuses.
fn log_rejected(result: Result<(), ClientError>) {
    if let Err(e) = result {
        warn!(error = %e, "command rejected");
    }
}

fn now() -> std::time::Instant {
    time::Instant::now().into_std()
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Keep the watchdog ticker in step with the engine's requested period.
fn sync_ticker(ticker: &mut Option<Interval>, period: Option<Duration>) {
    match (period, ticker.as_ref()) {
        (Some(period), Some(current)) if current.period() == period => {}
        (Some(period), _) => {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *ticker = Some(interval);
        }
        (None, _) => *ticker = None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticker_follows_requested_period() {
        let mut ticker = None;
        sync_ticker(&mut ticker, Some(Duration::from_secs(2)));
        let start = time::Instant::now();
        next_tick(&mut ticker).await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));

        sync_ticker(&mut ticker, Some(Duration::from_secs(2)));
        next_tick(&mut ticker).await;
        assert_eq!(start.elapsed(), Duration::from_secs(4));

        sync_ticker(&mut ticker, None);
        assert!(ticker.is_none());
        let idle = time::timeout(Duration::from_secs(60), next_tick(&mut ticker)).await;
        assert!(idle.is_err());
    }

    #[tokio::test]
    async fn responder_fails_once_socket_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        let responder = AckResponder {
            request: AckRequest {
                id: 3,
                endpoint: "/chat".into(),
            },
            commands: tx.downgrade(),
        };
        assert_eq!(responder.endpoint(), "/chat");

        drop(rx);
        drop(tx);
        assert_eq!(responder.respond(vec![]), Err(ClientError::Closed));
    }
}
