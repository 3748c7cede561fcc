//! Connection state machine and packet dispatch.
//!
//! The engine performs no I/O. Callers feed it inputs (public operations,
//! collaborator results, inbound frames, watchdog ticks) and drain the
//! resulting [`Action`]s in order. [`Socket`](crate::Socket) is the async
//! driver that runs one engine on a single task.

use crate::ack::{AckCallback, AckRegistry};
use crate::config::ClientConfig;
use crate::endpoints::{Endpoints, check_name};
use crate::error::{ClientError, HandshakeError};
use crate::event::{AckRequest, DisconnectReason, Notification};
use crate::handshake::HandshakeRequest;
use crate::queue::OutgoingQueue;
use crate::watchdog::{Watchdog, WatchdogTick};
use serde_json::Value;
use sockio_core::{
    AckMode, ErrorReason, Handshake, Origin, Packet, PacketId, ROOT_ENDPOINT, WEBSOCKET_TRANSPORT,
};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Handshake in flight, or transport opening.
    Connecting,
    /// Transport open, root endpoint not yet confirmed.
    Open,
    /// Root endpoint confirmed; sends go straight to the transport.
    Connected,
    /// The last session attempt failed.
    Failed,
}

/// Parameters for a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub origin: Origin,
    /// Query parameters for the handshake request.
    pub params: Vec<(String, String)>,
    /// Non-root endpoints to join once the root is confirmed.
    pub endpoints: Vec<String>,
}

impl ConnectRequest {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            origin: Origin::new(host, port, false),
            params: Vec::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.origin.secure = secure;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }
}

/// Side effect requested by the engine.
#[derive(Debug)]
pub enum Action {
    /// Perform the handshake and report back via [`Engine::handshake_completed`].
    Handshake { epoch: u64, request: HandshakeRequest },
    /// Open the transport and report back via [`Engine::transport_opened`].
    Open { epoch: u64, url: String },
    /// Write one text frame.
    Send(String),
    /// Close the transport.
    Close,
    /// Deliver a notification to the application.
    Notify(Notification),
}

/// Application payload for the send operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Message(String),
    Json(Value),
    Event { name: String, args: Vec<Value> },
}

/// One connection's protocol state.
#[derive(Debug)]
pub struct Engine {
    resource: String,
    heartbeat_override: Option<Duration>,
    state: ConnectionState,
    /// Bumped on every new attempt and every teardown; collaborator results
    /// carrying an older epoch are stale.
    epoch: u64,
    origin: Option<Origin>,
    session_id: Option<String>,
    endpoints: Endpoints,
    watchdog: Watchdog,
    acks: AckRegistry,
    queue: OutgoingQueue,
    actions: VecDeque<Action>,
}

impl Engine {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            resource: config.resource.clone(),
            heartbeat_override: config.heartbeat_override(),
            state: ConnectionState::Disconnected,
            epoch: 0,
            origin: None,
            session_id: None,
            endpoints: Endpoints::new(),
            watchdog: Watchdog::new(config.heartbeat_ticks_per_timeout),
            acks: AckRegistry::new(),
            queue: OutgoingQueue::new(),
            actions: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        )
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.watchdog.timeout()
    }

    /// Period at which [`tick`](Self::tick) should be called, while the
    /// watchdog is running.
    pub fn tick_interval(&self) -> Option<Duration> {
        if self.watchdog.is_running() {
            self.watchdog.interval()
        } else {
            None
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Next pending side effect, in the order it was produced.
    pub fn next_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    /// Take every pending side effect.
    pub fn take_actions(&mut self) -> Vec<Action> {
        self.actions.drain(..).collect()
    }

    // ── Public operations ───────────────────────────────────────────

    /// Start a session. Valid from `Disconnected` or `Failed`.
    pub fn connect(&mut self, request: ConnectRequest) -> Result<(), ClientError> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                return Err(ClientError::AlreadyConnecting);
            }
            ConnectionState::Connected => return Err(ClientError::AlreadyConnected),
            ConnectionState::Disconnected | ConnectionState::Failed => {}
        }
        for endpoint in &request.endpoints {
            check_name(endpoint)?;
        }

        self.epoch += 1;
        self.state = ConnectionState::Connecting;
        self.endpoints.reset(request.endpoints);
        info!(origin = %request.origin, epoch = self.epoch, "connecting");

        self.actions.push_back(Action::Handshake {
            epoch: self.epoch,
            request: HandshakeRequest {
                origin: request.origin.clone(),
                resource: self.resource.clone(),
                params: request.params,
            },
        });
        self.origin = Some(request.origin);
        Ok(())
    }

    /// End the session. A no-op when there is none.
    pub fn disconnect(&mut self) {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                debug!("disconnect ignored, no session");
            }
            ConnectionState::Connecting => {
                self.teardown(ConnectionState::Disconnected, DisconnectReason::Requested);
            }
            ConnectionState::Open | ConnectionState::Connected => {
                self.write(&Packet::disconnect(ROOT_ENDPOINT));
                self.teardown(ConnectionState::Disconnected, DisconnectReason::Requested);
            }
        }
    }

    /// Send application data, queueing it until `Connected`.
    ///
    /// With a callback, a fresh correlation id is embedded and the callback
    /// runs when the matching ack arrives.
    pub fn send(
        &mut self,
        endpoint: Option<&str>,
        payload: Payload,
        ack: Option<AckCallback>,
    ) -> Result<(), ClientError> {
        if let Some(endpoint) = endpoint {
            check_name(endpoint)?;
        }
        let endpoint = self.endpoints.resolve(endpoint);
        let id = ack.map(|callback| PacketId::data(self.acks.register(callback)));
        let packet = match payload {
            Payload::Message(data) => Packet::Message { id, endpoint, data },
            Payload::Json(data) => Packet::Json { id, endpoint, data },
            Payload::Event { name, args } => Packet::Event {
                id,
                endpoint,
                name,
                args,
            },
        };
        self.send_packet(packet);
        Ok(())
    }

    pub fn send_message(
        &mut self,
        endpoint: Option<&str>,
        data: String,
        ack: Option<AckCallback>,
    ) -> Result<(), ClientError> {
        self.send(endpoint, Payload::Message(data), ack)
    }

    pub fn send_json(
        &mut self,
        endpoint: Option<&str>,
        data: Value,
        ack: Option<AckCallback>,
    ) -> Result<(), ClientError> {
        self.send(endpoint, Payload::Json(data), ack)
    }

    pub fn send_event(
        &mut self,
        endpoint: Option<&str>,
        name: String,
        args: Vec<Value>,
        ack: Option<AckCallback>,
    ) -> Result<(), ClientError> {
        self.send(endpoint, Payload::Event { name, args }, ack)
    }

    /// Answer an acknowledgement the server asked for.
    pub fn send_ack(
        &mut self,
        endpoint: Option<&str>,
        ack_id: u64,
        args: Vec<Value>,
    ) -> Result<(), ClientError> {
        if let Some(endpoint) = endpoint {
            check_name(endpoint)?;
        }
        let endpoint = self.endpoints.resolve(endpoint);
        let packet = Packet::ack(endpoint, ack_id, args);
        if self.is_connected() {
            self.write(&packet);
        } else {
            self.queue.push(packet);
        }
        Ok(())
    }

    /// Join an endpoint over the existing transport. Before the root connect
    /// arrives the join is deferred, query included.
    pub fn join(&mut self, endpoint: &str, query: Option<String>) -> Result<(), ClientError> {
        check_name(endpoint)?;
        self.endpoints.request(endpoint.to_string(), query);
        if self.is_connected() && !self.endpoints.is_connected(endpoint) {
            self.write(&Packet::Connect {
                endpoint: endpoint.to_string(),
                query: self.endpoints.query(endpoint).map(str::to_string),
            });
        }
        Ok(())
    }

    /// Leave an endpoint without closing the connection.
    pub fn leave(&mut self, endpoint: &str) -> Result<(), ClientError> {
        check_name(endpoint)?;
        if endpoint == ROOT_ENDPOINT {
            self.disconnect();
            return Ok(());
        }
        if self.is_connected() {
            self.write(&Packet::disconnect(endpoint));
        }
        if self.endpoints.is_connected(endpoint) {
            self.notify(Notification::EndpointDisconnected {
                endpoint: endpoint.to_string(),
            });
        }
        self.endpoints.forget(endpoint);
        Ok(())
    }

    pub fn set_current_endpoint(&mut self, endpoint: &str) -> Result<(), ClientError> {
        self.endpoints.set_current(endpoint)
    }

    // ── Collaborator inputs ─────────────────────────────────────────

    pub fn handshake_completed(&mut self, epoch: u64, result: Result<Handshake, HandshakeError>) {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(epoch, current = self.epoch, "stale handshake result ignored");
            return;
        }

        let handshake = match result {
            Ok(hs) if !hs.supports(WEBSOCKET_TRANSPORT) => {
                Err(HandshakeError::TransportUnsupported(hs.transports))
            }
            other => other,
        };

        match handshake {
            Ok(hs) => {
                let Some(origin) = &self.origin else {
                    return;
                };
                let url = origin.websocket_url(&self.resource, &hs.session_id);
                self.watchdog
                    .configure(self.heartbeat_override.or(hs.heartbeat_timeout));
                info!(
                    session = %hs.session_id,
                    heartbeat = ?self.watchdog.timeout(),
                    "handshake complete"
                );
                self.session_id = Some(hs.session_id);
                self.actions.push_back(Action::Open {
                    epoch: self.epoch,
                    url,
                });
            }
            Err(e) => {
                warn!(error = %e, "handshake failed");
                self.discard_pending();
                self.epoch += 1;
                self.state = ConnectionState::Failed;
                self.origin = None;
                self.notify(Notification::HandshakeFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    pub fn transport_opened(&mut self, epoch: u64) {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(epoch, "stale transport open ignored");
            return;
        }
        debug!("transport open, awaiting root connect");
        self.state = ConnectionState::Open;
    }

    /// The transport failed to open, errored, or closed.
    pub fn transport_closed(&mut self, epoch: u64, reason: DisconnectReason) {
        if epoch != self.epoch {
            debug!(epoch, "stale transport close ignored");
            return;
        }
        match self.state {
            ConnectionState::Connecting => {
                if self.session_id.is_some() {
                    warn!(%reason, "transport failed to open");
                    self.teardown(ConnectionState::Failed, reason);
                }
            }
            ConnectionState::Open | ConnectionState::Connected => {
                warn!(%reason, "transport lost");
                self.drop_unwritten();
                self.teardown(ConnectionState::Disconnected, reason);
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {}
        }
    }

    /// Handle one inbound text frame.
    pub fn receive(&mut self, epoch: u64, frame: &str, now: Instant) {
        if epoch != self.epoch
            || !matches!(
                self.state,
                ConnectionState::Open | ConnectionState::Connected
            )
        {
            debug!(epoch, "stale frame ignored");
            return;
        }
        self.watchdog.record_received(now);

        match Packet::decode(frame) {
            Ok(packet) => self.dispatch(packet, now),
            Err(error) => {
                warn!(%error, frame, "dropping undecodable frame");
                self.notify(Notification::DecodeFailed {
                    frame: frame.to_string(),
                    error,
                });
            }
        }
    }

    /// Advance the heartbeat watchdog.
    pub fn tick(&mut self, now: Instant) {
        if !self.is_connected() {
            return;
        }
        match self.watchdog.tick(now) {
            WatchdogTick::Idle => {}
            WatchdogTick::Heartbeat => {
                self.write(&Packet::Heartbeat);
                self.watchdog.record_sent(now);
            }
            WatchdogTick::Expired => {
                warn!(timeout = ?self.watchdog.timeout(), "heartbeat timeout");
                self.teardown(
                    ConnectionState::Disconnected,
                    DisconnectReason::HeartbeatTimeout,
                );
            }
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────

    fn dispatch(&mut self, packet: Packet, now: Instant) {
        match packet {
            Packet::Disconnect { endpoint } => {
                if endpoint == ROOT_ENDPOINT {
                    info!("server closed the session");
                    self.teardown(ConnectionState::Disconnected, DisconnectReason::Server);
                } else if self.endpoints.unconfirm(&endpoint) {
                    self.notify(Notification::EndpointDisconnected { endpoint });
                }
            }
            Packet::Connect { endpoint, .. } => {
                if endpoint == ROOT_ENDPOINT {
                    if self.state == ConnectionState::Open {
                        self.become_connected(now);
                    } else {
                        debug!("duplicate root connect ignored");
                    }
                } else if self.endpoints.confirm(&endpoint) {
                    debug!(%endpoint, "endpoint connected");
                    self.notify(Notification::EndpointConnected { endpoint });
                }
            }
            Packet::Heartbeat => {
                self.write(&Packet::Heartbeat);
                self.watchdog.record_sent(now);
            }
            Packet::Message { id, endpoint, data } => {
                let ack = self.inbound_ack(id, &endpoint);
                self.notify(Notification::Message {
                    endpoint,
                    data,
                    ack,
                });
            }
            Packet::Json { id, endpoint, data } => {
                let ack = self.inbound_ack(id, &endpoint);
                self.notify(Notification::Json {
                    endpoint,
                    data,
                    ack,
                });
            }
            Packet::Event {
                id,
                endpoint,
                name,
                args,
            } => {
                let ack = id.map(|id| AckRequest {
                    id: id.id,
                    endpoint: endpoint.clone(),
                });
                self.notify(Notification::Event {
                    endpoint,
                    name,
                    args,
                    ack,
                });
            }
            Packet::Ack { ack_id, args, .. } => {
                if !self.acks.resolve(ack_id, args) {
                    debug!(ack_id, "ack for unknown id ignored");
                }
            }
            Packet::Error {
                endpoint,
                reason,
                advice,
            } => {
                warn!(%endpoint, ?reason, ?advice, "server reported an error");
                let fatal = match reason {
                    Some(reason) if endpoint == ROOT_ENDPOINT => Some(reason),
                    _ => None,
                };
                self.notify(Notification::Error {
                    endpoint,
                    reason,
                    advice,
                });
                if let Some(reason) = fatal {
                    self.fail(reason);
                }
            }
            Packet::Noop => {}
        }
    }

    /// Message and JSON packets with a bare id are acked on receipt; `id+`
    /// hands the ack to the application.
    fn inbound_ack(&mut self, id: Option<PacketId>, endpoint: &str) -> Option<AckRequest> {
        match id {
            Some(PacketId {
                id,
                ack: AckMode::Auto,
            }) => {
                self.write(&Packet::ack(endpoint, id, Vec::new()));
                None
            }
            Some(PacketId {
                id,
                ack: AckMode::Data,
            }) => Some(AckRequest {
                id,
                endpoint: endpoint.to_string(),
            }),
            None => None,
        }
    }

    fn become_connected(&mut self, now: Instant) {
        self.state = ConnectionState::Connected;
        self.endpoints.confirm(ROOT_ENDPOINT);
        self.watchdog.start(now);
        info!(session = self.session_id.as_deref().unwrap_or(""), "connected");
        self.notify(Notification::Connected);

        for packet in self.endpoints.connect_packets() {
            self.write(&packet);
        }

        let queued = self.queue.take();
        if !queued.is_empty() {
            debug!(count = queued.len(), "flushing outgoing queue");
        }
        for entry in queued {
            self.actions.push_back(Action::Send(entry.encoded));
            self.sent(entry.packet);
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn send_packet(&mut self, packet: Packet) {
        if self.is_connected() {
            self.write(&packet);
            self.sent(packet);
        } else {
            debug!(kind = %packet.packet_type(), state = ?self.state, "queueing packet");
            self.queue.push(packet);
        }
    }

    fn sent(&mut self, packet: Packet) {
        if matches!(
            packet,
            Packet::Message { .. } | Packet::Json { .. } | Packet::Event { .. }
        ) {
            self.notify(Notification::MessageSent { packet });
        }
    }

    fn write(&mut self, packet: &Packet) {
        self.actions.push_back(Action::Send(packet.encode()));
    }

    fn notify(&mut self, notification: Notification) {
        self.actions.push_back(Action::Notify(notification));
    }

    fn fail(&mut self, reason: ErrorReason) {
        self.teardown(ConnectionState::Failed, DisconnectReason::Fatal(reason));
    }

    /// Frames still waiting for a dead transport will never be written, so
    /// they and their send confirmations go.
    fn drop_unwritten(&mut self) {
        let before = self.actions.len();
        self.actions.retain(|action| {
            !matches!(
                action,
                Action::Send(_) | Action::Notify(Notification::MessageSent { .. })
            )
        });
        let dropped = before - self.actions.len();
        if dropped > 0 {
            debug!(dropped, "dropped actions for a lost transport");
        }
    }

    fn discard_pending(&mut self) {
        let acks = self.acks.clear();
        let queued = self.queue.clear();
        if acks > 0 || queued > 0 {
            debug!(acks, queued, "discarded pending work");
        }
    }

    /// Single exit path for an established or in-flight session.
    fn teardown(&mut self, state: ConnectionState, reason: DisconnectReason) {
        let transport_open = matches!(
            self.state,
            ConnectionState::Open | ConnectionState::Connected
        ) || (self.state == ConnectionState::Connecting && self.session_id.is_some());

        self.watchdog.stop();
        self.discard_pending();
        self.endpoints.clear_connected();
        self.session_id = None;
        self.origin = None;
        self.epoch += 1;
        self.state = state;

        if transport_open {
            self.actions.push_back(Action::Close);
        }
        info!(%reason, "disconnected");
        self.notify(Notification::Disconnected { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn engine() -> Engine {
        Engine::new(&ClientConfig::default())
    }

    fn handshake(sid: &str, heartbeat: u64) -> Handshake {
        Handshake {
            session_id: sid.into(),
            heartbeat_timeout: Some(Duration::from_secs(heartbeat)),
            close_timeout: Some(Duration::from_secs(25)),
            transports: vec!["websocket".into()],
        }
    }

    fn sends(actions: &[Action]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn notifications(actions: Vec<Action>) -> Vec<Notification> {
        actions
            .into_iter()
            .filter_map(|a| match a {
                Action::Notify(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Drive an engine to `Open` and return the open epoch.
    fn open(engine: &mut Engine, request: ConnectRequest) -> u64 {
        engine.connect(request).unwrap();
        let epoch = engine.epoch();
        engine.handshake_completed(epoch, Ok(handshake("abc123", 20)));
        engine.transport_opened(epoch);
        engine.take_actions();
        epoch
    }

    #[test]
    fn connect_emits_handshake() {
        let mut engine = engine();
        engine
            .connect(ConnectRequest::new("localhost", 3000).param("token", "t"))
            .unwrap();
        assert_eq!(engine.state(), ConnectionState::Connecting);

        let actions = engine.take_actions();
        assert_eq!(actions.len(), 1);
        let Action::Handshake { request, .. } = &actions[0] else {
            panic!("expected handshake, got {actions:?}");
        };
        assert_eq!(request.origin.host, "localhost");
        assert_eq!(request.params, vec![("token".into(), "t".into())]);
    }

    #[test]
    fn second_connect_is_rejected() {
        let mut engine = engine();
        engine.connect(ConnectRequest::new("h", 1)).unwrap();
        assert_eq!(
            engine.connect(ConnectRequest::new("h", 1)),
            Err(ClientError::AlreadyConnecting)
        );

        let mut engine = self::engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        assert_eq!(
            engine.connect(ConnectRequest::new("h", 1)),
            Err(ClientError::AlreadyConnected)
        );
    }

    #[test]
    fn handshake_success_opens_websocket() {
        let mut engine = engine();
        engine.connect(ConnectRequest::new("example.com", 80)).unwrap();
        let epoch = engine.epoch();
        engine.take_actions();

        engine.handshake_completed(epoch, Ok(handshake("abc123", 20)));
        assert_eq!(engine.session_id(), Some("abc123"));
        assert_eq!(engine.heartbeat_timeout(), Some(Duration::from_secs(20)));

        let actions = engine.take_actions();
        assert!(matches!(
            &actions[..],
            [Action::Open { url, .. }] if url == "ws://example.com:80/socket.io/1/websocket/abc123"
        ));
    }

    #[test]
    fn heartbeat_override_wins() {
        let config = ClientConfig {
            heartbeat_timeout_secs: Some(5),
            ..ClientConfig::default()
        };
        let mut engine = Engine::new(&config);
        engine.connect(ConnectRequest::new("h", 1)).unwrap();
        let epoch = engine.epoch();
        engine.handshake_completed(epoch, Ok(handshake("s", 60)));
        assert_eq!(engine.heartbeat_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn handshake_failure_fails_without_disconnect_notification() {
        let mut engine = engine();
        engine.connect(ConnectRequest::new("h", 1)).unwrap();
        let epoch = engine.epoch();
        engine.take_actions();

        engine.handshake_completed(
            epoch,
            Err(HandshakeError::Status {
                status: 500,
                body: "boom".into(),
            }),
        );
        assert_eq!(engine.state(), ConnectionState::Failed);
        let notes = notifications(engine.take_actions());
        assert!(matches!(&notes[..], [Notification::HandshakeFailed { .. }]));

        // A new attempt is allowed after failure.
        assert!(engine.connect(ConnectRequest::new("h", 1)).is_ok());
    }

    #[test]
    fn handshake_without_websocket_fails() {
        let mut engine = engine();
        engine.connect(ConnectRequest::new("h", 1)).unwrap();
        let epoch = engine.epoch();
        let mut hs = handshake("s", 20);
        hs.transports = vec!["xhr-polling".into()];
        engine.handshake_completed(epoch, Ok(hs));
        assert_eq!(engine.state(), ConnectionState::Failed);
    }

    #[test]
    fn root_connect_reaches_connected() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        assert_eq!(engine.state(), ConnectionState::Open);

        engine.receive(epoch, "1::", Instant::now());
        assert!(engine.is_connected());
        assert_eq!(engine.tick_interval(), Some(Duration::from_secs(20) / 3));
        let notes = notifications(engine.take_actions());
        assert_eq!(notes, vec![Notification::Connected]);
    }

    #[test]
    fn queued_sends_flush_in_order_on_connect() {
        let mut engine = engine();
        engine.send_message(None, "first".into(), None).unwrap();
        engine.send_event(None, "second".into(), vec![json!(2)], None).unwrap();
        assert_eq!(engine.queued(), 2);
        assert!(engine.take_actions().is_empty());

        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        assert_eq!(engine.queued(), 2);
        engine.receive(epoch, "1::", Instant::now());

        let actions = engine.take_actions();
        assert_eq!(
            sends(&actions),
            vec!["3:::first", r#"5:::{"name":"second","args":[2]}"#]
        );
        assert_eq!(engine.queued(), 0);

        engine.send_message(None, "third".into(), None).unwrap();
        assert_eq!(sends(&engine.take_actions()), vec!["3:::third"]);
    }

    #[test]
    fn ack_callback_resolves_once() {
        let calls = Arc::new(Mutex::new(Vec::<Vec<Value>>::new()));
        let mut engine = engine();
        let recorded = calls.clone();
        engine
            .send_event(
                None,
                "greet".into(),
                vec![json!("hi")],
                Some(Box::new(move |args: Vec<Value>| {
                    recorded.lock().unwrap().push(args);
                })),
            )
            .unwrap();
        assert_eq!(engine.pending_acks(), 1);

        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        let actions = engine.take_actions();
        assert_eq!(
            sends(&actions),
            vec![r#"5:1+::{"name":"greet","args":["hi"]}"#]
        );

        engine.receive(epoch, r#"6:::1+["hello"]"#, Instant::now());
        engine.receive(epoch, r#"6:::1+["again"]"#, Instant::now());
        assert_eq!(*calls.lock().unwrap(), vec![vec![json!("hello")]]);
        assert_eq!(engine.pending_acks(), 0);
    }

    #[test]
    fn inbound_event_carries_ack_request() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.take_actions();

        engine.receive(epoch, r#"5:7+::{"name":"ask","args":[1]}"#, Instant::now());
        let notes = notifications(engine.take_actions());
        assert_eq!(
            notes,
            vec![Notification::Event {
                endpoint: String::new(),
                name: "ask".into(),
                args: vec![json!(1)],
                ack: Some(AckRequest {
                    id: 7,
                    endpoint: String::new()
                }),
            }]
        );

        engine.send_ack(None, 7, vec![json!("yes")]).unwrap();
        assert_eq!(sends(&engine.take_actions()), vec![r#"6:::7+["yes"]"#]);
        assert_eq!(engine.pending_acks(), 0);
    }

    #[test]
    fn bare_id_message_is_auto_acked() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.take_actions();

        engine.receive(epoch, "3:4::hi", Instant::now());
        let actions = engine.take_actions();
        assert_eq!(sends(&actions), vec!["6:::4"]);
        let notes = notifications(actions);
        assert!(matches!(
            &notes[..],
            [Notification::Message { ack: None, data, .. }] if data == "hi"
        ));
    }

    #[test]
    fn heartbeat_is_echoed() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.take_actions();

        engine.receive(epoch, "2::", Instant::now());
        let actions = engine.take_actions();
        assert_eq!(sends(&actions), vec!["2::"]);
        assert!(notifications(actions).is_empty());
    }

    #[test]
    fn watchdog_sends_heartbeats_then_expires() {
        let t0 = Instant::now();
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", t0);
        engine.take_actions();
        let interval = engine.tick_interval().unwrap();

        engine.tick(t0 + interval);
        assert_eq!(sends(&engine.take_actions()), vec!["2::"]);

        engine.receive(epoch, "8::", t0 + interval * 2);
        engine.tick(t0 + interval * 4);
        assert!(engine.is_connected());
        engine.take_actions();

        engine.tick(t0 + interval * 6);
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        let actions = engine.take_actions();
        assert!(actions.iter().any(|a| matches!(a, Action::Close)));
        assert_eq!(
            notifications(actions),
            vec![Notification::Disconnected {
                reason: DisconnectReason::HeartbeatTimeout
            }]
        );
        assert_eq!(engine.tick_interval(), None);
    }

    #[test]
    fn disconnect_twice_notifies_once() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        let discarded: AckCallback = Box::new(|_: Vec<Value>| panic!("discarded"));
        engine
            .send_event(None, "x".into(), vec![], Some(discarded))
            .unwrap();
        engine.take_actions();

        engine.disconnect();
        engine.disconnect();
        let actions = engine.take_actions();
        assert_eq!(sends(&actions), vec!["0::"]);
        assert_eq!(
            notifications(actions),
            vec![Notification::Disconnected {
                reason: DisconnectReason::Requested
            }]
        );
        assert_eq!(engine.pending_acks(), 0);
        assert_eq!(engine.session_id(), None);
    }

    #[test]
    fn disconnect_during_handshake_ignores_late_result() {
        let mut engine = engine();
        engine.connect(ConnectRequest::new("h", 1)).unwrap();
        let epoch = engine.epoch();
        engine.send_message(None, "queued".into(), None).unwrap();
        engine.disconnect();
        assert_eq!(engine.queued(), 0);

        engine.handshake_completed(epoch, Ok(handshake("late", 20)));
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        let actions = engine.take_actions();
        assert!(!actions.iter().any(|a| matches!(a, Action::Open { .. } | Action::Close)));
    }

    #[test]
    fn transport_close_tears_down() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.take_actions();

        engine.transport_closed(epoch, DisconnectReason::TransportClosed);
        engine.transport_closed(epoch, DisconnectReason::TransportClosed);
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        let notes = notifications(engine.take_actions());
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn transport_open_failure_fails() {
        let mut engine = engine();
        engine.connect(ConnectRequest::new("h", 1)).unwrap();
        let epoch = engine.epoch();
        engine.handshake_completed(epoch, Ok(handshake("s", 20)));
        engine.take_actions();

        engine.transport_closed(epoch, DisconnectReason::TransportError("refused".into()));
        assert_eq!(engine.state(), ConnectionState::Failed);
    }

    #[test]
    fn fatal_error_packet_fails_connection() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.take_actions();

        engine.receive(epoch, "7:::2+0", Instant::now());
        assert_eq!(engine.state(), ConnectionState::Failed);
        let notes = notifications(engine.take_actions());
        assert_eq!(notes.len(), 2);
        assert!(matches!(
            notes[1],
            Notification::Disconnected {
                reason: DisconnectReason::Fatal(ErrorReason::Unauthorized)
            }
        ));
    }

    #[test]
    fn endpoint_error_is_not_fatal() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.receive(epoch, "7::/chat:2", Instant::now());
        engine.receive(epoch, "7:::", Instant::now());
        assert!(engine.is_connected());
    }

    #[test]
    fn decode_failure_keeps_connection() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.take_actions();

        engine.receive(epoch, "garbage", Instant::now());
        assert!(engine.is_connected());
        let notes = notifications(engine.take_actions());
        assert!(matches!(&notes[..], [Notification::DecodeFailed { frame, .. }] if frame == "garbage"));
    }

    #[test]
    fn requested_endpoints_join_after_root_connect() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1).endpoint("/chat"));
        assert_eq!(engine.endpoints().current(), "/chat");

        engine.send_message(None, "hi".into(), None).unwrap();
        engine.receive(epoch, "1::", Instant::now());
        assert_eq!(sends(&engine.take_actions()), vec!["1::/chat", "3::/chat:hi"]);

        engine.receive(epoch, "1::/chat", Instant::now());
        assert!(engine.endpoints().is_connected("/chat"));
    }

    #[test]
    fn join_and_server_leave_endpoint() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.take_actions();

        engine.join("/chat", None).unwrap();
        let actions = engine.take_actions();
        assert_eq!(sends(&actions), vec!["1::/chat"]);
        assert!(!actions.iter().any(|a| matches!(a, Action::Handshake { .. })));

        engine.receive(epoch, "1::/chat", Instant::now());
        engine.receive(epoch, "0::/chat", Instant::now());
        assert!(engine.is_connected());
        assert!(!engine.endpoints().is_connected("/chat"));
        let notes = notifications(engine.take_actions());
        assert_eq!(
            notes,
            vec![
                Notification::EndpointConnected {
                    endpoint: "/chat".into()
                },
                Notification::EndpointDisconnected {
                    endpoint: "/chat".into()
                },
            ]
        );
    }

    #[test]
    fn leave_sends_disconnect_for_endpoint() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1).endpoint("/chat"));
        engine.receive(epoch, "1::", Instant::now());
        engine.receive(epoch, "1::/chat", Instant::now());
        engine.take_actions();

        engine.leave("/chat").unwrap();
        assert_eq!(sends(&engine.take_actions()), vec!["0::/chat"]);
        assert_eq!(engine.endpoints().current(), ROOT_ENDPOINT);
        assert!(engine.is_connected());
    }

    #[test]
    fn server_root_disconnect_tears_down() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.take_actions();

        engine.receive(epoch, "0::", Instant::now());
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        // Frames from the closed session are ignored.
        engine.receive(epoch, "3:::late", Instant::now());
        let notes = notifications(engine.take_actions());
        assert_eq!(
            notes,
            vec![Notification::Disconnected {
                reason: DisconnectReason::Server
            }]
        );
    }

    #[test]
    fn deferred_join_keeps_its_query() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));

        engine.join("/chat", Some("token=abc".into())).unwrap();
        assert!(sends(&engine.take_actions()).is_empty());

        engine.receive(epoch, "1::", Instant::now());
        assert_eq!(sends(&engine.take_actions()), vec!["1::/chat:?token=abc"]);
    }

    #[test]
    fn endpoints_with_colons_are_rejected() {
        let invalid = || -> Result<(), ClientError> {
            Err(ClientError::InvalidEndpoint("/a:b".into()))
        };
        let mut engine = engine();
        assert_eq!(
            engine.connect(ConnectRequest::new("h", 1).endpoint("/a:b")),
            invalid()
        );
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(engine.take_actions().is_empty());

        assert_eq!(engine.join("/a:b", None), invalid());
        assert_eq!(engine.leave("/a:b"), invalid());
        assert_eq!(engine.set_current_endpoint("/a:b"), invalid());
        assert_eq!(engine.send_ack(Some("/a:b"), 1, vec![]), invalid());
        let callback: AckCallback = Box::new(|_: Vec<Value>| {});
        assert_eq!(
            engine.send_message(Some("/a:b"), "hi".into(), Some(callback)),
            invalid()
        );
        assert_eq!(engine.queued(), 0);
        assert_eq!(engine.pending_acks(), 0);
        assert!(engine.endpoints().requested().is_empty());
    }

    #[test]
    fn lost_transport_drops_unwritten_sends() {
        let mut engine = engine();
        engine.send_message(None, "a".into(), None).unwrap();
        engine.send_message(None, "b".into(), None).unwrap();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());

        assert!(matches!(
            engine.next_action(),
            Some(Action::Notify(Notification::Connected))
        ));
        assert!(matches!(engine.next_action(), Some(Action::Send(text)) if text == "3:::a"));

        // Writing "3:::a" failed.
        engine.transport_closed(epoch, DisconnectReason::TransportError("broken".into()));
        let actions = engine.take_actions();
        assert!(sends(&actions).is_empty());
        assert_eq!(
            notifications(actions),
            vec![Notification::Disconnected {
                reason: DisconnectReason::TransportError("broken".into())
            }]
        );
    }

    #[test]
    fn message_sent_follows_each_data_write() {
        let mut engine = engine();
        let epoch = open(&mut engine, ConnectRequest::new("h", 1));
        engine.receive(epoch, "1::", Instant::now());
        engine.take_actions();

        engine.send_json(None, json!({"a": 1}), None).unwrap();
        let actions = engine.take_actions();
        assert!(matches!(
            &actions[..],
            [Action::Send(text), Action::Notify(Notification::MessageSent { .. })] if text == r#"4:::{"a":1}"#
        ));
    }
}
