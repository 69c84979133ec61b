// SPDX-License-Identifier: MPL-2.0

use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::commands::{DisconnectPacket, PublishCommand, SubscribeCommand, UnsubscribeCommand};
use super::error::{MqttClientError, MqttClientResult};
use super::events::{
    ClientEvent, ConnectionFailureEvent, ConnectionSuccessEvent, DisconnectionEvent,
};
use super::inflight::PendingOperationTable;
use super::offline_queue::{self, OperationQueue};
use super::operation::{
    ClientOperation, Completion, CompletionSender, OperationHandle, OperationId, OperationPacket,
};
use super::opts::{ClientSessionBehavior, MqttClientOptions};
use super::reconnect::ReconnectPolicy;
use super::results::{ConnAckPacket, PublishResult, SubAckPacket, UnsubAckPacket};
use super::settings::NegotiatedSettings;
use super::statistics::OperationStatistics;
use super::topic_alias::{InboundTopicAliasCache, OutboundTopicAliasCache};
use super::transport::{ConnectRequest, ConnectionId, TransportEvent, TransportRequest};
use super::validation;

/// DISCONNECT reason code sent when the broker misuses inbound topic aliases.
const REASON_TOPIC_ALIAS_INVALID: u8 = 0x94;

/// Connection state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not running; only `start()` leaves this state.
    Stopped,
    /// A connection attempt is in progress.
    Connecting,
    Connected,
    /// Disconnected or failed, waiting for the backoff to elapse before the next attempt.
    PendingReconnect,
}

/// A "Sans-I/O" MQTT5 connection lifecycle engine.
///
/// The engine owns the connection state machine, the reconnection policy, the offline queue,
/// the pending operation table and both topic alias caches. It performs no I/O and reads no
/// clock: every input carries the current instant.
///
/// # Architecture
///
/// - **Input**:
///     - Caller commands: `start`, `stop`, `publish`, `subscribe`, `unsubscribe`.
///     - Transport events (`handle_transport_event`).
///     - Time ticks for reconnect backoff, keep-alive and timeouts (`handle_tick`).
/// - **Output**:
///     - Requests for the transport engine (`take_requests`).
///     - Lifecycle and publish-received events for the application (`take_events`).
///     - Completion handles, resolved exactly once.
///
/// # Usage
///
/// In a loop:
///   - Feed commands and transport events as they arrive.
///   - Dispatch `take_requests()` to the transport and `take_events()` to the handler.
///   - Sleep until `next_tick_at()` and call `handle_tick(now)`.
///
/// # Connection identity
///
/// Every connect request carries a new `ConnectionId`. Lifecycle events from the transport
/// only apply when they name the current attempt and the engine still waits for them, so the
/// late report of a connection the engine already closed (stop, connack or ping timeout,
/// protocol violation) or abandoned is dropped.
#[derive(Debug)]
pub struct MqttEngine {
    options: MqttClientOptions,
    state: ClientState,

    reconnect: ReconnectPolicy,
    queue: OperationQueue,
    pending: PendingOperationTable,
    outbound_aliases: OutboundTopicAliasCache,
    inbound_aliases: InboundTopicAliasCache,

    /// Settings of the current connection, `Some` only while connected.
    settings: Option<NegotiatedSettings>,
    /// Client id assigned by the broker, reused when none is configured.
    assigned_client_id: Option<String>,
    has_connected_successfully: bool,
    next_operation_id: OperationId,

    // Timers
    connack_deadline: Option<Instant>,
    last_request_at: Option<Instant>,
    ping_deadline: Option<Instant>,
    /// Id of the most recent connection attempt.
    connection_id: ConnectionId,

    // Configurable timeouts (cached from options)
    connack_timeout: Duration,
    ping_timeout: Duration,
    ack_timeout: Option<Duration>,

    requests: Vec<TransportRequest>,
    events: Vec<ClientEvent>,
}

impl MqttEngine {
    /// Create a new engine. Fails if the options do not validate.
    pub fn new(options: MqttClientOptions) -> MqttClientResult<Self> {
        let reconnect = ReconnectPolicy::new(&options);
        Self::with_reconnect_policy(options, reconnect)
    }

    /// Same as `new`, with deterministic reconnect jitter.
    pub fn with_seed(options: MqttClientOptions, seed: u64) -> MqttClientResult<Self> {
        let reconnect = ReconnectPolicy::with_seed(&options, seed);
        Self::with_reconnect_policy(options, reconnect)
    }

    fn with_reconnect_policy(
        options: MqttClientOptions,
        reconnect: ReconnectPolicy,
    ) -> MqttClientResult<Self> {
        options.validate()?;

        let ack_timeout = match options.ack_timeout_seconds {
            0 => None,
            seconds => Some(Duration::from_secs(seconds)),
        };
        let aliasing = &options.topic_aliasing;
        let outbound_aliases = OutboundTopicAliasCache::new(
            aliasing.outbound_behavior,
            aliasing.outbound_cache_size(),
        );

        Ok(Self {
            state: ClientState::Stopped,
            reconnect,
            queue: OperationQueue::new(),
            pending: PendingOperationTable::new(ack_timeout),
            outbound_aliases,
            inbound_aliases: InboundTopicAliasCache::new(),
            settings: None,
            assigned_client_id: None,
            has_connected_successfully: false,
            next_operation_id: 1,
            connack_deadline: None,
            last_request_at: None,
            ping_deadline: None,
            connection_id: 0,
            connack_timeout: Duration::from_millis(options.connack_timeout_ms),
            ping_timeout: Duration::from_millis(options.ping_timeout_ms),
            ack_timeout,
            requests: Vec::new(),
            events: Vec::new(),
            options,
        })
    }

    pub fn options(&self) -> &MqttClientOptions {
        &self.options
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// Id of the most recent connection attempt, 0 before the first one.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Settings of the current connection, if connected.
    pub fn negotiated_settings(&self) -> Option<&NegotiatedSettings> {
        self.settings.as_ref()
    }

    /// Consecutive failed or short-lived connections since the last stable one.
    pub fn consecutive_failures(&self) -> u32 {
        self.reconnect.consecutive_failures()
    }

    /// Drain the requests for the transport engine, in submission order.
    pub fn take_requests(&mut self) -> Vec<TransportRequest> {
        std::mem::take(&mut self.requests)
    }

    /// Drain the events for the application, in the order they happened.
    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn operation_statistics(&self) -> OperationStatistics {
        OperationStatistics {
            incomplete_operation_count: (self.queue.len() + self.pending.len()) as u64,
            incomplete_operation_size: (self.queue.size() + self.pending.size()) as u64,
            unacked_operation_count: self.pending.unacked_count() as u64,
            unacked_operation_size: self.pending.unacked_size() as u64,
        }
    }

    // --- Lifecycle ---

    /// Begin connecting immediately. No-op unless stopped.
    pub fn start(&mut self, now: Instant) {
        if self.state != ClientState::Stopped {
            debug!(state = ?self.state, "start ignored, client already running");
            return;
        }
        info!(host = %self.options.host, port = self.options.port, "starting client");
        self.begin_connect(now);
    }

    /// Stop the client from any state.
    ///
    /// An established connection is closed, sending `disconnect` first when given. A pending
    /// reconnect is cancelled. Incomplete operations are failed or kept per the offline queue
    /// policy; kept ones are submitted after the next `start()`. A connection that was up for
    /// long enough still resets the reconnect backoff.
    pub fn stop(&mut self, disconnect: Option<DisconnectPacket>, now: Instant) {
        match self.state {
            ClientState::Stopped => {
                debug!("stop ignored, client already stopped");
                return;
            }
            ClientState::Connected => {
                self.request_close(disconnect.clone());
                self.reconnect.on_connection_ended(now);
                self.end_connection();
                self.events
                    .push(ClientEvent::Disconnection(DisconnectionEvent {
                        error: MqttClientError::UserInitiatedDisconnect,
                        disconnect,
                    }));
            }
            ClientState::Connecting => {
                self.request_close(None);
            }
            ClientState::PendingReconnect => {}
        }

        self.reconnect.cancel();
        self.connack_deadline = None;
        let in_flight = self.pending.drain();
        self.queue
            .apply_disposition(self.options.offline_queue_behavior, in_flight);
        self.state = ClientState::Stopped;
        info!(retained = self.queue.len(), "client stopped");
        self.events.push(ClientEvent::Stopped);
    }

    // --- Operations ---

    pub fn publish(
        &mut self,
        command: PublishCommand,
        now: Instant,
    ) -> OperationHandle<PublishResult> {
        let (tx, handle) = OperationHandle::channel();
        self.publish_with_completion(command, tx, now);
        handle
    }

    pub fn publish_with_completion(
        &mut self,
        command: PublishCommand,
        completion: CompletionSender<PublishResult>,
        now: Instant,
    ) {
        self.submit_operation(
            OperationPacket::Publish(command),
            Completion::Publish(completion),
            now,
        );
    }

    pub fn subscribe(
        &mut self,
        command: SubscribeCommand,
        now: Instant,
    ) -> OperationHandle<SubAckPacket> {
        let (tx, handle) = OperationHandle::channel();
        self.subscribe_with_completion(command, tx, now);
        handle
    }

    pub fn subscribe_with_completion(
        &mut self,
        command: SubscribeCommand,
        completion: CompletionSender<SubAckPacket>,
        now: Instant,
    ) {
        self.submit_operation(
            OperationPacket::Subscribe(command),
            Completion::Subscribe(completion),
            now,
        );
    }

    pub fn unsubscribe(
        &mut self,
        command: UnsubscribeCommand,
        now: Instant,
    ) -> OperationHandle<UnsubAckPacket> {
        let (tx, handle) = OperationHandle::channel();
        self.unsubscribe_with_completion(command, tx, now);
        handle
    }

    pub fn unsubscribe_with_completion(
        &mut self,
        command: UnsubscribeCommand,
        completion: CompletionSender<UnsubAckPacket>,
        now: Instant,
    ) {
        self.submit_operation(
            OperationPacket::Unsubscribe(command),
            Completion::Unsubscribe(completion),
            now,
        );
    }

    fn submit_operation(&mut self, packet: OperationPacket, completion: Completion, now: Instant) {
        if let Err(error) = self.validate(&packet) {
            debug!(%error, "operation rejected by validation");
            completion.fail(error);
            return;
        }

        let id = self.next_operation_id;
        self.next_operation_id += 1;
        let operation = ClientOperation::new(id, packet, completion);

        if self.state == ClientState::Connected {
            self.queue.push_back(operation);
            self.service_queue(now);
        } else if offline_queue::is_retained(self.options.offline_queue_behavior, &operation.packet)
        {
            trace!(id, kind = %operation.kind(), "operation queued while offline");
            self.queue.push_back(operation);
        } else {
            debug!(id, kind = %operation.kind(), "operation rejected while offline");
            let error = offline_queue::offline_failure(&operation);
            operation.fail(error);
        }
    }

    fn validate(&self, packet: &OperationPacket) -> MqttClientResult<()> {
        let mode = self.options.extended_validation;
        let settings = self.settings.as_ref();
        match packet {
            OperationPacket::Publish(p) => validation::validate_publish(p, mode, settings),
            OperationPacket::Subscribe(s) => validation::validate_subscribe(s, mode, settings),
            OperationPacket::Unsubscribe(u) => {
                validation::validate_unsubscribe(u, mode, settings)
            }
        }
    }

    /// Submit queued operations in order while connected and flow control allows.
    fn service_queue(&mut self, now: Instant) {
        while self.state == ClientState::Connected {
            let Some(front) = self.queue.front() else {
                break;
            };
            if front.packet.is_qos1_plus_publish() && !self.pending.can_push_publish() {
                trace!("receive maximum reached, holding publishes");
                break;
            }
            let Some(operation) = self.queue.pop_front() else {
                break;
            };
            self.submit_to_transport(operation, now);
        }
    }

    fn submit_to_transport(&mut self, mut operation: ClientOperation, now: Instant) {
        // limits may have changed since the operation was queued
        if let Err(error) = self.validate(&operation.packet) {
            debug!(id = operation.id, %error, "queued operation no longer valid");
            operation.fail(error);
            return;
        }

        let id = operation.id;
        let rejoined = self
            .settings
            .as_ref()
            .is_some_and(|settings| settings.rejoined_session);
        let set_dup = operation.sent_before && rejoined && operation.packet.is_qos1_plus_publish();
        let request = match &mut operation.packet {
            OperationPacket::Publish(publish) => {
                publish.dup = set_dup;
                let alias = self
                    .outbound_aliases
                    .resolve(&publish.topic_name, publish.topic_alias);
                TransportRequest::Publish {
                    id,
                    packet: publish.clone(),
                    alias,
                }
            }
            OperationPacket::Subscribe(subscribe) => TransportRequest::Subscribe {
                id,
                packet: subscribe.clone(),
            },
            OperationPacket::Unsubscribe(unsubscribe) => TransportRequest::Unsubscribe {
                id,
                packet: unsubscribe.clone(),
            },
        };

        trace!(id, kind = %operation.kind(), "submitting operation");
        self.requests.push(request);
        self.last_request_at = Some(now);
        self.pending.push(operation, now);
    }

    // --- Transport events ---

    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::Connecting => {
                trace!("transport connecting");
            }
            TransportEvent::ConnectionSucceeded {
                connection_id,
                connack,
            } => {
                if !self.is_current_attempt(connection_id) {
                    debug!(connection_id, state = ?self.state, "stale connection success ignored");
                    return;
                }
                if connack.is_success() {
                    self.on_connection_success(connack, now);
                } else {
                    let error = MqttClientError::ConnectionRefused {
                        reason_code: connack.reason_code,
                        description: connack.reason_description().to_string(),
                    };
                    self.request_close(None);
                    self.on_connection_failure(error, Some(connack), now);
                }
            }
            TransportEvent::ConnectionFailed {
                connection_id,
                error,
                connack,
            } => {
                if !self.is_current_attempt(connection_id) {
                    debug!(
                        connection_id,
                        state = ?self.state,
                        %error,
                        "stale connection failure ignored"
                    );
                    return;
                }
                self.on_connection_failure(error, connack, now);
            }
            TransportEvent::Disconnected {
                connection_id,
                error,
                disconnect,
            } => {
                if connection_id != self.connection_id {
                    debug!(connection_id, %error, "disconnection of an old connection ignored");
                    return;
                }
                match self.state {
                    ClientState::Connected => self.on_connection_lost(error, disconnect, now),
                    // closed before CONNACK
                    ClientState::Connecting => self.on_connection_failure(error, None, now),
                    _ => debug!(state = ?self.state, %error, "stale disconnection ignored"),
                }
            }
            TransportEvent::PublishReceived(mut publish) => {
                if self.state != ClientState::Connected {
                    debug!("publish received while not connected, dropped");
                    return;
                }
                match self.inbound_aliases.resolve(&mut publish) {
                    Ok(()) => self.events.push(ClientEvent::PublishReceived(publish)),
                    Err(error) => {
                        warn!(%error, "closing connection");
                        self.request_close(Some(DisconnectPacket::with_reason(
                            REASON_TOPIC_ALIAS_INVALID,
                        )));
                        self.on_connection_lost(error, None, now);
                    }
                }
            }
            TransportEvent::OperationAcked { id, ack } => match self.pending.remove(id) {
                Some(operation) => {
                    trace!(id, "operation acknowledged");
                    operation.complete(ack);
                    self.service_queue(now);
                }
                None => debug!(id, "acknowledgment for unknown operation ignored"),
            },
            TransportEvent::OperationFailed { id, error } => match self.pending.remove(id) {
                Some(operation) => {
                    debug!(id, %error, "operation failed in transport");
                    operation.fail(error);
                    self.service_queue(now);
                }
                None => debug!(id, "failure for unknown operation ignored"),
            },
            TransportEvent::PingResponse => {
                self.ping_deadline = None;
            }
        }
    }

    fn begin_connect(&mut self, now: Instant) {
        let clean_start = match self.options.session_behavior {
            ClientSessionBehavior::Clean => true,
            ClientSessionBehavior::RejoinPostSuccess => !self.has_connected_successfully,
        };
        let mut connect = self.options.connect.clone();
        if connect.client_id.is_none() {
            connect.client_id = self.assigned_client_id.clone();
        }

        self.connection_id += 1;
        let request = ConnectRequest {
            connection_id: self.connection_id,
            host: self.options.host.clone(),
            port: self.options.port,
            transport: self.options.transport.clone(),
            connect,
            clean_start,
            topic_alias_maximum: self.options.topic_aliasing.inbound_alias_maximum(),
        };

        debug!(connection_id = request.connection_id, clean_start, "attempting connection");
        self.state = ClientState::Connecting;
        self.connack_deadline = Some(now + self.connack_timeout);
        self.requests.push(TransportRequest::Connect(request));
        self.events.push(ClientEvent::AttemptingConnect);
    }

    fn on_connection_success(&mut self, connack: ConnAckPacket, now: Instant) {
        let settings = NegotiatedSettings::resolve(
            &self.options.connect,
            self.options.topic_aliasing.inbound_alias_maximum(),
            &connack,
            self.assigned_client_id.as_deref(),
        );
        info!(%settings, "connection established");

        if self.options.connect.client_id.is_none() && !settings.client_id.is_empty() {
            self.assigned_client_id = Some(settings.client_id.clone());
        }
        self.has_connected_successfully = true;
        self.outbound_aliases
            .reset(settings.topic_alias_maximum_to_server);
        self.inbound_aliases
            .reset(settings.topic_alias_maximum_to_client);
        self.pending
            .update_receive_maximum(settings.receive_maximum_from_server);
        self.reconnect.on_connected(now);

        self.connack_deadline = None;
        self.ping_deadline = None;
        self.last_request_at = Some(now);
        self.state = ClientState::Connected;
        self.settings = Some(settings.clone());
        self.events
            .push(ClientEvent::ConnectionSuccess(ConnectionSuccessEvent {
                connack,
                settings,
            }));

        self.service_queue(now);
    }

    fn on_connection_failure(
        &mut self,
        error: MqttClientError,
        connack: Option<ConnAckPacket>,
        now: Instant,
    ) {
        warn!(%error, "connection attempt failed");
        self.connack_deadline = None;
        self.state = ClientState::PendingReconnect;
        self.events
            .push(ClientEvent::ConnectionFailure(ConnectionFailureEvent {
                error,
                connack,
            }));
        self.reconnect.schedule(now);
    }

    fn on_connection_lost(
        &mut self,
        error: MqttClientError,
        disconnect: Option<DisconnectPacket>,
        now: Instant,
    ) {
        warn!(%error, "connection lost");
        self.end_connection();
        self.state = ClientState::PendingReconnect;
        self.events
            .push(ClientEvent::Disconnection(DisconnectionEvent { error, disconnect }));

        let in_flight = self.pending.drain();
        self.queue
            .apply_disposition(self.options.offline_queue_behavior, in_flight);

        self.reconnect.on_connection_ended(now);
        self.reconnect.schedule(now);
    }

    /// Forget everything tied to the connection that just ended.
    fn end_connection(&mut self) {
        self.settings = None;
        self.ping_deadline = None;
        self.last_request_at = None;
    }

    /// Ask the transport to close the current connection. Its report about the end of that
    /// connection arrives later and is dropped, since the engine has moved on by then.
    fn request_close(&mut self, packet: Option<DisconnectPacket>) {
        self.requests.push(TransportRequest::Disconnect(packet));
    }

    /// True for outcomes of the attempt the engine is waiting on.
    fn is_current_attempt(&self, connection_id: ConnectionId) -> bool {
        self.state == ClientState::Connecting && connection_id == self.connection_id
    }

    // --- Time ---

    /// Advance timers.
    ///
    /// # Operations
    /// 1. **Reconnection**: starts the next attempt once the backoff has elapsed, and resets
    ///    the backoff once a connection has been up for long enough.
    /// 2. **Connack timeout**: abandons an attempt with no outcome in time.
    /// 3. **Ack timeout**: fails operations the broker did not acknowledge in time.
    /// 4. **Ping timeout**: drops a connection whose PINGREQ went unanswered.
    /// 5. **Keep-Alive**: sends PINGREQ when nothing was sent for the keep-alive interval.
    pub fn handle_tick(&mut self, now: Instant) {
        match self.state {
            ClientState::Stopped => {}
            ClientState::PendingReconnect => {
                if self.reconnect.take_due(now) {
                    self.begin_connect(now);
                }
            }
            ClientState::Connecting => {
                if self.connack_deadline.is_some_and(|deadline| now >= deadline) {
                    self.request_close(None);
                    self.on_connection_failure(
                        MqttClientError::ConnackTimeout {
                            timeout_ms: self.connack_timeout.as_millis() as u64,
                        },
                        None,
                        now,
                    );
                }
            }
            ClientState::Connected => self.handle_connected_tick(now),
        }
    }

    fn handle_connected_tick(&mut self, now: Instant) {
        self.reconnect.check_stable(now);

        let expired = self.pending.take_expired(now);
        if !expired.is_empty() {
            let timeout_ms = self.ack_timeout.map_or(0, |t| t.as_millis() as u64);
            for operation in expired {
                debug!(id = operation.id, "operation ack timeout");
                let error = MqttClientError::OperationTimeout {
                    operation: operation.kind().to_string(),
                    timeout_ms,
                };
                operation.fail(error);
            }
            self.service_queue(now);
        }

        if self.ping_deadline.is_some_and(|deadline| now >= deadline) {
            self.request_close(None);
            self.on_connection_lost(
                MqttClientError::PingTimeout {
                    timeout_ms: self.ping_timeout.as_millis() as u64,
                },
                None,
                now,
            );
            return;
        }

        if let Some(ping_at) = self.next_ping_at() {
            if now >= ping_at {
                trace!("keep-alive ping");
                self.requests.push(TransportRequest::Ping);
                self.last_request_at = Some(now);
                self.ping_deadline = Some(now + self.ping_timeout);
            }
        }
    }

    fn next_ping_at(&self) -> Option<Instant> {
        if self.ping_deadline.is_some() {
            return None;
        }
        let keep_alive = self.settings.as_ref()?.server_keep_alive;
        if keep_alive == 0 {
            return None;
        }
        Some(self.last_request_at? + Duration::from_secs(u64::from(keep_alive)))
    }

    /// Returns the exact timestamp of the next required wake-up.
    ///
    /// The runtime loop should sleep until this timestamp to avoid busy-waiting.
    /// Returns `None` if there are no scheduled timer events.
    pub fn next_tick_at(&self) -> Option<Instant> {
        match self.state {
            ClientState::Stopped => None,
            ClientState::PendingReconnect => self.reconnect.next_attempt_at(),
            ClientState::Connecting => self.connack_deadline,
            ClientState::Connected => [
                self.reconnect.reset_at(),
                self.pending.next_expiration(),
                self.ping_deadline,
                self.next_ping_at(),
            ]
            .into_iter()
            .flatten()
            .min(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_client::commands::QoS;
    use crate::mqtt_client::opts::{JitterMode, OfflineQueuePolicy, OutboundTopicAliasBehavior};
    use crate::mqtt_client::results::{OperationAck, PublishAckPacket};
    use crate::mqtt_client::topic_alias::OutboundAlias;

    fn options() -> MqttClientOptions {
        MqttClientOptions {
            retry_jitter_mode: JitterMode::None,
            ..Default::default()
        }
    }

    fn succeeded(engine: &MqttEngine, connack: ConnAckPacket) -> TransportEvent {
        TransportEvent::ConnectionSucceeded {
            connection_id: engine.connection_id(),
            connack,
        }
    }

    fn connected_engine(options: MqttClientOptions, now: Instant) -> MqttEngine {
        let mut engine = MqttEngine::new(options).unwrap();
        engine.start(now);
        engine.handle_transport_event(
            succeeded(&engine, ConnAckPacket::default()),
            now,
        );
        engine.take_requests();
        engine.take_events();
        engine
    }

    fn publish_ids(requests: &[TransportRequest]) -> Vec<OperationId> {
        requests
            .iter()
            .filter_map(|r| match r {
                TransportRequest::Publish { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_connects_immediately() {
        let now = Instant::now();
        let mut engine = MqttEngine::new(options()).unwrap();
        assert_eq!(engine.state(), ClientState::Stopped);
        assert_eq!(engine.next_tick_at(), None);

        engine.start(now);
        assert_eq!(engine.state(), ClientState::Connecting);
        assert_eq!(engine.take_events(), vec![ClientEvent::AttemptingConnect]);
        let requests = engine.take_requests();
        assert!(matches!(
            &requests[..],
            [TransportRequest::Connect(ConnectRequest { clean_start: true, .. })]
        ));
        assert_eq!(
            engine.next_tick_at(),
            Some(now + Duration::from_millis(20_000))
        );

        // second start is a no-op
        engine.start(now);
        assert!(engine.take_events().is_empty());
        assert!(engine.take_requests().is_empty());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let opts = MqttClientOptions {
            min_reconnect_delay_ms: 10,
            max_reconnect_delay_ms: 1,
            ..Default::default()
        };
        assert!(MqttEngine::new(opts).unwrap_err().is_fatal());
    }

    #[test]
    fn test_connection_success_event() {
        let now = Instant::now();
        let mut engine = MqttEngine::new(options()).unwrap();
        engine.start(now);
        engine.take_events();

        let connack = ConnAckPacket {
            assigned_client_identifier: Some("assigned-1".to_string()),
            ..Default::default()
        };
        engine.handle_transport_event(succeeded(&engine, connack), now);

        assert!(engine.is_connected());
        let events = engine.take_events();
        match &events[..] {
            [ClientEvent::ConnectionSuccess(event)] => {
                assert_eq!(event.settings.client_id, "assigned-1");
                assert!(!event.settings.rejoined_session);
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert_eq!(
            engine.negotiated_settings().map(|s| s.client_id.as_str()),
            Some("assigned-1")
        );
    }

    #[test]
    fn test_connack_failure_code_is_connection_failure() {
        let now = Instant::now();
        let mut engine = MqttEngine::new(options()).unwrap();
        engine.start(now);
        engine.take_events();
        engine.take_requests();

        let connack = ConnAckPacket {
            reason_code: 0x87,
            ..Default::default()
        };
        engine.handle_transport_event(succeeded(&engine, connack), now);

        assert_eq!(engine.state(), ClientState::PendingReconnect);
        match &engine.take_events()[..] {
            [ClientEvent::ConnectionFailure(event)] => {
                assert!(event.error.is_auth_error());
                assert_eq!(event.connack.as_ref().map(|c| c.reason_code), Some(0x87));
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert_eq!(
            engine.take_requests(),
            vec![TransportRequest::Disconnect(None)]
        );
        assert_eq!(engine.next_tick_at(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_backoff_sequence_on_repeated_failures() {
        let opts = MqttClientOptions {
            min_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            ..options()
        };
        let mut engine = MqttEngine::new(opts).unwrap();
        let mut now = Instant::now();
        engine.start(now);

        let mut delays = Vec::new();
        for _ in 0..4 {
            engine.handle_transport_event(
                TransportEvent::ConnectionFailed {
                    connection_id: engine.connection_id(),
                    error: MqttClientError::ConnectionLost {
                        reason: "refused".to_string(),
                    },
                    connack: None,
                },
                now,
            );
            let next = engine.next_tick_at().unwrap();
            delays.push(next - now);
            now = next;
            engine.handle_tick(now);
            assert_eq!(engine.state(), ClientState::Connecting);
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[test]
    fn test_qos0_rejected_offline_qos1_queued() {
        let now = Instant::now();
        let mut engine = MqttEngine::new(options()).unwrap();

        let mut qos0 = engine.publish(
            PublishCommand::simple("a", &b"0"[..], QoS::AtMostOnce, false),
            now,
        );
        let mut qos1 = engine.publish(
            PublishCommand::simple("a", &b"1"[..], QoS::AtLeastOnce, false),
            now,
        );

        assert!(matches!(
            qos0.try_result(),
            Some(Err(MqttClientError::OfflineQueuePolicyFailed { .. }))
        ));
        assert!(qos1.try_result().is_none());
        assert_eq!(engine.operation_statistics().incomplete_operation_count, 1);
        assert_eq!(engine.operation_statistics().unacked_operation_count, 0);

        engine.start(now);
        engine.handle_transport_event(
            succeeded(&engine, ConnAckPacket::default()),
            now,
        );
        let requests = engine.take_requests();
        assert_eq!(publish_ids(&requests), vec![2]);
        assert_eq!(engine.operation_statistics().unacked_operation_count, 1);

        engine.handle_transport_event(
            TransportEvent::OperationAcked {
                id: 2,
                ack: OperationAck::PubAck(PublishAckPacket::default()),
            },
            now,
        );
        assert!(matches!(
            qos1.try_result(),
            Some(Ok(PublishResult::Qos1(_)))
        ));
        assert_eq!(engine.operation_statistics(), OperationStatistics::default());
    }

    #[test]
    fn test_validation_failure_resolves_immediately() {
        let now = Instant::now();
        let mut engine = MqttEngine::new(options()).unwrap();
        let mut handle = engine.publish(
            PublishCommand::simple("bad/#", &b""[..], QoS::AtLeastOnce, false),
            now,
        );
        assert!(matches!(
            handle.try_result(),
            Some(Err(MqttClientError::ValidationFailed { .. }))
        ));
        assert_eq!(engine.operation_statistics().incomplete_operation_count, 0);
    }

    #[test]
    fn test_disconnect_requeues_unacked_first() {
        let now = Instant::now();
        let mut engine = connected_engine(options(), now);

        let _p1 = engine.publish(
            PublishCommand::simple("a", &b"1"[..], QoS::AtLeastOnce, false),
            now,
        );
        let _s2 = engine.subscribe(SubscribeCommand::single("b", QoS::AtLeastOnce), now);
        engine.take_requests();

        engine.handle_transport_event(
            TransportEvent::Disconnected {
                connection_id: engine.connection_id(),
                error: MqttClientError::ConnectionLost {
                    reason: "reset".to_string(),
                },
                disconnect: None,
            },
            now,
        );
        assert_eq!(engine.state(), ClientState::PendingReconnect);
        assert!(engine.negotiated_settings().is_none());

        // submitted while offline
        let _p3 = engine.publish(
            PublishCommand::simple("c", &b"3"[..], QoS::AtLeastOnce, false),
            now,
        );

        let retry_at = engine.next_tick_at().unwrap();
        engine.handle_tick(retry_at);
        engine.handle_transport_event(
            succeeded(&engine, ConnAckPacket {
                session_present: true,
                ..Default::default()
            }),
            retry_at,
        );

        let requests = engine.take_requests();
        let order: Vec<OperationId> = requests
            .iter()
            .filter_map(|r| match r {
                TransportRequest::Publish { id, .. } => Some(*id),
                TransportRequest::Subscribe { id, .. } => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![1, 2, 3]);

        // resent publish on the resumed session carries DUP, the new one does not
        let dups: Vec<bool> = requests
            .iter()
            .filter_map(|r| match r {
                TransportRequest::Publish { packet, .. } => Some(packet.dup),
                _ => None,
            })
            .collect();
        assert_eq!(dups, vec![true, false]);
    }

    #[test]
    fn test_rejoin_post_success_clean_start() {
        let now = Instant::now();
        let opts = MqttClientOptions {
            session_behavior: ClientSessionBehavior::RejoinPostSuccess,
            ..options()
        };
        let mut engine = MqttEngine::new(opts).unwrap();
        engine.start(now);
        let first = engine.take_requests();
        assert!(matches!(
            &first[..],
            [TransportRequest::Connect(ConnectRequest { clean_start: true, .. })]
        ));

        engine.handle_transport_event(
            succeeded(&engine, ConnAckPacket {
                assigned_client_identifier: Some("given".to_string()),
                ..Default::default()
            }),
            now,
        );
        engine.handle_transport_event(
            TransportEvent::Disconnected {
                connection_id: engine.connection_id(),
                error: MqttClientError::ConnectionLost {
                    reason: "x".to_string(),
                },
                disconnect: None,
            },
            now,
        );
        let retry_at = engine.next_tick_at().unwrap();
        engine.handle_tick(retry_at);

        let second = engine.take_requests();
        match &second[..] {
            [TransportRequest::Connect(request)] => {
                assert!(!request.clean_start);
                assert_eq!(request.connect.client_id.as_deref(), Some("given"));
            }
            other => panic!("unexpected requests {:?}", other),
        }
    }

    #[test]
    fn test_stop_from_connected() {
        let now = Instant::now();
        let mut engine = connected_engine(options(), now);
        let mut qos0 = engine.publish(
            PublishCommand::simple("a", &b"0"[..], QoS::AtMostOnce, false),
            now,
        );
        let mut qos1 = engine.publish(
            PublishCommand::simple("a", &b"1"[..], QoS::AtLeastOnce, false),
            now,
        );
        engine.take_requests();

        let packet = DisconnectPacket::with_reason(0x04);
        engine.stop(Some(packet.clone()), now);

        assert_eq!(engine.state(), ClientState::Stopped);
        assert_eq!(
            engine.take_requests(),
            vec![TransportRequest::Disconnect(Some(packet.clone()))]
        );
        assert_eq!(
            engine.take_events(),
            vec![
                ClientEvent::Disconnection(DisconnectionEvent {
                    error: MqttClientError::UserInitiatedDisconnect,
                    disconnect: Some(packet),
                }),
                ClientEvent::Stopped
            ]
        );
        assert!(matches!(qos0.try_result(), Some(Err(_))));
        assert!(qos1.try_result().is_none());
        assert_eq!(engine.next_tick_at(), None);

        // the transport reporting that close produces no further events
        engine.handle_transport_event(
            TransportEvent::Disconnected {
                connection_id: engine.connection_id(),
                error: MqttClientError::UserInitiatedDisconnect,
                disconnect: None,
            },
            now,
        );
        assert!(engine.take_events().is_empty());
    }

    #[test]
    fn test_stop_then_start_keeps_failure_count() {
        let now = Instant::now();
        let mut engine = MqttEngine::new(options()).unwrap();
        engine.start(now);
        engine.handle_transport_event(
            TransportEvent::ConnectionFailed {
                connection_id: engine.connection_id(),
                error: MqttClientError::ConnectionLost {
                    reason: "x".to_string(),
                },
                connack: None,
            },
            now,
        );
        assert_eq!(engine.consecutive_failures(), 1);

        engine.stop(None, now);
        assert_eq!(engine.take_events().last(), Some(&ClientEvent::Stopped));
        assert_eq!(engine.consecutive_failures(), 1);

        engine.start(now);
        assert_eq!(engine.state(), ClientState::Connecting);
        assert_eq!(engine.consecutive_failures(), 1);
        assert_eq!(engine.take_events(), vec![ClientEvent::AttemptingConnect]);
    }

    #[test]
    fn test_fail_all_policy_rejects_offline_subscribe() {
        let now = Instant::now();
        let opts = MqttClientOptions {
            offline_queue_behavior: OfflineQueuePolicy::FailAllOnDisconnect,
            ..options()
        };
        let mut engine = MqttEngine::new(opts).unwrap();
        let mut handle = engine.subscribe(SubscribeCommand::single("a", QoS::AtMostOnce), now);
        assert!(matches!(
            handle.try_result(),
            Some(Err(MqttClientError::OfflineQueuePolicyFailed { .. }))
        ));
    }

    #[test]
    fn test_lru_aliasing_applied_on_submit() {
        let now = Instant::now();
        let mut opts = options();
        opts.topic_aliasing.outbound_behavior = OutboundTopicAliasBehavior::Lru;
        let mut engine = MqttEngine::new(opts).unwrap();
        engine.start(now);
        engine.handle_transport_event(
            succeeded(&engine, ConnAckPacket {
                topic_alias_maximum: Some(10),
                ..Default::default()
            }),
            now,
        );
        engine.take_requests();

        for _ in 0..2 {
            let _ = engine.publish(
                PublishCommand::simple("metrics/cpu", &b"1"[..], QoS::AtMostOnce, false),
                now,
            );
        }
        let aliases: Vec<OutboundAlias> = engine
            .take_requests()
            .into_iter()
            .filter_map(|r| match r {
                TransportRequest::Publish { alias, .. } => Some(alias),
                _ => None,
            })
            .collect();
        assert_eq!(aliases, vec![OutboundAlias::Bind(1), OutboundAlias::Reuse(1)]);
    }
}
