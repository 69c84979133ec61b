// SPDX-License-Identifier: MPL-2.0

//! Lifecycle and publish-received events, and the handler trait they are delivered through.

use std::panic::{self, AssertUnwindSafe};

use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::commands::DisconnectPacket;
use super::error::MqttClientError;
use super::results::{ConnAckPacket, InboundPublish};
use super::settings::NegotiatedSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSuccessEvent {
    pub connack: ConnAckPacket,
    pub settings: NegotiatedSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFailureEvent {
    pub error: MqttClientError,
    pub connack: Option<ConnAckPacket>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectionEvent {
    pub error: MqttClientError,
    pub disconnect: Option<DisconnectPacket>,
}

/// Everything the client reports to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A connection attempt started.
    AttemptingConnect,
    ConnectionSuccess(ConnectionSuccessEvent),
    ConnectionFailure(ConnectionFailureEvent),
    /// An established connection ended, unexpectedly or because of `stop()`.
    Disconnection(DisconnectionEvent),
    /// The client stopped after an explicit `stop()`.
    Stopped,
    PublishReceived(InboundPublish),
}

/// Callbacks for client events.
///
/// Callbacks run on the client's processing context. They must not block: while one runs, no
/// other protocol processing happens for the client. A panic inside a callback is caught and
/// logged.
pub trait MqttEventHandler: Send {
    fn on_attempting_connect(&mut self) {}

    fn on_connection_success(&mut self, event: &ConnectionSuccessEvent) {
        let _ = event;
    }

    fn on_connection_failure(&mut self, event: &ConnectionFailureEvent) {
        let _ = event;
    }

    fn on_disconnection(&mut self, event: &DisconnectionEvent) {
        let _ = event;
    }

    fn on_stopped(&mut self) {}

    fn on_publish_received(&mut self, publish: &InboundPublish) {
        let _ = publish;
    }
}

/// Handler that ignores every event.
#[derive(Debug, Default)]
pub struct NoopEventHandler;

impl MqttEventHandler for NoopEventHandler {}

/// Handler that forwards a copy of every event into a channel.
#[derive(Debug)]
pub struct ChannelEventHandler {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelEventHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: ClientEvent) {
        // receiver gone: nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl MqttEventHandler for ChannelEventHandler {
    fn on_attempting_connect(&mut self) {
        self.forward(ClientEvent::AttemptingConnect);
    }

    fn on_connection_success(&mut self, event: &ConnectionSuccessEvent) {
        self.forward(ClientEvent::ConnectionSuccess(event.clone()));
    }

    fn on_connection_failure(&mut self, event: &ConnectionFailureEvent) {
        self.forward(ClientEvent::ConnectionFailure(event.clone()));
    }

    fn on_disconnection(&mut self, event: &DisconnectionEvent) {
        self.forward(ClientEvent::Disconnection(event.clone()));
    }

    fn on_stopped(&mut self) {
        self.forward(ClientEvent::Stopped);
    }

    fn on_publish_received(&mut self, publish: &InboundPublish) {
        self.forward(ClientEvent::PublishReceived(publish.clone()));
    }
}

/// Invoke the matching callback, containing any panic it raises.
pub fn dispatch_event(handler: &mut dyn MqttEventHandler, event: &ClientEvent) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| match event {
        ClientEvent::AttemptingConnect => handler.on_attempting_connect(),
        ClientEvent::ConnectionSuccess(e) => handler.on_connection_success(e),
        ClientEvent::ConnectionFailure(e) => handler.on_connection_failure(e),
        ClientEvent::Disconnection(e) => handler.on_disconnection(e),
        ClientEvent::Stopped => handler.on_stopped(),
        ClientEvent::PublishReceived(p) => handler.on_publish_received(p),
    }));
    if result.is_err() {
        warn!(?event, "event handler panicked; event dropped");
    }
}

/// Identifies a listener attached to a running client.
pub type ListenerId = u64;

/// Observer attached to a running client alongside its event handler.
///
/// Listeners see every lifecycle event. Inbound publishes are offered to the listeners in the
/// order they were attached; the first one returning `true` consumes the publish, and neither
/// later listeners nor the client's handler see it. The same rules as for
/// [`MqttEventHandler`] apply: callbacks run on the processing context and must not block.
pub trait MqttEventListener: Send {
    /// Any event other than `PublishReceived`.
    fn on_lifecycle_event(&mut self, event: &ClientEvent) {
        let _ = event;
    }

    /// Returns true to consume the publish.
    fn on_publish_received(&mut self, publish: &InboundPublish) -> bool {
        let _ = publish;
        false
    }
}

/// Delivers each event to the attached listeners, then to the client's handler.
pub struct EventDispatcher {
    handler: Box<dyn MqttEventHandler>,
    listeners: Vec<(ListenerId, Box<dyn MqttEventListener>)>,
}

impl EventDispatcher {
    pub fn new(handler: Box<dyn MqttEventHandler>) -> Self {
        Self {
            handler,
            listeners: Vec::new(),
        }
    }

    /// Attach a listener after the existing ones.
    pub fn add_listener(&mut self, id: ListenerId, listener: Box<dyn MqttEventListener>) {
        self.listeners.push((id, listener));
    }

    /// Returns false if no listener has this id.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn dispatch(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::PublishReceived(publish) => {
                for (id, listener) in &mut self.listeners {
                    let consumed = panic::catch_unwind(AssertUnwindSafe(|| {
                        listener.on_publish_received(publish)
                    }));
                    match consumed {
                        Ok(true) => {
                            trace!(
                                listener = *id,
                                topic = %publish.topic_name,
                                "publish consumed by listener"
                            );
                            return;
                        }
                        Ok(false) => {}
                        Err(_) => warn!(listener = *id, "listener panicked; publish passed on"),
                    }
                }
            }
            _ => {
                for (id, listener) in &mut self.listeners {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        listener.on_lifecycle_event(event)
                    }));
                    if result.is_err() {
                        warn!(listener = *id, ?event, "listener panicked; event dropped");
                    }
                }
            }
        }
        dispatch_event(self.handler.as_mut(), event);
    }
}
