// SPDX-License-Identifier: MPL-2.0

//! Boundary between the lifecycle engine and the transport engine.
//!
//! The transport engine owns sockets, TLS, websockets and the MQTT wire codec. The lifecycle
//! engine drives it through [`TransportEngine`] and learns what happened through
//! [`TransportEvent`]s, which the transport sends back with a [`TransportEventSender`].
//! Any implementation (native library, FFI, in-process state machine) satisfies the same
//! contract.
//!
//! Every connect request carries a fresh [`ConnectionId`]. The transport echoes it on the
//! connection outcome and on the end of that connection, so reports about an attempt the
//! client has already abandoned are recognized and dropped.

use tokio::sync::mpsc;

use super::commands::{DisconnectPacket, PublishCommand, SubscribeCommand, UnsubscribeCommand};
use super::error::{MqttClientError, MqttClientResult};
use super::operation::OperationId;
use super::opts::{ConnectOptions, TransportOptions};
use super::results::{ConnAckPacket, InboundPublish, OperationAck};
use super::topic_alias::OutboundAlias;

pub mod channel;

pub use channel::ChannelTransport;

/// Identifies one connection attempt and, if it succeeds, the connection it opens.
pub type ConnectionId = u64;

/// Everything the transport needs to open a connection and send CONNECT.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    /// Echoed on every lifecycle event about this attempt.
    pub connection_id: ConnectionId,
    pub host: String,
    pub port: u16,
    pub transport: TransportOptions,
    /// Connect parameters; the client id is the configured one or, failing that, the one the
    /// broker assigned on an earlier connection.
    pub connect: ConnectOptions,
    pub clean_start: bool,
    /// Topic alias maximum to advertise, when inbound aliasing is enabled.
    pub topic_alias_maximum: Option<u16>,
}

/// Outbound interface the engine drives.
///
/// Calls never block. Outcomes are reported asynchronously as `TransportEvent`s keyed by the
/// operation id passed in.
pub trait TransportEngine: Send {
    /// Open a connection and send CONNECT.
    fn submit_connect(&mut self, request: ConnectRequest);

    /// Close the connection, sending DISCONNECT first when a packet is given.
    fn submit_disconnect(&mut self, packet: Option<DisconnectPacket>);

    fn submit_publish(&mut self, id: OperationId, packet: PublishCommand, alias: OutboundAlias);

    fn submit_subscribe(&mut self, id: OperationId, packet: SubscribeCommand);

    fn submit_unsubscribe(&mut self, id: OperationId, packet: UnsubscribeCommand);

    /// Send PINGREQ.
    fn submit_ping(&mut self);
}

/// A call on `TransportEngine`, as a value.
///
/// The sans-I/O engine queues these; the processing context drains and dispatches them.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportRequest {
    Connect(ConnectRequest),
    Disconnect(Option<DisconnectPacket>),
    Publish {
        id: OperationId,
        packet: PublishCommand,
        alias: OutboundAlias,
    },
    Subscribe {
        id: OperationId,
        packet: SubscribeCommand,
    },
    Unsubscribe {
        id: OperationId,
        packet: UnsubscribeCommand,
    },
    Ping,
}

impl TransportRequest {
    pub fn dispatch<T: TransportEngine + ?Sized>(self, transport: &mut T) {
        match self {
            Self::Connect(request) => transport.submit_connect(request),
            Self::Disconnect(packet) => transport.submit_disconnect(packet),
            Self::Publish { id, packet, alias } => transport.submit_publish(id, packet, alias),
            Self::Subscribe { id, packet } => transport.submit_subscribe(id, packet),
            Self::Unsubscribe { id, packet } => transport.submit_unsubscribe(id, packet),
            Self::Ping => transport.submit_ping(),
        }
    }
}

/// Inbound notifications from the transport engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport started opening a connection.
    Connecting,
    /// CONNACK received. A failing reason code is treated as a connection failure.
    ConnectionSucceeded {
        connection_id: ConnectionId,
        connack: ConnAckPacket,
    },
    /// The connection attempt failed before a session existed.
    ConnectionFailed {
        connection_id: ConnectionId,
        error: MqttClientError,
        connack: Option<ConnAckPacket>,
    },
    /// An established connection closed.
    Disconnected {
        connection_id: ConnectionId,
        error: MqttClientError,
        disconnect: Option<DisconnectPacket>,
    },
    PublishReceived(InboundPublish),
    OperationAcked {
        id: OperationId,
        ack: OperationAck,
    },
    OperationFailed {
        id: OperationId,
        error: MqttClientError,
    },
    PingResponse,
}

/// Handle the transport engine uses to report events to the client's processing context.
#[derive(Debug, Clone)]
pub struct TransportEventSender {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventSender {
    pub fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: TransportEvent) -> MqttClientResult<()> {
        self.tx.send(event).map_err(|_| MqttClientError::ChannelClosed {
            channel: "transport events".to_string(),
        })
    }

    pub fn on_connecting(&self) -> MqttClientResult<()> {
        self.send(TransportEvent::Connecting)
    }

    pub fn on_connection_success(
        &self,
        connection_id: ConnectionId,
        connack: ConnAckPacket,
    ) -> MqttClientResult<()> {
        self.send(TransportEvent::ConnectionSucceeded {
            connection_id,
            connack,
        })
    }

    pub fn on_connection_failure(
        &self,
        connection_id: ConnectionId,
        error: MqttClientError,
        connack: Option<ConnAckPacket>,
    ) -> MqttClientResult<()> {
        self.send(TransportEvent::ConnectionFailed {
            connection_id,
            error,
            connack,
        })
    }

    pub fn on_disconnected(
        &self,
        connection_id: ConnectionId,
        error: MqttClientError,
        disconnect: Option<DisconnectPacket>,
    ) -> MqttClientResult<()> {
        self.send(TransportEvent::Disconnected {
            connection_id,
            error,
            disconnect,
        })
    }

    pub fn on_publish_received(&self, publish: InboundPublish) -> MqttClientResult<()> {
        self.send(TransportEvent::PublishReceived(publish))
    }

    pub fn on_operation_ack(&self, id: OperationId, ack: OperationAck) -> MqttClientResult<()> {
        self.send(TransportEvent::OperationAcked { id, ack })
    }

    pub fn on_operation_failed(
        &self,
        id: OperationId,
        error: MqttClientError,
    ) -> MqttClientResult<()> {
        self.send(TransportEvent::OperationFailed { id, error })
    }

    pub fn on_ping_response(&self) -> MqttClientResult<()> {
        self.send(TransportEvent::PingResponse)
    }
}
