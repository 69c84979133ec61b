// SPDX-License-Identifier: MPL-2.0

//! Transport adapter that forwards every request over a channel.
//!
//! Lets a separate task (an I/O driver, a bridge to a native engine, or a test) play the
//! transport engine: it reads `TransportRequest`s from the receiver and reports back through
//! the client's `TransportEventSender`.

use tokio::sync::mpsc;
use tracing::warn;

use super::{ConnectRequest, TransportEngine, TransportRequest};
use crate::mqtt_client::commands::{
    DisconnectPacket, PublishCommand, SubscribeCommand, UnsubscribeCommand,
};
use crate::mqtt_client::operation::OperationId;
use crate::mqtt_client::topic_alias::OutboundAlias;

#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<TransportRequest>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, request: TransportRequest) {
        if self.tx.send(request).is_err() {
            warn!("transport request receiver dropped, request discarded");
        }
    }
}

impl TransportEngine for ChannelTransport {
    fn submit_connect(&mut self, request: ConnectRequest) {
        self.forward(TransportRequest::Connect(request));
    }

    fn submit_disconnect(&mut self, packet: Option<DisconnectPacket>) {
        self.forward(TransportRequest::Disconnect(packet));
    }

    fn submit_publish(&mut self, id: OperationId, packet: PublishCommand, alias: OutboundAlias) {
        self.forward(TransportRequest::Publish { id, packet, alias });
    }

    fn submit_subscribe(&mut self, id: OperationId, packet: SubscribeCommand) {
        self.forward(TransportRequest::Subscribe { id, packet });
    }

    fn submit_unsubscribe(&mut self, id: OperationId, packet: UnsubscribeCommand) {
        self.forward(TransportRequest::Unsubscribe { id, packet });
    }

    fn submit_ping(&mut self) {
        self.forward(TransportRequest::Ping);
    }
}
