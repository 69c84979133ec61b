// SPDX-License-Identifier: MPL-2.0

//! Submitted operations and the handles callers await their results on.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::commands::{OperationKind, PublishCommand, QoS, SubscribeCommand, UnsubscribeCommand};
use super::error::{MqttClientError, MqttClientResult};
use super::results::{OperationAck, PublishResult, SubAckPacket, UnsubAckPacket};

/// Identifier the client assigns to every submitted operation. Increases monotonically, so
/// ordering by id is submission order.
pub type OperationId = u64;

/// Resolves an `OperationHandle` exactly once.
pub type CompletionSender<T> = oneshot::Sender<MqttClientResult<T>>;

/// Completion handle returned for every publish, subscribe and unsubscribe.
///
/// Await it to get the operation's result. Dropping it does not cancel the operation.
#[derive(Debug)]
pub struct OperationHandle<T> {
    rx: oneshot::Receiver<MqttClientResult<T>>,
}

impl<T> OperationHandle<T> {
    /// Create a connected sender/handle pair.
    pub fn channel() -> (CompletionSender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Take the result if the operation has already completed.
    pub fn try_result(&mut self) -> Option<MqttClientResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(completion_dropped())),
        }
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = MqttClientResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(completion_dropped())))
    }
}

fn completion_dropped() -> MqttClientError {
    MqttClientError::ChannelClosed {
        channel: "operation completion".to_string(),
    }
}

/// The packet an operation carries to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationPacket {
    Publish(PublishCommand),
    Subscribe(SubscribeCommand),
    Unsubscribe(UnsubscribeCommand),
}

impl OperationPacket {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Publish(_) => OperationKind::Publish,
            Self::Subscribe(_) => OperationKind::Subscribe,
            Self::Unsubscribe(_) => OperationKind::Unsubscribe,
        }
    }

    /// QoS 1 and QoS 2 publishes.
    pub fn is_qos1_plus_publish(&self) -> bool {
        matches!(self, Self::Publish(p) if p.qos != QoS::AtMostOnce)
    }

    /// Whether the broker acknowledges this operation (QoS 0 publishes are complete once
    /// written).
    pub fn expects_ack(&self) -> bool {
        !matches!(self, Self::Publish(p) if p.qos == QoS::AtMostOnce)
    }

    pub(crate) fn encoded_len(&self) -> usize {
        match self {
            Self::Publish(p) => p.encoded_len(),
            Self::Subscribe(s) => s.encoded_len(),
            Self::Unsubscribe(u) => u.encoded_len(),
        }
    }
}

/// Where the result of an operation goes.
#[derive(Debug)]
pub enum Completion {
    Publish(CompletionSender<PublishResult>),
    Subscribe(CompletionSender<SubAckPacket>),
    Unsubscribe(CompletionSender<UnsubAckPacket>),
}

impl Completion {
    /// Resolve with the transport's acknowledgment. An acknowledgment of the wrong shape for
    /// the operation fails it.
    pub fn complete(self, ack: OperationAck) {
        let mismatch = |ack: &OperationAck| MqttClientError::protocol(format!(
            "acknowledgment {:?} does not match the operation",
            ack
        ));
        // a dropped handle means nobody is waiting, which is fine
        match (self, ack) {
            (Self::Publish(tx), OperationAck::Qos0Written) => {
                let _ = tx.send(Ok(PublishResult::Qos0));
            }
            (Self::Publish(tx), OperationAck::PubAck(puback)) => {
                let _ = tx.send(Ok(PublishResult::Qos1(puback)));
            }
            (Self::Publish(tx), OperationAck::PubComp(pubcomp)) => {
                let _ = tx.send(Ok(PublishResult::Qos2(pubcomp)));
            }
            (Self::Subscribe(tx), OperationAck::SubAck(suback)) => {
                let _ = tx.send(Ok(suback));
            }
            (Self::Unsubscribe(tx), OperationAck::UnsubAck(unsuback)) => {
                let _ = tx.send(Ok(unsuback));
            }
            (other, ack) => other.fail(mismatch(&ack)),
        }
    }

    pub fn fail(self, error: MqttClientError) {
        match self {
            Self::Publish(tx) => {
                let _ = tx.send(Err(error));
            }
            Self::Subscribe(tx) => {
                let _ = tx.send(Err(error));
            }
            Self::Unsubscribe(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }
}

/// Which container currently holds an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Waiting in the offline queue to be submitted.
    Queued,
    /// Submitted to the transport and awaiting its acknowledgment.
    InFlight,
}

/// One submitted publish, subscribe or unsubscribe.
#[derive(Debug)]
pub struct ClientOperation {
    pub id: OperationId,
    pub packet: OperationPacket,
    pub completion: Completion,
    pub state: OperationState,
    /// Encoded size estimate, used for statistics.
    pub size: usize,
    /// Submitted on an earlier connection.
    pub sent_before: bool,
}

impl ClientOperation {
    pub fn new(id: OperationId, packet: OperationPacket, completion: Completion) -> Self {
        let size = packet.encoded_len();
        Self {
            id,
            packet,
            completion,
            state: OperationState::Queued,
            size,
            sent_before: false,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.packet.kind()
    }

    pub fn fail(self, error: MqttClientError) {
        self.completion.fail(error);
    }

    pub fn complete(self, ack: OperationAck) {
        self.completion.complete(ack);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn publish_op(
        id: OperationId,
        qos: QoS,
    ) -> (ClientOperation, OperationHandle<PublishResult>) {
        let (tx, handle) = OperationHandle::channel();
        let packet = PublishCommand::simple(format!("topic/{}", id), &b"payload"[..], qos, false);
        (
            ClientOperation::new(id, OperationPacket::Publish(packet), Completion::Publish(tx)),
            handle,
        )
    }

    pub fn subscribe_op(id: OperationId) -> (ClientOperation, OperationHandle<SubAckPacket>) {
        let (tx, handle) = OperationHandle::channel();
        let packet = SubscribeCommand::single("filter/#", QoS::AtLeastOnce);
        (
            ClientOperation::new(id, OperationPacket::Subscribe(packet), Completion::Subscribe(tx)),
            handle,
        )
    }

    pub fn unsubscribe_op(id: OperationId) -> (ClientOperation, OperationHandle<UnsubAckPacket>) {
        let (tx, handle) = OperationHandle::channel();
        let packet = UnsubscribeCommand::from_topics(["filter/#"]);
        (
            ClientOperation::new(
                id,
                OperationPacket::Unsubscribe(packet),
                Completion::Unsubscribe(tx),
            ),
            handle,
        )
    }
}
