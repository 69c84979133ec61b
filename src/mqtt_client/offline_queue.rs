// SPDX-License-Identifier: MPL-2.0

//! Queue of operations waiting to be submitted, and the disposition policy applied to
//! incomplete operations when the connection goes away.

use std::collections::VecDeque;

use tracing::debug;

use super::error::MqttClientError;
use super::operation::{ClientOperation, OperationPacket, OperationState};
use super::opts::OfflineQueuePolicy;

/// Whether `policy` keeps an operation carrying `packet` across a disconnect.
///
/// The same predicate decides admission of new operations while the client is offline.
pub fn is_retained(policy: OfflineQueuePolicy, packet: &OperationPacket) -> bool {
    match policy {
        OfflineQueuePolicy::FailAllOnDisconnect => false,
        OfflineQueuePolicy::FailQos0PublishOnDisconnect => match packet {
            OperationPacket::Publish(_) => packet.is_qos1_plus_publish(),
            OperationPacket::Subscribe(_) | OperationPacket::Unsubscribe(_) => true,
        },
        OfflineQueuePolicy::FailNonQos1PublishOnDisconnect => packet.is_qos1_plus_publish(),
    }
}

pub(crate) fn offline_failure(operation: &ClientOperation) -> MqttClientError {
    MqttClientError::OfflineQueuePolicyFailed {
        operation: operation.kind().to_string(),
    }
}

/// FIFO of operations not yet submitted to the transport.
///
/// Holds operations submitted while offline, operations retained across a disconnect, and,
/// while connected, operations waiting for flow control.
#[derive(Debug, Default)]
pub struct OperationQueue {
    operations: VecDeque<ClientOperation>,
    size: usize,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, mut operation: ClientOperation) {
        operation.state = OperationState::Queued;
        self.size += operation.size;
        self.operations.push_back(operation);
    }

    pub fn pop_front(&mut self) -> Option<ClientOperation> {
        let operation = self.operations.pop_front()?;
        self.size -= operation.size;
        Some(operation)
    }

    pub fn front(&self) -> Option<&ClientOperation> {
        self.operations.front()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Total encoded size estimate of the queued operations.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientOperation> {
        self.operations.iter()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = ClientOperation> + '_ {
        self.size = 0;
        self.operations.drain(..)
    }

    /// Apply `policy` to everything that did not complete on the connection that just ended.
    ///
    /// `in_flight` are operations that were submitted and not acknowledged. Failed operations
    /// are resolved with `OfflineQueuePolicyFailed`. Retained operations are re-queued with
    /// unacknowledged QoS 1+ publishes first, then everything else, each group in submission
    /// order.
    pub fn apply_disposition(
        &mut self,
        policy: OfflineQueuePolicy,
        in_flight: Vec<ClientOperation>,
    ) {
        let mut unacked_publishes = Vec::new();
        let mut rest = Vec::new();
        let mut failed = 0usize;

        let queued: Vec<ClientOperation> = self.drain().collect();
        for operation in in_flight.into_iter().chain(queued) {
            if !is_retained(policy, &operation.packet) {
                let error = offline_failure(&operation);
                operation.fail(error);
                failed += 1;
            } else if operation.state == OperationState::InFlight
                && operation.packet.is_qos1_plus_publish()
            {
                unacked_publishes.push(operation);
            } else {
                rest.push(operation);
            }
        }

        unacked_publishes.sort_by_key(|op| op.id);
        rest.sort_by_key(|op| op.id);

        debug!(
            ?policy,
            failed,
            retained = unacked_publishes.len() + rest.len(),
            "offline queue policy applied"
        );

        for mut operation in unacked_publishes.into_iter().chain(rest) {
            if operation.state == OperationState::InFlight {
                operation.sent_before = true;
            }
            self.push_back(operation);
        }
    }
}
