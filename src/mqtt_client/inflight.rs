// SPDX-License-Identifier: MPL-2.0

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use super::operation::{ClientOperation, OperationId, OperationState};

/// Entry in the pending operation table
#[derive(Debug)]
struct PendingEntry {
    operation: ClientOperation,
    /// When the ack timeout fires, for operations the broker acknowledges
    deadline: Option<Instant>,
}

/// Operations submitted to the transport that have not completed yet.
///
/// - O(1) lookups by operation id.
/// - O(1) timeout checks using a deadline queue; the ack timeout is the same for every entry,
///   so deadlines are pushed in order and stale ones are skipped lazily.
/// - Enforces the broker's receive maximum on QoS 1+ publishes.
#[derive(Debug)]
pub struct PendingOperationTable {
    entries: HashMap<OperationId, PendingEntry>,
    /// Queue for efficient timeout checking (id, deadline)
    deadline_queue: VecDeque<(OperationId, Instant)>,
    /// `None` disables ack timeouts.
    ack_timeout: Option<Duration>,
    /// Receive maximum negotiated with the broker
    receive_maximum: u16,
    /// QoS 1+ publishes in the table (for flow control)
    publish_count: usize,
    unacked_count: usize,
    unacked_size: usize,
    total_size: usize,
}

impl PendingOperationTable {
    pub fn new(ack_timeout: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            deadline_queue: VecDeque::new(),
            ack_timeout,
            receive_maximum: u16::MAX,
            publish_count: 0,
            unacked_count: 0,
            unacked_size: 0,
            total_size: 0,
        }
    }

    /// Update the receive maximum limit (e.g., from CONNACK)
    pub fn update_receive_maximum(&mut self, receive_maximum: u16) {
        self.receive_maximum = if receive_maximum == 0 {
            u16::MAX
        } else {
            receive_maximum
        };
    }

    /// Check if another QoS 1+ PUBLISH may be sent
    pub fn can_push_publish(&self) -> bool {
        self.publish_count < self.receive_maximum as usize
    }

    /// Record an operation that was just submitted to the transport.
    pub fn push(&mut self, mut operation: ClientOperation, now: Instant) {
        operation.state = OperationState::InFlight;

        let expects_ack = operation.packet.expects_ack();
        let deadline = match self.ack_timeout {
            Some(timeout) if expects_ack => Some(now + timeout),
            _ => None,
        };
        if let Some(deadline) = deadline {
            self.deadline_queue.push_back((operation.id, deadline));
        }
        if operation.packet.is_qos1_plus_publish() {
            self.publish_count += 1;
        }
        if expects_ack {
            self.unacked_count += 1;
            self.unacked_size += operation.size;
        }
        self.total_size += operation.size;

        self.entries
            .insert(operation.id, PendingEntry { operation, deadline });
    }

    /// Remove an operation, typically because it was acknowledged or failed.
    pub fn remove(&mut self, id: OperationId) -> Option<ClientOperation> {
        let entry = self.entries.remove(&id)?;
        let operation = entry.operation;
        if operation.packet.is_qos1_plus_publish() {
            self.publish_count -= 1;
        }
        if operation.packet.expects_ack() {
            self.unacked_count -= 1;
            self.unacked_size -= operation.size;
        }
        self.total_size -= operation.size;
        // Note: deadline_queue cleanup happens lazily in take_expired
        Some(operation)
    }

    /// Remove and return every operation whose ack timeout has passed.
    pub fn take_expired(&mut self, now: Instant) -> Vec<ClientOperation> {
        let mut expired = Vec::new();

        while let Some(&(id, deadline)) = self.deadline_queue.front() {
            if now < deadline {
                break;
            }
            self.deadline_queue.pop_front();

            // If the entry deadline matches, it's truly expired and not yet acknowledged
            let live = self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.deadline == Some(deadline));
            if live {
                if let Some(operation) = self.remove(id) {
                    expired.push(operation);
                }
            }
        }

        expired
    }

    /// Get the earliest ack deadline among pending operations
    pub fn next_expiration(&self) -> Option<Instant> {
        self.deadline_queue
            .iter()
            .find(|(id, deadline)| {
                self.entries
                    .get(id)
                    .is_some_and(|entry| entry.deadline == Some(*deadline))
            })
            .map(|&(_, deadline)| deadline)
    }

    /// Remove everything, in submission order.
    pub fn drain(&mut self) -> Vec<ClientOperation> {
        let mut operations: Vec<ClientOperation> =
            self.entries.drain().map(|(_, entry)| entry.operation).collect();
        operations.sort_by_key(|op| op.id);
        self.deadline_queue.clear();
        self.publish_count = 0;
        self.unacked_count = 0;
        self.unacked_size = 0;
        self.total_size = 0;
        operations
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encoded size estimate of everything in the table.
    pub fn size(&self) -> usize {
        self.total_size
    }

    /// Operations awaiting a broker acknowledgment.
    pub fn unacked_count(&self) -> usize {
        self.unacked_count
    }

    pub fn unacked_size(&self) -> usize {
        self.unacked_size
    }
}
