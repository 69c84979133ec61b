// SPDX-License-Identifier: MPL-2.0

use std::sync::Mutex;

/// Snapshot of the client's incomplete operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationStatistics {
    /// Operations submitted but not yet completed, queued or in flight.
    pub incomplete_operation_count: u64,
    /// Encoded size estimate of the incomplete operations, in bytes.
    pub incomplete_operation_size: u64,
    /// In-flight operations awaiting a broker acknowledgment.
    pub unacked_operation_count: u64,
    pub unacked_operation_size: u64,
}

/// Latest statistics snapshot, written by the processing context and read from any thread.
///
/// The snapshot is replaced as a whole, so readers never see counters from two different
/// states.
#[derive(Debug, Default)]
pub struct SharedOperationStatistics {
    snapshot: Mutex<OperationStatistics>,
}

impl SharedOperationStatistics {
    pub fn store(&self, stats: &OperationStatistics) {
        match self.snapshot.lock() {
            Ok(mut snapshot) => *snapshot = *stats,
            Err(poisoned) => *poisoned.into_inner() = *stats,
        }
    }

    pub fn load(&self) -> OperationStatistics {
        match self.snapshot.lock() {
            Ok(snapshot) => *snapshot,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
