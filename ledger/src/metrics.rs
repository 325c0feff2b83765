//! Metrics collection for transfer engine monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Transfer engine metrics.
pub struct EngineMetrics {
    /// Total transfers attempted.
    pub transfers_total: AtomicU64,
    /// Committed transfers.
    pub transfers_succeeded: AtomicU64,
    /// Transfers aborted by the datastore, a deadline or cancellation.
    pub transfers_failed: AtomicU64,
    /// Transfers refused for invalid input, unknown accounts or overdraft.
    pub transfers_rejected: AtomicU64,
    /// Transfers in progress.
    pub transfers_active: AtomicU64,
    /// Rollbacks that failed after a unit of work failed.
    pub rollback_failures: AtomicU64,
    /// Sum of committed transfer amounts, in minor units.
    pub volume_moved: AtomicU64,
}

impl EngineMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            transfers_total: AtomicU64::new(0),
            transfers_succeeded: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            transfers_rejected: AtomicU64::new(0),
            transfers_active: AtomicU64::new(0),
            rollback_failures: AtomicU64::new(0),
            volume_moved: AtomicU64::new(0),
        }
    }

    /// Count a new transfer. It stays active until the returned guard drops,
    /// including when the caller abandons the transfer mid-flight.
    pub fn transfer_started(&self) -> ActiveTransfer<'_> {
        self.transfers_total.fetch_add(1, Ordering::Relaxed);
        self.transfers_active.fetch_add(1, Ordering::Relaxed);
        ActiveTransfer { metrics: self }
    }

    pub fn transfer_succeeded(&self, amount: i64) {
        self.transfers_succeeded.fetch_add(1, Ordering::Relaxed);
        self.volume_moved
            .fetch_add(amount.unsigned_abs(), Ordering::Relaxed);
    }

    pub fn transfer_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_rejected(&self) {
        self.transfers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rollback_failed(&self) {
        self.rollback_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            transfers_succeeded: self.transfers_succeeded.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            transfers_active: self.transfers_active.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            volume_moved: self.volume_moved.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP simplebank_transfers_total Total number of transfers attempted
# TYPE simplebank_transfers_total counter
simplebank_transfers_total {}

# HELP simplebank_transfers_succeeded Total committed transfers
# TYPE simplebank_transfers_succeeded counter
simplebank_transfers_succeeded {}

# HELP simplebank_transfers_failed Total transfers aborted by the datastore or a deadline
# TYPE simplebank_transfers_failed counter
simplebank_transfers_failed {}

# HELP simplebank_transfers_rejected Total transfers refused
# TYPE simplebank_transfers_rejected counter
simplebank_transfers_rejected {}

# HELP simplebank_transfers_active Current transfers in progress
# TYPE simplebank_transfers_active gauge
simplebank_transfers_active {}

# HELP simplebank_rollback_failures Total failed rollbacks
# TYPE simplebank_rollback_failures counter
simplebank_rollback_failures {}

# HELP simplebank_volume_moved Sum of committed transfer amounts in minor units
# TYPE simplebank_volume_moved counter
simplebank_volume_moved {}
"#,
            snapshot.transfers_total,
            snapshot.transfers_succeeded,
            snapshot.transfers_failed,
            snapshot.transfers_rejected,
            snapshot.transfers_active,
            snapshot.rollback_failures,
            snapshot.volume_moved,
        )
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub transfers_total: u64,
    pub transfers_succeeded: u64,
    pub transfers_failed: u64,
    pub transfers_rejected: u64,
    pub transfers_active: u64,
    pub rollback_failures: u64,
    pub volume_moved: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<EngineMetrics>;

/// Holds one transfer in the active gauge.
#[must_use = "the transfer stops counting as active when this is dropped"]
pub struct ActiveTransfer<'a> {
    metrics: &'a EngineMetrics,
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        self.metrics.transfers_active.fetch_sub(1, Ordering::Relaxed);
    }
}
