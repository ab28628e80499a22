//! Per-block execution metrics.

use monad_state::AccessStats;
use parking_lot::Mutex;
use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

/// Counters for one block execution.
#[derive(Debug, Default)]
pub struct BlockMetrics {
    retries: AtomicU32,
    tx_exec_time: Mutex<Duration>,
    access_stats: Mutex<AccessStats>,
}

impl BlockMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one merge-conflict retry.
    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Total retries this block.
    pub fn num_retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Records the wall-clock spent executing transactions.
    pub fn set_tx_exec_time(&self, exec_time: Duration) {
        *self.tx_exec_time.lock() = exec_time;
    }

    /// The recorded transaction execution time.
    pub fn tx_exec_time(&self) -> Duration {
        *self.tx_exec_time.lock()
    }

    /// Folds one transaction's access counters into the block totals.
    pub fn record_accesses(&self, stats: &AccessStats) {
        let mut total = self.access_stats.lock();
        total.warm_account += stats.warm_account;
        total.warm_storage += stats.warm_storage;
        total.cold_account += stats.cold_account;
        total.cold_storage += stats.cold_storage;
    }

    /// The aggregated access counters.
    pub fn access_stats(&self) -> AccessStats {
        *self.access_stats.lock()
    }

    /// One-line summary for the block log.
    pub fn print_access_stats(&self) -> String {
        let stats = self.access_stats();
        format!(
            ",waa={:5},wsa={:5},caa={:5},csa={:5}",
            stats.warm_account, stats.warm_storage, stats.cold_account, stats.cold_storage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_counter() {
        let metrics = BlockMetrics::new();
        metrics.inc_retries();
        metrics.inc_retries();
        assert_eq!(metrics.num_retries(), 2);
    }

    #[test]
    fn test_access_aggregation() {
        let metrics = BlockMetrics::new();
        metrics.record_accesses(&AccessStats {
            warm_account: 1,
            cold_account: 2,
            warm_storage: 3,
            cold_storage: 4,
        });
        metrics.record_accesses(&AccessStats {
            warm_account: 1,
            ..Default::default()
        });
        let total = metrics.access_stats();
        assert_eq!(total.warm_account, 2);
        assert_eq!(total.cold_storage, 4);
    }
}
