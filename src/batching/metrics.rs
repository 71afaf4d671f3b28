//! # Engine Metrics
//!
//! Lock-free counters updated on the hot path and a serializable snapshot for
//! health endpoints and logs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::EngineState;

/// Counters shared by every component of one engine instance
#[derive(Debug, Default)]
pub struct EngineMetrics {
    requests_submitted: AtomicU64,
    requests_rejected: AtomicU64,
    timer_generations: AtomicU64,
    timer_rearms: AtomicU64,
    batches_detached: AtomicU64,
    batches_dispatched: AtomicU64,
    batch_failures: AtomicU64,
    results_published: AtomicU64,
    results_claimed: AtomicU64,
    results_discarded: AtomicU64,
    claim_timeouts: AtomicU64,
    claim_cancellations: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timer_armed(&self) {
        self.timer_generations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timer_rearmed(&self) {
        self.timer_rearms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_detached(&self) {
        self.batches_detached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_dispatched(&self, failed: bool) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.batch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_results_published(&self, count: usize) {
        self.results_published
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_result_claimed(&self) {
        self.results_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_results_discarded(&self, count: usize) {
        self.results_discarded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_claim_timeout(&self) {
        self.claim_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim_cancelled(&self) {
        self.claim_cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot combined with the gauges owned by other components
    pub fn snapshot(
        &self,
        state: EngineState,
        worker_running: bool,
        pending_keys: usize,
        result_keys: usize,
    ) -> EngineStats {
        EngineStats {
            state,
            worker_running,
            pending_keys,
            result_keys,
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            timer_generations: self.timer_generations.load(Ordering::Relaxed),
            timer_rearms: self.timer_rearms.load(Ordering::Relaxed),
            batches_detached: self.batches_detached.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            results_published: self.results_published.load(Ordering::Relaxed),
            results_claimed: self.results_claimed.load(Ordering::Relaxed),
            results_discarded: self.results_discarded.load(Ordering::Relaxed),
            claim_timeouts: self.claim_timeouts.load(Ordering::Relaxed),
            claim_cancellations: self.claim_cancellations.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of an engine's counters and gauges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub state: EngineState,
    pub worker_running: bool,
    /// Keys currently accumulating requests
    pub pending_keys: usize,
    /// Keys with unclaimed results
    pub result_keys: usize,
    pub requests_submitted: u64,
    pub requests_rejected: u64,
    pub timer_generations: u64,
    pub timer_rearms: u64,
    pub batches_detached: u64,
    pub batches_dispatched: u64,
    pub batch_failures: u64,
    pub results_published: u64,
    pub results_claimed: u64,
    pub results_discarded: u64,
    pub claim_timeouts: u64,
    pub claim_cancellations: u64,
}

impl EngineStats {
    /// Average requests per dispatched batch
    pub fn coalescing_ratio(&self) -> f64 {
        if self.batches_dispatched == 0 {
            return 0.0;
        }
        self.results_published as f64 / self.batches_dispatched as f64
    }
}
