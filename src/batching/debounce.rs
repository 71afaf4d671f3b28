//! # Debounce Timer
//!
//! One timer per group key that is currently accumulating requests.
//!
//! ```text
//! ARMED(deadline) --arrival before deadline--> ARMED(now + quiet_period)
//! ARMED(deadline) --deadline elapsed---------> FIRED (terminal)
//! ```
//!
//! The key's pending requests and its [`TimerHandle`] live together in one
//! [`PendingGroup`] inside the pending map, so the fire check and an append for the same
//! key are serialized by the same map guard. Firing detaches the whole pending list in
//! one swap; a request that arrives afterwards finds either no group (and starts a new
//! one) or a handle that can no longer be rearmed (and starts a new generation).

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::metrics::EngineMetrics;
use super::types::{Batch, EngineState, GroupKey};

/// Requests accumulating per group key
pub(crate) type PendingGroups<K, Req> = DashMap<K, PendingGroup<Req>>;

/// Debounce timer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Counting down; may still be rearmed
    Armed,
    /// Pending list detached; dead
    Fired,
}

/// Why a rearm attempt failed. Either way the caller must start a new generation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RearmError {
    #[error("timer generation {generation} already fired")]
    Fired { generation: u64 },

    #[error("timer generation {generation} passed its deadline")]
    Expired { generation: u64 },
}

/// Per-key countdown handle
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    deadline: Instant,
    state: TimerState,
    rearm_count: u32,
}

impl TimerHandle {
    /// Arm a fresh handle that fires one quiet period from now
    pub fn arm(generation: u64, quiet_period: Duration) -> Self {
        Self {
            generation,
            deadline: Instant::now() + quiet_period,
            state: TimerState::Armed,
            rearm_count: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn rearm_count(&self) -> u32 {
        self.rearm_count
    }

    pub fn is_armed(&self) -> bool {
        self.state == TimerState::Armed
    }

    /// Whether the countdown has elapsed and the handle has not fired yet
    pub fn is_due(&self, now: Instant) -> bool {
        self.is_armed() && now >= self.deadline
    }

    /// Push the deadline out to one quiet period from now.
    ///
    /// Fails once the handle fired or its deadline already passed; an arrival at that
    /// point belongs to the next accumulation window.
    pub fn try_rearm(&mut self, quiet_period: Duration) -> Result<Instant, RearmError> {
        let now = Instant::now();
        match self.state {
            TimerState::Fired => Err(RearmError::Fired {
                generation: self.generation,
            }),
            TimerState::Armed if now >= self.deadline => Err(RearmError::Expired {
                generation: self.generation,
            }),
            TimerState::Armed => {
                self.deadline = now + quiet_period;
                self.rearm_count += 1;
                Ok(self.deadline)
            }
        }
    }

    fn mark_fired(&mut self) {
        self.state = TimerState::Fired;
    }
}

/// Pending list plus the timer that covers it
#[derive(Debug)]
pub(crate) struct PendingGroup<Req> {
    requests: Vec<Req>,
    timer: TimerHandle,
}

impl<Req> PendingGroup<Req> {
    pub(crate) fn new(first: Req, timer: TimerHandle) -> Self {
        Self {
            requests: vec![first],
            timer,
        }
    }

    pub(crate) fn push(&mut self, request: Req) {
        self.requests.push(request);
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn timer(&self) -> &TimerHandle {
        &self.timer
    }

    pub(crate) fn timer_mut(&mut self) -> &mut TimerHandle {
        &mut self.timer
    }

    /// Swap out every accumulated request and kill the timer
    pub(crate) fn detach(&mut self) -> (u64, Vec<Req>) {
        self.timer.mark_fired();
        (self.timer.generation, std::mem::take(&mut self.requests))
    }

    /// Start a new accumulation window after a detach
    pub(crate) fn restart(&mut self, first: Req, timer: TimerHandle) {
        debug_assert!(self.requests.is_empty());
        self.requests.push(first);
        self.timer = timer;
    }
}

/// Result of a timer wake-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FireOutcome {
    /// The pending list was detached and enqueued
    Fired { batch_size: usize },
    /// The deadline moved while sleeping; sleep again
    Rescheduled(Instant),
    /// A newer generation owns the key, or the key is gone
    Superseded,
}

/// Enqueue a detached batch for dispatch
pub(crate) fn enqueue_batch<K: GroupKey, Req>(
    engine_name: &str,
    dispatch_tx: &mpsc::UnboundedSender<Batch<K, Req>>,
    metrics: &EngineMetrics,
    batch: Batch<K, Req>,
) {
    let batch_id = batch.batch_id;
    let batch_size = batch.len();
    let generation = batch.generation;
    let group_key = batch.key_label();

    match dispatch_tx.send(batch) {
        Ok(()) => {
            metrics.record_batch_detached();
            info!(
                engine = %engine_name,
                group_key = %group_key,
                batch_id = %batch_id,
                batch_size = batch_size,
                generation = generation,
                "📦 DEBOUNCE: Batch detached and queued for dispatch"
            );
        }
        Err(_) => {
            // Only reachable if the dispatch worker died with the runtime
            error!(
                engine = %engine_name,
                group_key = %group_key,
                batch_id = %batch_id,
                batch_size = batch_size,
                "❌ DEBOUNCE: Dispatch queue closed, batch dropped"
            );
        }
    }
}

/// Background countdown for one generation of one key
pub(crate) struct DebounceTimer<K, Req> {
    engine_name: Arc<str>,
    group_key: K,
    generation: u64,
    deadline: Instant,
    pending: Arc<PendingGroups<K, Req>>,
    dispatch_tx: mpsc::UnboundedSender<Batch<K, Req>>,
    lifecycle: watch::Receiver<EngineState>,
    metrics: Arc<EngineMetrics>,
}

impl<K, Req> DebounceTimer<K, Req>
where
    K: GroupKey,
    Req: Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engine_name: Arc<str>,
        group_key: K,
        handle: &TimerHandle,
        pending: Arc<PendingGroups<K, Req>>,
        dispatch_tx: mpsc::UnboundedSender<Batch<K, Req>>,
        lifecycle: watch::Receiver<EngineState>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            engine_name,
            group_key,
            generation: handle.generation(),
            deadline: handle.deadline(),
            pending,
            dispatch_tx,
            lifecycle,
            metrics,
        }
    }

    /// Spawn the countdown on the current runtime
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    /// Sleep until the deadline, follow rearms, fire once. Stopping the engine fires
    /// immediately so accepted requests are still dispatched.
    pub(crate) async fn run(mut self) {
        let mut engine_alive = true;

        loop {
            let stopping = !engine_alive || !self.lifecycle.borrow_and_update().is_running();

            if !stopping {
                tokio::select! {
                    _ = tokio::time::sleep_until(self.deadline) => {}
                    changed = self.lifecycle.changed() => {
                        if changed.is_err() {
                            engine_alive = false;
                        }
                    }
                }
            }

            let force = !engine_alive || !self.lifecycle.borrow().is_running();
            match self.fire_if_due(force) {
                FireOutcome::Rescheduled(deadline) => {
                    self.deadline = deadline;
                }
                FireOutcome::Fired { .. } => break,
                FireOutcome::Superseded => {
                    debug!(
                        engine = %self.engine_name,
                        group_key = ?self.group_key,
                        generation = self.generation,
                        "⏱️ DEBOUNCE: Timer superseded by newer generation"
                    );
                    break;
                }
            }
        }
    }

    /// Detach and enqueue this generation's pending list if its deadline elapsed (or
    /// `force`). Runs entirely under the key's map guard.
    pub(crate) fn fire_if_due(&self, force: bool) -> FireOutcome {
        let now = Instant::now();
        let generation = self.generation;
        let mut outcome = FireOutcome::Superseded;

        self.pending.remove_if_mut(&self.group_key, |group_key, group| {
            if group.timer().generation() != generation {
                return false;
            }
            if !force && !group.timer().is_due(now) {
                outcome = FireOutcome::Rescheduled(group.timer().deadline());
                return false;
            }

            let (generation, requests) = group.detach();
            outcome = FireOutcome::Fired {
                batch_size: requests.len(),
            };
            enqueue_batch(
                &self.engine_name,
                &self.dispatch_tx,
                &self.metrics,
                Batch::new(group_key.clone(), generation, requests),
            );
            true
        });

        outcome
    }
}
