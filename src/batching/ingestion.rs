//! # Ingestion & Grouping
//!
//! Accepts each request, derives its group key and appends it to that key's pending
//! list, arming a debounce timer for the key or rearming the live one.
//!
//! Mutation of one key's pending list happens under that key's map guard; the guard is
//! held only for the append/rearm, never across an await. Submission never blocks on
//! results.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::debounce::{enqueue_batch, DebounceTimer, PendingGroup, PendingGroups, TimerHandle};
use super::handler::GroupKeyFn;
use super::metrics::EngineMetrics;
use super::types::{Batch, EngineState, GroupKey};
use crate::error::{BatchError, Result};

pub struct Ingestor<K, Req> {
    engine_name: Arc<str>,
    key_fn: Arc<dyn GroupKeyFn<Req, K>>,
    quiet_period: Duration,
    pending: Arc<PendingGroups<K, Req>>,
    /// `None` once the engine is stopped. Submissions hold the read side for their whole
    /// critical section so `close` cannot interleave with an append.
    dispatch_tx: RwLock<Option<mpsc::UnboundedSender<Batch<K, Req>>>>,
    next_generation: AtomicU64,
    lifecycle: watch::Receiver<EngineState>,
    metrics: Arc<EngineMetrics>,
}

impl<K, Req> Ingestor<K, Req>
where
    K: GroupKey,
    Req: Send + Sync + 'static,
{
    pub fn new(
        engine_name: Arc<str>,
        key_fn: Arc<dyn GroupKeyFn<Req, K>>,
        quiet_period: Duration,
        dispatch_tx: mpsc::UnboundedSender<Batch<K, Req>>,
        lifecycle: watch::Receiver<EngineState>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            engine_name,
            key_fn,
            quiet_period,
            pending: Arc::new(DashMap::new()),
            dispatch_tx: RwLock::new(Some(dispatch_tx)),
            next_generation: AtomicU64::new(1),
            lifecycle,
            metrics,
        }
    }

    /// Add `request` to the pending list of its group and make sure a live timer covers it.
    ///
    /// Must be called from within a tokio runtime: arming a timer spawns its countdown.
    pub fn submit(&self, request: Req) -> Result<K> {
        let group_key = self.key_fn.group_key(&request).map_err(|message| {
            self.metrics.record_rejected();
            warn!(
                engine = %self.engine_name,
                error = %message,
                "🚫 INGEST: Group key function rejected request"
            );
            BatchError::group_key(message)
        })?;

        let dispatch_guard = self.dispatch_tx.read();
        let Some(dispatch_tx) = dispatch_guard.as_ref() else {
            self.metrics.record_rejected();
            return Err(BatchError::EngineStopped);
        };

        match self.pending.entry(group_key.clone()) {
            Entry::Occupied(mut entry) => {
                let group = entry.get_mut();
                match group.timer_mut().try_rearm(self.quiet_period) {
                    Ok(_) => {
                        group.push(request);
                        self.metrics.record_timer_rearmed();
                        debug!(
                            engine = %self.engine_name,
                            group_key = ?group_key,
                            generation = group.timer().generation(),
                            pending = group.len(),
                            "⏱️ INGEST: Timer rearmed"
                        );
                    }
                    Err(reason) => {
                        // The window closed under us: flush what it gathered, then open a
                        // new generation for this request.
                        let (generation, requests) = group.detach();
                        if !requests.is_empty() {
                            enqueue_batch(
                                &self.engine_name,
                                dispatch_tx,
                                &self.metrics,
                                Batch::new(group_key.clone(), generation, requests),
                            );
                        }

                        let timer = self.arm_timer();
                        debug!(
                            engine = %self.engine_name,
                            group_key = ?group_key,
                            reason = %reason,
                            generation = timer.generation(),
                            "⏱️ INGEST: Rearm failed, started new timer generation"
                        );
                        self.spawn_timer(&group_key, &timer, dispatch_tx);
                        group.restart(request, timer);
                    }
                }
            }
            Entry::Vacant(entry) => {
                let timer = self.arm_timer();
                debug!(
                    engine = %self.engine_name,
                    group_key = ?group_key,
                    generation = timer.generation(),
                    "⏱️ INGEST: Timer armed for new group"
                );
                self.spawn_timer(&group_key, &timer, dispatch_tx);
                entry.insert(PendingGroup::new(request, timer));
            }
        }

        self.metrics.record_submitted();
        Ok(group_key)
    }

    /// Reject all further submissions. Returns false if already closed.
    pub fn close(&self) -> bool {
        self.dispatch_tx.write().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.dispatch_tx.read().is_none()
    }

    /// Number of keys currently accumulating requests
    pub fn pending_keys(&self) -> usize {
        self.pending.len()
    }

    /// Number of requests accumulating under `group_key`
    pub fn pending_len(&self, group_key: &K) -> usize {
        self.pending.get(group_key).map(|group| group.len()).unwrap_or(0)
    }

    fn arm_timer(&self) -> TimerHandle {
        self.metrics.record_timer_armed();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        TimerHandle::arm(generation, self.quiet_period)
    }

    fn spawn_timer(
        &self,
        group_key: &K,
        timer: &TimerHandle,
        dispatch_tx: &mpsc::UnboundedSender<Batch<K, Req>>,
    ) {
        DebounceTimer::new(
            Arc::clone(&self.engine_name),
            group_key.clone(),
            timer,
            Arc::clone(&self.pending),
            dispatch_tx.clone(),
            self.lifecycle.clone(),
            Arc::clone(&self.metrics),
        )
        .spawn();
    }
}
