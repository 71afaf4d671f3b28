//! # Flush / Dispatch Worker
//!
//! A single background loop that drains detached batches in arrival order, invokes
//! the batch handler once per batch and publishes its ordered results.
//!
//! The worker starts lazily on first use and runs until every sender of the dispatch
//! queue is gone (ingestion closed and all timers fired), then marks the engine
//! [`EngineState::Drained`]. A failing batch (error, panic, wrong result count) turns
//! into one error result per request; it never ends the worker.

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::handler::BatchHandler;
use super::metrics::EngineMetrics;
use super::result_store::ResultStore;
use super::types::{Batch, EngineState, GroupKey};
use crate::error::{BatchError, Result};
use crate::logging::log_batch_operation;

enum WorkerSlot<K, Req> {
    /// Not started; owns the queue receiver until first use
    Idle(mpsc::UnboundedReceiver<Batch<K, Req>>),
    Running(JoinHandle<()>),
    /// Stopped before it ever started
    Abandoned,
}

/// Owns the lazily started dispatch worker
pub struct Dispatcher<K, Req, Res> {
    worker: DispatchWorker<K, Req, Res>,
    started: AtomicBool,
    slot: Mutex<WorkerSlot<K, Req>>,
}

impl<K, Req, Res> Dispatcher<K, Req, Res>
where
    K: GroupKey,
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    pub fn new(
        engine_name: Arc<str>,
        handler: Arc<dyn BatchHandler<K, Req, Res>>,
        results: Arc<ResultStore<K, Res>>,
        metrics: Arc<EngineMetrics>,
        lifecycle: Arc<watch::Sender<EngineState>>,
        dispatch_rx: mpsc::UnboundedReceiver<Batch<K, Req>>,
    ) -> Self {
        Self {
            worker: DispatchWorker {
                engine_name,
                handler,
                results,
                metrics,
                lifecycle,
            },
            started: AtomicBool::new(false),
            slot: Mutex::new(WorkerSlot::Idle(dispatch_rx)),
        }
    }

    /// Spawn the worker on first call; concurrent first callers spawn exactly one.
    pub fn ensure_started(&self) {
        if self.started.load(Ordering::Acquire) {
            return;
        }

        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, WorkerSlot::Abandoned) {
            WorkerSlot::Idle(dispatch_rx) => {
                let worker = self.worker.clone();
                *slot = WorkerSlot::Running(tokio::spawn(worker.run(dispatch_rx)));
                self.started.store(true, Ordering::Release);
            }
            other => *slot = other,
        }
    }

    /// Called on stop: if the worker never started there is nothing to drain, so
    /// release the queue and report the engine drained right away.
    pub fn abandon_if_idle(&self) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, WorkerSlot::Idle(_)) {
            return false;
        }

        *slot = WorkerSlot::Abandoned;
        self.worker.lifecycle.send_replace(EngineState::Drained);
        debug!(
            engine = %self.worker.engine_name,
            "🛑 DISPATCH: Worker never started, engine drained"
        );
        true
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.slot.lock(), WorkerSlot::Running(handle) if !handle.is_finished())
    }
}

/// The worker loop and everything it needs, cloned into the spawned task
pub(crate) struct DispatchWorker<K, Req, Res> {
    engine_name: Arc<str>,
    handler: Arc<dyn BatchHandler<K, Req, Res>>,
    results: Arc<ResultStore<K, Res>>,
    metrics: Arc<EngineMetrics>,
    lifecycle: Arc<watch::Sender<EngineState>>,
}

impl<K, Req, Res> Clone for DispatchWorker<K, Req, Res> {
    fn clone(&self) -> Self {
        Self {
            engine_name: Arc::clone(&self.engine_name),
            handler: Arc::clone(&self.handler),
            results: Arc::clone(&self.results),
            metrics: Arc::clone(&self.metrics),
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<K, Req, Res> DispatchWorker<K, Req, Res>
where
    K: GroupKey,
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn run(self, mut dispatch_rx: mpsc::UnboundedReceiver<Batch<K, Req>>) {
        info!(engine = %self.engine_name, "🚀 DISPATCH: Worker started");

        while let Some(batch) = dispatch_rx.recv().await {
            let group_key = batch.group_key.clone();
            let results = self.dispatch(batch).await;
            self.results.publish(&group_key, results);
        }

        self.lifecycle.send_replace(EngineState::Drained);
        info!(engine = %self.engine_name, "🛑 DISPATCH: Queue closed and drained, worker exiting");
    }

    /// Run the handler for one batch and turn its outcome into exactly one result per
    /// request
    pub(crate) async fn dispatch(&self, batch: Batch<K, Req>) -> Vec<Result<Res>> {
        let key_label = batch.key_label();
        let batch_size = batch.len();
        let Batch {
            batch_id,
            group_key,
            requests,
            ..
        } = batch;

        debug!(
            engine = %self.engine_name,
            group_key = %key_label,
            batch_id = %batch_id,
            batch_size = batch_size,
            "⚙️ DISPATCH: Invoking batch handler"
        );

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.handler.handle(&group_key, requests))
            .catch_unwind()
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let failure = match outcome {
            Ok(Ok(results)) if results.len() == batch_size => {
                self.metrics.record_batch_dispatched(false);
                log_batch_operation(
                    "dispatch",
                    &self.engine_name,
                    &key_label,
                    batch_size,
                    "completed",
                    Some(&format!("batch_id={batch_id} elapsed_ms={elapsed_ms}")),
                );
                return results.into_iter().map(Ok).collect();
            }
            Ok(Ok(results)) => {
                BatchError::result_count_mismatch(key_label.clone(), batch_size, results.len())
            }
            Ok(Err(handler_error)) => {
                BatchError::handler(key_label.clone(), batch_size, handler_error.to_string())
            }
            Err(panic) => {
                BatchError::handler_panicked(key_label.clone(), batch_size, panic_message(&*panic))
            }
        };

        self.metrics.record_batch_dispatched(true);
        error!(
            engine = %self.engine_name,
            group_key = %key_label,
            batch_id = %batch_id,
            batch_size = batch_size,
            elapsed_ms = elapsed_ms,
            error = %failure,
            "❌ DISPATCH: Batch failed, delivering error to every waiting caller"
        );

        (0..batch_size).map(|_| Err(failure.clone())).collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}
