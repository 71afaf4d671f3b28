//! # Batch Engine
//!
//! Public façade over ingestion, debounce timers, the dispatch worker and the result
//! store. One engine instance is owned by the resource manager it serves and shared by
//! cloning the handle; there is no process-wide instance.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use super::dispatch::Dispatcher;
use super::handler::{BatchHandler, GroupKeyFn};
use super::ingestion::Ingestor;
use super::metrics::{EngineMetrics, EngineStats};
use super::result_store::ResultStore;
use super::types::{EngineState, GroupKey};
use crate::config::{BatchEngineConfig, ConfigManager};
use crate::error::{BatchError, Result};
use crate::logging::log_engine_lifecycle;

struct EngineInner<K, Req, Res> {
    name: Arc<str>,
    config: BatchEngineConfig,
    ingestor: Ingestor<K, Req>,
    dispatcher: Dispatcher<K, Req, Res>,
    results: Arc<ResultStore<K, Res>>,
    metrics: Arc<EngineMetrics>,
    lifecycle: Arc<watch::Sender<EngineState>>,
}

/// Coalesces concurrent requests that share a group key into one handler call and
/// hands each caller one of the handler's results.
///
/// # Examples
///
/// ```rust
/// use batch_engine::batching::{handler_fn, infallible_key, BatchEngine, HandlerResult};
/// use batch_engine::config::BatchEngineConfig;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BatchEngineConfig::default()
///     .with_quiet_period(Duration::from_millis(20))
///     .with_poll_interval(Duration::from_millis(5));
///
/// let engine = BatchEngine::new(
///     config,
///     infallible_key(|request: &String| request.clone()),
///     handler_fn(|group: String, requests: Vec<String>| async move {
///         HandlerResult::Ok((0..requests.len()).map(|i| format!("{group}-{i}")).collect())
///     }),
/// )?;
///
/// let result = engine.execute("g1".to_string()).await?;
/// assert_eq!(result, "g1-0");
/// engine.shutdown(Duration::from_secs(1)).await?;
/// # Ok(())
/// # }
/// ```
pub struct BatchEngine<K, Req, Res> {
    inner: Arc<EngineInner<K, Req, Res>>,
}

impl<K, Req, Res> Clone for BatchEngine<K, Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, Req, Res> std::fmt::Debug for BatchEngine<K, Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("name", &self.inner.name)
            .field("state", &*self.inner.lifecycle.borrow())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<K, Req, Res> BatchEngine<K, Req, Res>
where
    K: GroupKey,
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    /// Build an engine. Background work starts lazily on the first `execute`, so this
    /// may be called outside a tokio runtime.
    pub fn new<F, H>(config: BatchEngineConfig, group_key_fn: F, handler: H) -> Result<Self>
    where
        F: GroupKeyFn<Req, K>,
        H: BatchHandler<K, Req, Res>,
    {
        config.validate()?;

        let name: Arc<str> = Arc::from(config.name.as_str());
        let metrics = Arc::new(EngineMetrics::new());
        let (lifecycle_tx, lifecycle_rx) = watch::channel(EngineState::Running);
        let lifecycle = Arc::new(lifecycle_tx);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let key_fn: Arc<dyn GroupKeyFn<Req, K>> = Arc::new(group_key_fn);
        let handler: Arc<dyn BatchHandler<K, Req, Res>> = Arc::new(handler);
        let results = Arc::new(ResultStore::new(
            config.poll_interval(),
            Arc::clone(&metrics),
        ));

        let ingestor = Ingestor::new(
            Arc::clone(&name),
            key_fn,
            config.quiet_period(),
            dispatch_tx,
            lifecycle_rx,
            Arc::clone(&metrics),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&name),
            handler,
            Arc::clone(&results),
            Arc::clone(&metrics),
            Arc::clone(&lifecycle),
            dispatch_rx,
        );

        log_engine_lifecycle(
            &name,
            "created",
            Some(&format!(
                "quiet_period_ms={} poll_interval_ms={}",
                config.quiet_period_ms, config.poll_interval_ms
            )),
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                name,
                config,
                ingestor,
                dispatcher,
                results,
                metrics,
                lifecycle,
            }),
        })
    }

    /// Build an engine from loaded configuration
    pub fn from_config_manager<F, H>(manager: &ConfigManager, group_key_fn: F, handler: H) -> Result<Self>
    where
        F: GroupKeyFn<Req, K>,
        H: BatchHandler<K, Req, Res>,
    {
        Self::new(manager.config().clone(), group_key_fn, handler)
    }

    /// Submit `request` and wait for the result delivered for its group.
    ///
    /// Waits until a result arrives, the configured default claim timeout elapses, or
    /// the engine drains after `stop()`. Dropping the returned future gives up the claim;
    /// the result later produced for it is discarded rather than handed to another caller.
    pub async fn execute(&self, request: Req) -> Result<Res> {
        let deadline = self.default_deadline();
        self.execute_with_deadline(request, deadline).await
    }

    /// Like [`execute`](Self::execute) with an explicit timeout
    pub async fn execute_with_timeout(&self, request: Req, timeout: Duration) -> Result<Res> {
        self.execute_with_deadline(request, Some(Instant::now() + timeout))
            .await
    }

    /// Like [`execute`](Self::execute), returning [`BatchError::Cancelled`] as soon as
    /// `cancel` completes
    pub async fn execute_until<C>(&self, request: Req, cancel: C) -> Result<Res>
    where
        C: Future<Output = ()>,
    {
        let group_key = self.submit(request)?;
        let claim = self.inner.results.claim(
            &group_key,
            self.default_deadline(),
            self.inner.lifecycle.subscribe(),
        );

        tokio::select! {
            result = claim => result,
            _ = cancel => {
                self.inner.metrics.record_claim_cancelled();
                debug!(
                    engine = %self.inner.name,
                    group_key = ?group_key,
                    "🚫 ENGINE: Caller cancelled while waiting for result"
                );
                Err(BatchError::Cancelled)
            }
        }
    }

    async fn execute_with_deadline(&self, request: Req, deadline: Option<Instant>) -> Result<Res> {
        let group_key = self.submit(request)?;
        self.inner
            .results
            .claim(&group_key, deadline, self.inner.lifecycle.subscribe())
            .await
    }

    fn submit(&self, request: Req) -> Result<K> {
        if !self.inner.lifecycle.borrow().is_running() {
            self.inner.metrics.record_rejected();
            return Err(BatchError::EngineStopped);
        }

        self.inner.dispatcher.ensure_started();
        self.inner.ingestor.submit(request)
    }

    fn default_deadline(&self) -> Option<Instant> {
        self.inner
            .config
            .default_claim_timeout()
            .map(|timeout| Instant::now() + timeout)
    }

    /// Stop accepting requests and begin teardown. Armed timers flush immediately, the
    /// dispatch worker drains what was already accepted, then exits.
    ///
    /// Idempotent: returns `true` only for the call that initiated the stop.
    pub fn stop(&self) -> bool {
        let initiated = self.inner.lifecycle.send_if_modified(|state| {
            if state.is_running() {
                *state = EngineState::Stopping;
                true
            } else {
                false
            }
        });

        if !initiated {
            debug!(engine = %self.inner.name, "ENGINE: stop() called on an engine already stopping");
            return false;
        }

        self.inner.ingestor.close();
        self.inner.dispatcher.abandon_if_idle();

        log_engine_lifecycle(
            &self.inner.name,
            "stopping",
            Some(&format!("pending_keys={}", self.inner.ingestor.pending_keys())),
        );
        true
    }

    /// `stop()` and wait for the dispatch worker to drain
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.stop();

        let mut lifecycle = self.inner.lifecycle.subscribe();
        let drained =
            tokio::time::timeout(timeout, lifecycle.wait_for(|state| *state == EngineState::Drained))
                .await;

        match drained {
            Ok(Ok(_)) => {
                log_engine_lifecycle(&self.inner.name, "drained", None);
                Ok(())
            }
            Ok(Err(_)) => Err(BatchError::EngineStopped),
            Err(_) => Err(BatchError::Timeout {
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &BatchEngineConfig {
        &self.inner.config
    }

    pub fn state(&self) -> EngineState {
        *self.inner.lifecycle.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        !self.state().is_running()
    }

    /// Counters and gauges for this engine
    pub fn stats(&self) -> EngineStats {
        self.inner.metrics.snapshot(
            self.state(),
            self.inner.dispatcher.is_running(),
            self.inner.ingestor.pending_keys(),
            self.inner.results.result_keys(),
        )
    }
}
