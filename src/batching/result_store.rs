//! # Result Store & Rendezvous
//!
//! Per-key FIFO of unclaimed results. The dispatch worker appends; blocked callers
//! claim exactly one each.
//!
//! Claiming checks availability under the shared lock and pops under the exclusive lock
//! after re-checking, so concurrent readers never block each other and no result is
//! handed out twice. Waiting is a bounded poll that is additionally woken on every
//! publish, so the poll interval only caps worst-case latency.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::metrics::EngineMetrics;
use super::types::{EngineState, GroupKey};
use crate::error::{BatchError, Result};

struct ResultBuckets<K, Res> {
    queues: HashMap<K, VecDeque<Result<Res>>>,
    /// Claims given up (timeout/cancel) before their result arrived, per key. Each one
    /// discards the next result published for the key.
    abandoned: HashMap<K, usize>,
}

impl<K: GroupKey, Res> ResultBuckets<K, Res> {
    fn has_result(&self, group_key: &K) -> bool {
        self.queues
            .get(group_key)
            .is_some_and(|queue| !queue.is_empty())
    }

    /// Pop the oldest result, dropping the key's queue once drained
    fn pop(&mut self, group_key: &K) -> Option<Result<Res>> {
        let queue = self.queues.get_mut(group_key)?;
        let result = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(group_key);
        }
        result
    }
}

/// Abandons an unsettled claim when dropped, so a caller that gives up (timeout,
/// cancellation or simply dropping the future) never strands its key's result
struct ClaimGuard<'a, K: GroupKey, Res: Send + Sync + 'static> {
    store: &'a ResultStore<K, Res>,
    group_key: &'a K,
    settled: bool,
}

impl<K: GroupKey, Res: Send + Sync + 'static> Drop for ClaimGuard<'_, K, Res> {
    fn drop(&mut self) {
        if !self.settled {
            self.store.abandon(self.group_key);
        }
    }
}

pub struct ResultStore<K, Res> {
    buckets: RwLock<ResultBuckets<K, Res>>,
    arrivals: Notify,
    poll_interval: Duration,
    metrics: Arc<EngineMetrics>,
}

impl<K, Res> ResultStore<K, Res>
where
    K: GroupKey,
    Res: Send + Sync + 'static,
{
    pub fn new(poll_interval: Duration, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            buckets: RwLock::new(ResultBuckets {
                queues: HashMap::new(),
                abandoned: HashMap::new(),
            }),
            arrivals: Notify::new(),
            poll_interval,
            metrics,
        }
    }

    /// Append a batch's results, in handler order, to the key's queue
    pub fn publish(&self, group_key: &K, results: Vec<Result<Res>>) {
        let published = results.len();
        let mut results = results.into_iter();

        {
            let mut buckets = self.buckets.write();

            let mut discarded = 0;
            if let Some(debt) = buckets.abandoned.get_mut(group_key) {
                while *debt > 0 && results.next().is_some() {
                    *debt -= 1;
                    discarded += 1;
                }
                if *debt == 0 {
                    buckets.abandoned.remove(group_key);
                }
            }
            if discarded > 0 {
                self.metrics.record_results_discarded(discarded);
                debug!(
                    group_key = ?group_key,
                    discarded = discarded,
                    "🗑️ RESULTS: Discarded results owed to abandoned claims"
                );
            }

            let remaining: VecDeque<Result<Res>> = results.collect();
            if !remaining.is_empty() {
                buckets
                    .queues
                    .entry(group_key.clone())
                    .or_default()
                    .extend(remaining);
            }
        }

        self.metrics.record_results_published(published);
        self.arrivals.notify_waiters();
    }

    /// Non-blocking claim of the oldest result for `group_key`
    pub fn try_claim(&self, group_key: &K) -> Option<Result<Res>> {
        if !self.buckets.read().has_result(group_key) {
            return None;
        }

        // Another claimant may have won the race between the two locks
        let claimed = self.buckets.write().pop(group_key);
        if claimed.is_some() {
            self.metrics.record_result_claimed();
        }
        claimed
    }

    /// Wait for and claim one result for `group_key`.
    ///
    /// Returns `Timeout` once `deadline` passes and `EngineStopped` once the engine has
    /// drained without producing a result. The claim is abandoned if the returned future
    /// is dropped or times out before a result is taken, even if it was never polled.
    pub fn claim<'a>(
        &'a self,
        group_key: &'a K,
        deadline: Option<Instant>,
        mut lifecycle: watch::Receiver<EngineState>,
    ) -> impl Future<Output = Result<Res>> + 'a {
        let guard = ClaimGuard {
            store: self,
            group_key,
            settled: false,
        };

        async move {
            let mut guard = guard;
            let started = Instant::now();
            let mut engine_alive = true;

            loop {
                let notified = self.arrivals.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                // Observe the drain before checking so every publish preceding it is visible
                let drained =
                    !engine_alive || *lifecycle.borrow_and_update() == EngineState::Drained;

                if let Some(result) = self.try_claim(group_key) {
                    guard.settled = true;
                    return result;
                }
                if drained {
                    guard.settled = true;
                    debug!(group_key = ?group_key, "🛑 RESULTS: Engine drained before result arrived");
                    return Err(BatchError::EngineStopped);
                }

                let mut wait = self.poll_interval;
                if let Some(deadline) = deadline {
                    let now = Instant::now();
                    if now >= deadline {
                        let waited_ms = now.duration_since(started).as_millis() as u64;
                        self.metrics.record_claim_timeout();
                        warn!(
                            group_key = ?group_key,
                            waited_ms = waited_ms,
                            "⏰ RESULTS: Claim timed out"
                        );
                        return Err(BatchError::Timeout { waited_ms });
                    }
                    wait = wait.min(deadline - now);
                }

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = &mut notified => {}
                    changed = lifecycle.changed() => {
                        if changed.is_err() {
                            engine_alive = false;
                        }
                    }
                }
            }
        }
    }

    /// Give up one claim for `group_key`: drop the oldest queued result, or the next one
    /// to be published, so the per-key count of results keeps matching waiting callers.
    pub(crate) fn abandon(&self, group_key: &K) {
        let mut buckets = self.buckets.write();
        if buckets.pop(group_key).is_some() {
            self.metrics.record_results_discarded(1);
        } else {
            *buckets.abandoned.entry(group_key.clone()).or_default() += 1;
        }
    }

    /// Keys holding unclaimed results
    pub fn result_keys(&self) -> usize {
        self.buckets.read().queues.len()
    }

    /// Unclaimed results for `group_key`
    pub fn queued(&self, group_key: &K) -> usize {
        self.buckets
            .read()
            .queues
            .get(group_key)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<ResultStore<String, String>> {
        Arc::new(ResultStore::new(
            Duration::from_millis(10),
            Arc::new(EngineMetrics::new()),
        ))
    }

    fn ok_results(values: &[&str]) -> Vec<Result<String>> {
        values.iter().map(|v| Ok(v.to_string())).collect()
    }

    #[test]
    fn test_claims_are_fifo_and_queue_is_removed_when_drained() {
        let store = store();
        let key = "g1".to_string();
        store.publish(&key, ok_results(&["g1-0", "g1-1"]));

        assert_eq!(store.queued(&key), 2);
        assert_eq!(store.try_claim(&key), Some(Ok("g1-0".to_string())));
        assert_eq!(store.try_claim(&key), Some(Ok("g1-1".to_string())));
        assert_eq!(store.try_claim(&key), None);
        assert_eq!(store.result_keys(), 0);
    }

    #[test]
    fn test_keys_are_isolated() {
        let store = store();
        store.publish(&"a".to_string(), ok_results(&["a-0"]));

        assert_eq!(store.try_claim(&"b".to_string()), None);
        assert_eq!(store.try_claim(&"a".to_string()), Some(Ok("a-0".to_string())));
    }

    #[tokio::test]
    async fn test_claim_waits_for_publish() {
        let store = store();
        let (_lifecycle_tx, lifecycle_rx) = watch::channel(EngineState::Running);

        let publisher = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher.publish(&"g1".to_string(), ok_results(&["late"]));
        });

        let result = store.claim(&"g1".to_string(), None, lifecycle_rx).await;
        assert_eq!(result, Ok("late".to_string()));
    }

    #[tokio::test]
    async fn test_timeout_abandons_and_discards_next_result() {
        let store = store();
        let (_lifecycle_tx, lifecycle_rx) = watch::channel(EngineState::Running);
        let key = "g1".to_string();

        let deadline = Instant::now() + Duration::from_millis(20);
        let result = store.claim(&key, Some(deadline), lifecycle_rx).await;
        assert!(matches!(result, Err(BatchError::Timeout { .. })));

        store.publish(&key, ok_results(&["owed-to-abandoned", "for-next-caller"]));
        assert_eq!(store.try_claim(&key), Some(Ok("for-next-caller".to_string())));
        assert_eq!(store.try_claim(&key), None);
    }

    #[tokio::test]
    async fn test_dropped_claim_is_abandoned() {
        let store = store();
        let (_lifecycle_tx, lifecycle_rx) = watch::channel(EngineState::Running);
        let key = "g1".to_string();

        let outer = tokio::time::timeout(
            Duration::from_millis(20),
            store.claim(&key, None, lifecycle_rx.clone()),
        )
        .await;
        assert!(outer.is_err());

        // Dropped before its first poll
        drop(store.claim(&key, None, lifecycle_rx));

        store.publish(&key, ok_results(&["owed-1", "owed-2", "for-next-caller"]));
        assert_eq!(store.try_claim(&key), Some(Ok("for-next-caller".to_string())));
        assert_eq!(store.result_keys(), 0);
    }

    #[tokio::test]
    async fn test_settled_claim_does_not_abandon() {
        let store = store();
        let (_lifecycle_tx, lifecycle_rx) = watch::channel(EngineState::Running);
        let key = "g1".to_string();

        store.publish(&key, ok_results(&["first"]));
        assert_eq!(
            store.claim(&key, None, lifecycle_rx).await,
            Ok("first".to_string())
        );

        store.publish(&key, ok_results(&["second"]));
        assert_eq!(store.try_claim(&key), Some(Ok("second".to_string())));
    }

    #[tokio::test]
    async fn test_drained_engine_ends_claim() {
        let store = store();
        let (lifecycle_tx, lifecycle_rx) = watch::channel(EngineState::Running);

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim(&"g1".to_string(), None, lifecycle_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        lifecycle_tx.send_replace(EngineState::Drained);

        let result = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("claim should end after drain")
            .expect("task joined");
        assert_eq!(result, Err(BatchError::EngineStopped));
    }

    #[tokio::test]
    async fn test_result_published_before_drain_is_still_claimed() {
        let store = store();
        let (lifecycle_tx, lifecycle_rx) = watch::channel(EngineState::Running);

        store.publish(&"g1".to_string(), vec![Err(BatchError::handler("\"g1\"", 1, "boom"))]);
        lifecycle_tx.send_replace(EngineState::Drained);

        let result = store.claim(&"g1".to_string(), None, lifecycle_rx).await;
        assert_eq!(result, Err(BatchError::handler("\"g1\"", 1, "boom")));
    }

    #[tokio::test]
    async fn test_concurrent_claimants_never_share_a_result() {
        let store = store();
        let (_lifecycle_tx, lifecycle_rx) = watch::channel(EngineState::Running);
        let key = "g1".to_string();

        let mut waiters = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let key = key.clone();
            let lifecycle_rx = lifecycle_rx.clone();
            waiters.push(tokio::spawn(async move {
                store.claim(&key, None, lifecycle_rx).await
            }));
        }

        let values: Vec<String> = (0..8).map(|i| format!("g1-{i}")).collect();
        store.publish(&key, values.iter().cloned().map(Ok).collect());

        let mut claimed = Vec::new();
        for waiter in waiters {
            claimed.push(waiter.await.unwrap().unwrap());
        }
        claimed.sort();
        let mut expected = values;
        expected.sort();
        assert_eq!(claimed, expected);
    }
}
