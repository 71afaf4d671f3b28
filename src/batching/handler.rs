//! # Injected Collaborators
//!
//! The engine is domain-agnostic. The surrounding resource manager supplies two
//! functions: a [`GroupKeyFn`] that decides which requests may share a batch, and a
//! [`BatchHandler`] that performs the real work for one batch.
//!
//! Both traits have blanket/adapter implementations for closures so most callers never
//! implement them by hand:
//!
//! ```rust
//! use batch_engine::batching::{handler_fn, infallible_key, HandlerResult};
//!
//! let key_fn = infallible_key(|request: &(String, u32)| request.0.clone());
//! let handler = handler_fn(|group: String, requests: Vec<(String, u32)>| async move {
//!     let results: Vec<String> = requests
//!         .iter()
//!         .enumerate()
//!         .map(|(i, _)| format!("{group}-{i}"))
//!         .collect();
//!     HandlerResult::Ok(results)
//! });
//! # let _ = (key_fn, handler);
//! ```

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use super::types::GroupKey;

/// Error type returned by batch handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation: one result per request, in request order
pub type HandlerResult<Res> = std::result::Result<Vec<Res>, HandlerError>;

/// Derives the group key for a request.
///
/// Must be pure and deterministic; it runs on the submitting task. An `Err` rejects only
/// the offending submission.
pub trait GroupKeyFn<Req, K>: Send + Sync + 'static {
    fn group_key(&self, request: &Req) -> std::result::Result<K, String>;
}

impl<Req, K, F> GroupKeyFn<Req, K> for F
where
    F: Fn(&Req) -> std::result::Result<K, String> + Send + Sync + 'static,
{
    fn group_key(&self, request: &Req) -> std::result::Result<K, String> {
        self(request)
    }
}

/// Wrap a key function that cannot fail
pub fn infallible_key<Req, K, F>(
    key_fn: F,
) -> impl Fn(&Req) -> std::result::Result<K, String> + Send + Sync + 'static
where
    F: Fn(&Req) -> K + Send + Sync + 'static,
    Req: 'static,
    K: 'static,
{
    move |request| Ok(key_fn(request))
}

/// Performs the real work for one batch.
///
/// Must return exactly one result per request, positionally matching `requests`.
/// Invocations are serialized on the single dispatch worker, so handler latency gates
/// every other group's dispatch.
#[async_trait]
pub trait BatchHandler<K, Req, Res>: Send + Sync + 'static
where
    K: GroupKey,
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn handle(&self, group_key: &K, requests: Vec<Req>) -> HandlerResult<Res>;
}

/// Adapter turning an async closure into a [`BatchHandler`]
pub struct FnHandler<F>(F);

/// Build a handler from `Fn(group_key, requests) -> impl Future<Output = HandlerResult<Res>>`
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

#[async_trait]
impl<K, Req, Res, F, Fut> BatchHandler<K, Req, Res> for FnHandler<F>
where
    K: GroupKey,
    Req: Send + 'static,
    Res: Send + 'static,
    F: Fn(K, Vec<Req>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Res>> + Send + 'static,
{
    async fn handle(&self, group_key: &K, requests: Vec<Req>) -> HandlerResult<Res> {
        (self.0)(group_key.clone(), requests).await
    }
}

/// Adapter running a synchronous, possibly slow closure on tokio's blocking pool
pub struct BlockingFnHandler<F>(Arc<F>);

/// Build a handler from a blocking `Fn(&group_key, requests) -> HandlerResult<Res>`
pub fn blocking_handler_fn<F>(f: F) -> BlockingFnHandler<F> {
    BlockingFnHandler(Arc::new(f))
}

#[async_trait]
impl<K, Req, Res, F> BatchHandler<K, Req, Res> for BlockingFnHandler<F>
where
    K: GroupKey,
    Req: Send + 'static,
    Res: Send + 'static,
    F: Fn(&K, Vec<Req>) -> HandlerResult<Res> + Send + Sync + 'static,
{
    async fn handle(&self, group_key: &K, requests: Vec<Req>) -> HandlerResult<Res> {
        let handler = Arc::clone(&self.0);
        let group_key = group_key.clone();

        match tokio::task::spawn_blocking(move || handler(&group_key, requests)).await {
            Ok(result) => result,
            // Re-raise so the dispatch worker reports it as a handler panic
            Err(join_error) if join_error.is_panic() => {
                std::panic::resume_unwind(join_error.into_panic())
            }
            Err(join_error) => Err(join_error.into()),
        }
    }
}
