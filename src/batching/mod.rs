//! # Request Coalescing
//!
//! Concurrent callers submit requests that each carry a group key. Requests with the
//! same key that arrive within a quiet period of one another are gathered into one
//! batch, handed to a single handler invocation, and every caller receives one result
//! from that batch.
//!
//! ## Pipeline
//!
//! ```text
//! execute(req) ──► Ingestor ──► PendingGroups[key] ◄── DebounceTimer (per key)
//!                                                          │ fires after quiet period
//!                                                          ▼
//!                  ResultStore[key] ◄── DispatchWorker ◄── dispatch queue
//!                        │
//!                        └──► claim() ──► caller
//! ```
//!
//! - [`ingestion`]: derives the group key, appends, arms or rearms the key's timer
//! - [`debounce`]: per-key timers and the fire/rearm generation protocol
//! - [`dispatch`]: the single worker invoking the [`BatchHandler`]
//! - [`result_store`]: per-key FIFO of results and the claim rendezvous
//! - [`engine`]: the [`BatchEngine`] façade and lifecycle

pub mod debounce;
pub mod dispatch;
pub mod engine;
pub mod handler;
pub mod ingestion;
pub mod metrics;
pub mod result_store;
pub mod types;

pub use debounce::{RearmError, TimerHandle, TimerState};
pub use dispatch::Dispatcher;
pub use engine::BatchEngine;
pub use handler::{
    blocking_handler_fn, handler_fn, infallible_key, BatchHandler, BlockingFnHandler, FnHandler,
    GroupKeyFn, HandlerError, HandlerResult,
};
pub use ingestion::Ingestor;
pub use metrics::{EngineMetrics, EngineStats};
pub use result_store::ResultStore;
pub use types::{key_label, Batch, EngineState, GroupKey};
