#![allow(clippy::doc_markdown)] // Allow technical terms like BOSH, VMSS in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Batch Engine
//!
//! Request coalescing for resource managers that talk to slow, rate-limited backends.
//!
//! ## Overview
//!
//! Many concurrent callers each ask for a small piece of work ("create one VM in scale
//! set X"). The backend is far cheaper when asked once for many ("grow scale set X by
//! N"). The engine sits between the two: it groups requests by a caller-supplied key,
//! waits until a key has been quiet for a configured period, invokes one batch handler
//! for the whole group and delivers one result back to each caller.
//!
//! ## Key Features
//!
//! - **Debounced grouping**: every arrival extends its group's window by the quiet period
//! - **Key isolation**: requests with different keys never share a batch
//! - **Exactly-once delivery**: each result is claimed by at most one caller
//! - **Contained failures**: handler errors and panics become per-request errors
//! - **Explicit lifecycle**: `stop()` flushes pending groups and drains the worker
//!
//! ## Module Organization
//!
//! - [`batching`] - Ingestion, debounce timers, dispatch worker, result store, engine
//! - [`config`] - Engine settings and layered YAML/environment loading
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured `tracing` setup
//! - [`constants`] - Defaults and limits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use batch_engine::batching::{handler_fn, infallible_key, BatchEngine, HandlerResult};
//! use batch_engine::config::BatchEngineConfig;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! batch_engine::logging::init_structured_logging();
//!
//! let engine = BatchEngine::new(
//!     BatchEngineConfig::default(),
//!     infallible_key(|request: &(String, u32)| request.0.clone()),
//!     handler_fn(|scale_set: String, requests: Vec<(String, u32)>| async move {
//!         // one backend call for the whole group
//!         HandlerResult::Ok(
//!             (0..requests.len()).map(|i| format!("{scale_set}-vm{i}")).collect(),
//!         )
//!     }),
//! )?;
//!
//! let vm = engine.execute(("scale-set-a".to_string(), 1)).await?;
//! println!("created {vm}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib                                  # Unit tests
//! cargo test                                        # Unit, integration and property tests
//! cargo bench --features benchmarks                 # Criterion benchmarks
//! ```

pub mod batching;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;

pub use batching::{
    blocking_handler_fn, handler_fn, infallible_key, BatchEngine, BatchHandler, EngineState,
    EngineStats, GroupKey, GroupKeyFn, HandlerError, HandlerResult,
};
pub use config::{BatchEngineConfig, ConfigManager};
pub use error::{BatchError, Result};
