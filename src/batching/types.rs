//! Shared data types for the batching pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;
use uuid::Uuid;

/// Anything usable as a group key: equality-comparable, hashable and cheap to clone.
/// No ordering between distinct keys is assumed.
pub trait GroupKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> GroupKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Immutable snapshot of one group's pending requests, taken when its debounce timer fires
#[derive(Debug, Clone)]
pub struct Batch<K, Req> {
    /// Correlation id for logs
    pub batch_id: Uuid,
    /// Key shared by every request in the batch
    pub group_key: K,
    /// Debounce timer generation that produced this batch
    pub generation: u64,
    /// Requests in submission order
    pub requests: Vec<Req>,
    pub created_at: DateTime<Utc>,
}

impl<K: GroupKey, Req> Batch<K, Req> {
    pub fn new(group_key: K, generation: u64, requests: Vec<Req>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            group_key,
            generation,
            requests,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Human readable form of the group key for logs and error messages
    pub fn key_label(&self) -> String {
        key_label(&self.group_key)
    }
}

/// Render a group key for logs and error messages
pub fn key_label<K: Debug>(group_key: &K) -> String {
    format!("{group_key:?}")
}

/// Engine lifecycle as observed by timers, the dispatch worker and claimants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Accepting submissions
    Running,
    /// `stop()` was called: submissions are rejected, armed timers flush immediately
    Stopping,
    /// The dispatch worker has drained its queue and exited; no further results will appear
    Drained,
}

impl EngineState {
    pub fn is_running(self) -> bool {
        self == EngineState::Running
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Running => write!(f, "running"),
            EngineState::Stopping => write!(f, "stopping"),
            EngineState::Drained => write!(f, "drained"),
        }
    }
}
