#![allow(dead_code)]

use async_trait::async_trait;
use batch_engine::batching::{BatchEngine, BatchHandler, HandlerResult};
use batch_engine::config::BatchEngineConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A request for one instance in a scale set: `(scale_set, request_id)`
pub type InstanceRequest = (String, u32);

pub type TestEngine = BatchEngine<String, InstanceRequest, String>;

/// Short quiet period and poll interval so tests finish quickly
pub fn fast_config(name: &str) -> BatchEngineConfig {
    BatchEngineConfig::default()
        .with_name(name)
        .with_quiet_period(Duration::from_millis(40))
        .with_poll_interval(Duration::from_millis(5))
}

pub fn scale_set_key(request: &InstanceRequest) -> Result<String, String> {
    Ok(request.0.clone())
}

/// One handler invocation as observed by [`RecordingHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBatch {
    pub group_key: String,
    pub request_ids: Vec<u32>,
}

/// Appends an ascending counter suffix to the group key for each request and records
/// every batch it was handed. Optional per-key delays simulate a slow backend.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    batches: Arc<Mutex<Vec<RecordedBatch>>>,
    delays: Arc<HashMap<String, Duration>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(group_key: &str, delay: Duration) -> Self {
        let mut delays = HashMap::new();
        delays.insert(group_key.to_string(), delay);
        Self {
            batches: Arc::default(),
            delays: Arc::new(delays),
        }
    }

    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl BatchHandler<String, InstanceRequest, String> for RecordingHandler {
    async fn handle(
        &self,
        group_key: &String,
        requests: Vec<InstanceRequest>,
    ) -> HandlerResult<String> {
        self.batches.lock().push(RecordedBatch {
            group_key: group_key.clone(),
            request_ids: requests.iter().map(|r| r.1).collect(),
        });

        if let Some(delay) = self.delays.get(group_key) {
            tokio::time::sleep(*delay).await;
        }

        Ok((0..requests.len())
            .map(|i| format!("{group_key}-{i}"))
            .collect())
    }
}

/// Engine wired with [`scale_set_key`] and a fresh [`RecordingHandler`]
pub fn recording_engine(config: BatchEngineConfig) -> (TestEngine, RecordingHandler) {
    let handler = RecordingHandler::new();
    let engine = BatchEngine::new(config, scale_set_key, handler.clone())
        .expect("test config is valid");
    (engine, handler)
}

pub fn request(scale_set: &str, id: u32) -> InstanceRequest {
    (scale_set.to_string(), id)
}
