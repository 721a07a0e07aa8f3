//! Test harness wiring the pipeline, broker and worker pool together.
//!
//! Everything external is replaced by the in-memory fakes; the metadata
//! store can be swapped so the same harness serves paused-clock tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use enricher::metadata::MetadataStore;
use enricher::queue::{Broker, MemoryBroker};
use enricher::{
    JobProducer, Pipeline, PipelineConfig, PoolConfig, RetryPolicy, WorkerEvent, WorkerHandle,
    WorkerPool,
};

use super::fakes::{ObjectStore, ScriptedModel};

pub const DEFAULT_ANSWER: &str = "Summary: Revenue grew 10%.\nKeywords: revenue, growth";

pub struct Harness {
    pub broker: Arc<MemoryBroker>,
    pub objects: Arc<ObjectStore>,
    pub model: Arc<ScriptedModel>,
    pub store: Arc<dyn MetadataStore>,
    pub pipeline: Arc<Pipeline>,
    pub pool_config: PoolConfig,
}

impl Harness {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self::with_answer(store, DEFAULT_ANSWER)
    }

    pub fn with_answer(store: Arc<dyn MetadataStore>, answer: &str) -> Self {
        let broker = Arc::new(MemoryBroker::default());
        let objects = Arc::new(ObjectStore::default());
        let model = ScriptedModel::new(answer);
        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig::default(),
            objects.clone(),
            objects.clone(),
            model.clone(),
            store.clone(),
        ));

        Self {
            broker,
            objects,
            model,
            store,
            pipeline,
            pool_config: PoolConfig {
                concurrency: 1,
                poll_interval: Duration::from_millis(20),
                job_timeout: Duration::from_secs(30),
                retry: RetryPolicy::default(),
            },
        }
    }

    /// Shortens the backoff base for real-clock retry tests.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.pool_config.retry = RetryPolicy::exponential(self.pool_config.retry.max_attempts, base);
        self
    }

    pub fn producer(&self) -> JobProducer {
        JobProducer::new(self.broker.clone(), self.store.clone())
    }

    /// Starts the pool; the receiver sees every event from the start.
    pub fn start(&self) -> (WorkerHandle, broadcast::Receiver<WorkerEvent>) {
        let pool = WorkerPool::new(
            self.broker.clone() as Arc<dyn Broker>,
            self.pipeline.clone(),
            self.pool_config.clone(),
        );
        let events = pool.subscribe();
        (pool.start(), events)
    }
}

/// Collects events until one that ends a job's life in the queue.
pub async fn until_terminal(
    events: &mut broadcast::Receiver<WorkerEvent>,
) -> (Vec<WorkerEvent>, WorkerEvent) {
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.expect("event channel closed");
        if event.is_terminal() {
            return (seen, event);
        }
        seen.push(event);
    }
}

/// Same as [`until_terminal`], bounded by a real-time deadline.
pub async fn until_terminal_within(
    events: &mut broadcast::Receiver<WorkerEvent>,
    limit: Duration,
) -> (Vec<WorkerEvent>, WorkerEvent) {
    tokio::time::timeout(limit, until_terminal(events))
        .await
        .expect("no terminal event in time")
}
