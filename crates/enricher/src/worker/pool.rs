use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{QueueError, WorkerError};
use crate::metadata::MetadataUpdate;
use crate::pipeline::{Pipeline, PipelineError, PipelineOutcome};
use crate::queue::{Broker, Delivery, RetryPolicy};

use super::events::WorkerEvent;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// Upper bound on one execution of one job.
    pub job_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PoolConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.worker.concurrency,
            poll_interval: config.queue.poll_interval(),
            job_timeout: config.worker.job_timeout(),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

struct Shared {
    broker: Arc<dyn Broker>,
    pipeline: Arc<Pipeline>,
    config: PoolConfig,
    events: broadcast::Sender<WorkerEvent>,
}

impl Shared {
    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// `concurrency` independent loops pulling from one broker.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `config.concurrency` is 0.
    pub fn new(broker: Arc<dyn Broker>, pipeline: Arc<Pipeline>, config: PoolConfig) -> Self {
        assert!(config.concurrency > 0, "concurrency must be > 0");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                broker,
                pipeline,
                config,
                events,
            }),
        }
    }

    /// Subscribe before [`Self::start`] to see the `WorkerStarted` events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.events.subscribe()
    }

    /// Spawns the worker loops on the current runtime.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let concurrency = self.shared.config.concurrency;

        let workers = (0..concurrency)
            .map(|worker_id| {
                let shared = Arc::clone(&self.shared);
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move { run_worker(worker_id, shared, shutdown).await })
            })
            .collect();

        info!(
            concurrency,
            backend = self.shared.broker.backend(),
            "Started {} workers",
            concurrency
        );

        WorkerHandle {
            shutdown: shutdown_tx,
            workers,
            events: self.shared.events.clone(),
        }
    }
}

/// Running pool. Dropping it without [`Self::shutdown`] leaves the loops
/// running until the runtime stops.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    events: broadcast::Sender<WorkerEvent>,
}

impl WorkerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Asks every loop to stop after its in-flight job.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Waits for every loop to exit.
    pub async fn wait(self) -> Result<(), WorkerError> {
        let mut failure = None;
        for (i, worker) in self.workers.into_iter().enumerate() {
            match worker.await {
                Ok(()) => debug!("Worker {} finished", i),
                Err(e) => {
                    error!("Worker {} panicked: {}", i, e);
                    failure.get_or_insert(WorkerError::Join(e.to_string()));
                }
            }
        }
        info!("All workers have stopped");
        failure.map_or(Ok(()), Err)
    }

    pub async fn shutdown_and_wait(self) -> Result<(), WorkerError> {
        self.shutdown();
        self.wait().await
    }
}

async fn run_worker(worker_id: usize, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    debug!("Worker {} started", worker_id);
    shared.emit(WorkerEvent::WorkerStarted { worker_id });

    loop {
        if *shutdown.borrow() {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        let idle = match shared.broker.deliver().await {
            Ok(Some(delivery)) => {
                process(worker_id, &shared, delivery).await;
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!(worker_id, error = %e, "Failed to pull from queue");
                true
            }
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(shared.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Worker {} lost its shutdown channel", worker_id);
                        break;
                    }
                }
            }
        }
    }

    shared.emit(WorkerEvent::WorkerStopped { worker_id });
    debug!("Worker {} stopped", worker_id);
}

async fn process(worker_id: usize, shared: &Shared, delivery: Delivery) {
    let retry = shared.config.retry;
    shared.emit(WorkerEvent::JobStarted {
        worker_id,
        job_id: delivery.job_id.clone(),
        file_id: delivery.payload.file_id.clone(),
        attempt: delivery.attempt,
    });

    // A lease that ran out repeatedly can push the count past the budget
    // without the pipeline ever failing.
    if delivery.attempt > retry.max_attempts {
        let reason = format!(
            "attempt {} exceeds the retry budget of {}",
            delivery.attempt, retry.max_attempts
        );
        give_up(shared, &delivery, reason).await;
        return;
    }

    let timeout = shared.config.job_timeout;
    let result = match tokio::time::timeout(timeout, shared.pipeline.run(&delivery)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout(timeout)),
    };

    match result {
        Ok(PipelineOutcome::Completed(_)) => {
            if settle("ack", &delivery, shared.broker.ack(&delivery).await) {
                shared.emit(WorkerEvent::JobCompleted {
                    job_id: delivery.job_id.clone(),
                    file_id: delivery.payload.file_id.clone(),
                });
            }
        }
        Ok(PipelineOutcome::Skipped { mime_type }) => {
            if settle("ack", &delivery, shared.broker.ack(&delivery).await) {
                shared.emit(WorkerEvent::JobSkipped {
                    job_id: delivery.job_id.clone(),
                    file_id: delivery.payload.file_id.clone(),
                    mime_type,
                });
            }
        }
        Err(e) => fail(shared, &delivery, e).await,
    }
}

async fn fail(shared: &Shared, delivery: &Delivery, err: PipelineError) {
    let retry = shared.config.retry;
    let message = err.to_string();

    if !retry.should_retry(delivery.attempt) {
        let reason = format!(
            "failed after {} attempts at {}: {}",
            delivery.attempt + 1,
            err.stage(),
            message
        );
        give_up(shared, delivery, reason).await;
        return;
    }

    let delay = retry.delay_for(delivery.attempt);
    if err.is_malformed_input() {
        warn!(
            job_id = %delivery.job_id,
            file_id = %delivery.payload.file_id,
            attempt = delivery.attempt,
            error = %message,
            "File content could not be read, retrying in {:?}",
            delay
        );
    } else {
        warn!(
            job_id = %delivery.job_id,
            file_id = %delivery.payload.file_id,
            attempt = delivery.attempt,
            stage = err.stage(),
            error = %message,
            "Job failed, retrying in {:?}",
            delay
        );
    }

    let nacked = shared.broker.nack(delivery, delay, &message).await;
    if settle("nack", delivery, nacked) {
        shared.emit(WorkerEvent::JobRetrying {
            job_id: delivery.job_id.clone(),
            file_id: delivery.payload.file_id.clone(),
            attempt: delivery.attempt,
            delay,
            error: message,
        });
    }
}

/// Forces the record to `error` and removes the job for good. The job is
/// dead-lettered even when the record write fails.
async fn give_up(shared: &Shared, delivery: &Delivery, reason: String) {
    let file_id = &delivery.payload.file_id;

    match shared
        .pipeline
        .store()
        .update(file_id, MetadataUpdate::Error)
        .await
    {
        Ok(_) => {}
        Err(e) => error!(
            job_id = %delivery.job_id,
            file_id = %file_id,
            error = %e,
            "Failed to mark file as error"
        ),
    }

    error!(
        job_id = %delivery.job_id,
        file_id = %file_id,
        attempt = delivery.attempt,
        reason = %reason,
        "Job dead-lettered"
    );

    let result = shared.broker.dead_letter(delivery, &reason).await;
    if settle("dead_letter", delivery, result) {
        shared.emit(WorkerEvent::JobDeadLettered {
            job_id: delivery.job_id.clone(),
            file_id: file_id.clone(),
            attempt: delivery.attempt,
            reason,
        });
    }
}

/// Logs a failed ack/nack/dead-letter. Returns whether the call succeeded.
fn settle(op: &str, delivery: &Delivery, result: Result<(), QueueError>) -> bool {
    match result {
        Ok(()) => true,
        Err(QueueError::LeaseLost { .. }) => {
            warn!(
                job_id = %delivery.job_id,
                op,
                "Lease expired before the job was settled; another worker owns it now"
            );
            false
        }
        Err(e) => {
            error!(job_id = %delivery.job_id, op, error = %e, "Failed to settle job");
            false
        }
    }
}
