//! Durable, at-least-once job queue.
//!
//! The worker pulls with [`Broker::deliver`], which leases the oldest ready
//! job for the visibility timeout. A job is finished with exactly one of
//! `ack`, `nack` or `dead_letter`; a lease that runs out before that puts
//! the job back with its attempt counter bumped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{Config, QueueBackend};
use crate::db::Database;
use crate::error::QueueError;

pub mod backoff;
pub mod job;
pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod sqlite;

pub use backoff::RetryPolicy;
pub use job::{DeadLetter, Delivery, JobId, JobPayload};
pub use memory::MemoryBroker;
#[cfg(feature = "redis-backend")]
pub use redis::RedisBroker;
pub use sqlite::SqliteBroker;

/// Job counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Ready to be delivered now.
    pub waiting: u64,
    /// Waiting, but hidden until a retry delay passes.
    pub delayed: u64,
    /// Leased to a worker.
    pub active: u64,
    pub dead: u64,
}

/// Queue identity and lease length shared by all backends.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub queue: String,
    pub job_name: String,
    pub visibility_timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self::from(&crate::config::QueueConfig::default())
    }
}

impl From<&crate::config::QueueConfig> for BrokerSettings {
    fn from(config: &crate::config::QueueConfig) -> Self {
        Self {
            queue: config.name.clone(),
            job_name: config.job_name.clone(),
            visibility_timeout: config.visibility_timeout(),
        }
    }
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Appends a job; returns once it is persisted.
    async fn enqueue(&self, payload: &JobPayload) -> Result<JobId, QueueError>;

    /// Leases the oldest ready job, or `None` when nothing is ready.
    async fn deliver(&self) -> Result<Option<Delivery>, QueueError>;

    /// Removes a finished job.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Puts the job back with `attempt + 1`, invisible for `delay`.
    async fn nack(&self, delivery: &Delivery, delay: Duration, error: &str)
        -> Result<(), QueueError>;

    /// Removes the job for good and records why.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Most recent dead letters first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError>;
}

/// Builds the broker selected by `queue.backend`.
///
/// The sqlite backend shares `db` unless `queue.url` names its own file.
pub async fn open_broker(config: &Config, db: &Database) -> Result<Arc<dyn Broker>, QueueError> {
    let settings = BrokerSettings::from(&config.queue);

    match config.queue.backend {
        QueueBackend::Sqlite => {
            let db = match config.queue.url.as_deref().filter(|u| !u.is_empty()) {
                Some(path) => {
                    let path = crate::secrets::expand_home(path);
                    Database::open(std::path::Path::new(&path))?
                }
                None => db.clone(),
            };
            Ok(Arc::new(SqliteBroker::new(db, settings)))
        }
        QueueBackend::Memory => Ok(Arc::new(MemoryBroker::new(settings))),
        QueueBackend::Redis => open_redis(config, settings).await,
    }
}

#[cfg(feature = "redis-backend")]
async fn open_redis(
    config: &Config,
    settings: BrokerSettings,
) -> Result<Arc<dyn Broker>, QueueError> {
    let url = config
        .queue
        .url
        .as_deref()
        .ok_or_else(|| QueueError::Backend("queue.url is required for redis".to_string()))?;
    Ok(Arc::new(RedisBroker::connect(url, settings).await?))
}

#[cfg(not(feature = "redis-backend"))]
async fn open_redis(
    _config: &Config,
    _settings: BrokerSettings,
) -> Result<Arc<dyn Broker>, QueueError> {
    Err(QueueError::Backend(
        "this build does not include the redis-backend feature".to_string(),
    ))
}
