//! Durable broker on top of the `queue_jobs` table.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::job::{new_job_id, new_lease_token};
use super::{Broker, BrokerSettings, DeadLetter, Delivery, JobId, JobPayload, QueueStats};
use crate::db::queue_repo::{self, NewQueueJob};
use crate::db::{Database, DatabaseError};
use crate::error::QueueError;

pub struct SqliteBroker {
    db: Database,
    settings: BrokerSettings,
}

impl SqliteBroker {
    pub fn new(db: Database, settings: BrokerSettings) -> Self {
        Self { db, settings }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&Database, &BrokerSettings) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || f(&db, &settings))
            .await
            .map_err(|e| QueueError::Task(e.to_string()))?
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2)
}

fn parse_timestamp(table: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table,
            reason: format!("bad timestamp '{}': {}", value, e),
        })
}

fn lease_lost(delivery: &Delivery) -> QueueError {
    QueueError::LeaseLost {
        job_id: delivery.job_id.clone(),
    }
}

#[async_trait]
impl Broker for SqliteBroker {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn enqueue(&self, payload: &JobPayload) -> Result<JobId, QueueError> {
        let body = serde_json::to_string(payload)?;
        self.blocking(move |db, settings| {
            let id = new_job_id();
            let created_at = Utc::now().to_rfc3339();
            queue_repo::insert(
                db,
                &NewQueueJob {
                    id: &id,
                    queue: &settings.queue,
                    name: &settings.job_name,
                    payload: &body,
                    available_at: now_ms(),
                    created_at: &created_at,
                },
            )?;
            Ok(id)
        })
        .await
    }

    async fn deliver(&self) -> Result<Option<Delivery>, QueueError> {
        self.blocking(|db, settings| loop {
            let token = new_lease_token();
            let lease_ms = millis(settings.visibility_timeout);
            let Some(row) = queue_repo::lease_next(db, &settings.queue, now_ms(), lease_ms, &token)?
            else {
                return Ok(None);
            };

            match serde_json::from_str::<JobPayload>(&row.payload) {
                Ok(payload) => {
                    return Ok(Some(Delivery {
                        job_id: row.id,
                        payload,
                        attempt: row.attempt,
                        lease_token: token,
                        enqueued_at: parse_timestamp("queue_jobs", &row.created_at)?,
                    }))
                }
                Err(e) => {
                    // Unreadable payloads can never succeed; park them and keep looking.
                    log::error!("Job {} has an unreadable payload: {}", row.id, e);
                    let reason = format!("invalid payload: {}", e);
                    queue_repo::dead_letter(db, &row.id, &token, &reason, &Utc::now().to_rfc3339())?;
                }
            }
        })
        .await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let d = delivery.clone();
        let acked = self
            .blocking(move |db, _| Ok(queue_repo::ack(db, &d.job_id, &d.lease_token)?))
            .await?;
        if acked {
            Ok(())
        } else {
            Err(lease_lost(delivery))
        }
    }

    async fn nack(
        &self,
        delivery: &Delivery,
        delay: Duration,
        error: &str,
    ) -> Result<(), QueueError> {
        let d = delivery.clone();
        let error = error.to_string();
        let requeued = self
            .blocking(move |db, _| {
                let available_at = now_ms().saturating_add(millis(delay));
                Ok(queue_repo::nack(db, &d.job_id, &d.lease_token, available_at, &error)?)
            })
            .await?;
        if requeued {
            Ok(())
        } else {
            Err(lease_lost(delivery))
        }
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let d = delivery.clone();
        let reason = reason.to_string();
        let moved = self
            .blocking(move |db, _| {
                let failed_at = Utc::now().to_rfc3339();
                Ok(queue_repo::dead_letter(
                    db,
                    &d.job_id,
                    &d.lease_token,
                    &reason,
                    &failed_at,
                )?)
            })
            .await?;
        if moved {
            Ok(())
        } else {
            Err(lease_lost(delivery))
        }
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        self.blocking(|db, settings| Ok(queue_repo::stats(db, &settings.queue, now_ms())?))
            .await
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        self.blocking(move |db, settings| {
            let mut letters = Vec::new();
            for row in queue_repo::list_dead_letters(db, &settings.queue, limit)? {
                let payload = match serde_json::from_str(&row.payload) {
                    Ok(payload) => payload,
                    Err(e) => {
                        log::warn!("Skipping dead letter {} with unreadable payload: {}", row.id, e);
                        continue;
                    }
                };
                letters.push(DeadLetter {
                    payload,
                    enqueued_at: parse_timestamp("dead_letters", &row.created_at)?,
                    failed_at: parse_timestamp("dead_letters", &row.failed_at)?,
                    job_id: row.id,
                    attempt: row.attempt,
                    reason: row.reason,
                });
            }
            Ok(letters)
        })
        .await
    }
}
