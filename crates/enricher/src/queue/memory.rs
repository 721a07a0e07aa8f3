//! In-process broker. Nothing survives a restart; meant for tests and
//! single-process runs.
//!
//! Visibility uses `tokio::time::Instant`, so paused-clock tests can step
//! through retry delays without sleeping.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::job::{new_job_id, new_lease_token};
use super::{Broker, BrokerSettings, DeadLetter, Delivery, JobId, JobPayload, QueueStats};
use crate::error::QueueError;

#[derive(Debug)]
enum Slot {
    Waiting { available_at: Instant },
    Active { token: String, expires_at: Instant },
}

#[derive(Debug)]
struct Entry {
    id: JobId,
    payload: JobPayload,
    attempt: u32,
    slot: Slot,
    enqueued_at: DateTime<Utc>,
}

impl Entry {
    /// When this entry becomes deliverable.
    fn ready_at(&self) -> Instant {
        match &self.slot {
            Slot::Waiting { available_at } => *available_at,
            Slot::Active { expires_at, .. } => *expires_at,
        }
    }

    fn is_held_by(&self, token: &str) -> bool {
        matches!(&self.slot, Slot::Active { token: t, .. } if t == token)
    }
}

#[derive(Default)]
struct State {
    next_seq: u64,
    jobs: BTreeMap<u64, Entry>,
    by_id: HashMap<JobId, u64>,
    dead: Vec<DeadLetter>,
}

impl State {
    /// Looks up the entry for `delivery`, provided its lease is still held.
    fn held_seq(&self, delivery: &Delivery) -> Result<u64, QueueError> {
        self.by_id
            .get(&delivery.job_id)
            .copied()
            .filter(|seq| {
                self.jobs
                    .get(seq)
                    .is_some_and(|e| e.is_held_by(&delivery.lease_token))
            })
            .ok_or_else(|| QueueError::LeaseLost {
                job_id: delivery.job_id.clone(),
            })
    }

    fn remove(&mut self, seq: u64) -> Option<Entry> {
        let entry = self.jobs.remove(&seq)?;
        self.by_id.remove(&entry.id);
        Some(entry)
    }
}

pub struct MemoryBroker {
    settings: BrokerSettings,
    state: Mutex<State>,
}

impl MemoryBroker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn enqueue(&self, payload: &JobPayload) -> Result<JobId, QueueError> {
        let mut state = self.state.lock().await;
        let id = new_job_id();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.jobs.insert(
            seq,
            Entry {
                id: id.clone(),
                payload: payload.clone(),
                attempt: 0,
                slot: Slot::Waiting {
                    available_at: Instant::now(),
                },
                enqueued_at: Utc::now(),
            },
        );
        state.by_id.insert(id.clone(), seq);
        Ok(id)
    }

    async fn deliver(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let next = state
            .jobs
            .iter()
            .filter(|(_, e)| e.ready_at() <= now)
            .min_by_key(|(seq, e)| (e.ready_at(), **seq))
            .map(|(seq, _)| *seq);
        let Some(seq) = next else {
            return Ok(None);
        };
        let Some(entry) = state.jobs.get_mut(&seq) else {
            return Ok(None);
        };

        if matches!(entry.slot, Slot::Active { .. }) {
            tracing::warn!(job_id = %entry.id, "Lease expired, redelivering");
            entry.attempt += 1;
        }
        let token = new_lease_token();
        entry.slot = Slot::Active {
            token: token.clone(),
            expires_at: now + self.settings.visibility_timeout,
        };

        Ok(Some(Delivery {
            job_id: entry.id.clone(),
            payload: entry.payload.clone(),
            attempt: entry.attempt,
            lease_token: token,
            enqueued_at: entry.enqueued_at,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let seq = state.held_seq(delivery)?;
        state.remove(seq);
        Ok(())
    }

    async fn nack(
        &self,
        delivery: &Delivery,
        delay: Duration,
        error: &str,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let seq = state.held_seq(delivery)?;
        if let Some(entry) = state.jobs.get_mut(&seq) {
            tracing::debug!(job_id = %entry.id, error, "Job returned to queue");
            entry.attempt += 1;
            entry.slot = Slot::Waiting {
                available_at: Instant::now() + delay,
            };
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let seq = state.held_seq(delivery)?;
        if let Some(entry) = state.remove(seq) {
            state.dead.push(DeadLetter {
                job_id: entry.id,
                payload: entry.payload,
                attempt: entry.attempt,
                reason: reason.to_string(),
                enqueued_at: entry.enqueued_at,
                failed_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state.lock().await;
        let now = Instant::now();
        let mut stats = QueueStats {
            dead: state.dead.len() as u64,
            ..QueueStats::default()
        };
        for entry in state.jobs.values() {
            match &entry.slot {
                Slot::Active { .. } => stats.active += 1,
                Slot::Waiting { available_at } if *available_at <= now => stats.waiting += 1,
                Slot::Waiting { .. } => stats.delayed += 1,
            }
        }
        Ok(stats)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.dead.iter().rev().take(limit).cloned().collect())
    }
}
