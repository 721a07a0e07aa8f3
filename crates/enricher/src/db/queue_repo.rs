//! Queue repository: durable job rows in `queue_jobs` and their terminal
//! copies in `dead_letters`.
//!
//! All timestamps that drive visibility are epoch milliseconds passed in
//! by the caller. Mutations after delivery are fenced by `lease_token`.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::queue::QueueStats;

/// A row to append to the queue.
#[derive(Debug, Clone)]
pub struct NewQueueJob<'a> {
    pub id: &'a str,
    pub queue: &'a str,
    pub name: &'a str,
    pub payload: &'a str,
    pub available_at: i64,
    pub created_at: &'a str,
}

/// A job handed out by [`lease_next`].
#[derive(Debug, Clone)]
pub struct LeasedRow {
    pub id: String,
    pub payload: String,
    pub attempt: u32,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct DeadLetterRow {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub payload: String,
    pub attempt: u32,
    pub reason: String,
    pub created_at: String,
    pub failed_at: String,
}

impl DeadLetterRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            queue: row.get("queue")?,
            name: row.get("name")?,
            payload: row.get("payload")?,
            attempt: row.get("attempt")?,
            reason: row.get("reason")?,
            created_at: row.get("created_at")?,
            failed_at: row.get("failed_at")?,
        })
    }
}

pub fn insert(db: &Database, job: &NewQueueJob<'_>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO queue_jobs (id, queue, name, payload, attempt, state, available_at, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, 'waiting', ?5, ?6)",
            params![
                job.id,
                job.queue,
                job.name,
                job.payload,
                job.available_at,
                job.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Leases the oldest ready job of `queue` until `now_ms + lease_ms`.
///
/// Ready means waiting with `available_at <= now`, or active with an
/// expired lease. Taking over an expired lease counts as a redelivery and
/// bumps `attempt`.
pub fn lease_next(
    db: &Database,
    queue: &str,
    now_ms: i64,
    lease_ms: i64,
    token: &str,
) -> Result<Option<LeasedRow>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let candidate = tx
            .query_row(
                "SELECT id, payload, attempt, state, created_at FROM queue_jobs
                 WHERE queue = ?1
                   AND ((state = 'waiting' AND available_at <= ?2)
                     OR (state = 'active' AND lease_expires_at <= ?2))
                 ORDER BY CASE WHEN state = 'waiting' THEN available_at ELSE lease_expires_at END,
                          seq
                 LIMIT 1",
                params![queue, now_ms],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, u32>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, payload, attempt, state, created_at)) = candidate else {
            return Ok(None);
        };

        let attempt = if state == "active" {
            log::warn!("Lease on job {} expired, redelivering", id);
            attempt + 1
        } else {
            attempt
        };

        tx.execute(
            "UPDATE queue_jobs SET state = 'active', attempt = ?2, lease_token = ?3,
             lease_expires_at = ?4 WHERE id = ?1",
            params![id, attempt, token, now_ms + lease_ms],
        )?;
        tx.commit()?;

        Ok(Some(LeasedRow {
            id,
            payload,
            attempt,
            created_at,
        }))
    })
}

/// Deletes a leased job. Returns false if the lease is no longer held.
pub fn ack(db: &Database, id: &str, token: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM queue_jobs WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, token],
        )?;
        Ok(changed > 0)
    })
}

/// Returns a leased job to the queue with `attempt + 1`, hidden until
/// `available_at`.
pub fn nack(
    db: &Database,
    id: &str,
    token: &str,
    available_at: i64,
    error: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE queue_jobs SET state = 'waiting', attempt = attempt + 1, available_at = ?3,
             lease_token = NULL, lease_expires_at = NULL, last_error = ?4
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, token, available_at, error],
        )?;
        Ok(changed > 0)
    })
}

/// Moves a leased job into `dead_letters`. Returns false if the lease is no
/// longer held.
pub fn dead_letter(
    db: &Database,
    id: &str,
    token: &str,
    reason: &str,
    failed_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let moved = tx.execute(
            "INSERT OR REPLACE INTO dead_letters (id, queue, name, payload, attempt, reason, created_at, failed_at)
             SELECT id, queue, name, payload, attempt, ?3, created_at, ?4 FROM queue_jobs
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, token, reason, failed_at],
        )?;
        if moved == 0 {
            return Ok(false);
        }

        tx.execute("DELETE FROM queue_jobs WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(true)
    })
}

pub fn stats(db: &Database, queue: &str, now_ms: i64) -> Result<QueueStats, DatabaseError> {
    db.with_conn(|conn| {
        let (waiting, delayed, active): (u64, u64, u64) = conn.query_row(
            "SELECT
                COALESCE(SUM(state = 'waiting' AND available_at <= ?2), 0),
                COALESCE(SUM(state = 'waiting' AND available_at > ?2), 0),
                COALESCE(SUM(state = 'active'), 0)
             FROM queue_jobs WHERE queue = ?1",
            params![queue, now_ms],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        let dead: u64 = conn.query_row(
            "SELECT COUNT(*) FROM dead_letters WHERE queue = ?1",
            params![queue],
            |r| r.get(0),
        )?;
        Ok(QueueStats {
            waiting,
            delayed,
            active,
            dead,
        })
    })
}

/// Most recent dead letters first.
pub fn list_dead_letters(
    db: &Database,
    queue: &str,
    limit: usize,
) -> Result<Vec<DeadLetterRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM dead_letters WHERE queue = ?1 ORDER BY failed_at DESC, id LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![queue, limit as i64], DeadLetterRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
