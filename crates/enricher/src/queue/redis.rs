//! Redis-backed broker for workers spread over several processes.
//!
//! Layout under `enricher:<queue>:`
//!
//! - `wait`    list of job ids ready to run, oldest first
//! - `delayed` zset of job ids keyed by the time they become ready
//! - `active`  zset of leased job ids keyed by lease expiry
//! - `jobs`, `attempts`, `created`, `leases`  hashes keyed by job id
//! - `dead`    list of JSON dead-letter records, newest first
//!
//! Every state change runs as a Lua script so workers never observe a
//! half-moved job.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;

use super::job::{new_job_id, new_lease_token};
use super::{Broker, BrokerSettings, DeadLetter, Delivery, JobId, JobPayload, QueueStats};
use crate::error::QueueError;

const KEY_PREFIX: &str = "enricher:";

const DELIVER_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[2], id)
    redis.call('RPUSH', KEYS[1], id)
end
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now)
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[3], id)
    redis.call('HDEL', KEYS[7], id)
    redis.call('HINCRBY', KEYS[5], id, 1)
    redis.call('RPUSH', KEYS[1], id)
end
local id = redis.call('LPOP', KEYS[1])
if not id then
    return false
end
redis.call('ZADD', KEYS[3], now + tonumber(ARGV[2]), id)
redis.call('HSET', KEYS[7], id, ARGV[3])
local payload = redis.call('HGET', KEYS[4], id) or ''
local attempt = redis.call('HGET', KEYS[5], id) or '0'
local created = redis.call('HGET', KEYS[6], id) or ''
return {id, payload, attempt, created}
"#;

const ACK_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[7], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[7], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('HDEL', KEYS[5], ARGV[1])
redis.call('HDEL', KEYS[6], ARGV[1])
return 1
"#;

const NACK_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[7], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[7], ARGV[1])
redis.call('HINCRBY', KEYS[5], ARGV[1], 1)
redis.call('ZADD', KEYS[2], tonumber(ARGV[3]), ARGV[1])
return 1
"#;

const DEAD_LETTER_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[7], ARGV[1]) ~= ARGV[2] then
    return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[7], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('HDEL', KEYS[5], ARGV[1])
redis.call('HDEL', KEYS[6], ARGV[1])
redis.call('LPUSH', KEYS[8], ARGV[3])
return 1
"#;

/// Key names for one queue, in the order the scripts expect them.
struct Keys {
    wait: String,
    delayed: String,
    active: String,
    jobs: String,
    attempts: String,
    created: String,
    leases: String,
    dead: String,
}

impl Keys {
    fn new(queue: &str) -> Self {
        let key = |suffix: &str| format!("{}{}:{}", KEY_PREFIX, queue, suffix);
        Self {
            wait: key("wait"),
            delayed: key("delayed"),
            active: key("active"),
            jobs: key("jobs"),
            attempts: key("attempts"),
            created: key("created"),
            leases: key("leases"),
            dead: key("dead"),
        }
    }

    fn apply<'s, 'i>(
        &self,
        invocation: &'i mut redis::ScriptInvocation<'s>,
    ) -> &'i mut redis::ScriptInvocation<'s> {
        invocation
            .key(&self.wait)
            .key(&self.delayed)
            .key(&self.active)
            .key(&self.jobs)
            .key(&self.attempts)
            .key(&self.created)
            .key(&self.leases)
            .key(&self.dead)
    }
}

pub struct RedisBroker {
    conn: ConnectionManager,
    settings: BrokerSettings,
    keys: Keys,
}

fn backend_error(e: redis::RedisError) -> QueueError {
    QueueError::Backend(e.to_string())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2)
}

impl RedisBroker {
    /// Connects to `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: &str, settings: BrokerSettings) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(backend_error)?;
        let conn = ConnectionManager::new(client).await.map_err(backend_error)?;
        tracing::info!(queue = %settings.queue, "Connected to redis broker");

        Ok(Self {
            keys: Keys::new(&settings.queue),
            conn,
            settings,
        })
    }

    /// Runs a script that only acts while `token` still holds the lease on `job_id`.
    async fn fenced(
        &self,
        code: &str,
        job_id: &str,
        token: &str,
        extra: &[String],
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let script = Script::new(code);
        let mut invocation = script.prepare_invoke();
        let invocation = self.keys.apply(&mut invocation);
        invocation.arg(job_id).arg(token);
        for arg in extra {
            invocation.arg(arg);
        }

        let held: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)?;
        if held == 1 {
            Ok(())
        } else {
            Err(QueueError::LeaseLost {
                job_id: job_id.to_string(),
            })
        }
    }

    /// Leases the next ready job, returning its raw hash fields.
    async fn lease_next(&self, token: &str) -> Result<Option<LeasedRow>, QueueError> {
        let mut conn = self.conn.clone();
        let script = Script::new(DELIVER_SCRIPT);
        let mut invocation = script.prepare_invoke();
        let invocation = self.keys.apply(&mut invocation);

        invocation
            .arg(now_ms())
            .arg(millis(self.settings.visibility_timeout))
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_error)
    }

    /// Moves a leased job whose payload cannot be decoded to the dead list.
    async fn park_unreadable(
        &self,
        row: &LeasedRow,
        token: &str,
        error: &serde_json::Error,
    ) -> Result<(), QueueError> {
        let (job_id, raw, attempt, created) = row;
        tracing::error!(job_id = %job_id, error = %error, "Job has an unreadable payload");

        let record = unreadable_record(job_id, raw, *attempt, created, error);
        match self
            .fenced(DEAD_LETTER_SCRIPT, job_id, token, &[record])
            .await
        {
            Ok(()) | Err(QueueError::LeaseLost { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// `(job id, payload, attempt, created)` as returned by the deliver script.
type LeasedRow = (String, String, u32, String);

fn parse_created(created: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(created)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Dead-list entry for a payload that does not decode. It keeps the raw
/// text and is skipped when listing dead letters.
fn unreadable_record(
    job_id: &str,
    raw: &str,
    attempt: u32,
    created: &str,
    error: &serde_json::Error,
) -> String {
    serde_json::json!({
        "jobId": job_id,
        "rawPayload": raw,
        "attempt": attempt,
        "reason": format!("invalid payload: {}", error),
        "enqueuedAt": parse_created(created),
        "failedAt": Utc::now(),
    })
    .to_string()
}

#[async_trait]
impl Broker for RedisBroker {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(&self, payload: &JobPayload) -> Result<JobId, QueueError> {
        let mut conn = self.conn.clone();
        let id = new_job_id();
        let body = serde_json::to_string(payload)?;

        redis::pipe()
            .atomic()
            .hset(&self.keys.jobs, &id, body)
            .hset(&self.keys.attempts, &id, 0)
            .hset(&self.keys.created, &id, Utc::now().to_rfc3339())
            .rpush(&self.keys.wait, &id)
            .query_async::<()>(&mut conn)
            .await
            .map_err(backend_error)?;

        Ok(id)
    }

    async fn deliver(&self) -> Result<Option<Delivery>, QueueError> {
        loop {
            let token = new_lease_token();
            let Some(row) = self.lease_next(&token).await? else {
                return Ok(None);
            };

            match serde_json::from_str::<JobPayload>(&row.1) {
                Ok(payload) => {
                    let (job_id, _, attempt, created) = row;
                    return Ok(Some(Delivery {
                        payload,
                        job_id,
                        attempt,
                        lease_token: token,
                        enqueued_at: parse_created(&created),
                    }));
                }
                // Unreadable payloads can never succeed; park them and keep looking.
                Err(e) => self.park_unreadable(&row, &token, &e).await?,
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.fenced(ACK_SCRIPT, &delivery.job_id, &delivery.lease_token, &[])
            .await
    }

    async fn nack(
        &self,
        delivery: &Delivery,
        delay: Duration,
        _error: &str,
    ) -> Result<(), QueueError> {
        let available_at = now_ms().saturating_add(millis(delay));
        self.fenced(
            NACK_SCRIPT,
            &delivery.job_id,
            &delivery.lease_token,
            &[available_at.to_string()],
        )
        .await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let record = DeadLetter {
            job_id: delivery.job_id.clone(),
            payload: delivery.payload.clone(),
            attempt: delivery.attempt,
            reason: reason.to_string(),
            enqueued_at: delivery.enqueued_at,
            failed_at: Utc::now(),
        };
        let record = serde_json::to_string(&record)?;
        self.fenced(
            DEAD_LETTER_SCRIPT,
            &delivery.job_id,
            &delivery.lease_token,
            &[record],
        )
        .await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.conn.clone();
        let now = now_ms();

        let (wait, due, delayed, active, dead): (u64, u64, u64, u64, u64) = redis::pipe()
            .llen(&self.keys.wait)
            .zcount(&self.keys.delayed, "-inf", now)
            .zcount(&self.keys.delayed, format!("({}", now), "+inf")
            .zcard(&self.keys.active)
            .llen(&self.keys.dead)
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;

        Ok(QueueStats {
            waiting: wait + due,
            delayed,
            active,
            dead,
        })
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let records: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.keys.dead)
            .arg(0)
            .arg(limit as i64 - 1)
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;

        Ok(records
            .iter()
            .filter_map(|r| match serde_json::from_str::<DeadLetter>(r) {
                Ok(letter) => Some(letter),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable dead letter");
                    None
                }
            })
            .collect())
    }
}
