use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broker-assigned job identifier (UUID v4).
pub type JobId = String;

/// What the producer puts on the queue for one uploaded file.
///
/// Serialized as `{"fileId", "filePath", "fileType"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub file_id: String,
    pub file_path: String,
    pub file_type: String,
}

impl JobPayload {
    pub fn new(
        file_id: impl Into<String>,
        file_path: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            file_path: file_path.into(),
            file_type: file_type.into(),
        }
    }
}

/// One delivery of a job to one worker.
///
/// `attempt` counts prior executions of this job (0 on first delivery).
/// The `lease_token` identifies this delivery; acknowledging with a token
/// the broker has since handed to someone else fails.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job_id: JobId,
    pub payload: JobPayload,
    pub attempt: u32,
    pub lease_token: String,
    pub enqueued_at: DateTime<Utc>,
}

pub(crate) fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn new_lease_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A job the broker gave up on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub job_id: JobId,
    pub payload: JobPayload,
    pub attempt: u32,
    pub reason: String,
    pub enqueued_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}
