//! Outcome notifications published by the worker pool.

use std::time::Duration;

use serde::Serialize;

/// One thing that happened inside the pool. Published on a
/// `tokio::sync::broadcast` channel; lagging subscribers lose events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    WorkerStarted {
        worker_id: usize,
    },
    WorkerStopped {
        worker_id: usize,
    },
    JobStarted {
        worker_id: usize,
        job_id: String,
        file_id: String,
        attempt: u32,
    },
    /// The record was written as `ready` and the job acknowledged.
    JobCompleted {
        job_id: String,
        file_id: String,
    },
    /// Acknowledged without a write (image content).
    JobSkipped {
        job_id: String,
        file_id: String,
        mime_type: String,
    },
    /// Execution `attempt` failed and the job was put back for `delay`.
    JobRetrying {
        job_id: String,
        file_id: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    JobDeadLettered {
        job_id: String,
        file_id: String,
        attempt: u32,
        reason: String,
    },
}

impl WorkerEvent {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::WorkerStarted { .. } | Self::WorkerStopped { .. } => None,
            Self::JobStarted { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobSkipped { job_id, .. }
            | Self::JobRetrying { job_id, .. }
            | Self::JobDeadLettered { job_id, .. } => Some(job_id),
        }
    }

    /// True for events that end a job's life in the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::JobCompleted { .. } | Self::JobSkipped { .. } | Self::JobDeadLettered { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = WorkerEvent::JobSkipped {
            job_id: "j1".to_string(),
            file_id: "f1".to_string(),
            mime_type: "image/png".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_skipped");
        assert_eq!(json["mime_type"], "image/png");
        assert!(event.is_terminal());
        assert_eq!(event.job_id(), Some("j1"));
    }

    #[test]
    fn test_retrying_is_not_terminal() {
        let event = WorkerEvent::JobRetrying {
            job_id: "j1".to_string(),
            file_id: "f1".to_string(),
            attempt: 0,
            delay: Duration::from_secs(10),
            error: "boom".to_string(),
        };
        assert!(!event.is_terminal());
        assert_eq!(WorkerEvent::WorkerStarted { worker_id: 0 }.job_id(), None);
    }
}
