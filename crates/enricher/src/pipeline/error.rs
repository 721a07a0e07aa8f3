use std::time::Duration;

use thiserror::Error;

/// Why one execution of a job failed. Every variant is retryable; the
/// worker decides between retry and dead-letter from the attempt count.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Storage failed: {0}")]
    Storage(#[from] crate::error::StorageError),

    #[error("Content extraction failed: {0}")]
    Processing(#[from] crate::error::ProcessError),

    #[error("Inference failed: {0}")]
    Inference(#[from] crate::error::InferenceError),

    #[error("Metadata write failed: {0}")]
    Metadata(#[from] crate::error::MetadataError),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    /// The file itself could not be read, as opposed to a collaborator
    /// being unavailable.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Self::Processing(_))
    }

    /// Short step name for logs and events.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Storage(_) => "storage",
            Self::Processing(_) => "extract",
            Self::Inference(_) => "inference",
            Self::Metadata(_) => "metadata",
            Self::Timeout(_) => "timeout",
        }
    }
}
