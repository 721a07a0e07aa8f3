use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnricherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: String, value: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Secret resolution failed: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Lease on job {job_id} is no longer held by this worker")]
    LeaseLost { job_id: String },

    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Queue task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create retrieval URL for '{path}': {reason}")]
    SignUrl { path: String, reason: String },

    #[error("Invalid storage URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed with status {status}")]
    DownloadStatus { status: u16 },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Failed to process DOCX: {0}")]
    DocxProcessing(String),

    #[error("Text extraction failed: {0}")]
    TextExtraction(String),

    #[error("Extractor panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inference service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Inference service returned no text")]
    EmptyResponse,

    #[error("Missing inference credentials: {0}")]
    Credentials(String),
}

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Metadata database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to encode metadata field: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Metadata task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, EnricherError>;
