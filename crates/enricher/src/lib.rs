pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod processor;
pub mod producer;
pub mod queue;
pub mod sanitize;
pub mod secrets;
pub mod storage;
pub mod worker;

pub use ai::{parse_response, Enrichment, GeminiClient, InferenceClient};
pub use config::{load_config, Config};
pub use error::{
    ConfigError, EnricherError, InferenceError, MetadataError, ProcessError, QueueError, Result,
    StorageError, WorkerError,
};
pub use logging::{init_logging, LogFormat};
pub use metadata::{FileRecord, FileStatus, MetadataStore, MetadataUpdate, SqliteMetadataStore};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, PipelineError, PipelineOutcome};
pub use processor::{ContentKind, ExtractorRegistry};
pub use producer::{JobProducer, ProducerOutcome, UploadedFile};
pub use queue::{Broker, Delivery, JobPayload, RetryPolicy};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use worker::{PoolConfig, WorkerEvent, WorkerHandle, WorkerPool};
