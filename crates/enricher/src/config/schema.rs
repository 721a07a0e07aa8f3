use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level worker configuration. Every section is optional in the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Sqlite,
    Memory,
    Redis,
}

impl std::str::FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown queue backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    /// SQLite file for the `sqlite` backend, connection URL for `redis`.
    /// The sqlite backend falls back to the metadata database when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_job_name")]
    pub job_name: String,
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_queue_name() -> String {
    "aiProcessQueue".to_string()
}

fn default_job_name() -> String {
    "process-file".to_string()
}

fn default_visibility_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            url: None,
            name: default_queue_name(),
            job_name: default_job_name(),
            visibility_timeout_secs: default_visibility_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the first failed execution.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            strategy: BackoffStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    1
}

fn default_job_timeout() -> u64 {
    240
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

impl WorkerConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Object store settings. The service key follows the usual
/// inline / file / env var resolution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub service_key: Option<String>,
    #[serde(default)]
    pub service_key_file: Option<String>,
    #[serde(default = "default_service_key_env")]
    pub service_key_env_var: Option<String>,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u64,
}

fn default_bucket() -> String {
    "files".to_string()
}

fn default_service_key_env() -> Option<String> {
    Some("SUPABASE_SERVICE_ROLE_KEY".to_string())
}

fn default_signed_url_ttl() -> u64 {
    3600
}

fn default_storage_timeout() -> u64 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: None,
            bucket: default_bucket(),
            service_key: None,
            service_key_file: None,
            service_key_env_var: default_service_key_env(),
            signed_url_ttl_secs: default_signed_url_ttl(),
            timeout_secs: default_storage_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_inference_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_inference_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("GEMINI_API_KEY".to_string())
}

fn default_inference_timeout() -> u64 {
    60
}

fn default_max_input_chars() -> usize {
    100_000
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_inference_base_url(),
            model: default_model(),
            api_key: None,
            api_key_file: None,
            api_key_env_var: default_api_key_env(),
            timeout_secs: default_inference_timeout(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Metadata database file. `~` is expanded; unset means
    /// `~/.enricher/data/enricher.db`.
    #[serde(default)]
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match self.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => Some(PathBuf::from(crate::secrets::expand_home(path))),
            None => crate::db::default_database_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.queue.backend, QueueBackend::Sqlite);
        assert_eq!(config.queue.name, "aiProcessQueue");
        assert_eq!(config.queue.job_name, "process-file");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_base_ms, 10_000);
        assert_eq!(config.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.storage.bucket, "files");
        assert_eq!(config.storage.signed_url_ttl_secs, 3600);
        assert_eq!(
            config.storage.service_key_env_var.as_deref(),
            Some("SUPABASE_SERVICE_ROLE_KEY")
        );
        assert_eq!(config.inference.model, "gemini-2.5-flash");
        assert_eq!(config.inference.max_input_chars, 100_000);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Redis".parse::<QueueBackend>().unwrap(), QueueBackend::Redis);
        assert_eq!(" memory ".parse::<QueueBackend>().unwrap(), QueueBackend::Memory);
        assert!("kafka".parse::<QueueBackend>().is_err());
    }

    #[test]
    fn test_durations() {
        let queue = QueueConfig::default();
        assert_eq!(queue.visibility_timeout(), Duration::from_secs(300));
        assert_eq!(queue.poll_interval(), Duration::from_millis(500));
        assert_eq!(WorkerConfig::default().job_timeout(), Duration::from_secs(240));
    }

    #[test]
    fn test_database_path_override() {
        let db = DatabaseConfig {
            path: Some("/var/lib/enricher/files.db".to_string()),
        };
        assert_eq!(
            db.resolved_path().unwrap(),
            PathBuf::from("/var/lib/enricher/files.db")
        );
    }
}
