use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{Config, QueueBackend};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config.schema.json");

/// Loads a config file, applies `ENRICHER_*` environment overrides and
/// validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = parse_and_check_schema(&content)?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Same as [`load_config`], but a missing path means "defaults plus env".
pub fn load_or_default(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = Config::default();
            apply_env_overrides(&mut config)?;
            validate_config(&config)?;
            Ok(config)
        }
    }
}

/// Parses and validates a config document without consulting the environment.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config = parse_and_check_schema(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_and_check_schema(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;
    validate_schema(&json_value)?;
    Ok(serde_json::from_value(json_value)?)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: messages.join("; "),
        });
    }

    Ok(())
}

pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    apply_overrides_from(config, |name| std::env::var(name).ok())
}

/// Applies overrides from an arbitrary lookup, so tests need not touch the
/// process environment.
pub fn apply_overrides_from<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("ENRICHER_QUEUE_BACKEND") {
        config.queue.backend = parse_env("ENRICHER_QUEUE_BACKEND", &v)?;
    }
    if let Some(v) = get("ENRICHER_QUEUE_URL") {
        config.queue.url = Some(v);
    }
    if let Some(v) = get("ENRICHER_QUEUE_NAME") {
        config.queue.name = v;
    }
    if let Some(v) = get("ENRICHER_VISIBILITY_TIMEOUT_SECS") {
        config.queue.visibility_timeout_secs = parse_env("ENRICHER_VISIBILITY_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = get("ENRICHER_POLL_INTERVAL_MS") {
        config.queue.poll_interval_ms = parse_env("ENRICHER_POLL_INTERVAL_MS", &v)?;
    }
    if let Some(v) = get("ENRICHER_MAX_ATTEMPTS") {
        config.retry.max_attempts = parse_env("ENRICHER_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = get("ENRICHER_BACKOFF_BASE_MS") {
        config.retry.backoff_base_ms = parse_env("ENRICHER_BACKOFF_BASE_MS", &v)?;
    }
    if let Some(v) = get("ENRICHER_CONCURRENCY") {
        config.worker.concurrency = parse_env("ENRICHER_CONCURRENCY", &v)?;
    }
    if let Some(v) = get("ENRICHER_JOB_TIMEOUT_SECS") {
        config.worker.job_timeout_secs = parse_env("ENRICHER_JOB_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = get("ENRICHER_STORAGE_URL").or_else(|| get("SUPABASE_URL")) {
        config.storage.url = Some(v);
    }
    if let Some(v) = get("ENRICHER_STORAGE_BUCKET") {
        config.storage.bucket = v;
    }
    if let Some(v) = get("ENRICHER_INFERENCE_MODEL") {
        config.inference.model = v;
    }
    if let Some(v) = get("ENRICHER_DATABASE_PATH") {
        config.database.path = Some(v);
    }

    Ok(())
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let invalid = |message: &str| ConfigError::Validation {
        message: message.to_string(),
    };

    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if config.worker.concurrency == 0 {
        return Err(invalid("worker.concurrency must be at least 1"));
    }
    if config.worker.job_timeout_secs == 0 {
        return Err(invalid("worker.job_timeout_secs must be at least 1"));
    }
    if config.queue.visibility_timeout_secs == 0 {
        return Err(invalid("queue.visibility_timeout_secs must be at least 1"));
    }
    // A job must time out before its lease lapses, or it gets redelivered
    // while the first worker still runs it.
    if config.worker.job_timeout_secs >= config.queue.visibility_timeout_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "worker.job_timeout_secs ({}) must be below queue.visibility_timeout_secs ({})",
                config.worker.job_timeout_secs, config.queue.visibility_timeout_secs
            ),
        });
    }
    if config.queue.poll_interval_ms == 0 {
        return Err(invalid("queue.poll_interval_ms must be at least 1"));
    }
    if config.inference.max_input_chars == 0 {
        return Err(invalid("inference.max_input_chars must be at least 1"));
    }

    if config.queue.backend == QueueBackend::Redis {
        if !cfg!(feature = "redis-backend") {
            return Err(invalid(
                "queue.backend 'redis' requires a build with the redis-backend feature",
            ));
        }
        if config.queue.url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Missing("queue.url"));
        }
    }

    if let Some(url) = config.storage.url.as_deref() {
        reqwest::Url::parse(url).map_err(|e| ConfigError::Validation {
            message: format!("storage.url '{}' is not a valid URL: {}", url, e),
        })?;
    }

    Ok(())
}
