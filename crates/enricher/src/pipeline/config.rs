use std::time::Duration;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lifetime of the retrieval URL handed to the downloader.
    pub signed_url_ttl: Duration,
    /// Characters of extracted text forwarded to the model.
    pub max_input_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            signed_url_ttl: Duration::from_secs(config.storage.signed_url_ttl_secs),
            max_input_chars: config.inference.max_input_chars,
        }
    }
}
