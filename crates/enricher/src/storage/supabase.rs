use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::config::StorageConfig;
use crate::error::{ConfigError, StorageError};
use crate::sanitize::redact_path;
use crate::secrets::resolve_secret;
use crate::storage::SignedUrlProvider;

/// Supabase Storage: signs retrieval URLs with the service-role key.
pub struct SupabaseStorage {
    client: reqwest::Client,
    base_url: Url,
    bucket: String,
    service_key: SecretString,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    expires_in: u64,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

impl SupabaseStorage {
    pub fn new(
        base_url: &str,
        bucket: impl Into<String>,
        service_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let base_url = Url::parse(base_url).map_err(|e| StorageError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            bucket: bucket.into(),
            service_key,
        })
    }

    /// Builds the adapter from config, resolving the service key.
    pub fn from_config(config: &StorageConfig) -> Result<Self, crate::EnricherError> {
        let url = config
            .url
            .as_deref()
            .ok_or(ConfigError::Missing("storage.url"))?;
        let key = resolve_secret(
            config.service_key.as_deref(),
            config.service_key_file.as_deref(),
            config.service_key_env_var.as_deref(),
        )
        .map_err(ConfigError::from)?;

        Ok(Self::new(
            url,
            config.bucket.clone(),
            key,
            Duration::from_secs(config.timeout_secs),
        )?)
    }

    /// `{base}/storage/v1/object/sign/{bucket}/{path...}`, each segment escaped.
    fn sign_endpoint(&self, path: &str) -> Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::InvalidUrl {
                    url: self.base_url.to_string(),
                    reason: "URL cannot be a base".to_string(),
                })?;
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "object", "sign", self.bucket.as_str()])
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    /// Joins the relative `signedURL` from the sign response onto the
    /// storage API root.
    fn absolute_url(&self, signed: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let signed = if signed.starts_with('/') {
            signed.to_string()
        } else {
            format!("/{}", signed)
        };
        format!("{}/storage/v1{}", base, signed)
    }
}

#[async_trait]
impl SignedUrlProvider for SupabaseStorage {
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        let span = tracing::debug_span!("storage.sign", file = %redact_path(path));
        self.sign(path, ttl).instrument(span).await
    }
}

impl SupabaseStorage {
    async fn sign(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        let endpoint = self.sign_endpoint(path)?;
        let key = self.service_key.expose_secret();

        let response = self
            .client
            .post(endpoint)
            .bearer_auth(key)
            .header("apikey", key)
            .json(&SignRequest {
                expires_in: ttl.as_secs().max(1),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::SignUrl {
                path: redact_path(path),
                reason: format!("status {}: {}", status.as_u16(), body.trim()),
            });
        }

        let signed: SignResponse = response.json().await?;
        if signed.signed_url.is_empty() {
            return Err(StorageError::SignUrl {
                path: redact_path(path),
                reason: "response carried an empty signedURL".to_string(),
            });
        }
        Ok(self.absolute_url(&signed.signed_url))
    }
}
