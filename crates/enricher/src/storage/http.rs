use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::error::StorageError;
use crate::sanitize::redact_url;
use crate::storage::{Blob, BlobDownloader};

pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobDownloader for HttpDownloader {
    async fn download(&self, url: &str) -> Result<Blob, StorageError> {
        tracing::debug!(url = %redact_url(url), "Downloading blob");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::DownloadStatus {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|v| !v.trim().is_empty());
        let bytes = response.bytes().await?.to_vec();

        Ok(Blob {
            bytes,
            content_type,
        })
    }
}
