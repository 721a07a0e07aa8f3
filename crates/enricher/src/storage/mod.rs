//! Access to uploaded blobs in the object store.
//!
//! Workers never hold long-lived object store credentials in URLs: they ask
//! for a short-lived retrieval URL, then fetch it with a plain GET.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

pub mod http;
pub mod supabase;

pub use http::HttpDownloader;
pub use supabase::SupabaseStorage;

/// Raw bytes of a stored object plus the `Content-Type` it was served with.
#[derive(Debug, Clone, Default)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait SignedUrlProvider: Send + Sync {
    /// Returns a URL that can fetch `path` without credentials for `ttl`.
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;
}

#[async_trait]
pub trait BlobDownloader: Send + Sync {
    /// Fetches `url`. Any non-2xx response is an error.
    async fn download(&self, url: &str) -> Result<Blob, StorageError>;
}
