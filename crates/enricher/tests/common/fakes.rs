//! In-memory collaborators with failure injection.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use enricher::metadata::{FileRecord, FileStatus, MetadataStore, MetadataUpdate};
use enricher::storage::{Blob, BlobDownloader, SignedUrlProvider};
use enricher::{InferenceClient, InferenceError, MetadataError, StorageError};

/// Object store keyed by path. Signed URLs are `mem://<path>`.
#[derive(Default)]
pub struct ObjectStore {
    objects: Mutex<HashMap<String, Blob>>,
    /// Remaining downloads that fail with 503 before succeeding again.
    failing_downloads: AtomicUsize,
    /// When set, downloads never finish.
    hang: std::sync::atomic::AtomicBool,
    downloads: AtomicUsize,
}

impl ObjectStore {
    pub fn put(&self, path: &str, bytes: Vec<u8>, content_type: Option<&str>) {
        self.objects.lock().unwrap().insert(
            path.to_string(),
            Blob {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
    }

    pub fn fail_next_downloads(&self, n: usize) {
        self.failing_downloads.store(n, Ordering::SeqCst);
    }

    pub fn fail_all_downloads(&self) {
        self.failing_downloads.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn hang_downloads(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignedUrlProvider for ObjectStore {
    async fn signed_url(&self, path: &str, _ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("mem://{}", path))
    }
}

#[async_trait]
impl BlobDownloader for ObjectStore {
    async fn download(&self, url: &str) -> Result<Blob, StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let failing = self.failing_downloads.load(Ordering::SeqCst);
        if failing > 0 {
            if failing != usize::MAX {
                self.failing_downloads.store(failing - 1, Ordering::SeqCst);
            }
            return Err(StorageError::DownloadStatus { status: 503 });
        }

        let path = url.trim_start_matches("mem://");
        self.objects
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or(StorageError::DownloadStatus { status: 404 })
    }
}

/// Model with a fixed answer that records every prompt.
pub struct ScriptedModel {
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceClient for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

/// Metadata store held in memory, with the same guards as the SQLite one.
/// Has no blocking calls, so it is safe under a paused clock.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, FileRecord>>,
    /// Remaining `Ready` writes that fail.
    failing_ready_writes: AtomicUsize,
    /// When set, every `Error` write fails.
    fail_error_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn fail_next_ready_writes(&self, n: usize) {
        self.failing_ready_writes.store(n, Ordering::SeqCst);
    }

    pub fn fail_error_writes(&self) {
        self.fail_error_writes.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, id: &str) -> Option<FileRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }
}

fn injected() -> MetadataError {
    MetadataError::Task("injected write failure".to_string())
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn register(&self, record: &FileRecord) -> Result<bool, MetadataError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.id) {
            return Ok(false);
        }
        records.insert(record.id.clone(), record.clone());
        Ok(true)
    }

    async fn update(&self, file_id: &str, update: MetadataUpdate) -> Result<bool, MetadataError> {
        match &update {
            MetadataUpdate::Ready { .. } => {
                let left = self.failing_ready_writes.load(Ordering::SeqCst);
                if left > 0 {
                    self.failing_ready_writes.store(left - 1, Ordering::SeqCst);
                    return Err(injected());
                }
            }
            MetadataUpdate::Error if self.fail_error_writes.load(Ordering::SeqCst) => {
                return Err(injected());
            }
            _ => {}
        }

        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(file_id) else {
            return Ok(false);
        };
        let now = Utc::now();
        match update {
            MetadataUpdate::Processing => {
                if matches!(record.status, FileStatus::Uploading | FileStatus::Processing) {
                    record.status = FileStatus::Processing;
                    record.updated_at = now;
                }
            }
            MetadataUpdate::Error => {
                if record.status != FileStatus::Ready {
                    record.status = FileStatus::Error;
                    record.updated_at = now;
                }
            }
            MetadataUpdate::Ready {
                tags,
                summary,
                keywords,
                processed_at,
            } if record.status != FileStatus::Error => {
                record.status = FileStatus::Ready;
                record.tags = tags;
                record.summary = summary;
                record.keywords = keywords;
                record.processed_at = Some(record.processed_at.unwrap_or(processed_at));
                record.updated_at = now;
            }
            MetadataUpdate::Ready { .. } => return Ok(false),
        }
        Ok(true)
    }

    async fn find(&self, file_id: &str) -> Result<Option<FileRecord>, MetadataError> {
        Ok(self.get(file_id))
    }
}

/// Wraps a store and fails the first `n` `Ready` writes.
pub struct FlakyStore<S> {
    inner: Arc<S>,
    failing_ready_writes: AtomicUsize,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: Arc<S>, failing_ready_writes: usize) -> Self {
        Self {
            inner,
            failing_ready_writes: AtomicUsize::new(failing_ready_writes),
        }
    }
}

#[async_trait]
impl<S: MetadataStore> MetadataStore for FlakyStore<S> {
    async fn register(&self, record: &FileRecord) -> Result<bool, MetadataError> {
        self.inner.register(record).await
    }

    async fn update(&self, file_id: &str, update: MetadataUpdate) -> Result<bool, MetadataError> {
        if matches!(update, MetadataUpdate::Ready { .. }) {
            let left = self.failing_ready_writes.load(Ordering::SeqCst);
            if left > 0 {
                self.failing_ready_writes.store(left - 1, Ordering::SeqCst);
                return Err(injected());
            }
        }
        self.inner.update(file_id, update).await
    }

    async fn find(&self, file_id: &str) -> Result<Option<FileRecord>, MetadataError> {
        self.inner.find(file_id).await
    }
}
