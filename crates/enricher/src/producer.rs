//! The enqueue side: what an upload handler calls once a file is stored.

use std::sync::Arc;

use tracing::info;

use crate::error::EnricherError;
use crate::metadata::{FileRecord, FileStatus, MetadataStore};
use crate::processor::{guess_mime, ContentKind};
use crate::queue::{Broker, JobId, JobPayload};
use crate::sanitize::redact_path;

/// A file that has just landed in the object store.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_id: String,
    pub name: String,
    pub file_path: String,
    /// Extension hint such as `pdf`.
    pub file_type: String,
    /// MIME type declared by the client, if any.
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
}

impl UploadedFile {
    pub fn new(
        file_id: impl Into<String>,
        file_path: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let name = redact_path(&file_path);
        Self {
            file_id: file_id.into(),
            name,
            file_path,
            file_type: file_type.into(),
            mime_type: None,
            file_size: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }

    /// Declared MIME type, else a guess from the path.
    fn effective_mime(&self) -> Option<String> {
        self.mime_type
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| guess_mime(&self.file_path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerOutcome {
    Enqueued(JobId),
    /// Images need no enrichment and are ready right away.
    MarkedReady,
    /// A record for this file already existed; no second job is queued.
    AlreadyRegistered,
}

pub struct JobProducer {
    broker: Arc<dyn Broker>,
    store: Arc<dyn MetadataStore>,
}

impl JobProducer {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn MetadataStore>) -> Self {
        Self { broker, store }
    }

    /// Registers the file record and, unless it is an image, enqueues one
    /// enrichment job. Returns once the job is persisted. Registering the same
    /// `file_id` again is a no-op.
    pub async fn register_upload(&self, file: &UploadedFile) -> Result<ProducerOutcome, EnricherError> {
        let mime_type = file.effective_mime();
        let is_image = ContentKind::from_file_type(&file.file_type) == ContentKind::Image
            || mime_type
                .as_deref()
                .map(ContentKind::from_mime)
                .is_some_and(|k| k == ContentKind::Image);

        let status = if is_image {
            FileStatus::Ready
        } else {
            FileStatus::Uploading
        };
        let mut record = FileRecord::new(
            file.file_id.clone(),
            file.name.clone(),
            file.file_path.clone(),
            file.file_type.clone(),
            status,
        );
        record.mime_type = mime_type;
        record.file_size = file.file_size;

        if !self.store.register(&record).await? {
            info!(file_id = %file.file_id, "File record already registered, nothing to dispatch");
            return Ok(ProducerOutcome::AlreadyRegistered);
        }

        if is_image {
            info!(file_id = %file.file_id, "Skipping enrichment for image file");
            return Ok(ProducerOutcome::MarkedReady);
        }

        let payload = JobPayload::new(
            file.file_id.clone(),
            file.file_path.clone(),
            file.file_type.clone(),
        );
        let job_id = self.broker.enqueue(&payload).await?;
        info!(
            file_id = %file.file_id,
            job_id = %job_id,
            file = %redact_path(&file.file_path),
            "Dispatched enrichment job"
        );
        Ok(ProducerOutcome::Enqueued(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::metadata::SqliteMetadataStore;
    use crate::queue::MemoryBroker;

    fn producer() -> (JobProducer, Arc<MemoryBroker>, Arc<SqliteMetadataStore>) {
        let broker = Arc::new(MemoryBroker::default());
        let store = Arc::new(SqliteMetadataStore::new(Database::open_in_memory().unwrap()));
        (
            JobProducer::new(broker.clone(), store.clone()),
            broker,
            store,
        )
    }

    #[tokio::test]
    async fn test_document_is_enqueued() {
        let (producer, broker, store) = producer();
        let file = UploadedFile::new("f1", "u1/root/doc.pdf", "pdf")
            .with_mime_type("application/pdf")
            .with_size(1024);

        let outcome = producer.register_upload(&file).await.unwrap();
        assert!(matches!(outcome, ProducerOutcome::Enqueued(_)));

        let delivery = broker.deliver().await.unwrap().unwrap();
        assert_eq!(delivery.payload, JobPayload::new("f1", "u1/root/doc.pdf", "pdf"));
        assert_eq!(delivery.attempt, 0);

        let record = store.find("f1").await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Uploading);
        assert_eq!(record.name, "doc.pdf");
        assert_eq!(record.file_size, Some(1024));
        assert!(record.processed_at.is_none());
    }

    #[tokio::test]
    async fn test_image_is_ready_without_job() {
        let (producer, broker, store) = producer();
        let file = UploadedFile::new("f2", "u1/root/cat.png", "png").with_mime_type("image/png");

        let outcome = producer.register_upload(&file).await.unwrap();
        assert_eq!(outcome, ProducerOutcome::MarkedReady);
        assert!(broker.deliver().await.unwrap().is_none());

        let record = store.find("f2").await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Ready);
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_image_detected_from_path_without_declared_mime() {
        let (producer, broker, _store) = producer();
        let file = UploadedFile::new("f3", "u1/scan.JPG", "jpg");

        assert_eq!(
            producer.register_upload(&file).await.unwrap(),
            ProducerOutcome::MarkedReady
        );
        assert_eq!(broker.stats().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_still_enqueued() {
        let (producer, broker, _store) = producer();
        let file = UploadedFile::new("f4", "u1/tool.exe", "exe");

        assert!(matches!(
            producer.register_upload(&file).await.unwrap(),
            ProducerOutcome::Enqueued(_)
        ));
        assert_eq!(broker.stats().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_declared_image_type_is_ready_without_job() {
        let (producer, broker, store) = producer();
        // No MIME type and no extension in the stored path.
        let file = UploadedFile::new("f5", "u1/root/1700000000_photo", "png");

        assert_eq!(
            producer.register_upload(&file).await.unwrap(),
            ProducerOutcome::MarkedReady
        );
        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.waiting, 0);
        assert_eq!(
            store.find("f5").await.unwrap().unwrap().status,
            FileStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_repeated_registration_enqueues_once() {
        let (producer, broker, _store) = producer();
        let file = UploadedFile::new("f6", "u1/root/report.pdf", "pdf");

        assert!(matches!(
            producer.register_upload(&file).await.unwrap(),
            ProducerOutcome::Enqueued(_)
        ));
        assert_eq!(
            producer.register_upload(&file).await.unwrap(),
            ProducerOutcome::AlreadyRegistered
        );
        assert_eq!(broker.stats().await.unwrap().waiting, 1);
    }
}
