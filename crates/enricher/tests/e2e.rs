//! End-to-end tests: upload registration, queue, worker pool, pipeline and
//! the SQLite metadata store, with storage and model faked in memory.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::{build_docx, build_pdf, until_terminal_within, FlakyStore, Harness};
use enricher::db::Database;
use enricher::metadata::MetadataStore;
use enricher::queue::Broker;
use enricher::{
    FileStatus, PipelineOutcome, ProducerOutcome, SqliteMetadataStore, UploadedFile, WorkerEvent,
};

const LIMIT: Duration = Duration::from_secs(10);

fn sqlite_store() -> (TempDir, Arc<SqliteMetadataStore>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let db = Database::open(&dir.path().join("enricher.db")).expect("open database");
    (dir, Arc::new(SqliteMetadataStore::new(db)))
}

#[tokio::test]
async fn test_pdf_upload_is_enriched() {
    let (_dir, store) = sqlite_store();
    let harness = Harness::new(store.clone());
    harness.objects.put(
        "u1/root/doc.pdf",
        build_pdf(&["Annual report..."]),
        Some("application/pdf"),
    );

    let upload = UploadedFile::new("f1", "u1/root/doc.pdf", "pdf").with_mime_type("application/pdf");
    let outcome = harness.producer().register_upload(&upload).await.unwrap();
    assert!(matches!(outcome, ProducerOutcome::Enqueued(_)));
    assert_eq!(
        store.find("f1").await.unwrap().unwrap().status,
        FileStatus::Uploading
    );

    let (handle, mut events) = harness.start();
    let (_, terminal) = until_terminal_within(&mut events, LIMIT).await;
    handle.shutdown_and_wait().await.unwrap();

    assert!(matches!(terminal, WorkerEvent::JobCompleted { ref file_id, .. } if file_id == "f1"));

    let record = store.find("f1").await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Ready);
    assert_eq!(record.summary.as_deref(), Some("Revenue grew 10%."));
    assert_eq!(record.keywords, vec!["revenue", "growth"]);
    assert!(record.tags.is_empty());
    assert!(record.processed_at.is_some());

    let prompts = harness.model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with(
        "Please provide a concise summary under 50 words and up to 5 keywords for the following document:\n\n"
    ));
    assert!(prompts[0].contains("Annual report..."));

    let stats = harness.broker.stats().await.unwrap();
    assert_eq!(stats.waiting + stats.delayed + stats.active + stats.dead, 0);
}

#[tokio::test]
async fn test_docx_upload_is_enriched() {
    let (_dir, store) = sqlite_store();
    let harness = Harness::with_answer(
        store.clone(),
        "Summary: Meeting notes.\nKeywords: meeting, notes, q3",
    );
    harness.objects.put(
        "u1/notes.docx",
        build_docx(&["Q3 planning meeting", "Attendees: finance team"]),
        Some(enricher::processor::DOCX_MIME),
    );

    harness
        .producer()
        .register_upload(&UploadedFile::new("f2", "u1/notes.docx", "docx"))
        .await
        .unwrap();

    let (handle, mut events) = harness.start();
    until_terminal_within(&mut events, LIMIT).await;
    handle.shutdown_and_wait().await.unwrap();

    let record = store.find("f2").await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Ready);
    assert_eq!(record.keywords, vec!["meeting", "notes", "q3"]);
    assert!(harness.model.prompts()[0].contains("Q3 planning meeting\nAttendees: finance team"));
}

#[tokio::test]
async fn test_running_a_delivery_twice_is_idempotent() {
    let (_dir, store) = sqlite_store();
    let harness = Harness::new(store.clone());
    harness.objects.put(
        "u1/root/doc.pdf",
        build_pdf(&["Annual report..."]),
        Some("application/pdf"),
    );
    harness
        .producer()
        .register_upload(&UploadedFile::new("f1", "u1/root/doc.pdf", "pdf"))
        .await
        .unwrap();

    let delivery = harness.broker.deliver().await.unwrap().unwrap();
    let first = harness.pipeline.run(&delivery).await.unwrap();
    let after_first = store.find("f1").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = harness.pipeline.run(&delivery).await.unwrap();
    let after_second = store.find("f1").await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(after_first.status, after_second.status);
    assert_eq!(after_first.summary, after_second.summary);
    assert_eq!(after_first.keywords, after_second.keywords);
    assert_eq!(after_first.processed_at, after_second.processed_at);
}

#[tokio::test]
async fn test_unsupported_type_is_ready_without_inference() {
    let (_dir, store) = sqlite_store();
    let harness = Harness::new(store.clone());
    harness.objects.put(
        "u1/setup.exe",
        vec![0x4d, 0x5a, 0x90, 0x00],
        Some("application/x-msdownload"),
    );

    harness
        .producer()
        .register_upload(&UploadedFile::new("f3", "u1/setup.exe", "exe"))
        .await
        .unwrap();

    let (handle, mut events) = harness.start();
    let (_, terminal) = until_terminal_within(&mut events, LIMIT).await;
    handle.shutdown_and_wait().await.unwrap();

    assert!(matches!(terminal, WorkerEvent::JobCompleted { .. }));
    assert_eq!(harness.model.calls(), 0);

    let record = store.find("f3").await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Ready);
    assert!(record.summary.is_none());
    assert!(record.keywords.is_empty());
    assert!(record.tags.is_empty());
}

#[tokio::test]
async fn test_image_upload_is_ready_without_job() {
    let (_dir, store) = sqlite_store();
    let harness = Harness::new(store.clone());

    let upload = UploadedFile::new("f4", "u1/photos/cat.png", "png").with_mime_type("image/png");
    let outcome = harness.producer().register_upload(&upload).await.unwrap();

    assert_eq!(outcome, ProducerOutcome::MarkedReady);
    assert!(harness.broker.deliver().await.unwrap().is_none());

    let record = store.find("f4").await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Ready);
    assert!(record.processed_at.is_some());
    assert_eq!(record.mime_type.as_deref(), Some("image/png"));
}

#[tokio::test]
async fn test_image_served_for_document_is_acknowledged_without_write() {
    let (_dir, store) = sqlite_store();
    let harness = Harness::new(store.clone());
    // Declared as a PDF, but storage serves an image.
    harness
        .objects
        .put("u1/scan.pdf", vec![0x89, b'P', b'N', b'G'], Some("image/png"));
    harness
        .producer()
        .register_upload(&UploadedFile::new("f5", "u1/scan.pdf", "pdf"))
        .await
        .unwrap();

    let delivery = harness.broker.deliver().await.unwrap().unwrap();
    let outcome = harness.pipeline.run(&delivery).await.unwrap();
    assert_eq!(
        outcome,
        PipelineOutcome::Skipped {
            mime_type: "image/png".to_string()
        }
    );
    assert_eq!(harness.model.calls(), 0);
    assert_ne!(
        store.find("f5").await.unwrap().unwrap().status,
        FileStatus::Ready
    );
}

#[tokio::test]
async fn test_metadata_write_failure_is_retried() {
    let (_dir, sqlite) = sqlite_store();
    let flaky = Arc::new(FlakyStore::new(sqlite.clone(), 1));
    let harness = Harness::new(flaky).with_backoff_base(Duration::from_millis(50));
    harness
        .objects
        .put("u1/a.txt", b"Quarterly revenue memo".to_vec(), Some("text/plain"));
    harness
        .producer()
        .register_upload(&UploadedFile::new("f6", "u1/a.txt", "txt"))
        .await
        .unwrap();

    let (handle, mut events) = harness.start();
    let (seen, terminal) = until_terminal_within(&mut events, LIMIT).await;
    handle.shutdown_and_wait().await.unwrap();

    let retries: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::JobRetrying { attempt, error, .. } => Some((*attempt, error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].0, 0);
    assert!(retries[0].1.contains("Metadata write failed"), "{}", retries[0].1);
    assert!(matches!(terminal, WorkerEvent::JobCompleted { .. }));

    assert_eq!(harness.model.calls(), 2);
    let record = sqlite.find("f6").await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Ready);
    assert_eq!(record.summary.as_deref(), Some("Revenue grew 10%."));
}

#[tokio::test]
async fn test_transient_download_failure_recovers() {
    let (_dir, store) = sqlite_store();
    let harness = Harness::new(store.clone()).with_backoff_base(Duration::from_millis(30));
    harness
        .objects
        .put("u1/b.md", b"# Plan\nShip it".to_vec(), Some("text/markdown"));
    harness.objects.fail_next_downloads(2);
    harness
        .producer()
        .register_upload(&UploadedFile::new("f7", "u1/b.md", "md"))
        .await
        .unwrap();

    let (handle, mut events) = harness.start();
    let (seen, terminal) = until_terminal_within(&mut events, LIMIT).await;
    handle.shutdown_and_wait().await.unwrap();

    let attempts: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            WorkerEvent::JobStarted { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![0, 1, 2]);
    assert!(matches!(terminal, WorkerEvent::JobCompleted { .. }));
    assert_eq!(harness.objects.download_count(), 3);
    assert_eq!(
        store.find("f7").await.unwrap().unwrap().status,
        FileStatus::Ready
    );
}

#[tokio::test]
async fn test_concurrent_workers_drain_the_queue() {
    let (_dir, store) = sqlite_store();
    let mut harness = Harness::new(store.clone());
    harness.pool_config.concurrency = 3;

    let producer = harness.producer();
    for i in 0..6 {
        let path = format!("u1/doc{}.txt", i);
        harness
            .objects
            .put(&path, format!("Document number {}", i).into_bytes(), Some("text/plain"));
        producer
            .register_upload(&UploadedFile::new(format!("f{}", i), path, "txt"))
            .await
            .unwrap();
    }

    let (handle, mut events) = harness.start();
    let mut completed = 0;
    while completed < 6 {
        let (_, terminal) = until_terminal_within(&mut events, LIMIT).await;
        assert!(matches!(terminal, WorkerEvent::JobCompleted { .. }));
        completed += 1;
    }
    handle.shutdown_and_wait().await.unwrap();

    for i in 0..6 {
        let record = store.find(&format!("f{}", i)).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Ready);
    }
    assert_eq!(harness.model.calls(), 6);
}
