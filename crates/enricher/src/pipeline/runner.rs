use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, Instrument};

use crate::ai::{build_prompt, parse_response, Enrichment, InferenceClient};
use crate::metadata::{MetadataStore, MetadataUpdate};
use crate::processor::{guess_mime, ContentKind, ExtractorRegistry};
use crate::queue::Delivery;
use crate::sanitize;
use crate::storage::{BlobDownloader, SignedUrlProvider};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::PipelineError;

/// How a successful execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The record was written as `ready`.
    Completed(Enrichment),
    /// Images are acknowledged without touching the record.
    Skipped { mime_type: String },
}

/// Drives one delivery from retrieval URL to `ready` record.
pub struct Pipeline {
    config: PipelineConfig,
    storage: Arc<dyn SignedUrlProvider>,
    downloader: Arc<dyn BlobDownloader>,
    extractors: Arc<ExtractorRegistry>,
    inference: Arc<dyn InferenceClient>,
    store: Arc<dyn MetadataStore>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        storage: Arc<dyn SignedUrlProvider>,
        downloader: Arc<dyn BlobDownloader>,
        inference: Arc<dyn InferenceClient>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            storage,
            downloader,
            extractors: Arc::new(ExtractorRegistry::new()),
            inference,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Run every step for one delivery. Any error leaves the record as it
    /// was before the failing step; the caller owns retry decisions.
    pub async fn run(&self, delivery: &Delivery) -> Result<PipelineOutcome, PipelineError> {
        let span = info_span!("pipeline",
            job_id = %delivery.job_id,
            file_id = %delivery.payload.file_id,
            file = %sanitize::redact_path(&delivery.payload.file_path),
            attempt = delivery.attempt,
        );
        self.run_steps(PipelineContext::new(delivery))
            .instrument(span)
            .await
    }

    async fn run_steps(&self, mut ctx: PipelineContext) -> Result<PipelineOutcome, PipelineError> {
        // Step 0: Claim the record
        self.store
            .update(&ctx.payload.file_id, MetadataUpdate::Processing)
            .instrument(info_span!("mark_processing"))
            .await?;

        // Step 1: Retrieval URL
        self.step_sign(&mut ctx)
            .instrument(info_span!("sign_url"))
            .await?;

        // Step 2: Download
        self.step_download(&mut ctx)
            .instrument(info_span!("download"))
            .await?;

        // Step 3: Effective MIME type
        self.step_detect_type(&mut ctx);

        // Step 4: Images are not enriched
        if ctx.kind == ContentKind::Image {
            let mime_type = ctx.mime_type.unwrap_or_default();
            info!(mime_type = %mime_type, "Image content, nothing to enrich");
            return Ok(PipelineOutcome::Skipped { mime_type });
        }

        // Step 5: Extract
        self.step_extract(&mut ctx)
            .instrument(info_span!("extract"))
            .await?;

        // Step 6: Inference
        self.step_enrich(&mut ctx)
            .instrument(info_span!("inference"))
            .await?;

        // Step 7: Write the result
        self.step_write_ready(&ctx)
            .instrument(info_span!("write_metadata"))
            .await?;

        info!(
            summary = ctx.enrichment.summary.is_some(),
            keywords = ctx.enrichment.keywords.len(),
            "File enriched"
        );
        Ok(PipelineOutcome::Completed(ctx.enrichment))
    }

    async fn step_sign(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let url = self
            .storage
            .signed_url(&ctx.payload.file_path, self.config.signed_url_ttl)
            .await?;
        ctx.retrieval_url = Some(url);
        Ok(())
    }

    async fn step_download(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let url = ctx.retrieval_url.as_deref().unwrap_or_default();
        let blob = self.downloader.download(url).await?;
        debug!(
            bytes = blob.bytes.len(),
            content_type = blob.content_type.as_deref().unwrap_or("-"),
            "Downloaded"
        );
        ctx.blob = Some(blob);
        Ok(())
    }

    fn step_detect_type(&self, ctx: &mut PipelineContext) {
        let header = ctx.blob.as_ref().and_then(|b| b.content_type.clone());
        ctx.mime_type = header.or_else(|| guess_mime(&ctx.payload.file_path));
        ctx.kind = ctx
            .mime_type
            .as_deref()
            .map(ContentKind::from_mime)
            .unwrap_or(ContentKind::Unsupported);
        debug!(mime_type = ctx.mime_type.as_deref().unwrap_or("-"), kind = ?ctx.kind, "Content type resolved");
    }

    async fn step_extract(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        if !ctx.kind.is_extractable() {
            debug!(kind = ?ctx.kind, "No extractor for content type");
            return Ok(());
        }

        let bytes = ctx.blob.take().map(|b| b.bytes).unwrap_or_default();
        ctx.text = self
            .extractors
            .extract_blocking(bytes, ctx.payload.file_type.clone())
            .await?;
        debug!(chars = ctx.text.chars().count(), "Text extracted");
        Ok(())
    }

    async fn step_enrich(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        if ctx.text.trim().is_empty() {
            debug!("No text, skipping inference");
            return Ok(());
        }

        let prompt = build_prompt(&ctx.text, self.config.max_input_chars);
        let answer = self.inference.generate(&prompt).await?;
        ctx.enrichment = parse_response(&answer);
        if ctx.enrichment.summary.is_none() {
            debug!("Model answer carried no Summary: section");
        }
        Ok(())
    }

    async fn step_write_ready(&self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        let update = MetadataUpdate::Ready {
            tags: Vec::new(),
            summary: ctx.enrichment.summary.clone(),
            keywords: ctx.enrichment.keywords.clone(),
            processed_at: Utc::now(),
        };
        self.store.update(&ctx.payload.file_id, update).await?;
        Ok(())
    }
}
