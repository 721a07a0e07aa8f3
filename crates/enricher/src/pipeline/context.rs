use crate::ai::Enrichment;
use crate::processor::ContentKind;
use crate::queue::{Delivery, JobPayload};
use crate::storage::Blob;

pub struct PipelineContext {
    // Input
    pub job_id: String,
    pub payload: JobPayload,
    pub attempt: u32,

    // Step 1 result
    pub retrieval_url: Option<String>,

    // Step 2 result
    pub blob: Option<Blob>,

    // Step 3 result: header MIME, else guessed from the path
    pub mime_type: Option<String>,
    pub kind: ContentKind,

    // Step 4 result, empty for non-extractable kinds
    pub text: String,

    // Step 5 result
    pub enrichment: Enrichment,
}

impl PipelineContext {
    pub fn new(delivery: &Delivery) -> Self {
        Self {
            job_id: delivery.job_id.clone(),
            payload: delivery.payload.clone(),
            attempt: delivery.attempt,
            retrieval_url: None,
            blob: None,
            mime_type: None,
            kind: ContentKind::Unsupported,
            text: String::new(),
            enrichment: Enrichment::default(),
        }
    }
}
