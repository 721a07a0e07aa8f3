//! Summaries and keywords from a hosted language model.
//!
//! The model is asked a fixed question in plain language and answers in
//! free text; [`parse_response`] pulls the `Summary:` and `Keywords:`
//! sections back out.

pub mod gemini;
pub mod parser;
pub mod prompt;

use async_trait::async_trait;

use crate::error::InferenceError;

pub use gemini::GeminiClient;
pub use parser::{parse_response, Enrichment};
pub use prompt::build_prompt;

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Sends `prompt` and returns the model's text answer.
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError>;
}
