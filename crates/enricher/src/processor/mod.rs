pub mod docx;
pub mod pdf;
pub mod text;

use std::path::Path;
use std::sync::Arc;

use crate::error::ProcessError;

pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// What kind of content a file holds, as far as enrichment is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Pdf,
    Docx,
    PlainText,
    Image,
    Unsupported,
}

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "tif", "tiff", "svg", "heic", "heif", "avif",
];

impl ContentKind {
    /// Classifies a declared type hint such as `pdf`, `.DOCX` or `md`.
    pub fn from_file_type(hint: &str) -> Self {
        let hint = hint.trim().trim_start_matches('.').to_ascii_lowercase();
        match hint.as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "txt" | "md" | "csv" => Self::PlainText,
            ext if IMAGE_EXTENSIONS.contains(&ext) => Self::Image,
            _ => Self::Unsupported,
        }
    }

    /// Classifies a MIME type. Parameters such as `; charset=utf-8` are ignored.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Self::Pdf,
            DOCX_MIME => Self::Docx,
            m if m.starts_with("text/") => Self::PlainText,
            m if m.starts_with("image/") => Self::Image,
            _ => Self::Unsupported,
        }
    }

    /// Kinds for which extraction is attempted at all.
    pub fn is_extractable(&self) -> bool {
        matches!(self, Self::Pdf | Self::Docx | Self::PlainText)
    }
}

/// Guesses a MIME type from a storage path's extension.
pub fn guess_mime(path: &str) -> Option<String> {
    mime_guess::from_path(Path::new(path))
        .first()
        .map(|m| m.essence_str().to_string())
}

/// Turns the raw bytes of one kind of document into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, ProcessError>;
    fn supports(&self, kind: ContentKind) -> bool;
}

pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(text::PlainTextExtractor),
                Box::new(pdf::PdfExtractor),
                Box::new(docx::DocxExtractor),
            ],
        }
    }

    /// Extracts text for a declared file type. Types without an extractor
    /// yield an empty string.
    pub fn extract(&self, bytes: &[u8], file_type: &str) -> Result<String, ProcessError> {
        let kind = ContentKind::from_file_type(file_type);
        if !kind.is_extractable() {
            return Ok(String::new());
        }

        match self.extractors.iter().find(|e| e.supports(kind)) {
            Some(extractor) => extractor.extract(bytes),
            None => Ok(String::new()),
        }
    }

    /// Runs [`Self::extract`] on the blocking pool. A panicking parser
    /// becomes `ProcessError::Panicked` instead of taking the worker down.
    pub async fn extract_blocking(
        self: &Arc<Self>,
        bytes: Vec<u8>,
        file_type: String,
    ) -> Result<String, ProcessError> {
        let registry = Arc::clone(self);
        tokio::task::spawn_blocking(move || registry.extract(&bytes, &file_type))
            .await
            .map_err(|e| {
                if e.is_panic() {
                    ProcessError::Panicked(panic_message(e.into_panic()))
                } else {
                    ProcessError::Panicked(e.to_string())
                }
            })?
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
