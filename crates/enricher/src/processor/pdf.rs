use crate::error::ProcessError;
use crate::processor::{ContentKind, TextExtractor};

pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ProcessError> {
        let _span = tracing::info_span!("extract.pdf", size = bytes.len()).entered();

        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| ProcessError::PdfProcessing(format!("Failed to load PDF: {}", e)))?;

        Ok(extract_pages(&doc))
    }

    fn supports(&self, kind: ContentKind) -> bool {
        matches!(kind, ContentKind::Pdf)
    }
}

/// Concatenates the text of every page in page order. Pages whose content
/// cannot be decoded are skipped.
fn extract_pages(doc: &lopdf::Document) -> String {
    let mut text = String::new();

    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                if !page_text.ends_with('\n') {
                    text.push('\n');
                }
            }
            Err(e) => tracing::debug!(page = page_num, error = %e, "Skipping unreadable page"),
        }
    }

    text
}
