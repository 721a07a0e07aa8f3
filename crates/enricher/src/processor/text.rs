use crate::error::ProcessError;
use crate::processor::{ContentKind, TextExtractor};

/// `txt`, `md` and `csv` files: the bytes are the text.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ProcessError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ProcessError::TextExtraction(format!("Invalid UTF-8: {}", e)))
    }

    fn supports(&self, kind: ContentKind) -> bool {
        matches!(kind, ContentKind::PlainText)
    }
}
