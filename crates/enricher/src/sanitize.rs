//! Helpers for keeping object-store paths and URLs out of span fields.
//!
//! Storage paths carry the uploader's id and folder names, and signed URLs
//! carry a bearer token in the query string.

use std::path::Path;

/// Returns only the file name component of a storage path.
pub fn redact_path(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Drops the query string from a URL so signing tokens never reach the logs.
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?****", base),
        None => url.to_string(),
    }
}
