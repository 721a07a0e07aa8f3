const INSTRUCTION: &str =
    "Please provide a concise summary under 50 words and up to 5 keywords for the following document:";

/// Builds the enrichment prompt, keeping at most `max_chars` characters of
/// the document.
pub fn build_prompt(text: &str, max_chars: usize) -> String {
    format!("{}\n\n{}", INSTRUCTION, truncate_chars(text, max_chars))
}

/// Cuts `text` to `max_chars` characters without splitting a code point.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
