use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Structured result of one model answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Enrichment {
    pub summary: Option<String>,
    pub keywords: Vec<String>,
}

static SUMMARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Summary:\s*([\s\S]+?)(?:\nKeywords:|$)").unwrap());
static KEYWORDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Keywords:\s*([\s\S]+)").unwrap());

/// Pulls `Summary:` and `Keywords:` out of a free-text answer.
///
/// Never fails: a missing section gives `None` or an empty list. Keywords
/// are split on commas, trimmed, and empty items dropped.
pub fn parse_response(answer: &str) -> Enrichment {
    let summary = SUMMARY_RE
        .captures(answer)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    let keywords = KEYWORDS_RE
        .captures(answer)
        .and_then(|c| c.get(1))
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Enrichment { summary, keywords }
}
