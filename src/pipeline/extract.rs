//! Response parsing: turn free-form model text into title and author.
//!
//! ## Recovery tiers
//!
//! Even when told to "return ONLY a JSON object", vision models wrap the
//! object in ```` ```json ```` fences, prepend "Sure! Here is the data:",
//! or append commentary. The extractor therefore tries, in this order:
//!
//! 1. **Structured**: strip whitespace and one outer code fence, then
//!    parse strictly as a JSON object. Missing, `null` or non-string
//!    fields become `""`. A successful parse is final, even when it yields
//!    nothing; tiers are never merged.
//! 2. **Pattern**: search the raw text independently for
//!    `"title": "<value>"` and `"author": "<value>"`.
//! 3. **Empty**: whatever is still missing is `""`.
//!
//! The function is total: it never fails and holds no state, so the same
//! input always yields the same output.

use crate::output::{ExtractedMetadata, ExtractionTier};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// The outcome of [`extract_detailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub metadata: ExtractedMetadata,
    pub tier: ExtractionTier,
}

/// Extract `{title, author}` from raw model text. Never fails.
pub fn extract_fields(raw: &str) -> ExtractedMetadata {
    extract_detailed(raw).metadata
}

/// Like [`extract_fields`], also reporting which tier produced the result.
pub fn extract_detailed(raw: &str) -> Extraction {
    if let Some(metadata) = parse_structured(raw) {
        return Extraction {
            metadata,
            tier: ExtractionTier::Structured,
        };
    }

    let metadata = ExtractedMetadata {
        title: capture(&RE_TITLE, raw),
        author: capture(&RE_AUTHOR, raw),
    };
    let tier = if metadata.is_empty() {
        ExtractionTier::Empty
    } else {
        ExtractionTier::Pattern
    };
    Extraction { metadata, tier }
}

// ── Tier 1: strict JSON ──────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```$").unwrap());

fn strip_code_fence(input: &str) -> &str {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// `Some` only when the text is a JSON object.
fn parse_structured(raw: &str) -> Option<ExtractedMetadata> {
    let value: Value = serde_json::from_str(strip_code_fence(raw)).ok()?;
    let object = value.as_object()?;
    Some(ExtractedMetadata {
        title: string_field(object.get("title")),
        author: string_field(object.get("author")),
    })
}

fn string_field(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

// ── Tier 2: quoted-field patterns ───────────────────────────────────────────

static RE_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""title":\s*"([^"]+)""#).unwrap());
static RE_AUTHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r#""author":\s*"([^"]+)""#).unwrap());

fn capture(re: &Regex, text: &str) -> String {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

// ── Tests ────────────────────────────────────────────────────────────────────
