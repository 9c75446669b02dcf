//! Result types produced by a cover scan.

use crate::pipeline::storage::StoredImageRef;
use serde::{Deserialize, Serialize};

/// Title and author read off a cover.
///
/// Both fields are always present. An empty string means "not detected",
/// never an error; callers fall back to manual entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub title: String,
    pub author: String,
}

impl ExtractedMetadata {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
        }
    }

    /// `true` when neither field was detected.
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.author.is_empty()
    }
}

/// Which recovery tier produced an [`ExtractedMetadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    /// The response parsed as a JSON object.
    Structured,
    /// Strict parsing failed; at least one field was recovered by pattern.
    Pattern,
    /// Nothing could be recovered.
    Empty,
}

/// Per-scan timing and token usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub storage_duration_ms: u64,
    pub inference_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Prompt tokens reported by the completion service, if any.
    pub input_tokens: Option<u32>,
    /// Completion tokens reported by the completion service, if any.
    pub output_tokens: Option<u32>,
}

/// Terminal output of a successful [`crate::CoverScanner::run`].
///
/// The stored image reference is handed back so the caller can persist it
/// alongside the metadata; the scanner itself never writes records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOutput {
    pub image: StoredImageRef,
    pub metadata: ExtractedMetadata,
    pub tier: ExtractionTier,
    pub stats: ScanStats,
}

impl ScanOutput {
    /// `true` when the model detected at least one field.
    pub fn detected(&self) -> bool {
        !self.metadata.is_empty()
    }
}
