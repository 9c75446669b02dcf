//! The extraction instruction sent to the vision model.
//!
//! The prompt is a versioned constant rather than configuration: the
//! response extractor in [`crate::pipeline::extract`] is tuned to the shape
//! this text asks for (a bare JSON object with `title` and `author`), so
//! changing one without the other silently degrades extraction. Bump
//! [`EXTRACTION_PROMPT_VERSION`] whenever the wording changes so log lines
//! from different releases can be told apart.

/// Version tag of [`EXTRACTION_PROMPT`], emitted with every inference log line.
pub const EXTRACTION_PROMPT_VERSION: u32 = 1;

/// Instruction accompanying every cover image.
pub const EXTRACTION_PROMPT: &str = "This is a book cover. Please extract the book title and author. \
Return ONLY a JSON object with 'title' and 'author' fields. \
If you can't find either, return empty strings for those fields.";

/// Upper bound on generated tokens; a two-field JSON object never needs more.
pub const MAX_RESPONSE_TOKENS: u32 = 300;
