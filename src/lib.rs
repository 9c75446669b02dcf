//! # coverscan
//!
//! Read a book's title and author off a photo of its cover using a Vision
//! Language Model (VLM).
//!
//! Typing in a book by hand is tedious; photographing the cover is not.
//! This crate validates the photo, places it in a blob store so the model
//! can fetch it by URL, asks the model for `{title, author}` and recovers
//! those fields from whatever text comes back.
//!
//! ## Pipeline Overview
//!
//! ```text
//! UploadRequest
//!  │
//!  ├─ 1. Validate  presence → image/* → ≤ 5 MiB, then credential preflight
//!  ├─ 2. Store     BlobStore (Supabase / directory / memory) → public URL
//!  ├─ 3. Infer     one chat-completions call with the image URL
//!  ├─ 4. Parse     strict JSON → field patterns → empty strings
//!  └─ 5. Output    ExtractedMetadata + stored image ref + stats
//! ```
//!
//! A scan that detects nothing is **not** an error: both fields come back
//! empty and the caller falls back to manual entry.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use coverscan::{CoverScanner, MemoryBlobStore, OpenAiVisionClient, ScanConfig, UploadRequest};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key from OPENAI_API_KEY
//!     let config = ScanConfig::builder()
//!         .maybe_api_key(std::env::var("OPENAI_API_KEY").ok())
//!         .build()?;
//!     let model = Arc::new(OpenAiVisionClient::new(config)?);
//!     let store = Arc::new(MemoryBlobStore::new("https://cdn.example.com/".parse()?));
//!
//!     let scanner = CoverScanner::new(store, model);
//!     let bytes = std::fs::read("cover.jpg")?;
//!     let output = scanner.run(UploadRequest::new("reader-1", bytes, "image/jpeg")).await?;
//!     println!("{} by {}", output.metadata.title, output.metadata.author);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `coverscan` binary (clap + anyhow + tracing-subscriber) |
//! | `server` | off     | Enables [`server`] and the `coverscan-server` binary (axum) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod records;
pub mod scan;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ScanConfig, ScanConfigBuilder};
pub use error::{CoverError, ErrorKind};
pub use output::{ExtractedMetadata, ExtractionTier, ScanOutput, ScanStats};
pub use pipeline::extract::{extract_detailed, extract_fields, Extraction};
pub use pipeline::llm::{ModelResponse, OpenAiVisionClient, VisionModel};
pub use pipeline::storage::{
    BlobStore, DirectoryBlobStore, MemoryBlobStore, StoredImageRef, SupabaseStorage,
};
pub use pipeline::validate::{sniff_mime_type, validate, OwnerId, UploadRequest, MAX_UPLOAD_BYTES};
pub use progress::{NoopProgressCallback, ProgressCallback, ScanProgressCallback, ScanStage};
pub use records::{
    BookFilter, BookRecord, IdentityProvider, MemoryRecordStore, NewBook, RecordStore,
    StaticIdentity, StoreError, SupabaseIdentity, UserIdentity,
};
pub use scan::CoverScanner;
