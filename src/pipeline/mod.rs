//! Pipeline stages for cover-to-metadata extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the network-facing stages can be replaced by fakes.
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ storage ──▶ llm ──▶ extract
//! (checks)     (blob)      (VLM)   (JSON → regex → empty)
//! ```
//!
//! 1. [`validate`]: presence, MIME class and size ceiling; no I/O
//! 2. [`storage`]: place the bytes in a blob store and obtain a public URL
//! 3. [`llm`]: one completion call with the cover URL; the only
//!    suspension point that talks to the model
//! 4. [`extract`]: total parse of the model text into title/author

pub mod extract;
pub mod llm;
pub mod storage;
pub mod validate;
