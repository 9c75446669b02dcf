//! Progress-callback trait for per-stage scan events.
//!
//! Inject an [`Arc<dyn ScanProgressCallback>`] via
//! [`crate::CoverScanner::with_progress`] to observe a scan as it moves
//! through its stages. Callbacks are a side channel: their return values
//! are ignored and nothing they do can change which stage runs next.
//!
//! # Example
//!
//! ```rust
//! use coverscan::{ScanProgressCallback, ScanStage};
//! use std::sync::Mutex;
//!
//! #[derive(Default)]
//! struct StageLog(Mutex<Vec<ScanStage>>);
//!
//! impl ScanProgressCallback for StageLog {
//!     fn on_stage_start(&self, stage: ScanStage) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//! ```

use crate::error::CoverError;
use crate::output::ExtractedMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The linear stages of a scan.
///
/// `Validating → Storing → Inferring → Parsing`, then done. Any stage may
/// fail, which ends the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    Validating,
    Storing,
    Inferring,
    Parsing,
}

impl ScanStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStage::Validating => "validating",
            ScanStage::Storing => "storing",
            ScanStage::Inferring => "inferring",
            ScanStage::Parsing => "parsing",
        }
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Called by the scanner as it enters and leaves each stage.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Scans of different uploads may run concurrently
/// against the same callback, so implementations must be `Send + Sync`.
pub trait ScanProgressCallback: Send + Sync {
    /// Called when `stage` begins.
    fn on_stage_start(&self, stage: ScanStage) {
        let _ = stage;
    }

    /// Called when `stage` finishes successfully.
    fn on_stage_complete(&self, stage: ScanStage, elapsed_ms: u64) {
        let _ = (stage, elapsed_ms);
    }

    /// Called once when `stage` fails; no further events follow.
    fn on_stage_error(&self, stage: ScanStage, error: &CoverError) {
        let _ = (stage, error);
    }

    /// Called once after parsing finishes.
    fn on_scan_complete(&self, metadata: &ExtractedMetadata) {
        let _ = metadata;
    }
}

/// Type alias for a shared, dynamic progress callback.
pub type ProgressCallback = Arc<dyn ScanProgressCallback>;

/// A no-op implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressCallback;

impl ScanProgressCallback for NoopProgressCallback {}
