//! The scan orchestrator.
//!
//! [`CoverScanner`] sequences the pipeline stages for one upload:
//!
//! ```text
//! Validating ──▶ Storing ──▶ Inferring ──▶ Parsing ──▶ Done
//!      │            │            │
//!      └────────────┴────────────┴──▶ Failed(CoverError)
//! ```
//!
//! Nothing is retried and nothing is rolled back: a blob stored before an
//! inference failure stays where it is. Collaborators are injected at
//! construction, so tests swap in fakes and concurrent scans share nothing
//! but the (stateless) clients.

use crate::error::CoverError;
use crate::output::{ExtractedMetadata, ScanOutput, ScanStats};
use crate::pipeline::extract::{extract_detailed, Extraction};
use crate::pipeline::llm::{parse_image_url, VisionModel};
use crate::pipeline::storage::BlobStore;
use crate::pipeline::validate::{validate, UploadRequest};
use crate::progress::{ProgressCallback, ScanStage};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs uploads through validate → store → infer → parse.
#[derive(Clone)]
pub struct CoverScanner {
    store: Arc<dyn BlobStore>,
    model: Arc<dyn VisionModel>,
    progress: Option<ProgressCallback>,
}

impl CoverScanner {
    pub fn new(store: Arc<dyn BlobStore>, model: Arc<dyn VisionModel>) -> Self {
        Self {
            store,
            model,
            progress: None,
        }
    }

    /// Attach a progress observer.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn model(&self) -> &Arc<dyn VisionModel> {
        &self.model
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Scan one uploaded cover.
    ///
    /// # Errors
    /// Every failure is returned as-is from the stage that produced it:
    /// - validation: `NoFile`, `InvalidType`, `TooLarge`
    /// - missing credential: `Unconfigured`, reported before anything is stored
    /// - storage: `StorageFailure`
    /// - inference: `Unauthorized`, `InferenceFailure`, `InferenceTimeout`
    ///
    /// An all-empty result is **not** an error; check
    /// [`ScanOutput::detected`].
    #[tracing::instrument(skip_all, fields(owner = %request.owner_id))]
    pub async fn run(&self, request: UploadRequest) -> Result<ScanOutput, CoverError> {
        let total_start = Instant::now();

        // ── Stage 1: Validate ────────────────────────────────────────────
        let stage_start = self.begin(ScanStage::Validating);
        validate(&request).map_err(|e| self.fail(ScanStage::Validating, e))?;
        self.model
            .ensure_configured()
            .map_err(|e| self.fail(ScanStage::Validating, e))?;
        let Some(bytes) = request.file.as_deref() else {
            return Err(self.fail(ScanStage::Validating, CoverError::NoFile));
        };
        self.complete(ScanStage::Validating, stage_start);

        // ── Stage 2: Store ───────────────────────────────────────────────
        let stage_start = self.begin(ScanStage::Storing);
        let image = self
            .store
            .store(&request.owner_id, bytes, &request.declared_mime_type)
            .await
            .map_err(|e| self.fail(ScanStage::Storing, e))?;
        let storage_duration_ms = self.complete(ScanStage::Storing, stage_start);
        debug!(
            store = self.store.name(),
            key = %image.storage_key,
            url = %image.public_url,
            "Cover stored"
        );

        // ── Stage 3: Infer ───────────────────────────────────────────────
        let stage_start = self.begin(ScanStage::Inferring);
        let response = self
            .model
            .extract(&image.public_url)
            .await
            .map_err(|e| self.fail(ScanStage::Inferring, e))?;
        let inference_duration_ms = self.complete(ScanStage::Inferring, stage_start);

        // ── Stage 4: Parse ───────────────────────────────────────────────
        let stage_start = self.begin(ScanStage::Parsing);
        let Extraction { metadata, tier } = extract_detailed(&response.raw_text);
        self.complete(ScanStage::Parsing, stage_start);
        self.finish(&metadata);

        let stats = ScanStats {
            storage_duration_ms,
            inference_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        info!(
            key = %image.storage_key,
            tier = ?tier,
            detected = !metadata.is_empty(),
            total_ms = stats.total_duration_ms,
            "Scan complete"
        );

        Ok(ScanOutput {
            image,
            metadata,
            tier,
            stats,
        })
    }

    /// Read a cover that is already publicly reachable at `image_url`.
    ///
    /// Skips validation and storage. Local checks run before any network
    /// call, in this order: blank address (`InvalidInput`), missing
    /// credential (`Unconfigured`), malformed address (`InvalidInput`).
    #[tracing::instrument(skip(self))]
    pub async fn extract_from_url(&self, image_url: &str) -> Result<Extraction, CoverError> {
        if image_url.trim().is_empty() {
            return Err(self.fail(
                ScanStage::Validating,
                CoverError::InvalidInput {
                    input: image_url.to_string(),
                    reason: "no image URL provided".into(),
                },
            ));
        }
        self.model
            .ensure_configured()
            .map_err(|e| self.fail(ScanStage::Validating, e))?;
        let url = parse_image_url(image_url).map_err(|e| self.fail(ScanStage::Validating, e))?;

        let stage_start = self.begin(ScanStage::Inferring);
        let response = self
            .model
            .extract(&url)
            .await
            .map_err(|e| self.fail(ScanStage::Inferring, e))?;
        self.complete(ScanStage::Inferring, stage_start);

        let stage_start = self.begin(ScanStage::Parsing);
        let extraction = extract_detailed(&response.raw_text);
        self.complete(ScanStage::Parsing, stage_start);
        self.finish(&extraction.metadata);

        info!(tier = ?extraction.tier, detected = !extraction.metadata.is_empty(), "Extraction complete");
        Ok(extraction)
    }

    // ── Observability helpers ────────────────────────────────────────────

    fn begin(&self, stage: ScanStage) -> Instant {
        debug!(%stage, "Stage started");
        if let Some(ref cb) = self.progress {
            cb.on_stage_start(stage);
        }
        Instant::now()
    }

    fn complete(&self, stage: ScanStage, started: Instant) -> u64 {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(%stage, elapsed_ms, "Stage complete");
        if let Some(ref cb) = self.progress {
            cb.on_stage_complete(stage, elapsed_ms);
        }
        elapsed_ms
    }

    fn fail(&self, stage: ScanStage, error: CoverError) -> CoverError {
        let kind = error.kind();
        if kind.is_client_error() {
            debug!(%stage, %kind, "Scan rejected: {}", error);
        } else {
            warn!(%stage, %kind, status = ?error.upstream_status(), "Scan failed: {}", error);
        }
        if let Some(ref cb) = self.progress {
            cb.on_stage_error(stage, &error);
        }
        error
    }

    fn finish(&self, metadata: &ExtractedMetadata) {
        if metadata.is_empty() {
            info!("No title or author detected; caller should fall back to manual entry");
        }
        if let Some(ref cb) = self.progress {
            cb.on_scan_complete(metadata);
        }
    }
}
