//! Error types for the coverscan library.
//!
//! Every stage of the pipeline returns `Result<_, CoverError>`; nothing
//! panics and nothing is retried inside the crate. Callers that only care
//! about the *class* of failure (HTTP status mapping, metrics labels) use
//! [`CoverError::kind`], which collapses the structured variants onto the
//! eight-way [`ErrorKind`] taxonomy.
//!
//! The one failure that is *not* an error is "the model found nothing":
//! [`crate::pipeline::extract::extract_fields`] is total and an all-empty
//! [`crate::output::ExtractedMetadata`] is a normal result.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// All errors returned by the coverscan library.
#[derive(Debug, Error)]
pub enum CoverError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The upload carried no file at all.
    #[error("No file was provided with the upload")]
    NoFile,

    /// The declared MIME type is not in the `image/*` class.
    #[error("Unsupported file type '{mime_type}': only image/* uploads are accepted")]
    InvalidType { mime_type: String },

    /// The upload exceeds the size ceiling.
    #[error("File is too large: {size} bytes (limit is {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    /// An image address that is missing or does not parse as an absolute URL.
    #[error("Invalid image URL '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    // ── Configuration errors ──────────────────────────────────────────────
    /// A required credential is absent.
    #[error("{service} is not configured.\n{hint}")]
    Unconfigured { service: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Upstream errors ───────────────────────────────────────────────────
    /// The inference service rejected the credential (HTTP 401/403).
    #[error("Authentication failed with '{service}' (HTTP {status}): {detail}\nCheck the API key configuration.")]
    Unauthorized {
        service: String,
        status: u16,
        detail: String,
    },

    /// The blob store could not place the upload.
    #[error("Storage failure{}: {detail}", fmt_status(.status))]
    StorageFailure { status: Option<u16>, detail: String },

    /// Transport or service error from the inference call.
    #[error("Inference failure{}: {detail}", fmt_status(.status))]
    InferenceFailure { status: Option<u16>, detail: String },

    /// The inference call did not complete within the configured timeout.
    #[error("Inference call timed out after {secs}s")]
    InferenceTimeout { secs: u64 },
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl CoverError {
    /// The taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoverError::NoFile => ErrorKind::NoFile,
            CoverError::InvalidType { .. } => ErrorKind::InvalidType,
            CoverError::TooLarge { .. } => ErrorKind::TooLarge,
            CoverError::InvalidInput { .. } => ErrorKind::InvalidInput,
            CoverError::Unconfigured { .. } | CoverError::InvalidConfig(_) => {
                ErrorKind::Unconfigured
            }
            CoverError::Unauthorized { .. } => ErrorKind::Unauthorized,
            CoverError::StorageFailure { .. } => ErrorKind::StorageFailure,
            CoverError::InferenceFailure { .. } | CoverError::InferenceTimeout { .. } => {
                ErrorKind::InferenceFailure
            }
        }
    }

    /// Upstream HTTP status, when the failure came from a remote service.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            CoverError::StorageFailure { status, .. }
            | CoverError::InferenceFailure { status, .. } => *status,
            CoverError::Unauthorized { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// `true` for the timeout flavour of [`ErrorKind::InferenceFailure`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoverError::InferenceTimeout { .. })
    }
}

/// Failure classes reported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoFile,
    InvalidType,
    TooLarge,
    InvalidInput,
    Unconfigured,
    Unauthorized,
    StorageFailure,
    InferenceFailure,
}

impl ErrorKind {
    /// Validation-class errors the end user can correct (reported as 4xx).
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::NoFile | ErrorKind::InvalidType | ErrorKind::TooLarge | ErrorKind::InvalidInput
        )
    }

    /// Stable snake_case label, suitable for log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoFile => "no_file",
            ErrorKind::InvalidType => "invalid_type",
            ErrorKind::TooLarge => "too_large",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unconfigured => "unconfigured",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::InferenceFailure => "inference_failure",
        }
    }

    /// Short human summary used as the `error` field of HTTP error bodies.
    pub fn summary(self) -> &'static str {
        match self {
            ErrorKind::NoFile => "No file provided",
            ErrorKind::InvalidType => "Please upload an image file",
            ErrorKind::TooLarge => "Image size should be less than 5MB",
            ErrorKind::InvalidInput => "Invalid image URL provided",
            ErrorKind::Unconfigured => "Inference API key is not configured",
            ErrorKind::Unauthorized => "Inference API authentication failed",
            ErrorKind::StorageFailure => "Error uploading image",
            ErrorKind::InferenceFailure => "Error processing image",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_display() {
        let e = CoverError::TooLarge {
            size: 6_000_000,
            limit: 5_242_880,
        };
        let msg = e.to_string();
        assert!(msg.contains("6000000"), "got: {msg}");
        assert!(msg.contains("5242880"), "got: {msg}");
    }

    #[test]
    fn inference_failure_display_with_status() {
        let e = CoverError::InferenceFailure {
            status: Some(503),
            detail: "overloaded".into(),
        };
        assert_eq!(e.to_string(), "Inference failure (HTTP 503): overloaded");
    }

    #[test]
    fn storage_failure_display_without_status() {
        let e = CoverError::StorageFailure {
            status: None,
            detail: "connection refused".into(),
        };
        assert_eq!(e.to_string(), "Storage failure: connection refused");
    }

    #[test]
    fn timeout_is_an_inference_failure() {
        let e = CoverError::InferenceTimeout { secs: 60 };
        assert_eq!(e.kind(), ErrorKind::InferenceFailure);
        assert!(e.is_timeout());
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn invalid_config_is_unconfigured() {
        let e = CoverError::InvalidConfig("timeout must be ≥ 1".into());
        assert_eq!(e.kind(), ErrorKind::Unconfigured);
    }

    #[test]
    fn client_error_classes() {
        assert!(ErrorKind::NoFile.is_client_error());
        assert!(ErrorKind::InvalidType.is_client_error());
        assert!(ErrorKind::TooLarge.is_client_error());
        assert!(ErrorKind::InvalidInput.is_client_error());
        assert!(!ErrorKind::Unconfigured.is_client_error());
        assert!(!ErrorKind::Unauthorized.is_client_error());
        assert!(!ErrorKind::StorageFailure.is_client_error());
        assert!(!ErrorKind::InferenceFailure.is_client_error());
    }

    #[test]
    fn unauthorized_reports_401() {
        let e = CoverError::Unauthorized {
            service: "openai".into(),
            status: 401,
            detail: "invalid key".into(),
        };
        assert_eq!(e.upstream_status(), Some(401));
        assert!(e.to_string().contains("openai"));
        assert!(e.to_string().contains("invalid key"));
    }
}
