//! Configuration for the inference side of a cover scan.
//!
//! All tunables of the completion call live in [`ScanConfig`], built via
//! [`ScanConfigBuilder`]. The response token ceiling is not one of them; it
//! is fixed at [`crate::prompts::MAX_RESPONSE_TOKENS`].
//!
//! The library never reads environment variables itself; binaries map their
//! `clap` arguments (with `env` fallbacks) onto the builder.
//!
//! Storage and identity collaborators are configured through their own
//! constructors, since the orchestrator receives them already built.

use crate::error::CoverError;
use std::fmt;

/// Default OpenAI-compatible API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Default vision-capable model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Configuration for the vision completion call.
///
/// # Example
/// ```rust
/// use coverscan::ScanConfig;
///
/// let config = ScanConfig::builder()
///     .api_key("sk-test")
///     .model("gpt-4o-mini")
///     .api_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.model, "gpt-4o-mini");
/// ```
#[derive(Clone)]
pub struct ScanConfig {
    /// Bearer credential for the completion service. `None` means
    /// unconfigured; every scan then fails with `ErrorKind::Unconfigured`
    /// before any network call.
    pub api_key: Option<String>,

    /// API root, without the `/chat/completions` suffix.
    /// Default: `https://api.openai.com/v1`.
    pub api_base_url: String,

    /// Model identifier. Default: `gpt-4o`.
    pub model: String,

    /// Per-call timeout in seconds. Default: 60.
    ///
    /// The completion service offers no cancellation, so the client bounds
    /// the round-trip itself and reports expiry as a timeout-flavoured
    /// inference failure.
    pub api_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("model", &self.model)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl ScanConfig {
    /// Create a new builder for `ScanConfig`.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder {
            config: Self::default(),
        }
    }

    /// `true` when a non-blank API key is present.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Full URL of the chat-completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base_url.trim_end_matches('/'))
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Set or clear the key from an optional source such as a CLI flag.
    pub fn maybe_api_key(mut self, key: Option<String>) -> Self {
        self.config.api_key = key;
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScanConfig, CoverError> {
        let c = &self.config;
        if c.api_timeout_secs == 0 {
            return Err(CoverError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(CoverError::InvalidConfig("model must not be empty".into()));
        }
        if url::Url::parse(&c.api_base_url).is_err() {
            return Err(CoverError::InvalidConfig(format!(
                "API base URL '{}' is not an absolute URL",
                c.api_base_url
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.api_timeout_secs, 60);
        assert_eq!(config.model, "gpt-4o");
        assert!(!config.has_api_key());
    }

    #[test]
    fn completions_url_tolerates_trailing_slash() {
        let config = ScanConfig::builder()
            .api_base_url("http://localhost:8080/v1/")
            .build()
            .unwrap();
        assert_eq!(
            config.completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn blank_key_is_not_configured() {
        let config = ScanConfig::builder().api_key("   ").build().unwrap();
        assert!(!config.has_api_key());
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = ScanConfig::builder().api_timeout_secs(0).build().unwrap_err();
        assert!(matches!(err, CoverError::InvalidConfig(_)));
    }

    #[test]
    fn relative_base_url_rejected() {
        let err = ScanConfig::builder()
            .api_base_url("api.openai.com/v1")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }

    #[test]
    fn debug_redacts_key() {
        let config = ScanConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
