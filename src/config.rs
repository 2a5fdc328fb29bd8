//! Configuration types for PII extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The config is cheap to clone and is
//! shared read-only by every extraction an extractor runs.

use crate::error::PiiError;
use crate::pipeline::llm::{CompletionOptions, ModelService};
use crate::progress::ProgressCallback;
use std::fmt;
use std::sync::Arc;

/// Default model when none is configured (OpenAI-compatible providers).
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Default Azure OpenAI REST API version; the first GA version with strict structured outputs.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Configuration for PII extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use pii_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .provider_name("azure")
///     .model("gpt-4o")
///     .endpoint("https://contoso.openai.azure.com")
///     .max_tokens(800)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Model identifier (OpenAI) or deployment name (Azure).
    /// If None, uses [`DEFAULT_MODEL`] or the deployment from the environment.
    pub model: Option<String>,

    /// Provider name: "openai" or "azure".
    /// If None along with `service`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed model service. Takes precedence over `provider_name`.
    pub service: Option<Arc<dyn ModelService>>,

    /// Base URL (OpenAI-compatible) or resource endpoint (Azure).
    pub endpoint: Option<String>,

    /// API key. If None, read from `OPENAI_API_KEY` / `AZURE_OPENAI_API_KEY`.
    pub api_key: Option<String>,

    /// Azure OpenAI REST API version. Ignored by other providers.
    pub api_version: String,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Extraction wants the same answer for the same document; any
    /// creativity only adds invented values.
    pub temperature: f32,

    /// Maximum completion tokens. Default: 1024.
    ///
    /// Eight short strings plus JSON punctuation rarely exceed 300 tokens;
    /// the headroom covers long postal addresses.
    pub max_tokens: usize,

    /// Timeout in seconds for the request to be accepted and the stream to start. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system instruction. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Media type declared for the image attachment. If None, derived from the file extension.
    pub media_type: Option<String>,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            service: None,
            endpoint: None,
            api_key: None,
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            temperature: 0.0,
            max_tokens: 1024,
            api_timeout_secs: 60,
            system_prompt: None,
            media_type: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("service", &self.service.as_ref().map(|s| s.name().to_string()))
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_version", &self.api_version)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("system_prompt", &self.system_prompt.as_ref().map(|p| p.len()))
            .field("media_type", &self.media_type)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Sampling options for the completion request.
    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn service(mut self, service: Arc<dyn ModelService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.config.api_version = version.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.config.media_type = Some(media_type.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, PiiError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(PiiError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(PiiError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        if let Some(ref mt) = c.media_type {
            if !mt.starts_with("image/") {
                return Err(PiiError::InvalidConfig(format!(
                    "media type must be an image/* type, got '{mt}'"
                )));
            }
        }
        if let Some(ref name) = c.provider_name {
            if !matches!(name.as_str(), "openai" | "azure") {
                return Err(PiiError::InvalidConfig(format!(
                    "unknown provider '{name}' (expected openai or azure)"
                )));
            }
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.max_tokens, 1024);
        assert_eq!(c.api_version, DEFAULT_AZURE_API_VERSION);
        let opts = c.completion_options();
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(1024));
    }

    #[test]
    fn temperature_is_clamped() {
        let c = ExtractionConfig::builder().temperature(7.5).build().unwrap();
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn build_rejects_bad_values() {
        assert!(ExtractionConfig::builder().max_tokens(0).build().is_err());
        assert!(ExtractionConfig::builder().api_timeout_secs(0).build().is_err());
        assert!(ExtractionConfig::builder()
            .media_type("application/pdf")
            .build()
            .is_err());
        assert!(ExtractionConfig::builder()
            .provider_name("gemini")
            .build()
            .is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ExtractionConfig::builder()
            .api_key("sk-very-secret")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-very-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
