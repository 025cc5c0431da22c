//! Configuration types for an image-question run.
//!
//! Every knob lives in [`AgentConfig`], built via [`AgentConfigBuilder`].
//! The config is read once at the composition root, where the HTTP client
//! and the model provider are constructed; a run never mutates it.

use crate::error::VqaError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Longest edge, in pixels, an image may have before it is downscaled.
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Smallest bounding box the builder accepts; lower values are raised to it.
pub const MIN_MAX_DIMENSION: u32 = 16;

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gemma3:27b";

/// Configuration for an [`crate::agent::ImageQaAgent`].
///
/// Built via [`AgentConfig::builder()`] or using [`AgentConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_vqa::AgentConfig;
///
/// let config = AgentConfig::builder()
///     .max_dimension(768)
///     .provider_name("ollama")
///     .model("gemma3:27b")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_dimension, 768);
/// ```
#[derive(Clone)]
pub struct AgentConfig {
    /// Bounding box (width and height) images are fitted inside. Default: 1024.
    ///
    /// Images already within the box are sent untouched; larger ones are
    /// downscaled so their longer edge equals this value.
    pub max_dimension: u32,

    /// Directory in which downloaded images and resized derivatives are
    /// created. Default: the OS temp directory.
    pub scratch_dir: PathBuf,

    /// Delimiter between locators in the `filename` field. Default: `,`.
    pub locator_separator: char,

    /// Number of locators fetched and normalised at once. Default: 1.
    ///
    /// 1 processes locators strictly in input order. Higher values overlap
    /// downloads; the images still reach the model in input order.
    pub concurrency: usize,

    /// Vision model identifier, e.g. "gemma3:27b", "gpt-4.1-mini".
    pub model: Option<String>,

    /// LLM provider name (e.g. "ollama", "openai", "anthropic").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate for the answer. Default: 1024.
    pub max_tokens: usize,

    /// HTTP client timeout for image downloads in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Custom instruction template. `{question}` is replaced with the
    /// question text. If None, uses [`crate::prompts::DEFAULT_QUESTION_TEMPLATE`].
    pub system_prompt: Option<String>,

    /// Emit a *failed* event when a run aborts. Default: true.
    pub emit_failure_event: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            scratch_dir: std::env::temp_dir(),
            locator_separator: ',',
            concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 1024,
            download_timeout_secs: 120,
            system_prompt: None,
            emit_failure_event: true,
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("max_dimension", &self.max_dimension)
            .field("scratch_dir", &self.scratch_dir)
            .field("locator_separator", &self.locator_separator)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("emit_failure_event", &self.emit_failure_event)
            .finish()
    }
}

impl AgentConfig {
    /// Create a new builder for `AgentConfig`.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AgentConfig`].
#[derive(Debug)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    /// Longest allowed edge. Values below [`MIN_MAX_DIMENSION`] are clamped
    /// up to it, so `build()` never sees an unusable box.
    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px.max(MIN_MAX_DIMENSION);
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    pub fn locator_separator(mut self, sep: char) -> Self {
        self.config.locator_separator = sep;
        self
    }

    /// Locators acquired at once. Zero is clamped to 1.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
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

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn emit_failure_event(mut self, v: bool) -> Self {
        self.config.emit_failure_event = v;
        self
    }

    /// Build the configuration, validating the settings the setters do not
    /// clamp (separator and download timeout).
    pub fn build(self) -> Result<AgentConfig, VqaError> {
        let c = &self.config;
        if c.locator_separator.is_whitespace() {
            return Err(VqaError::InvalidConfig(format!(
                "Locator separator cannot be whitespace, got {:?}",
                c.locator_separator
            )));
        }
        if c.download_timeout_secs == 0 {
            return Err(VqaError::InvalidConfig(
                "Download timeout must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}
