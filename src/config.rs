//! Configuration types for rendering and recognition.
//!
//! Rendering is controlled by [`RenderConfig`], recognition by
//! [`RecognizerConfig`]. Both are plain values built via a builder and passed
//! explicitly into the pipeline; nothing below the CLI reads the process
//! environment except [`RecognizerConfig::from_env`].

use crate::error::FormulaError;
use crate::pipeline::auth::TokenCredential;
use crate::pipeline::llm::VisionBackend;
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use reqwest::Url;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Environment variable holding the Azure OpenAI resource endpoint.
pub const ENV_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
/// Environment variable holding the deployment (model) name.
pub const ENV_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";
/// Environment variable overriding the REST API version.
pub const ENV_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";

/// API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "2024-02-15-preview";

/// `.env` is read at most once per process, on first use.
static DOTENV: Lazy<Option<PathBuf>> = Lazy::new(|| dotenvy::dotenv().ok());

// ── Rendering ────────────────────────────────────────────────────────────

/// Configuration for SVG → PNG rendering.
///
/// # Example
/// ```rust
/// use edgequake_formula::RenderConfig;
///
/// let config = RenderConfig::builder().scale(2.0).build().unwrap();
/// assert_eq!(config.scale, 2.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    /// Uniform scale applied to the SVG's intrinsic size. Default: 1.0.
    pub scale: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check the invariants `build()` enforces. Public fields can be set
    /// directly, so the pipeline re-validates before rendering.
    pub fn validate(&self) -> Result<(), FormulaError> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(FormulaError::InvalidConfig(format!(
                "scale must be a positive number, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn scale(mut self, scale: f32) -> Self {
        self.config.scale = scale;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, FormulaError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Recognition ──────────────────────────────────────────────────────────

/// Configuration for PNG → LaTeX recognition.
///
/// Built via [`RecognizerConfig::builder()`], [`RecognizerConfig::from_env()`]
/// or [`RecognizerConfig::from_lookup()`].
///
/// # Example
/// ```rust
/// use edgequake_formula::RecognizerConfig;
///
/// let config = RecognizerConfig::builder()
///     .endpoint("https://my-resource.openai.azure.com/")
///     .deployment("gpt-4o")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_tokens, 512);
/// ```
#[derive(Clone)]
pub struct RecognizerConfig {
    /// Azure OpenAI resource endpoint, e.g. `https://<resource>.openai.azure.com/`.
    pub endpoint: Option<String>,

    /// Deployment name of the vision model on that resource.
    pub deployment: Option<String>,

    /// REST API version query parameter. Default: `2024-02-15-preview`.
    pub api_version: String,

    /// Sampling temperature. Default: 0.0 (deterministic transcription).
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 512.
    ///
    /// A single formula rarely exceeds a hundred tokens of LaTeX.
    pub max_tokens: u32,

    /// Custom system prompt. If None, uses [`crate::prompts::DEFAULT_SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    /// Custom user instruction. If None, uses [`crate::prompts::DEFAULT_USER_PROMPT`].
    pub user_prompt: Option<String>,

    /// Whole-request timeout in seconds. None keeps the HTTP client default.
    pub request_timeout_secs: Option<u64>,

    /// Pre-constructed backend. Takes precedence over endpoint/deployment.
    pub backend: Option<Arc<dyn VisionBackend>>,

    /// Pre-constructed credential. If None, the default ambient chain is used.
    pub credential: Option<Arc<dyn TokenCredential>>,

    /// Per-file events during batch recognition. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            temperature: 0.0,
            max_tokens: 512,
            system_prompt: None,
            user_prompt: None,
            request_timeout_secs: None,
            backend: None,
            credential: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RecognizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizerConfig")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("credential", &self.credential.as_ref().map(|_| "<dyn TokenCredential>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

/// Fully resolved Azure OpenAI target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureTarget {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
}

impl AzureTarget {
    /// Chat-completions URL for this deployment.
    ///
    /// The deployment is appended as a single path segment and the API
    /// version as a query pair, both percent-encoded.
    pub fn chat_completions_url(&self) -> Result<Url, FormulaError> {
        let invalid = |detail: String| {
            FormulaError::InvalidConfig(format!("invalid endpoint '{}': {}", self.endpoint, detail))
        };

        let mut url = Url::parse(self.endpoint.trim()).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("not a base URL".into()))?
            .pop_if_empty()
            .extend([
                "openai",
                "deployments",
                self.deployment.as_str(),
                "chat",
                "completions",
            ]);
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }
}

impl RecognizerConfig {
    /// Create a new builder for `RecognizerConfig`.
    pub fn builder() -> RecognizerConfigBuilder {
        RecognizerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Continue building from an existing configuration, e.g. one loaded
    /// from the environment that the CLI then overrides.
    pub fn into_builder(self) -> RecognizerConfigBuilder {
        RecognizerConfigBuilder { config: self }
    }

    /// Read endpoint, deployment and API version from the process environment.
    ///
    /// A `.env` file in the working directory (or any parent) is loaded into
    /// the environment the first time this is called; variables already set
    /// in the environment win.
    pub fn from_env() -> Self {
        match Lazy::force(&DOTENV) {
            Some(path) => debug!("Loaded environment from {}", path.display()),
            None => debug!("No .env file found"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Empty and whitespace-only values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            endpoint: get(ENV_ENDPOINT),
            deployment: get(ENV_DEPLOYMENT),
            api_version: get(ENV_API_VERSION).unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            ..Self::default()
        }
    }

    /// Resolve endpoint and deployment, or report which ones are missing.
    pub fn resolve_target(&self) -> Result<AzureTarget, FormulaError> {
        match (non_empty(&self.endpoint), non_empty(&self.deployment)) {
            (Some(endpoint), Some(deployment)) => Ok(AzureTarget {
                endpoint: endpoint.to_string(),
                deployment: deployment.to_string(),
                api_version: self.api_version.clone(),
            }),
            (None, None) => Err(FormulaError::MissingConfiguration {
                missing: "endpoint and deployment".into(),
            }),
            (None, Some(_)) => Err(FormulaError::MissingConfiguration {
                missing: "endpoint".into(),
            }),
            (Some(_), None) => Err(FormulaError::MissingConfiguration {
                missing: "deployment".into(),
            }),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Builder for [`RecognizerConfig`].
pub struct RecognizerConfigBuilder {
    config: RecognizerConfig,
}

impl fmt::Debug for RecognizerConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizerConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl RecognizerConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    pub fn deployment(mut self, deployment: impl Into<String>) -> Self {
        self.config.deployment = Some(deployment.into());
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

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.user_prompt = Some(prompt.into());
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.config.credential = Some(credential);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Missing endpoint/deployment is *not* an error here; it is reported by
    /// [`RecognizerConfig::resolve_target`] when a request is about to be made.
    pub fn build(self) -> Result<RecognizerConfig, FormulaError> {
        let c = &self.config;
        if let Some(endpoint) = non_empty(&c.endpoint) {
            if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
                return Err(FormulaError::InvalidConfig(format!(
                    "endpoint must be an http(s) URL, got '{endpoint}'"
                )));
            }
        }
        if c.max_tokens == 0 {
            return Err(FormulaError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_version.trim().is_empty() {
            return Err(FormulaError::InvalidConfig("api_version must not be empty".into()));
        }
        Ok(self.config)
    }
}
