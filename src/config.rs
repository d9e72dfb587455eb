//! Configuration for the upload → translate → authorize → render pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`]. Defaults match the values the backend
//! and viewer were tuned against; override only what your deployment needs.

use crate::error::PipelineError;
use crate::progress::ObserverRef;
use std::fmt;
use std::time::Duration;

/// Configuration for a [`crate::Pipeline`].
///
/// # Example
/// ```rust
/// use bimview::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .backend_url("http://10.0.0.5:8001")
///     .poll_interval_ms(1500)
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_max_attempts, 120);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Base URL of the conversion backend (`/upload-rvt`, `/status/{urn}`…).
    /// Default: `http://localhost:8001`.
    pub backend_url: String,

    /// Base URL of the model API that serves files handed over by other
    /// panels (`/download-step?path=…`). Default: none (handoff disabled).
    pub model_api_url: Option<String>,

    /// Base URL of the derivative service the headless manifest engine reads
    /// `{urn}/manifest` from.
    pub derivative_api_url: String,

    /// Display surface the viewer engine binds to. Default: `"forge"`.
    pub surface: String,

    /// Wall-clock bound on the whole upload request in seconds. Default: 1800.
    ///
    /// Large Revit models take a long time to upload over slow links; the
    /// bound exists so a hung connection eventually surfaces as an error.
    pub upload_timeout_secs: u64,

    /// Bound on every other backend call in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Delay before each translation status check, in milliseconds. Default: 3000.
    pub poll_interval_ms: u64,

    /// Number of status checks before giving up. Default: 120 (~6 minutes).
    pub poll_max_attempts: u32,

    /// Consecutive transient status-check failures tolerated. Default: 3.
    pub poll_error_tolerance: u32,

    /// Files above this size (MiB) get a non-fatal warning. Default: 100.
    pub large_file_warning_mb: u64,

    /// Viewer environment passed to the engine initializer. Default: `AutodeskProduction`.
    pub engine_env: String,

    /// Viewer API flavour passed to the engine initializer. Default: `derivativeV2`.
    pub engine_api: String,

    /// Receives status, progress and log events.
    pub observer: Option<ObserverRef>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8001".to_string(),
            model_api_url: None,
            derivative_api_url: "https://developer.api.autodesk.com/modelderivative/v2/designdata"
                .to_string(),
            surface: "forge".to_string(),
            upload_timeout_secs: 30 * 60,
            request_timeout_secs: 60,
            poll_interval_ms: 3000,
            poll_max_attempts: 120,
            poll_error_tolerance: 3,
            large_file_warning_mb: 100,
            engine_env: "AutodeskProduction".to_string(),
            engine_api: "derivativeV2".to_string(),
            observer: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("backend_url", &self.backend_url)
            .field("model_api_url", &self.model_api_url)
            .field("derivative_api_url", &self.derivative_api_url)
            .field("surface", &self.surface)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("poll_max_attempts", &self.poll_max_attempts)
            .field("poll_error_tolerance", &self.poll_error_tolerance)
            .field("large_file_warning_mb", &self.large_file_warning_mb)
            .field("engine_env", &self.engine_env)
            .field("engine_api", &self.engine_api)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Soft size threshold in bytes.
    pub fn large_file_warning_bytes(&self) -> u64 {
        self.large_file_warning_mb * 1024 * 1024
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.config.backend_url = url.into();
        self
    }

    pub fn model_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.model_api_url = Some(url.into());
        self
    }

    pub fn derivative_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.derivative_api_url = url.into();
        self
    }

    pub fn surface(mut self, surface: impl Into<String>) -> Self {
        self.config.surface = surface.into();
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs.max(1);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn poll_max_attempts(mut self, n: u32) -> Self {
        self.config.poll_max_attempts = n;
        self
    }

    pub fn poll_error_tolerance(mut self, n: u32) -> Self {
        self.config.poll_error_tolerance = n;
        self
    }

    pub fn large_file_warning_mb(mut self, mb: u64) -> Self {
        self.config.large_file_warning_mb = mb;
        self
    }

    pub fn engine_env(mut self, env: impl Into<String>) -> Self {
        self.config.engine_env = env.into();
        self
    }

    pub fn engine_api(mut self, api: impl Into<String>) -> Self {
        self.config.engine_api = api.into();
        self
    }

    pub fn observer(mut self, observer: ObserverRef) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        check_http_url("backend_url", &c.backend_url)?;
        check_http_url("derivative_api_url", &c.derivative_api_url)?;
        if let Some(ref url) = c.model_api_url {
            check_http_url("model_api_url", url)?;
        }
        if c.surface.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "surface id must not be empty".into(),
            ));
        }
        if c.poll_max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "poll_max_attempts must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

fn check_http_url(field: &str, url: &str) -> Result<(), PipelineError> {
    match reqwest::Url::parse(url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
        Ok(u) => Err(PipelineError::InvalidConfig(format!(
            "{field} must be http(s), got scheme '{}'",
            u.scheme()
        ))),
        Err(e) => Err(PipelineError::InvalidConfig(format!(
            "{field} '{url}' is not a valid URL: {e}"
        ))),
    }
}
