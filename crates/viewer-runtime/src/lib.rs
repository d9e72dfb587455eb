//! # viewer-runtime
//!
//! Load the third-party 3D viewer SDK runtime **once per process** and share
//! the outcome between every pipeline that needs it.
//!
//! ## How it works
//!
//! On first call to [`RuntimeLoader::ensure_loaded`]:
//!
//! 1. The loader takes its acquisition lock and finds no load in flight.
//! 2. It asks its [`RuntimeSource`] to inject the runtime and stores the
//!    resulting future as a [`Shared`] future.
//! 3. Every caller, concurrent or later, awaits a clone of that same future.
//!
//! A *successful* load stays memoized for the lifetime of the loader. A
//! *failed* load is only shared with the callers that joined that attempt;
//! once it settles the slot is cleared so the next call retries.
//!
//! The default source, [`HttpRuntimeSource`], downloads the viewer script
//! (e.g. `viewer3D.min.js`) and caches it on disk:
//!
//! - **macOS**: `~/Library/Caches/bimview/viewer-runtime/`
//! - **Linux**: `~/.cache/bimview/viewer-runtime/`
//! - **Windows**: `%LOCALAPPDATA%\bimview\viewer-runtime\`
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), viewer_runtime::LoadError> {
//! let loader = viewer_runtime::global();
//! let asset = loader.ensure_loaded().await?;
//! println!("viewer runtime at {}", asset.path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment variable overrides
//!
//! - `VIEWER_RUNTIME_URL` — URL of the runtime script used by [`global`].
//! - `VIEWER_RUNTIME_CACHE_DIR` — override the default cache directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Public constants ─────────────────────────────────────────────────────────

/// Viewer SDK runtime script used when `VIEWER_RUNTIME_URL` is not set.
pub const DEFAULT_RUNTIME_URL: &str =
    "https://developer.api.autodesk.com/modelderivative/v2/viewers/7.*/viewer3D.min.js";

/// Upper bound on a single runtime download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned while loading the viewer runtime.
///
/// `Clone` because one failed attempt is handed to every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The runtime URL is not a valid HTTP/HTTPS URL.
    #[error("Invalid viewer runtime URL '{0}'")]
    InvalidUrl(String),

    /// Network fetch of the runtime asset failed.
    #[error("Failed to download viewer runtime from '{url}': {reason}")]
    Download { url: String, reason: String },

    /// The asset server answered with a non-success status.
    #[error("Viewer runtime download returned HTTP {status} for '{url}'")]
    Http { url: String, status: u16 },

    /// The asset downloaded but was empty.
    #[error("Viewer runtime downloaded from '{url}' is empty")]
    EmptyAsset { url: String },

    /// Could not create or write the local cache.
    #[error("Viewer runtime cache error at '{path}': {reason}")]
    Cache { path: PathBuf, reason: String },
}

// ── Runtime asset ────────────────────────────────────────────────────────────

/// A viewer runtime that is present on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeAsset {
    /// Where the runtime came from.
    pub url: String,
    /// On-disk location of the cached script.
    pub path: PathBuf,
    /// Size of the script in bytes.
    pub size_bytes: u64,
    /// `true` when the asset was found in the cache instead of downloaded.
    pub from_cache: bool,
}

/// Something that can put the viewer runtime into the process.
///
/// The loader invokes [`RuntimeSource::inject`] at most once per attempt.
#[async_trait]
pub trait RuntimeSource: Send + Sync {
    async fn inject(&self) -> Result<RuntimeAsset, LoadError>;
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the cache directory used for downloaded runtimes.
///
/// Override by setting `VIEWER_RUNTIME_CACHE_DIR`.
pub fn runtime_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("VIEWER_RUNTIME_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("bimview").join("viewer-runtime")
}

/// Map a runtime URL to a stable file name inside the cache directory.
///
/// Version wildcards such as `7.*` are kept apart from other versions.
fn cache_file_name(url: &str) -> String {
    let mut name: String = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    if name.is_empty() {
        name.push_str("viewer-runtime.js");
    }
    name
}

// ── HTTP source ──────────────────────────────────────────────────────────────

/// Downloads the runtime script over HTTP and keeps a copy on disk.
#[derive(Debug, Clone)]
pub struct HttpRuntimeSource {
    url: String,
    cache_dir: PathBuf,
}

impl HttpRuntimeSource {
    /// Source for `url`, cached under [`runtime_cache_dir`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cache_dir: runtime_cache_dir(),
        }
    }

    /// Source using `VIEWER_RUNTIME_URL`, falling back to [`DEFAULT_RUNTIME_URL`].
    pub fn from_env() -> Self {
        let url = std::env::var("VIEWER_RUNTIME_URL")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_RUNTIME_URL.to_string());
        Self::new(url)
    }

    /// Use a different cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Path the runtime is (or will be) cached at.
    pub fn cached_path(&self) -> PathBuf {
        self.cache_dir.join(cache_file_name(&self.url))
    }
}

#[async_trait]
impl RuntimeSource for HttpRuntimeSource {
    async fn inject(&self) -> Result<RuntimeAsset, LoadError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(LoadError::InvalidUrl(self.url.clone()));
        }

        let path = self.cached_path();

        // 1. Already cached on disk.
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.is_file() && meta.len() > 0 {
                debug!("Viewer runtime cache hit: {}", path.display());
                return Ok(RuntimeAsset {
                    url: self.url.clone(),
                    path,
                    size_bytes: meta.len(),
                    from_cache: true,
                });
            }
        }

        // 2. Download and write into the cache.
        info!("Downloading viewer runtime from {}", self.url);
        let bytes = download_bytes(&self.url).await?;
        write_cache(&self.cache_dir, &path, &bytes).await?;

        info!(
            "Viewer runtime cached at {} ({} bytes)",
            path.display(),
            bytes.len()
        );
        Ok(RuntimeAsset {
            url: self.url.clone(),
            path,
            size_bytes: bytes.len() as u64,
            from_cache: false,
        })
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<RuntimeAsset>, LoadError>>>;

#[derive(Default)]
struct Slot {
    /// Bumped on every new attempt and on reset.
    attempt: u64,
    pending: Option<LoadFuture>,
}

/// Memoizes the in-flight or completed load of the viewer runtime.
pub struct RuntimeLoader {
    source: Arc<dyn RuntimeSource>,
    slot: Mutex<Slot>,
    injections: AtomicUsize,
}

impl std::fmt::Debug for RuntimeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeLoader")
            .field("source", &"<dyn RuntimeSource>")
            .field("injections", &self.injections())
            .finish()
    }
}

impl RuntimeLoader {
    pub fn new(source: Arc<dyn RuntimeSource>) -> Self {
        Self {
            source,
            slot: Mutex::new(Slot::default()),
            injections: AtomicUsize::new(0),
        }
    }

    /// Ensure the runtime is loaded, sharing one attempt between all callers.
    ///
    /// # Thread safety
    ///
    /// Safe to call from many tasks at once; the source is invoked only by
    /// the caller that finds the slot empty.
    pub async fn ensure_loaded(&self) -> Result<Arc<RuntimeAsset>, LoadError> {
        let (attempt, load) = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.pending.as_ref() {
                Some(load) => (slot.attempt, load.clone()),
                None => {
                    slot.attempt += 1;
                    self.injections.fetch_add(1, Ordering::SeqCst);
                    debug!("Injecting viewer runtime (attempt {})", slot.attempt);

                    let source = Arc::clone(&self.source);
                    let load = async move { source.inject().await.map(Arc::new) }
                        .boxed()
                        .shared();
                    slot.pending = Some(load.clone());
                    (slot.attempt, load)
                }
            }
        };

        let outcome = load.await;

        if let Err(ref e) = outcome {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            // Only forget our own attempt; a reset or newer attempt wins.
            if slot.attempt == attempt && slot.pending.is_some() {
                warn!("Viewer runtime load failed, next call will retry: {e}");
                slot.pending = None;
            }
        }

        outcome
    }

    /// `true` once a load has completed successfully.
    pub fn is_loaded(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        matches!(
            slot.pending.as_ref().and_then(|load| load.peek()),
            Some(Ok(_))
        )
    }

    /// Number of times the runtime source has been invoked.
    pub fn injections(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }

    /// Forget any memoized load so the next call injects again.
    ///
    /// Callers already awaiting the previous attempt still receive its outcome.
    pub fn reset(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.attempt += 1;
        slot.pending = None;
        debug!("Viewer runtime loader reset");
    }
}

// ── Process-wide singleton ───────────────────────────────────────────────────

static GLOBAL: OnceLock<Arc<RuntimeLoader>> = OnceLock::new();

/// The process-wide loader, built from [`HttpRuntimeSource::from_env`] on first use.
pub fn global() -> Arc<RuntimeLoader> {
    Arc::clone(
        GLOBAL.get_or_init(|| Arc::new(RuntimeLoader::new(Arc::new(HttpRuntimeSource::from_env())))),
    )
}

// ── Internal helpers ─────────────────────────────────────────────────────────

async fn download_bytes(url: &str) -> Result<Vec<u8>, LoadError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("viewer-runtime/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| LoadError::Download {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| LoadError::Download {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !response.status().is_success() {
        return Err(LoadError::Http {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let bytes = response.bytes().await.map_err(|e| LoadError::Download {
        url: url.to_string(),
        reason: format!("Read error: {e}"),
    })?;

    if bytes.is_empty() {
        return Err(LoadError::EmptyAsset {
            url: url.to_string(),
        });
    }

    Ok(bytes.to_vec())
}

/// Write through a sibling temp file so a crash never leaves a truncated cache.
async fn write_cache(cache_dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), LoadError> {
    let cache_err = |e: std::io::Error| LoadError::Cache {
        path: dest.to_path_buf(),
        reason: e.to_string(),
    };

    tokio::fs::create_dir_all(cache_dir).await.map_err(cache_err)?;
    let tmp = dest.with_extension("part");
    tokio::fs::write(&tmp, bytes).await.map_err(cache_err)?;
    tokio::fs::rename(&tmp, dest).await.map_err(cache_err)?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
