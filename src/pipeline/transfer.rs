//! Backend calls: upload, status, token, derivative download, formats.
//!
//! Each operation is a single request/response round trip with no retry of
//! its own. Retrying is the poller's job (status checks) or the user's job
//! (everything else). Every call carries a hard time bound; exceeding it is
//! reported as [`TransferError::TimedOut`], never as a server failure.
//!
//! | Call | Method & path |
//! |------|---------------|
//! | upload | `POST /upload-rvt` (multipart, field `file`) |
//! | status | `GET /status/{urn}` |
//! | token | `GET /token` |
//! | download | `GET /download/{urn}` |
//! | formats | `GET /supported-formats` |
//! | handoff | `GET {model_api}/download-step?path=…` |

use crate::config::PipelineConfig;
use crate::error::{PipelineError, TransferError};
use crate::job::SourceFile;
use crate::pipeline::validate::SupportedFormats;
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Name given to files fetched through the model API handoff.
pub const HANDOFF_FILE_NAME: &str = "pred.step";

/// Name used when the download response carries no usable file name.
pub const FALLBACK_DOWNLOAD_NAME: &str = "download";

static CONTENT_DISPOSITION_FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).unwrap());

// ── Wire types ───────────────────────────────────────────────────────────

/// Backend acknowledgement of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Server-assigned translation job id.
    pub urn: String,
    /// Size of the stored file as measured by the backend.
    #[serde(default)]
    pub file_size_mb: Option<f64>,
}

/// Translation job state reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Success,
    Failed,
}

/// One answer from the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub status: PollStatus,
    /// Free-text progress from the backend, e.g. `"45% complete"`.
    pub progress_hint: Option<String>,
}

impl PollOutcome {
    pub fn pending() -> Self {
        Self {
            status: PollStatus::Pending,
            progress_hint: None,
        }
    }

    pub fn success() -> Self {
        Self {
            status: PollStatus::Success,
            progress_hint: None,
        }
    }

    pub fn failed(hint: Option<&str>) -> Self {
        Self {
            status: PollStatus::Failed,
            progress_hint: hint.map(str::to_string),
        }
    }
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    progress: Option<serde_json::Value>,
}

/// Short-lived viewer credential. Never cached.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Deserialize)]
struct FormatsBody {
    supported_formats: SupportedFormats,
}

/// A translated model fetched from the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Derivative {
    pub filename: String,
    pub bytes: Bytes,
}

impl fmt::Debug for Derivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivative")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Derivative {
    /// Write the derivative into `dir`, atomically, and return its path.
    ///
    /// Only the final path component of the server-supplied name is used.
    pub fn save_into(&self, dir: impl AsRef<Path>) -> Result<PathBuf, PipelineError> {
        let dir = dir.as_ref();
        let name = Path::new(&self.filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty() && n != "..")
            .unwrap_or_else(|| FALLBACK_DOWNLOAD_NAME.to_string());
        let dest = dir.join(name);

        let write_err = |e: std::io::Error| PipelineError::OutputWriteFailed {
            path: dest.clone(),
            source: e,
        };

        std::fs::create_dir_all(dir).map_err(write_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        std::io::Write::write_all(&mut tmp, &self.bytes).map_err(write_err)?;
        tmp.persist(&dest).map_err(|e| write_err(e.error))?;

        info!("Saved derivative to {}", dest.display());
        Ok(dest)
    }
}

// ── Transfer seam ────────────────────────────────────────────────────────

/// The backend calls the pipeline needs.
///
/// [`HttpTransfer`] is the production implementation; tests substitute
/// scripted doubles.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Submit the source file; bounded by the upload timeout.
    async fn upload(&self, file: &SourceFile) -> Result<UploadReceipt, TransferError>;

    /// Ask for the state of a translation job.
    async fn poll_status(&self, remote_id: &str) -> Result<PollOutcome, TransferError>;

    /// Fetch a fresh viewer access token.
    async fn fetch_token(&self) -> Result<AccessToken, TransferError>;

    /// Download the translated model.
    async fn fetch_derivative(&self, remote_id: &str) -> Result<Derivative, TransferError>;

    /// Backend's list of supported formats. Best-effort.
    async fn fetch_supported_formats(&self) -> Result<SupportedFormats, TransferError>;

    /// Fetch a server-side file handed over by another panel.
    async fn fetch_source(&self, server_path: &str) -> Result<SourceFile, TransferError>;
}

// ── HTTP implementation ──────────────────────────────────────────────────

/// [`Transfer`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
    backend: Url,
    model_api: Option<Url>,
    request_timeout: Duration,
    upload_timeout: Duration,
}

impl HttpTransfer {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .user_agent(concat!("bimview/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("HTTP client: {e}")))?;

        let backend = parse_base(&config.backend_url)?;
        let model_api = config.model_api_url.as_deref().map(parse_base).transpose()?;

        Ok(Self {
            client,
            backend,
            model_api,
            request_timeout: config.request_timeout(),
            upload_timeout: config.upload_timeout(),
        })
    }

    fn endpoint(&self, op: &'static str, segments: &[&str]) -> Result<Url, TransferError> {
        let mut url = self.backend.clone();
        url.path_segments_mut()
            .map_err(|_| TransferError::InvalidUrl {
                op,
                reason: format!("'{}' cannot be a base", self.backend),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, op: &'static str, url: Url) -> Result<Response, TransferError> {
        debug!("{op}: GET {url}");
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| map_send_error(op, self.request_timeout, e))?;
        ensure_success(op, response, self.request_timeout).await
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn upload(&self, file: &SourceFile) -> Result<UploadReceipt, TransferError> {
        let url = self.endpoint("upload", &["upload-rvt"])?;
        info!("Uploading {} ({} bytes) to {}", file.name(), file.size_bytes(), url);

        let part = reqwest::multipart::Part::stream_with_length(file.data().clone(), file.size_bytes())
            .file_name(file.name().to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(url)
            .multipart(form)
            .timeout(self.upload_timeout)
            .send()
            .await
            .map_err(|e| map_send_error("upload", self.upload_timeout, e))?;
        let response = ensure_success("upload", response, self.upload_timeout).await?;
        read_json("upload", response, self.upload_timeout).await
    }

    async fn poll_status(&self, remote_id: &str) -> Result<PollOutcome, TransferError> {
        let url = self.endpoint("status", &["status", remote_id])?;
        let response = self.get("status", url).await?;
        let body: StatusBody = read_json("status", response, self.request_timeout).await?;

        let status = match body.status.to_ascii_lowercase().as_str() {
            "pending" => PollStatus::Pending,
            "success" => PollStatus::Success,
            "failed" => PollStatus::Failed,
            other => {
                return Err(TransferError::Decode {
                    op: "status",
                    reason: format!("unknown job status '{other}'"),
                })
            }
        };
        let progress_hint = body.progress.and_then(|v| match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

        Ok(PollOutcome {
            status,
            progress_hint,
        })
    }

    async fn fetch_token(&self) -> Result<AccessToken, TransferError> {
        let url = self.endpoint("token", &["token"])?;
        let response = self.get("token", url).await?;
        let token: AccessToken = read_json("token", response, self.request_timeout).await?;
        if token.access_token.is_empty() {
            return Err(TransferError::Decode {
                op: "token",
                reason: "empty access_token".into(),
            });
        }
        Ok(token)
    }

    async fn fetch_derivative(&self, remote_id: &str) -> Result<Derivative, TransferError> {
        let url = self.endpoint("download", &["download", remote_id])?;
        let response = self.get("download", url).await?;

        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .unwrap_or_else(|| FALLBACK_DOWNLOAD_NAME.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_send_error("download", self.request_timeout, e))?;

        Ok(Derivative { filename, bytes })
    }

    async fn fetch_supported_formats(&self) -> Result<SupportedFormats, TransferError> {
        let url = self.endpoint("formats", &["supported-formats"])?;
        let response = self.get("formats", url).await?;
        let body: FormatsBody = read_json("formats", response, self.request_timeout).await?;
        Ok(body.supported_formats)
    }

    async fn fetch_source(&self, server_path: &str) -> Result<SourceFile, TransferError> {
        let base = self.model_api.as_ref().ok_or_else(|| TransferError::InvalidUrl {
            op: "handoff",
            reason: "no model API URL configured".into(),
        })?;
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| TransferError::InvalidUrl {
                op: "handoff",
                reason: format!("'{base}' cannot be a base"),
            })?
            .pop_if_empty()
            .push("download-step");
        url.query_pairs_mut().append_pair("path", server_path);

        let response = self.get("handoff", url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_send_error("handoff", self.request_timeout, e))?;
        Ok(SourceFile::from_bytes(HANDOFF_FILE_NAME, bytes))
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn parse_base(url: &str) -> Result<Url, PipelineError> {
    Url::parse(url).map_err(|e| PipelineError::InvalidConfig(format!("'{url}': {e}")))
}

fn map_send_error(op: &'static str, bound: Duration, e: reqwest::Error) -> TransferError {
    if e.is_timeout() {
        TransferError::TimedOut {
            op,
            secs: bound.as_secs(),
        }
    } else if e.is_decode() {
        TransferError::Decode {
            op,
            reason: e.to_string(),
        }
    } else {
        TransferError::Network {
            op,
            reason: e.to_string(),
        }
    }
}

/// Turn a non-success status into [`TransferError::Server`] with the body text.
async fn ensure_success(
    op: &'static str,
    response: Response,
    bound: Duration,
) -> Result<Response, TransferError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .map_err(|e| map_send_error(op, bound, e))?;
    Err(TransferError::Server {
        op,
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

async fn read_json<T: DeserializeOwned>(
    op: &'static str,
    response: Response,
    bound: Duration,
) -> Result<T, TransferError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| map_send_error(op, bound, e))?;
    serde_json::from_slice(&bytes).map_err(|e| TransferError::Decode {
        op,
        reason: e.to_string(),
    })
}

/// Extract the file name from a `Content-Disposition` header value.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    CONTENT_DISPOSITION_FILENAME
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_quoted_and_bare() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="tower.svf.zip""#).as_deref(),
            Some("tower.svf.zip")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=model.obj").as_deref(),
            Some("model.obj")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename*=UTF-8''plan%20A.ifc").as_deref(),
            Some("plan%20A.ifc")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn endpoint_encodes_urn_and_keeps_base_path() {
        let config = PipelineConfig::builder()
            .backend_url("http://backend.local:8001/api/")
            .build()
            .unwrap();
        let t = HttpTransfer::new(&config).unwrap();
        let url = t.endpoint("status", &["status", "dXJu/Oj=="]).unwrap();
        assert_eq!(url.as_str(), "http://backend.local:8001/api/status/dXJu%2FOj==");
    }

    #[test]
    fn token_debug_is_redacted() {
        let t = AccessToken {
            access_token: "secret".into(),
            expires_in: Some(3599),
        };
        assert!(!format!("{t:?}").contains("secret"));
    }

    #[test]
    fn save_into_strips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let d = Derivative {
            filename: "../../etc/model.zip".into(),
            bytes: Bytes::from_static(b"PK"),
        };
        let path = d.save_into(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("model.zip"));
        assert_eq!(std::fs::read(path).unwrap(), b"PK");
    }
}
