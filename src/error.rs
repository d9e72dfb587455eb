//! Error types for the bimview library.
//!
//! Every pipeline step has its own error type so the controller can tell a
//! bad file selection from a dead backend from a failed translation:
//!
//! * [`ValidationError`] — the selected file is rejected before any network
//!   traffic. The user corrects the selection.
//! * [`TransferError`] — one backend round trip failed. A client-side timeout
//!   is kept apart from a server-reported failure.
//! * [`TranslationError`] — the backend job failed, or never finished within
//!   the polling budget.
//! * [`RenderError`] — the viewer engine could not show the document.
//! * [`viewer_runtime::LoadError`] — the viewer runtime could not be loaded.
//!
//! All of them are folded into [`PipelineError`] at the controller boundary,
//! where they become a log entry and a `failed` job status.

use thiserror::Error;

pub use viewer_runtime::LoadError;

/// All errors a pipeline run can end with.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Selection errors ──────────────────────────────────────────────────
    /// `run` was called with no file selected.
    #[error("No file selected.\nPick an .rvt, .ifc, .step or .stp file first.")]
    NoFileSelected,

    /// `run` was called while another run of the same pipeline is in flight.
    #[error("A job is already in progress ({status}); select a new file to restart")]
    Busy { status: String },

    /// The selected file failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // ── Backend errors ────────────────────────────────────────────────────
    /// Fetching a server-side file handed over by another panel failed.
    #[error("Could not fetch '{path}' from the model API: {source}")]
    Handoff {
        path: String,
        #[source]
        source: TransferError,
    },

    /// Uploading the source file failed.
    #[error("Upload failed: {0}")]
    Upload(#[source] TransferError),

    /// The backend translation job did not succeed.
    #[error(transparent)]
    Translation(#[from] TranslationError),

    /// Fetching the viewer access token failed.
    #[error("Could not obtain a viewer access token: {0}")]
    Authorization(#[source] TransferError),

    /// Fetching the translated derivative failed.
    #[error("Download failed: {0}")]
    Download(#[source] TransferError),

    /// An operation needs a remote id but the job has none yet.
    #[error("The current job has not been uploaded yet")]
    NotUploaded,

    // ── Viewer errors ─────────────────────────────────────────────────────
    /// The viewer runtime could not be loaded.
    #[error("Viewer runtime unavailable: {0}")]
    Runtime(#[from] LoadError),

    /// The viewer engine failed to show the document.
    #[error(transparent)]
    Render(#[from] RenderError),

    // ── Lifecycle ─────────────────────────────────────────────────────────
    /// The job was reset (new file selected or pipeline unmounted) while
    /// this run was waiting on the network. Its results were discarded.
    #[error("Job was superseded by a newer selection; result discarded")]
    Superseded,

    /// The pipeline was unmounted; it accepts no further work.
    #[error("Pipeline has been unmounted")]
    Unmounted,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Writing a downloaded derivative failed.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rejection of a selected file before upload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Revit family files are recognised but cannot be translated alone.
    #[error(
        "'{file}' is a Revit family (.rfa). Families cannot be viewed on their own:\n\
load the family into a project and upload the project's .rvt file instead."
    )]
    FamilyFile { file: String },

    /// The extension is not one the pipeline accepts.
    #[error("'{file}' has unsupported extension '{extension}'. Supported: {supported}")]
    UnsupportedExtension {
        file: String,
        extension: String,
        supported: String,
    },

    /// The file has no extension at all.
    #[error("'{file}' has no file extension. Supported: {supported}")]
    MissingExtension { file: String, supported: String },

    /// Zero-byte files are never worth a round trip.
    #[error("'{file}' is empty")]
    EmptyFile { file: String },
}

/// Failure of a single backend round trip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The call exceeded its client-side time bound.
    #[error("{op} timed out after {secs}s")]
    TimedOut { op: &'static str, secs: u64 },

    /// The backend answered with a non-success HTTP status.
    #[error("{op} returned HTTP {status}: {body}")]
    Server {
        op: &'static str,
        status: u16,
        body: String,
    },

    /// Connection-level failure (refused, reset, DNS…).
    #[error("{op} failed: {reason}")]
    Network { op: &'static str, reason: String },

    /// The response body could not be understood.
    #[error("{op} returned an unexpected response: {reason}")]
    Decode { op: &'static str, reason: String },

    /// The request could not be built (bad base URL, bad path).
    #[error("{op}: invalid request URL: {reason}")]
    InvalidUrl { op: &'static str, reason: String },
}

impl TransferError {
    /// `true` when retrying the same call later might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::TimedOut { .. } | TransferError::Network { .. } => true,
            TransferError::Server { status, .. } => *status >= 500 || *status == 429,
            TransferError::Decode { .. } | TransferError::InvalidUrl { .. } => false,
        }
    }
}

/// Outcome of a translation job that did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranslationError {
    /// The backend reported the job as failed.
    #[error("Translation failed{}", detail_suffix(.detail))]
    Failed { detail: Option<String> },

    /// The job was still pending when the polling budget ran out.
    #[error("Translation timed out after {attempts} status checks (~{waited_secs}s)")]
    TimedOut { attempts: u32, waited_secs: u64 },

    /// The status endpoint kept failing at the transport level.
    #[error("Status endpoint unreachable after {consecutive} consecutive failures: {last}")]
    Unreachable {
        consecutive: u32,
        #[source]
        last: TransferError,
    },

    /// The status endpoint returned something that is not worth retrying.
    #[error("Status check failed: {0}")]
    Status(#[source] TransferError),

    /// The owning job was superseded; polling stopped early.
    #[error("Polling abandoned")]
    Abandoned,
}

/// Failure of the viewer engine to show a document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// The engine could not be initialised or started on the surface.
    #[error("Viewer failed to start on surface '{surface}': {reason}")]
    StartFailed { surface: String, reason: String },

    /// The engine could not load the translated document.
    #[error("Viewer could not load document '{document}': {reason}")]
    DocumentLoadFailed { document: String, reason: String },

    /// The document loaded but contains no geometry to display.
    #[error("Document '{document}' has no viewable geometry")]
    NoViewable { document: String },

    /// The chosen viewable failed to load.
    #[error("Viewer could not load viewable '{viewable}': {reason}")]
    ViewableLoadFailed { viewable: String, reason: String },
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) if !d.is_empty() => format!(": {d}"),
        _ => String::new(),
    }
}

impl RenderError {
    /// `NoViewable` ends the pipeline in `ready`; everything else in `failed`.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RenderError::NoViewable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_file_guidance_mentions_rvt() {
        let e = ValidationError::FamilyFile {
            file: "door.rfa".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("door.rfa"), "got: {msg}");
        assert!(msg.contains(".rvt"), "got: {msg}");
    }

    #[test]
    fn timeout_differs_from_server_failure() {
        let t = TransferError::TimedOut {
            op: "upload",
            secs: 1800,
        };
        let s = TransferError::Server {
            op: "upload",
            status: 500,
            body: "disk full".into(),
        };
        assert!(t.to_string().contains("timed out after 1800s"));
        assert!(s.to_string().contains("disk full"));
        assert_ne!(t, s);
    }

    #[test]
    fn transient_classification() {
        assert!(TransferError::Network {
            op: "status",
            reason: "reset".into()
        }
        .is_transient());
        assert!(TransferError::Server {
            op: "status",
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!TransferError::Server {
            op: "status",
            status: 404,
            body: String::new()
        }
        .is_transient());
        assert!(!TransferError::Decode {
            op: "status",
            reason: "eof".into()
        }
        .is_transient());
    }

    #[test]
    fn translation_failed_display_with_and_without_detail() {
        let with = TranslationError::Failed {
            detail: Some("Revit 2026 not supported".into()),
        };
        assert_eq!(
            with.to_string(),
            "Translation failed: Revit 2026 not supported"
        );
        let without = TranslationError::Failed { detail: None };
        assert_eq!(without.to_string(), "Translation failed");
    }

    #[test]
    fn no_viewable_is_not_fatal() {
        assert!(!RenderError::NoViewable {
            document: "urn:u1".into()
        }
        .is_fatal());
        assert!(RenderError::DocumentLoadFailed {
            document: "urn:u1".into(),
            reason: "404".into()
        }
        .is_fatal());
    }

    #[test]
    fn upload_error_carries_server_text() {
        let e = PipelineError::Upload(TransferError::Server {
            op: "upload",
            status: 413,
            body: "file too large".into(),
        });
        assert!(e.to_string().contains("file too large"));
    }
}
