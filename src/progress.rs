//! Progress checkpoints and the observer trait for pipeline events.
//!
//! Upload progress is not observable through the transfer call, and the
//! backend does not report a percentage for translation jobs. The bar a user
//! sees is therefore driven by fixed checkpoints, kept here as named
//! constants so they can be tuned without touching pipeline logic.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::PipelineConfigBuilder::observer`] to receive events as
//! the pipeline moves through its steps.
//!
//! # Example
//!
//! ```rust
//! use bimview::{JobStatus, PipelineConfig, PipelineObserver};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl PipelineObserver for Printer {
//!     fn on_status(&self, status: JobStatus) {
//!         eprintln!("now {status}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .observer(Arc::new(Printer) as Arc<dyn PipelineObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::job::{JobStatus, LogEntry};
use std::sync::Arc;

/// Progress shown as soon as a valid file starts uploading.
pub const PROGRESS_UPLOAD_QUEUED: u8 = 10;
/// Progress once the upload request is on the wire.
pub const PROGRESS_UPLOAD_SENT: u8 = 20;
/// Progress once the backend acknowledged the upload.
pub const PROGRESS_UPLOADED: u8 = 50;
/// Lower end of the band the translation poller moves through.
pub const PROGRESS_TRANSLATE_START: u8 = 60;
/// Upper end of the band the translation poller moves through.
pub const PROGRESS_TRANSLATE_END: u8 = 90;
/// Progress once translation succeeded and the viewer is being prepared.
pub const PROGRESS_TRANSLATED: u8 = 95;
/// Progress of a job that reached `ready`.
pub const PROGRESS_READY: u8 = 100;

/// Map `attempt` out of `budget` linearly into the translation band.
///
/// Non-decreasing in `attempt` and never leaves
/// `PROGRESS_TRANSLATE_START..=PROGRESS_TRANSLATE_END`.
pub fn translation_progress(attempt: u32, budget: u32) -> u8 {
    if budget == 0 {
        return PROGRESS_TRANSLATE_END;
    }
    let span = u32::from(PROGRESS_TRANSLATE_END - PROGRESS_TRANSLATE_START);
    let step = span * attempt.min(budget) / budget;
    PROGRESS_TRANSLATE_START + step as u8
}

/// Receives pipeline events in the order they happen.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Calls are made outside the pipeline's state lock,
/// so implementations may call back into the pipeline.
pub trait PipelineObserver: Send + Sync {
    /// The job moved to a new status.
    fn on_status(&self, status: JobStatus) {
        let _ = status;
    }

    /// The progress value changed.
    fn on_progress(&self, percent: u8) {
        let _ = percent;
    }

    /// An entry was appended to the job log.
    fn on_log(&self, entry: &LogEntry) {
        let _ = entry;
    }

    /// The job was reset and its log cleared.
    fn on_reset(&self) {}
}

/// Observer used when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ObserverRef = Arc<dyn PipelineObserver>;
