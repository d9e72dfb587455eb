//! # bimview
//!
//! Turn a CAD/BIM file (RVT, IFC, STEP) into an interactively viewable 3D
//! model: upload it to a conversion backend, poll the backend's translation
//! job to completion, fetch a short-lived viewer token and point a rendering
//! engine at the translated document.
//!
//! ## Why this crate?
//!
//! The happy path is four HTTP calls. Everything around it is not: uploads
//! of several hundred megabytes, translation jobs that run for minutes, users
//! picking a different file half-way through, and a third-party renderer
//! that leaks GPU resources unless it is disposed on every exit path. This
//! crate packages that orchestration as one state machine, [`Pipeline`].
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Validate   extension + size checks, no network
//!  ├─ 2. Upload     POST /upload-rvt            → urn        (10 → 20 → 50 %)
//!  ├─ 3. Translate  GET /status/{urn} every 3 s, ≤120 times  (60 → 90 %)
//!  ├─ 4. Authorize  GET /token                               (95 %)
//!  ├─ 5. Render     load viewer runtime once, start engine, load document
//!  └─ 6. Ready                                               (100 %)
//! ```
//!
//! Any failure moves the job to `failed`, resets progress to 0 and appends
//! a diagnostic to the job log.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bimview::{Pipeline, PipelineConfig, SourceFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .backend_url("http://localhost:8001")
//!         .build()?;
//!     let pipeline = Pipeline::from_config(config)?;
//!
//!     pipeline.select_file(SourceFile::from_path("design.rvt").await?)?;
//!     let outcome = pipeline.run().await?;
//!     println!("urn {} ready", outcome.remote_id);
//!
//!     for entry in pipeline.snapshot().log {
//!         eprintln!("{entry}");
//!     }
//!     pipeline.unmount();
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bimview` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! bimview = { version = "0.2", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use controller::{Pipeline, RunOutcome};
pub use error::{
    LoadError, PipelineError, RenderError, TransferError, TranslationError, ValidationError,
};
pub use job::{Job, JobSnapshot, JobStatus, LogEntry, SourceFile};
pub use pipeline::manifest::ManifestEngine;
pub use pipeline::poll::TranslationPoller;
pub use pipeline::transfer::{
    AccessToken, Derivative, HttpTransfer, PollOutcome, PollStatus, Transfer, UploadReceipt,
};
pub use pipeline::validate::{SupportedFormats, ACCEPTED_EXTENSIONS, PICKER_EXTENSIONS};
pub use pipeline::viewer::{
    Document, DocumentNode, EngineHandle, EngineInit, RendererSession, SurfaceId, ViewerEngine,
    ViewerHost,
};
pub use progress::{NoopObserver, ObserverRef, PipelineObserver};
pub use stream::SnapshotStream;
pub use viewer_runtime::{RuntimeAsset, RuntimeLoader, RuntimeSource};
