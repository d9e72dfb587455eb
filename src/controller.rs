//! The pipeline controller: the upload → translate → authorize → render
//! state machine.
//!
//! A [`Pipeline`] owns exactly one [`Job`] and at most one [`EngineHandle`].
//! Every state change goes through one short critical section that
//!
//! 1. checks the caller's job generation is still current,
//! 2. mutates the job,
//! 3. publishes a [`JobSnapshot`] and observer events after unlocking.
//!
//! Network calls are never made while the lock is held. A run whose job was
//! reset while it was waiting finds its generation stale on the next state
//! change and stops with [`PipelineError::Superseded`], leaving the newer job
//! untouched. The render step does not wait for that: it races the renderer
//! against the job generation, so a reset drops a still-loading session at
//! once.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, RenderError, TranslationError};
use crate::job::{Job, JobSnapshot, JobStatus, LogEntry, SourceFile};
use crate::pipeline::manifest::ManifestEngine;
use crate::pipeline::poll::{TickEvent, TranslationPoller};
use crate::pipeline::transfer::{Derivative, HttpTransfer, Transfer};
use crate::pipeline::validate::{validate_file, SupportedFormats};
use crate::pipeline::viewer::{DocumentNode, EngineHandle, Rendering, SurfaceId, ViewerEngine, ViewerHost};
use crate::progress::{
    PROGRESS_READY, PROGRESS_TRANSLATED, PROGRESS_TRANSLATE_START, PROGRESS_UPLOADED,
    PROGRESS_UPLOAD_QUEUED, PROGRESS_UPLOAD_SENT,
};
use crate::stream::{snapshot_stream, SnapshotStream};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};
use viewer_runtime::RuntimeLoader;

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub remote_id: String,
    /// The viewable shown, or `None` when the document had no geometry.
    pub viewable: Option<DocumentNode>,
}

/// Client-side orchestrator for one display surface.
///
/// Cheap to clone; clones share the same job and engine.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: PipelineConfig,
    transfer: Arc<dyn Transfer>,
    host: ViewerHost,
    surface: SurfaceId,
    loader: Arc<RuntimeLoader>,
    poller: TranslationPoller,
    state: Mutex<PipelineState>,
    snapshots: watch::Sender<JobSnapshot>,
    formats: OnceCell<SupportedFormats>,
}

struct PipelineState {
    generation: u64,
    job: Job,
    engine: Option<EngineHandle>,
    unmounted: bool,
}

impl PipelineState {
    fn snapshot(&self) -> JobSnapshot {
        let viewer_active = self.engine.as_ref().is_some_and(EngineHandle::is_live);
        JobSnapshot::capture(self.generation, &self.job, viewer_active)
    }
}

enum Event {
    Reset,
    Status(JobStatus),
    Progress(u8),
    Log(LogEntry),
}

/// One critical section's worth of changes.
struct Txn<'a> {
    state: &'a mut PipelineState,
    events: Vec<Event>,
    retired: Vec<EngineHandle>,
}

impl<'a> Txn<'a> {
    fn new(state: &'a mut PipelineState) -> Self {
        Self {
            state,
            events: Vec::new(),
            retired: Vec::new(),
        }
    }

    fn ensure_mounted(&self) -> Result<(), PipelineError> {
        if self.state.unmounted {
            return Err(PipelineError::Unmounted);
        }
        Ok(())
    }

    fn ensure_current(&self, epoch: u64) -> Result<(), PipelineError> {
        self.ensure_mounted()?;
        if self.state.generation != epoch {
            debug!(
                "Discarding result of job {} (current job is {})",
                epoch, self.state.generation
            );
            return Err(PipelineError::Superseded);
        }
        Ok(())
    }

    /// Start a new job: retire the engine, clear log and progress.
    fn reset(&mut self, source: Option<SourceFile>) -> u64 {
        self.retire_engine();
        let old = std::mem::take(&mut self.state.job);
        self.state.job.source = source;
        self.state.generation += 1;

        self.events.push(Event::Reset);
        if old.status != JobStatus::Idle {
            self.events.push(Event::Status(JobStatus::Idle));
        }
        if old.progress != 0 {
            self.events.push(Event::Progress(0));
        }
        debug!("Job {} started", self.state.generation);
        self.state.generation
    }

    fn status(&mut self, status: JobStatus) {
        if self.state.job.status != status {
            debug!("Job {}: {} → {}", self.state.generation, self.state.job.status, status);
            self.state.job.status = status;
            self.events.push(Event::Status(status));
        }
    }

    fn progress(&mut self, percent: u8) {
        let percent = percent.min(PROGRESS_READY);
        if self.state.job.progress != percent {
            self.state.job.progress = percent;
            self.events.push(Event::Progress(percent));
        }
    }

    fn log(&mut self, message: impl Into<String>) {
        let entry = self.state.job.push_log(message);
        info!(job = self.state.generation, "{}", entry.message);
        self.events.push(Event::Log(entry));
    }

    fn warn(&mut self, message: impl Into<String>) {
        let entry = self.state.job.push_log(message);
        warn!(job = self.state.generation, "{}", entry.message);
        self.events.push(Event::Log(entry));
    }

    fn install_engine(&mut self, handle: EngineHandle) {
        self.retire_engine();
        self.state.engine = Some(handle);
    }

    fn retire_engine(&mut self) {
        if let Some(handle) = self.state.engine.take() {
            self.retired.push(handle);
        }
    }
}

impl Pipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        config: PipelineConfig,
        transfer: Arc<dyn Transfer>,
        engine: Arc<dyn ViewerEngine>,
        loader: Arc<RuntimeLoader>,
    ) -> Self {
        let host = ViewerHost::new(engine, config.engine_env.clone(), config.engine_api.clone());
        let surface = SurfaceId::new(config.surface.clone());
        let poller = TranslationPoller::from_config(&config);
        let state = PipelineState {
            generation: 0,
            job: Job::default(),
            engine: None,
            unmounted: false,
        };
        let (snapshots, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(Inner {
                config,
                transfer,
                host,
                surface,
                loader,
                poller,
                state: Mutex::new(state),
                snapshots,
                formats: OnceCell::new(),
            }),
        }
    }

    /// HTTP backend, headless manifest engine and the process-wide loader.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let transfer = Arc::new(HttpTransfer::new(&config)?);
        let engine = Arc::new(ManifestEngine::from_config(&config)?);
        Ok(Self::new(config, transfer, engine, viewer_runtime::global()))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Current state, copied.
    pub fn snapshot(&self) -> JobSnapshot {
        self.lock_state().snapshot()
    }

    /// Stream of snapshots: the current one first, then one per change.
    pub fn subscribe(&self) -> SnapshotStream {
        snapshot_stream(self.inner.snapshots.subscribe())
    }

    /// Fetch the backend's supported formats once; `None` if unavailable.
    ///
    /// Only used to enrich rejection messages, so failure is never fatal.
    pub async fn load_supported_formats(&self) -> Option<SupportedFormats> {
        let transfer = Arc::clone(&self.inner.transfer);
        match self
            .inner
            .formats
            .get_or_try_init(|| async move { transfer.fetch_supported_formats().await })
            .await
        {
            Ok(formats) => Some(formats.clone()),
            Err(e) => {
                warn!("Could not load supported formats: {e}");
                None
            }
        }
    }

    /// Select a new file, resetting whatever job was live.
    ///
    /// Any viewer is disposed and the log and progress are cleared before
    /// the file is accepted. A viewer that is still loading is disposed as
    /// soon as its run notices the reset, before any new run can start one. Results still in flight for the old job are
    /// discarded when they arrive.
    pub fn select_file(&self, file: SourceFile) -> Result<(), PipelineError> {
        self.transact(|t| {
            t.ensure_mounted()?;
            let message = format!("Selected {} ({:.1} MB)", file.name(), file.size_mb());
            t.reset(Some(file));
            t.log(message);
            Ok(())
        })
    }

    /// Select a file handed over by another panel as a server-side path.
    pub async fn select_server_file(&self, server_path: &str) -> Result<(), PipelineError> {
        if self.inner.config.model_api_url.is_none() {
            return Err(PipelineError::InvalidConfig(
                "no model API URL configured; server-side handoff is unavailable".into(),
            ));
        }

        let epoch = self.transact(|t| {
            t.ensure_mounted()?;
            let epoch = t.reset(None);
            t.log(format!("Fetching {server_path} from the model API..."));
            Ok(epoch)
        })?;

        match self.inner.transfer.fetch_source(server_path).await {
            Ok(file) => self.update(epoch, |t| {
                t.log(format!("Received {} ({:.1} MB)", file.name(), file.size_mb()));
                t.state.job.source = Some(file);
            }),
            Err(source) => Err(self.fail(
                epoch,
                PipelineError::Handoff {
                    path: server_path.to_string(),
                    source,
                },
            )),
        }
    }

    /// Fetch a handed-over file and run the pipeline on it.
    pub async fn run_handoff(&self, server_path: &str) -> Result<RunOutcome, PipelineError> {
        self.select_server_file(server_path).await?;
        self.run().await
    }

    /// Run the selected file through the whole pipeline.
    ///
    /// From `ready` or `failed` the job is reset first and the same file is
    /// run again. While a run is in flight this returns
    /// [`PipelineError::Busy`].
    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        let (epoch, file) = self.transact(|t| {
            t.ensure_mounted()?;
            let status = t.state.job.status;
            if !status.is_settled() {
                return Err(PipelineError::Busy {
                    status: status.to_string(),
                });
            }
            let file = t
                .state
                .job
                .source
                .clone()
                .ok_or(PipelineError::NoFileSelected)?;
            let epoch = if status.is_terminal() {
                t.reset(Some(file.clone()))
            } else {
                t.state.generation
            };
            t.status(JobStatus::Validating);
            t.log(format!("Validating {}...", file.name()));
            Ok((epoch, file))
        })?;

        match self.drive(epoch, &file).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail(epoch, e)),
        }
    }

    /// Download the translated model of the current job.
    ///
    /// Logs the outcome but never changes the job status.
    pub async fn download_derivative(&self) -> Result<Derivative, PipelineError> {
        let (epoch, remote_id) = self.transact(|t| {
            t.ensure_mounted()?;
            let remote_id = t
                .state
                .job
                .remote_id
                .clone()
                .ok_or(PipelineError::NotUploaded)?;
            t.log(format!("Downloading processed model for {remote_id}..."));
            Ok((t.state.generation, remote_id))
        })?;

        match self.inner.transfer.fetch_derivative(&remote_id).await {
            Ok(derivative) => {
                self.update(epoch, |t| {
                    t.log(format!(
                        "Downloaded {} ({} bytes)",
                        derivative.filename,
                        derivative.bytes.len()
                    ))
                })?;
                Ok(derivative)
            }
            Err(e) => {
                let _ = self.update(epoch, |t| t.warn(format!("Download failed: {e}")));
                Err(PipelineError::Download(e))
            }
        }
    }

    /// Dispose the viewer and refuse further work. Idempotent.
    pub fn unmount(&self) {
        let _ = self.transact(|t| {
            if !t.state.unmounted {
                t.state.unmounted = true;
                t.state.generation += 1;
                t.retire_engine();
                info!("Pipeline unmounted");
            }
            Ok(())
        });
    }

    // ── Steps ────────────────────────────────────────────────────────────

    async fn drive(&self, epoch: u64, file: &SourceFile) -> Result<RunOutcome, PipelineError> {
        let config = &self.inner.config;
        let transfer = self.inner.transfer.as_ref();

        // ── Step 1: Validate ─────────────────────────────────────────────
        let validated = validate_file(
            file,
            self.inner.formats.get(),
            config.large_file_warning_bytes(),
        )?;

        // ── Step 2: Upload ───────────────────────────────────────────────
        self.update(epoch, |t| {
            for warning in &validated.warnings {
                t.warn(format!("Warning: {warning}"));
            }
            t.status(JobStatus::Uploading);
            t.progress(PROGRESS_UPLOAD_QUEUED);
            t.log(format!("Uploading {} ({:.1} MB)...", file.name(), file.size_mb()));
        })?;
        self.update(epoch, |t| t.progress(PROGRESS_UPLOAD_SENT))?;

        let receipt = transfer.upload(file).await.map_err(PipelineError::Upload)?;
        let remote_id = receipt.urn.clone();

        // ── Step 3: Translate ────────────────────────────────────────────
        self.update(epoch, |t| {
            t.progress(PROGRESS_UPLOADED);
            match receipt.file_size_mb {
                Some(mb) => t.log(format!("Upload complete: {} ({mb:.1} MB)", receipt.urn)),
                None => t.log(format!("Upload complete: {}", receipt.urn)),
            }
            t.state.job.remote_id = Some(receipt.urn);
            t.status(JobStatus::Translating);
            t.progress(PROGRESS_TRANSLATE_START);
            t.log("Translating model...");
        })?;

        let mut last_hint: Option<String> = None;
        let polled = self
            .inner
            .poller
            .poll_until_done(&remote_id, transfer, |tick| {
                let applied = self.update(epoch, |t| {
                    t.progress(tick.progress);
                    match &tick.event {
                        TickEvent::Status(outcome) => {
                            if outcome.progress_hint.is_some() && outcome.progress_hint != last_hint {
                                last_hint = outcome.progress_hint.clone();
                                t.log(format!(
                                    "Translation progress: {}",
                                    last_hint.as_deref().unwrap_or_default()
                                ));
                            }
                        }
                        TickEvent::TransientError(e) => {
                            t.warn(format!("Status check failed, retrying: {e}"));
                        }
                    }
                });
                match applied {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()),
                }
            })
            .await;
        match polled {
            Ok(_) => {}
            Err(TranslationError::Abandoned) => return Err(PipelineError::Superseded),
            Err(e) => return Err(e.into()),
        }

        // ── Step 4: Authorize ────────────────────────────────────────────
        self.update(epoch, |t| {
            t.status(JobStatus::Authorizing);
            t.progress(PROGRESS_TRANSLATED);
            t.log("Translation complete. Requesting viewer token...");
        })?;
        let token = transfer
            .fetch_token()
            .await
            .map_err(PipelineError::Authorization)?;

        // ── Step 5: Render ───────────────────────────────────────────────
        self.update(epoch, |t| {
            t.status(JobStatus::Rendering);
            t.log("Loading viewer runtime...");
        })?;
        let asset = self.inner.loader.ensure_loaded().await?;
        self.update(epoch, |t| {
            t.retire_engine();
            t.log(format!(
                "Viewer runtime ready ({}). Starting viewer on '{}'...",
                asset.url, self.inner.surface
            ));
        })?;

        // A reset while the renderer is still loading drops the render
        // future, which disposes its session before a new one can start.
        let mut generations = self.inner.snapshots.subscribe();
        let Rendering { handle, result } = tokio::select! {
            rendering = self
                .inner
                .host
                .render_document(&self.inner.surface, &remote_id, &token) => rendering?,
            _ = generations.wait_for(|s| s.generation != epoch) => {
                debug!("Job {epoch} reset while rendering; viewer session abandoned");
                return Err(PipelineError::Superseded);
            }
        };

        // ── Step 6: Ready ────────────────────────────────────────────────
        match result {
            Ok(viewable) => {
                self.install(epoch, handle, |t| {
                    t.progress(PROGRESS_READY);
                    t.status(JobStatus::Ready);
                    t.log(format!("Model loaded: {}", display_name(&viewable)));
                })?;
                Ok(RunOutcome {
                    remote_id,
                    viewable: Some(viewable),
                })
            }
            Err(e @ RenderError::NoViewable { .. }) => {
                self.install(epoch, handle, |t| {
                    t.progress(PROGRESS_READY);
                    t.status(JobStatus::Ready);
                    t.warn(format!("{e}. Nothing to display."));
                })?;
                Ok(RunOutcome {
                    remote_id,
                    viewable: None,
                })
            }
            Err(e) => {
                // Kept until the next reset or unmount.
                self.install(epoch, handle, |_| {})?;
                Err(e.into())
            }
        }
    }

    // ── State helpers ────────────────────────────────────────────────────

    /// Move the job to `failed` and return the error to hand to the caller.
    ///
    /// A stale job is left alone and the caller gets the staleness error.
    fn fail(&self, epoch: u64, err: PipelineError) -> PipelineError {
        if matches!(err, PipelineError::Superseded | PipelineError::Unmounted) {
            return err;
        }
        match self.update(epoch, |t| {
            t.warn(format!("Error: {err}"));
            t.status(JobStatus::Failed);
            t.progress(0);
        }) {
            Ok(()) => err,
            Err(stale) => stale,
        }
    }

    fn update<R>(&self, epoch: u64, f: impl FnOnce(&mut Txn<'_>) -> R) -> Result<R, PipelineError> {
        self.transact(|t| {
            t.ensure_current(epoch)?;
            Ok(f(t))
        })
    }

    /// Hand `handle` to the current job and apply `f`.
    ///
    /// If the job went stale the handle is retired instead, so it is
    /// disposed after the lock is released.
    fn install<R>(
        &self,
        epoch: u64,
        handle: EngineHandle,
        f: impl FnOnce(&mut Txn<'_>) -> R,
    ) -> Result<R, PipelineError> {
        self.transact(|t| {
            if let Err(e) = t.ensure_current(epoch) {
                t.retired.push(handle);
                return Err(e);
            }
            t.install_engine(handle);
            Ok(f(t))
        })
    }

    fn transact<R>(
        &self,
        f: impl FnOnce(&mut Txn<'_>) -> Result<R, PipelineError>,
    ) -> Result<R, PipelineError> {
        let (result, events, retired, snapshot, generation) = {
            let mut guard = self.lock_state();
            let generation = guard.generation;
            let mut txn = Txn::new(&mut guard);
            let result = f(&mut txn);
            let Txn {
                events, retired, ..
            } = txn;
            let snapshot = guard.snapshot();
            (result, events, retired, snapshot, generation)
        };

        // Unmount bumps the generation without emitting an event; in-flight
        // renders still need to see it.
        let changed =
            !events.is_empty() || !retired.is_empty() || snapshot.generation != generation;
        // Dispose outside the lock.
        drop(retired);
        if changed {
            self.publish(snapshot, events);
        }
        result
    }

    fn publish(&self, snapshot: JobSnapshot, events: Vec<Event>) {
        self.inner.snapshots.send_replace(snapshot);
        let Some(observer) = self.inner.config.observer.as_ref() else {
            return;
        };
        for event in &events {
            match event {
                Event::Reset => observer.on_reset(),
                Event::Status(status) => observer.on_status(*status),
                Event::Progress(percent) => observer.on_progress(*percent),
                Event::Log(entry) => observer.on_log(entry),
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Pipeline")
            .field("surface", &self.inner.surface)
            .field("generation", &snapshot.generation)
            .field("status", &snapshot.status)
            .field("progress", &snapshot.progress)
            .finish()
    }
}

fn display_name(node: &DocumentNode) -> &str {
    if node.name.is_empty() {
        &node.guid
    } else {
        &node.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::PipelineObserver;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PipelineObserver for Recorder {
        fn on_status(&self, status: JobStatus) {
            self.events.lock().unwrap().push(format!("status:{status}"));
        }

        fn on_progress(&self, percent: u8) {
            self.events.lock().unwrap().push(format!("progress:{percent}"));
        }

        fn on_reset(&self) {
            self.events.lock().unwrap().push("reset".into());
        }
    }

    fn offline_pipeline(observer: Arc<Recorder>) -> Pipeline {
        let config = PipelineConfig::builder()
            .backend_url("http://127.0.0.1:9")
            .observer(observer)
            .build()
            .unwrap();
        Pipeline::from_config(config).unwrap()
    }

    #[test]
    fn stale_epoch_is_rejected_without_mutation() {
        let pipeline = offline_pipeline(Arc::new(Recorder::default()));
        pipeline
            .select_file(SourceFile::from_bytes("a.ifc", vec![1u8]))
            .unwrap();
        let old = pipeline.snapshot().generation;
        pipeline
            .select_file(SourceFile::from_bytes("b.ifc", vec![1u8]))
            .unwrap();

        let err = pipeline
            .update(old, |t| t.status(JobStatus::Failed))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Superseded));
        assert_eq!(pipeline.snapshot().status, JobStatus::Idle);
        assert_eq!(pipeline.snapshot().file_name.as_deref(), Some("b.ifc"));
    }

    #[test]
    fn observer_sees_reset_before_new_log() {
        let recorder = Arc::new(Recorder::default());
        let pipeline = offline_pipeline(Arc::clone(&recorder));
        pipeline
            .select_file(SourceFile::from_bytes("a.ifc", vec![1u8]))
            .unwrap();
        let epoch = pipeline.snapshot().generation;
        pipeline
            .update(epoch, |t| {
                t.status(JobStatus::Uploading);
                t.progress(20);
            })
            .unwrap();
        pipeline
            .select_file(SourceFile::from_bytes("b.ifc", vec![1u8]))
            .unwrap();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                "reset",
                "status:uploading",
                "progress:20",
                "reset",
                "status:idle",
                "progress:0"
            ]
        );
        assert_eq!(pipeline.snapshot().log.len(), 1);
    }

    #[tokio::test]
    async fn run_without_file_is_rejected() {
        let pipeline = offline_pipeline(Arc::new(Recorder::default()));
        assert!(matches!(
            pipeline.run().await,
            Err(PipelineError::NoFileSelected)
        ));
        assert_eq!(pipeline.snapshot().status, JobStatus::Idle);
    }

    #[tokio::test]
    async fn handoff_requires_model_api() {
        let pipeline = offline_pipeline(Arc::new(Recorder::default()));
        let err = pipeline.select_server_file("/data/pred.step").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    /// Records whether the pipeline state was free when it was disposed.
    struct LockCheckingSession {
        pipeline: Pipeline,
        lock_free_at_dispose: Arc<Mutex<Option<bool>>>,
    }

    #[async_trait::async_trait]
    impl crate::pipeline::viewer::RendererSession for LockCheckingSession {
        async fn start(&mut self) -> Result<(), RenderError> {
            Ok(())
        }

        async fn load_document(
            &mut self,
            document_id: &str,
        ) -> Result<crate::pipeline::viewer::Document, RenderError> {
            Err(RenderError::DocumentLoadFailed {
                document: document_id.to_string(),
                reason: "not loaded".into(),
            })
        }

        async fn load_node(
            &mut self,
            _document: &crate::pipeline::viewer::Document,
            _node: &DocumentNode,
        ) -> Result<(), RenderError> {
            Ok(())
        }

        fn dispose(&mut self) {
            let free = self.pipeline.inner.state.try_lock().is_ok();
            *self.lock_free_at_dispose.lock().unwrap() = Some(free);
        }
    }

    fn lock_checking_handle(pipeline: &Pipeline) -> (EngineHandle, Arc<Mutex<Option<bool>>>) {
        let seen = Arc::new(Mutex::new(None));
        let session = LockCheckingSession {
            pipeline: pipeline.clone(),
            lock_free_at_dispose: Arc::clone(&seen),
        };
        (EngineHandle::new(SurfaceId::new("forge"), Box::new(session)), seen)
    }

    #[test]
    fn stale_engine_is_disposed_after_unlock() {
        let pipeline = offline_pipeline(Arc::new(Recorder::default()));
        pipeline
            .select_file(SourceFile::from_bytes("a.ifc", vec![1u8]))
            .unwrap();
        let old = pipeline.snapshot().generation;
        pipeline
            .select_file(SourceFile::from_bytes("b.ifc", vec![1u8]))
            .unwrap();

        let (handle, seen) = lock_checking_handle(&pipeline);
        let err = pipeline
            .install(old, handle, |t| t.status(JobStatus::Ready))
            .unwrap_err();

        assert!(matches!(err, PipelineError::Superseded));
        assert_eq!(*seen.lock().unwrap(), Some(true));
        let snap = pipeline.snapshot();
        assert_eq!(snap.status, JobStatus::Idle);
        assert!(!snap.viewer_active);
    }

    #[test]
    fn current_engine_is_installed_and_disposed_on_unmount() {
        let pipeline = offline_pipeline(Arc::new(Recorder::default()));
        pipeline
            .select_file(SourceFile::from_bytes("a.ifc", vec![1u8]))
            .unwrap();
        let epoch = pipeline.snapshot().generation;

        let (handle, seen) = lock_checking_handle(&pipeline);
        pipeline.install(epoch, handle, |_| {}).unwrap();
        assert!(pipeline.snapshot().viewer_active);
        assert_eq!(*seen.lock().unwrap(), None);

        pipeline.unmount();
        assert_eq!(*seen.lock().unwrap(), Some(true));
        assert!(!pipeline.snapshot().viewer_active);
    }

    #[test]
    fn unmounted_pipeline_refuses_selection() {
        let pipeline = offline_pipeline(Arc::new(Recorder::default()));
        pipeline.unmount();
        pipeline.unmount();
        let err = pipeline
            .select_file(SourceFile::from_bytes("a.ifc", vec![1u8]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unmounted));
    }
}
