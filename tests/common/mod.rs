//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bimview::{
    AccessToken, Derivative, Document, DocumentNode, EngineInit, JobSnapshot, JobStatus, LoadError,
    LogEntry, Pipeline, PipelineConfig, PipelineObserver, PollOutcome, RenderError,
    RendererSession, RuntimeAsset, RuntimeLoader, RuntimeSource, SnapshotStream, SourceFile,
    SupportedFormats, SurfaceId, Transfer, TransferError, UploadReceipt, ViewerEngine,
};
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

// ── Transfer ─────────────────────────────────────────────────────────────

/// A backend that answers from a script and records every call.
pub struct ScriptedTransfer {
    pub upload_result: Mutex<Result<UploadReceipt, TransferError>>,
    /// When set, `upload` waits for a permit before answering.
    pub upload_gate: Option<Arc<Notify>>,
    /// Signalled as soon as `upload` is entered.
    pub upload_entered: Arc<Notify>,
    /// Status answers in order; the last one repeats.
    pub statuses: Mutex<VecDeque<Result<PollOutcome, TransferError>>>,
    pub token_result: Mutex<Result<AccessToken, TransferError>>,
    pub derivative_result: Mutex<Result<Derivative, TransferError>>,
    pub formats_result: Mutex<Result<SupportedFormats, TransferError>>,
    pub source_result: Mutex<Result<SourceFile, TransferError>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedTransfer {
    /// `u1` uploaded, three pending polls then success, token `t1`.
    pub fn happy() -> Self {
        let mut formats = BTreeMap::new();
        formats.insert("bim".to_string(), vec!["rvt".to_string(), "ifc".to_string()]);
        formats.insert("cad".to_string(), vec!["step".to_string(), "stp".to_string()]);

        Self {
            upload_result: Mutex::new(Ok(UploadReceipt {
                urn: "u1".into(),
                file_size_mb: Some(42.0),
            })),
            upload_gate: None,
            upload_entered: Arc::new(Notify::new()),
            statuses: Mutex::new(pending_then(3, PollOutcome::success())),
            token_result: Mutex::new(Ok(AccessToken {
                access_token: "t1".into(),
                expires_in: Some(3599),
            })),
            derivative_result: Mutex::new(Ok(Derivative {
                filename: "design.svf.zip".into(),
                bytes: Bytes::from_static(b"PK\x03\x04"),
            })),
            formats_result: Mutex::new(Ok(SupportedFormats(formats))),
            source_result: Mutex::new(Ok(SourceFile::from_bytes(
                "pred.step",
                b"ISO-10303-21;".to_vec(),
            ))),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_statuses(self, statuses: VecDeque<Result<PollOutcome, TransferError>>) -> Self {
        *self.statuses.lock().unwrap() = statuses;
        self
    }

    pub fn with_upload(self, result: Result<UploadReceipt, TransferError>) -> Self {
        *self.upload_result.lock().unwrap() = result;
        self
    }

    pub fn with_token(self, result: Result<AccessToken, TransferError>) -> Self {
        *self.token_result.lock().unwrap() = result;
        self
    }

    /// Make `upload` wait until the returned gate is notified.
    pub fn gated_upload(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.upload_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    fn record(&self, op: &'static str) {
        self.calls.lock().unwrap().push(op);
    }
}

pub fn pending_then(
    n: usize,
    last: PollOutcome,
) -> VecDeque<Result<PollOutcome, TransferError>> {
    let mut v: VecDeque<_> = (0..n).map(|_| Ok(PollOutcome::pending())).collect();
    v.push_back(Ok(last));
    v
}

#[async_trait]
impl Transfer for ScriptedTransfer {
    async fn upload(&self, _file: &SourceFile) -> Result<UploadReceipt, TransferError> {
        self.record("upload");
        self.upload_entered.notify_one();
        if let Some(ref gate) = self.upload_gate {
            gate.notified().await;
        }
        self.upload_result.lock().unwrap().clone()
    }

    async fn poll_status(&self, _remote_id: &str) -> Result<PollOutcome, TransferError> {
        self.record("status");
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            statuses.front().cloned().unwrap()
        }
    }

    async fn fetch_token(&self) -> Result<AccessToken, TransferError> {
        self.record("token");
        self.token_result.lock().unwrap().clone()
    }

    async fn fetch_derivative(&self, _remote_id: &str) -> Result<Derivative, TransferError> {
        self.record("download");
        self.derivative_result.lock().unwrap().clone()
    }

    async fn fetch_supported_formats(&self) -> Result<SupportedFormats, TransferError> {
        self.record("formats");
        self.formats_result.lock().unwrap().clone()
    }

    async fn fetch_source(&self, _server_path: &str) -> Result<SourceFile, TransferError> {
        self.record("handoff");
        self.source_result.lock().unwrap().clone()
    }
}

// ── Viewer engine ────────────────────────────────────────────────────────

/// What the mock renderer finds when it loads a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentScript {
    /// A 2D sheet and a default 3D view.
    Viewable,
    /// Only resources, no geometry.
    NoGeometry,
    /// The document cannot be loaded at all.
    LoadFails,
}

#[derive(Default)]
pub struct EngineCounters {
    pub sessions: AtomicUsize,
    pub disposed: AtomicUsize,
    pub tokens: Mutex<Vec<String>>,
    pub documents: Mutex<Vec<String>>,
    pub nodes: Mutex<Vec<String>>,
    /// Held by the next `load_document` until notified.
    pub load_gate: Mutex<Option<Arc<Notify>>>,
    pub load_entered: Notify,
}

pub struct MockEngine {
    pub script: DocumentScript,
    pub counters: Arc<EngineCounters>,
}

impl MockEngine {
    pub fn new(script: DocumentScript) -> Self {
        Self {
            script,
            counters: Arc::new(EngineCounters::default()),
        }
    }

    pub fn disposed(&self) -> usize {
        self.counters.disposed.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.counters.sessions.load(Ordering::SeqCst)
    }

    /// Sessions created and not yet disposed.
    pub fn live_sessions(&self) -> usize {
        self.sessions() - self.disposed()
    }

    /// Block the next document load until the returned gate is notified.
    pub fn gate_next_load(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.counters.load_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

fn geometry(guid: &str, role: &str, default: bool) -> DocumentNode {
    DocumentNode {
        guid: guid.into(),
        name: format!("{role} view"),
        node_type: "geometry".into(),
        role: Some(role.into()),
        use_as_default: default,
        ..DocumentNode::default()
    }
}

pub fn sample_document(id: &str, script: DocumentScript) -> Document {
    let children = match script {
        DocumentScript::NoGeometry => vec![DocumentNode {
            guid: "thumb".into(),
            node_type: "resource".into(),
            ..DocumentNode::default()
        }],
        _ => vec![geometry("g1", "2d", false), geometry("g2", "3d", true)],
    };
    Document {
        id: id.to_string(),
        root: DocumentNode {
            guid: "root".into(),
            node_type: "folder".into(),
            children: vec![DocumentNode {
                guid: "svf".into(),
                name: "design.rvt".into(),
                children,
                ..DocumentNode::default()
            }],
            ..DocumentNode::default()
        },
    }
}

struct MockSession {
    script: DocumentScript,
    counters: Arc<EngineCounters>,
}

#[async_trait]
impl RendererSession for MockSession {
    async fn start(&mut self) -> Result<(), RenderError> {
        Ok(())
    }

    async fn load_document(&mut self, document_id: &str) -> Result<Document, RenderError> {
        self.counters
            .documents
            .lock()
            .unwrap()
            .push(document_id.to_string());
        let gate = self.counters.load_gate.lock().unwrap().take();
        self.counters.load_entered.notify_one();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.script {
            DocumentScript::LoadFails => Err(RenderError::DocumentLoadFailed {
                document: document_id.to_string(),
                reason: "HTTP 404: manifest not found".into(),
            }),
            script => Ok(sample_document(document_id, script)),
        }
    }

    async fn load_node(&mut self, _document: &Document, node: &DocumentNode) -> Result<(), RenderError> {
        self.counters.nodes.lock().unwrap().push(node.guid.clone());
        Ok(())
    }

    fn dispose(&mut self) {
        self.counters.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ViewerEngine for MockEngine {
    async fn create_session(
        &self,
        init: &EngineInit,
        _surface: &SurfaceId,
    ) -> Result<Box<dyn RendererSession>, RenderError> {
        self.counters.sessions.fetch_add(1, Ordering::SeqCst);
        self.counters
            .tokens
            .lock()
            .unwrap()
            .push(init.access_token.clone());
        Ok(Box::new(MockSession {
            script: self.script,
            counters: Arc::clone(&self.counters),
        }))
    }
}

// ── Viewer runtime ───────────────────────────────────────────────────────

/// In-memory runtime source that can be told to fail.
#[derive(Default)]
pub struct MemorySource {
    pub fail: AtomicBool,
}

#[async_trait]
impl RuntimeSource for MemorySource {
    async fn inject(&self) -> Result<RuntimeAsset, LoadError> {
        tokio::task::yield_now().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(LoadError::Download {
                url: "mem://viewer3D.min.js".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(RuntimeAsset {
            url: "mem://viewer3D.min.js".into(),
            path: PathBuf::from("/tmp/viewer3D.min.js"),
            size_bytes: 1024,
            from_cache: false,
        })
    }
}

// ── Observer ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Recorder {
    pub statuses: Mutex<Vec<JobStatus>>,
    pub progress: Mutex<Vec<u8>>,
    pub log: Mutex<Vec<String>>,
    pub resets: AtomicUsize,
}

impl PipelineObserver for Recorder {
    fn on_status(&self, status: JobStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn on_progress(&self, percent: u8) {
        self.progress.lock().unwrap().push(percent);
    }

    fn on_log(&self, entry: &LogEntry) {
        self.log.lock().unwrap().push(entry.message.clone());
    }

    fn on_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

pub struct Harness {
    pub pipeline: Pipeline,
    pub transfer: Arc<ScriptedTransfer>,
    pub engine: Arc<MockEngine>,
    pub source: Arc<MemorySource>,
    pub loader: Arc<RuntimeLoader>,
    pub recorder: Arc<Recorder>,
}

pub fn config() -> bimview::PipelineConfigBuilder {
    PipelineConfig::builder()
        .backend_url("http://backend.test:8001")
        .model_api_url("http://models.test:8002")
}

pub fn harness(transfer: ScriptedTransfer, script: DocumentScript) -> Harness {
    harness_with(config(), transfer, script)
}

pub fn harness_with(
    builder: bimview::PipelineConfigBuilder,
    transfer: ScriptedTransfer,
    script: DocumentScript,
) -> Harness {
    let recorder = Arc::new(Recorder::default());
    let config = builder.observer(recorder.clone()).build().unwrap();
    let transfer = Arc::new(transfer);
    let engine = Arc::new(MockEngine::new(script));
    let source = Arc::new(MemorySource::default());
    let loader = Arc::new(RuntimeLoader::new(source.clone()));
    let pipeline = Pipeline::new(config, transfer.clone(), engine.clone(), loader.clone());

    Harness {
        pipeline,
        transfer,
        engine,
        source,
        loader,
        recorder,
    }
}

pub fn file(name: &str, len: usize) -> SourceFile {
    SourceFile::from_bytes(name, vec![0x42u8; len])
}

/// Wait for the first snapshot matching `pred`.
pub async fn wait_for(
    stream: &mut SnapshotStream,
    pred: impl Fn(&JobSnapshot) -> bool,
) -> JobSnapshot {
    while let Some(snapshot) = stream.next().await {
        if pred(&snapshot) {
            return snapshot;
        }
    }
    panic!("snapshot stream ended");
}
