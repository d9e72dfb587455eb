//! The job: one user-initiated attempt to convert and view a single file.
//!
//! A pipeline holds exactly one [`Job`] at a time. It is replaced wholesale
//! when the user selects a new file; nothing in it outlives that reset.

use bytes::Bytes;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Where a job is in the upload → translate → authorize → render sequence.
///
/// Variants are declared in pipeline order so `PartialOrd` answers "is the
/// job at or past this step". [`JobStatus::Failed`] sorts last and must be
/// checked for explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Validating,
    Uploading,
    Translating,
    Authorizing,
    Rendering,
    Ready,
    Failed,
}

impl JobStatus {
    /// `idle`, `ready` and `failed` are the only states without a run in flight.
    pub fn is_settled(self) -> bool {
        matches!(self, JobStatus::Idle | JobStatus::Ready | JobStatus::Failed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Validating => "validating",
            JobStatus::Uploading => "uploading",
            JobStatus::Translating => "translating",
            JobStatus::Authorizing => "authorizing",
            JobStatus::Rendering => "rendering",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the job log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local: DateTime<Local> = self.at.into();
        write!(f, "{}: {}", local.format("%H:%M:%S"), self.message)
    }
}

/// A file picked by the user (or handed over by another panel).
#[derive(Clone, PartialEq, Eq)]
pub struct SourceFile {
    name: String,
    data: Bytes,
}

impl SourceFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read a local file into memory.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        Ok(Self::from_bytes(name, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    /// Size in MiB, the unit the backend reports in.
    pub fn size_mb(&self) -> f64 {
        self.data.len() as f64 / (1024.0 * 1024.0)
    }

    /// Lower-cased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("size_bytes", &self.data.len())
            .finish()
    }
}

/// The live job of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct Job {
    pub source: Option<SourceFile>,
    /// Server-assigned id ("urn"). Set exactly when the upload succeeded.
    pub remote_id: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub log: Vec<LogEntry>,
}

impl Job {
    pub fn with_source(source: SourceFile) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    pub(crate) fn push_log(&mut self, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry::now(message);
        self.log.push(entry.clone());
        entry
    }

    /// `remote_id` is present iff the job reached `translating`.
    ///
    /// A failed job keeps whatever id it had when it failed.
    pub fn remote_id_consistent(&self) -> bool {
        remote_id_consistent(self.status, self.remote_id.is_some())
    }
}

fn remote_id_consistent(status: JobStatus, has_remote_id: bool) -> bool {
    match status {
        JobStatus::Failed => true,
        s => has_remote_id == (s >= JobStatus::Translating),
    }
}

/// Read-only copy of the pipeline's state for UIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Bumped on every reset; lets observers tell jobs apart.
    pub generation: u64,
    pub status: JobStatus,
    pub progress: u8,
    pub file_name: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub remote_id: Option<String>,
    pub log: Vec<LogEntry>,
    /// `true` while a viewer engine instance is alive.
    pub viewer_active: bool,
}

impl JobSnapshot {
    pub(crate) fn capture(generation: u64, job: &Job, viewer_active: bool) -> Self {
        Self {
            generation,
            status: job.status,
            progress: job.progress,
            file_name: job.source.as_ref().map(|s| s.name().to_string()),
            file_size_bytes: job.source.as_ref().map(SourceFile::size_bytes),
            remote_id: job.remote_id.clone(),
            log: job.log.clone(),
            viewer_active,
        }
    }

    /// Same rule as [`Job::remote_id_consistent`].
    pub fn remote_id_consistent(&self) -> bool {
        remote_id_consistent(self.status, self.remote_id.is_some())
    }
}
