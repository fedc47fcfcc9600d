//! Job types: one user file's journey through the conversion pipeline.
//!
//! A job starts life as a [`PendingJob`] in `ready`, moves to `processing`
//! when a batch dispatches it, and ends either as a [`ResolvedJob`] in the
//! history pool (success) or back in the pending pool with `failed`.
//!
//! ```text
//! ready ──run_batch──▶ processing ──ok + link──▶ completed (ResolvedJob)
//!                          │
//!                          └──error──▶ failed ──run_batch──▶ processing
//! ```

use crate::config::WorkflowKind;
use crate::error::{DocshiftError, JobError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Immutable identity assigned when a job is created.
///
/// Positions in the pending pool shift whenever a job is removed; the id
/// never does, so late-arriving results are always applied to the right job
/// (or discarded if it was deleted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status label shown for every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Ready,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The source file handed to the remote API.
///
/// `data` is reference-counted so the payload can be moved into a spawned
/// job task without copying the bytes.
#[derive(Clone)]
pub struct FilePayload {
    /// File name as selected by the user, including extension.
    pub name: String,
    /// Declared MIME type. May be empty when the origin did not report one.
    pub mime_type: String,
    /// Raw file content.
    pub data: Arc<[u8]>,
}

impl FilePayload {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk. The MIME type is left empty; the catalog
    /// resolves the source format from the file extension instead.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, DocshiftError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| DocshiftError::InputRead {
                path: path.to_path_buf(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, String::new(), data))
    }

    /// Override the declared MIME type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Text after the last `.` in the file name, or the whole name when it
    /// has no dot.
    pub fn extension(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or("")
    }
}

impl fmt::Debug for FilePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePayload")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

/// A job in the pending pool.
#[derive(Debug, Clone)]
pub struct PendingJob {
    pub id: JobId,
    pub file: FilePayload,
    /// Selected target format; `None` until the user picks one.
    pub target: Option<String>,
    pub status: JobStatus,
    /// Why the last run failed. Cleared when the job is re-dispatched.
    pub error: Option<JobError>,
}

impl PendingJob {
    pub fn new(file: FilePayload) -> Self {
        Self {
            id: JobId::new(),
            file,
            target: None,
            status: JobStatus::Ready,
            error: None,
        }
    }

    /// True when a non-empty target format is selected.
    pub fn has_target(&self) -> bool {
        self.target.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// A completed job, as kept in the resolved pool and in durable history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedJob {
    pub id: JobId,
    pub kind: WorkflowKind,
    pub original_file_name: String,
    pub output_file_name: String,
    pub output_size: u64,
    pub output_format: String,
    pub output_extension: String,
    /// Time-limited download link for the produced file.
    pub download_url: String,
    /// Inline text for OCR jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    pub status: JobStatus,
    pub completed_at: DateTime<Utc>,
}

impl ResolvedJob {
    /// True when the output can be served from the inline text without a
    /// network fetch.
    pub fn is_inline_text(&self) -> bool {
        self.output_format == "text/plain" && self.extracted_text.is_some()
    }
}
