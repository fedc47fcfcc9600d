//! Error types for the docshift library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DocshiftError`]: **fatal for the call**. The requested operation
//!   cannot proceed at all (a job is missing its target format, a batch is
//!   already running, the state directory is unwritable). Returned as
//!   `Err(DocshiftError)` from workflow and storage methods.
//!
//! * [`JobError`]: **non-fatal**. A single job failed (network error,
//!   non-success HTTP status, no download link issued) but its siblings are
//!   unaffected. Stored on the pending job next to `status = failed` so the
//!   caller can inspect it, re-run it, or delete it.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docshift library.
///
/// Job-level failures use [`JobError`] and are stored on
/// [`crate::job::PendingJob`] rather than propagated here.
#[derive(Debug, Error)]
pub enum DocshiftError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// At least one pending job has no target format selected.
    #[error("Select a target format for every file before converting.\nMissing: {}", files.join(", "))]
    MissingTargets { files: Vec<String> },

    /// A previous batch still has jobs in flight.
    #[error("A batch is already running ({in_flight} job(s) still processing)")]
    BatchInProgress { in_flight: usize },

    /// No job with that id or position exists in the pool.
    #[error("No job at {what}")]
    JobNotFound { what: String },

    /// The workflow does not accept this kind of input file.
    #[error("'{file}' is not accepted by the {workflow} workflow (declared type: '{mime_type}')")]
    UnsupportedInput {
        file: String,
        workflow: String,
        mime_type: String,
    },

    /// Input file exceeds the configured size limit.
    #[error("'{file}' is {size} bytes; the maximum is {max} bytes")]
    FileTooLarge { file: String, size: u64, max: u64 },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file could not be read.
    #[error("Failed to read input file '{path}': {source}")]
    InputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Durable storage could not be read or written.
    #[error("Storage error for key '{key}': {source}")]
    Storage {
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored value is not valid JSON for its expected shape.
    #[error("Stored value for key '{key}' is corrupt: {source}")]
    CorruptStorage {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    // ── Download errors ───────────────────────────────────────────────────
    /// Fetching a resolved output failed.
    #[error("Failed to download '{file}': {reason}")]
    DownloadFailed { file: String, reason: String },

    /// Could not write a downloaded output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single job.
///
/// Stored on [`crate::job::PendingJob::error`] when the job fails. Sibling
/// jobs in the same batch continue regardless.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum JobError {
    /// The API could not be reached at all.
    #[error("Network error or server unreachable: {detail}")]
    Network { detail: String },

    /// The API answered with a non-success status.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// The API answered 2xx but the body did not have the expected shape.
    #[error("Malformed response: {detail}")]
    MalformedResponse { detail: String },

    /// The API answered 2xx but reported the conversion itself as failed.
    #[error("Server reported status '{status}'")]
    Rejected { status: String },

    /// The conversion succeeded but no download link could be issued.
    #[error("Could not issue a download link for '{file}': {detail}")]
    ReferenceIssuance { file: String, detail: String },

    /// The job's task panicked or was cancelled before it finished.
    #[error("Job aborted: {detail}")]
    Aborted { detail: String },
}

impl JobError {
    /// Build an [`JobError::Http`] from a status code and an optional
    /// server-supplied message.
    pub fn http(status: u16, server_message: Option<String>) -> Self {
        let message = server_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("HTTP error! Status: {status}"));
        JobError::Http { status, message }
    }
}
