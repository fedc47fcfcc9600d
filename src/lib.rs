//! # docshift
//!
//! Batch file conversion and OCR against a remote conversion API.
//!
//! Files are added to a workflow as *pending* jobs, each gets a target
//! format, and [`Workflow::run_batch`] sends every job to the API at once.
//! Each job succeeds or fails on its own: successes move to the *resolved*
//! pool and are appended to durable history with a time-limited download
//! link; failures stay pending with `failed` so they can be re-run or
//! deleted.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file
//!  │
//!  ├─ 1. Catalog   which targets the source format supports (fetched once, cached)
//!  ├─ 2. Registry  pending job, `ready` until a target is chosen
//!  ├─ 3. API       multipart upload to /api/convert/ or /api/ocr/
//!  ├─ 4. Link      pre-signed download URL for the output
//!  └─ 5. History   resolved job appended to durable storage
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docshift::{FilePayload, FileStore, HttpConversionApi, Workflow, WorkflowConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WorkflowConfig::builder()
//!         .api_base_url("https://convert.example.com")
//!         .build()?;
//!     let api = Arc::new(HttpConversionApi::new(&config)?);
//!     let store = Arc::new(FileStore::new(FileStore::default_dir()));
//!     let workflow = Workflow::open(config, api, None, store).await?;
//!
//!     let ids = workflow
//!         .add_files(vec![FilePayload::from_path("report.pdf").await?])
//!         .await?;
//!     workflow.set_target(ids[0], "text/plain").await;
//!
//!     let summary = workflow.run_batch().await?;
//!     eprintln!("{} completed, {} failed", summary.completed(), summary.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docshift` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `s3`    | on      | [`S3LinkIssuer`]: pre-signed S3 download links |
//!
//! Disable both when using only the library with your own link issuer:
//! ```toml
//! docshift = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod storage;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::{CapabilityCatalog, Catalog, FormatDescriptor, OCR_OUTPUT_FORMATS};
pub use config::{ReferencePolicy, WorkflowConfig, WorkflowConfigBuilder, WorkflowKind, DEFAULT_MAX_FILE_SIZE};
pub use download::{download_resolved, format_file_size, truncate_filename};
pub use error::{DocshiftError, JobError};
pub use job::{FilePayload, JobId, JobStatus, PendingJob, ResolvedJob};
pub use pipeline::api::{ApiResponse, CatalogSource, ConversionApi, HttpConversionApi};
pub use pipeline::links::{sanitize_filename, LinkIssuer};
#[cfg(feature = "s3")]
pub use pipeline::links::S3LinkIssuer;
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use registry::JobRegistry;
pub use storage::{FileStore, HistoryStore, KeyValueStore, MemoryStore};
pub use workflow::{BatchSummary, JobOutcome, Workflow};
