//! Progress-callback trait for per-job batch events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::WorkflowConfigBuilder::progress_callback`] to receive
//! events as each job moves through the batch. Events for one job are always
//! ordered (`on_job_start` before its terminal event); events for different
//! jobs interleave in completion order.
//!
//! # Example
//!
//! ```rust
//! use docshift::{JobId, JobProgressCallback, WorkflowConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_job_complete(&self, _id: JobId, file_name: &str, output_size: u64) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{file_name} done ({output_size} bytes)");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { completed: AtomicUsize::new(0) });
//!
//! let config = WorkflowConfig::builder()
//!     .progress_callback(counter as Arc<dyn JobProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::job::JobId;
use std::sync::Arc;

/// Called by the workflow as it processes each job.
///
/// Jobs run as concurrent tokio tasks, so every method may be called from
/// different threads at the same time. Implementations must protect shared
/// mutable state (`Mutex`, atomics). All methods default to no-ops.
pub trait JobProgressCallback: Send + Sync {
    /// Called once after the batch passed validation, before any job runs.
    fn on_batch_start(&self, total_jobs: usize) {
        let _ = total_jobs;
    }

    /// Called when a job has been marked `processing` and its remote call
    /// is about to be sent.
    fn on_job_start(&self, id: JobId, file_name: &str) {
        let _ = (id, file_name);
    }

    /// Called when a job completed and moved to the resolved pool.
    fn on_job_complete(&self, id: JobId, file_name: &str, output_size: u64) {
        let _ = (id, file_name, output_size);
    }

    /// Called when a job failed and stays pending with `failed`.
    fn on_job_error(&self, id: JobId, file_name: &str, error: &str) {
        let _ = (id, file_name, error);
    }

    /// Called once after every dispatched job reached a terminal state or
    /// was detached.
    fn on_batch_complete(&self, total_jobs: usize, success_count: usize) {
        let _ = (total_jobs, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::WorkflowConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        batch_total: AtomicUsize,
        batch_success: AtomicUsize,
    }

    impl JobProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total_jobs: usize) {
            self.batch_total.store(total_jobs, Ordering::SeqCst);
        }

        fn on_job_start(&self, _id: JobId, _file_name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_complete(&self, _id: JobId, _file_name: &str, _output_size: u64) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_error(&self, _id: JobId, _file_name: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total_jobs: usize, success_count: usize) {
            self.batch_success.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let id = JobId::new();
        cb.on_batch_start(2);
        cb.on_job_start(id, "a.pdf");
        cb.on_job_complete(id, "a.pdf", 42);
        cb.on_job_error(id, "b.pdf", "HTTP error! Status: 500");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let (a, b) = (JobId::new(), JobId::new());

        tracker.on_batch_start(2);
        tracker.on_job_start(a, "a.pdf");
        tracker.on_job_start(b, "b.pdf");
        tracker.on_job_complete(a, "a.pdf", 100);
        tracker.on_job_error(b, "b.pdf", "timeout");
        tracker.on_batch_complete(2, 1);

        assert_eq!(tracker.batch_total.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.batch_success.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn JobProgressCallback>();
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(1);
    }
}
