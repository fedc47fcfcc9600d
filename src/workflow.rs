//! Batch orchestration: drive every pending job through its remote call.
//!
//! ## Lifecycle
//!
//! ```text
//! ready ──run_batch──▶ processing ──success + link──▶ completed (moved to resolved)
//!                          │
//!                          └──failure──▶ failed (stays pending, re-runnable)
//! ```
//!
//! Each job runs in its own tokio task. The registry sits behind an async
//! mutex that is taken only for short state transitions and the history
//! write, never across a remote call, so jobs finish and publish in any
//! order.
//!
//! Deleting a job that is in flight aborts its task. A result that still
//! arrives for an id no longer in the pending pool is dropped.

use crate::catalog::{CapabilityCatalog, Catalog, OCR_OUTPUT_FORMATS};
use crate::config::{WorkflowConfig, WorkflowKind};
use crate::error::{DocshiftError, JobError};
use crate::job::{FilePayload, JobId, PendingJob, ResolvedJob};
use crate::pipeline::api::{CatalogSource, ConversionApi};
use crate::pipeline::links::LinkIssuer;
use crate::pipeline::resolve::{resolve_output, ResolveContext};
use crate::progress::ProgressCallback;
use crate::registry::JobRegistry;
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// How one dispatched job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Moved to the resolved pool.
    Completed,
    /// Still pending with `failed`.
    Failed(JobError),
    /// Deleted while in flight; its result, if any, was dropped.
    Detached,
}

/// Per-job outcomes of one [`Workflow::run_batch`] call, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub outcomes: Vec<(JobId, JobOutcome)>,
}

impl BatchSummary {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, id: JobId) -> Option<&JobOutcome> {
        self.outcomes.iter().find(|(i, _)| *i == id).map(|(_, o)| o)
    }

    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Completed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed(_)))
    }

    pub fn detached(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Detached))
    }

    fn count(&self, pred: impl Fn(&JobOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Exposes a [`ConversionApi`] as the catalog's source.
struct ApiCatalogSource(Arc<dyn ConversionApi>);

#[async_trait]
impl CatalogSource for ApiCatalogSource {
    async fn fetch_supported_conversions(&self) -> Result<Catalog, JobError> {
        self.0.fetch_supported_conversions().await
    }
}

/// Abort handles of running job tasks. A task removes its own entry when it
/// finishes.
type TaskMap = Arc<std::sync::Mutex<HashMap<JobId, AbortHandle>>>;

fn lock_task_map(tasks: &TaskMap) -> std::sync::MutexGuard<'_, HashMap<JobId, AbortHandle>> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a job task needs, shared by every task of one batch.
struct BatchContext {
    config: WorkflowConfig,
    api: Arc<dyn ConversionApi>,
    issuer: Option<Arc<dyn LinkIssuer>>,
    catalog: Catalog,
    registry: Arc<Mutex<JobRegistry>>,
    tasks: TaskMap,
}

/// One conversion or OCR workflow: catalog, registry and orchestrator.
pub struct Workflow {
    config: WorkflowConfig,
    api: Arc<dyn ConversionApi>,
    issuer: Option<Arc<dyn LinkIssuer>>,
    catalog: Arc<CapabilityCatalog>,
    registry: Arc<Mutex<JobRegistry>>,
    tasks: TaskMap,
}

impl Workflow {
    /// Wire a workflow from its collaborators. History is not loaded; see
    /// [`Workflow::open`].
    pub fn new(
        config: WorkflowConfig,
        api: Arc<dyn ConversionApi>,
        issuer: Option<Arc<dyn LinkIssuer>>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let catalog = CapabilityCatalog::new(Arc::new(ApiCatalogSource(api.clone())), Some(store.clone()));
        let registry = JobRegistry::new(config.kind, config.max_file_size, store);
        Self {
            config,
            api,
            issuer,
            catalog: Arc::new(catalog),
            registry: Arc::new(Mutex::new(registry)),
            tasks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    /// [`Workflow::new`] followed by loading the stored history.
    pub async fn open(
        config: WorkflowConfig,
        api: Arc<dyn ConversionApi>,
        issuer: Option<Arc<dyn LinkIssuer>>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, DocshiftError> {
        let workflow = Self::new(config, api, issuer, store);
        workflow.load_history().await?;
        Ok(workflow)
    }

    /// Use a pre-built catalog instead of fetching one from the API.
    pub fn with_catalog(mut self, catalog: CapabilityCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn kind(&self) -> WorkflowKind {
        self.config.kind
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub async fn load_history(&self) -> Result<usize, DocshiftError> {
        self.registry.lock().await.load_history().await
    }

    /// The capability catalog, fetched on first use.
    pub async fn load_catalog(&self) -> &Catalog {
        self.catalog.load().await
    }

    /// Target formats offered for a file. OCR offers a fixed list.
    pub async fn targets_for_file(&self, file: &FilePayload) -> Vec<String> {
        match self.config.kind {
            WorkflowKind::Ocr => OCR_OUTPUT_FORMATS.iter().map(|f| f.to_string()).collect(),
            WorkflowKind::Convert => {
                let catalog = self.catalog.load().await;
                catalog.targets_for(catalog.lookup_source_format(file)).to_vec()
            }
        }
    }

    /// Target formats for a pending job; empty if the id is unknown.
    pub async fn targets_for(&self, id: JobId) -> Vec<String> {
        let file = match self.registry.lock().await.get(id) {
            Some(job) => job.file.clone(),
            None => return Vec::new(),
        };
        self.targets_for_file(&file).await
    }

    pub async fn add_files(&self, files: Vec<FilePayload>) -> Result<Vec<JobId>, DocshiftError> {
        self.registry.lock().await.add_files(files)
    }

    pub async fn set_target(&self, id: JobId, target: impl Into<String>) -> bool {
        self.registry.lock().await.set_target(id, target)
    }

    pub async fn set_target_at(&self, index: usize, target: impl Into<String>) -> bool {
        self.registry.lock().await.set_target_at(index, target)
    }

    /// Delete a pending job, aborting its task if it is in flight.
    pub async fn remove_pending(&self, id: JobId) -> bool {
        let removed = self.registry.lock().await.remove_pending(id).is_some();
        if removed {
            self.detach(id);
        }
        removed
    }

    pub async fn remove_pending_at(&self, index: usize) -> bool {
        let removed = self.registry.lock().await.remove_pending_at(index);
        match removed {
            Some(job) => {
                self.detach(job.id);
                true
            }
            None => false,
        }
    }

    pub async fn remove_resolved_at(&self, index: usize) -> Result<Option<ResolvedJob>, DocshiftError> {
        self.registry.lock().await.remove_resolved_at(index).await
    }

    /// Abort everything in flight, empty both pools and erase history.
    pub async fn clear_all(&self) -> Result<(), DocshiftError> {
        let mut registry = self.registry.lock().await;
        let handles: Vec<_> = self.lock_tasks().drain().collect();
        for (id, handle) in handles {
            debug!("Aborting job {}", id);
            handle.abort();
        }
        registry.clear_all().await
    }

    /// `Err(MissingTargets)` listing every pending file without a target.
    pub async fn validate(&self) -> Result<(), DocshiftError> {
        let registry = self.registry.lock().await;
        if registry.validate_all_targets_set() {
            Ok(())
        } else {
            Err(DocshiftError::MissingTargets {
                files: registry.missing_targets(),
            })
        }
    }

    pub async fn pending_snapshot(&self) -> Vec<PendingJob> {
        self.registry.lock().await.pending().to_vec()
    }

    pub async fn resolved_snapshot(&self) -> Vec<ResolvedJob> {
        self.registry.lock().await.resolved().to_vec()
    }

    /// The resolved job at `index` in history order.
    pub async fn resolved_at(&self, index: usize) -> Result<ResolvedJob, DocshiftError> {
        self.registry
            .lock()
            .await
            .resolved()
            .get(index)
            .cloned()
            .ok_or_else(|| DocshiftError::JobNotFound {
                what: format!("history position {index}"),
            })
    }

    /// Run every pending job concurrently and wait for all of them.
    ///
    /// Refused with no state change when a job has no target
    /// ([`DocshiftError::MissingTargets`]) or a previous batch is still
    /// running ([`DocshiftError::BatchInProgress`]). Per-job failures are
    /// recorded on the job and reported in the summary, never as `Err`.
    ///
    /// Dropping the returned future before it finishes does not strand any
    /// job: jobs are only marked `processing` together with spawning their
    /// task, and a spawned task records its own result.
    pub async fn run_batch(&self) -> Result<BatchSummary, DocshiftError> {
        {
            let registry = self.registry.lock().await;
            check_dispatchable(&registry)?;
            if registry.pending().is_empty() {
                debug!("run_batch: nothing pending");
                return Ok(BatchSummary::default());
            }
        }

        // Fetched before anything is marked; may hit the network.
        let catalog = match self.config.kind {
            WorkflowKind::Convert => self.catalog.load().await.clone(),
            WorkflowKind::Ocr => Catalog::new(),
        };
        let ctx = Arc::new(BatchContext {
            config: self.config.clone(),
            api: Arc::clone(&self.api),
            issuer: self.issuer.clone(),
            catalog,
            registry: Arc::clone(&self.registry),
            tasks: Arc::clone(&self.tasks),
        });

        // No await point between marking a job and spawning its task.
        let (ids, handles) = {
            let mut registry = self.registry.lock().await;
            check_dispatchable(&registry)?;
            let jobs: Vec<_> = registry
                .pending()
                .iter()
                .map(|j| (j.id, j.file.clone(), j.target.clone().unwrap_or_default()))
                .collect();
            if jobs.is_empty() {
                return Ok(BatchSummary::default());
            }

            info!("Starting {} batch: {} job(s)", self.config.kind, jobs.len());
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_batch_start(jobs.len());
            }

            let mut ids = Vec::with_capacity(jobs.len());
            let mut handles = Vec::with_capacity(jobs.len());
            let mut tasks = lock_task_map(&self.tasks);
            for (id, file, target) in jobs {
                registry.mark_processing(id);
                let handle = tokio::spawn(supervise(Arc::clone(&ctx), id, file, target));
                tasks.insert(id, handle.abort_handle());
                ids.push(id);
                handles.push(handle);
            }
            (ids, handles)
        };
        let total = ids.len();

        let results = futures::future::join_all(handles).await;

        let mut outcomes = Vec::with_capacity(total);
        for (id, result) in ids.into_iter().zip(results) {
            self.lock_tasks().remove(&id);
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => {
                    debug!("Job {} was cancelled", id);
                    JobOutcome::Detached
                }
                Err(e) => {
                    error!("Job {} task failed: {}", id, e);
                    let name = self
                        .registry
                        .lock()
                        .await
                        .get(id)
                        .map(|j| j.file.name.clone())
                        .unwrap_or_default();
                    record_failure(&ctx, id, &name, JobError::Aborted { detail: e.to_string() }).await
                }
            };
            outcomes.push((id, outcome));
        }

        let summary = BatchSummary { outcomes };
        info!(
            "Batch finished: {} completed, {} failed, {} detached",
            summary.completed(),
            summary.failed(),
            summary.detached()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, summary.completed());
        }
        Ok(summary)
    }

    fn detach(&self, id: JobId) {
        if let Some(handle) = self.lock_tasks().remove(&id) {
            debug!("Aborting in-flight job {}", id);
            handle.abort();
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, AbortHandle>> {
        lock_task_map(&self.tasks)
    }
}

/// `Err` when a batch may not start now; never mutates.
fn check_dispatchable(registry: &JobRegistry) -> Result<(), DocshiftError> {
    let in_flight = registry.in_flight();
    if in_flight > 0 {
        return Err(DocshiftError::BatchInProgress { in_flight });
    }
    if !registry.validate_all_targets_set() {
        return Err(DocshiftError::MissingTargets {
            files: registry.missing_targets(),
        });
    }
    Ok(())
}

/// Task body: [`run_job`], with a panic recorded as a failed job. Removes the
/// job's abort handle when done.
async fn supervise(ctx: Arc<BatchContext>, id: JobId, file: FilePayload, target: String) -> JobOutcome {
    let name = file.name.clone();
    let outcome = match AssertUnwindSafe(run_job(Arc::clone(&ctx), id, file, target))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "job task panicked".to_string());
            error!("Job {} panicked: {}", id, detail);
            record_failure(&ctx, id, &name, JobError::Aborted { detail }).await
        }
    };
    lock_task_map(&ctx.tasks).remove(&id);
    outcome
}

/// Mark `id` failed and report it, or report it detached if it was deleted.
async fn record_failure(ctx: &BatchContext, id: JobId, file_name: &str, err: JobError) -> JobOutcome {
    let applied = ctx.registry.lock().await.mark_failed(id, err.clone());
    if !applied {
        warn!("Discarding failure for deleted job {} ('{}'): {}", id, file_name, err);
        return JobOutcome::Detached;
    }
    warn!("Job {} failed: '{}': {}", id, file_name, err);
    if let Some(ref cb) = ctx.config.progress_callback {
        cb.on_job_error(id, file_name, &err.to_string());
    }
    JobOutcome::Failed(err)
}

/// One job: remote call, link issuance, then the registry transition.
async fn run_job(ctx: Arc<BatchContext>, id: JobId, file: FilePayload, target: String) -> JobOutcome {
    let callback: Option<&ProgressCallback> = ctx.config.progress_callback.as_ref();
    if let Some(cb) = callback {
        cb.on_job_start(id, &file.name);
    }
    debug!("Job {}: '{}' → {}", id, file.name, target);

    let response = match ctx.config.kind {
        WorkflowKind::Convert => ctx.api.convert_file(&file, &target).await,
        WorkflowKind::Ocr => ctx.api.extract_text(&file, &target).await,
    };
    let resolved = match response {
        Ok(response) => {
            let resolve_ctx = ResolveContext {
                kind: ctx.config.kind,
                policy: ctx.config.reference_policy,
                issuer: ctx.issuer.as_deref(),
                link_expiry: Duration::from_secs(ctx.config.link_expiry_secs),
                catalog: &ctx.catalog,
            };
            resolve_output(id, &file, &target, response, &resolve_ctx).await
        }
        Err(e) => Err(e),
    };

    match resolved {
        Ok(job) => {
            let mut registry = ctx.registry.lock().await;
            let output_name = job.output_file_name.clone();
            let output_size = job.output_size;
            let applied = match registry.complete(job).await {
                Ok(applied) => applied,
                Err(e) => {
                    error!("Job {} completed but its history entry was not saved: {}", id, e);
                    true
                }
            };
            drop(registry);
            if !applied {
                warn!("Discarding result for deleted job {} ('{}')", id, file.name);
                return JobOutcome::Detached;
            }
            info!("Job {} completed: '{}' → '{}'", id, file.name, output_name);
            if let Some(cb) = callback {
                cb.on_job_complete(id, &file.name, output_size);
            }
            JobOutcome::Completed
        }
        Err(err) => record_failure(&ctx, id, &file.name, err).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::extension_for_format;
    use crate::config::ReferencePolicy;
    use crate::job::JobStatus;
    use crate::pipeline::api::{ApiResponse, ConvertedFile, OriginalFile};
    use crate::pipeline::links::object_key;
    use crate::progress::JobProgressCallback;
    use crate::storage::{HistoryStore, MemoryStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct StubApi {
        catalog: Catalog,
        fail_names: Vec<String>,
        panic_names: Vec<String>,
        gate: Option<Arc<Notify>>,
        catalog_gate: Option<Arc<Notify>>,
        started: Arc<Notify>,
        calls: AtomicUsize,
        catalog_fetches: AtomicUsize,
        ocr_text: Option<String>,
    }

    impl StubApi {
        fn respond(&self, file: &FilePayload, format: &str) -> ApiResponse {
            let stem = file.name.rsplit_once('.').map(|(s, _)| s).unwrap_or(&file.name);
            let out = format!("{stem}.{}", extension_for_format(format));
            ApiResponse {
                original_file: OriginalFile {
                    filename: Some(file.name.clone()),
                },
                converted_file: ConvertedFile {
                    file_name: Some(out.clone()),
                    source_url: Some(object_key(&out)),
                    converted_size: file.size() * 2,
                },
                extracted_text: None,
                status: Some("completed".into()),
            }
        }

        async fn call(&self, file: &FilePayload) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            if let Some(ref gate) = self.gate {
                gate.notified().await;
            }
            tokio::task::yield_now().await;
            if self.panic_names.contains(&file.name) {
                panic!("converter blew up on {}", file.name);
            }
            if self.fail_names.contains(&file.name) {
                return Err(JobError::http(500, Some("conversion failed".into())));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CatalogSource for StubApi {
        async fn fetch_supported_conversions(&self) -> Result<Catalog, JobError> {
            self.catalog_fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(ref gate) = self.catalog_gate {
                gate.notified().await;
            }
            Ok(self.catalog.clone())
        }
    }

    #[async_trait]
    impl ConversionApi for StubApi {
        async fn convert_file(&self, file: &FilePayload, target: &str) -> Result<ApiResponse, JobError> {
            self.call(file).await?;
            Ok(self.respond(file, target))
        }

        async fn extract_text(&self, file: &FilePayload, format: &str) -> Result<ApiResponse, JobError> {
            self.call(file).await?;
            let mut response = self.respond(file, format);
            response.converted_file.file_name = None;
            response.converted_file.source_url = Some(format!(
                "https://cdn.test/{}",
                object_key(&format!("{}.txt", file.name))
            ));
            response.extracted_text = self.ocr_text.clone();
            Ok(response)
        }
    }

    struct StubIssuer;

    #[async_trait]
    impl LinkIssuer for StubIssuer {
        async fn issue(&self, file_name: &str, expires_in: Duration) -> Result<String, JobError> {
            Ok(format!(
                "https://links.test/{}?expires={}",
                object_key(file_name),
                expires_in.as_secs()
            ))
        }
    }

    #[derive(Default)]
    struct EventLog {
        events: std::sync::Mutex<Vec<(JobId, &'static str)>>,
    }

    impl EventLog {
        fn push(&self, id: JobId, event: &'static str) {
            self.events.lock().unwrap().push((id, event));
        }

        fn for_job(&self, id: JobId) -> Vec<&'static str> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(i, _)| *i == id)
                .map(|(_, e)| *e)
                .collect()
        }
    }

    impl JobProgressCallback for EventLog {
        fn on_job_start(&self, id: JobId, _file_name: &str) {
            self.push(id, "start");
        }

        fn on_job_complete(&self, id: JobId, _file_name: &str, _output_size: u64) {
            self.push(id, "complete");
        }

        fn on_job_error(&self, id: JobId, _file_name: &str, _error: &str) {
            self.push(id, "error");
        }
    }

    fn pdf_catalog() -> Catalog {
        Catalog::new().with("application/pdf", "pdf", &["text/plain", "image/png"])
    }

    fn pdf(name: &str) -> FilePayload {
        FilePayload::new(name, "application/pdf", b"%PDF-1.7".to_vec())
    }

    fn workflow_with(
        kind: WorkflowKind,
        api: Arc<StubApi>,
        store: Arc<dyn KeyValueStore>,
        callback: Option<ProgressCallback>,
    ) -> Workflow {
        let mut builder = WorkflowConfig::builder().kind(kind);
        if let Some(cb) = callback {
            builder = builder.progress_callback(cb);
        }
        Workflow::new(builder.build().unwrap(), api, Some(Arc::new(StubIssuer)), store)
    }

    fn workflow(api: Arc<StubApi>) -> Workflow {
        workflow_with(WorkflowKind::Convert, api, Arc::new(MemoryStore::new()), None)
    }

    #[tokio::test]
    async fn single_pdf_converts_to_text() {
        let api = Arc::new(StubApi {
            catalog: pdf_catalog(),
            ..Default::default()
        });
        let wf = workflow(api.clone());

        let ids = wf.add_files(vec![pdf("report.pdf")]).await.unwrap();
        assert_eq!(wf.targets_for(ids[0]).await, ["text/plain", "image/png"]);
        assert!(wf.set_target(ids[0], "text/plain").await);

        let summary = wf.run_batch().await.unwrap();
        assert_eq!(summary.outcome(ids[0]), Some(&JobOutcome::Completed));

        assert!(wf.pending_snapshot().await.is_empty());
        let resolved = wf.resolved_snapshot().await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(wf.resolved_at(0).await.unwrap(), resolved[0]);
        assert!(matches!(
            wf.resolved_at(1).await,
            Err(DocshiftError::JobNotFound { .. })
        ));
        assert_eq!(resolved[0].output_extension, "txt");
        assert_eq!(resolved[0].output_file_name, "report.txt");
        assert_eq!(resolved[0].original_file_name, "report.pdf");
        assert_eq!(
            resolved[0].download_url,
            "https://links.test/media/converted_files/report.txt?expires=3600"
        );
        assert_eq!(api.catalog_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_refused_when_a_target_is_missing() {
        let api = Arc::new(StubApi::default());
        let wf = workflow(api.clone());
        let ids = wf.add_files(vec![pdf("a.pdf"), pdf("b.pdf")]).await.unwrap();
        wf.set_target(ids[0], "text/plain").await;

        let err = wf.run_batch().await.unwrap_err();
        match err {
            DocshiftError::MissingTargets { files } => assert_eq!(files, ["b.pdf"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(wf.validate().await.is_err());

        let pending = wf.pending_snapshot().await;
        assert!(pending.iter().all(|j| j.status == JobStatus::Ready));
        assert!(wf.resolved_snapshot().await.is_empty());
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(api.catalog_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_failure_does_not_affect_sibling() {
        let api = Arc::new(StubApi {
            fail_names: vec!["bad.pdf".into()],
            ..Default::default()
        });
        let wf = workflow(api);
        let ids = wf.add_files(vec![pdf("bad.pdf"), pdf("good.pdf")]).await.unwrap();
        wf.set_target_at(0, "text/plain").await;
        wf.set_target_at(1, "text/plain").await;

        let summary = wf.run_batch().await.unwrap();
        assert_eq!(summary.completed(), 1);
        assert_eq!(summary.failed(), 1);

        let pending = wf.pending_snapshot().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[0]);
        assert_eq!(pending[0].status, JobStatus::Failed);
        assert_eq!(
            pending[0].error.as_ref().map(|e| e.to_string()).as_deref(),
            Some("conversion failed")
        );

        let resolved = wf.resolved_snapshot().await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, ids[1]);
    }

    #[tokio::test]
    async fn failed_job_is_redispatched_by_next_batch() {
        let api = Arc::new(StubApi {
            fail_names: vec!["flaky.pdf".into()],
            ..Default::default()
        });
        let wf = workflow(api.clone());
        wf.add_files(vec![pdf("flaky.pdf")]).await.unwrap();
        wf.set_target_at(0, "text/plain").await;

        assert_eq!(wf.run_batch().await.unwrap().failed(), 1);
        assert_eq!(wf.pending_snapshot().await[0].status, JobStatus::Failed);

        assert_eq!(wf.run_batch().await.unwrap().failed(), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert_eq!(wf.pending_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn deleting_position_zero_keeps_second_target() {
        let wf = workflow(Arc::new(StubApi::default()));
        let ids = wf.add_files(vec![pdf("a.pdf"), pdf("b.pdf")]).await.unwrap();
        wf.set_target_at(1, "image/png").await;

        assert!(wf.remove_pending_at(0).await);
        let pending = wf.pending_snapshot().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ids[1]);
        assert_eq!(pending[0].target.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn second_batch_is_rejected_while_first_runs() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(StubApi {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let wf = Arc::new(workflow(api.clone()));
        let ids = wf.add_files(vec![pdf("slow.pdf")]).await.unwrap();
        wf.set_target(ids[0], "text/plain").await;

        let first = tokio::spawn({
            let wf = Arc::clone(&wf);
            async move { wf.run_batch().await }
        });
        api.started.notified().await;

        let err = wf.run_batch().await.unwrap_err();
        assert!(matches!(err, DocshiftError::BatchInProgress { in_flight: 1 }));
        assert_eq!(wf.pending_snapshot().await[0].status, JobStatus::Processing);

        gate.notify_one();
        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.completed(), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deleting_in_flight_job_discards_its_result() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(StubApi {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let wf = Arc::new(workflow(api.clone()));
        let ids = wf.add_files(vec![pdf("doomed.pdf")]).await.unwrap();
        wf.set_target(ids[0], "text/plain").await;

        let batch = tokio::spawn({
            let wf = Arc::clone(&wf);
            async move { wf.run_batch().await }
        });
        api.started.notified().await;

        assert!(wf.remove_pending(ids[0]).await);
        gate.notify_one();

        let summary = batch.await.unwrap().unwrap();
        assert_eq!(summary.outcome(ids[0]), Some(&JobOutcome::Detached));
        assert!(wf.pending_snapshot().await.is_empty());
        assert!(wf.resolved_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn processing_precedes_terminal_event_for_every_job() {
        let log = Arc::new(EventLog::default());
        let api = Arc::new(StubApi {
            fail_names: vec!["b.pdf".into()],
            ..Default::default()
        });
        let wf = workflow_with(
            WorkflowKind::Convert,
            api,
            Arc::new(MemoryStore::new()),
            Some(log.clone() as ProgressCallback),
        );
        let ids = wf
            .add_files(vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")])
            .await
            .unwrap();
        for id in &ids {
            wf.set_target(*id, "text/plain").await;
        }

        wf.run_batch().await.unwrap();
        assert_eq!(log.for_job(ids[0]), ["start", "complete"]);
        assert_eq!(log.for_job(ids[1]), ["start", "error"]);
        assert_eq!(log.for_job(ids[2]), ["start", "complete"]);
    }

    #[tokio::test]
    async fn ocr_keeps_inline_text_and_direct_url() {
        let api = Arc::new(StubApi {
            ocr_text: Some("hello world".into()),
            ..Default::default()
        });
        let wf = Workflow::new(
            WorkflowConfig::builder().kind(WorkflowKind::Ocr).build().unwrap(),
            api.clone(),
            None,
            Arc::new(MemoryStore::new()),
        );
        assert_eq!(wf.kind(), WorkflowKind::Ocr);
        let scan = FilePayload::new("scan one.png", "image/png", b"png".to_vec());
        let ids = wf.add_files(vec![scan]).await.unwrap();

        let targets = wf.targets_for(ids[0]).await;
        assert_eq!(targets.len(), 4);
        assert_eq!(targets[0], "text/plain");
        wf.set_target(ids[0], "text/plain").await;

        let summary = wf.run_batch().await.unwrap();
        assert_eq!(summary.completed(), 1);
        let resolved = wf.resolved_snapshot().await;
        assert_eq!(resolved[0].kind, WorkflowKind::Ocr);
        assert_eq!(resolved[0].extracted_text.as_deref(), Some("hello world"));
        assert_eq!(resolved[0].output_file_name, "scan_one.png.txt");
        assert!(resolved[0].download_url.starts_with("https://cdn.test/"));
        assert!(resolved[0].is_inline_text());
        assert_eq!(api.catalog_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_issuer_fails_job_without_touching_resolved() {
        let api = Arc::new(StubApi::default());
        let config = WorkflowConfig::builder()
            .reference_policy(ReferencePolicy::Always)
            .build()
            .unwrap();
        let wf = Workflow::new(config, api, None, Arc::new(MemoryStore::new()));
        wf.add_files(vec![pdf("a.pdf")]).await.unwrap();
        wf.set_target_at(0, "text/plain").await;

        let summary = wf.run_batch().await.unwrap();
        assert_eq!(summary.failed(), 1);
        assert!(wf.resolved_snapshot().await.is_empty());
        assert!(matches!(
            wf.pending_snapshot().await[0].error,
            Some(JobError::ReferenceIssuance { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_completions_are_all_persisted() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let wf = workflow_with(WorkflowKind::Convert, Arc::new(StubApi::default()), store.clone(), None);
        let files: Vec<_> = (0..25).map(|i| pdf(&format!("doc{i}.pdf"))).collect();
        let ids = wf.add_files(files).await.unwrap();
        for id in &ids {
            wf.set_target(*id, "text/plain").await;
        }

        let summary = wf.run_batch().await.unwrap();
        assert_eq!(summary.completed(), 25);

        let stored: Vec<ResolvedJob> = HistoryStore::new(store.clone(), WorkflowKind::Convert.history_key())
            .load()
            .await
            .unwrap();
        assert_eq!(stored.len(), 25);

        let reopened = Workflow::open(
            WorkflowConfig::default(),
            Arc::new(StubApi::default()),
            None,
            store,
        )
        .await
        .unwrap();
        assert_eq!(reopened.resolved_snapshot().await.len(), 25);
    }

    #[tokio::test]
    async fn clear_all_removes_everything() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let wf = workflow_with(WorkflowKind::Convert, Arc::new(StubApi::default()), store.clone(), None);
        let ids = wf.add_files(vec![pdf("a.pdf"), pdf("b.pdf")]).await.unwrap();
        wf.set_target(ids[0], "text/plain").await;
        wf.set_target(ids[1], "text/plain").await;
        wf.run_batch().await.unwrap();
        wf.add_files(vec![pdf("c.pdf")]).await.unwrap();

        wf.clear_all().await.unwrap();
        assert!(wf.pending_snapshot().await.is_empty());
        assert!(wf.resolved_snapshot().await.is_empty());
        assert_eq!(
            store.get(WorkflowKind::Convert.history_key()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let wf = workflow(Arc::new(StubApi::default()));
        let summary = wf.run_batch().await.unwrap();
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn fixed_catalog_skips_the_fetch() {
        let api = Arc::new(StubApi::default());
        let wf = workflow(api.clone()).with_catalog(CapabilityCatalog::fixed(pdf_catalog()));
        let file = pdf("x.pdf");
        assert_eq!(wf.targets_for_file(&file).await, ["text/plain", "image/png"]);
        assert_eq!(api.catalog_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropped_batch_during_catalog_fetch_leaves_jobs_ready() {
        let catalog_gate = Arc::new(Notify::new());
        let api = Arc::new(StubApi {
            catalog: pdf_catalog(),
            catalog_gate: Some(catalog_gate.clone()),
            ..Default::default()
        });
        let wf = workflow(api.clone());
        let ids = wf.add_files(vec![pdf("report.pdf")]).await.unwrap();
        wf.set_target(ids[0], "text/plain").await;

        let first = tokio::time::timeout(Duration::from_millis(50), wf.run_batch()).await;
        assert!(first.is_err());
        assert_eq!(wf.pending_snapshot().await[0].status, JobStatus::Ready);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);

        catalog_gate.notify_one();
        let summary = wf.run_batch().await.unwrap();
        assert_eq!(summary.outcome(ids[0]), Some(&JobOutcome::Completed));
        assert!(wf.lock_tasks().is_empty());
    }

    #[tokio::test]
    async fn dropped_batch_after_dispatch_still_finishes_jobs() {
        let gate = Arc::new(Notify::new());
        let api = Arc::new(StubApi {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let wf = workflow(api.clone());
        let ids = wf.add_files(vec![pdf("slow.pdf")]).await.unwrap();
        wf.set_target(ids[0], "text/plain").await;

        let first = tokio::time::timeout(Duration::from_millis(50), wf.run_batch()).await;
        assert!(first.is_err());
        assert_eq!(wf.pending_snapshot().await[0].status, JobStatus::Processing);

        gate.notify_one();
        for _ in 0..200 {
            if wf.pending_snapshot().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(wf.pending_snapshot().await.is_empty());
        assert_eq!(wf.resolved_snapshot().await[0].id, ids[0]);
        assert!(wf.lock_tasks().is_empty());

        assert!(wf.run_batch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_job_fails_alone() {
        let log = Arc::new(EventLog::default());
        let api = Arc::new(StubApi {
            panic_names: vec!["boom.pdf".into()],
            ..Default::default()
        });
        let wf = workflow_with(
            WorkflowKind::Convert,
            api,
            Arc::new(MemoryStore::new()),
            Some(log.clone() as ProgressCallback),
        );
        let ids = wf.add_files(vec![pdf("boom.pdf"), pdf("fine.pdf")]).await.unwrap();
        wf.set_target(ids[0], "text/plain").await;
        wf.set_target(ids[1], "text/plain").await;

        let summary = wf.run_batch().await.unwrap();
        match summary.outcome(ids[0]) {
            Some(JobOutcome::Failed(JobError::Aborted { detail })) => {
                assert!(detail.contains("boom.pdf"), "got: {detail}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(summary.outcome(ids[1]), Some(&JobOutcome::Completed));
        assert_eq!(log.for_job(ids[0]), ["start", "error"]);

        let pending = wf.pending_snapshot().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, JobStatus::Failed);
        assert!(wf.lock_tasks().is_empty());
    }
}
