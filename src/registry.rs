//! Job registry: the pending and resolved pools.
//!
//! Jobs are addressed by [`JobId`]. The positional forms (`*_at`) exist for
//! front-ends that show numbered lists; they resolve the position to an id
//! at call time and never hold on to it.
//!
//! The resolved pool mirrors the durable history for the workflow kind. Every
//! method that changes it rewrites or appends to storage before returning.

use crate::config::WorkflowKind;
use crate::error::{DocshiftError, JobError};
use crate::job::{FilePayload, JobId, JobStatus, PendingJob, ResolvedJob};
use crate::storage::{HistoryStore, KeyValueStore};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct JobRegistry {
    kind: WorkflowKind,
    max_file_size: u64,
    pending: Vec<PendingJob>,
    resolved: Vec<ResolvedJob>,
    history: HistoryStore,
}

impl JobRegistry {
    pub fn new(kind: WorkflowKind, max_file_size: u64, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kind,
            max_file_size,
            pending: Vec::new(),
            resolved: Vec::new(),
            history: HistoryStore::new(store, kind.history_key()),
        }
    }

    /// Replace the resolved pool with the stored history. Returns its length.
    pub async fn load_history(&mut self) -> Result<usize, DocshiftError> {
        self.resolved = self.history.load().await?;
        debug!(
            "Loaded {} {} history record(s) from '{}'",
            self.resolved.len(),
            self.kind,
            self.history.key()
        );
        Ok(self.resolved.len())
    }

    pub fn pending(&self) -> &[PendingJob] {
        &self.pending
    }

    pub fn resolved(&self) -> &[ResolvedJob] {
        &self.resolved
    }

    pub fn get(&self, id: JobId) -> Option<&PendingJob> {
        self.pending.iter().find(|j| j.id == id)
    }

    pub fn position_of(&self, id: JobId) -> Option<usize> {
        self.pending.iter().position(|j| j.id == id)
    }

    pub fn id_at(&self, index: usize) -> Option<JobId> {
        self.pending.get(index).map(|j| j.id)
    }

    /// Append one `ready` job per file, in order.
    ///
    /// The whole call is rejected, and nothing is added, if any file is over
    /// the size limit or not accepted by this workflow kind.
    pub fn add_files(&mut self, files: Vec<FilePayload>) -> Result<Vec<JobId>, DocshiftError> {
        for file in &files {
            if file.size() > self.max_file_size {
                return Err(DocshiftError::FileTooLarge {
                    file: file.name.clone(),
                    size: file.size(),
                    max: self.max_file_size,
                });
            }
            if !self.kind.accepts(&file.name, &file.mime_type) {
                return Err(DocshiftError::UnsupportedInput {
                    file: file.name.clone(),
                    workflow: self.kind.to_string(),
                    mime_type: file.mime_type.clone(),
                });
            }
        }

        let ids = files
            .into_iter()
            .map(|file| {
                let job = PendingJob::new(file);
                let id = job.id;
                debug!("Added job {} for '{}'", id, job.file.name);
                self.pending.push(job);
                id
            })
            .collect();
        Ok(ids)
    }

    /// Set or overwrite the target format. Returns `false` if no such job.
    pub fn set_target(&mut self, id: JobId, target: impl Into<String>) -> bool {
        match self.pending.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.target = Some(target.into());
                true
            }
            None => false,
        }
    }

    pub fn set_target_at(&mut self, index: usize, target: impl Into<String>) -> bool {
        match self.id_at(index) {
            Some(id) => self.set_target(id, target),
            None => false,
        }
    }

    pub fn remove_pending(&mut self, id: JobId) -> Option<PendingJob> {
        let pos = self.position_of(id)?;
        Some(self.pending.remove(pos))
    }

    pub fn remove_pending_at(&mut self, index: usize) -> Option<PendingJob> {
        (index < self.pending.len()).then(|| self.pending.remove(index))
    }

    /// Delete a resolved job and rewrite the stored history to match.
    pub async fn remove_resolved_at(&mut self, index: usize) -> Result<Option<ResolvedJob>, DocshiftError> {
        if index >= self.resolved.len() {
            return Ok(None);
        }
        let removed = self.resolved.remove(index);
        self.history.rewrite(&self.resolved).await?;
        info!("Removed '{}' from {} history", removed.output_file_name, self.kind);
        Ok(Some(removed))
    }

    /// Empty both pools and erase the stored history.
    pub async fn clear_all(&mut self) -> Result<(), DocshiftError> {
        self.pending.clear();
        self.resolved.clear();
        self.history.clear().await?;
        info!("Cleared all {} jobs", self.kind);
        Ok(())
    }

    /// True iff every pending job has a non-empty target.
    pub fn validate_all_targets_set(&self) -> bool {
        self.pending.iter().all(PendingJob::has_target)
    }

    /// Names of pending files still missing a target, in pool order.
    pub fn missing_targets(&self) -> Vec<String> {
        self.pending
            .iter()
            .filter(|j| !j.has_target())
            .map(|j| j.file.name.clone())
            .collect()
    }

    /// Number of pending jobs currently `processing`.
    pub fn in_flight(&self) -> usize {
        self.pending
            .iter()
            .filter(|j| j.status == JobStatus::Processing)
            .count()
    }

    pub(crate) fn mark_processing(&mut self, id: JobId) -> bool {
        match self.pending.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.status = JobStatus::Processing;
                job.error = None;
                true
            }
            None => false,
        }
    }

    pub(crate) fn mark_failed(&mut self, id: JobId, error: JobError) -> bool {
        match self.pending.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.status = JobStatus::Failed;
                job.error = Some(error);
                true
            }
            None => false,
        }
    }

    /// Move a finished job from pending to resolved and append it to history.
    ///
    /// Returns `Ok(false)` without touching either pool when the job is no
    /// longer pending (deleted while in flight). The in-memory move happens
    /// even if the storage write then fails.
    pub(crate) async fn complete(&mut self, resolved: ResolvedJob) -> Result<bool, DocshiftError> {
        let Some(pos) = self.position_of(resolved.id) else {
            return Ok(false);
        };
        self.pending.remove(pos);
        self.resolved.push(resolved);
        if let Some(last) = self.resolved.last() {
            self.history.append(last).await?;
        }
        Ok(true)
    }
}
