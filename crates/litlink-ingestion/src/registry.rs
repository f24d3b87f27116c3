//! Job registry: the only state shared across jobs.
//!
//! The registry is an explicit object handed to the orchestrator. Each
//! entry is a [`JobHandle`]; writes go through [`JobHandle::update`] and
//! reads through [`JobHandle::snapshot`], both under the same lock, so a
//! reader never sees a half-applied change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::job::{AcquisitionJob, JobId, JobSnapshot};

pub struct JobHandle {
    id: JobId,
    job: RwLock<AcquisitionJob>,
    cancelled: AtomicBool,
}

impl JobHandle {
    pub fn new(job: AcquisitionJob) -> Self {
        Self {
            id: job.id,
            job: RwLock::new(job),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Apply `f` under the write lock. Keep `f` short and free of I/O.
    pub async fn update<R>(&self, f: impl FnOnce(&mut AcquisitionJob) -> R) -> R {
        let mut job = self.job.write().await;
        f(&mut job)
    }

    /// Read an arbitrary projection under the read lock.
    pub async fn read<R>(&self, f: impl FnOnce(&AcquisitionJob) -> R) -> R {
        let job = self.job.read().await;
        f(&job)
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        self.job.read().await.snapshot()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: AcquisitionJob) -> Arc<JobHandle> {
        let handle = Arc::new(JobHandle::new(job));
        self.jobs.write().await.insert(handle.id(), handle.clone());
        debug!(job_id = %handle.id(), "Job registered");
        handle
    }

    pub async fn get(&self, id: &JobId) -> Option<Arc<JobHandle>> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn snapshot(&self, id: &JobId) -> Option<JobSnapshot> {
        let handle = self.get(id).await?;
        Some(handle.snapshot().await)
    }

    /// Snapshots of every job, oldest first.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        let handles: Vec<_> = self.jobs.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.snapshot().await);
        }
        out.sort_by_key(|s| s.created_at);
        out
    }

    /// Flag a job for cancellation. Returns false for unknown ids.
    pub async fn cancel(&self, id: &JobId) -> bool {
        match self.get(id).await {
            Some(handle) => {
                handle.cancel();
                info!(job_id = %id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Drop every completed or failed job. Returns how many were removed.
    pub async fn remove_finished(&self) -> usize {
        let handles: Vec<_> = self.jobs.read().await.values().cloned().collect();
        let mut finished = Vec::new();
        for handle in handles {
            if handle.read(|j| j.status().is_terminal()).await {
                finished.push(handle.id());
            }
        }
        let mut jobs = self.jobs.write().await;
        for id in &finished {
            jobs.remove(id);
        }
        finished.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    fn job(query: &str) -> AcquisitionJob {
        AcquisitionJob::new(query, vec!["crossref".to_string()], 5, None, vec![])
    }

    #[tokio::test]
    async fn test_insert_get_snapshot() {
        let registry = JobRegistry::new();
        let handle = registry.insert(job("q")).await;
        let snap = registry.snapshot(&handle.id()).await.unwrap();
        assert_eq!(snap.query, "q");
        assert_eq!(snap.status, JobStatus::Pending);
        assert!(registry.snapshot(&uuid::Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_update_is_visible_to_snapshot() {
        let registry = JobRegistry::new();
        let handle = registry.insert(job("q")).await;
        handle.update(|j| j.set_progress(0.4)).await;
        assert_eq!(handle.snapshot().await.progress, 0.4);
    }

    #[tokio::test]
    async fn test_cancel_and_remove_finished() {
        let registry = JobRegistry::new();
        let running = registry.insert(job("running")).await;
        let done = registry.insert(job("done")).await;
        done.update(|j| j.fail("boom")).await;

        assert!(registry.cancel(&running.id()).await);
        assert!(running.is_cancelled());
        assert!(!registry.cancel(&uuid::Uuid::new_v4()).await);

        assert_eq!(registry.remove_finished().await, 1);
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.list().await[0].query, "running");
    }
}
