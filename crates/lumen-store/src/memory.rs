//! In-process job store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use lumen_models::{Job, JobId, JobPatch};

use crate::error::{StoreError, StoreResult};
use crate::JobStore;

/// Job store backed by a map of per-job mutexes.
///
/// The map lock is only held to look up or insert an entry; updates to a job
/// take that job's own lock, so writers to different jobs never wait on each
/// other.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: &JobId) -> Option<Arc<Mutex<Job>>> {
        self.jobs.read().await.get(id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>> {
        match self.entry(id).await {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn create(&self, job: Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        debug!(job_id = %job.id, "Created job record");
        jobs.insert(job.id.clone(), Arc::new(Mutex::new(job)));
        Ok(())
    }

    async fn upsert(&self, id: &JobId, patch: JobPatch) -> StoreResult<Job> {
        let slot = match self.entry(id).await {
            Some(slot) => slot,
            None => {
                let mut jobs = self.jobs.write().await;
                match jobs.get(id) {
                    Some(slot) => slot.clone(),
                    None => {
                        let job = Job::from_patch(id.clone(), patch)?;
                        jobs.insert(id.clone(), Arc::new(Mutex::new(job.clone())));
                        return Ok(job);
                    }
                }
            }
        };

        let mut job = slot.lock().await;
        job.apply(patch)?;
        Ok(job.clone())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_models::{JobStatus, ProcessingOptions};

    fn intake_job() -> Job {
        Job::intake(
            JobId::new(),
            "clip.mp4",
            ProcessingOptions::default(),
            None,
            true,
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryJobStore::new();
        let job = intake_job();
        store.create(job.clone()).await.unwrap();

        assert_eq!(store.get(&job.id).await.unwrap(), Some(job.clone()));
        assert!(matches!(
            store.create(job).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert_eq!(store.get(&JobId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_creates_missing_record() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        let job = store.upsert(&id, JobPatch::progress(20)).await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(store.get(&id).await.unwrap().unwrap().progress, 20);
    }

    #[tokio::test]
    async fn test_terminal_records_are_immutable() {
        let store = MemoryJobStore::new();
        let job = intake_job();
        store.create(job.clone()).await.unwrap();

        store
            .upsert(&job.id, JobPatch::completed("clip-1.webm"))
            .await
            .unwrap();
        let err = store
            .upsert(&job.id, JobPatch::failed("late failure"))
            .await
            .unwrap_err();
        assert!(err.is_terminal());

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.error, None);
    }

    #[tokio::test]
    async fn test_concurrent_jobs_do_not_interfere() {
        let store = Arc::new(MemoryJobStore::new());
        let mut handles = Vec::new();

        for i in 0..16u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let job = intake_job();
                store.create(job.clone()).await.unwrap();
                for p in (20..=90).step_by(10) {
                    store.upsert(&job.id, JobPatch::progress(p)).await.unwrap();
                }
                if i % 2 == 0 {
                    store
                        .upsert(&job.id, JobPatch::completed(format!("out-{i}.webm")))
                        .await
                        .unwrap();
                } else {
                    store
                        .upsert(&job.id, JobPatch::failed("ffmpeg exited with code 1"))
                        .await
                        .unwrap();
                }
                (i, job.id)
            }));
        }

        for handle in handles {
            let (i, id) = handle.await.unwrap();
            let job = store.get(&id).await.unwrap().unwrap();
            if i % 2 == 0 {
                assert_eq!(job.status, JobStatus::Completed);
                assert_eq!(job.output_filename, Some(format!("out-{i}.webm")));
            } else {
                assert_eq!(job.status, JobStatus::Error);
                assert_eq!(job.progress, 0);
            }
        }
    }
}
