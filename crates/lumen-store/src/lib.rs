//! Job record store.
//!
//! Two backends implement [`JobStore`]:
//! - [`MemoryJobStore`] for single-process deployments and tests
//! - [`RedisJobStore`] for sharing job state between API replicas
//!
//! Both apply patches through [`Job::apply`], so the job invariants hold
//! regardless of backend. Writes to a job that is already completed or
//! failed are rejected.

pub mod error;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use lumen_models::{Job, JobId, JobPatch};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use redis_store::RedisJobStore;

/// Key-value store of job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Fetch a job, `None` when the id is unknown.
    async fn get(&self, id: &JobId) -> StoreResult<Option<Job>>;

    /// Insert a new job record. Fails if the id is taken.
    async fn create(&self, job: Job) -> StoreResult<()>;

    /// Apply a partial update, creating the record if it does not exist.
    ///
    /// Returns the job after the update.
    async fn upsert(&self, id: &JobId, patch: JobPatch) -> StoreResult<Job>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Backend name for logs and readiness output.
    fn backend(&self) -> &'static str;
}
