//! Persistence ports (§4.A).
//!
//! Grounded on `ProcessStore` in the source this workspace was built from:
//! one `#[async_trait]` trait per concern, CRUD plus the specialized
//! mutators the monitor and the sibling-cancellation engine need to update
//! small slices of state atomically. No component above this module
//! formulates queries — it calls these methods.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Dictionary, HashTarget, Job, JobState, Liveness, Worker};

#[async_trait]
pub trait WorkerStore: Send + Sync {
    async fn create(&self, worker: &Worker) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Worker>>;
    async fn update(&self, worker: &Worker) -> Result<()>;
    async fn list(&self) -> Result<Vec<Worker>>;

    async fn update_liveness(&self, id: Uuid, state: Liveness) -> Result<()>;
    async fn update_last_seen(&self, id: Uuid) -> Result<()>;
    async fn update_throughput(&self, id: Uuid, value: u64) -> Result<()>;
    async fn update_throughput_and_liveness(
        &self,
        id: Uuid,
        value: u64,
        state: Liveness,
    ) -> Result<()>;

    async fn lookup_by_credential(&self, credential: &str) -> Result<Option<Worker>>;
    async fn lookup_by_address(&self, address: &str, port: u16) -> Result<Option<Worker>>;
    async fn lookup_by_name(&self, name: &str) -> Result<Option<Worker>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;
    async fn update(&self, job: &Job) -> Result<()>;

    async fn update_progress(&self, id: Uuid, progress: f64, throughput: u64) -> Result<()>;
    async fn update_liveness(&self, id: Uuid, state: JobState) -> Result<()>;

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>>;
    /// Siblings of a distributed job are discovered by a shared name
    /// prefix (see `jobs::sibling_base_name`); this returns every job
    /// whose name starts with `prefix`, excluding `job_id` itself.
    async fn list_by_name_prefix(&self, prefix: &str, exclude: Uuid) -> Result<Vec<Job>>;
}

#[async_trait]
pub trait DictionaryStore: Send + Sync {
    async fn create(&self, dictionary: &Dictionary) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Dictionary>>;
    async fn list(&self) -> Result<Vec<Dictionary>>;
}

#[async_trait]
pub trait HashTargetStore: Send + Sync {
    async fn create(&self, target: &HashTarget) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<HashTarget>>;
    async fn list(&self) -> Result<Vec<HashTarget>>;
}

/// Port onto the external credential issuer (out of scope per §1 — issuance
/// and validation happen elsewhere). The directory only ever asks "is this
/// credential known, and what worker name is it bound to?".
#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    async fn bound_name(&self, credential: &str) -> Result<Option<String>>;
}
