//! In-memory persistence backend, grounded on `MemoryStore` in the source
//! this workspace was built from: one `RwLock<Inner>` over plain
//! `HashMap`s, POC/testing default.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};
use crate::store::{CredentialDirectory, DictionaryStore, HashTargetStore, JobStore, WorkerStore};
use crate::types::{Dictionary, HashTarget, Job, JobState, Liveness, Worker};

#[derive(Default)]
struct WorkerInner {
    by_id: HashMap<Uuid, Worker>,
}

/// In-memory implementation of `WorkerStore`.
#[derive(Default)]
pub struct MemoryWorkerStore {
    inner: RwLock<WorkerInner>,
}

impl MemoryWorkerStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

fn not_found(id: Uuid) -> CoordinatorError {
    CoordinatorError::NotFound { kind: "worker", id }
}

#[async_trait]
impl WorkerStore for MemoryWorkerStore {
    async fn create(&self, worker: &Worker) -> Result<()> {
        let mut w = self.inner.write().await;
        w.by_id.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Worker>> {
        let r = self.inner.read().await;
        Ok(r.by_id.get(&id).cloned())
    }

    async fn update(&self, worker: &Worker) -> Result<()> {
        let mut w = self.inner.write().await;
        w.by_id.insert(worker.id, worker.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Worker>> {
        let r = self.inner.read().await;
        Ok(r.by_id.values().cloned().collect())
    }

    async fn update_liveness(&self, id: Uuid, state: Liveness) -> Result<()> {
        let mut w = self.inner.write().await;
        let worker = w.by_id.get_mut(&id).ok_or_else(|| not_found(id))?;
        worker.liveness = state;
        if state == Liveness::Offline {
            worker.throughput = 0;
        }
        worker.updated_at = Utc::now();
        Ok(())
    }

    async fn update_last_seen(&self, id: Uuid) -> Result<()> {
        let mut w = self.inner.write().await;
        let worker = w.by_id.get_mut(&id).ok_or_else(|| not_found(id))?;
        worker.last_seen = Utc::now();
        Ok(())
    }

    async fn update_throughput(&self, id: Uuid, value: u64) -> Result<()> {
        let mut w = self.inner.write().await;
        let worker = w.by_id.get_mut(&id).ok_or_else(|| not_found(id))?;
        worker.throughput = value;
        worker.updated_at = Utc::now();
        Ok(())
    }

    async fn update_throughput_and_liveness(
        &self,
        id: Uuid,
        value: u64,
        state: Liveness,
    ) -> Result<()> {
        let mut w = self.inner.write().await;
        let worker = w.by_id.get_mut(&id).ok_or_else(|| not_found(id))?;
        worker.throughput = if state == Liveness::Offline { 0 } else { value };
        worker.liveness = state;
        worker.updated_at = Utc::now();
        Ok(())
    }

    async fn lookup_by_credential(&self, credential: &str) -> Result<Option<Worker>> {
        let r = self.inner.read().await;
        Ok(r.by_id
            .values()
            .find(|w| w.credential == credential)
            .cloned())
    }

    async fn lookup_by_address(&self, address: &str, port: u16) -> Result<Option<Worker>> {
        let r = self.inner.read().await;
        Ok(r.by_id
            .values()
            .find(|w| w.address == address && w.port == port)
            .cloned())
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<Worker>> {
        let r = self.inner.read().await;
        Ok(r.by_id.values().find(|w| w.name == name).cloned())
    }
}

#[derive(Default)]
struct JobInner {
    by_id: HashMap<Uuid, Job>,
}

/// In-memory implementation of `JobStore`.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<JobInner>,
}

impl MemoryJobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

fn job_not_found(id: Uuid) -> CoordinatorError {
    CoordinatorError::NotFound { kind: "job", id }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<()> {
        let mut w = self.inner.write().await;
        w.by_id.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let r = self.inner.read().await;
        Ok(r.by_id.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let mut w = self.inner.write().await;
        w.by_id.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_progress(&self, id: Uuid, progress: f64, throughput: u64) -> Result<()> {
        let mut w = self.inner.write().await;
        let job = w.by_id.get_mut(&id).ok_or_else(|| job_not_found(id))?;
        job.progress = progress;
        job.throughput = throughput;
        Ok(())
    }

    async fn update_liveness(&self, id: Uuid, state: JobState) -> Result<()> {
        let mut w = self.inner.write().await;
        let job = w.by_id.get_mut(&id).ok_or_else(|| job_not_found(id))?;
        job.state = state;
        Ok(())
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let r = self.inner.read().await;
        Ok(r.by_id
            .values()
            .filter(|j| j.state == state)
            .cloned()
            .collect())
    }

    async fn list_by_name_prefix(&self, prefix: &str, exclude: Uuid) -> Result<Vec<Job>> {
        let r = self.inner.read().await;
        Ok(r.by_id
            .values()
            .filter(|j| j.id != exclude && j.name.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct DictionaryInner {
    by_id: HashMap<Uuid, Dictionary>,
}

#[derive(Default)]
pub struct MemoryDictionaryStore {
    inner: RwLock<DictionaryInner>,
}

impl MemoryDictionaryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DictionaryStore for MemoryDictionaryStore {
    async fn create(&self, dictionary: &Dictionary) -> Result<()> {
        let mut w = self.inner.write().await;
        w.by_id.insert(dictionary.id, dictionary.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Dictionary>> {
        let r = self.inner.read().await;
        Ok(r.by_id.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Dictionary>> {
        let r = self.inner.read().await;
        Ok(r.by_id.values().cloned().collect())
    }
}

#[derive(Default)]
struct HashTargetInner {
    by_id: HashMap<Uuid, HashTarget>,
}

#[derive(Default)]
pub struct MemoryHashTargetStore {
    inner: RwLock<HashTargetInner>,
}

impl MemoryHashTargetStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl HashTargetStore for MemoryHashTargetStore {
    async fn create(&self, target: &HashTarget) -> Result<()> {
        let mut w = self.inner.write().await;
        w.by_id.insert(target.id, target.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<HashTarget>> {
        let r = self.inner.read().await;
        Ok(r.by_id.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<HashTarget>> {
        let r = self.inner.read().await;
        Ok(r.by_id.values().cloned().collect())
    }
}

/// In-memory stand-in for the external credential issuer. Tests and the
/// demo binary seed it directly; a real deployment points `directory.rs`
/// at whatever issues credentials instead.
#[derive(Default)]
pub struct MemoryCredentialDirectory {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn issue(&self, credential: impl Into<String>, bound_name: impl Into<String>) {
        self.inner
            .write()
            .await
            .insert(credential.into(), bound_name.into());
    }
}

#[async_trait]
impl CredentialDirectory for MemoryCredentialDirectory {
    async fn bound_name(&self, credential: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.get(credential).cloned())
    }
}
