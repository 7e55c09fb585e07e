//! Distributed-job engine (§4.F): sub-job creation, lifecycle, and the
//! first-finder-wins sibling-cancellation protocol.
//!
//! Grounded directly on `BpmnLiteEngine`'s role as the top-level facade
//! wiring store + pure-logic modules together (see `engine.rs`'s own doc
//! comment in the source this workspace was built from).

use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::broadcast::Hub;
use crate::directory::WorkerDirectory;
use crate::error::{CoordinatorError, Result};
use crate::planner::{Planner, PlannerWorker, ShardAssignment};
use crate::store::{DictionaryStore, HashTargetStore, JobStore, WorkerStore};
use crate::types::{is_exhaustion_result, Job, JobState, Liveness, CANCELLED_BY_SIBLING_SUCCESS};

/// Which workers a `create` request should distribute shards across.
#[derive(Clone, Debug)]
pub enum WorkerSelection {
    /// Use every worker currently `online`.
    Auto,
    /// Use exactly these workers; every id must resolve to `online`.
    Explicit(Vec<Uuid>),
}

#[derive(Clone, Debug)]
pub struct CreateJobRequest {
    pub name: String,
    pub hash_algorithm: String,
    pub attack_mode: String,
    pub hash_target_id: Uuid,
    pub dictionary_id: Uuid,
    pub rules: String,
    pub workers: WorkerSelection,
    /// Off by default (§4.F step 4) — a UI-aggregation-only parent record.
    pub create_parent: bool,
    /// On by default (§4.F step 6).
    pub auto_start: bool,
}

impl Default for CreateJobRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            hash_algorithm: String::new(),
            attack_mode: String::new(),
            hash_target_id: Uuid::nil(),
            dictionary_id: Uuid::nil(),
            rules: String::new(),
            workers: WorkerSelection::Auto,
            create_parent: false,
            auto_start: true,
        }
    }
}

#[derive(Debug)]
pub struct CreateJobResult {
    pub sub_jobs: Vec<Job>,
    pub assignments: Vec<ShardAssignment>,
    pub total_entries: Option<u64>,
    pub summary: String,
    /// Populated when at least one, but not all, sub-jobs persisted.
    pub partial_failure: Option<CoordinatorError>,
}

/// Base name shared by every sibling of a distributed job: the portion of
/// `name` before the first shard-suffix marker (` (Part ` if present, else
/// plain ` (`). A name with neither marker has no siblings by definition.
pub fn sibling_base_name(name: &str) -> &str {
    if let Some(idx) = name.find(" (Part ") {
        &name[..idx]
    } else if let Some(idx) = name.find(" (") {
        &name[..idx]
    } else {
        name
    }
}

fn shard_name(base: &str, index: usize) -> String {
    format!("{base} (Part {})", index + 1)
}

pub struct JobEngine {
    jobs: Arc<dyn JobStore>,
    workers: Arc<dyn WorkerStore>,
    dictionaries: Arc<dyn DictionaryStore>,
    hash_targets: Arc<dyn HashTargetStore>,
    directory: Arc<WorkerDirectory>,
    hub: Arc<Hub>,
    planner: Planner,
}

impl JobEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        workers: Arc<dyn WorkerStore>,
        dictionaries: Arc<dyn DictionaryStore>,
        hash_targets: Arc<dyn HashTargetStore>,
        directory: Arc<WorkerDirectory>,
        hub: Arc<Hub>,
        planner: Planner,
    ) -> Self {
        Self {
            jobs,
            workers,
            dictionaries,
            hash_targets,
            directory,
            hub,
            planner,
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: CreateJobRequest) -> Result<CreateJobResult> {
        let candidate_workers = self.resolve_workers(&request.workers).await?;
        if candidate_workers.is_empty() {
            return Err(CoordinatorError::PlanEmpty);
        }

        let dictionary = self
            .dictionaries
            .get(request.dictionary_id)
            .await?
            .ok_or(CoordinatorError::NotFound {
                kind: "dictionary",
                id: request.dictionary_id,
            })?;
        self.hash_targets
            .get(request.hash_target_id)
            .await?
            .ok_or(CoordinatorError::NotFound {
                kind: "hash_target",
                id: request.hash_target_id,
            })?;

        let planner_workers: Vec<PlannerWorker> = candidate_workers
            .iter()
            .map(|w| PlannerWorker {
                id: w.id,
                measured_throughput: w.throughput,
                capabilities: w.capabilities.clone(),
            })
            .collect();
        let assignments = self.planner.plan(&planner_workers, dictionary.entry_count)?;

        let parent_id = if request.create_parent {
            let now = Utc::now();
            let parent = Job {
                id: Uuid::new_v4(),
                parent_id: None,
                name: request.name.clone(),
                hash_algorithm: request.hash_algorithm.clone(),
                attack_mode: request.attack_mode.clone(),
                hash_target_id: request.hash_target_id,
                dictionary_id: request.dictionary_id,
                rules: request.rules.clone(),
                worker_id: None,
                shard: None,
                progress: 0.0,
                throughput: 0,
                processed_count: 0,
                total_count: dictionary.entry_count.unwrap_or(0),
                result: None,
                state: JobState::Pending,
                eta: String::new(),
                created_at: now,
                started_at: None,
                completed_at: None,
            };
            self.jobs.create(&parent).await?;
            Some(parent.id)
        } else {
            None
        };

        let mut sub_jobs = Vec::with_capacity(assignments.len());
        let mut failed_workers = Vec::new();

        for (index, assignment) in assignments.iter().enumerate() {
            let now = Utc::now();
            let job = Job {
                id: Uuid::new_v4(),
                parent_id,
                name: shard_name(&request.name, index),
                hash_algorithm: request.hash_algorithm.clone(),
                attack_mode: request.attack_mode.clone(),
                hash_target_id: request.hash_target_id,
                dictionary_id: request.dictionary_id,
                rules: request.rules.clone(),
                worker_id: Some(assignment.worker_id),
                shard: Some(assignment.shard),
                progress: 0.0,
                throughput: 0,
                processed_count: 0,
                total_count: assignment.shard.limit,
                result: None,
                state: JobState::Pending,
                eta: String::new(),
                created_at: now,
                started_at: None,
                completed_at: None,
            };

            match self.jobs.create(&job).await {
                Ok(()) => {
                    let job = if request.auto_start {
                        match self.start(job.id).await {
                            Ok(started) => started,
                            Err(err) => {
                                warn!(job_id = %job.id, error = %err, "auto-start failed");
                                job
                            }
                        }
                    } else {
                        job
                    };
                    sub_jobs.push(job);
                }
                Err(err) => {
                    warn!(worker_id = %assignment.worker_id, error = %err, "failed to persist sub-job");
                    failed_workers.push(assignment.worker_id.to_string());
                }
            }
        }

        let attempted = assignments.len();
        let succeeded = sub_jobs.len();
        if succeeded == 0 {
            return Err(CoordinatorError::PartialDistributedCreate {
                succeeded,
                attempted,
                failed_workers,
            });
        }

        let partial_failure = if succeeded < attempted {
            Some(CoordinatorError::PartialDistributedCreate {
                succeeded,
                attempted,
                failed_workers,
            })
        } else {
            None
        };

        let total_entries = dictionary.entry_count;
        let summary = format!(
            "distributed '{}' across {} worker(s), {} sub-job(s) created",
            request.name, attempted, succeeded
        );

        Ok(CreateJobResult {
            sub_jobs,
            assignments,
            total_entries,
            summary,
            partial_failure,
        })
    }

    async fn resolve_workers(
        &self,
        selection: &WorkerSelection,
    ) -> Result<Vec<crate::types::Worker>> {
        match selection {
            WorkerSelection::Auto => {
                let all = self.workers.list().await?;
                Ok(all
                    .into_iter()
                    .filter(|w| w.liveness == Liveness::Online)
                    .collect())
            }
            WorkerSelection::Explicit(ids) => {
                let mut resolved = Vec::with_capacity(ids.len());
                for &id in ids {
                    let worker =
                        self.workers
                            .get(id)
                            .await?
                            .ok_or(CoordinatorError::NotFound { kind: "worker", id })?;
                    if worker.liveness != Liveness::Online {
                        return Err(CoordinatorError::WorkerUnavailable { id });
                    }
                    resolved.push(worker);
                }
                Ok(resolved)
            }
        }
    }

    pub async fn start(&self, job_id: Uuid) -> Result<Job> {
        let mut job = self.get(job_id).await?;
        if !matches!(job.state, JobState::Pending | JobState::Paused) {
            return Err(CoordinatorError::InvalidStateTransition {
                from: job.state.to_string(),
                to: JobState::Running.to_string(),
            });
        }
        job.started_at = Some(Utc::now());
        job.state = JobState::Running;
        self.jobs.update(&job).await?;

        if let Some(worker_id) = job.worker_id {
            if let Err(err) = self.directory.update_liveness(worker_id, Liveness::Busy).await {
                warn!(worker_id = %worker_id, error = %err, "failed to mark worker busy on job start");
            }
        }
        Ok(job)
    }

    pub async fn update_progress(&self, job_id: Uuid, progress: f64, throughput: u64) -> Result<()> {
        self.jobs.update_progress(job_id, progress, throughput).await?;
        let job = self.get(job_id).await?;
        self.hub
            .publish_job_progress(job_id, progress, throughput, job.eta.clone());
        Ok(())
    }

    /// The terminal write (§4.F). A positive (non-exhaustion) result means
    /// this job found the password before finishing its shard, which this
    /// system records as `failed` — and triggers the sibling sweep.
    #[instrument(skip(self, result))]
    pub async fn complete(&self, job_id: Uuid, result: String, throughput: u64) -> Result<Job> {
        let mut job = self.get(job_id).await?;
        let now = Utc::now();
        job.throughput = throughput;
        job.progress = 100.0;
        job.completed_at = Some(now);

        let positive = !is_exhaustion_result(&result);
        job.state = if positive {
            JobState::Failed
        } else {
            JobState::Completed
        };
        job.result = Some(result);
        self.jobs.update(&job).await?;
        self.free_worker(job.worker_id).await;

        if positive {
            self.cancel_siblings(&job).await;
        }
        Ok(job)
    }

    /// First-finder-wins: every other `running`/`pending` sibling of `job`
    /// is cancelled and its worker freed. Attempted for every identified
    /// sibling even if some mutations fail (§5).
    async fn cancel_siblings(&self, job: &Job) {
        let base = sibling_base_name(&job.name);
        let siblings = match self.jobs.list_by_name_prefix(base, job.id).await {
            Ok(siblings) => siblings,
            Err(err) => {
                warn!(error = %err, "failed to list siblings for cancellation sweep");
                return;
            }
        };

        for mut sibling in siblings {
            if !matches!(sibling.state, JobState::Running | JobState::Pending) {
                continue;
            }
            sibling.state = JobState::Cancelled;
            sibling.progress = 100.0;
            sibling.completed_at = Some(Utc::now());
            sibling.result = Some(CANCELLED_BY_SIBLING_SUCCESS.to_string());
            let worker_id = sibling.worker_id;
            if let Err(err) = self.jobs.update(&sibling).await {
                warn!(job_id = %sibling.id, error = %err, "failed to cancel sibling");
                continue;
            }
            self.free_worker(worker_id).await;
        }
    }

    async fn free_worker(&self, worker_id: Option<Uuid>) {
        if let Some(worker_id) = worker_id {
            if let Err(err) = self.directory.update_liveness(worker_id, Liveness::Online).await {
                warn!(worker_id = %worker_id, error = %err, "failed to free worker");
            }
        }
    }

    pub async fn fail(&self, job_id: Uuid, reason: String) -> Result<Job> {
        let mut job = self.get(job_id).await?;
        job.completed_at = Some(Utc::now());
        if is_exhaustion_result(&reason) {
            job.progress = 100.0;
        }
        job.result = Some(reason);
        job.state = JobState::Failed;
        self.jobs.update(&job).await?;
        self.free_worker(job.worker_id).await;
        Ok(job)
    }

    pub async fn pause(&self, job_id: Uuid) -> Result<Job> {
        let mut job = self.get(job_id).await?;
        if job.state != JobState::Running {
            return Err(CoordinatorError::InvalidStateTransition {
                from: job.state.to_string(),
                to: JobState::Paused.to_string(),
            });
        }
        job.state = JobState::Paused;
        self.jobs.update_liveness(job_id, job.state).await?;
        Ok(job)
    }

    pub async fn resume(&self, job_id: Uuid) -> Result<Job> {
        let mut job = self.get(job_id).await?;
        if job.state != JobState::Paused {
            return Err(CoordinatorError::InvalidStateTransition {
                from: job.state.to_string(),
                to: JobState::Pending.to_string(),
            });
        }
        job.state = JobState::Pending;
        self.jobs.update_liveness(job_id, job.state).await?;
        Ok(job)
    }

    /// Legacy single-shard assignment path: round-robin pending, unassigned
    /// jobs onto online workers. No shard recalculation.
    pub async fn assign_pending_to_available(&self) -> Result<usize> {
        let pending: Vec<Job> = self
            .jobs
            .list_by_state(JobState::Pending)
            .await?
            .into_iter()
            .filter(|j| j.worker_id.is_none())
            .collect();
        let online: Vec<crate::types::Worker> = self
            .workers
            .list()
            .await?
            .into_iter()
            .filter(|w| w.liveness == Liveness::Online)
            .collect();

        let mut assigned = 0;
        for (mut job, worker) in pending.into_iter().zip(online.into_iter()) {
            job.worker_id = Some(worker.id);
            if let Err(err) = self.jobs.update(&job).await {
                warn!(job_id = %job.id, error = %err, "failed to assign pending job");
                continue;
            }
            if let Err(err) = self.directory.update_liveness(worker.id, Liveness::Busy).await {
                warn!(worker_id = %worker.id, error = %err, "failed to mark worker busy on assignment");
                continue;
            }
            assigned += 1;
        }
        Ok(assigned)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or(CoordinatorError::NotFound { kind: "job", id: job_id })
    }
}
