//! PostgreSQL-backed persistence, behind the `postgres` feature. Grounded
//! on `PostgresProcessStore` in the source this workspace was built from:
//! runtime-checked `sqlx::query` (not the `query!` macro, so this builds
//! without a live database at compile time), one `INSERT ... ON CONFLICT`
//! per `create`, embedded migrations run explicitly by the caller.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};
use crate::store::{DictionaryStore, HashTargetStore, JobStore, WorkerStore};
use crate::types::{Dictionary, HashTarget, Job, JobState, Liveness, ShardWindow, Worker};

fn liveness_str(l: Liveness) -> &'static str {
    match l {
        Liveness::Offline => "offline",
        Liveness::Online => "online",
        Liveness::Busy => "busy",
    }
}

fn parse_liveness(s: &str) -> Liveness {
    match s {
        "online" => Liveness::Online,
        "busy" => Liveness::Busy,
        _ => Liveness::Offline,
    }
}

fn job_state_str(s: JobState) -> &'static str {
    match s {
        JobState::Pending => "pending",
        JobState::Running => "running",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
        JobState::Paused => "paused",
        JobState::Cancelled => "cancelled",
    }
}

fn parse_job_state(s: &str) -> JobState {
    match s {
        "running" => JobState::Running,
        "completed" => JobState::Completed,
        "failed" => JobState::Failed,
        "paused" => JobState::Paused,
        "cancelled" => JobState::Cancelled,
        _ => JobState::Pending,
    }
}

fn worker_not_found(id: Uuid) -> CoordinatorError {
    CoordinatorError::NotFound { kind: "worker", id }
}

fn job_not_found(id: Uuid) -> CoordinatorError {
    CoordinatorError::NotFound { kind: "job", id }
}

fn worker_from_row(row: &sqlx::postgres::PgRow) -> Worker {
    Worker {
        id: row.get("id"),
        name: row.get("name"),
        credential: row.get("credential"),
        address: row.get("address"),
        port: row.get::<i32, _>("port") as u16,
        capabilities: row.get("capabilities"),
        throughput: row.get::<i64, _>("throughput") as u64,
        liveness: parse_liveness(row.get::<String, _>("liveness").as_str()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_seen: row.get("last_seen"),
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Job {
    let skip: Option<i64> = row.get("shard_skip");
    let limit: Option<i64> = row.get("shard_limit");
    Job {
        id: row.get("id"),
        parent_id: row.get("parent_id"),
        name: row.get("name"),
        hash_algorithm: row.get("hash_algorithm"),
        attack_mode: row.get("attack_mode"),
        hash_target_id: row.get("hash_target_id"),
        dictionary_id: row.get("dictionary_id"),
        rules: row.get("rules"),
        worker_id: row.get("worker_id"),
        shard: match (skip, limit) {
            (Some(skip), Some(limit)) => Some(ShardWindow {
                skip: skip as u64,
                limit: limit as u64,
            }),
            _ => None,
        },
        progress: row.get("progress"),
        throughput: row.get::<i64, _>("throughput") as u64,
        processed_count: row.get::<i64, _>("processed_count") as u64,
        total_count: row.get::<i64, _>("total_count") as u64,
        result: row.get("result"),
        state: parse_job_state(row.get::<String, _>("state").as_str()),
        eta: row.get("eta"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    }
}

/// PostgreSQL-backed implementation of the worker and job stores.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| CoordinatorError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl WorkerStore for PostgresStore {
    async fn create(&self, worker: &Worker) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (
                id, name, credential, address, port, capabilities,
                throughput, liveness, created_at, updated_at, last_seen
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                address = EXCLUDED.address,
                port = EXCLUDED.port,
                capabilities = EXCLUDED.capabilities,
                throughput = EXCLUDED.throughput,
                liveness = EXCLUDED.liveness,
                updated_at = EXCLUDED.updated_at,
                last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(worker.id)
        .bind(&worker.name)
        .bind(&worker.credential)
        .bind(&worker.address)
        .bind(worker.port as i32)
        .bind(&worker.capabilities)
        .bind(worker.throughput as i64)
        .bind(liveness_str(worker.liveness))
        .bind(worker.created_at)
        .bind(worker.updated_at)
        .bind(worker.last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(worker_from_row))
    }

    async fn update(&self, worker: &Worker) -> Result<()> {
        self.create(worker).await
    }

    async fn list(&self) -> Result<Vec<Worker>> {
        let rows = sqlx::query("SELECT * FROM workers").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(worker_from_row).collect())
    }

    async fn update_liveness(&self, id: Uuid, state: Liveness) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workers SET
                liveness = $1,
                throughput = CASE WHEN $1 = 'offline' THEN 0 ELSE throughput END,
                updated_at = now()
            WHERE id = $2
            "#,
        )
        .bind(liveness_str(state))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(worker_not_found(id));
        }
        Ok(())
    }

    async fn update_last_seen(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE workers SET last_seen = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(worker_not_found(id));
        }
        Ok(())
    }

    async fn update_throughput(&self, id: Uuid, value: u64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE workers SET throughput = $1, updated_at = now() WHERE id = $2",
        )
        .bind(value as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(worker_not_found(id));
        }
        Ok(())
    }

    async fn update_throughput_and_liveness(
        &self,
        id: Uuid,
        value: u64,
        state: Liveness,
    ) -> Result<()> {
        let effective = if state == Liveness::Offline { 0 } else { value as i64 };
        let result = sqlx::query(
            r#"
            UPDATE workers SET throughput = $1, liveness = $2, updated_at = now()
            WHERE id = $3
            "#,
        )
        .bind(effective)
        .bind(liveness_str(state))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(worker_not_found(id));
        }
        Ok(())
    }

    async fn lookup_by_credential(&self, credential: &str) -> Result<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE credential = $1")
            .bind(credential)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(worker_from_row))
    }

    async fn lookup_by_address(&self, address: &str, port: u16) -> Result<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE address = $1 AND port = $2")
            .bind(address)
            .bind(port as i32)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(worker_from_row))
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(worker_from_row))
    }
}

#[async_trait]
impl JobStore for PostgresStore {
    async fn create(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, parent_id, name, hash_algorithm, attack_mode, hash_target_id,
                dictionary_id, rules, worker_id, shard_skip, shard_limit, progress,
                throughput, processed_count, total_count, result, state, eta,
                created_at, started_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                      $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (id) DO UPDATE SET
                worker_id = EXCLUDED.worker_id,
                shard_skip = EXCLUDED.shard_skip,
                shard_limit = EXCLUDED.shard_limit,
                progress = EXCLUDED.progress,
                throughput = EXCLUDED.throughput,
                processed_count = EXCLUDED.processed_count,
                result = EXCLUDED.result,
                state = EXCLUDED.state,
                eta = EXCLUDED.eta,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(job.id)
        .bind(job.parent_id)
        .bind(&job.name)
        .bind(&job.hash_algorithm)
        .bind(&job.attack_mode)
        .bind(job.hash_target_id)
        .bind(job.dictionary_id)
        .bind(&job.rules)
        .bind(job.worker_id)
        .bind(job.shard.map(|s| s.skip as i64))
        .bind(job.shard.map(|s| s.limit as i64))
        .bind(job.progress)
        .bind(job.throughput as i64)
        .bind(job.processed_count as i64)
        .bind(job.total_count as i64)
        .bind(&job.result)
        .bind(job_state_str(job.state))
        .bind(&job.eta)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(job_from_row))
    }

    async fn update(&self, job: &Job) -> Result<()> {
        self.create(job).await
    }

    async fn update_progress(&self, id: Uuid, progress: f64, throughput: u64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE jobs SET progress = $1, throughput = $2 WHERE id = $3",
        )
        .bind(progress)
        .bind(throughput as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(job_not_found(id));
        }
        Ok(())
    }

    async fn update_liveness(&self, id: Uuid, state: JobState) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET state = $1 WHERE id = $2")
            .bind(job_state_str(state))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(job_not_found(id));
        }
        Ok(())
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE state = $1")
            .bind(job_state_str(state))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }

    async fn list_by_name_prefix(&self, prefix: &str, exclude: Uuid) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE name LIKE $1 AND id != $2")
            .bind(format!("{prefix}%"))
            .bind(exclude)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }
}

#[async_trait]
impl DictionaryStore for PostgresStore {
    async fn create(&self, dictionary: &Dictionary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dictionaries (id, name, path, size_bytes, entry_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(dictionary.id)
        .bind(&dictionary.name)
        .bind(&dictionary.path)
        .bind(dictionary.size_bytes as i64)
        .bind(dictionary.entry_count.map(|c| c as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Dictionary>> {
        let row = sqlx::query("SELECT * FROM dictionaries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Dictionary {
            id: row.get("id"),
            name: row.get("name"),
            path: row.get("path"),
            size_bytes: row.get::<i64, _>("size_bytes") as u64,
            entry_count: row.get::<Option<i64>, _>("entry_count").map(|c| c as u64),
        }))
    }

    async fn list(&self) -> Result<Vec<Dictionary>> {
        let rows = sqlx::query("SELECT * FROM dictionaries")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Dictionary {
                id: row.get("id"),
                name: row.get("name"),
                path: row.get("path"),
                size_bytes: row.get::<i64, _>("size_bytes") as u64,
                entry_count: row.get::<Option<i64>, _>("entry_count").map(|c| c as u64),
            })
            .collect())
    }
}

#[async_trait]
impl HashTargetStore for PostgresStore {
    async fn create(&self, target: &HashTarget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO hash_targets (id, name, path, size_bytes, format)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(target.id)
        .bind(&target.name)
        .bind(&target.path)
        .bind(target.size_bytes as i64)
        .bind(&target.format)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<HashTarget>> {
        let row = sqlx::query("SELECT * FROM hash_targets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| HashTarget {
            id: row.get("id"),
            name: row.get("name"),
            path: row.get("path"),
            size_bytes: row.get::<i64, _>("size_bytes") as u64,
            format: row.get("format"),
        }))
    }

    async fn list(&self) -> Result<Vec<HashTarget>> {
        let rows = sqlx::query("SELECT * FROM hash_targets")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| HashTarget {
                id: row.get("id"),
                name: row.get("name"),
                path: row.get("path"),
                size_bytes: row.get::<i64, _>("size_bytes") as u64,
                format: row.get("format"),
            })
            .collect())
    }
}

