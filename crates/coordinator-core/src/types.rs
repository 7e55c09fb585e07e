//! Domain types owned by the persistence layer (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Liveness state of a registered worker. `Offline` implies `throughput == 0`
/// (enforced by every mutator that transitions into it, never by this type).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Offline,
    Online,
    Busy,
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Liveness::Offline => "offline",
            Liveness::Online => "online",
            Liveness::Busy => "busy",
        };
        f.write_str(s)
    }
}

/// A durable worker registration record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    pub credential: String,
    pub address: String,
    pub port: u16,
    pub capabilities: String,
    /// Guesses per second. Zero means unknown / not running.
    pub throughput: u64,
    pub liveness: Liveness,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// State machine for a `Job`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Paused => "paused",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A contiguous slice of a dictionary: `[skip, skip + limit)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardWindow {
    pub skip: u64,
    pub limit: u64,
}

/// A unit of cracking work assigned to exactly one worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub hash_algorithm: String,
    pub attack_mode: String,
    pub hash_target_id: Uuid,
    pub dictionary_id: Uuid,
    pub rules: String,
    pub worker_id: Option<Uuid>,
    pub shard: Option<ShardWindow>,
    pub progress: f64,
    pub throughput: u64,
    pub processed_count: u64,
    pub total_count: u64,
    pub result: Option<String>,
    pub state: JobState,
    pub eta: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Marker result recorded on a sibling preempted by another's success.
pub const CANCELLED_BY_SIBLING_SUCCESS: &str = "cancelled by sibling success";

/// Marks an exhausted (password-not-found) completion.
pub fn is_exhaustion_result(result: &str) -> bool {
    result.is_empty() || result == "password not found"
}

/// Immutable wordlist metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dictionary {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    /// `None` when the entry count has not been computed.
    pub entry_count: Option<u64>,
}

/// Immutable hash-target file metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HashTarget {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub size_bytes: u64,
    pub format: String,
}
