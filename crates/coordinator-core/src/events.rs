//! The three broadcast event variants (§6, outbound broadcast delivery).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Liveness;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    WorkerLiveness {
        worker_id: Uuid,
        state: Liveness,
        last_seen: DateTime<Utc>,
    },
    WorkerThroughput {
        worker_id: Uuid,
        value: u64,
    },
    JobProgress {
        job_id: Uuid,
        progress: f64,
        throughput: u64,
        eta: String,
    },
}
