//! Weight-proportional dictionary sharding (§4.E).
//!
//! Pure, synchronous, no I/O — grounded on `compiler::lowering` in the
//! source this workspace was built from, which is likewise a pure
//! transformation module tested directly without a store.

use uuid::Uuid;

use crate::config::PlannerConfig;
use crate::error::{CoordinatorError, Result};
use crate::types::ShardWindow;

/// Hardware class inferred from a worker's free-form capabilities string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HardwareClass {
    Gpu,
    Cpu,
}

/// Example performance table (§ GLOSSARY) used only when a worker's
/// measured throughput is zero. Values are guesses/second.
const HIGH_END_GPU: u64 = 5_000_000;
const GENERIC_GPU: u64 = 3_500_000;
const HIGH_END_CPU: u64 = 200_000;
const GENERIC_CPU: u64 = 100_000;

/// One worker as seen by the planner: its id and its score input.
#[derive(Clone, Debug)]
pub struct PlannerWorker {
    pub id: Uuid,
    pub measured_throughput: u64,
    pub capabilities: String,
}

/// A scored, ordered worker ready for partitioning.
#[derive(Clone, Debug)]
struct ScoredWorker {
    id: Uuid,
    score: u64,
}

fn classify(capabilities: &str) -> HardwareClass {
    let lower = capabilities.to_ascii_lowercase();
    if ["gpu", "cuda", "opencl"].iter().any(|kw| lower.contains(kw)) {
        HardwareClass::Gpu
    } else {
        HardwareClass::Cpu
    }
}

/// Estimate a score for a worker reporting zero measured throughput,
/// from its declared capabilities. The exact constants are policy, not
/// mechanism (§ GLOSSARY example table); "high-end" vs "generic" within
/// a class is not distinguishable from the capabilities string alone, so
/// this falls back to the generic tier per class.
fn estimate_score(capabilities: &str) -> u64 {
    match classify(capabilities) {
        HardwareClass::Gpu => GENERIC_GPU,
        HardwareClass::Cpu => GENERIC_CPU,
    }
}

fn score_of(worker: &PlannerWorker) -> u64 {
    if worker.measured_throughput > 0 {
        worker.measured_throughput
    } else {
        estimate_score(&worker.capabilities)
    }
}

/// One worker's assigned shard, in assignment order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardAssignment {
    pub worker_id: Uuid,
    pub shard: ShardWindow,
}

pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Partition `total_entries` (or, if `None`, assign fixed-size blocks)
    /// across `workers` in proportion to each worker's measured or
    /// estimated throughput.
    pub fn plan(
        &self,
        workers: &[PlannerWorker],
        total_entries: Option<u64>,
    ) -> Result<Vec<ShardAssignment>> {
        if workers.is_empty() {
            return Err(CoordinatorError::PlanEmpty);
        }

        // Step 1+2: score and order descending by score, ties broken by
        // insertion (original) order — a stable sort preserves that.
        let mut scored: Vec<ScoredWorker> = workers
            .iter()
            .map(|w| ScoredWorker {
                id: w.id,
                score: score_of(w),
            })
            .collect();
        scored.sort_by(|a, b| b.score.cmp(&a.score));

        match total_entries {
            None => Ok(self.plan_unknown_size(&scored)),
            Some(n) => Ok(self.plan_known_size(&scored, n)),
        }
    }

    fn plan_unknown_size(&self, scored: &[ScoredWorker]) -> Vec<ShardAssignment> {
        let block = self.config.default_shard_size;
        scored
            .iter()
            .enumerate()
            .map(|(i, w)| ShardAssignment {
                worker_id: w.id,
                shard: ShardWindow {
                    skip: i as u64 * block,
                    limit: block,
                },
            })
            .collect()
    }

    /// Partitions `n` proportionally to score, last worker absorbing the
    /// floor-rounding residual. When that residual would leave the last
    /// worker below `min_per_worker`, the deficit is "rewound" out of
    /// preceding workers' shares (highest index first) — each lender keeps
    /// at least its own minimum. `min_per_worker` is never allowed to
    /// exceed what's actually `remaining`, so clamping can't panic even
    /// when `n` is smaller than `workers.len() * min_per_worker`.
    fn plan_known_size(&self, scored: &[ScoredWorker], n: u64) -> Vec<ShardAssignment> {
        let total_score: u64 = scored.iter().map(|w| w.score).sum();
        let min_per_worker = self.config.min_per_worker;
        let last_index = scored.len() - 1;

        let mut limits = vec![0u64; scored.len()];
        let mut remaining = n;

        for (i, w) in scored.iter().enumerate() {
            if i == last_index {
                limits[i] = remaining;
                break;
            }

            let raw = if total_score == 0 {
                0
            } else {
                (n as u128 * w.score as u128 / total_score as u128) as u64
            };
            let effective_min = min_per_worker.min(remaining);
            let limit = raw.clamp(effective_min, remaining);
            limits[i] = limit;
            remaining -= limit;
        }

        if last_index > 0 && limits[last_index] < min_per_worker {
            let mut deficit = min_per_worker - limits[last_index];
            for i in (0..last_index).rev() {
                if deficit == 0 {
                    break;
                }
                let available = limits[i].saturating_sub(min_per_worker);
                let take = available.min(deficit);
                limits[i] -= take;
                limits[last_index] += take;
                deficit -= take;
            }
        }

        let mut skip = 0u64;
        scored
            .iter()
            .zip(limits)
            .map(|(w, limit)| {
                let assignment = ShardAssignment {
                    worker_id: w.id,
                    shard: ShardWindow { skip, limit },
                };
                skip += limit;
                assignment
            })
            .collect()
    }
}
