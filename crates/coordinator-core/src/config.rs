//! Configuration surface (§6). Every knob named in the spec gets a field
//! here with the documented default; nothing else reaches into env vars
//! directly.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub agent_timeout: Duration,
    pub heartbeat_grace: Duration,
    pub max_concurrent_checks: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            agent_timeout: Duration::from_secs(5),
            heartbeat_grace: Duration::from_secs(2),
            max_concurrent_checks: 20,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropPolicy {
    DropOldest,
    DropNewest,
    Close,
}

#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    pub subscriber_outbox_capacity: usize,
    pub drop_policy: DropPolicy,
    pub slow_consumer_drop_limit: u32,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_outbox_capacity: 64,
            drop_policy: DropPolicy::DropOldest,
            slow_consumer_drop_limit: 128,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EnrichmentConfig {
    pub ttl: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlannerConfig {
    pub default_shard_size: u64,
    pub min_per_worker: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_shard_size: 1000,
            min_per_worker: 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerDefaults {
    pub default_port: u16,
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self { default_port: 8080 }
    }
}

/// Aggregate configuration for the whole coordinator.
#[derive(Clone, Debug, Default)]
pub struct CoordinatorConfig {
    pub monitor: MonitorConfig,
    pub broadcast: BroadcastConfig,
    pub enrichment: EnrichmentConfig,
    pub planner: PlannerConfig,
    pub worker_defaults: WorkerDefaults,
}
