//! Worker-liveness monitor (§4.C): periodic fleet scan, timeout-based
//! offline transitions, automatic speed reset, bounded concurrency.
//!
//! Grounded on the "acquire an owned semaphore permit before spawning each
//! unit of concurrent work" shape in `estuary-flow`'s automations server
//! (`crates/automations/src/server.rs`) — the teacher repo has no
//! semaphore-bounded pool of its own, so this is imported from the wider
//! pack rather than the teacher.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::broadcast::Hub;
use crate::config::MonitorConfig;
use crate::store::WorkerStore;
use crate::types::Liveness;

/// "Recently offline" window used only for UI hinting (§4.C); it never
/// feeds back into a state transition.
const RECENTLY_OFFLINE_GRACE: Duration = Duration::from_secs(5 * 60);

/// Aggregate fleet counts as of the most recent tick.
#[derive(Debug, Default)]
pub struct StatusSnapshot {
    pub online: AtomicU64,
    pub busy: AtomicU64,
    pub offline: AtomicU64,
    pub recently_offline: AtomicU64,
    pub errors: AtomicU64,
}

impl StatusSnapshot {
    fn reset(&self) {
        self.online.store(0, Ordering::Relaxed);
        self.busy.store(0, Ordering::Relaxed);
        self.offline.store(0, Ordering::Relaxed);
        self.recently_offline.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

pub struct LivenessMonitor {
    store: Arc<dyn WorkerStore>,
    hub: Arc<Hub>,
    config: MonitorConfig,
    status: Arc<StatusSnapshot>,
}

impl LivenessMonitor {
    pub fn new(store: Arc<dyn WorkerStore>, hub: Arc<Hub>, config: MonitorConfig) -> Self {
        Self {
            store,
            hub,
            config,
            status: Arc::new(StatusSnapshot::default()),
        }
    }

    pub fn status(&self) -> Arc<StatusSnapshot> {
        self.status.clone()
    }

    /// Runs the repeating tick loop until `cancellation` fires.
    #[instrument(skip_all)]
    pub async fn run(&self, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("liveness monitor stopping");
                    return;
                }
                _ = interval.tick() => {
                    self.tick(&cancellation).await;
                }
            }
        }
    }

    async fn tick(&self, cancellation: &CancellationToken) {
        let workers = match self.store.list().await {
            Ok(workers) => workers,
            Err(err) => {
                warn!(error = %err, "failed to list workers for liveness scan");
                self.status.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.status.reset();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_checks));
        let mut checks = Vec::with_capacity(workers.len());

        for worker in workers {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let hub = self.hub.clone();
            let status = self.status.clone();
            let agent_timeout = self.config.agent_timeout;
            let cancellation = cancellation.clone();

            checks.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    _ = cancellation.cancelled() => return,
                    permit = semaphore.acquire_owned() => permit,
                };
                let Ok(_permit) = permit else { return };
                check_one(&store, &hub, &status, worker, agent_timeout).await;
            }));
        }

        for check in checks {
            let _ = check.await;
        }
    }
}

async fn check_one(
    store: &Arc<dyn WorkerStore>,
    hub: &Arc<Hub>,
    status: &Arc<StatusSnapshot>,
    worker: crate::types::Worker,
    agent_timeout: Duration,
) {
    let age = Utc::now().signed_duration_since(worker.last_seen);
    let age = age.to_std().unwrap_or(Duration::ZERO);

    let next = if worker.address.is_empty() {
        Some(Liveness::Offline)
    } else if matches!(worker.liveness, Liveness::Online | Liveness::Busy) && age > agent_timeout {
        Some(Liveness::Offline)
    } else if worker.liveness == Liveness::Offline && age <= agent_timeout {
        Some(Liveness::Online)
    } else {
        None
    };

    if let Some(state) = next {
        if state == Liveness::Offline {
            if let Err(err) = store
                .update_throughput_and_liveness(worker.id, 0, Liveness::Offline)
                .await
            {
                warn!(worker_id = %worker.id, error = %err, "failed to transition worker offline");
                status.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
            hub.publish_worker_liveness(worker.id, Liveness::Offline, worker.last_seen);
            hub.publish_worker_throughput(worker.id, 0);
        } else {
            if let Err(err) = store.update_liveness(worker.id, state).await {
                warn!(worker_id = %worker.id, error = %err, "failed to transition worker liveness");
                status.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
            hub.publish_worker_liveness(worker.id, state, worker.last_seen);
        }
        record(status, state, age);
    } else {
        record(status, worker.liveness, age);
    }
}

fn record(status: &StatusSnapshot, state: Liveness, age: Duration) {
    match state {
        Liveness::Online => {
            status.online.fetch_add(1, Ordering::Relaxed);
        }
        Liveness::Busy => {
            status.busy.fetch_add(1, Ordering::Relaxed);
        }
        Liveness::Offline => {
            status.offline.fetch_add(1, Ordering::Relaxed);
            if age <= RECENTLY_OFFLINE_GRACE {
                status.recently_offline.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BroadcastConfig;
    use crate::store_memory::MemoryWorkerStore;
    use crate::types::Worker;
    use std::sync::atomic::Ordering::Relaxed;
    use uuid::Uuid;

    fn worker(liveness: Liveness, last_seen: chrono::DateTime<Utc>, address: &str) -> Worker {
        let now = Utc::now();
        Worker {
            id: Uuid::new_v4(),
            name: "w".into(),
            credential: "c".into(),
            address: address.into(),
            port: 9000,
            capabilities: "cpu".into(),
            throughput: if liveness == Liveness::Offline { 0 } else { 42 },
            liveness,
            created_at: now,
            updated_at: now,
            last_seen,
        }
    }

    fn config(agent_timeout: Duration) -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_millis(10),
            agent_timeout,
            heartbeat_grace: Duration::from_secs(2),
            max_concurrent_checks: 20,
        }
    }

    #[tokio::test]
    async fn stale_online_worker_goes_offline_and_zeroes_throughput() {
        let store = MemoryWorkerStore::new();
        let stale = worker(Liveness::Online, Utc::now() - chrono::Duration::seconds(30), "10.0.0.1");
        let id = stale.id;
        store.create(&stale).await.unwrap();

        let hub = Hub::new(BroadcastConfig::default());
        let sub = hub.subscribe();
        let monitor = LivenessMonitor::new(store.clone(), hub.clone(), config(Duration::from_secs(5)));
        monitor.tick(&CancellationToken::new()).await;

        let updated = store.get(id).await.unwrap().unwrap();
        assert_eq!(updated.liveness, Liveness::Offline);
        assert_eq!(updated.throughput, 0);

        let mut saw_liveness = false;
        let mut saw_zero_throughput = false;
        for _ in 0..2 {
            match sub.recv().await.unwrap() {
                crate::events::Event::WorkerLiveness { state, .. } => {
                    assert_eq!(state, Liveness::Offline);
                    saw_liveness = true;
                }
                crate::events::Event::WorkerThroughput { value, .. } => {
                    assert_eq!(value, 0);
                    saw_zero_throughput = true;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(saw_liveness && saw_zero_throughput);
    }

    #[tokio::test]
    async fn fresh_offline_worker_comes_back_online() {
        let store = MemoryWorkerStore::new();
        let fresh = worker(Liveness::Offline, Utc::now(), "10.0.0.1");
        let id = fresh.id;
        store.create(&fresh).await.unwrap();

        let hub = Hub::new(BroadcastConfig::default());
        let monitor = LivenessMonitor::new(store.clone(), hub, config(Duration::from_secs(5)));
        monitor.tick(&CancellationToken::new()).await;

        let updated = store.get(id).await.unwrap().unwrap();
        assert_eq!(updated.liveness, Liveness::Online);
    }

    #[tokio::test]
    async fn empty_address_forces_offline_unconditionally() {
        let store = MemoryWorkerStore::new();
        let fresh = worker(Liveness::Online, Utc::now(), "");
        let id = fresh.id;
        store.create(&fresh).await.unwrap();

        let hub = Hub::new(BroadcastConfig::default());
        let monitor = LivenessMonitor::new(store.clone(), hub, config(Duration::from_secs(5)));
        monitor.tick(&CancellationToken::new()).await;

        let updated = store.get(id).await.unwrap().unwrap();
        assert_eq!(updated.liveness, Liveness::Offline);
        assert_eq!(updated.throughput, 0);
    }

    #[tokio::test]
    async fn untimed_out_worker_is_left_alone() {
        let store = MemoryWorkerStore::new();
        let busy = worker(Liveness::Busy, Utc::now(), "10.0.0.1");
        let id = busy.id;
        store.create(&busy).await.unwrap();

        let hub = Hub::new(BroadcastConfig::default());
        let monitor = LivenessMonitor::new(store.clone(), hub, config(Duration::from_secs(5)));
        monitor.tick(&CancellationToken::new()).await;

        let updated = store.get(id).await.unwrap().unwrap();
        assert_eq!(updated.liveness, Liveness::Busy);
        assert_eq!(updated.throughput, 42);
    }

    #[tokio::test]
    async fn status_snapshot_aggregates_counts() {
        let store = MemoryWorkerStore::new();
        store
            .create(&worker(Liveness::Online, Utc::now(), "10.0.0.1"))
            .await
            .unwrap();
        store
            .create(&worker(Liveness::Online, Utc::now() - chrono::Duration::seconds(30), "10.0.0.2"))
            .await
            .unwrap();

        let hub = Hub::new(BroadcastConfig::default());
        let monitor = LivenessMonitor::new(store, hub, config(Duration::from_secs(5)));
        monitor.tick(&CancellationToken::new()).await;

        let status = monitor.status();
        assert_eq!(status.online.load(Relaxed), 1);
        assert_eq!(status.offline.load(Relaxed), 1);
        assert_eq!(status.recently_offline.load(Relaxed), 1);
    }
}
