//! End-to-end scenarios wiring the directory, planner, job engine, and
//! broadcast hub together the way a real deployment would.

use std::sync::Arc;

use chrono::Utc;
use coordinator_core::broadcast::Hub;
use coordinator_core::config::{BroadcastConfig, CoordinatorConfig, MonitorConfig};
use coordinator_core::directory::{RegisterRequest, WorkerDirectory};
use coordinator_core::jobs::{CreateJobRequest, JobEngine, WorkerSelection};
use coordinator_core::monitor::LivenessMonitor;
use coordinator_core::planner::Planner;
use coordinator_core::store::WorkerStore;
use coordinator_core::store_memory::{
    MemoryCredentialDirectory, MemoryDictionaryStore, MemoryHashTargetStore, MemoryJobStore,
    MemoryWorkerStore,
};
use coordinator_core::types::{Dictionary, HashTarget, Liveness};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Fleet {
    directory: Arc<WorkerDirectory>,
    engine: JobEngine,
    workers: Arc<MemoryWorkerStore>,
    credentials: Arc<MemoryCredentialDirectory>,
    hub: Arc<Hub>,
    hash_target_id: Uuid,
    dictionary_id: Uuid,
}

async fn fleet(config: CoordinatorConfig) -> Fleet {
    let workers = MemoryWorkerStore::new();
    let jobs = MemoryJobStore::new();
    let dictionaries = MemoryDictionaryStore::new();
    let hash_targets = MemoryHashTargetStore::new();
    let credentials = MemoryCredentialDirectory::new();
    let hub = Hub::new(config.broadcast.clone());

    let directory = Arc::new(WorkerDirectory::new(
        workers.clone(),
        credentials.clone(),
        hub.clone(),
        config.worker_defaults.clone(),
    ));
    let planner = Planner::new(config.planner.clone());
    let engine = JobEngine::new(
        jobs,
        workers.clone(),
        dictionaries.clone(),
        hash_targets.clone(),
        directory.clone(),
        hub.clone(),
        planner,
    );

    let hash_target_id = Uuid::new_v4();
    hash_targets
        .create(&HashTarget {
            id: hash_target_id,
            name: "capture".into(),
            path: "/tmp/capture.hccapx".into(),
            size_bytes: 4096,
            format: "hccapx".into(),
        })
        .await
        .unwrap();

    let dictionary_id = Uuid::new_v4();
    dictionaries
        .create(&Dictionary {
            id: dictionary_id,
            name: "rockyou".into(),
            path: "/tmp/rockyou.txt".into(),
            size_bytes: 1 << 20,
            entry_count: Some(10),
        })
        .await
        .unwrap();

    Fleet {
        directory,
        engine,
        workers,
        credentials,
        hub,
        hash_target_id,
        dictionary_id,
    }
}

async fn register_and_go_online(fleet: &Fleet, name: &str, address: &str, score: u64) -> Uuid {
    fleet.credentials.issue(format!("cred-{name}"), name).await;
    let worker = fleet
        .directory
        .register(RegisterRequest {
            credential: format!("cred-{name}"),
            name: name.to_string(),
            address: address.to_string(),
            port: 9000,
            capabilities: if score >= 1_000_000 { "gpu".into() } else { "cpu".into() },
        })
        .await
        .unwrap();
    fleet
        .directory
        .update_throughput_and_liveness(worker.id, score, Liveness::Online)
        .await
        .unwrap();
    worker.id
}

/// Scenario: three workers (80/15/5), one finds the password first; its
/// siblings are cancelled and their workers freed back to `online`.
#[tokio::test]
async fn three_worker_distribution_with_first_finder_wins() {
    let fleet = fleet(CoordinatorConfig::default()).await;
    register_and_go_online(&fleet, "rig-a", "10.0.0.1", 80).await;
    register_and_go_online(&fleet, "rig-b", "10.0.0.2", 15).await;
    register_and_go_online(&fleet, "rig-c", "10.0.0.3", 5).await;

    let result = fleet
        .engine
        .create(CreateJobRequest {
            name: "wpa crack".into(),
            hash_algorithm: "wpa2".into(),
            attack_mode: "dictionary".into(),
            hash_target_id: fleet.hash_target_id,
            dictionary_id: fleet.dictionary_id,
            rules: String::new(),
            workers: WorkerSelection::Auto,
            create_parent: false,
            auto_start: true,
        })
        .await
        .unwrap();
    assert_eq!(result.sub_jobs.len(), 3);

    let winner = &result.sub_jobs[0];
    fleet
        .engine
        .complete(winner.id, "correcthorsebatterystaple".into(), 1_000_000)
        .await
        .unwrap();

    for sibling in result.sub_jobs.iter().skip(1) {
        let worker_id = sibling.worker_id.unwrap();
        let worker = fleet.workers.get(worker_id).await.unwrap().unwrap();
        assert_eq!(worker.liveness, Liveness::Online);
    }
}

/// Scenario: unknown dictionary size falls back to fixed 1000-entry
/// blocks per worker, in descending-score order.
#[tokio::test]
async fn unknown_size_dictionary_uses_fixed_blocks() {
    let planner = Planner::new(CoordinatorConfig::default().planner);
    let plan = planner
        .plan(
            &[
                coordinator_core::planner::PlannerWorker {
                    id: Uuid::new_v4(),
                    measured_throughput: 100,
                    capabilities: "gpu".into(),
                },
                coordinator_core::planner::PlannerWorker {
                    id: Uuid::new_v4(),
                    measured_throughput: 50,
                    capabilities: "cpu".into(),
                },
            ],
            None,
        )
        .unwrap();
    assert_eq!(plan[0].shard, coordinator_core::types::ShardWindow { skip: 0, limit: 1000 });
    assert_eq!(plan[1].shard, coordinator_core::types::ShardWindow { skip: 1000, limit: 1000 });
}

/// Scenario: a worker that stops heartbeating past `AgentTimeout` is
/// driven offline by the monitor, never by the heartbeat call itself.
#[tokio::test]
async fn stale_worker_is_taken_offline_only_by_the_monitor() {
    let mut config = CoordinatorConfig::default();
    config.monitor = MonitorConfig {
        check_interval: std::time::Duration::from_millis(15),
        agent_timeout: std::time::Duration::from_millis(30),
        heartbeat_grace: std::time::Duration::from_millis(10),
        max_concurrent_checks: 10,
    };
    let fleet = fleet(config.clone()).await;
    let worker_id = register_and_go_online(&fleet, "rig-a", "10.0.0.1", 80).await;

    fleet.directory.heartbeat(worker_id).await.unwrap();
    let still_online = fleet.workers.get(worker_id).await.unwrap().unwrap();
    assert_eq!(still_online.liveness, Liveness::Online);

    let monitor = LivenessMonitor::new(fleet.workers.clone(), fleet.hub.clone(), config.monitor.clone());
    let cancellation = CancellationToken::new();
    let run_cancellation = cancellation.clone();
    let handle = tokio::spawn(async move { monitor.run(run_cancellation).await });

    // Past AgentTimeout with no further heartbeat: the next tick or two
    // should drive the worker offline and zero its throughput.
    tokio::time::sleep(std::time::Duration::from_millis(90)).await;
    cancellation.cancel();
    handle.await.unwrap();

    let updated = fleet.workers.get(worker_id).await.unwrap().unwrap();
    assert_eq!(updated.liveness, Liveness::Offline);
    assert_eq!(updated.throughput, 0);
    let _ = Utc::now();
}
