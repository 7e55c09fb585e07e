use std::sync::Arc;

use coordinator_core::broadcast::Hub;
use coordinator_core::config::CoordinatorConfig;
use coordinator_core::directory::WorkerDirectory;
use coordinator_core::enrichment::EnrichmentCache;
use coordinator_core::jobs::JobEngine;
use coordinator_core::monitor::LivenessMonitor;
use coordinator_core::planner::Planner;
use coordinator_core::store::{CredentialDirectory, DictionaryStore, HashTargetStore, JobStore, WorkerStore};
use coordinator_core::store_memory::{
    MemoryCredentialDirectory, MemoryDictionaryStore, MemoryHashTargetStore, MemoryJobStore,
    MemoryWorkerStore,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Wires the three core subsystems (monitor, job engine, broadcast hub)
/// over a chosen persistence backend and runs the background tasks until
/// shutdown. There is deliberately no HTTP/gRPC surface here — external
/// transport is out of scope (§1) and would live in its own adapter crate.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = CoordinatorConfig::default();
    let database_url = parse_database_url();

    let (workers, jobs, dictionaries, hash_targets): (
        Arc<dyn WorkerStore>,
        Arc<dyn JobStore>,
        Arc<dyn DictionaryStore>,
        Arc<dyn HashTargetStore>,
    ) = match database_url {
        #[cfg(feature = "postgres")]
        Some(url) => {
            tracing::info!("connecting to PostgreSQL...");
            let pool = sqlx::PgPool::connect(&url).await?;
            let store = Arc::new(coordinator_core::store_postgres::PostgresStore::new(pool));
            store.migrate().await?;
            tracing::info!("using PostgresStore (migrations applied)");
            (store.clone(), store.clone(), store.clone(), store)
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            tracing::warn!(
                "--database-url / DATABASE_URL set but postgres feature not enabled, using in-memory stores"
            );
            memory_stores()
        }
        None => {
            tracing::info!("using in-memory stores (no database URL configured)");
            memory_stores()
        }
    };

    let credentials: Arc<dyn CredentialDirectory> = MemoryCredentialDirectory::new();
    let hub = Hub::new(config.broadcast.clone());
    let directory = Arc::new(WorkerDirectory::new(
        workers.clone(),
        credentials,
        hub.clone(),
        config.worker_defaults.clone(),
    ));
    let planner = Planner::new(config.planner.clone());
    let job_engine = Arc::new(JobEngine::new(
        jobs,
        workers.clone(),
        dictionaries.clone(),
        hash_targets.clone(),
        directory.clone(),
        hub.clone(),
        planner,
    ));
    let enrichment = EnrichmentCache::new(workers.clone(), dictionaries, hash_targets, config.enrichment.clone());

    let cancellation = CancellationToken::new();
    let monitor = LivenessMonitor::new(workers, hub, config.monitor.clone());

    let monitor_handle = {
        let cancellation = cancellation.clone();
        tokio::spawn(async move { monitor.run(cancellation).await })
    };
    let sweeper_handle = {
        let cancellation = cancellation.clone();
        tokio::spawn(async move { enrichment.run_sweeper(cancellation).await })
    };

    tracing::info!("coordinator core running (monitor + enrichment sweeper); Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    cancellation.cancel();
    let _ = tokio::join!(monitor_handle, sweeper_handle);

    // job_engine is wired but unused without a transport adapter driving
    // it; keep it alive so its construction path stays exercised.
    drop(job_engine);
    Ok(())
}

fn memory_stores() -> (
    Arc<dyn WorkerStore>,
    Arc<dyn JobStore>,
    Arc<dyn DictionaryStore>,
    Arc<dyn HashTargetStore>,
) {
    (
        MemoryWorkerStore::new(),
        MemoryJobStore::new(),
        MemoryDictionaryStore::new(),
        MemoryHashTargetStore::new(),
    )
}

/// Parse database URL from `--database-url <url>` CLI arg or `DATABASE_URL` env var.
fn parse_database_url() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(url) = args
        .windows(2)
        .find(|w| w[0] == "--database-url")
        .map(|w| w[1].clone())
    {
        return Some(url);
    }
    std::env::var("DATABASE_URL").ok()
}
