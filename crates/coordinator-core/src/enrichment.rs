//! TTL cache resolving opaque worker/dictionary/hash-target ids to
//! display-friendly names for broadcast and UI payloads (§4.G).
//!
//! The background sweeper is spawned the same way the monitor's scheduling
//! task is spawned: a `tokio::time::interval` loop under a
//! `CancellationToken`, grounded on §5's "every long-running task accepts a
//! cancellation token".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::EnrichmentConfig;
use crate::store::{DictionaryStore, HashTargetStore, WorkerStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Kind {
    Worker,
    Dictionary,
    HashTarget,
}

struct Entry {
    name: String,
    expires_at: Instant,
}

type BoxedLookup = std::pin::Pin<Box<dyn std::future::Future<Output = Option<String>> + Send>>;

pub struct EnrichmentCache {
    workers: Arc<dyn WorkerStore>,
    dictionaries: Arc<dyn DictionaryStore>,
    hash_targets: Arc<dyn HashTargetStore>,
    ttl: Duration,
    cache: RwLock<HashMap<(Kind, Uuid), Entry>>,
}

impl EnrichmentCache {
    pub fn new(
        workers: Arc<dyn WorkerStore>,
        dictionaries: Arc<dyn DictionaryStore>,
        hash_targets: Arc<dyn HashTargetStore>,
        config: EnrichmentConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            workers,
            dictionaries,
            hash_targets,
            ttl: config.ttl,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Resolves display names for worker ids, batch-loading any not
    /// already cached (or expired). On a failed batch load, the fallback
    /// is the id's first 8 characters.
    pub async fn enrich_workers(&self, ids: &[Uuid]) -> HashMap<Uuid, String> {
        self.enrich(Kind::Worker, ids, |id| {
            let workers = self.workers.clone();
            Box::pin(async move { workers.get(id).await.ok().flatten().map(|w| w.name) }) as BoxedLookup
        })
        .await
    }

    pub async fn enrich_dictionaries(&self, ids: &[Uuid]) -> HashMap<Uuid, String> {
        self.enrich(Kind::Dictionary, ids, |id| {
            let dictionaries = self.dictionaries.clone();
            Box::pin(async move { dictionaries.get(id).await.ok().flatten().map(|d| d.name) }) as BoxedLookup
        })
        .await
    }

    pub async fn enrich_hash_targets(&self, ids: &[Uuid]) -> HashMap<Uuid, String> {
        self.enrich(Kind::HashTarget, ids, |id| {
            let hash_targets = self.hash_targets.clone();
            Box::pin(async move { hash_targets.get(id).await.ok().flatten().map(|h| h.name) }) as BoxedLookup
        })
        .await
    }

    async fn enrich<F>(&self, kind: Kind, ids: &[Uuid], load_one: F) -> HashMap<Uuid, String>
    where
        F: Fn(Uuid) -> BoxedLookup,
    {
        let now = Instant::now();
        let mut result = HashMap::with_capacity(ids.len());
        let mut misses = Vec::new();

        {
            let cache = self.cache.read().await;
            for &id in ids {
                match cache.get(&(kind, id)) {
                    Some(entry) if entry.expires_at > now => {
                        result.insert(id, entry.name.clone());
                    }
                    _ => misses.push(id),
                }
            }
        }

        if misses.is_empty() {
            return result;
        }

        let mut cache = self.cache.write().await;
        for id in misses {
            let name = load_one(id)
                .await
                .unwrap_or_else(|| fallback_display(id));
            cache.insert(
                (kind, id),
                Entry {
                    name: name.clone(),
                    expires_at: now + self.ttl,
                },
            );
            result.insert(id, name);
        }
        result
    }

    /// Evicts every entry whose TTL has elapsed. Intended to run at a
    /// cadence of `TTL / 2` (see `run_sweeper`).
    async fn sweep(&self) {
        let now = Instant::now();
        let mut cache = self.cache.write().await;
        cache.retain(|_, entry| entry.expires_at > now);
    }

    #[instrument(skip_all)]
    pub async fn run_sweeper(self: Arc<Self>, cancellation: CancellationToken) {
        let period = self.ttl / 2;
        let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("enrichment sweeper stopping");
                    return;
                }
                _ = interval.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}

fn fallback_display(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::{MemoryDictionaryStore, MemoryHashTargetStore, MemoryWorkerStore};
    use crate::types::{Dictionary, Liveness, Worker};

    fn cache_with_ttl(ttl: Duration) -> (Arc<EnrichmentCache>, Arc<MemoryWorkerStore>) {
        let workers = MemoryWorkerStore::new();
        let dictionaries = MemoryDictionaryStore::new();
        let hash_targets = MemoryHashTargetStore::new();
        let cache = EnrichmentCache::new(workers.clone(), dictionaries, hash_targets, EnrichmentConfig { ttl });
        (cache, workers)
    }

    #[tokio::test]
    async fn resolves_known_worker_names() {
        let (cache, workers) = cache_with_ttl(Duration::from_secs(60));
        let now = chrono::Utc::now();
        let worker = Worker {
            id: Uuid::new_v4(),
            name: "rig-1".into(),
            credential: "c".into(),
            address: "10.0.0.1".into(),
            port: 9000,
            capabilities: "gpu".into(),
            throughput: 0,
            liveness: Liveness::Offline,
            created_at: now,
            updated_at: now,
            last_seen: now,
        };
        workers.create(&worker).await.unwrap();

        let names = cache.enrich_workers(&[worker.id]).await;
        assert_eq!(names.get(&worker.id), Some(&"rig-1".to_string()));
    }

    #[tokio::test]
    async fn unknown_id_falls_back_to_id_prefix() {
        let (cache, _workers) = cache_with_ttl(Duration::from_secs(60));
        let id = Uuid::new_v4();
        let names = cache.enrich_workers(&[id]).await;
        let expected: String = id.to_string().chars().take(8).collect();
        assert_eq!(names.get(&id), Some(&expected));
    }

    #[tokio::test]
    async fn expired_entries_are_reloaded() {
        let (cache, workers) = cache_with_ttl(Duration::from_millis(20));
        let now = chrono::Utc::now();
        let worker = Worker {
            id: Uuid::new_v4(),
            name: "rig-1".into(),
            credential: "c".into(),
            address: "10.0.0.1".into(),
            port: 9000,
            capabilities: "gpu".into(),
            throughput: 0,
            liveness: Liveness::Offline,
            created_at: now,
            updated_at: now,
            last_seen: now,
        };
        workers.create(&worker).await.unwrap();
        let _ = cache.enrich_workers(&[worker.id]).await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        let mut renamed = worker.clone();
        renamed.name = "rig-1-renamed".into();
        workers.update(&renamed).await.unwrap();

        let names = cache.enrich_workers(&[worker.id]).await;
        assert_eq!(names.get(&worker.id), Some(&"rig-1-renamed".to_string()));
    }

    #[tokio::test]
    async fn sweep_evicts_expired_entries() {
        let (cache, workers) = cache_with_ttl(Duration::from_millis(10));
        let now = chrono::Utc::now();
        let worker = Worker {
            id: Uuid::new_v4(),
            name: "rig-1".into(),
            credential: "c".into(),
            address: "10.0.0.1".into(),
            port: 9000,
            capabilities: "gpu".into(),
            throughput: 0,
            liveness: Liveness::Offline,
            created_at: now,
            updated_at: now,
            last_seen: now,
        };
        workers.create(&worker).await.unwrap();
        let _ = cache.enrich_workers(&[worker.id]).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.sweep().await;

        assert_eq!(cache.cache.read().await.len(), 0);
    }

    #[tokio::test]
    async fn resolves_known_dictionary_names() {
        let workers = MemoryWorkerStore::new();
        let dictionaries = MemoryDictionaryStore::new();
        let hash_targets = MemoryHashTargetStore::new();
        let id = Uuid::new_v4();
        dictionaries
            .create(&Dictionary {
                id,
                name: "rockyou".into(),
                path: "/tmp/rockyou.txt".into(),
                size_bytes: 10,
                entry_count: None,
            })
            .await
            .unwrap();
        let cache = EnrichmentCache::new(workers, dictionaries, hash_targets, EnrichmentConfig::default());
        let names = cache.enrich_dictionaries(&[id]).await;
        assert_eq!(names.get(&id), Some(&"rockyou".to_string()));
    }
}
