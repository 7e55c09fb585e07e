//! The real-time broadcast fabric (§4.B).
//!
//! Grounded on the "bounded channel + explicit overflow policy at the
//! producer" shape the wider pack converges on for fan-out (e.g. a
//! `tokio::sync::mpsc` sender with `try_send` and a logged fallback on
//! `Full`). `tokio::sync::broadcast` is deliberately not used here: its
//! single ring buffer cannot express a *per-subscriber* drop-oldest policy
//! or a per-subscriber consecutive-drop eviction counter — a lagging
//! receiver there drops for every receiver uniformly. Each subscriber is
//! instead its own small actor: a bounded deque guarded by a plain
//! `std::sync::Mutex` (the critical section never awaits), with a
//! `tokio::sync::Notify` the delivery side awaits.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{BroadcastConfig, DropPolicy};
use crate::events::Event;

pub type SubscriberId = Uuid;

struct Outbox {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    drop_policy: DropPolicy,
    consecutive_drops: AtomicU32,
    closed: AtomicBool,
}

impl Outbox {
    fn new(capacity: usize, drop_policy: DropPolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            drop_policy,
            consecutive_drops: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue. Returns `true` if the subscriber should be
    /// evicted after this call (too many consecutive drops).
    fn enqueue(&self, event: Event, slow_consumer_drop_limit: u32) -> bool {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() < self.capacity {
                queue.push_back(event);
                self.consecutive_drops.store(0, Ordering::Relaxed);
                self.notify.notify_one();
                return false;
            }

            match self.drop_policy {
                DropPolicy::DropOldest => {
                    queue.pop_front();
                    queue.push_back(event);
                }
                DropPolicy::DropNewest => {
                    // The new event is discarded; outbox contents are unchanged.
                }
                DropPolicy::Close => return true,
            }
        }
        self.notify.notify_one();

        let drops = self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
        drops >= slow_consumer_drop_limit
    }

    async fn recv(&self) -> Option<Event> {
        loop {
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            if let Some(event) = self.queue.lock().unwrap().pop_front() {
                return Some(event);
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }
}

/// A handle a connection adapter holds to drain events for one subscriber.
pub struct SubscriberHandle {
    id: SubscriberId,
    outbox: Arc<Outbox>,
    hub: Arc<Hub>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Await the next event for this subscriber, in publish order (FIFO
    /// per subscriber, modulo drops). Returns `None` once the subscriber
    /// has been closed or evicted.
    pub async fn recv(&self) -> Option<Event> {
        self.outbox.recv().await
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.hub.remove(self.id);
    }
}

/// Multiplexes events to many subscriber connections with per-subscriber
/// backpressure. Publishers never block: `publish_*` is a non-blocking
/// enqueue attempt into each subscriber's outbox.
pub struct Hub {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Outbox>>>,
    config: BroadcastConfig,
}

impl Hub {
    pub fn new(config: BroadcastConfig) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Register a new subscriber. It will receive every event published
    /// after this call returns.
    pub fn subscribe(self: &Arc<Self>) -> SubscriberHandle {
        let id = Uuid::new_v4();
        let outbox = Arc::new(Outbox::new(
            self.config.subscriber_outbox_capacity,
            self.config.drop_policy,
        ));
        self.subscribers.write().unwrap().insert(id, outbox.clone());
        SubscriberHandle {
            id,
            outbox,
            hub: self.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }

    fn remove(&self, id: SubscriberId) {
        if let Some(outbox) = self.subscribers.write().unwrap().remove(&id) {
            outbox.close();
        }
    }

    fn publish(&self, event: Event) {
        let subs = self.subscribers.read().unwrap();
        let mut to_evict = Vec::new();
        for (id, outbox) in subs.iter() {
            let evict = outbox.enqueue(event.clone(), self.config.slow_consumer_drop_limit);
            if evict {
                to_evict.push(*id);
            }
        }
        drop(subs);

        if !to_evict.is_empty() {
            let mut subs = self.subscribers.write().unwrap();
            for id in to_evict {
                if let Some(outbox) = subs.remove(&id) {
                    warn!(subscriber_id = %id, "evicting slow subscriber");
                    outbox.close();
                }
            }
        }
    }

    pub fn publish_worker_liveness(
        &self,
        worker_id: Uuid,
        state: crate::types::Liveness,
        last_seen: chrono::DateTime<chrono::Utc>,
    ) {
        debug!(%worker_id, %state, "publish_worker_liveness");
        self.publish(Event::WorkerLiveness {
            worker_id,
            state,
            last_seen,
        });
    }

    pub fn publish_worker_throughput(&self, worker_id: Uuid, value: u64) {
        self.publish(Event::WorkerThroughput { worker_id, value });
    }

    pub fn publish_job_progress(&self, job_id: Uuid, progress: f64, throughput: u64, eta: String) {
        self.publish(Event::JobProgress {
            job_id,
            progress,
            throughput,
            eta,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(capacity: usize, policy: DropPolicy) -> BroadcastConfig {
        BroadcastConfig {
            subscriber_outbox_capacity: capacity,
            drop_policy: policy,
            slow_consumer_drop_limit: 3,
        }
    }

    #[tokio::test]
    async fn fifo_per_subscriber() {
        let hub = Hub::new(cfg(8, DropPolicy::DropOldest));
        let sub = hub.subscribe();
        for i in 0..5u64 {
            hub.publish_worker_throughput(Uuid::nil(), i);
        }
        for i in 0..5u64 {
            match sub.recv().await.unwrap() {
                Event::WorkerThroughput { value, .. } => assert_eq!(value, i),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn drop_oldest_keeps_capacity_and_latest() {
        let hub = Hub::new(cfg(2, DropPolicy::DropOldest));
        let sub = hub.subscribe();
        for i in 0..5u64 {
            hub.publish_worker_throughput(Uuid::nil(), i);
        }
        let mut got = Vec::new();
        got.push(sub.recv().await.unwrap());
        got.push(sub.recv().await.unwrap());
        let values: Vec<u64> = got
            .into_iter()
            .map(|e| match e {
                Event::WorkerThroughput { value, .. } => value,
                _ => unreachable!(),
            })
            .collect();
        // oldest two (0, 1) were dropped to make room for 3, 4
        assert_eq!(values, vec![3, 4]);
    }

    #[tokio::test]
    async fn publish_does_not_block_on_full_outbox() {
        let hub = Hub::new(cfg(1, DropPolicy::DropOldest));
        let _sub = hub.subscribe(); // never drained
        let start = std::time::Instant::now();
        for i in 0..1000u64 {
            hub.publish_worker_throughput(Uuid::nil(), i);
        }
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted() {
        let hub = Hub::new(cfg(1, DropPolicy::DropOldest));
        let sub = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        for i in 0..10u64 {
            hub.publish_worker_throughput(Uuid::nil(), i);
        }
        assert_eq!(hub.subscriber_count(), 0);
        drop(sub);
    }

    #[tokio::test]
    async fn independent_subscribers_each_see_full_stream_below_capacity() {
        let hub = Hub::new(cfg(64, DropPolicy::DropOldest));
        let fast = hub.subscribe();
        let _slow = hub.subscribe(); // not drained, but capacity is large enough
        for i in 0..10u64 {
            hub.publish_worker_throughput(Uuid::nil(), i);
        }
        for i in 0..10u64 {
            match fast.recv().await.unwrap() {
                Event::WorkerThroughput { value, .. } => assert_eq!(value, i),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }
}
