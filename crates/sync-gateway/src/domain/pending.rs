//! Correlation store - ties an intercepted send to its webhook or poll outcome.
//!
//! Accessed concurrently from three places: the interceptor's request path
//! (creates entries), its response path (reads and deletes), and the
//! callback receiver (reads, then delivers). Shard locks are held for map
//! mutation only; channel sends happen on a cloned sender after the lock is
//! released.

use crate::domain::correlation::CorrelationId;
use crate::domain::types::StatusPayload;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Buffer size of each notification channel. Absorbs duplicate webhooks
/// without blocking the callback handler.
pub const NOTIFICATION_CAPACITY: usize = 3;

/// A send awaiting its resolved status.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Key minted by the outbound hook
    pub correlation_id: CorrelationId,
    /// Writer side of the notification channel
    pub notifier: mpsc::Sender<StatusPayload>,
    /// When the entry was created
    pub created_at: Instant,
    /// Upstream-assigned identity, once the send was acknowledged
    pub message_uuid: Option<String>,
}

impl PendingRequest {
    /// Create a record with a fresh notification channel.
    ///
    /// The receiver goes to the single interceptor invocation that owns this send.
    pub fn new(correlation_id: CorrelationId) -> (Self, mpsc::Receiver<StatusPayload>) {
        let (notifier, rx) = mpsc::channel(NOTIFICATION_CAPACITY);
        let record = Self {
            correlation_id,
            notifier,
            created_at: Instant::now(),
            message_uuid: None,
        };
        (record, rx)
    }
}

/// Statistics for the correlation store
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Entries inserted
    pub total_registered: AtomicU64,
    /// Entries removed by their owning interceptor
    pub total_deleted: AtomicU64,
    /// Entries removed by the orphan sweep
    pub total_evicted: AtomicU64,
}

/// Keyed table of in-flight sends.
///
/// Injected as `Arc<dyn CorrelationStore>` so tests can substitute their own.
pub trait CorrelationStore: Send + Sync {
    /// Insert (or overwrite) the record for `key`.
    fn put(&self, key: CorrelationId, record: PendingRequest);

    /// Look up by correlation key.
    fn get(&self, key: &CorrelationId) -> Option<PendingRequest>;

    /// Remove `key` and any alias pointing at it. Returns whether it existed.
    fn delete(&self, key: &CorrelationId) -> bool;

    /// Register the upstream message UUID as a secondary lookup for `key`.
    /// Returns false if `key` is no longer present.
    fn alias(&self, message_uuid: &str, key: &CorrelationId) -> bool;

    /// Look up by message UUID alias.
    fn get_by_message_uuid(&self, message_uuid: &str) -> Option<PendingRequest>;

    /// Remove every entry older than `max_age`. Returns the number removed.
    fn remove_older_than(&self, max_age: Duration) -> usize;

    /// Number of live entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> &StoreStats;
}

/// In-memory store over sharded-lock maps.
#[derive(Default)]
pub struct InMemoryCorrelationStore {
    entries: DashMap<CorrelationId, PendingRequest>,
    aliases: DashMap<String, CorrelationId>,
    stats: StoreStats,
}

impl InMemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CorrelationStore for InMemoryCorrelationStore {
    fn put(&self, key: CorrelationId, record: PendingRequest) {
        if let Some(previous) = self.entries.insert(key, record) {
            warn!(correlation_id = %key, "Overwrote live correlation entry");
            if let Some(uuid) = previous.message_uuid {
                self.aliases.remove(&uuid);
            }
        }
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(correlation_id = %key, "Registered pending send");
    }

    fn get(&self, key: &CorrelationId) -> Option<PendingRequest> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn delete(&self, key: &CorrelationId) -> bool {
        let Some((_, record)) = self.entries.remove(key) else {
            return false;
        };
        if let Some(uuid) = record.message_uuid {
            self.aliases.remove_if(&uuid, |_, target| target == key);
        }
        self.stats.total_deleted.fetch_add(1, Ordering::Relaxed);
        debug!(
            correlation_id = %key,
            age_ms = record.created_at.elapsed().as_millis(),
            "Removed pending send"
        );
        true
    }

    fn alias(&self, message_uuid: &str, key: &CorrelationId) -> bool {
        {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return false;
            };
            entry.message_uuid = Some(message_uuid.to_string());
        }
        self.aliases.insert(message_uuid.to_string(), *key);
        // A concurrent delete may have slipped in between the two maps.
        if !self.entries.contains_key(key) {
            self.aliases.remove_if(message_uuid, |_, target| target == key);
            return false;
        }
        true
    }

    fn get_by_message_uuid(&self, message_uuid: &str) -> Option<PendingRequest> {
        let key = *self.aliases.get(message_uuid)?.value();
        self.get(&key)
    }

    fn remove_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut stale_aliases = Vec::new();

        self.entries.retain(|id, record| {
            let elapsed = now.duration_since(record.created_at);
            if elapsed > max_age {
                warn!(
                    correlation_id = %id,
                    elapsed_ms = elapsed.as_millis(),
                    "Evicting orphaned pending send"
                );
                stale_aliases.extend(record.message_uuid.clone());
                removed += 1;
                false
            } else {
                true
            }
        });

        for uuid in &stale_aliases {
            self.aliases.remove(uuid);
        }
        self.stats
            .total_evicted
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn stats(&self) -> &StoreStats {
        &self.stats
    }
}

/// Deletes its entry from the store when dropped.
///
/// Held by the interceptor from the moment an entry is created, so the entry
/// is removed on every exit path: resolution, pass-through, upstream error,
/// timeout, or the client going away.
pub struct EntryGuard {
    store: Arc<dyn CorrelationStore>,
    key: CorrelationId,
}

impl EntryGuard {
    pub fn new(store: Arc<dyn CorrelationStore>, key: CorrelationId) -> Self {
        Self { store, key }
    }

    pub fn key(&self) -> CorrelationId {
        self.key
    }
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.store.delete(&self.key);
    }
}

/// Background task evicting entries that outlived `max_age`.
pub async fn cleanup_task(
    store: Arc<dyn CorrelationStore>,
    interval: Duration,
    max_age: Duration,
) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        let removed = store.remove_older_than(max_age);
        if removed > 0 {
            debug!(removed = removed, "Swept orphaned pending sends");
        }
    }
}
