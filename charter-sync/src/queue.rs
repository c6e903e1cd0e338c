//! Durable outbound event queue.
//!
//! Items wait here until a processing pass delivers them. A pass drains the
//! pending items in stored order through the registered [`EventProcessor`];
//! delivered items are removed, failed ones are retried on later passes
//! until their retry count exceeds the policy bound, at which point they
//! move to the failed set and stay there for inspection.
//!
//! Only one pass runs at a time. Every mutation is written back to the
//! [`QueueStore`] best-effort: a storage failure is logged and the queue
//! carries on in memory.

use crate::config::{RetryPolicy, SyncConfig};
use crate::error::SyncResult;
use crate::store::QueueStore;
use async_trait::async_trait;
use charter_types::{Event, QueueItemId};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, error, info, warn};

const PERSISTED_FORMAT_VERSION: u32 = 1;

/// Error recorded on an item whose processor panicked.
pub const PROCESSOR_PANICKED: &str = "event processor panicked";

/// Delivers a single event.
///
/// `Ok(true)` means delivered, `Ok(false)` means rejected. A transient
/// error is treated like a rejection and its message is recorded on the
/// item; a permanent one moves the item to the failed set at once. A panic
/// counts as a failed attempt.
#[async_trait]
pub trait EventProcessor: Send + Sync {
    async fn process(&self, event: &Event) -> SyncResult<bool>;
}

/// Adapts an async closure into an [`EventProcessor`].
pub struct FnProcessor<F>(F);

impl<F> FnProcessor<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> EventProcessor for FnProcessor<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = SyncResult<bool>> + Send,
{
    async fn process(&self, event: &Event) -> SyncResult<bool> {
        (self.0)(event.clone()).await
    }
}

/// An event waiting for delivery, with its delivery history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub event: Event,
    /// Number of failed delivery attempts. Never decreases.
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueItem {
    fn new(event: Event) -> Self {
        Self {
            id: QueueItemId::new(),
            event,
            retry_count: 0,
            created_at: Utc::now(),
            last_attempt: None,
            error: None,
        }
    }

    fn record_failure(&mut self, message: String) {
        self.retry_count += 1;
        self.last_attempt = Some(Utc::now());
        self.error = Some(message);
    }
}

/// Why a call to [`EventQueue::process_queue`] did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    NoProcessor,
    AlreadyRunning,
}

/// Outcome of one processing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items handed to the processor.
    pub attempted: usize,
    pub delivered: usize,
    /// Items that failed and stay pending.
    pub retried: usize,
    /// Items that failed and moved to the failed set.
    pub failed: usize,
    /// Items still inside their backoff window.
    pub deferred: usize,
    /// Set when the pass did not run at all.
    pub skipped: Option<SkipReason>,
}

impl DrainReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    /// Returns true if a pass actually ran.
    pub fn ran(&self) -> bool {
        self.skipped.is_none()
    }
}

/// On-disk layout of the queue.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedQueue {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    pending: Vec<QueueItem>,
    #[serde(default)]
    failed: Vec<QueueItem>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<QueueItem>,
    failed: Vec<QueueItem>,
}

/// Clears the in-flight flag when a pass ends, however it ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The outbound event queue.
pub struct EventQueue {
    store: Arc<dyn QueueStore>,
    storage_key: String,
    policy: RetryPolicy,
    state: RwLock<QueueState>,
    processor: RwLock<Option<Arc<dyn EventProcessor>>>,
    online: AtomicBool,
    processing: AtomicBool,
    loaded: OnceCell<()>,
    /// Serializes writes so an older snapshot never lands after a newer one.
    persist_lock: Mutex<()>,
}

impl EventQueue {
    /// Creates a queue persisted under `storage_key`. Starts online.
    pub fn new(store: Arc<dyn QueueStore>, storage_key: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            store,
            storage_key: storage_key.into(),
            policy,
            state: RwLock::new(QueueState::default()),
            processor: RwLock::new(None),
            online: AtomicBool::new(true),
            processing: AtomicBool::new(false),
            loaded: OnceCell::new(),
            persist_lock: Mutex::new(()),
        }
    }

    /// Creates a queue using the storage key and retry policy from `config`.
    pub fn from_config(store: Arc<dyn QueueStore>, config: &SyncConfig) -> Self {
        Self::new(store, config.storage_key.clone(), config.retry_policy())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Loads persisted items. Runs once; later calls return immediately.
    ///
    /// Every other operation calls this first, so items are never written
    /// before the persisted ones have been read back.
    pub async fn initialize(&self) {
        self.loaded.get_or_init(|| self.load()).await;
    }

    pub fn is_initialized(&self) -> bool {
        self.loaded.initialized()
    }

    async fn load(&self) {
        let persisted = match self.store.get(&self.storage_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<PersistedQueue>(&raw) {
                Ok(persisted) => persisted,
                Err(e) => {
                    warn!("Discarding unreadable event queue under {}: {}", self.storage_key, e);
                    PersistedQueue::default()
                }
            },
            Ok(None) => PersistedQueue::default(),
            Err(e) => {
                warn!("Failed to load event queue, starting empty: {}", e);
                PersistedQueue::default()
            }
        };

        if persisted.version > PERSISTED_FORMAT_VERSION {
            warn!(
                "Event queue was written by a newer format (v{}), reading best-effort",
                persisted.version
            );
        }

        let mut state = self.state.write().await;
        state.pending = persisted.pending;
        state.failed = persisted.failed;
        info!(
            "Loaded event queue: {} pending, {} failed",
            state.pending.len(),
            state.failed.len()
        );
    }

    /// Registers the processor used by [`process_queue`](Self::process_queue),
    /// replacing any previous one.
    pub async fn set_processor(&self, processor: Arc<dyn EventProcessor>) {
        *self.processor.write().await = Some(processor);
    }

    pub async fn has_processor(&self) -> bool {
        self.processor.read().await.is_some()
    }

    /// Appends an event and persists the queue.
    ///
    /// Returns once the store has acknowledged the write, or after logging
    /// a storage failure; the item is queued in memory either way.
    pub async fn enqueue(&self, event: Event) -> QueueItemId {
        self.initialize().await;

        let item = QueueItem::new(event);
        let id = item.id;
        debug!("Enqueued {} event as item {}", item.event.kind, id);
        self.state.write().await.pending.push(item);
        self.persist().await;
        id
    }

    /// Runs one delivery pass over the pending items.
    ///
    /// Does nothing while offline, without a processor, or while another
    /// pass is running. Items enqueued during the pass wait for the next one.
    pub async fn process_queue(&self) -> DrainReport {
        self.initialize().await;

        if !self.is_online() {
            debug!("Offline, skipping queue processing");
            return DrainReport::skipped(SkipReason::Offline);
        }

        let Some(processor) = self.processor.read().await.clone() else {
            debug!("No processor registered, skipping queue processing");
            return DrainReport::skipped(SkipReason::NoProcessor);
        };

        let Some(_in_flight) = InFlightGuard::acquire(&self.processing) else {
            debug!("Queue processing already in flight");
            return DrainReport::skipped(SkipReason::AlreadyRunning);
        };

        let batch: Vec<QueueItem> = self.state.read().await.pending.clone();
        let mut report = DrainReport::default();
        if batch.is_empty() {
            return report;
        }

        let started = Utc::now();
        for item in batch {
            if !self.is_due(&item, started) {
                report.deferred += 1;
                continue;
            }

            report.attempted += 1;
            let outcome = AssertUnwindSafe(processor.process(&item.event))
                .catch_unwind()
                .await;

            let mut state = self.state.write().await;
            // Cleared while the processor was running.
            let Some(pos) = state.pending.iter().position(|i| i.id == item.id) else {
                continue;
            };

            let (message, permanent) = match outcome {
                Ok(Ok(true)) => {
                    state.pending.remove(pos);
                    report.delivered += 1;
                    continue;
                }
                Ok(Ok(false)) => ("delivery rejected".to_string(), false),
                Ok(Err(e)) => (e.to_string(), !e.is_transient()),
                Err(_) => {
                    error!("Event processor panicked on item {}", item.id);
                    (PROCESSOR_PANICKED.to_string(), false)
                }
            };

            let entry = &mut state.pending[pos];
            entry.record_failure(message);
            if permanent || self.policy.is_exhausted(entry.retry_count) {
                let exhausted = state.pending.remove(pos);
                warn!(
                    "Giving up on {} event {} after {} attempts: {}",
                    exhausted.event.kind,
                    exhausted.id,
                    exhausted.retry_count,
                    exhausted.error.as_deref().unwrap_or("unknown error")
                );
                state.failed.push(exhausted);
                report.failed += 1;
            } else {
                debug!(
                    "Delivery of item {} failed (attempt {}): {}",
                    entry.id,
                    entry.retry_count,
                    entry.error.as_deref().unwrap_or("unknown error")
                );
                report.retried += 1;
            }
        }

        if report.attempted > 0 {
            self.persist().await;
        }

        info!(
            "Queue pass: {} attempted, {} delivered, {} retrying, {} failed, {} deferred",
            report.attempted, report.delivered, report.retried, report.failed, report.deferred
        );
        report
    }

    fn is_due(&self, item: &QueueItem, now: DateTime<Utc>) -> bool {
        let Some(last_attempt) = item.last_attempt else {
            return true;
        };
        let delay = self.policy.delay_for(item.retry_count);
        if delay.is_zero() {
            return true;
        }
        match chrono::Duration::from_std(delay) {
            Ok(delay) => last_attempt + delay <= now,
            Err(_) => false,
        }
    }

    /// Updates connectivity. Coming back online starts a pass right away,
    /// whose report is returned.
    pub async fn set_online_status(&self, online: bool) -> Option<DrainReport> {
        let was_online = self.online.swap(online, Ordering::AcqRel);
        match (was_online, online) {
            (false, true) => {
                info!("Back online, replaying event queue");
                Some(self.process_queue().await)
            }
            (true, false) => {
                info!("Offline, pausing event queue");
                None
            }
            _ => None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Returns true while a pass is running.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Number of pending items. Failed items are not counted.
    pub async fn queue_length(&self) -> usize {
        self.state.read().await.pending.len()
    }

    /// Snapshot of the pending items, oldest first.
    pub async fn pending_items(&self) -> Vec<QueueItem> {
        self.state.read().await.pending.clone()
    }

    /// Snapshot of the items that exhausted their retries.
    pub async fn failed_events(&self) -> Vec<QueueItem> {
        self.state.read().await.failed.clone()
    }

    /// Drops every pending and failed item and deletes the persisted queue.
    pub async fn clear_queue(&self) {
        self.initialize().await;

        let _write = self.persist_lock.lock().await;
        {
            let mut state = self.state.write().await;
            state.pending.clear();
            state.failed.clear();
        }
        if let Err(e) = self.store.delete(&self.storage_key).await {
            warn!("Failed to delete persisted event queue: {}", e);
        }
        info!("Event queue cleared");
    }

    /// Drops the failed items only.
    pub async fn clear_failed_events(&self) {
        self.initialize().await;
        self.state.write().await.failed.clear();
        self.persist().await;
    }

    /// Writes the current state to the store. Returns false on failure.
    async fn persist(&self) -> bool {
        let _write = self.persist_lock.lock().await;
        let snapshot = {
            let state = self.state.read().await;
            PersistedQueue {
                version: PERSISTED_FORMAT_VERSION,
                pending: state.pending.clone(),
                failed: state.failed.clone(),
            }
        };

        let raw = match serde_json::to_string(&snapshot) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize event queue: {}", e);
                return false;
            }
        };

        match self.store.set(&self.storage_key, &raw).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to persist event queue, keeping {} items in memory: {}",
                    snapshot.pending.len(),
                    e
                );
                false
            }
        }
    }
}
