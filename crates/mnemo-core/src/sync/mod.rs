//! Sync engine (C6): a bounded, coalescing work queue that mirrors writes
//! made against [`crate::storage::LocalStore`] to a [`crate::storage::RemoteStore`]
//! in the background, with jittered exponential backoff on transient
//! failures.
//!
//! The local write path never waits on this — `enqueue` only ever touches
//! an in-memory queue guarded by a `tokio::sync::Mutex`; the actual network
//! call happens on the worker task spawned by [`SyncEngine::spawn`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::config::{DropPolicy, SyncConfig};
use crate::memory::{AssociationReason, Memory};
use crate::storage::{LocalStore, MemoryStore, RemoteStore};

/// A queued mutation awaiting remote replication. Each variant carries its
/// own coalescing key (see [`SyncOp::key`]) so a burst of writes against the
/// same memory collapses to its latest state before the worker ever sees it.
#[derive(Debug, Clone)]
pub enum SyncOp {
    /// Mirror a full `store`.
    Store(Memory),
    /// Mirror a `delete` by full hash.
    Delete(String),
    /// Mirror an `update_metadata` merge.
    UpdateMetadata(String, HashMap<String, Value>),
    /// Mirror an `upsert_association`.
    UpsertAssociation(String, String, f32, AssociationReason),
}

impl SyncOp {
    /// Coalescing key: a later op with the same key replaces an earlier
    /// still-queued one rather than queuing twice.
    fn key(&self) -> String {
        match self {
            SyncOp::Store(m) => format!("memory:{}", m.content_hash),
            SyncOp::Delete(hash) => format!("memory:{hash}"),
            SyncOp::UpdateMetadata(hash, _) => format!("memory:{hash}"),
            SyncOp::UpsertAssociation(a, b, _, _) => {
                if a < b {
                    format!("assoc:{a}:{b}")
                } else {
                    format!("assoc:{b}:{a}")
                }
            }
        }
    }
}

/// Lifecycle state of the sync worker (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Worker has not yet completed its first reconciliation pass.
    InitialReconcile,
    /// Draining the queue normally.
    Running,
    /// Draining suspended (consolidation in progress, or explicit `pause()`).
    Paused,
    /// Shut down; no further draining will occur.
    Stopped,
}

/// Observable snapshot of the sync engine, returned by `memory_health` and
/// `sync_status()`.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    /// Current lifecycle state.
    pub state: SyncState,
    /// Number of ops currently queued (after coalescing).
    pub queue_len: usize,
    /// Ops successfully replicated since startup.
    pub synced_total: u64,
    /// Ops permanently dropped (exhausted retries or a permanent error)
    /// since startup.
    pub dropped_total: u64,
    /// Most recent error message, if any op has failed.
    pub last_error: Option<String>,
}

struct Queue {
    ops: Vec<SyncOp>,
}

impl Queue {
    fn coalesced_push(&mut self, op: SyncOp, capacity: usize, policy: DropPolicy) -> bool {
        let key = op.key();
        if let Some(pos) = self.ops.iter().position(|existing| existing.key() == key) {
            self.ops.remove(pos);
            self.ops.push(op);
            return true;
        }

        if self.ops.len() >= capacity {
            match policy {
                DropPolicy::DropOldest => {
                    self.ops.remove(0);
                    self.ops.push(op);
                    true
                }
                DropPolicy::DropNew | DropPolicy::BlockWriter => {
                    // `BlockWriter`'s blocking behavior is handled by the
                    // caller (`SyncEngine::enqueue`) via a timeout before
                    // falling back here; by the time we're called again
                    // with the queue still full, we degrade to drop_new.
                    false
                }
            }
        } else {
            self.ops.push(op);
            true
        }
    }
}

/// The sync engine itself: an enqueue handle plus a background worker.
pub struct SyncEngine {
    queue: Arc<Mutex<Queue>>,
    notify: Arc<Notify>,
    state: Arc<RwLock<SyncState>>,
    config: SyncConfig,
    synced_total: Arc<AtomicU64>,
    dropped_total: Arc<AtomicU64>,
    last_error: Arc<Mutex<Option<String>>>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl SyncEngine {
    /// Construct and immediately spawn the background worker against
    /// `remote`. The worker starts in [`SyncState::InitialReconcile`]: it
    /// reconciles against `local`'s persisted `sync_cursor` (pulling remote
    /// memories local doesn't have yet, pushing local memories remote
    /// hasn't seen) before transitioning to `Running` and draining the live
    /// queue.
    pub fn spawn(local: Arc<LocalStore>, remote: Arc<RemoteStore>, config: SyncConfig) -> Self {
        let queue = Arc::new(Mutex::new(Queue { ops: Vec::new() }));
        let notify = Arc::new(Notify::new());
        let state = Arc::new(RwLock::new(SyncState::InitialReconcile));
        let synced_total = Arc::new(AtomicU64::new(0));
        let dropped_total = Arc::new(AtomicU64::new(0));
        let last_error = Arc::new(Mutex::new(None));

        let worker = tokio::spawn(run_worker(
            local,
            queue.clone(),
            notify.clone(),
            state.clone(),
            config.clone(),
            remote,
            synced_total.clone(),
            dropped_total.clone(),
            last_error.clone(),
        ));

        Self {
            queue,
            notify,
            state,
            config,
            synced_total,
            dropped_total,
            last_error,
            worker: Some(worker),
        }
    }

    /// Enqueue `op`. Never awaits the remote — only the in-memory queue.
    /// Under [`DropPolicy::BlockWriter`], waits up to `shutdown_grace_ms`
    /// (reused here as the enqueue timeout) for room before falling back to
    /// dropping the newest op.
    pub async fn enqueue(&self, op: SyncOp) {
        let capacity = self.config.queue_capacity;
        let policy = self.config.drop_policy;

        if policy == DropPolicy::BlockWriter {
            let deadline =
                tokio::time::Instant::now() + Duration::from_millis(self.config.shutdown_grace_ms);
            loop {
                let has_room = {
                    let queue = self.queue.lock().await;
                    queue.ops.len() < capacity || queue.ops.iter().any(|o| o.key() == op.key())
                };
                if has_room || tokio::time::Instant::now() >= deadline {
                    // Either there's room (or we're coalescing into an
                    // existing entry), or we've waited long enough —
                    // fall back to drop_oldest rather than block forever.
                    let mut queue = self.queue.lock().await;
                    queue.coalesced_push(op, capacity, DropPolicy::DropOldest);
                    self.notify.notify_one();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        let mut queue = self.queue.lock().await;
        let accepted = queue.coalesced_push(op, capacity, policy);
        drop(queue);
        if accepted {
            self.notify.notify_one();
        } else {
            self.dropped_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Suspend draining. Already-queued ops remain queued; new ops can
    /// still be enqueued (the local write path never blocks on sync state).
    pub async fn pause(&self) {
        *self.state.write().await = SyncState::Paused;
    }

    /// Resume draining after a [`Self::pause`].
    pub async fn resume(&self) {
        let mut guard = self.state.write().await;
        if *guard == SyncState::Paused {
            *guard = SyncState::Running;
            self.notify.notify_one();
        }
    }

    /// Current observable status.
    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            state: *self.state.read().await,
            queue_len: self.queue.lock().await.ops.len(),
            synced_total: self.synced_total.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
            last_error: self.last_error.lock().await.clone(),
        }
    }

    /// Stop the worker, draining the queue for up to `shutdown_grace_ms`
    /// first.
    pub async fn shutdown(mut self) {
        *self.state.write().await = SyncState::Stopped;
        self.notify.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = tokio::time::timeout(
                Duration::from_millis(self.config.shutdown_grace_ms),
                worker,
            )
            .await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    local: Arc<LocalStore>,
    queue: Arc<Mutex<Queue>>,
    notify: Arc<Notify>,
    state: Arc<RwLock<SyncState>>,
    config: SyncConfig,
    remote: Arc<RemoteStore>,
    synced_total: Arc<AtomicU64>,
    dropped_total: Arc<AtomicU64>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    if let Err(e) = reconcile(&local, &remote, &config, &synced_total, &dropped_total).await {
        *last_error.lock().await = Some(e.to_string());
        tracing::warn!(error = %e, "initial reconciliation failed, starting worker anyway");
    }
    {
        let mut guard = state.write().await;
        if *guard == SyncState::InitialReconcile {
            *guard = SyncState::Running;
        }
    }

    loop {
        if *state.read().await == SyncState::Stopped {
            return;
        }
        if *state.read().await == SyncState::Paused {
            notify.notified().await;
            continue;
        }

        let next = {
            let mut queue = queue.lock().await;
            if queue.ops.is_empty() {
                None
            } else {
                Some(queue.ops.remove(0))
            }
        };

        let Some(op) = next else {
            notify.notified().await;
            continue;
        };

        match apply_with_retry(&remote, &op, &config).await {
            Ok(()) => {
                synced_total.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                dropped_total.fetch_add(1, Ordering::Relaxed);
                *last_error.lock().await = Some(e.to_string());
                tracing::warn!(error = %e, "sync op dropped after exhausting retries");
            }
        }
    }
}

const RECONCILE_PAGE_SIZE: usize = 500;

/// Runs once, before the worker's first drain of the live queue: pulls
/// remote memories local doesn't have yet, then pushes local memories
/// modified since the persisted `sync_cursor` watermark, advancing the
/// cursor as pushes succeed (spec §4.6's initial reconciliation pass).
async fn reconcile(
    local: &LocalStore,
    remote: &RemoteStore,
    config: &SyncConfig,
    synced_total: &AtomicU64,
    dropped_total: &AtomicU64,
) -> crate::error::Result<()> {
    let (cursor_epoch, _cursor_seq) = local.sync_cursor().await?;

    let mut offset = 0usize;
    loop {
        let page = remote
            .get_all_memories(Some(RECONCILE_PAGE_SIZE), Some(offset))
            .await?;
        let page_len = page.len();
        for memory in page {
            if local.get_by_hash(&memory.content_hash).await?.is_none() {
                local.store(memory).await?;
            }
        }
        if page_len < RECONCILE_PAGE_SIZE {
            break;
        }
        offset += RECONCILE_PAGE_SIZE;
    }

    let pending = local.memories_updated_since(cursor_epoch).await?;
    let mut watermark = cursor_epoch;
    for memory in &pending {
        let op = SyncOp::Store(memory.clone());
        match apply_with_retry(remote, &op, config).await {
            Ok(()) => {
                synced_total.fetch_add(1, Ordering::Relaxed);
                watermark = memory.updated_at;
            }
            Err(e) => {
                dropped_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    hash = %memory.content_hash,
                    "reconciliation push dropped after exhausting retries, stopping early"
                );
                break;
            }
        }
    }

    local.set_sync_cursor(watermark, 0).await?;
    Ok(())
}

async fn apply_with_retry(
    remote: &RemoteStore,
    op: &SyncOp,
    config: &SyncConfig,
) -> crate::error::Result<()> {
    let mut attempt = 0;
    loop {
        let result = apply_once(remote, op).await;
        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = backoff_delay(attempt, config.retry_base_ms, config.retry_cap_ms);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying sync op");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn apply_once(remote: &RemoteStore, op: &SyncOp) -> crate::error::Result<()> {
    match op {
        SyncOp::Store(memory) => {
            remote.store(memory.clone()).await?;
        }
        SyncOp::Delete(hash) => {
            remote.delete(hash).await?;
        }
        SyncOp::UpdateMetadata(hash, patch) => {
            remote.update_metadata(hash, patch.clone()).await?;
        }
        SyncOp::UpsertAssociation(a, b, strength, reason) => {
            remote.upsert_association(a, b, *strength, *reason).await?;
        }
    }
    Ok(())
}

/// `base * 2^attempt`, capped, then jittered by ±25% of the capped value —
/// enough spread to avoid synchronized retry storms across many engine
/// instances without wandering far from the intended backoff curve.
fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(cap_ms) as f64;
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    let jittered = (capped * factor).round().clamp(0.0, cap_ms as f64) as u64;
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_op(content: &str) -> SyncOp {
        SyncOp::Store(Memory::new(content.to_string(), vec![], None))
    }

    #[test]
    fn test_coalescing_replaces_same_key_instead_of_growing_queue() {
        let mut queue = Queue { ops: Vec::new() };
        let memory = Memory::new("a".to_string(), vec![], None);
        let hash = memory.content_hash.clone();
        queue.coalesced_push(SyncOp::Store(memory), 10, DropPolicy::DropOldest);
        queue.coalesced_push(
            SyncOp::UpdateMetadata(hash, HashMap::new()),
            10,
            DropPolicy::DropOldest,
        );
        assert_eq!(queue.ops.len(), 1);
    }

    #[test]
    fn test_drop_oldest_evicts_front_when_full() {
        let mut queue = Queue { ops: Vec::new() };
        queue.coalesced_push(memory_op("a"), 2, DropPolicy::DropOldest);
        queue.coalesced_push(memory_op("b"), 2, DropPolicy::DropOldest);
        queue.coalesced_push(memory_op("c"), 2, DropPolicy::DropOldest);
        assert_eq!(queue.ops.len(), 2);
    }

    #[test]
    fn test_drop_new_rejects_when_full() {
        let mut queue = Queue { ops: Vec::new() };
        queue.coalesced_push(memory_op("a"), 1, DropPolicy::DropNew);
        let accepted = queue.coalesced_push(memory_op("b"), 1, DropPolicy::DropNew);
        assert!(!accepted);
        assert_eq!(queue.ops.len(), 1);
    }

    #[test]
    fn test_backoff_delay_grows_with_attempt_and_respects_cap() {
        let d0 = backoff_delay(0, 100, 10_000);
        let d10 = backoff_delay(10, 100, 10_000);
        // attempt 0: capped exponential is 100ms, jittered by ±25%.
        assert!(d0.as_millis() >= 75 && d0.as_millis() <= 125);
        // attempt 10: exponential saturates the cap; jitter still bounded
        // to ±25% of the cap itself so the delay never exceeds it by much.
        assert!(d10.as_millis() as u64 <= 12_500);
    }

    #[test]
    fn test_backoff_delay_jitter_stays_within_25_percent_of_capped_value() {
        for attempt in 0..5 {
            let d = backoff_delay(attempt, 100, 10_000);
            let capped = (100u64 << attempt) as f64;
            let lower = (capped * 0.75).floor() as u128;
            let upper = (capped * 1.25).ceil() as u128;
            assert!(d.as_millis() >= lower && d.as_millis() <= upper);
        }
    }

    fn test_local_store() -> (Arc<LocalStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn crate::embeddings::EmbeddingProvider> =
            Arc::new(crate::embeddings::HashEmbeddingProvider::new(32));
        let store = LocalStore::open(dir.path(), embedder).unwrap();
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn test_pause_then_resume_transitions_state() {
        let (local, _dir) = test_local_store();
        let remote = Arc::new(RemoteStore::new(&crate::config::RemoteConfig {
            endpoint: "https://example.invalid".to_string(),
            ..Default::default()
        }).unwrap());
        let engine = SyncEngine::spawn(local, remote, SyncConfig::default());
        engine.pause().await;
        assert_eq!(engine.status().await.state, SyncState::Paused);
        engine.resume().await;
        assert_eq!(engine.status().await.state, SyncState::Running);
        engine.shutdown().await;
    }
}
