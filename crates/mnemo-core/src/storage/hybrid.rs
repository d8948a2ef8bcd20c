//! Hybrid store (C5): local is the authoritative read/write path; every
//! mutation is additionally mirrored to the remote store by enqueuing a
//! [`crate::sync::SyncOp`] onto the [`crate::sync::SyncEngine`] — the write
//! call itself never waits on the network.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{Config, RemoteConfig, SyncConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::Result;
use crate::memory::{
    Association, AssociationReason, Memory, SearchDebug, SearchResult, StoreStats, TagMatch,
};
use crate::storage::{DeleteFilters, DeleteOutcome, LocalStore, MemoryStore, RemoteStore};
use crate::sync::{SyncEngine, SyncOp, SyncStatus};

/// Local store with optional background replication to a remote store.
pub struct HybridStore {
    local: Arc<LocalStore>,
    sync: Option<SyncEngine>,
}

impl HybridStore {
    /// Open the local store at `config.data_dir` and, if `config.remote` is
    /// usable, spawn a sync engine mirroring writes to it.
    pub fn open(config: &Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let local = Arc::new(LocalStore::open(&config.data_dir, embedder)?);
        let sync = Self::spawn_sync(&local, &config.remote, &config.sync)?;
        Ok(Self { local, sync })
    }

    fn spawn_sync(
        local: &Arc<LocalStore>,
        remote_config: &RemoteConfig,
        sync_config: &SyncConfig,
    ) -> Result<Option<SyncEngine>> {
        if remote_config.endpoint.is_empty() {
            return Ok(None);
        }
        let remote = Arc::new(RemoteStore::new(remote_config)?);
        Ok(Some(SyncEngine::spawn(local.clone(), remote, sync_config.clone())))
    }

    /// The underlying local store, for callers (consolidation, scheduler)
    /// that need direct access beyond the `MemoryStore` surface.
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Current sync engine status, or `None` if no remote is configured.
    pub async fn sync_status(&self) -> Option<SyncStatus> {
        match &self.sync {
            Some(sync) => Some(sync.status().await),
            None => None,
        }
    }

    /// Pause background sync draining — used by the consolidator so that
    /// retention/decay writes during a consolidation run aren't mirrored
    /// mid-computation, then resumed once the run completes.
    pub async fn pause_sync(&self) {
        if let Some(sync) = &self.sync {
            sync.pause().await;
        }
    }

    /// Resume background sync draining.
    pub async fn resume_sync(&self) {
        if let Some(sync) = &self.sync {
            sync.resume().await;
        }
    }

    async fn enqueue(&self, op: SyncOp) {
        if let Some(sync) = &self.sync {
            sync.enqueue(op).await;
        }
    }

    /// Quality-boosted semantic search (spec §4.5): over-fetches `3n`
    /// candidates from the local store, then reranks by
    /// `relevance * (1 - boost) + quality_score * boost`, attaching a
    /// [`SearchDebug`] breakdown to each result.
    pub async fn retrieve_with_quality_boost(
        &self,
        query: &str,
        n: usize,
        min_score: Option<f32>,
        quality_boost: f32,
    ) -> Result<Vec<SearchResult>> {
        if quality_boost <= 0.0 {
            return self.local.retrieve(query, n, min_score).await;
        }

        let over_fetch = n.max(1) * 3;
        let candidates = self.local.retrieve(query, over_fetch, min_score).await?;
        let candidates_considered = candidates.len();

        let mut boosted: Vec<SearchResult> = candidates
            .into_iter()
            .map(|mut result| {
                let quality_score = result.memory.quality_score();
                let base_relevance = result.relevance;
                let blended = base_relevance as f64 * (1.0 - quality_boost as f64)
                    + quality_score * quality_boost as f64;
                result.relevance = blended as f32;
                result.debug = Some(SearchDebug {
                    base_relevance,
                    quality_score,
                    quality_boost,
                    candidates_considered,
                });
                result
            })
            .collect();

        boosted.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
        boosted.truncate(n);
        Ok(boosted)
    }
}

impl MemoryStore for HybridStore {
    async fn initialize(&self) -> Result<()> {
        self.local.initialize().await
    }

    async fn store(&self, memory: Memory) -> Result<(bool, String)> {
        let result = self.local.store(memory.clone()).await?;
        if result.0 {
            self.enqueue(SyncOp::Store(memory)).await;
        }
        Ok(result)
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Option<Memory>> {
        self.local.get_by_hash(hash).await
    }

    async fn retrieve(
        &self,
        query: &str,
        n: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        self.local.retrieve(query, n, min_score).await
    }

    async fn search_by_tag(&self, tags: &[String], tag_match: TagMatch) -> Result<Vec<Memory>> {
        self.local.search_by_tag(tags, tag_match).await
    }

    async fn recall(&self, after: Option<f64>, before: Option<f64>, n: usize) -> Result<Vec<Memory>> {
        self.local.recall(after, before, n).await
    }

    async fn exact_match_search(&self, needle: &str, n: usize) -> Result<Vec<Memory>> {
        self.local.exact_match_search(needle, n).await
    }

    async fn delete(&self, hash: &str) -> Result<u64> {
        let deleted = self.local.delete(hash).await?;
        if deleted > 0 {
            self.enqueue(SyncOp::Delete(hash.to_string())).await;
        }
        Ok(deleted)
    }

    async fn delete_by_filters(&self, filters: DeleteFilters) -> Result<DeleteOutcome> {
        let dry_run = filters.dry_run;
        let outcome = self.local.delete_by_filters(filters).await?;
        if !dry_run {
            if let Some(hashes) = &outcome.previewed_hashes {
                for hash in hashes {
                    self.enqueue(SyncOp::Delete(hash.clone())).await;
                }
            }
        }
        Ok(outcome)
    }

    async fn update_metadata(&self, hash: &str, patch: HashMap<String, Value>) -> Result<()> {
        self.local.update_metadata(hash, patch.clone()).await?;
        self.enqueue(SyncOp::UpdateMetadata(hash.to_string(), patch)).await;
        Ok(())
    }

    async fn get_stats(&self) -> Result<StoreStats> {
        let mut stats = self.local.get_stats().await?;
        stats.backend_id = if self.sync.is_some() { "hybrid" } else { "local" }.to_string();
        Ok(stats)
    }

    async fn get_all_memories(&self, limit: Option<usize>, offset: Option<usize>) -> Result<Vec<Memory>> {
        self.local.get_all_memories(limit, offset).await
    }

    async fn upsert_association(
        &self,
        a: &str,
        b: &str,
        strength: f32,
        reason: AssociationReason,
    ) -> Result<()> {
        self.local.upsert_association(a, b, strength, reason).await?;
        self.enqueue(SyncOp::UpsertAssociation(a.to_string(), b.to_string(), strength, reason))
            .await;
        Ok(())
    }

    async fn list_associations(&self, hash: &str, max_hops: usize) -> Result<Vec<Association>> {
        self.local.list_associations(hash, max_hops).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbeddingProvider;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.data_dir = dir.to_path_buf();
        config.embedding_dim = 32;
        config.remote.endpoint = String::new();
        config
    }

    #[tokio::test]
    async fn test_store_without_remote_configured_succeeds_with_no_sync_engine() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
        let store = HybridStore::open(&config, embedder).unwrap();

        assert!(store.sync_status().await.is_none());

        let memory = Memory::new("hello".to_string(), vec![], None);
        let (inserted, _) = store.store(memory).await.unwrap();
        assert!(inserted);
    }

    #[tokio::test]
    async fn test_quality_boost_of_zero_is_equivalent_to_plain_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
        let store = HybridStore::open(&config, embedder).unwrap();
        store.store(Memory::new("alpha".to_string(), vec![], None)).await.unwrap();

        let boosted = store.retrieve_with_quality_boost("alpha", 5, None, 0.0).await.unwrap();
        assert!(boosted.iter().all(|r| r.debug.is_none()));
    }

    #[tokio::test]
    async fn test_quality_boost_attaches_debug_breakdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
        let store = HybridStore::open(&config, embedder).unwrap();
        store.store(Memory::new("alpha beta".to_string(), vec![], None)).await.unwrap();

        let boosted = store
            .retrieve_with_quality_boost("alpha beta", 5, None, 0.3)
            .await
            .unwrap();
        assert!(boosted.iter().all(|r| r.debug.is_some()));
    }

    #[tokio::test]
    async fn test_real_delete_by_filters_enqueues_one_sync_op_per_deleted_hash() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.remote.endpoint = "http://127.0.0.1:1".to_string();
        config.remote.request_timeout_ms = 500;
        config.sync.max_retries = 0;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
        let store = HybridStore::open(&config, embedder).unwrap();

        store
            .store(Memory::new("drop me one".to_string(), vec!["drop-me".to_string()], None))
            .await
            .unwrap();
        store
            .store(Memory::new("drop me two".to_string(), vec!["drop-me".to_string()], None))
            .await
            .unwrap();

        let outcome = store
            .delete_by_filters(DeleteFilters {
                tags: Some(vec!["drop-me".to_string()]),
                dry_run: false,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.count, 2);

        let queue_len = store.sync_status().await.unwrap().queue_len;
        assert_eq!(queue_len, 2, "each deleted hash must be mirrored as its own sync op");
    }
}
