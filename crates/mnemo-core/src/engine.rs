//! Unified engine API (spec §6): the twelve `memory_*` operations every
//! caller (CLI, MCP server, embedder service) drives the store through,
//! wrapping [`HybridStore`], [`QualityEvaluator`], [`Consolidator`], and
//! [`Scheduler`] behind one entry point.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::consolidation::{ConsolidationReport, Consolidator, Horizon};
use crate::embeddings::{EmbeddingProvider, HashEmbeddingProvider};
use crate::error::{EngineError, Result};
use crate::hash::normalize_content;
use crate::memory::{
    metadata_keys, Association, Memory, SearchMode, SearchResult, StoreStats, TagMatch,
};
use crate::quality::{ImplicitSignal, QualityEvaluator};
use crate::scheduler::{HorizonStatus, Scheduler};
use crate::storage::time_expr::parse_time_expr;
use crate::storage::{DeleteFilters, DeleteOutcome, HybridStore, MemoryStore};

/// Outcome of [`Engine::memory_store`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOutcome {
    pub content_hash: String,
    pub created: bool,
    pub message: String,
}

/// Arguments to [`Engine::memory_search`] (spec §6's unified read op).
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub mode: SearchMode,
    pub time_expr: Option<String>,
    pub after: Option<f64>,
    pub before: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub tag_match: TagMatch,
    pub quality_boost: f32,
    pub limit: usize,
    pub include_debug: bool,
}

/// Arguments to [`Engine::memory_list`].
#[derive(Debug, Clone)]
pub struct ListRequest {
    pub page: usize,
    pub page_size: usize,
    pub tags: Option<Vec<String>>,
    pub memory_type: Option<String>,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self { page: 1, page_size: 20, tags: None, memory_type: None }
    }
}

/// Liveness check (spec §6: `{backend, count, ready}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub backend: String,
    pub count: i64,
    pub ready: bool,
}

/// `memory_consolidate`'s `action` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidateAction {
    Run,
    Status,
    Recommend,
    Pause,
    Resume,
}

/// Result of a `memory_consolidate` call — shape depends on `action`.
#[derive(Debug, Clone)]
pub enum ConsolidateOutcome {
    Report(Option<ConsolidationReport>),
    Status(Vec<HorizonStatus>),
    Recommendation(Horizon),
    Ack,
}

/// A single pre-chunked unit handed to [`Engine::memory_ingest`]; walking a
/// file or directory tree into chunks is the calling pipeline's job (spec
/// §6, `memory_ingest`'s note).
#[derive(Debug, Clone)]
pub struct IngestChunk {
    pub content: String,
    pub tags: Vec<String>,
}

/// Outcome of [`Engine::memory_ingest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub stored: usize,
    pub duplicates: usize,
    pub content_hashes: Vec<String>,
}

/// `memory_quality`'s `action` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityAction {
    Rate,
    Get,
    Analyze,
}

/// Result of a `memory_quality` call.
#[derive(Debug, Clone)]
pub enum QualityOutcome {
    Rated,
    Fields { quality_score: f64, quality_provider: Option<String> },
    Analysis(QualityAnalysis),
}

/// Aggregate view for `memory_quality(action=analyze)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAnalysis {
    pub matched: usize,
    pub mean_quality: f64,
    pub content_hashes: Vec<String>,
}

/// `memory_graph`'s `action` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphAction {
    Connected,
    Path,
    Subgraph,
}

/// Result of a `memory_graph` call.
#[derive(Debug, Clone)]
pub enum GraphOutcome {
    Connected(Vec<Association>),
    Path(Option<Vec<String>>),
    Subgraph { nodes: Vec<String>, edges: Vec<Association> },
}

/// Everything a caller needs to drive the engine: storage, quality
/// evaluation, consolidation, and scheduling, wired from one [`Config`].
pub struct Engine {
    store: Arc<HybridStore>,
    quality: Arc<QualityEvaluator>,
    consolidator: Arc<Consolidator>,
    scheduler: Scheduler,
}

impl Engine {
    /// Build the full engine from `config`: opens the store (acquiring the
    /// data-dir lock), constructs the embedding provider, and spawns the
    /// scheduler's ticker tasks.
    pub fn open(config: Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = build_embedder(&config);
        let store = Arc::new(HybridStore::open(&config, embedder)?);
        let quality = Arc::new(QualityEvaluator::new(config.quality.clone(), Some(&config.remote))?);
        let consolidator = Arc::new(Consolidator::new(store.clone(), quality.clone(), &config));
        let scheduler = Scheduler::spawn(consolidator.clone(), &config.schedule);
        Ok(Self { store, quality, consolidator, scheduler })
    }

    /// Create. Returns the existing hash unchanged if `content`+`tags`
    /// already identify a stored memory (spec §7: duplicate is success).
    pub async fn memory_store(
        &self,
        content: String,
        tags: Vec<String>,
        memory_type: Option<String>,
        metadata: Option<HashMap<String, Value>>,
    ) -> Result<StoreOutcome> {
        if content.trim().is_empty() {
            return Err(EngineError::InvalidArgument("content must not be empty".to_string()));
        }
        let mut memory = Memory::new(content, tags, memory_type);
        if let Some(patch) = metadata {
            memory.merge_metadata(patch);
        }
        let content_hash = memory.content_hash.clone();
        let (created, message) = self.store.store(memory).await?;
        Ok(StoreOutcome { content_hash, created, message })
    }

    /// Unified read: semantic / exact / hybrid retrieval, optionally
    /// narrowed by a time window and/or tags, with quality-boosted
    /// reranking when `quality_boost > 0`.
    pub async fn memory_search(&self, req: SearchRequest) -> Result<Vec<SearchResult>> {
        let window = match &req.time_expr {
            Some(expr) => {
                let w = parse_time_expr(expr, Local::now())?;
                (w.after.or(req.after), w.before.or(req.before))
            }
            None => (req.after, req.before),
        };

        let mut results = match &req.query {
            Some(q) => match req.mode {
                SearchMode::Semantic => {
                    self.store
                        .retrieve_with_quality_boost(q, req.limit.max(1), None, req.quality_boost)
                        .await?
                }
                SearchMode::Exact => self
                    .store
                    .exact_match_search(q, req.limit.max(1))
                    .await?
                    .into_iter()
                    .map(|memory| SearchResult { memory, relevance: 1.0, debug: None })
                    .collect(),
                SearchMode::Hybrid => self.hybrid_search(q, req.limit.max(1)).await?,
            },
            None => {
                let memories = match &req.tags {
                    Some(tags) if !tags.is_empty() => {
                        self.store.search_by_tag(tags, req.tag_match).await?
                    }
                    _ => self.store.recall(window.0, window.1, req.limit.max(1)).await?,
                };
                memories
                    .into_iter()
                    .map(|memory| SearchResult { memory, relevance: 1.0, debug: None })
                    .collect()
            }
        };

        if let Some(after) = window.0 {
            results.retain(|r| r.memory.updated_at >= after);
        }
        if let Some(before) = window.1 {
            results.retain(|r| r.memory.updated_at < before);
        }
        if let Some(tags) = &req.tags {
            if !tags.is_empty() && req.query.is_some() {
                results.retain(|r| match req.tag_match {
                    TagMatch::Any => tags.iter().any(|t| r.memory.tags.contains(t)),
                    TagMatch::All => tags.iter().all(|t| r.memory.tags.contains(t)),
                });
            }
        }
        if !req.include_debug {
            for r in &mut results {
                r.debug = None;
            }
        }
        results.truncate(req.limit.max(1));
        Ok(results)
    }

    async fn hybrid_search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let over_fetch = limit * 3;
        let semantic = self.store.retrieve(query, over_fetch, None).await?;
        let keyword = self.store.exact_match_search(query, over_fetch).await?;

        let semantic_pairs: Vec<(String, f32)> =
            semantic.iter().map(|r| (r.memory.content_hash.clone(), r.relevance)).collect();
        let keyword_pairs: Vec<(String, f32)> =
            keyword.iter().map(|m| (m.content_hash.clone(), 1.0)).collect();

        let fused = crate::search::reciprocal_rank_fusion(&keyword_pairs, &semantic_pairs, 60.0);

        let mut results = Vec::with_capacity(limit);
        for (hash, score) in fused.into_iter().take(limit) {
            if let Some(memory) = self.store.get_by_hash(&hash).await? {
                results.push(SearchResult { memory, relevance: score, debug: None });
            }
        }
        Ok(results)
    }

    /// Browse: paginated, newest-updated first, optionally narrowed by
    /// tags and/or `memory_type`.
    pub async fn memory_list(&self, req: ListRequest) -> Result<Vec<Memory>> {
        let page = req.page.max(1);
        let page_size = req.page_size.max(1);
        let offset = (page - 1) * page_size;

        let mut memories = match &req.tags {
            Some(tags) if !tags.is_empty() => self.store.search_by_tag(tags, TagMatch::Any).await?,
            _ => self.store.get_all_memories(None, None).await?,
        };
        if let Some(memory_type) = &req.memory_type {
            memories.retain(|m| m.memory_type.as_deref() == Some(memory_type.as_str()));
        }
        memories.sort_by(|a, b| b.updated_at.partial_cmp(&a.updated_at).unwrap_or(std::cmp::Ordering::Equal));
        Ok(memories.into_iter().skip(offset).take(page_size).collect())
    }

    /// Delete by exact hash, or by filter set (spec §4.3's `delete_by_filters`).
    pub async fn memory_delete(
        &self,
        content_hash: Option<String>,
        tags: Option<Vec<String>>,
        tag_match: TagMatch,
        after: Option<f64>,
        before: Option<f64>,
        dry_run: bool,
    ) -> Result<DeleteOutcome> {
        if let Some(hash) = content_hash {
            let count = if dry_run { 0 } else { self.store.delete(&hash).await? };
            return Ok(DeleteOutcome {
                count,
                previewed_hashes: dry_run.then(|| vec![hash]),
            });
        }
        self.store
            .delete_by_filters(DeleteFilters { tags, tag_match, after, before, dry_run })
            .await
    }

    /// Mutate metadata only — identity fields (`content`, `tags`,
    /// `content_hash`) are immutable by design (changing them would change
    /// what the memory *is*), so only `metadata` is accepted here.
    pub async fn memory_update(&self, hash: &str, metadata: HashMap<String, Value>) -> Result<()> {
        self.store.update_metadata(hash, metadata).await
    }

    /// Liveness: is the store ready, which backend is active, how many
    /// memories does it hold.
    pub async fn memory_health(&self) -> Result<HealthStatus> {
        self.store.initialize().await?;
        let stats = self.store.get_stats().await?;
        Ok(HealthStatus { backend: stats.backend_id, count: stats.count, ready: stats.ready })
    }

    /// Full aggregate statistics, including sync status when a remote is
    /// configured.
    pub async fn memory_stats(&self) -> Result<StoreStats> {
        self.store.get_stats().await
    }

    /// Consolidation control surface: run/status/recommend/pause/resume.
    pub async fn memory_consolidate(
        &self,
        action: ConsolidateAction,
        horizon: Option<Horizon>,
        immediate: bool,
    ) -> Result<ConsolidateOutcome> {
        match action {
            ConsolidateAction::Run => {
                let horizon = horizon.ok_or_else(|| {
                    EngineError::InvalidArgument("time_horizon is required for action=run".to_string())
                })?;
                let report = self.scheduler.trigger(horizon, immediate).await?;
                Ok(ConsolidateOutcome::Report(report))
            }
            ConsolidateAction::Status => Ok(ConsolidateOutcome::Status(self.scheduler.status().await)),
            ConsolidateAction::Recommend => Ok(ConsolidateOutcome::Recommendation(self.recommend_horizon().await)),
            ConsolidateAction::Pause => {
                self.scheduler.pause(horizon).await;
                Ok(ConsolidateOutcome::Ack)
            }
            ConsolidateAction::Resume => {
                self.scheduler.resume(horizon).await;
                Ok(ConsolidateOutcome::Ack)
            }
        }
    }

    /// Recommend the horizon whose scheduled fire is furthest in the past
    /// relative to now (i.e. the most overdue), as a cheap heuristic —
    /// callers wanting a precise answer should inspect `memory_consolidate
    /// (action=status)` and the report history directly.
    async fn recommend_horizon(&self) -> Horizon {
        let statuses = self.scheduler.status().await;
        statuses
            .into_iter()
            .filter(|s| s.enabled && !s.paused)
            .min_by_key(|s| s.next_fire)
            .map(|s| s.horizon)
            .unwrap_or(Horizon::Daily)
    }

    /// Duplicate removal: memories whose *normalized content* collides
    /// (same text, different tag sets, hence different `content_hash`) are
    /// reduced to the single most-recently-updated copy.
    pub async fn memory_cleanup(&self) -> Result<u64> {
        let memories = self.store.get_all_memories(None, None).await?;
        let mut groups: HashMap<String, Vec<Memory>> = HashMap::new();
        for memory in memories {
            groups.entry(normalize_content(&memory.content)).or_default().push(memory);
        }

        let mut removed = 0u64;
        for mut group in groups.into_values() {
            if group.len() < 2 {
                continue;
            }
            group.sort_by(|a, b| b.updated_at.partial_cmp(&a.updated_at).unwrap_or(std::cmp::Ordering::Equal));
            for stale in &group[1..] {
                removed += self.store.delete(&stale.content_hash).await?;
            }
        }
        Ok(removed)
    }

    /// Bulk import of already-chunked `(content, tags)` pairs (spec §6:
    /// file/directory walking and chunking belong to the calling ingestion
    /// pipeline, not this crate).
    pub async fn memory_ingest(&self, chunks: Vec<IngestChunk>, memory_type: Option<String>) -> Result<IngestOutcome> {
        let mut stored = 0;
        let mut duplicates = 0;
        let mut content_hashes = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let outcome = self
                .memory_store(chunk.content, chunk.tags, memory_type.clone(), None)
                .await?;
            if outcome.created {
                stored += 1;
            } else {
                duplicates += 1;
            }
            content_hashes.push(outcome.content_hash);
        }
        Ok(IngestOutcome { stored, duplicates, content_hashes })
    }

    /// Quality interface: rate (manual `user_rating`), get (current
    /// derived fields), or analyze (aggregate over a quality-score range).
    pub async fn memory_quality(
        &self,
        action: QualityAction,
        hash: Option<String>,
        rating: Option<i64>,
        min_quality: Option<f64>,
        max_quality: Option<f64>,
    ) -> Result<QualityOutcome> {
        match action {
            QualityAction::Rate => {
                let hash = hash.ok_or_else(|| {
                    EngineError::InvalidArgument("hash is required for action=rate".to_string())
                })?;
                let rating = rating.ok_or_else(|| {
                    EngineError::InvalidArgument("rating is required for action=rate".to_string())
                })?;
                if !(-1..=1).contains(&rating) {
                    return Err(EngineError::InvalidArgument("rating must be -1, 0, or 1".to_string()));
                }
                let mut patch = HashMap::new();
                patch.insert(metadata_keys::USER_RATING.to_string(), Value::from(rating));
                self.store.update_metadata(&hash, patch).await?;
                Ok(QualityOutcome::Rated)
            }
            QualityAction::Get => {
                let hash = hash.ok_or_else(|| {
                    EngineError::InvalidArgument("hash is required for action=get".to_string())
                })?;
                let memory = self
                    .store
                    .get_by_hash(&hash)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(hash.clone()))?;
                let quality_provider = memory
                    .metadata
                    .get(metadata_keys::QUALITY_PROVIDER)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(QualityOutcome::Fields { quality_score: memory.quality_score(), quality_provider })
            }
            QualityAction::Analyze => {
                let lo = min_quality.unwrap_or(0.0);
                let hi = max_quality.unwrap_or(1.0);
                let memories = self.store.get_all_memories(None, None).await?;
                let matched: Vec<Memory> =
                    memories.into_iter().filter(|m| (lo..=hi).contains(&m.quality_score())).collect();
                let mean_quality = if matched.is_empty() {
                    0.0
                } else {
                    matched.iter().map(|m| m.quality_score()).sum::<f64>() / matched.len() as f64
                };
                let content_hashes = matched.iter().map(|m| m.content_hash.clone()).collect();
                Ok(QualityOutcome::Analysis(QualityAnalysis {
                    matched: content_hashes.len(),
                    mean_quality,
                    content_hashes,
                }))
            }
        }
    }

    /// Score `memory`'s implicit signal freshly (used by callers that want
    /// an on-demand score outside of a consolidation pass, e.g. right after
    /// ingest).
    pub async fn score_now(&self, memory: &Memory, query: Option<&str>) -> Result<f64> {
        let implicit = ImplicitSignal {
            access_count: memory.access_count(),
            seconds_since_last_access: memory
                .last_accessed_at()
                .map(|t| (chrono::Utc::now().timestamp() as f64 - t).max(0.0)),
            mean_normalized_rank: None,
        };
        Ok(self.quality.score(memory, query, implicit).await?.score)
    }

    /// Association-graph traversal: direct neighborhood, a path between
    /// two memories, or a bounded-radius subgraph.
    pub async fn memory_graph(
        &self,
        action: GraphAction,
        hash: Option<String>,
        hash1: Option<String>,
        hash2: Option<String>,
        max_hops: usize,
        max_depth: usize,
        radius: usize,
    ) -> Result<GraphOutcome> {
        match action {
            GraphAction::Connected => {
                let hash = hash.ok_or_else(|| {
                    EngineError::InvalidArgument("hash is required for action=connected".to_string())
                })?;
                Ok(GraphOutcome::Connected(self.store.list_associations(&hash, max_hops.max(1)).await?))
            }
            GraphAction::Path => {
                let (a, b) = match (hash1, hash2) {
                    (Some(a), Some(b)) => (a, b),
                    _ => {
                        return Err(EngineError::InvalidArgument(
                            "hash1 and hash2 are required for action=path".to_string(),
                        ))
                    }
                };
                Ok(GraphOutcome::Path(self.find_path(&a, &b, max_depth.max(1)).await?))
            }
            GraphAction::Subgraph => {
                let hash = hash.ok_or_else(|| {
                    EngineError::InvalidArgument("hash is required for action=subgraph".to_string())
                })?;
                let edges = self.store.list_associations(&hash, radius.max(1)).await?;
                let mut nodes: HashSet<String> = HashSet::new();
                nodes.insert(hash);
                for edge in &edges {
                    nodes.insert(edge.hash_a.clone());
                    nodes.insert(edge.hash_b.clone());
                }
                Ok(GraphOutcome::Subgraph { nodes: nodes.into_iter().collect(), edges })
            }
        }
    }

    /// Unweighted BFS over one-hop association fetches, bounded to
    /// `max_depth` hops. Returns the hash sequence from `start` to `goal`,
    /// inclusive, or `None` if unreachable within the bound.
    async fn find_path(&self, start: &str, goal: &str, max_depth: usize) -> Result<Option<Vec<String>>> {
        if start == goal {
            return Ok(Some(vec![start.to_string()]));
        }
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(start.to_string());
        let mut parent: HashMap<String, String> = HashMap::new();
        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        frontier.push_back((start.to_string(), 0));

        while let Some((current, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let edges = self.store.list_associations(&current, 1).await?;
            for edge in edges {
                let Some(next) = edge.other(&current) else { continue };
                if visited.contains(next) {
                    continue;
                }
                visited.insert(next.to_string());
                parent.insert(next.to_string(), current.clone());
                if next == goal {
                    let mut path = vec![goal.to_string()];
                    let mut cursor = current;
                    loop {
                        path.push(cursor.clone());
                        match parent.get(&cursor) {
                            Some(p) => cursor = p.clone(),
                            None => break,
                        }
                    }
                    path.reverse();
                    return Ok(Some(path));
                }
                frontier.push_back((next.to_string(), depth + 1));
            }
        }
        Ok(None)
    }

    /// Underlying store, for callers needing the raw `MemoryStore` surface.
    pub fn store(&self) -> &Arc<HybridStore> {
        &self.store
    }
}

fn build_embedder(config: &Config) -> Arc<dyn EmbeddingProvider> {
    #[cfg(feature = "embeddings")]
    if config.embedding_model != "hash" {
        return Arc::new(crate::embeddings::LocalEmbeddingProvider::new(config.embedding_dim));
    }
    Arc::new(HashEmbeddingProvider::new(config.embedding_dim))
}
