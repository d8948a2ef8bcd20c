//! Local vector store (C3): the authoritative, on-disk backend.
//!
//! SQLite (via `rusqlite`) holds `memories`, `associations`, and `archive`;
//! a USearch HNSW index (`crate::search::VectorIndex`) holds the embedding
//! vectors keyed by `content_hash`. The two are kept in lock-step inside
//! each mutating method. Every public method is `async` but hops to
//! `spawn_blocking` for the actual rusqlite call — `rusqlite::Connection`
//! is synchronous, and the engine's non-negotiable property (§5/§9) is that
//! no caller-visible await blocks on I/O directly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::embeddings::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::hash::{is_hash_like, HASH_LEN};
use crate::memory::{
    Association, AssociationReason, Memory, SearchDebug, SearchResult, StoreStats, TagMatch,
};
use crate::search::VectorIndex;
use crate::storage::{migrations, DeleteFilters, DeleteOutcome, MemoryStore};

/// The local, on-disk backend (C3).
pub struct LocalStore {
    conn: Arc<StdMutex<Connection>>,
    vector_index: Arc<StdMutex<VectorIndex>>,
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    data_dir: PathBuf,
    /// Held for the lifetime of this value; its `Drop` releases the OS file
    /// lock. Never read after construction, hence the leading underscore.
    _lock: fd_lock::RwLock<std::fs::File>,
}

impl LocalStore {
    /// Open (creating if absent) the store at `data_dir`, acquiring the
    /// exclusive single-writer file lock, applying migrations, and
    /// rebuilding the in-memory vector index from persisted embeddings.
    ///
    /// Synchronous by necessity — directory/file setup and the initial
    /// index rebuild are one-time construction work, not a request-path
    /// operation, so there's no suspension-point contract to honor here.
    /// `MemoryStore::initialize` on the constructed value is a cheap
    /// readiness check, not a second round of setup.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| EngineError::StorageIo(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&data_dir, std::fs::Permissions::from_mode(0o700));
        }

        let lock_path = data_dir.join(".mnemo.lock");
        let lock_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| EngineError::StorageIo(format!("lock file: {e}")))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        match lock.try_write() {
            Ok(guard) => std::mem::forget(guard),
            Err(e) => {
                return Err(EngineError::DbOpen(format!(
                    "data directory {} is already locked by another engine instance: {e}",
                    data_dir.display()
                )))
            }
        }

        let db_path = data_dir.join("mnemo.db");
        let conn = Connection::open(&db_path).map_err(|e| EngineError::DbOpen(e.to_string()))?;
        configure_connection(&conn)?;
        migrations::apply_migrations(&conn).map_err(|e| EngineError::Migration(e.to_string()))?;

        let dimension = embedder.dimensions();
        stamp_or_verify_dimension(&conn, dimension)?;

        let mut vector_index = VectorIndex::with_config(crate::search::VectorIndexConfig {
            dimensions: dimension,
            ..Default::default()
        })
        .map_err(|e| EngineError::StorageIo(format!("vector index init: {e}")))?;
        load_embeddings_into_index(&conn, &mut vector_index)?;

        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
            vector_index: Arc::new(StdMutex::new(vector_index)),
            embedder,
            dimension,
            data_dir,
            _lock: lock,
        })
    }

    /// Directory this store was opened against.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Store-wide embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("mnemo-core: local store connection lock poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| EngineError::StorageIo(format!("blocking task join: {e}")))?
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embedder.embed(text)?)
    }

    /// Raw stored embedding for `hash`, if any. Used by the consolidator's
    /// association-discovery phase, which needs the vector itself (not a
    /// text-query embedding) to find each candidate's nearest neighbors.
    pub async fn get_embedding(&self, hash: &str) -> Result<Option<Vec<f32>>> {
        let hash = hash.to_string();
        self.with_conn(move |conn| {
            let blob: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT embedding FROM memory_embeddings WHERE content_hash = ?1",
                    params![hash],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(blob.map(|b| bytes_to_vector(&b)))
        })
        .await
    }

    /// Nearest neighbors of `embedding` by cosine similarity, excluding
    /// `exclude_hash` (a candidate is never its own neighbor).
    pub fn nearest_by_vector(&self, embedding: &[f32], k: usize, exclude_hash: &str) -> Result<Vec<(String, f32)>> {
        let index = self
            .vector_index
            .lock()
            .expect("mnemo-core: vector index lock poisoned");
        let hits = index
            .search(embedding, k + 1)
            .map_err(|e| EngineError::StorageIo(format!("vector search: {e}")))?;
        Ok(hits.into_iter().filter(|(h, _)| h != exclude_hash).take(k).collect())
    }

    /// Candidate set for a consolidation pass over `[window_start, window_end)`
    /// (spec §4.8 phase 1): every memory whose `updated_at` falls in the
    /// window, plus a bounded tail of the remaining memories sorted by
    /// lowest `last_accessed_at` (falling back to `updated_at` when a memory
    /// has never been retrieved).
    pub async fn consolidation_candidates(
        &self,
        window_start: f64,
        window_end: f64,
        stale_tail_size: usize,
    ) -> Result<Vec<Memory>> {
        let (windowed, rest) = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                     FROM memories WHERE updated_at >= ?1 AND updated_at < ?2",
                )?;
                let windowed: Vec<Memory> = stmt
                    .query_map(params![window_start, window_end], row_to_memory)?
                    .filter_map(|r| r.ok())
                    .collect();

                let mut stmt = conn.prepare(
                    "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                     FROM memories WHERE updated_at < ?1 OR updated_at >= ?2",
                )?;
                let rest: Vec<Memory> = stmt
                    .query_map(params![window_start, window_end], row_to_memory)?
                    .filter_map(|r| r.ok())
                    .collect();
                Ok((windowed, rest))
            })
            .await?;

        let mut tail = rest;
        tail.sort_by(|a, b| {
            let la = a.last_accessed_at().unwrap_or(a.updated_at);
            let lb = b.last_accessed_at().unwrap_or(b.updated_at);
            la.partial_cmp(&lb).unwrap_or(std::cmp::Ordering::Equal)
        });
        tail.truncate(stale_tail_size);

        let mut candidates = windowed;
        candidates.extend(tail);
        Ok(candidates)
    }

    /// Move `hash` out of `memories` into `archive` (spec §4.8 phase 4),
    /// removing it from retrieval and from the vector index. Returns
    /// `false` if `hash` wasn't present (already archived or deleted).
    pub async fn archive_memory(&self, hash: &str, reason: &str) -> Result<bool> {
        let hash_owned = hash.to_string();
        let reason = reason.to_string();
        let now = Utc::now().timestamp() as f64;
        let archived = self
            .with_conn(move |conn| {
                let moved = conn.execute(
                    "INSERT OR REPLACE INTO archive
                        (content_hash, content, tags, memory_type, metadata, created_at, updated_at, archived_at, archive_reason)
                     SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at, ?2, ?3
                     FROM memories WHERE content_hash = ?1",
                    params![hash_owned, now, reason],
                )?;
                if moved == 0 {
                    return Ok(false);
                }
                conn.execute(
                    "DELETE FROM associations WHERE hash_a = ?1 OR hash_b = ?1",
                    params![hash_owned],
                )?;
                conn.execute("DELETE FROM memories WHERE content_hash = ?1", params![hash_owned])?;
                Ok(true)
            })
            .await?;

        if archived {
            let mut index = self
                .vector_index
                .lock()
                .expect("mnemo-core: vector index lock poisoned");
            let _ = index.remove(hash);
        }
        Ok(archived)
    }
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
    .map_err(|e| EngineError::DbOpen(e.to_string()))
}

fn stamp_or_verify_dimension(conn: &Connection, dimension: usize) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM config_meta WHERE key = 'embedding_dim'",
            [],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| EngineError::DbOpen(e.to_string()))?;

    match existing {
        Some(stored) => {
            let stored: usize = stored
                .parse()
                .map_err(|_| EngineError::DbOpen("corrupt config_meta.embedding_dim".into()))?;
            if stored != dimension {
                return Err(EngineError::DimensionMismatch {
                    expected: stored,
                    actual: dimension,
                });
            }
        }
        None => {
            conn.execute(
                "INSERT INTO config_meta (key, value) VALUES ('embedding_dim', ?1)",
                params![dimension.to_string()],
            )
            .map_err(|e| EngineError::DbOpen(e.to_string()))?;
        }
    }
    Ok(())
}

fn load_embeddings_into_index(conn: &Connection, index: &mut VectorIndex) -> Result<()> {
    let mut stmt = conn
        .prepare("SELECT content_hash, embedding FROM memory_embeddings")
        .map_err(|e| EngineError::DbOpen(e.to_string()))?;
    let rows: Vec<(String, Vec<u8>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| EngineError::DbOpen(e.to_string()))?
        .filter_map(|r| r.ok())
        .collect();

    for (hash, blob) in rows {
        let vector = bytes_to_vector(&blob);
        if let Err(e) = index.add(&hash, &vector) {
            tracing::warn!(hash = %hash, error = %e, "failed to rebuild vector index entry");
        }
    }
    Ok(())
}

fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get("tags")?;
    let metadata_json: String = row.get("metadata")?;
    Ok(Memory {
        content_hash: row.get("content_hash")?,
        content: row.get("content")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        memory_type: row.get("memory_type")?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        embedding: None,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

impl MemoryStore for LocalStore {
    async fn initialize(&self) -> Result<()> {
        // Construction already performed every fallible step; this is a
        // liveness check matching the trait's contract for callers that
        // re-confirm readiness after obtaining a handle.
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(())).map_err(EngineError::Database)
        })
        .await
    }

    async fn store(&self, mut memory: Memory) -> Result<(bool, String)> {
        if memory.content.trim().is_empty() {
            return Err(EngineError::InvalidArgument("content cannot be empty".into()));
        }

        let embedding = match memory.embedding.take() {
            Some(e) => e,
            None => self.embed(&memory.content)?,
        };
        if embedding.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        let hash = memory.content_hash.clone();
        let tags_json = serde_json::to_string(&memory.tags).unwrap_or_else(|_| "[]".to_string());
        let metadata_json =
            serde_json::to_string(&memory.metadata).unwrap_or_else(|_| "{}".to_string());
        let embedding_bytes = vector_to_bytes(&embedding);
        let dim = self.dimension;

        let inserted = self
            .with_conn(move |conn| {
                let exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM memories WHERE content_hash = ?1",
                        params![hash],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if exists {
                    return Ok(false);
                }

                conn.execute(
                    "INSERT INTO memories
                        (content_hash, content, tags, memory_type, metadata, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        hash,
                        memory.content,
                        tags_json,
                        memory.memory_type,
                        metadata_json,
                        memory.created_at,
                        memory.updated_at,
                    ],
                )?;
                conn.execute(
                    "INSERT INTO memory_embeddings (content_hash, embedding, dimensions)
                     VALUES (?1, ?2, ?3)",
                    params![hash, embedding_bytes, dim as i64],
                )?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Ok((false, "duplicate".to_string()));
        }

        let mut index = self
            .vector_index
            .lock()
            .expect("mnemo-core: vector index lock poisoned");
        if let Err(e) = index.add(&memory.content_hash, &embedding) {
            tracing::warn!(hash = %memory.content_hash, error = %e, "failed to index embedding");
        }

        Ok((true, "stored".to_string()))
    }

    async fn get_by_hash(&self, hash: &str) -> Result<Option<Memory>> {
        if !is_hash_like(hash) {
            return Err(EngineError::InvalidArgument(format!("not a valid hash/prefix: {hash}")));
        }
        let hash = hash.to_string();
        self.with_conn(move |conn| {
            let pattern = if hash.len() == HASH_LEN {
                hash.clone()
            } else {
                format!("{hash}%")
            };
            let op = if hash.len() == HASH_LEN { "=" } else { "LIKE" };
            let sql = format!(
                "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                 FROM memories WHERE content_hash {op} ?1 ORDER BY content_hash LIMIT 1"
            );
            conn.query_row(&sql, params![pattern], row_to_memory)
                .optional()
                .map_err(EngineError::Database)
        })
        .await
    }

    async fn retrieve(
        &self,
        query: &str,
        n: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(EngineError::InvalidArgument("query cannot be empty".into()));
        }
        let query_vec = self.embed(query)?;

        let hits = {
            let index = self
                .vector_index
                .lock()
                .expect("mnemo-core: vector index lock poisoned");
            index
                .search(&query_vec, n.max(1) * 2)
                .map_err(|e| EngineError::StorageIo(format!("vector search: {e}")))?
        };

        let hashes: Vec<String> = hits.iter().map(|(h, _)| h.clone()).collect();
        let scores: HashMap<String, f32> = hits.into_iter().collect();

        let memories = self.fetch_by_hashes(&hashes).await?;
        let mut results: Vec<SearchResult> = memories
            .into_iter()
            .filter_map(|m| {
                let score = *scores.get(&m.content_hash)?;
                if let Some(min) = min_score {
                    if score < min {
                        return None;
                    }
                }
                Some(SearchResult {
                    memory: m,
                    relevance: score,
                    debug: None,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.memory
                        .updated_at
                        .partial_cmp(&a.memory.updated_at)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        results.truncate(n);
        Ok(results)
    }

    async fn search_by_tag(&self, tags: &[String], tag_match: TagMatch) -> Result<Vec<Memory>> {
        if tags.is_empty() {
            return Ok(vec![]);
        }
        let tags = tags.to_vec();
        self.with_conn(move |conn| {
            let placeholders = tags.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = match tag_match {
                TagMatch::Any => format!(
                    "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                     FROM memories m WHERE EXISTS (
                        SELECT 1 FROM json_each(m.tags) WHERE value IN ({placeholders})
                     ) ORDER BY updated_at DESC"
                ),
                TagMatch::All => format!(
                    "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                     FROM memories m WHERE (
                        SELECT COUNT(DISTINCT value) FROM json_each(m.tags) WHERE value IN ({placeholders})
                     ) = {}
                     ORDER BY updated_at DESC",
                    tags.len()
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(tags.iter()), row_to_memory)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
        .await
    }

    async fn recall(&self, after: Option<f64>, before: Option<f64>, n: usize) -> Result<Vec<Memory>> {
        if let (Some(a), Some(b)) = (after, before) {
            if a > b {
                return Ok(vec![]);
            }
        }
        self.with_conn(move |conn| {
            let mut sql = "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                            FROM memories WHERE 1 = 1"
                .to_string();
            let mut bound: Vec<f64> = Vec::new();
            if let Some(a) = after {
                sql.push_str(" AND created_at >= ?");
                bound.push(a);
            }
            if let Some(b) = before {
                sql.push_str(" AND created_at < ?");
                bound.push(b);
            }
            sql.push_str(&format!(" ORDER BY created_at DESC LIMIT {}", n));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(bound.iter()), row_to_memory)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
        .await
    }

    async fn exact_match_search(&self, needle: &str, n: usize) -> Result<Vec<Memory>> {
        if needle.is_empty() {
            return Err(EngineError::InvalidArgument("needle cannot be empty".into()));
        }
        let pattern = format!("%{}%", escape_like(needle));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                 FROM memories WHERE content LIKE ?1 ESCAPE '\\' ORDER BY updated_at DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![pattern, n as i64], row_to_memory)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
        .await
    }

    async fn delete(&self, hash: &str) -> Result<u64> {
        if hash.len() != HASH_LEN {
            return Err(EngineError::InvalidArgument("delete requires a full hash".into()));
        }
        let hash_owned = hash.to_string();
        let deleted = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM associations WHERE hash_a = ?1 OR hash_b = ?1",
                    params![hash_owned],
                )?;
                let n = conn.execute("DELETE FROM memories WHERE content_hash = ?1", params![hash_owned])?;
                Ok(n as u64)
            })
            .await?;

        if deleted > 0 {
            let mut index = self
                .vector_index
                .lock()
                .expect("mnemo-core: vector index lock poisoned");
            let _ = index.remove(hash);
        }
        Ok(deleted)
    }

    async fn delete_by_filters(&self, filters: DeleteFilters) -> Result<DeleteOutcome> {
        let candidates = self.matching_hashes(&filters).await?;

        if filters.dry_run {
            return Ok(DeleteOutcome {
                count: candidates.len() as u64,
                previewed_hashes: Some(candidates),
            });
        }

        for hash in &candidates {
            self.delete(hash).await?;
        }
        Ok(DeleteOutcome {
            count: candidates.len() as u64,
            previewed_hashes: Some(candidates),
        })
    }

    async fn update_metadata(&self, hash: &str, patch: HashMap<String, Value>) -> Result<()> {
        let hash = hash.to_string();
        let now = Utc::now().timestamp() as f64;
        self.with_conn(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT metadata FROM memories WHERE content_hash = ?1",
                    params![hash],
                    |r| r.get(0),
                )
                .optional()?;
            let existing = existing.ok_or_else(|| EngineError::NotFound(hash.clone()))?;
            let mut metadata: HashMap<String, Value> =
                serde_json::from_str(&existing).unwrap_or_default();
            metadata.extend(patch);
            let metadata_json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());

            conn.execute(
                "UPDATE memories SET metadata = ?1, updated_at = ?2 WHERE content_hash = ?3",
                params![metadata_json, now, hash],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_stats(&self) -> Result<StoreStats> {
        let dimension = self.dimension;
        let count = self
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))
                    .map_err(EngineError::Database)
            })
            .await?;
        Ok(StoreStats {
            count,
            dimension,
            backend_id: "local".to_string(),
            ready: true,
        })
    }

    async fn get_all_memories(&self, limit: Option<usize>, offset: Option<usize>) -> Result<Vec<Memory>> {
        let limit = limit.unwrap_or(100) as i64;
        let offset = offset.unwrap_or(0) as i64;
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                 FROM memories ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt
                .query_map(params![limit, offset], row_to_memory)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
        .await
    }

    async fn upsert_association(
        &self,
        a: &str,
        b: &str,
        strength: f32,
        reason: AssociationReason,
    ) -> Result<()> {
        if a == b {
            return Err(EngineError::InvalidArgument("cannot associate a memory with itself".into()));
        }
        let assoc = Association::new(a, b, strength.clamp(f32::EPSILON, 1.0), reason);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO associations (hash_a, hash_b, strength, reason, created_at, last_reinforced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(hash_a, hash_b) DO UPDATE SET
                    strength = excluded.strength,
                    reason = excluded.reason,
                    last_reinforced_at = excluded.last_reinforced_at",
                params![
                    assoc.hash_a,
                    assoc.hash_b,
                    assoc.strength,
                    assoc.reason.to_string(),
                    assoc.created_at,
                    assoc.last_reinforced_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_associations(&self, hash: &str, max_hops: usize) -> Result<Vec<Association>> {
        let start = hash.to_string();
        self.with_conn(move |conn| {
            let mut visited: HashSet<String> = HashSet::new();
            visited.insert(start.clone());
            let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
            frontier.push_back((start, 0));
            let mut found: Vec<Association> = Vec::new();
            let mut seen_pairs: HashSet<(String, String)> = HashSet::new();

            let mut stmt = conn.prepare(
                "SELECT hash_a, hash_b, strength, reason, created_at, last_reinforced_at
                 FROM associations WHERE hash_a = ?1 OR hash_b = ?1",
            )?;

            while let Some((current, depth)) = frontier.pop_front() {
                if depth >= max_hops {
                    continue;
                }
                let rows: Vec<Association> = stmt
                    .query_map(params![current], |row| {
                        let reason_str: String = row.get(3)?;
                        Ok(Association {
                            hash_a: row.get(0)?,
                            hash_b: row.get(1)?,
                            strength: row.get(2)?,
                            reason: reason_str.parse().unwrap_or(AssociationReason::Manual),
                            created_at: row.get(4)?,
                            last_reinforced_at: row.get(5)?,
                        })
                    })?
                    .filter_map(|r| r.ok())
                    .collect();

                for assoc in rows {
                    let pair = (assoc.hash_a.clone(), assoc.hash_b.clone());
                    if seen_pairs.insert(pair) {
                        if let Some(other) = assoc.other(&current) {
                            if visited.insert(other.to_string()) {
                                frontier.push_back((other.to_string(), depth + 1));
                            }
                        }
                        found.push(assoc);
                    }
                }
            }
            Ok(found)
        })
        .await
    }
}

impl LocalStore {
    async fn fetch_by_hashes(&self, hashes: &[String]) -> Result<Vec<Memory>> {
        if hashes.is_empty() {
            return Ok(vec![]);
        }
        let hashes = hashes.to_vec();
        self.with_conn(move |conn| {
            let placeholders = hashes.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!(
                "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                 FROM memories WHERE content_hash IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(hashes.iter()), row_to_memory)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
        .await
    }

    /// Shared predicate evaluation for `delete_by_filters` and any future
    /// dry-run preview surface: intersect the tag filter and time filter.
    async fn matching_hashes(&self, filters: &DeleteFilters) -> Result<Vec<String>> {
        let by_tag = match &filters.tags {
            Some(tags) if !tags.is_empty() => {
                Some(self.search_by_tag(tags, filters.tag_match).await?)
            }
            _ => None,
        };

        let by_time = if filters.after.is_some() || filters.before.is_some() {
            Some(self.recall(filters.after, filters.before, usize::MAX).await?)
        } else {
            None
        };

        let hashes: HashSet<String> = match (by_tag, by_time) {
            (Some(tag_set), Some(time_set)) => {
                let time_hashes: HashSet<String> =
                    time_set.into_iter().map(|m| m.content_hash).collect();
                tag_set
                    .into_iter()
                    .map(|m| m.content_hash)
                    .filter(|h| time_hashes.contains(h))
                    .collect()
            }
            (Some(tag_set), None) => tag_set.into_iter().map(|m| m.content_hash).collect(),
            (None, Some(time_set)) => time_set.into_iter().map(|m| m.content_hash).collect(),
            (None, None) => {
                self.get_all_memories(None, None)
                    .await?
                    .into_iter()
                    .map(|m| m.content_hash)
                    .collect()
            }
        };

        Ok(hashes.into_iter().collect())
    }

    /// Read the sync engine's persisted reconciliation watermark
    /// (`sync_cursor`, a single row keyed by `id = 0`).
    pub async fn sync_cursor(&self) -> Result<(f64, i64)> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT epoch, seq FROM sync_cursor WHERE id = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(EngineError::Database)
        })
        .await
    }

    /// Persist the sync engine's reconciliation watermark.
    pub async fn set_sync_cursor(&self, epoch: f64, seq: i64) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE sync_cursor SET epoch = ?1, seq = ?2 WHERE id = 0",
                params![epoch, seq],
            )?;
            Ok(())
        })
        .await
    }

    /// Local memories whose `updated_at` is strictly after `after`, used by
    /// the sync engine's initial reconciliation pass to find writes the
    /// remote hasn't seen yet.
    pub async fn memories_updated_since(&self, after: f64) -> Result<Vec<Memory>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT content_hash, content, tags, memory_type, metadata, created_at, updated_at
                 FROM memories WHERE updated_at > ?1 ORDER BY updated_at ASC",
            )?;
            let rows = stmt
                .query_map(params![after], row_to_memory)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbeddingProvider;

    fn test_store() -> (LocalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
        let store = LocalStore::open(dir.path(), embedder).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_then_get_by_hash_round_trips() {
        let (store, _dir) = test_store();
        let memory = Memory::new("hello world".to_string(), vec!["a".to_string()], None);
        let hash = memory.content_hash.clone();
        let (inserted, _) = store.store(memory).await.unwrap();
        assert!(inserted);

        let fetched = store.get_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(fetched.content, "hello world");
        assert_eq!(fetched.tags, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicate_store_returns_false_duplicate_with_same_hash() {
        let (store, _dir) = test_store();
        let m1 = Memory::new("hello".to_string(), vec!["a".to_string(), "b".to_string()], None);
        let m2 = Memory::new("hello".to_string(), vec!["b".to_string(), "a".to_string()], None);
        assert_eq!(m1.content_hash, m2.content_hash);

        let (first, _) = store.store(m1).await.unwrap();
        assert!(first);
        let (second, reason) = store.store(m2).await.unwrap();
        assert!(!second);
        assert_eq!(reason, "duplicate");
    }

    #[tokio::test]
    async fn test_get_by_hash_accepts_prefix() {
        let (store, _dir) = test_store();
        let memory = Memory::new("prefix lookup".to_string(), vec![], None);
        let hash = memory.content_hash.clone();
        store.store(memory).await.unwrap();

        let fetched = store.get_by_hash(&hash[..8]).await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn test_retrieve_rejects_empty_query() {
        let (store, _dir) = test_store();
        let result = store.retrieve("", 10, None).await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_retrieve_respects_min_score_and_limit() {
        let (store, _dir) = test_store();
        for text in ["alpha beta", "gamma delta", "epsilon zeta"] {
            store.store(Memory::new(text.to_string(), vec![], None)).await.unwrap();
        }
        let results = store.retrieve("alpha beta", 2, None).await.unwrap();
        assert!(results.len() <= 2);
        for w in results.windows(2) {
            assert!(w[0].relevance >= w[1].relevance);
        }
    }

    #[tokio::test]
    async fn test_search_by_tag_any_vs_all() {
        let (store, _dir) = test_store();
        store
            .store(Memory::new("a".to_string(), vec!["x".to_string()], None))
            .await
            .unwrap();
        store
            .store(Memory::new(
                "b".to_string(),
                vec!["x".to_string(), "y".to_string()],
                None,
            ))
            .await
            .unwrap();

        let any = store
            .search_by_tag(&["x".to_string(), "y".to_string()], TagMatch::Any)
            .await
            .unwrap();
        assert_eq!(any.len(), 2);

        let all = store
            .search_by_tag(&["x".to_string(), "y".to_string()], TagMatch::All)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_recall_with_after_greater_than_before_is_empty_not_error() {
        let (store, _dir) = test_store();
        store.store(Memory::new("a".to_string(), vec![], None)).await.unwrap();
        let result = store.recall(Some(1000.0), Some(0.0), 10).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_exact_match_search_is_substring_not_token() {
        let (store, _dir) = test_store();
        store
            .store(Memory::new("Implemented OAuth 2.1 with PKCE".to_string(), vec![], None))
            .await
            .unwrap();
        store
            .store(Memory::new("Added JWT validation middleware".to_string(), vec![], None))
            .await
            .unwrap();

        let results = store.exact_match_search("JWT validation", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("JWT"));
    }

    #[tokio::test]
    async fn test_delete_then_count_unchanged_law() {
        let (store, _dir) = test_store();
        let memory = Memory::new("ephemeral".to_string(), vec![], None);
        let hash = memory.content_hash.clone();
        store.store(memory).await.unwrap();
        let before = store.get_stats().await.unwrap().count;
        store.delete(&hash).await.unwrap();
        let after = store.get_stats().await.unwrap().count;
        assert_eq!(before - 1, after);
    }

    #[tokio::test]
    async fn test_update_metadata_merges_and_is_visible_immediately() {
        let (store, _dir) = test_store();
        let memory = Memory::new("has metadata".to_string(), vec![], None);
        let hash = memory.content_hash.clone();
        store.store(memory).await.unwrap();

        let mut patch = HashMap::new();
        patch.insert("quality_score".to_string(), Value::from(0.8));
        store.update_metadata(&hash, patch).await.unwrap();

        let fetched = store.get_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(fetched.metadata.get("quality_score").and_then(Value::as_f64), Some(0.8));
    }

    #[tokio::test]
    async fn test_upsert_association_rejects_self_association() {
        let (store, _dir) = test_store();
        let result = store
            .upsert_association("aaaa", "aaaa", 0.5, AssociationReason::Manual)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_upsert_association_then_list_associations_finds_it() {
        let (store, _dir) = test_store();
        let a = Memory::new("a".to_string(), vec![], None);
        let b = Memory::new("b".to_string(), vec![], None);
        let (ha, hb) = (a.content_hash.clone(), b.content_hash.clone());
        store.store(a).await.unwrap();
        store.store(b).await.unwrap();

        store
            .upsert_association(&ha, &hb, 0.9, AssociationReason::CoTag)
            .await
            .unwrap();

        let found = store.list_associations(&ha, 1).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].other(&ha), Some(hb.as_str()));
    }

    #[tokio::test]
    async fn test_delete_by_filters_dry_run_does_not_mutate() {
        let (store, _dir) = test_store();
        store
            .store(Memory::new("x".to_string(), vec!["drop-me".to_string()], None))
            .await
            .unwrap();

        let outcome = store
            .delete_by_filters(DeleteFilters {
                tags: Some(vec!["drop-me".to_string()]),
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(outcome.count, 1);
        assert!(outcome.previewed_hashes.is_some());

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.count, 1);
    }

    #[tokio::test]
    async fn test_archive_memory_removes_it_from_the_active_table() {
        let (store, _dir) = test_store();
        let memory = Memory::new("to be archived".to_string(), vec![], None);
        let hash = memory.content_hash.clone();
        store.store(memory).await.unwrap();

        let archived = store.archive_memory(&hash, "retention").await.unwrap();
        assert!(archived);
        assert!(store.get_by_hash(&hash).await.unwrap().is_none());

        let again = store.archive_memory(&hash, "retention").await.unwrap();
        assert!(!again);
    }

    #[tokio::test]
    async fn test_consolidation_candidates_includes_window_and_stale_tail() {
        let (store, _dir) = test_store();
        let in_window = Memory::new("in window".to_string(), vec![], None);
        let in_window_hash = in_window.content_hash.clone();
        store.store(in_window).await.unwrap();

        let outside = Memory::new("outside window".to_string(), vec![], None);
        let outside_hash = outside.content_hash.clone();
        store.store(outside).await.unwrap();

        let now = Utc::now().timestamp() as f64;
        let candidates = store.consolidation_candidates(now - 10.0, now + 10.0, 10).await.unwrap();
        let hashes: HashSet<String> = candidates.iter().map(|m| m.content_hash.clone()).collect();
        assert!(hashes.contains(&in_window_hash));
        assert!(hashes.contains(&outside_hash));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_on_reopen_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        {
            let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
            LocalStore::open(dir.path(), embedder).unwrap();
        }
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(64));
        let result = LocalStore::open(dir.path(), embedder);
        assert!(matches!(result, Err(EngineError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_sync_cursor_defaults_to_zero_and_round_trips() {
        let (store, _dir) = test_store();
        assert_eq!(store.sync_cursor().await.unwrap(), (0.0, 0));

        store.set_sync_cursor(1_700_000_000.0, 0).await.unwrap();
        assert_eq!(store.sync_cursor().await.unwrap(), (1_700_000_000.0, 0));
    }

    #[tokio::test]
    async fn test_memories_updated_since_excludes_older_rows() {
        let (store, _dir) = test_store();
        store.store(Memory::new("old".to_string(), vec![], None)).await.unwrap();
        let cutoff = Utc::now().timestamp() as f64 + 1.0;
        let fresh = Memory::new("fresh".to_string(), vec![], None);
        let fresh_hash = fresh.content_hash.clone();
        store.store(fresh).await.unwrap();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE memories SET updated_at = ?1 WHERE content_hash = ?2",
                    params![cutoff + 10.0, fresh_hash],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let updated = store.memories_updated_since(cutoff).await.unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].content, "fresh");
    }
}
