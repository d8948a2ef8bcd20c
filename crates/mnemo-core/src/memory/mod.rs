//! Core data model (spec §3): the content-addressed `Memory` entity and the
//! `Association` edges produced by consolidation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::content_hash;

/// Derived quality fields live inside `metadata` per spec §3, under these
/// well-known keys, rather than as separate `Memory` struct fields. Keeping
/// them in the open metadata map means a new derived signal doesn't require
/// a schema migration — just a new key.
pub mod metadata_keys {
    /// `f64` in `[0.0, 1.0]`.
    pub const QUALITY_SCORE: &str = "quality_score";
    /// Identifier of the scorer/tier that produced `quality_score`.
    pub const QUALITY_PROVIDER: &str = "quality_provider";
    /// `i64 >= 0`.
    pub const ACCESS_COUNT: &str = "access_count";
    /// Epoch seconds of the most recent retrieval hit.
    pub const LAST_ACCESSED_AT: &str = "last_accessed_at";
    /// Array of historical `{provider, score, at}` evaluations, append-only
    /// but capped (see `QualityConfig::ai_scores_history_cap`).
    pub const AI_SCORES: &str = "ai_scores";
    /// `-1 | 0 | 1`, absent when no manual rating has been given.
    pub const USER_RATING: &str = "user_rating";
    /// Optional diagnostic breakdown of how `quality_score` was derived.
    pub const QUALITY_COMPONENTS: &str = "quality_components";
    /// Cached `1 + 0.5 * quality_score`, refreshed by the consolidator's
    /// decay-weighting phase (§4.8 phase 5).
    pub const DECAY_MULTIPLIER: &str = "decay_multiplier";
}

/// A content-addressed, embedded, tagged textual record — the engine's
/// primary entity (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// 64-hex SHA-256 over canonicalized content + sorted tags. Primary key.
    pub content_hash: String,
    /// Non-empty unicode string.
    pub content: String,
    /// Tags, in caller-supplied display order (identity ignores order; see
    /// [`crate::hash::content_hash`]).
    pub tags: Vec<String>,
    /// Optional short string from a recommended-but-open taxonomy (e.g.
    /// `"note"`, `"decision"`, `"fact"`).
    pub memory_type: Option<String>,
    /// String-keyed map to primitive values (strings, numbers, booleans,
    /// small lists), including the derived quality fields in
    /// [`metadata_keys`].
    pub metadata: HashMap<String, Value>,
    /// Fixed-dimension float vector from the embedding provider (C1). May be
    /// absent for a memory accepted without an embedding (store still
    /// succeeds; semantic retrieval simply can't find it).
    pub embedding: Option<Vec<f32>>,
    /// Unix-epoch seconds the memory was created.
    pub created_at: f64,
    /// Unix-epoch seconds the memory was last updated (`>= created_at`).
    pub updated_at: f64,
}

impl Memory {
    /// Build a new memory from its identity-defining fields, computing its
    /// `content_hash` and stamping both timestamps to `now`.
    pub fn new(content: String, tags: Vec<String>, memory_type: Option<String>) -> Self {
        let hash = content_hash(&content, &tags);
        let now = Utc::now().timestamp() as f64;
        Self {
            content_hash: hash,
            content,
            tags,
            memory_type,
            metadata: HashMap::new(),
            embedding: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `created_at` rendered as RFC 3339 / ISO-8601. Derived view, not
    /// independent state — never stored separately from the epoch float.
    pub fn created_at_iso(&self) -> String {
        epoch_to_iso(self.created_at)
    }

    /// `updated_at` rendered as RFC 3339 / ISO-8601.
    pub fn updated_at_iso(&self) -> String {
        epoch_to_iso(self.updated_at)
    }

    /// Quality score from `metadata`, defaulting to `0.5` (the implicit
    /// fallback's neutral midpoint) when absent.
    pub fn quality_score(&self) -> f64 {
        self.metadata
            .get(metadata_keys::QUALITY_SCORE)
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
    }

    /// Access count from `metadata`, defaulting to `0`.
    pub fn access_count(&self) -> i64 {
        self.metadata
            .get(metadata_keys::ACCESS_COUNT)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Epoch seconds of last access, if ever accessed.
    pub fn last_accessed_at(&self) -> Option<f64> {
        self.metadata
            .get(metadata_keys::LAST_ACCESSED_AT)
            .and_then(Value::as_f64)
    }

    /// Cached decay multiplier (`1 + 0.5 * quality_score`), defaulting to
    /// `1.0` (neutral) until the consolidator first computes it.
    pub fn decay_multiplier(&self) -> f64 {
        self.metadata
            .get(metadata_keys::DECAY_MULTIPLIER)
            .and_then(Value::as_f64)
            .unwrap_or(1.0)
    }

    /// Merge `patch` into `metadata` (last-writer-wins per key), matching
    /// `update_metadata`'s contract.
    pub fn merge_metadata(&mut self, patch: HashMap<String, Value>) {
        self.metadata.extend(patch);
    }
}

fn epoch_to_iso(epoch_secs: f64) -> String {
    DateTime::<Utc>::from_timestamp(epoch_secs as i64, 0)
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

/// Why an unordered `hash_a — hash_b` association exists (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssociationReason {
    /// Tag-Jaccard similarity above threshold.
    CoTag,
    /// Embedding cosine similarity above threshold.
    EmbeddingProximity,
    /// Both memories fall in the same consolidation time window and were
    /// otherwise linked (reserved for future temporal-clustering passes).
    TemporalCluster,
    /// Manually asserted, e.g. via a future operator surface.
    Manual,
}

impl std::fmt::Display for AssociationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssociationReason::CoTag => "co_tag",
            AssociationReason::EmbeddingProximity => "embedding_proximity",
            AssociationReason::TemporalCluster => "temporal_cluster",
            AssociationReason::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AssociationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "co_tag" => Ok(AssociationReason::CoTag),
            "embedding_proximity" => Ok(AssociationReason::EmbeddingProximity),
            "temporal_cluster" => Ok(AssociationReason::TemporalCluster),
            "manual" => Ok(AssociationReason::Manual),
            other => Err(format!("unknown association reason: {other}")),
        }
    }
}

/// Secondary entity produced by consolidation: an unordered pair of
/// memories with a strength and reason (spec §3). `hash_a < hash_b` is an
/// invariant enforced by [`Association::new`], not by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    /// Lexicographically smaller of the two hashes.
    pub hash_a: String,
    /// Lexicographically larger of the two hashes.
    pub hash_b: String,
    /// `(0, 1]`.
    pub strength: f32,
    /// Why this association exists.
    pub reason: AssociationReason,
    /// When first created.
    pub created_at: f64,
    /// When last reinforced (re-run with the same or updated strength).
    pub last_reinforced_at: f64,
}

impl Association {
    /// Construct an association, normalizing `(a, b)` into
    /// `(hash_a, hash_b)` with `hash_a < hash_b`. Panics are avoided even
    /// for `a == b` by the caller-facing API rejecting self-associations
    /// before construction (see `MemoryStore::upsert_association`).
    pub fn new(a: &str, b: &str, strength: f32, reason: AssociationReason) -> Self {
        let (hash_a, hash_b) = if a < b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        let now = Utc::now().timestamp() as f64;
        Self {
            hash_a,
            hash_b,
            strength,
            reason,
            created_at: now,
            last_reinforced_at: now,
        }
    }

    /// Whether this association touches `hash`.
    pub fn involves(&self, hash: &str) -> bool {
        self.hash_a == hash || self.hash_b == hash
    }

    /// The other endpoint, given one side of the pair.
    pub fn other(&self, hash: &str) -> Option<&str> {
        if self.hash_a == hash {
            Some(&self.hash_b)
        } else if self.hash_b == hash {
            Some(&self.hash_a)
        } else {
            None
        }
    }
}

/// How tags should be matched against a memory's tag set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    /// At least one of the requested tags is present.
    #[default]
    Any,
    /// All requested tags are present.
    All,
}

/// Which retrieval algorithm `memory_search` should use (spec §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Embedding cosine similarity (spec §4.3).
    #[default]
    Semantic,
    /// Substring match against content (spec §4.3's `exact_match_search`).
    Exact,
    /// Reciprocal-rank fusion of semantic + exact/keyword results.
    Hybrid,
}

/// A scored retrieval result: the memory plus the score it was ranked by.
/// `relevance` is cosine similarity for `semantic`, a constant `1.0` for
/// `exact` (content either matches the needle or isn't returned), and the
/// RRF-fused score for `hybrid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// The matched memory.
    pub memory: Memory,
    /// Relevance score used to rank this result.
    pub relevance: f32,
    /// Populated when quality-boosted reranking was applied (spec §4.5).
    pub debug: Option<SearchDebug>,
}

/// Optional diagnostic block attached to quality-boosted search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDebug {
    /// Raw similarity/relevance before quality blending.
    pub base_relevance: f32,
    /// Quality score blended in.
    pub quality_score: f64,
    /// The `quality_boost` weight applied.
    pub quality_boost: f32,
    /// How many candidates were fetched before truncation to `limit`.
    pub candidates_considered: usize,
}

/// Aggregate store statistics (`get_stats` / `memory_health`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Total memory count (excludes archived).
    pub count: i64,
    /// Store-wide embedding dimension.
    pub dimension: usize,
    /// Identifier of the backend reporting these stats (`"local"`,
    /// `"remote"`, `"hybrid"`).
    pub backend_id: String,
    /// Whether the store has completed initialization and is serving reads.
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_memory_has_equal_created_and_updated_timestamps() {
        let m = Memory::new("hello".to_string(), vec![], None);
        assert_eq!(m.created_at, m.updated_at);
    }

    #[test]
    fn test_association_normalizes_hash_order() {
        let a1 = Association::new("bbb", "aaa", 0.5, AssociationReason::CoTag);
        let a2 = Association::new("aaa", "bbb", 0.5, AssociationReason::CoTag);
        assert_eq!(a1.hash_a, "aaa");
        assert_eq!(a1.hash_a, a2.hash_a);
        assert_eq!(a1.hash_b, a2.hash_b);
    }

    #[test]
    fn test_association_other_returns_opposite_endpoint() {
        let a = Association::new("aaa", "bbb", 0.5, AssociationReason::Manual);
        assert_eq!(a.other("aaa"), Some("bbb"));
        assert_eq!(a.other("bbb"), Some("aaa"));
        assert_eq!(a.other("ccc"), None);
    }

    #[test]
    fn test_merge_metadata_is_last_writer_wins_per_key() {
        let mut m = Memory::new("hello".to_string(), vec![], None);
        m.metadata.insert("a".to_string(), Value::from(1));
        let mut patch = HashMap::new();
        patch.insert("a".to_string(), Value::from(2));
        patch.insert("b".to_string(), Value::from(3));
        m.merge_metadata(patch);
        assert_eq!(m.metadata.get("a").and_then(Value::as_i64), Some(2));
        assert_eq!(m.metadata.get("b").and_then(Value::as_i64), Some(3));
    }

    #[test]
    fn test_quality_score_defaults_to_midpoint_when_unset() {
        let m = Memory::new("hello".to_string(), vec![], None);
        assert_eq!(m.quality_score(), 0.5);
    }
}
