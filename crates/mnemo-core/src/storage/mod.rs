//! Storage abstraction (spec §4.3–§4.5, §9 "Runtime-duck-typed storage
//! backends").
//!
//! `MemoryStore` is the fixed capability interface every backend implements:
//! `LocalStore` (C3, authoritative on-disk), `RemoteStore` (C4, network
//! mirror), and `HybridStore` (C5, composes the two). Polymorphism is over
//! this fixed set — no runtime duck-typing, no trait objects required since
//! callers hold a concrete backend type chosen at construction time from
//! `Config::storage_backend`.

mod hybrid;
mod local;
pub mod migrations;
mod remote;
pub mod time_expr;

pub use hybrid::HybridStore;
pub use local::LocalStore;
pub use remote::RemoteStore;

use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;
use crate::memory::{Association, AssociationReason, Memory, SearchResult, StoreStats, TagMatch};

/// Filter predicate shared by `delete_by_filters` and (read-only) browsing.
#[derive(Debug, Clone, Default)]
pub struct DeleteFilters {
    /// Tags to match against, if any.
    pub tags: Option<Vec<String>>,
    /// How `tags` should be matched.
    pub tag_match: TagMatch,
    /// Inclusive lower time bound (epoch seconds).
    pub after: Option<f64>,
    /// Exclusive upper time bound (epoch seconds).
    pub before: Option<f64>,
    /// When true, compute the matching set without mutating the store.
    pub dry_run: bool,
}

/// Result of `delete_by_filters`.
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    /// Number of memories deleted (or that *would* be deleted, for a
    /// `dry_run`).
    pub count: u64,
    /// The hashes that matched the filters: previewed (not deleted) for a
    /// `dry_run`, actually deleted otherwise. Hybrid stores use this set to
    /// mirror the deletion to the remote backend.
    pub previewed_hashes: Option<Vec<String>>,
}

/// The fixed capability interface implemented by every storage backend
/// (spec §4.3's operation table, generalized across C3/C4/C5).
///
/// Every operation here is async: local implementations hop to a blocking
/// thread pool for the actual I/O (rusqlite is synchronous), and remote
/// implementations await a network round-trip. No caller ever blocks the
/// executor thread on storage I/O.
pub trait MemoryStore: Send + Sync {
    /// Prepare the store for use: open/validate the database (or remote
    /// connection), apply migrations, and fail fast on a stamped-dimension
    /// mismatch.
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send;

    /// Insert `memory`. Returns `(true, "stored")` on insert or
    /// `(false, "duplicate")` if `content_hash` already exists — a
    /// duplicate is success, not an error (spec §7, `Conflict`).
    fn store(&self, memory: Memory) -> impl Future<Output = Result<(bool, String)>> + Send;

    /// Look up by full hash or an 8+ char hex prefix.
    fn get_by_hash(&self, hash: &str) -> impl Future<Output = Result<Option<Memory>>> + Send;

    /// Semantic retrieval: embed `query`, rank by cosine similarity,
    /// descending, ties broken by more recent `updated_at`. `min_score` is
    /// applied before truncation to `n`.
    fn retrieve(
        &self,
        query: &str,
        n: usize,
        min_score: Option<f32>,
    ) -> impl Future<Output = Result<Vec<SearchResult>>> + Send;

    /// Tag-filtered browse, `any`/`all` semantics per `tag_match`.
    fn search_by_tag(
        &self,
        tags: &[String],
        tag_match: TagMatch,
    ) -> impl Future<Output = Result<Vec<Memory>>> + Send;

    /// Time-windowed browse, newest first.
    fn recall(
        &self,
        after: Option<f64>,
        before: Option<f64>,
        n: usize,
    ) -> impl Future<Output = Result<Vec<Memory>>> + Send;

    /// Substring search against `content`.
    fn exact_match_search(
        &self,
        needle: &str,
        n: usize,
    ) -> impl Future<Output = Result<Vec<Memory>>> + Send;

    /// Delete by exact (full) hash. Returns the number deleted (`0` or `1`).
    fn delete(&self, hash: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Delete (or, for a dry run, preview) every memory matching `filters`.
    fn delete_by_filters(
        &self,
        filters: DeleteFilters,
    ) -> impl Future<Output = Result<DeleteOutcome>> + Send;

    /// Merge `patch` into a memory's metadata. Never touches
    /// `content`/`tags`/`content_hash` — that would change identity.
    fn update_metadata(
        &self,
        hash: &str,
        patch: HashMap<String, Value>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Aggregate statistics.
    fn get_stats(&self) -> impl Future<Output = Result<StoreStats>> + Send;

    /// Paginated browse of all non-archived memories, newest-updated first.
    fn get_all_memories(
        &self,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> impl Future<Output = Result<Vec<Memory>>> + Send;

    /// Create or reinforce an association. Rejects self-associations.
    fn upsert_association(
        &self,
        a: &str,
        b: &str,
        strength: f32,
        reason: AssociationReason,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Bounded breadth-first traversal of the association graph starting
    /// from `hash`, up to `max_hops` away.
    fn list_associations(
        &self,
        hash: &str,
        max_hops: usize,
    ) -> impl Future<Output = Result<Vec<Association>>> + Send;
}
