//! Crate-wide error taxonomy.
//!
//! One `thiserror`-derived enum at the root, mirroring the teacher's
//! per-component `StorageError`/`EmbeddingError`/`VectorSearchError` pattern
//! but unified here because every component in this engine sits behind the
//! same `MemoryStore` capability and is expected to report through one
//! taxonomy (see spec §7).

use crate::embeddings::EmbeddingError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Unified error taxonomy for the memory engine.
///
/// `#[non_exhaustive]` so new variants don't break downstream `match`es.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad input: empty query in semantic/exact mode, unknown search mode,
    /// malformed time expression, conflicting ingest arguments, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Hash unknown. Non-fatal; callers typically treat as `None`/empty.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate `content_hash` on store. Note: per spec this is normally
    /// surfaced as `(false, "duplicate")`, not this error; reserved for
    /// contexts that can't return a tuple (e.g. `upsert_association`).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Embedding width disagrees with the store's stamped dimension. Fatal
    /// at initialization; the engine never silently rebuilds.
    #[error("dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension stamped in `config_meta` at first init.
        expected: usize,
        /// Dimension actually produced/supplied.
        actual: usize,
    },

    /// Local on-disk I/O failure. Writer should assume uncommitted.
    #[error("storage io: {0}")]
    StorageIo(String),

    /// Database open/connection failure.
    #[error("db open failed: {0}")]
    DbOpen(String),

    /// Schema migration failure.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Failure inside `rusqlite` not otherwise classified above.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Remote network/rate/availability failure. Logged and retried by the
    /// sync engine; never surfaces as a caller-facing failure from a hybrid
    /// write (the local commit already succeeded).
    #[error("transient remote error: {0}")]
    Transient(String),

    /// Remote rejection (bad payload, auth, conflict). Logged and dropped
    /// by the sync engine after one attempt.
    #[error("permanent remote error: {0}")]
    Permanent(String),

    /// Deadline exceeded on an async operation.
    #[error("operation timed out")]
    Timeout,

    /// A quality-evaluator tier could not run (model missing, remote
    /// unreachable, etc). Triggers fallback to the next tier; never
    /// surfaces to the caller as an error.
    #[error("evaluator unavailable: {0}")]
    EvaluatorUnavailable(String),

    /// Scheduler rejected a duplicate trigger for an in-progress horizon.
    #[error("consolidation already running for this horizon")]
    AlreadyRunning,

    /// Embedding generation failed (wraps C1's own error type).
    #[error("embedding error: {0}")]
    Embed(#[from] EmbeddingError),

    /// A natural-language time expression could not be parsed.
    #[error("invalid time expression: {0}")]
    InvalidTimeExpr(String),
}

impl EngineError {
    /// Classify a remote-facing error as transient (worth retrying) or
    /// permanent (drop after one attempt). Used by the sync engine (C6) to
    /// decide retry vs. drop without re-deriving the rule at each call site.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    /// True for errors the sync engine should drop after a single attempt.
    pub fn is_permanent(&self) -> bool {
        matches!(self, EngineError::Permanent(_) | EngineError::InvalidArgument(_))
    }
}
