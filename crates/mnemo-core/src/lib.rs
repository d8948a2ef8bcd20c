//! # Mnemo Core
//!
//! Content-addressed, vector-indexed long-term memory engine with hybrid
//! local/remote sync and quality-weighted consolidation.
//!
//! A memory is identified by a SHA-256 hash over its canonicalized content
//! and sorted tags ([`hash::content_hash`]) — storing the same content
//! twice is a no-op, not a duplicate row. Every memory carries an optional
//! embedding for semantic retrieval, an open `metadata` map (derived
//! quality fields live there, see [`memory::metadata_keys`]), and a
//! tag/time-addressable browse surface.
//!
//! ## Components
//!
//! - [`embeddings`] (C1) — text → fixed-dimension vector.
//! - [`hash`] (C2) — content addressing.
//! - [`storage::LocalStore`] (C3) — authoritative on-disk store: SQLite +
//!   FTS5 + an HNSW vector index.
//! - [`storage::RemoteStore`] (C4) — network mirror client.
//! - [`storage::HybridStore`] (C5) — local reads/writes, remote mirrored
//!   asynchronously through the sync engine.
//! - [`sync`] (C6) — bounded, coalescing, backoff-retrying outbound queue.
//! - [`quality`] (C7) — tiered quality scoring with an implicit-signal
//!   fallback.
//! - [`consolidation`] (C8) — periodic association discovery, quality
//!   refresh, retention, and decay weighting over a time horizon.
//! - [`scheduler`] (C9) — cron-like triggers invoking the consolidator.
//! - [`engine::Engine`] — the unified `memory_*` operation surface (spec
//!   §6) composing all of the above from one [`config::Config`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use mnemo_core::{Config, Engine};
//!
//! # async fn run() -> mnemo_core::Result<()> {
//! let engine = Engine::open(Config::default())?;
//! let stored = engine.memory_store(
//!     "Implemented OAuth 2.1 with PKCE".to_string(),
//!     vec!["auth".to_string()],
//!     Some("decision".to_string()),
//!     None,
//! ).await?;
//! println!("stored {}", stored.content_hash);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `embeddings` (default): local ONNX inference via `fastembed`.
//! - `vector-search` (default): HNSW vector index via `usearch`.
//! - `bundled-sqlite` (default): compile SQLite in rather than link system.
//! - `encryption`: SQLCipher-encrypted storage (mutually exclusive with
//!   `bundled-sqlite`; set `MNEMO_ENCRYPTION_KEY` to enable).

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod consolidation;
pub mod engine;
pub mod error;
pub mod hash;
pub mod legacy;
pub mod memory;
pub mod quality;
pub mod scheduler;
pub mod storage;
pub mod sync;

// `embeddings` always compiles: `HashEmbeddingProvider` needs no feature,
// and `LocalEmbeddingProvider` is internally gated on `embeddings` within
// the module.
pub mod embeddings;

#[cfg(feature = "vector-search")]
#[cfg_attr(docsrs, doc(cfg(feature = "vector-search")))]
pub mod search;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use error::{EngineError, Result};

pub use config::Config;

pub use engine::{
    ConsolidateAction, ConsolidateOutcome, Engine, GraphAction, GraphOutcome, HealthStatus,
    IngestChunk, IngestOutcome, ListRequest, QualityAction, QualityAnalysis,
    QualityOutcome as EngineQualityOutcome, SearchRequest, StoreOutcome,
};

pub use memory::{
    metadata_keys, Association, AssociationReason, Memory, SearchDebug, SearchMode, SearchResult,
    StoreStats, TagMatch,
};

pub use storage::{DeleteFilters, DeleteOutcome, HybridStore, LocalStore, MemoryStore, RemoteStore};

pub use sync::{SyncEngine, SyncOp, SyncState, SyncStatus};

pub use quality::{ImplicitSignal, QualityEvaluator, QualityOutcome};

pub use consolidation::{ConsolidationReport, Consolidator, Horizon};

pub use scheduler::{HorizonStatus, Scheduler};

pub use legacy::{resolve_legacy_call, LegacyRoute, LEGACY_ROUTES};

#[cfg(feature = "embeddings")]
pub use embeddings::LocalEmbeddingProvider;

pub use embeddings::{EmbeddingError, EmbeddingProvider, HashEmbeddingProvider};

#[cfg(feature = "vector-search")]
pub use search::{VectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        Config, Engine, EngineError, ListRequest, Memory, Result, SearchMode, SearchRequest,
        SearchResult, TagMatch,
    };

    pub use crate::{HybridStore, LocalStore, MemoryStore, RemoteStore};

    pub use crate::{Consolidator, Horizon, Scheduler};

    pub use crate::{QualityEvaluator, QualityOutcome};

    #[cfg(feature = "embeddings")]
    pub use crate::LocalEmbeddingProvider;

    #[cfg(feature = "vector-search")]
    pub use crate::VectorIndex;
}
