//! Search primitives backing the `MemoryStore` retrieval operations.
//!
//! - [`vector`]: HNSW vector index (semantic retrieval).
//! - [`reranker`]: cross-encoder / BM25-fallback reranking, reused by the
//!   quality evaluator's local cross-encoder tier (C7).
//! - [`hybrid`]: reciprocal-rank-fusion for `SearchMode::Hybrid`.

mod hybrid;
mod reranker;
mod vector;

pub use vector::{
    VectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError, DEFAULT_CONNECTIVITY,
    DEFAULT_DIMENSIONS,
};

pub use hybrid::reciprocal_rank_fusion;

pub use reranker::{
    Reranker, RerankedResult, RerankerConfig, RerankerError, DEFAULT_RERANK_COUNT,
    DEFAULT_RETRIEVAL_COUNT,
};
