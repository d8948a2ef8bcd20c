//! Embedding provider (C1)
//!
//! Maps text to a fixed-dimension vector. The store-wide dimension is fixed
//! at first initialization (see `crate::config`); providers here take the
//! target dimension as a constructor argument rather than hard-coding it.
//!
//! `embeddings` feature on: `LocalEmbeddingProvider` runs fastembed locally,
//! 100% offline. Feature off, or `embedding_model = "hash"` in config:
//! `HashEmbeddingProvider`, a deterministic stand-in with no model download,
//! used by default in tests.

mod local;

pub use local::{
    cosine_similarity, dot_product, euclidean_distance, matryoshka_truncate, EmbeddingError,
    EmbeddingProvider, HashEmbeddingProvider, BATCH_SIZE, DEFAULT_DIMENSIONS, MAX_TEXT_LENGTH,
    NATIVE_DIMENSIONS,
};

#[cfg(feature = "embeddings")]
pub use local::LocalEmbeddingProvider;
