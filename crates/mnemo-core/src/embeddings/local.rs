//! Local semantic embeddings
//!
//! Uses fastembed for local ONNX inference. The model is loaded once behind a
//! global lazy cell and reused across the process; callers never touch the
//! model directly, only `EmbeddingService`.
//!
//! The store-wide embedding dimension is a runtime invariant (stamped into
//! `config_meta` at first init, see `crate::config`), so this module exposes
//! a Matryoshka truncation to an arbitrary target width rather than a fixed
//! constant, unlike a single fixed-size embedding model.

#[cfg(feature = "embeddings")]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
#[cfg(feature = "embeddings")]
use std::sync::{Mutex, OnceLock};

/// Native output width of the underlying model before any truncation.
pub const NATIVE_DIMENSIONS: usize = 768;

/// Default target width after Matryoshka truncation.
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Maximum text length for embedding (truncated if longer).
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for efficient embedding generation.
pub const BATCH_SIZE: usize = 32;

#[cfg(feature = "embeddings")]
static EMBEDDING_MODEL_RESULT: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

#[cfg(feature = "embeddings")]
fn get_cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("FASTEMBED_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }

    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "mnemo", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }

    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/mnemo/fastembed");
    }

    std::path::PathBuf::from(".fastembed_cache")
}

#[cfg(feature = "embeddings")]
fn get_model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = EMBEDDING_MODEL_RESULT.get_or_init(|| {
        let cache_dir = get_cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("failed to create embedding cache dir {:?}: {}", cache_dir, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(true)
            .with_cache_dir(cache_dir);

        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("failed to initialize nomic-embed-text-v1.5: {e}"))
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::ModelInit(format!("lock poisoned: {e}"))),
        Err(err) => Err(EmbeddingError::ModelInit(err.clone())),
    }
}

/// Embedding error types.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    /// Failed to initialize the embedding model.
    ModelInit(String),
    /// Failed to generate an embedding for otherwise-valid input.
    EmbeddingFailed(String),
    /// Invalid input (empty, etc.)
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::ModelInit(e) => write!(f, "embedding model init failed: {e}"),
            EmbeddingError::EmbeddingFailed(e) => write!(f, "embedding generation failed: {e}"),
            EmbeddingError::InvalidInput(e) => write!(f, "invalid embedding input: {e}"),
        }
    }
}

impl std::error::Error for EmbeddingError {}

/// Anything that can turn text into a fixed-dimension vector (C1).
///
/// Implementations are expected to be pure w.r.t. (model, text): callers may
/// cache results by content hash.
pub trait EmbeddingProvider: Send + Sync {
    /// Dimensionality of vectors this provider returns.
    fn dimensions(&self) -> usize;

    /// Stable identifier recorded alongside stored embeddings.
    fn model_name(&self) -> &str;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed many texts; default implementation embeds one at a time.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Whether the underlying model/runtime is ready to serve requests.
    fn is_ready(&self) -> bool;
}

/// fastembed-backed provider, truncated to `dimensions` via Matryoshka
/// Representation Learning (the first N dims of the native output ARE a
/// valid N-dim embedding).
#[cfg(feature = "embeddings")]
pub struct LocalEmbeddingProvider {
    dimensions: usize,
}

#[cfg(feature = "embeddings")]
impl LocalEmbeddingProvider {
    /// Construct a provider truncating to `dimensions` (must be `<= NATIVE_DIMENSIONS`).
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.min(NATIVE_DIMENSIONS),
        }
    }

    /// Force the model to load now rather than on first `embed`.
    pub fn warm_up(&self) -> Result<(), EmbeddingError> {
        get_model().map(|_| ())
    }
}

#[cfg(feature = "embeddings")]
impl Default for LocalEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[cfg(feature = "embeddings")]
impl EmbeddingProvider for LocalEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "nomic-ai/nomic-embed-text-v1.5"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }

        let mut model = get_model()?;
        let text = if text.len() > MAX_TEXT_LENGTH {
            &text[..MAX_TEXT_LENGTH]
        } else {
            text
        };

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let raw = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding generated".into()))?;

        Ok(matryoshka_truncate(raw, self.dimensions))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = get_model()?;
        let mut out = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk
                .iter()
                .map(|t| if t.len() > MAX_TEXT_LENGTH { &t[..MAX_TEXT_LENGTH] } else { *t })
                .collect();

            let embeddings = model
                .embed(truncated, None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

            for emb in embeddings {
                out.push(matryoshka_truncate(emb, self.dimensions));
            }
        }

        Ok(out)
    }

    fn is_ready(&self) -> bool {
        match get_model() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("embedding model not ready: {e}");
                false
            }
        }
    }
}

/// Deterministic, model-free provider used in tests and as a `embedding_model
/// = "hash"` configuration: never downloads weights, never touches the
/// network, and is stable across runs for the same input.
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Construct a provider producing vectors of `dimensions` width.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "mnemo/hash-embedding-v1"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text cannot be empty".into()));
        }

        // Fill the vector with a simple rolling hash of overlapping shingles,
        // then L2-normalize. Not semantically meaningful, but deterministic
        // and dimensionally correct, which is all unit/integration tests need.
        let bytes = text.as_bytes();
        let mut vector = vec![0f32; self.dimensions];
        for (i, window) in bytes.windows(3.min(bytes.len().max(1))).enumerate() {
            let mut h: u64 = 1469598103934665603;
            for b in window {
                h ^= *b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            let idx = (h as usize).wrapping_add(i) % self.dimensions;
            vector[idx] += ((h % 2003) as f32 / 2003.0) - 0.5;
        }

        Ok(matryoshka_truncate(vector, self.dimensions))
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Truncate to `target` dimensions (no-op if already narrower) and L2-normalize.
#[inline]
pub fn matryoshka_truncate(mut vector: Vec<f32>, target: usize) -> Vec<f32> {
    if vector.len() > target {
        vector.truncate(target);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Cosine similarity between two equal-length vectors; `0.0` on mismatch.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

/// Euclidean distance between two equal-length vectors; `f32::MAX` on mismatch.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

/// Dot product between two equal-length vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
