//! Engine configuration (spec §6).
//!
//! One `serde`-derived `Config` struct with a nested struct per component,
//! loadable from TOML or environment. The engine never reads environment
//! variables directly outside this module and `embeddings::local`'s narrow
//! `FASTEMBED_CACHE_PATH` seam — everything else flows through here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level storage backend selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local vector store only (C3); no sync, no remote mirroring.
    Local,
    /// Remote store only (C4). Rare; mainly for testing the remote client.
    Remote,
    /// Local store with asynchronous remote mirroring (C5 + C6). Default.
    #[default]
    Hybrid,
}

/// Queue overflow policy for the sync engine (C6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the oldest queued op (or the oldest op for the incoming hash,
    /// if one is queued) to make room. Default.
    #[default]
    DropOldest,
    /// Refuse the newest op; the write already committed locally so this is
    /// silent from the writer's point of view, just a slower remote catch-up.
    DropNew,
    /// Block the writer's enqueue call up to a timeout before falling back
    /// to `drop_oldest`.
    BlockWriter,
}

/// Quality evaluator provider policy (C7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QualityProvider {
    /// Local tiers only (cross-encoder, then absolute classifier).
    Local,
    /// First remote LLM tier.
    RemoteA,
    /// Second remote LLM tier.
    RemoteB,
    /// Try every tier in order, falling through on unavailability. Default.
    #[default]
    Auto,
    /// Skip all scored tiers; implicit-signal composite only.
    None,
}

/// Remote store (C4) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// Base URL of the remote vector+KV service.
    pub endpoint: String,
    /// Account/tenant identifier sent with every request.
    pub account_id: String,
    /// Bearer token for authentication.
    pub api_token: String,
    /// Name of the remote vector index to read/write.
    pub vector_index: String,
    /// Name of the remote KV namespace used for metadata/associations.
    pub kv_namespace: String,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            account_id: String::new(),
            api_token: String::new(),
            vector_index: "mnemo-memories".to_string(),
            kv_namespace: "mnemo-kv".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Sync engine (C6) behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Bounded queue capacity. Default: a few thousand.
    pub queue_capacity: usize,
    /// Overflow policy once the queue is full.
    pub drop_policy: DropPolicy,
    /// Base retry delay in milliseconds (exponential backoff, factor 2).
    pub retry_base_ms: u64,
    /// Retry delay cap in milliseconds.
    pub retry_cap_ms: u64,
    /// Maximum retry attempts before a transient op is logged and dropped.
    pub max_retries: u32,
    /// Whether the sync worker pauses (and writers bypass) while
    /// consolidation is in progress.
    pub pause_on_consolidate: bool,
    /// Grace period the worker drains outstanding ops for on shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            drop_policy: DropPolicy::DropOldest,
            retry_base_ms: 250,
            retry_cap_ms: 30_000,
            max_retries: 8,
            pause_on_consolidate: true,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Quality evaluator (C7) and consolidator (C8) retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityConfig {
    /// Master switch; when false, `quality_score` is never computed and
    /// retention uses only the implicit composite.
    pub system_enabled: bool,
    /// Which tier(s) of the fallback chain to use.
    pub ai_provider: QualityProvider,
    /// Local classifier/cross-encoder model identifier (informational; the
    /// actual model choice lives behind `quality::LocalScorer`).
    pub local_model: String,
    /// Inference device hint (`"cpu"`, `"cuda"`, `"metal"`), passed through
    /// to whichever local backend is active.
    pub device: String,
    /// Whether quality-boosted search reranking is available at all.
    pub boost_enabled: bool,
    /// Default `quality_boost` weight when a caller doesn't specify one.
    pub boost_weight: f32,
    /// Retention window (days) for `quality_score >= 0.7`.
    pub retention_high: u32,
    /// Retention window (days) for `0.5 <= quality_score < 0.7`.
    pub retention_medium: u32,
    /// Lower end of the scaled retention window for `quality_score < 0.5`.
    pub retention_low_min: u32,
    /// Upper end of the scaled retention window for `quality_score < 0.5`.
    pub retention_low_max: u32,
    /// Enable threshold-based rescue between two local scorers (§4.7).
    pub fallback_enabled: bool,
    /// Rescue threshold for the cross-encoder tier.
    pub deberta_threshold: f32,
    /// Rescue threshold for the absolute-classifier tier.
    pub msmarco_threshold: f32,
    /// Maximum number of historical entries kept in `ai_scores`.
    pub ai_scores_history_cap: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            system_enabled: true,
            ai_provider: QualityProvider::Auto,
            local_model: "cross-encoder-ms-marco-MiniLM".to_string(),
            device: "cpu".to_string(),
            boost_enabled: true,
            boost_weight: 0.3,
            retention_high: 365,
            retention_medium: 180,
            retention_low_min: 30,
            retention_low_max: 90,
            fallback_enabled: false,
            deberta_threshold: 0.75,
            msmarco_threshold: 0.6,
            ai_scores_history_cap: 20,
        }
    }
}

/// Output shape for the ambient `tracing` subscriber a host application
/// wires up using this config (the engine itself never installs a global
/// subscriber — that's the embedding application's call to make, same as
/// the teacher's binaries own their own `tracing_subscriber::fmt()` setup).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, colorized — development default.
    #[default]
    Pretty,
    /// Newline-delimited JSON — production default.
    Json,
}

/// Ambient logging verbosity (spec §6), read by the host application when
/// it initializes its own `tracing` subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// A `tracing_subscriber::EnvFilter`-compatible directive string, e.g.
    /// `"info"` or `"mnemo_core=debug,warn"`.
    pub level: String,
    /// Rendering format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::default() }
    }
}

/// Per-horizon schedule entry: either a time expression (`"02:00"`,
/// `"sunday 03:00"`, `"day-1 04:00"`) or `None` (disabled).
pub type ScheduleSlot = Option<String>;

/// Scheduler (C9) trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// Daily horizon trigger, default `02:00` local.
    pub daily: ScheduleSlot,
    /// Weekly horizon trigger, default `sunday 03:00`.
    pub weekly: ScheduleSlot,
    /// Monthly horizon trigger, default `day-1 04:00`.
    pub monthly: ScheduleSlot,
    /// Quarterly horizon trigger, disabled by default.
    pub quarterly: ScheduleSlot,
    /// Yearly horizon trigger, disabled by default.
    pub yearly: ScheduleSlot,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily: Some("02:00".to_string()),
            weekly: Some("sunday 03:00".to_string()),
            monthly: Some("day-1 04:00".to_string()),
            quarterly: None,
            yearly: None,
        }
    }
}

/// Consolidation (C8) master configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationConfig {
    /// Master switch for C8/C9. When false, the scheduler never fires and
    /// `memory_consolidate(action=run)` is rejected.
    pub enabled: bool,
    /// Cosine-similarity threshold for `embedding_proximity` associations.
    pub association_similarity_threshold: f32,
    /// Tag-Jaccard threshold for `co_tag` associations.
    pub association_tag_threshold: f32,
    /// Top-K neighbors considered per candidate during association discovery.
    pub association_top_k: usize,
    /// A quality score older than this many days is considered stale and
    /// re-scored during the quality pass.
    pub quality_refresh_days: u32,
    /// Bounded tail of older memories (sampled by lowest `last_accessed_at`)
    /// added to the horizon-window candidate set.
    pub stale_tail_size: usize,
    /// Directory (relative to `data_dir`) reports are written to.
    pub reports_dir: String,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            association_similarity_threshold: 0.75,
            association_tag_threshold: 0.5,
            association_top_k: 10,
            quality_refresh_days: 30,
            stale_tail_size: 200,
            reports_dir: "reports".to_string(),
        }
    }
}

/// Top-level engine configuration (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Which store composition to construct.
    pub storage_backend: StorageBackend,
    /// Embedding model identifier (informational / passed to the provider).
    pub embedding_model: String,
    /// Embedding dimension; stamped into `config_meta` at first init and
    /// immutable thereafter for a given `data_dir`.
    pub embedding_dim: usize,
    /// Root directory for all persisted state.
    pub data_dir: PathBuf,
    /// Remote store credentials/config (used when backend is `remote` or
    /// `hybrid`).
    pub remote: RemoteConfig,
    /// Sync engine behavior.
    pub sync: SyncConfig,
    /// Quality evaluator and retention policy.
    pub quality: QualityConfig,
    /// Consolidation scheduler triggers.
    pub schedule: ScheduleConfig,
    /// Consolidation master switch and tuning.
    pub consolidation: ConsolidationConfig,
    /// Ambient logging verbosity/format for the host application's
    /// `tracing` subscriber.
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::default(),
            embedding_model: "nomic-ai/nomic-embed-text-v1.5".to_string(),
            embedding_dim: crate::embeddings::DEFAULT_DIMENSIONS,
            data_dir: default_data_dir(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
            quality: QualityConfig::default(),
            schedule: ScheduleConfig::default(),
            consolidation: ConsolidationConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// missing field (via serde's `#[serde(default)]`-free partial overlay:
    /// we parse into a `Config`, which requires the file to be complete, or
    /// callers can start from `Config::default()` and override fields).
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize to TOML for inspection or `--print-config` style tooling.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Directory where consolidation reports are written
    /// (`{data_dir}/{consolidation.reports_dir}`).
    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join(&self.consolidation.reports_dir)
    }

    /// Path to the primary SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("mnemo.db")
    }

    /// Path to the file-lock sentinel guarding single-writer access to
    /// `data_dir`.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(".mnemo.lock")
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "mnemo", "core") {
        return proj_dirs.data_dir().to_path_buf();
    }
    PathBuf::from(".mnemo")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let s = cfg.to_toml_string().unwrap();
        let parsed = Config::from_toml_str(&s).unwrap();
        assert_eq!(parsed.embedding_dim, cfg.embedding_dim);
        assert_eq!(parsed.sync.queue_capacity, cfg.sync.queue_capacity);
    }

    #[test]
    fn test_default_schedule_matches_spec_defaults() {
        let cfg = ScheduleConfig::default();
        assert_eq!(cfg.daily.as_deref(), Some("02:00"));
        assert!(cfg.quarterly.is_none());
        assert!(cfg.yearly.is_none());
    }
}
