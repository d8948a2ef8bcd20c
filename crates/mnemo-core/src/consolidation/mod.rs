//! Consolidator (C8): a single pass over the memories falling within a
//! time horizon — association discovery, quality re-scoring, retention
//! archiving, and decay weighting — followed by a JSON report (spec §4.8).
//!
//! Coordination with sync (C6): before phase 1 the consolidator pauses the
//! sync engine and every mutation in this module goes straight through
//! [`crate::storage::LocalStore`], bypassing `HybridStore`'s enqueue step
//! entirely — consolidation's own writes never enter the outbound
//! replication queue. Sync resumes once the pass succeeds or fails and
//! catches up on whatever the application enqueued concurrently.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::{Config, QualityConfig};
use crate::error::{EngineError, Result};
use crate::memory::{metadata_keys, AssociationReason, Memory};
use crate::quality::{ImplicitSignal, QualityEvaluator};
use crate::storage::{HybridStore, MemoryStore};

/// Which recurring window a consolidation pass covers (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Horizon {
    pub fn as_str(self) -> &'static str {
        match self {
            Horizon::Daily => "daily",
            Horizon::Weekly => "weekly",
            Horizon::Monthly => "monthly",
            Horizon::Quarterly => "quarterly",
            Horizon::Yearly => "yearly",
        }
    }

    /// Candidate window length, anchored to "now" at the start of a pass.
    fn window_seconds(self) -> f64 {
        const DAY: f64 = 86_400.0;
        match self {
            Horizon::Daily => DAY,
            Horizon::Weekly => DAY * 7.0,
            Horizon::Monthly => DAY * 30.0,
            Horizon::Quarterly => DAY * 91.0,
            Horizon::Yearly => DAY * 365.0,
        }
    }

    pub fn all() -> [Horizon; 5] {
        [Horizon::Daily, Horizon::Weekly, Horizon::Monthly, Horizon::Quarterly, Horizon::Yearly]
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Horizon {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(Horizon::Daily),
            "weekly" => Ok(Horizon::Weekly),
            "monthly" => Ok(Horizon::Monthly),
            "quarterly" => Ok(Horizon::Quarterly),
            "yearly" => Ok(Horizon::Yearly),
            other => Err(EngineError::InvalidArgument(format!("unknown consolidation horizon: {other}"))),
        }
    }
}

/// Per-phase counts surfaced in the consolidation report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationCounts {
    pub scanned: usize,
    pub associations_added: usize,
    pub quality_scored: usize,
    pub archived: usize,
}

/// A single `{content_hash, quality_score}` entry in the report's samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredSample {
    pub content_hash: String,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationSamples {
    pub top_by_score: Vec<ScoredSample>,
    pub bottom_by_score: Vec<ScoredSample>,
}

/// A completed consolidation pass report (spec §6 "Report format"),
/// written to `{data_dir}/{consolidation.reports_dir}/consolidation_{horizon}_{ISO8601}.json`
/// only on full success.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub horizon: String,
    pub started_at: String,
    pub completed_at: String,
    pub duration_seconds: f64,
    pub counts: ConsolidationCounts,
    pub samples: ConsolidationSamples,
    pub errors: Vec<String>,
}

/// Retention windows (in days) per quality tier, derived from
/// [`QualityConfig`] (spec §4.8 phase 4).
#[derive(Debug, Clone, Copy)]
struct RetentionPolicy {
    high_days: f64,
    medium_days: f64,
    low_min_days: f64,
    low_max_days: f64,
}

impl RetentionPolicy {
    fn from_config(q: &QualityConfig) -> Self {
        Self {
            high_days: q.retention_high as f64,
            medium_days: q.retention_medium as f64,
            low_min_days: q.retention_low_min as f64,
            low_max_days: q.retention_low_max as f64,
        }
    }

    /// `quality >= 0.7` retains for `high_days`; `[0.5, 0.7)` retains for
    /// `medium_days`; below `0.5` scales linearly across
    /// `[low_min_days, low_max_days]` (lower quality, shorter retention).
    fn threshold_days(&self, quality: f64) -> f64 {
        if quality >= 0.7 {
            self.high_days
        } else if quality >= 0.5 {
            self.medium_days
        } else {
            let t = (quality / 0.5).clamp(0.0, 1.0);
            self.low_min_days + t * (self.low_max_days - self.low_min_days)
        }
    }
}

/// Performs a single consolidation pass over one horizon (C8).
pub struct Consolidator {
    store: Arc<HybridStore>,
    quality: Arc<QualityEvaluator>,
    association_similarity_threshold: f32,
    association_tag_threshold: f32,
    association_top_k: usize,
    quality_refresh_days: u32,
    stale_tail_size: usize,
    ai_scores_history_cap: usize,
    retention: RetentionPolicy,
    reports_dir: PathBuf,
    enabled: bool,
}

impl Consolidator {
    pub fn new(store: Arc<HybridStore>, quality: Arc<QualityEvaluator>, config: &Config) -> Self {
        Self {
            store,
            quality,
            association_similarity_threshold: config.consolidation.association_similarity_threshold,
            association_tag_threshold: config.consolidation.association_tag_threshold,
            association_top_k: config.consolidation.association_top_k,
            quality_refresh_days: config.consolidation.quality_refresh_days,
            stale_tail_size: config.consolidation.stale_tail_size,
            ai_scores_history_cap: config.quality.ai_scores_history_cap,
            retention: RetentionPolicy::from_config(&config.quality),
            reports_dir: config.reports_dir(),
            enabled: config.consolidation.enabled,
        }
    }

    /// Run the full six-phase pass for `horizon`. The report is written to
    /// disk only once every phase completes; any error along the way
    /// leaves `reports_dir` untouched (spec §8, "consolidation report
    /// gating").
    pub async fn run(&self, horizon: Horizon) -> Result<ConsolidationReport> {
        if !self.enabled {
            return Err(EngineError::InvalidArgument("consolidation.enabled is false".into()));
        }

        let started = Instant::now();
        let started_at = Utc::now();

        self.store.pause_sync().await;
        let result = self.run_phases(horizon, started_at).await;
        self.store.resume_sync().await;

        let mut report = result?;
        report.duration_seconds = started.elapsed().as_secs_f64();
        self.write_report(&report).await?;
        Ok(report)
    }

    async fn run_phases(
        &self,
        horizon: Horizon,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<ConsolidationReport> {
        let local = self.store.local();

        // Phase 1: candidate selection.
        let now = Utc::now().timestamp() as f64;
        let window_start = now - horizon.window_seconds();
        let candidates = local
            .consolidation_candidates(window_start, now, self.stale_tail_size)
            .await?;
        let scanned = candidates.len();

        // Phase 2: association discovery.
        let associations_added = self.discover_associations(&candidates).await?;

        // Phase 3: quality pass.
        let quality_scored = self.refresh_quality(&candidates).await?;

        // Re-read so phases 4/5 see any quality_score written by phase 3.
        let mut refreshed = Vec::with_capacity(candidates.len());
        for m in &candidates {
            if let Some(m) = local.get_by_hash(&m.content_hash).await? {
                refreshed.push(m);
            }
        }

        // Phase 4: retention decision.
        let archived = self.apply_retention(&refreshed).await?;

        // Phase 5: decay weighting, for everything that survived phase 4.
        self.apply_decay(&refreshed, &archived).await?;

        let mut scored: Vec<ScoredSample> = refreshed
            .iter()
            .filter(|m| !archived.contains(&m.content_hash))
            .map(|m| ScoredSample { content_hash: m.content_hash.clone(), quality_score: m.quality_score() })
            .collect();
        scored.sort_by(|a, b| b.quality_score.partial_cmp(&a.quality_score).unwrap_or(std::cmp::Ordering::Equal));
        let top_by_score = scored.iter().take(5).cloned().collect();
        let bottom_by_score = scored.iter().rev().take(5).cloned().collect();

        Ok(ConsolidationReport {
            horizon: horizon.as_str().to_string(),
            started_at: started_at.to_rfc3339(),
            completed_at: Utc::now().to_rfc3339(),
            duration_seconds: 0.0,
            counts: ConsolidationCounts {
                scanned,
                associations_added,
                quality_scored,
                archived: archived.len(),
            },
            samples: ConsolidationSamples { top_by_score, bottom_by_score },
            errors: vec![],
        })
    }

    /// Phase 2: embedding-proximity neighbors above the similarity
    /// threshold plus co-tag pairs above the Jaccard threshold, deduped by
    /// unordered pair within this pass. Idempotent across reruns since
    /// `upsert_association` is itself an upsert (last-write-wins).
    async fn discover_associations(&self, candidates: &[Memory]) -> Result<usize> {
        let local = self.store.local();
        let mut emitted: HashSet<(String, String)> = HashSet::new();
        let mut count = 0usize;

        for memory in candidates {
            let Some(embedding) = local.get_embedding(&memory.content_hash).await? else {
                continue;
            };
            let neighbors =
                local.nearest_by_vector(&embedding, self.association_top_k, &memory.content_hash)?;
            for (other_hash, similarity) in neighbors {
                if similarity < self.association_similarity_threshold {
                    continue;
                }
                if !emitted.insert(unordered_pair(&memory.content_hash, &other_hash)) {
                    continue;
                }
                local
                    .upsert_association(
                        &memory.content_hash,
                        &other_hash,
                        similarity,
                        AssociationReason::EmbeddingProximity,
                    )
                    .await?;
                count += 1;
            }
        }

        for (i, a) in candidates.iter().enumerate() {
            for b in &candidates[i + 1..] {
                let jaccard = tag_jaccard(&a.tags, &b.tags);
                if jaccard < self.association_tag_threshold {
                    continue;
                }
                if !emitted.insert(unordered_pair(&a.content_hash, &b.content_hash)) {
                    continue;
                }
                local
                    .upsert_association(&a.content_hash, &b.content_hash, jaccard, AssociationReason::CoTag)
                    .await?;
                count += 1;
            }
        }

        Ok(count)
    }

    /// Phase 3: re-score every candidate whose last `ai_scores` entry is
    /// absent or older than `quality_refresh_days`. Replaces
    /// `quality_score`/`quality_provider`/`quality_components`; appends to
    /// the capped `ai_scores` history.
    async fn refresh_quality(&self, candidates: &[Memory]) -> Result<usize> {
        let local = self.store.local();
        let refresh_cutoff = Utc::now().timestamp() as f64 - self.quality_refresh_days as f64 * 86_400.0;
        let mut scored = 0usize;

        for memory in candidates {
            let last_scored_at = memory
                .metadata
                .get(metadata_keys::AI_SCORES)
                .and_then(|v| v.as_array())
                .and_then(|a| a.last())
                .and_then(|entry| entry.get("at"))
                .and_then(|v| v.as_f64());

            if last_scored_at.is_some_and(|at| at >= refresh_cutoff) {
                continue;
            }

            let implicit = implicit_signal_for(memory);
            let outcome = self.quality.score(memory, None, implicit).await?;

            let mut history: Vec<serde_json::Value> = memory
                .metadata
                .get(metadata_keys::AI_SCORES)
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            history.push(serde_json::json!({
                "provider": outcome.provider,
                "score": outcome.score,
                "at": Utc::now().timestamp() as f64,
            }));
            if history.len() > self.ai_scores_history_cap {
                let drop = history.len() - self.ai_scores_history_cap;
                history.drain(0..drop);
            }

            let mut patch = std::collections::HashMap::new();
            patch.insert(metadata_keys::QUALITY_SCORE.to_string(), serde_json::json!(outcome.score));
            patch.insert(metadata_keys::QUALITY_PROVIDER.to_string(), serde_json::json!(outcome.provider));
            patch.insert(
                metadata_keys::QUALITY_COMPONENTS.to_string(),
                serde_json::to_value(&outcome.components).unwrap_or(serde_json::Value::Null),
            );
            patch.insert(metadata_keys::AI_SCORES.to_string(), serde_json::Value::Array(history));

            local.update_metadata(&memory.content_hash, patch).await?;
            scored += 1;
        }

        Ok(scored)
    }

    /// Phase 4: archive memories inactive beyond their quality tier's
    /// retention window. Returns the archived hashes.
    async fn apply_retention(&self, candidates: &[Memory]) -> Result<HashSet<String>> {
        let local = self.store.local();
        let now = Utc::now().timestamp() as f64;
        let mut archived = HashSet::new();

        for memory in candidates {
            let last_accessed = memory.last_accessed_at().unwrap_or(memory.updated_at);
            let inactive_days = (now - last_accessed) / 86_400.0;
            let threshold_days = self.retention.threshold_days(memory.quality_score());
            if inactive_days <= threshold_days {
                continue;
            }
            if local.archive_memory(&memory.content_hash, "retention").await? {
                archived.insert(memory.content_hash.clone());
            }
        }

        Ok(archived)
    }

    /// Phase 5: refresh `decay_multiplier = 1 + 0.5 * quality_score` for
    /// every surviving candidate.
    async fn apply_decay(&self, candidates: &[Memory], archived: &HashSet<String>) -> Result<()> {
        let local = self.store.local();
        for memory in candidates {
            if archived.contains(&memory.content_hash) {
                continue;
            }
            let multiplier = 1.0 + 0.5 * memory.quality_score();
            let mut patch = std::collections::HashMap::new();
            patch.insert(metadata_keys::DECAY_MULTIPLIER.to_string(), serde_json::json!(multiplier));
            local.update_metadata(&memory.content_hash, patch).await?;
        }
        Ok(())
    }

    /// Phase 6: write the report. Colons/periods are stripped from the
    /// timestamp component so the filename stays portable across
    /// filesystems that reject them.
    async fn write_report(&self, report: &ConsolidationReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .map_err(|e| EngineError::StorageIo(e.to_string()))?;

        let stamp = report.completed_at.replace([':', '.'], "-");
        let path = self.reports_dir.join(format!("consolidation_{}_{stamp}.json", report.horizon));
        let json = serde_json::to_vec_pretty(report).map_err(|e| EngineError::StorageIo(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| EngineError::StorageIo(e.to_string()))?;
        tracing::info!(path = %path.display(), "consolidation report written");
        Ok(())
    }
}

fn unordered_pair(a: &str, b: &str) -> (String, String) {
    if a < b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn tag_jaccard(a: &[String], b: &[String]) -> f32 {
    let set_a: HashSet<&String> = a.iter().collect();
    let set_b: HashSet<&String> = b.iter().collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f32 / union as f32
}

fn implicit_signal_for(memory: &Memory) -> ImplicitSignal {
    let now = Utc::now().timestamp() as f64;
    ImplicitSignal {
        access_count: memory.access_count(),
        seconds_since_last_access: memory.last_accessed_at().map(|t| (now - t).max(0.0)),
        mean_normalized_rank: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityProvider;
    use crate::embeddings::{EmbeddingProvider, HashEmbeddingProvider};

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.data_dir = dir.to_path_buf();
        config.embedding_dim = 32;
        config.remote.endpoint = String::new();
        config.quality.ai_provider = QualityProvider::None;
        config
    }

    async fn test_consolidator(dir: &std::path::Path) -> (Consolidator, Arc<HybridStore>) {
        let config = test_config(dir);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
        let store = Arc::new(HybridStore::open(&config, embedder).unwrap());
        let quality = Arc::new(QualityEvaluator::new(config.quality.clone(), None).unwrap());
        let consolidator = Consolidator::new(store.clone(), quality, &config);
        (consolidator, store)
    }

    #[tokio::test]
    async fn test_run_writes_a_report_and_scores_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let (consolidator, store) = test_consolidator(dir.path()).await;
        store.store(Memory::new("alpha content".to_string(), vec!["x".to_string()], None)).await.unwrap();
        store.store(Memory::new("beta content".to_string(), vec!["x".to_string()], None)).await.unwrap();

        let report = consolidator.run(Horizon::Daily).await.unwrap();
        assert_eq!(report.counts.scanned, 2);
        assert_eq!(report.counts.quality_scored, 2);

        let reports_dir = dir.path().join("reports");
        let mut entries = tokio::fs::read_dir(&reports_dir).await.unwrap();
        let mut found = false;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().starts_with("consolidation_daily_") {
                found = true;
            }
        }
        assert!(found);
    }

    #[tokio::test]
    async fn test_co_tag_association_emitted_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let (consolidator, store) = test_consolidator(dir.path()).await;
        let a = Memory::new("first".to_string(), vec!["x".to_string(), "y".to_string()], None);
        let b = Memory::new("second".to_string(), vec!["x".to_string(), "y".to_string()], None);
        let (ha, hb) = (a.content_hash.clone(), b.content_hash.clone());
        store.store(a).await.unwrap();
        store.store(b).await.unwrap();

        consolidator.run(Horizon::Daily).await.unwrap();

        let found = store.list_associations(&ha, 1).await.unwrap();
        assert!(found.iter().any(|assoc| assoc.other(&ha) == Some(hb.as_str())));
    }

    #[tokio::test]
    async fn test_disabled_consolidation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.consolidation.enabled = false;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(32));
        let store = Arc::new(HybridStore::open(&config, embedder).unwrap());
        let quality = Arc::new(QualityEvaluator::new(config.quality.clone(), None).unwrap());
        let consolidator = Consolidator::new(store, quality, &config);

        let result = consolidator.run(Horizon::Daily).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_retention_policy_scales_low_tier_linearly() {
        let policy = RetentionPolicy {
            high_days: 365.0,
            medium_days: 180.0,
            low_min_days: 30.0,
            low_max_days: 90.0,
        };
        assert_eq!(policy.threshold_days(0.9), 365.0);
        assert_eq!(policy.threshold_days(0.6), 180.0);
        assert_eq!(policy.threshold_days(0.0), 30.0);
        assert_eq!(policy.threshold_days(0.5), 180.0);
        assert_eq!(policy.threshold_days(0.49), 88.8);
    }
}
