//! Quality evaluator (C7): scores a memory in `[0, 1]` via a tiered
//! fallback chain (local cross-encoder → local absolute classifier →
//! remote LLM A → remote LLM B → implicit-signal composite), then blends
//! the winning tier's score with the implicit composite (or a manual
//! `user_rating`, when present) into the final `quality_score`.
//!
//! The cross-encoder tier reuses [`crate::search::Reranker`] (C1's
//! retrieval-time reranking engine) rather than loading a second model —
//! relevance-to-a-query and quality-of-content are close enough signals
//! that the existing cross-encoder is a legitimate quality proxy, which is
//! exactly the "known limitation" the spec calls out in §4.7: used this way
//! it measures relevance, not absolute quality, and exhibits the documented
//! self-matching bias when the query is derived from the content itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::{QualityConfig, QualityProvider, RemoteConfig};
use crate::error::{EngineError, Result};
use crate::memory::Memory;
use crate::search::Reranker;

/// Which tier ultimately produced `ai_component` (or `"implicit"` if none
/// of the scored tiers were available). Stored verbatim as
/// `metadata::QUALITY_PROVIDER`.
pub const PROVIDER_CROSS_ENCODER: &str = "local_cross_encoder";
pub const PROVIDER_ABSOLUTE_CLASSIFIER: &str = "local_absolute_classifier";
pub const PROVIDER_REMOTE_A: &str = "remote_a";
pub const PROVIDER_REMOTE_B: &str = "remote_b";
pub const PROVIDER_IMPLICIT: &str = "implicit";

/// Inputs to the implicit-signal composite (tier 5), sourced from a
/// memory's own metadata and retrieval history. `mean_normalized_rank` of
/// `None` means no retrieval history exists yet; `rank_quality` then
/// defaults to the spec's documented neutral `0.5`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImplicitSignal {
    pub access_count: i64,
    pub seconds_since_last_access: Option<f64>,
    pub mean_normalized_rank: Option<f64>,
}

/// How the threshold-based rescue mode (§4.7, "Fallback composite mode")
/// resolved, when it ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackDecision {
    /// Primary (cross-encoder) score cleared its threshold; used as-is.
    Primary,
    /// Primary missed its threshold but rescue (absolute classifier)
    /// cleared its own; rescue score used.
    Rescue,
    /// Neither threshold cleared; primary score used anyway (spec: "else
    /// return s₁").
    PrimaryNoRescue,
}

/// Diagnostic breakdown of how `quality_score` was derived, stored
/// verbatim as `metadata::QUALITY_COMPONENTS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityComponents {
    pub ai_component: Option<f64>,
    pub implicit_component: f64,
    pub user_rating_applied: bool,
    pub fallback: Option<FallbackRecord>,
}

/// Recorded rescue-mode decision (spec §4.7: `{decision, score_primary,
/// score_rescue, final_score}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRecord {
    pub decision: FallbackDecision,
    pub score_primary: f64,
    pub score_rescue: Option<f64>,
    pub final_score: f64,
}

/// Result of a single `score` call.
#[derive(Debug, Clone)]
pub struct QualityOutcome {
    pub score: f64,
    pub provider: String,
    pub components: QualityComponents,
}

/// Implicit-composite tuning. Not exposed in `Config` — the spec leaves
/// `F_ref`/`τ` unlisted among configurable quality options, so these are
/// fixed implementation constants (recorded as an Open Question decision).
const IMPLICIT_FREQ_REF: f64 = 10.0;
const IMPLICIT_RECENCY_TAU_SECS: f64 = 30.0 * 24.0 * 3600.0;

/// Tiered quality scorer (C7).
pub struct QualityEvaluator {
    config: QualityConfig,
    cross_encoder: Mutex<Reranker>,
    remote: Option<RemoteQualityClient>,
}

impl QualityEvaluator {
    pub fn new(config: QualityConfig, remote_config: Option<&RemoteConfig>) -> Result<Self> {
        let remote = match remote_config {
            Some(cfg) if !cfg.endpoint.is_empty() => Some(RemoteQualityClient::new(cfg)?),
            _ => None,
        };
        Ok(Self {
            config,
            cross_encoder: Mutex::new(Reranker::default()),
            remote,
        })
    }

    /// Score `memory` against an optional `query` (present at retrieval
    /// time, absent at ingest/consolidation time — which rules out the
    /// cross-encoder tier per spec §4.7).
    pub async fn score(
        &self,
        memory: &Memory,
        query: Option<&str>,
        implicit: ImplicitSignal,
    ) -> Result<QualityOutcome> {
        if !self.config.system_enabled {
            let implicit_component = implicit_composite(implicit);
            return Ok(QualityOutcome {
                score: implicit_component,
                provider: PROVIDER_IMPLICIT.to_string(),
                components: QualityComponents {
                    ai_component: None,
                    implicit_component,
                    user_rating_applied: false,
                    fallback: None,
                },
            });
        }

        let implicit_component = implicit_composite(implicit);
        let (ai_component, provider, fallback) = self.resolve_ai_component(memory, query).await?;

        let user_rating = memory
            .metadata
            .get(crate::memory::metadata_keys::USER_RATING)
            .and_then(Value::as_i64);

        let score = match user_rating {
            Some(rating) => {
                let mapped = match rating {
                    -1 => 0.0,
                    1 => 1.0,
                    _ => 0.5,
                };
                let composite = ai_component.unwrap_or(implicit_component) * 0.5 + implicit_component * 0.5;
                0.6 * mapped + 0.4 * composite
            }
            None => ai_component.map_or(implicit_component, |ai| 0.5 * ai + 0.5 * implicit_component),
        };

        Ok(QualityOutcome {
            score: score.clamp(0.0, 1.0),
            provider: provider.to_string(),
            components: QualityComponents {
                ai_component,
                implicit_component,
                user_rating_applied: user_rating.is_some(),
                fallback,
            },
        })
    }

    async fn resolve_ai_component(
        &self,
        memory: &Memory,
        query: Option<&str>,
    ) -> Result<(Option<f64>, &'static str, Option<FallbackRecord>)> {
        let tiers = tier_chain(self.config.ai_provider);
        let both_local_in_chain =
            tiers.contains(&Tier::CrossEncoder) && tiers.contains(&Tier::AbsoluteClassifier);

        if self.config.fallback_enabled && both_local_in_chain {
            if let Some(record) = self.fallback_rescue(memory, query).await? {
                let provider = match record.decision {
                    FallbackDecision::Rescue => PROVIDER_ABSOLUTE_CLASSIFIER,
                    _ => PROVIDER_CROSS_ENCODER,
                };
                return Ok((Some(record.final_score), provider, Some(record)));
            }
        }

        for tier in tiers {
            if let Some(score) = self.try_tier(tier, memory, query).await? {
                return Ok((Some(score), tier.provider_name(), None));
            }
        }

        Ok((None, PROVIDER_IMPLICIT, None))
    }

    async fn fallback_rescue(
        &self,
        memory: &Memory,
        query: Option<&str>,
    ) -> Result<Option<FallbackRecord>> {
        let Some(primary) = self.try_tier(Tier::CrossEncoder, memory, query).await? else {
            return Ok(None);
        };
        if primary >= self.config.deberta_threshold as f64 {
            return Ok(Some(FallbackRecord {
                decision: FallbackDecision::Primary,
                score_primary: primary,
                score_rescue: None,
                final_score: primary,
            }));
        }

        let Some(rescue) = self.try_tier(Tier::AbsoluteClassifier, memory, query).await? else {
            return Ok(Some(FallbackRecord {
                decision: FallbackDecision::PrimaryNoRescue,
                score_primary: primary,
                score_rescue: None,
                final_score: primary,
            }));
        };

        if rescue >= self.config.msmarco_threshold as f64 {
            Ok(Some(FallbackRecord {
                decision: FallbackDecision::Rescue,
                score_primary: primary,
                score_rescue: Some(rescue),
                final_score: rescue,
            }))
        } else {
            Ok(Some(FallbackRecord {
                decision: FallbackDecision::PrimaryNoRescue,
                score_primary: primary,
                score_rescue: Some(rescue),
                final_score: primary,
            }))
        }
    }

    async fn try_tier(&self, tier: Tier, memory: &Memory, query: Option<&str>) -> Result<Option<f64>> {
        match tier {
            Tier::CrossEncoder => {
                let Some(query) = query else { return Ok(None) };
                Ok(Some(self.cross_encoder_score(query, &memory.content).await?))
            }
            Tier::AbsoluteClassifier => Ok(Some(absolute_classifier_score(&memory.content, &memory.tags))),
            Tier::RemoteA => match &self.remote {
                Some(client) => match client.score(&memory.content, query, "a").await {
                    Ok(score) => Ok(Some(score)),
                    Err(e) if e.is_transient() => {
                        tracing::debug!(error = %e, "remote quality tier A unavailable");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                },
                None => Ok(None),
            },
            Tier::RemoteB => match &self.remote {
                Some(client) => match client.score(&memory.content, query, "b").await {
                    Ok(score) => Ok(Some(score)),
                    Err(e) if e.is_transient() => {
                        tracing::debug!(error = %e, "remote quality tier B unavailable");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                },
                None => Ok(None),
            },
        }
    }

    async fn cross_encoder_score(&self, query: &str, content: &str) -> Result<f64> {
        let mut reranker = self.cross_encoder.lock().await;
        let results = reranker
            .rerank(query, vec![((), content.to_string())], Some(1))
            .map_err(|e| EngineError::EvaluatorUnavailable(e.to_string()))?;
        let raw = results.first().map(|r| r.score as f64).unwrap_or(0.0);
        // The neural cross-encoder emits an unbounded logit; the BM25
        // fallback emits a small positive score. Both get mapped into
        // [0, 1] with a sigmoid — exact for the logit, a reasonable
        // monotonic squashing for the fallback.
        Ok(sigmoid(raw))
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Heuristic stand-in for the spec's "local absolute classifier": no
/// second model download, just structural signals over the content
/// (length, specificity markers, tag richness) mapped to a 3-class
/// distribution and collapsed via `0·P_low + 0.5·P_med + 1.0·P_high`.
fn absolute_classifier_score(content: &str, tags: &[String]) -> f64 {
    let len = content.chars().count() as f64;
    let length_signal = (len / 280.0).min(1.0);

    let has_numbers = content.chars().any(|c| c.is_ascii_digit());
    let has_specificity_markers =
        content.contains("```") || content.contains('`') || has_numbers;
    let specificity_signal = if has_specificity_markers { 1.0 } else { 0.3 };

    let tag_signal = (tags.len() as f64 / 3.0).min(1.0);

    let composite = 0.5 * length_signal + 0.35 * specificity_signal + 0.15 * tag_signal;

    let p_high = composite.powi(2);
    let p_low = (1.0 - composite).powi(2);
    let p_med = (1.0 - p_high - p_low).max(0.0);

    0.5 * p_med + 1.0 * p_high
}

/// §4.7's `0.4·freq + 0.3·recency + 0.3·rank_quality`.
fn implicit_composite(signal: ImplicitSignal) -> f64 {
    let freq = (signal.access_count as f64 / IMPLICIT_FREQ_REF).min(1.0);
    let recency = match signal.seconds_since_last_access {
        Some(dt) => (-dt / IMPLICIT_RECENCY_TAU_SECS).exp(),
        None => 0.0,
    };
    let rank_quality = match signal.mean_normalized_rank {
        Some(rank) => 1.0 - rank,
        None => 0.5,
    };
    (0.4 * freq + 0.3 * recency + 0.3 * rank_quality).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    CrossEncoder,
    AbsoluteClassifier,
    RemoteA,
    RemoteB,
}

impl Tier {
    fn provider_name(self) -> &'static str {
        match self {
            Tier::CrossEncoder => PROVIDER_CROSS_ENCODER,
            Tier::AbsoluteClassifier => PROVIDER_ABSOLUTE_CLASSIFIER,
            Tier::RemoteA => PROVIDER_REMOTE_A,
            Tier::RemoteB => PROVIDER_REMOTE_B,
        }
    }
}

fn tier_chain(policy: QualityProvider) -> Vec<Tier> {
    match policy {
        QualityProvider::Local => vec![Tier::CrossEncoder, Tier::AbsoluteClassifier],
        QualityProvider::RemoteA => vec![Tier::RemoteA],
        QualityProvider::RemoteB => vec![Tier::RemoteB],
        QualityProvider::Auto => {
            vec![Tier::CrossEncoder, Tier::AbsoluteClassifier, Tier::RemoteA, Tier::RemoteB]
        }
        QualityProvider::None => vec![],
    }
}

/// Thin client for the two remote LLM quality tiers. Shares its transport
/// error taxonomy with [`crate::storage::RemoteStore`] but is kept separate
/// since it speaks a different (scoring, not storage) API surface.
struct RemoteQualityClient {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    api_token: String,
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    content: &'a str,
    query: Option<&'a str>,
}

#[derive(Deserialize)]
struct ScoreResponse {
    score: f64,
}

impl RemoteQualityClient {
    fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| EngineError::Permanent(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            account_id: config.account_id.clone(),
            api_token: config.api_token.clone(),
        })
    }

    async fn score(&self, content: &str, query: Option<&str>, tier: &str) -> Result<f64> {
        let url = format!("{}/v1/{}/quality/score/{tier}", self.base_url, self.account_id);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_token)
            .json(&ScoreRequest { content, query })
            .send()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return if status.is_server_error() {
                Err(EngineError::Transient(format!("remote quality tier {tier}: {status}")))
            } else {
                Err(EngineError::Permanent(format!("remote quality tier {tier}: {status}")))
            };
        }

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Permanent(format!("decoding quality response: {e}")))?;
        Ok(body.score.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(config: QualityConfig) -> QualityEvaluator {
        QualityEvaluator::new(config, None).unwrap()
    }

    #[tokio::test]
    async fn test_system_disabled_falls_straight_to_implicit() {
        let config = QualityConfig {
            system_enabled: false,
            ..Default::default()
        };
        let evaluator = evaluator(config);
        let memory = Memory::new("some content".to_string(), vec![], None);
        let outcome = evaluator
            .score(&memory, None, ImplicitSignal { access_count: 5, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(outcome.provider, PROVIDER_IMPLICIT);
        assert!(outcome.components.ai_component.is_none());
    }

    #[tokio::test]
    async fn test_provider_none_skips_every_scored_tier() {
        let config = QualityConfig {
            ai_provider: QualityProvider::None,
            ..Default::default()
        };
        let evaluator = evaluator(config);
        let memory = Memory::new("some content".to_string(), vec![], None);
        let outcome = evaluator.score(&memory, Some("query"), ImplicitSignal::default()).await.unwrap();
        assert_eq!(outcome.provider, PROVIDER_IMPLICIT);
    }

    #[tokio::test]
    async fn test_local_provider_without_query_uses_absolute_classifier() {
        let config = QualityConfig {
            ai_provider: QualityProvider::Local,
            ..Default::default()
        };
        let evaluator = evaluator(config);
        let memory = Memory::new("a".repeat(300), vec!["x".to_string()], None);
        let outcome = evaluator.score(&memory, None, ImplicitSignal::default()).await.unwrap();
        assert_eq!(outcome.provider, PROVIDER_ABSOLUTE_CLASSIFIER);
    }

    #[tokio::test]
    async fn test_user_rating_present_dominates_composite() {
        let config = QualityConfig {
            ai_provider: QualityProvider::None,
            ..Default::default()
        };
        let evaluator = evaluator(config);
        let mut memory = Memory::new("content".to_string(), vec![], None);
        memory
            .metadata
            .insert(crate::memory::metadata_keys::USER_RATING.to_string(), Value::from(1));
        let outcome = evaluator.score(&memory, None, ImplicitSignal::default()).await.unwrap();
        assert!(outcome.components.user_rating_applied);
        assert!(outcome.score > 0.5);
    }

    #[test]
    fn test_implicit_composite_defaults_rank_quality_to_midpoint() {
        let score = implicit_composite(ImplicitSignal {
            access_count: 0,
            seconds_since_last_access: None,
            mean_normalized_rank: None,
        });
        // freq=0, recency=0 (no access), rank_quality=0.5 -> 0.3*0.5 = 0.15
        assert!((score - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_implicit_composite_rewards_frequent_recent_access() {
        let high = implicit_composite(ImplicitSignal {
            access_count: 100,
            seconds_since_last_access: Some(0.0),
            mean_normalized_rank: Some(0.0),
        });
        let low = implicit_composite(ImplicitSignal {
            access_count: 0,
            seconds_since_last_access: None,
            mean_normalized_rank: None,
        });
        assert!(high > low);
    }

    #[test]
    fn test_absolute_classifier_scores_longer_specific_content_higher() {
        let rich = absolute_classifier_score(
            &"word ".repeat(80),
            &["a".to_string(), "b".to_string(), "c".to_string()],
        );
        let thin = absolute_classifier_score("hi", &[]);
        assert!(rich > thin);
    }
}
