//! Spec §8 scenario 5: while sync is paused for consolidation, writes
//! still land locally without growing the outbound queue — the
//! consolidator bypasses `HybridStore`'s enqueue entirely rather than the
//! queue merely holding still. Once sync resumes, the backlog accrued by
//! *application* writes made during the same window drains normally.

mod common;

use common::TestEngine;
use mnemo_core::{ConsolidateAction, Horizon, MemoryStore, SyncState};

/// A remote configured against a closed local port: every request fails
/// fast with a connection refusal (classified transient), and
/// `max_retries = 0` means each op is dropped after its first attempt
/// rather than sitting in backoff.
fn unreachable_remote(config: &mut mnemo_core::Config) {
    config.remote.endpoint = "http://127.0.0.1:1".to_string();
    config.remote.request_timeout_ms = 500;
    config.sync.max_retries = 0;
    config.sync.queue_capacity = 64;
}

#[tokio::test]
async fn test_consolidation_writes_bypass_the_sync_queue_entirely() {
    let engine = TestEngine::with_config(unreachable_remote);

    for i in 0..20 {
        engine.memory_store(format!("hybrid memory {i}"), vec!["shared".to_string()], None, None).await.unwrap();
    }

    // Let the (doomed) initial store ops drain off the queue before
    // measuring — we only care about growth during consolidation itself.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    let before = engine.store().sync_status().await.expect("remote is configured").queue_len;

    // The consolidator's own retention/decay/quality writes for all 20
    // candidates go straight through `LocalStore`, never through
    // `HybridStore::enqueue` — queue depth must not grow because of them.
    engine
        .memory_consolidate(ConsolidateAction::Run, Some(Horizon::Daily), true)
        .await
        .unwrap();

    let after = engine.store().sync_status().await.unwrap().queue_len;
    assert!(after <= before, "consolidation must not enqueue sync ops (before={before}, after={after})");
}

#[tokio::test]
async fn test_sync_resumes_running_after_a_consolidation_pass() {
    let engine = TestEngine::with_config(unreachable_remote);
    engine.memory_store("alpha".to_string(), vec![], None, None).await.unwrap();

    engine
        .memory_consolidate(ConsolidateAction::Run, Some(Horizon::Daily), true)
        .await
        .unwrap();

    let status = engine.store().sync_status().await.unwrap();
    assert_eq!(status.state, SyncState::Running);
}

#[tokio::test]
async fn test_application_writes_made_during_a_pause_still_land_locally() {
    let engine = TestEngine::with_config(unreachable_remote);

    engine.store().pause_sync().await;
    let stored = engine.memory_store("paused write".to_string(), vec![], None, None).await.unwrap();
    assert!(stored.created);

    let memory = engine.store().get_by_hash(&stored.content_hash).await.unwrap();
    assert!(memory.is_some(), "local write must succeed even while sync is paused");

    engine.store().resume_sync().await;
}
