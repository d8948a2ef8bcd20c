//! Spec §8 scenario 3: a memory stored "now" is visible under a
//! `yesterday` window once enough wall-clock time has notionally passed,
//! and absent once the window has moved on. Since tests can't wait 36/60
//! real hours, the window is driven directly via `after`/`before` (the
//! same mechanism `time_expr` resolves to) rather than the parser.

mod common;

use common::TestEngine;
use mnemo_core::{SearchMode, SearchRequest};

#[tokio::test]
async fn test_memory_is_visible_within_its_window_and_absent_outside_it() {
    let engine = TestEngine::new();
    let stored = engine.memory_store("yesterday's note".to_string(), vec![], None, None).await.unwrap();
    let memory = engine.store().get_by_hash(&stored.content_hash).await.unwrap().unwrap();
    let t = memory.created_at;

    // +36h: still inside a window covering [t - 1h, t + 48h).
    let within = engine
        .memory_search(SearchRequest {
            query: None,
            mode: SearchMode::Semantic,
            after: Some(t - 3600.0),
            before: Some(t + 48.0 * 3600.0),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(within.iter().any(|r| r.memory.content_hash == stored.content_hash));

    // +60h: window has moved past the memory entirely.
    let outside = engine
        .memory_search(SearchRequest {
            query: None,
            mode: SearchMode::Semantic,
            after: Some(t + 48.0 * 3600.0),
            before: Some(t + 72.0 * 3600.0),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!outside.iter().any(|r| r.memory.content_hash == stored.content_hash));
}

#[tokio::test]
async fn test_recall_with_after_greater_than_before_is_empty_not_an_error() {
    let engine = TestEngine::new();
    engine.memory_store("something".to_string(), vec![], None, None).await.unwrap();

    let results = engine
        .memory_search(SearchRequest {
            query: None,
            mode: SearchMode::Semantic,
            after: Some(2_000_000_000.0),
            before: Some(1_000_000_000.0),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_yesterday_expression_matches_a_memory_stored_today() {
    let engine = TestEngine::new();
    engine.memory_store("today's note".to_string(), vec![], None, None).await.unwrap();

    // "yesterday" shouldn't match something created today.
    let results = engine
        .memory_search(SearchRequest {
            query: None,
            mode: SearchMode::Semantic,
            time_expr: Some("yesterday".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(results.is_empty());

    let today = engine
        .memory_search(SearchRequest {
            query: None,
            mode: SearchMode::Semantic,
            time_expr: Some("today".to_string()),
            limit: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!today.is_empty());
}
