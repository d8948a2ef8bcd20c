//! Spec §8 scenario 2: semantic search surfaces both related memories;
//! exact search only surfaces the literal substring match.

mod common;

use common::TestEngine;
use mnemo_core::{SearchMode, SearchRequest};

#[tokio::test]
async fn test_semantic_search_returns_both_related_memories() {
    let engine = TestEngine::new();
    engine
        .memory_store("Implemented OAuth 2.1 with PKCE".to_string(), vec!["auth".to_string()], None, None)
        .await
        .unwrap();
    engine
        .memory_store(
            "Added JWT validation middleware".to_string(),
            vec!["auth".to_string()],
            None,
            None,
        )
        .await
        .unwrap();

    let results = engine
        .memory_search(SearchRequest {
            query: Some("authentication".to_string()),
            mode: SearchMode::Semantic,
            limit: 5,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    for window in results.windows(2) {
        assert!(window[0].relevance >= window[1].relevance);
    }
}

#[tokio::test]
async fn test_exact_search_returns_only_the_literal_match() {
    let engine = TestEngine::new();
    engine
        .memory_store("Implemented OAuth 2.1 with PKCE".to_string(), vec!["auth".to_string()], None, None)
        .await
        .unwrap();
    engine
        .memory_store(
            "Added JWT validation middleware".to_string(),
            vec!["auth".to_string()],
            None,
            None,
        )
        .await
        .unwrap();

    let results = engine
        .memory_search(SearchRequest {
            query: Some("JWT validation".to_string()),
            mode: SearchMode::Exact,
            limit: 5,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].memory.content.contains("JWT validation"));
}

#[tokio::test]
async fn test_empty_query_in_semantic_mode_is_invalid_argument() {
    let engine = TestEngine::new();
    engine.memory_store("some content".to_string(), vec![], None, None).await.unwrap();

    let err = engine
        .memory_search(SearchRequest {
            query: Some(String::new()),
            mode: SearchMode::Semantic,
            limit: 5,
            ..Default::default()
        })
        .await
        .expect_err("empty query must be rejected");
    assert!(matches!(err, mnemo_core::EngineError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_hybrid_search_fuses_semantic_and_keyword_hits() {
    let engine = TestEngine::new();
    engine.memory_store("rust ownership and borrowing".to_string(), vec![], None, None).await.unwrap();
    engine.memory_store("garbage collection in java".to_string(), vec![], None, None).await.unwrap();

    let results = engine
        .memory_search(SearchRequest {
            query: Some("rust ownership".to_string()),
            mode: SearchMode::Hybrid,
            limit: 5,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results[0].memory.content.contains("rust"));
}
