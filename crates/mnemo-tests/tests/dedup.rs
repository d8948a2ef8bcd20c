//! Spec §8 scenario 1: storing the same content under a differently
//! ordered tag set is a duplicate, not a second memory.

mod common;

use common::TestEngine;

#[tokio::test]
async fn test_same_content_different_tag_order_is_a_duplicate() {
    let engine = TestEngine::new();

    let first = engine
        .memory_store("hello".to_string(), vec!["a".to_string(), "b".to_string()], None, None)
        .await
        .unwrap();
    assert!(first.created);

    let second = engine
        .memory_store("hello".to_string(), vec!["b".to_string(), "a".to_string()], None, None)
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.content_hash, first.content_hash);
    assert_eq!(second.message, "duplicate");
}

#[tokio::test]
async fn test_store_then_delete_leaves_count_unchanged() {
    let engine = TestEngine::new();
    let before = engine.memory_stats().await.unwrap().count;

    let stored = engine.memory_store("ephemeral".to_string(), vec![], None, None).await.unwrap();
    let deleted = engine
        .memory_delete(Some(stored.content_hash), None, Default::default(), None, None, false)
        .await
        .unwrap();
    assert_eq!(deleted.count, 1);

    let after = engine.memory_stats().await.unwrap().count;
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_cleanup_collapses_same_normalized_content_across_tag_sets() {
    let engine = TestEngine::new();
    engine.memory_store("same text   ".to_string(), vec!["x".to_string()], None, None).await.unwrap();
    engine.memory_store("same text\n".to_string(), vec!["y".to_string()], None, None).await.unwrap();
    engine.memory_store("same text".to_string(), vec!["z".to_string()], None, None).await.unwrap();

    let removed = engine.memory_cleanup().await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(engine.memory_stats().await.unwrap().count, 1);
}
