//! Association graph operations (`memory_graph`) and the consolidation
//! idempotence law: running the same horizon twice in a row over an
//! unchanged candidate set yields the same association set and
//! `quality_score`, modulo `last_reinforced_at`/timestamp bookkeeping.

mod common;

use common::TestEngine;
use mnemo_core::{AssociationReason, ConsolidateAction, GraphAction, Horizon, MemoryStore};

#[tokio::test]
async fn test_connected_reports_a_co_tag_association_after_consolidation() {
    let engine = TestEngine::new();
    let a = engine
        .memory_store("first note".to_string(), vec!["x".to_string(), "y".to_string()], None, None)
        .await
        .unwrap();
    let b = engine
        .memory_store("second note".to_string(), vec!["x".to_string(), "y".to_string()], None, None)
        .await
        .unwrap();

    engine
        .memory_consolidate(ConsolidateAction::Run, Some(Horizon::Daily), true)
        .await
        .unwrap();

    let outcome = engine
        .memory_graph(GraphAction::Connected, Some(a.content_hash.clone()), None, None, 1, 1, 1)
        .await
        .unwrap();
    let mnemo_core::GraphOutcome::Connected(assocs) = outcome else { panic!("expected Connected") };
    assert!(assocs
        .iter()
        .any(|assoc| assoc.involves(&b.content_hash) && assoc.reason == AssociationReason::CoTag));
}

#[tokio::test]
async fn test_path_walks_a_manually_linked_chain() {
    let engine = TestEngine::new();
    let a = engine.memory_store("a".to_string(), vec![], None, None).await.unwrap();
    let b = engine.memory_store("b".to_string(), vec![], None, None).await.unwrap();
    let c = engine.memory_store("c".to_string(), vec![], None, None).await.unwrap();

    engine
        .store()
        .upsert_association(&a.content_hash, &b.content_hash, 0.9, AssociationReason::Manual)
        .await
        .unwrap();
    engine
        .store()
        .upsert_association(&b.content_hash, &c.content_hash, 0.9, AssociationReason::Manual)
        .await
        .unwrap();

    let outcome = engine
        .memory_graph(
            GraphAction::Path,
            None,
            Some(a.content_hash.clone()),
            Some(c.content_hash.clone()),
            1,
            5,
            1,
        )
        .await
        .unwrap();
    let mnemo_core::GraphOutcome::Path(path) = outcome else { panic!("expected Path") };
    let path = path.expect("a is reachable from c through b");
    assert_eq!(path.first(), Some(&a.content_hash));
    assert_eq!(path.last(), Some(&c.content_hash));
    assert!(path.contains(&b.content_hash));
}

#[tokio::test]
async fn test_subgraph_radius_one_includes_both_neighbors_of_the_hub() {
    let engine = TestEngine::new();
    let a = engine.memory_store("a".to_string(), vec![], None, None).await.unwrap();
    let b = engine.memory_store("b".to_string(), vec![], None, None).await.unwrap();
    let c = engine.memory_store("c".to_string(), vec![], None, None).await.unwrap();

    engine
        .store()
        .upsert_association(&a.content_hash, &b.content_hash, 0.9, AssociationReason::Manual)
        .await
        .unwrap();
    engine
        .store()
        .upsert_association(&b.content_hash, &c.content_hash, 0.9, AssociationReason::Manual)
        .await
        .unwrap();

    let outcome = engine
        .memory_graph(GraphAction::Subgraph, Some(b.content_hash.clone()), None, None, 1, 1, 1)
        .await
        .unwrap();
    let mnemo_core::GraphOutcome::Subgraph { nodes, edges } = outcome else { panic!("expected Subgraph") };
    assert!(nodes.contains(&a.content_hash));
    assert!(nodes.contains(&b.content_hash));
    assert!(nodes.contains(&c.content_hash));
    assert_eq!(edges.len(), 2);
}

#[tokio::test]
async fn test_consolidating_the_same_window_twice_is_idempotent() {
    let engine = TestEngine::new();
    let a = engine
        .memory_store("repeated pass note one".to_string(), vec!["p".to_string(), "q".to_string()], None, None)
        .await
        .unwrap();
    let b = engine
        .memory_store("repeated pass note two".to_string(), vec!["p".to_string(), "q".to_string()], None, None)
        .await
        .unwrap();

    engine
        .memory_consolidate(ConsolidateAction::Run, Some(Horizon::Daily), true)
        .await
        .unwrap();
    let first_pass = engine.store().get_by_hash(&a.content_hash).await.unwrap().unwrap();
    let first_assocs = engine.store().list_associations(&a.content_hash, 1).await.unwrap();

    engine
        .memory_consolidate(ConsolidateAction::Run, Some(Horizon::Daily), true)
        .await
        .unwrap();
    let second_pass = engine.store().get_by_hash(&a.content_hash).await.unwrap().unwrap();
    let second_assocs = engine.store().list_associations(&a.content_hash, 1).await.unwrap();

    // Same unordered pair set, same reasons — `upsert_association` coalesces
    // the rerun into the same row rather than duplicating it.
    assert_eq!(first_assocs.len(), second_assocs.len());
    for assoc in &second_assocs {
        assert!(assoc.involves(&b.content_hash));
        assert_eq!(assoc.reason, AssociationReason::CoTag);
    }
    // quality_score is only refreshed once per `quality_refresh_days`
    // window, so a second immediate pass leaves it untouched.
    assert_eq!(first_pass.quality_score(), second_pass.quality_score());
}
