//! Spec §8 scenario 6: a consolidation report is only written once every
//! phase of a pass completes; a rejected pass leaves `reports_dir`
//! untouched, and a completed pass writes exactly one new file whose
//! `counts.scanned` matches the candidate set.

mod common;

use common::TestEngine;
use mnemo_core::{ConsolidateAction, ConsolidateOutcome, Horizon};

fn report_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let reports = dir.join("reports");
    if !reports.exists() {
        return Vec::new();
    }
    std::fs::read_dir(reports)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[tokio::test]
async fn test_a_rejected_run_writes_no_report() {
    let engine = TestEngine::with_config(|config| {
        config.consolidation.enabled = false;
    });
    engine.memory_store("irrelevant".to_string(), vec![], None, None).await.unwrap();

    let err = engine
        .memory_consolidate(ConsolidateAction::Run, Some(Horizon::Daily), true)
        .await
        .expect_err("consolidation.enabled = false must reject a run");
    assert!(matches!(err, mnemo_core::EngineError::InvalidArgument(_)));
    assert!(report_files(engine.data_dir()).is_empty());
}

#[tokio::test]
async fn test_a_completed_run_writes_exactly_one_report_matching_the_candidate_count() {
    let engine = TestEngine::new();
    for i in 0..5 {
        engine.memory_store(format!("candidate memory {i}"), vec![], None, None).await.unwrap();
    }
    assert!(report_files(engine.data_dir()).is_empty());

    let outcome = engine
        .memory_consolidate(ConsolidateAction::Run, Some(Horizon::Daily), true)
        .await
        .unwrap();
    let ConsolidateOutcome::Report(Some(report)) = outcome else {
        panic!("immediate run must return a report")
    };
    assert_eq!(report.counts.scanned, 5);

    let files = report_files(engine.data_dir());
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn test_rerunning_the_same_horizon_appends_a_second_distinct_report() {
    let engine = TestEngine::new();
    engine.memory_store("one".to_string(), vec![], None, None).await.unwrap();

    engine.memory_consolidate(ConsolidateAction::Run, Some(Horizon::Daily), true).await.unwrap();
    // `completed_at` is second-resolution RFC3339, so two immediate runs in
    // the same wall-clock second would otherwise collide on filename.
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    engine.memory_consolidate(ConsolidateAction::Run, Some(Horizon::Daily), true).await.unwrap();

    let files = report_files(engine.data_dir());
    assert_eq!(files.len(), 2);
}
