use chrono::{Duration, Utc};
use hindsight::types::{TaskTrajectory, Verdict};
use hindsight::ConsolidationDisposition;

use crate::harness::{engine_with_dims, seeded_pattern};

#[tokio::test]
async fn merge_conserves_counts_and_keeps_max_confidence() {
    let engine = engine_with_dims(3).await;

    let mut a = seeded_pattern("ns", "a", vec![1.0, 0.0, 0.0], 0.8, 10);
    a.success_count = 7;
    let mut b = seeded_pattern("ns", "b", vec![1.0, 0.001, 0.0], 0.6, 5);
    b.success_count = 1;
    engine.store().put_pattern(&a).await.unwrap();
    engine.store().put_pattern(&b).await.unwrap();

    let output = engine.consolidate("ns").await.unwrap();
    assert_eq!(output.disposition, ConsolidationDisposition::Consolidated);
    assert_eq!(output.report.merged, 1);

    let survivor = engine.store().get_pattern("ns", "a").await.unwrap();
    assert!((survivor.confidence - 0.8).abs() < 1e-9);
    assert_eq!(survivor.usage_count, 15);
    assert_eq!(survivor.success_count, 8);

    // The loser no longer resolves through candidate listing.
    let candidates = engine.store().get_candidates("ns", None, None).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, "a");
}

#[tokio::test]
async fn pruning_precision_cases_from_the_learning_rules() {
    let engine = engine_with_dims(3).await;
    let now = Utc::now();

    // Low confidence but 5 uses: must survive.
    let mut well_used = seeded_pattern("ns", "well-used", vec![1.0, 0.0, 0.0], 0.05, 5);
    well_used.created_at = now - Duration::days(200);
    // Low confidence, no uses, 100 days old: must be pruned.
    let mut stale = seeded_pattern("ns", "stale", vec![0.0, 1.0, 0.0], 0.05, 0);
    stale.created_at = now - Duration::days(100);

    engine.store().put_pattern(&well_used).await.unwrap();
    engine.store().put_pattern(&stale).await.unwrap();

    let output = engine.consolidate("ns").await.unwrap();
    assert_eq!(output.report.pruned, 1);
    assert!(engine.store().get_pattern("ns", "well-used").await.is_ok());
    assert!(engine.store().get_pattern("ns", "stale").await.is_err());
}

#[tokio::test]
async fn contradiction_flags_survive_for_external_review() {
    let engine = engine_with_dims(3).await;

    // cosine 0.8: similar enough to compare, not similar enough to merge.
    engine
        .store()
        .put_pattern(&seeded_pattern("ns", "works", vec![1.0, 0.0, 0.0], 0.7, 4))
        .await
        .unwrap();
    engine
        .store()
        .put_pattern(&seeded_pattern("ns", "breaks", vec![0.8, 0.6, 0.0], 0.7, 4))
        .await
        .unwrap();

    for (id, verdict) in [("works", Verdict::Success), ("breaks", Verdict::Failure)] {
        let t = TaskTrajectory::new("ns", "similar query", vec![id.into()], verdict, 0.9);
        engine.record_trajectory(&t).await.unwrap();
    }

    let output = engine.consolidate("ns").await.unwrap();
    assert_eq!(output.report.contradictions_flagged, 2);

    // Detection, not repair: both patterns still exist and still retrieve.
    for id in ["works", "breaks"] {
        let p = engine.store().get_pattern("ns", id).await.unwrap();
        assert!(p.contradiction_flagged);
    }

    // A second pass does not re-flag.
    let again = engine.consolidate("ns").await.unwrap();
    assert_eq!(again.report.contradictions_flagged, 0);
}

#[tokio::test]
async fn phases_run_in_order_within_one_pass() {
    let engine = engine_with_dims(3).await;
    let now = Utc::now();

    // Duplicates that merge in phase 1...
    let keep = seeded_pattern("ns", "keep", vec![1.0, 0.0, 0.0], 0.8, 6);
    let dup = seeded_pattern("ns", "dup", vec![1.0, 0.001, 0.0], 0.5, 1);
    // ...and a stale pattern pruned in phase 3.
    let mut doomed = seeded_pattern("ns", "doomed", vec![0.0, 0.0, 1.0], 0.05, 0);
    doomed.created_at = now - Duration::days(120);

    for p in [&keep, &dup, &doomed] {
        engine.store().put_pattern(p).await.unwrap();
    }

    let output = engine.consolidate("ns").await.unwrap();
    assert_eq!(output.report.merged, 1);
    assert_eq!(output.report.pruned, 1);

    let remaining = engine.store().get_candidates("ns", None, None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "keep");
    assert_eq!(remaining[0].usage_count, 7);
}

#[tokio::test]
async fn namespaces_consolidate_independently() {
    let engine = engine_with_dims(3).await;

    engine
        .store()
        .put_pattern(&seeded_pattern("left", "a", vec![1.0, 0.0, 0.0], 0.8, 5))
        .await
        .unwrap();
    engine
        .store()
        .put_pattern(&seeded_pattern("left", "b", vec![1.0, 0.001, 0.0], 0.5, 1))
        .await
        .unwrap();
    engine
        .store()
        .put_pattern(&seeded_pattern("right", "c", vec![1.0, 0.0, 0.0], 0.8, 5))
        .await
        .unwrap();

    let left = engine.consolidate("left").await.unwrap();
    assert_eq!(left.report.merged, 1);

    let right = engine.consolidate("right").await.unwrap();
    assert_eq!(right.report.merged, 0);
    assert!(engine.store().get_pattern("right", "c").await.is_ok());
}
