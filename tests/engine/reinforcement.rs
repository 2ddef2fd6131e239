use hindsight::types::{TaskTrajectory, Verdict};

use crate::harness::{engine_with_dims, seeded_pattern};

#[tokio::test]
async fn success_sequence_compounds_through_the_facade() {
    let engine = engine_with_dims(3).await;
    let p = seeded_pattern("ns", "p", vec![1.0, 0.0, 0.0], 0.5, 0);
    engine.store().put_pattern(&p).await.unwrap();

    let expected = [0.6, 0.72, 0.864];
    for step in expected {
        let t = TaskTrajectory::new("ns", "task", vec!["p".into()], Verdict::Success, 0.9);
        engine.record_trajectory(&t).await.unwrap();
        engine.reinforce(&t).await.unwrap();

        let current = engine.store().get_pattern("ns", "p").await.unwrap();
        assert!((current.confidence - step).abs() < 1e-9);
    }
}

#[tokio::test]
async fn confidence_stays_inside_bounds_over_many_updates() {
    let engine = engine_with_dims(3).await;
    engine
        .store()
        .put_pattern(&seeded_pattern("ns", "up", vec![1.0, 0.0, 0.0], 0.5, 0))
        .await
        .unwrap();
    engine
        .store()
        .put_pattern(&seeded_pattern("ns", "down", vec![0.0, 1.0, 0.0], 0.5, 0))
        .await
        .unwrap();

    for _ in 0..50 {
        let win = TaskTrajectory::new("ns", "task", vec!["up".into()], Verdict::Success, 0.9);
        let lose = TaskTrajectory::new("ns", "task", vec!["down".into()], Verdict::Failure, 0.9);
        engine.reinforce(&win).await.unwrap();
        engine.reinforce(&lose).await.unwrap();
    }

    let up = engine.store().get_pattern("ns", "up").await.unwrap();
    let down = engine.store().get_pattern("ns", "down").await.unwrap();
    assert!(up.confidence <= 0.95 && up.confidence > 0.94);
    assert!(down.confidence >= 0.05 && down.confidence < 0.06);
}

#[tokio::test]
async fn replayed_trajectory_does_not_double_apply() {
    let engine = engine_with_dims(3).await;
    engine
        .store()
        .put_pattern(&seeded_pattern("ns", "p", vec![1.0, 0.0, 0.0], 0.5, 0))
        .await
        .unwrap();

    let t = TaskTrajectory::new("ns", "task", vec!["p".into()], Verdict::Success, 0.9);
    engine.record_trajectory(&t).await.unwrap();

    let first = engine.reinforce(&t).await.unwrap();
    let second = engine.reinforce(&t).await.unwrap();
    assert_eq!(first.applied, 1);
    assert_eq!(second.applied, 0);
    assert_eq!(second.skipped_duplicate, 1);

    let current = engine.store().get_pattern("ns", "p").await.unwrap();
    assert!((current.confidence - 0.6).abs() < 1e-9);
    assert_eq!(current.usage_count, 1);
    assert_eq!(current.success_count, 1);
}

#[tokio::test]
async fn ordered_pattern_list_reinforces_each_once() {
    let engine = engine_with_dims(3).await;
    for (id, emb) in [
        ("first", vec![1.0, 0.0, 0.0]),
        ("second", vec![0.0, 1.0, 0.0]),
    ] {
        engine
            .store()
            .put_pattern(&seeded_pattern("ns", id, emb, 0.5, 0))
            .await
            .unwrap();
    }

    let t = TaskTrajectory::new(
        "ns",
        "task",
        vec!["first".into(), "second".into()],
        Verdict::Failure,
        0.8,
    );
    let report = engine.reinforce(&t).await.unwrap();
    assert_eq!(report.applied, 2);

    for id in ["first", "second"] {
        let p = engine.store().get_pattern("ns", id).await.unwrap();
        assert!((p.confidence - 0.425).abs() < 1e-9);
        assert_eq!(p.usage_count, 1);
        assert_eq!(p.success_count, 0);
    }
}

#[tokio::test]
async fn deleted_pattern_reinforcement_is_nonfatal() {
    let engine = engine_with_dims(3).await;
    engine
        .store()
        .put_pattern(&seeded_pattern("ns", "alive", vec![1.0, 0.0, 0.0], 0.5, 0))
        .await
        .unwrap();

    let t = TaskTrajectory::new(
        "ns",
        "task",
        vec!["pruned-away".into(), "alive".into()],
        Verdict::Success,
        0.9,
    );
    let report = engine.reinforce(&t).await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped_missing, 1);
}
