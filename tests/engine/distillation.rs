use hindsight::types::{TaskTrajectory, Verdict};
use hindsight::{DistillationInput, DistillationOutcome, HeuristicJudge, Judge};

use crate::harness::engine_with_dims;

fn trajectory(verdict: Verdict, verdict_confidence: f64) -> TaskTrajectory {
    TaskTrajectory::new(
        "ns",
        "speed up the nightly import",
        vec![],
        verdict,
        verdict_confidence,
    )
}

#[tokio::test]
async fn success_trajectory_distills_a_retrievable_pattern() {
    let engine = engine_with_dims(16).await;

    let rationale = "batch the import in 10k-row chunks inside one transaction";
    let outcome = engine
        .distill(&DistillationInput::new(trajectory(Verdict::Success, 0.9)).with_rationale(rationale))
        .await
        .unwrap();

    let DistillationOutcome::Created(created) = outcome else {
        panic!("expected a created pattern");
    };
    assert!((created.confidence - 0.5).abs() < f64::EPSILON);
    assert_eq!(created.usage_count, 0);

    // The fresh pattern is immediately retrievable by its own content.
    let out = engine.retrieve("ns", rationale, None, 1).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].pattern.id, created.id);
}

#[tokio::test]
async fn failure_trajectory_never_distills() {
    let engine = engine_with_dims(16).await;

    let outcome = engine
        .distill(&DistillationInput::new(trajectory(Verdict::Failure, 1.0)))
        .await
        .unwrap();
    assert!(matches!(outcome, DistillationOutcome::Skipped(_)));
    assert_eq!(engine.store().count_patterns("ns").await.unwrap(), 0);
}

#[tokio::test]
async fn partial_distills_only_at_high_judge_confidence() {
    let engine = engine_with_dims(16).await;

    let low = engine
        .distill(&DistillationInput::new(trajectory(Verdict::Partial, 0.5)))
        .await
        .unwrap();
    assert!(matches!(low, DistillationOutcome::Skipped(_)));

    let high = engine
        .distill(&DistillationInput::new(trajectory(Verdict::Partial, 0.7)))
        .await
        .unwrap();
    assert!(matches!(high, DistillationOutcome::Created(_)));
}

#[tokio::test]
async fn judged_outcome_feeds_the_distillation_decision() {
    let engine = engine_with_dims(16).await;
    let judge = HeuristicJudge;

    let query = "make the webhook handler reliable";
    let outcome = judge
        .judge(query, "retries added, all integration checks passed, task completed")
        .await
        .unwrap();
    assert_eq!(outcome.verdict, Verdict::Success);

    let trajectory =
        TaskTrajectory::new("ns", query, vec![], outcome.verdict, outcome.confidence);
    engine.record_trajectory(&trajectory).await.unwrap();

    let distilled = engine
        .distill(
            &DistillationInput::new(trajectory)
                .with_rationale("wrap webhook delivery in bounded retries with jitter"),
        )
        .await
        .unwrap();
    assert!(matches!(distilled, DistillationOutcome::Created(_)));
}

#[tokio::test]
async fn secrets_never_reach_the_store() {
    let engine = engine_with_dims(16).await;

    let outcome = engine
        .distill(
            &DistillationInput::new(trajectory(Verdict::Success, 0.9))
                .with_rationale("auth with sk-prod9999 as admin@internal.example then retry"),
        )
        .await
        .unwrap();

    let DistillationOutcome::Created(created) = outcome else {
        panic!("expected a created pattern");
    };
    let stored = engine.store().get_pattern("ns", &created.id).await.unwrap();
    assert!(!stored.content.contains("sk-prod9999"));
    assert!(!stored.content.contains("admin@internal.example"));
}
