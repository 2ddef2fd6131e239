use chrono::Utc;
use hindsight::retrieval::RetrievalRequest;

use crate::harness::{engine_with_dims, seeded_pattern};

#[tokio::test]
async fn diversity_scenario_prefers_the_diverse_candidate() {
    let engine = engine_with_dims(3).await;

    // p1: exact query match, fresh, unused. p3: near-identical to p1.
    // p2: moderately similar but diverse, with a strong usage record.
    let p1 = seeded_pattern("test", "p1", vec![1.0, 0.0, 0.0], 0.5, 0);
    let p3 = seeded_pattern("test", "p3", vec![0.9999, 0.01414, 0.0], 0.5, 0);
    let mut p2 = seeded_pattern("test", "p2", vec![0.66, 0.7513, 0.0], 0.9, 50);
    p2.last_used_at = Some(Utc::now());

    for p in [&p1, &p2, &p3] {
        engine.store().put_pattern(p).await.unwrap();
    }

    let request = RetrievalRequest::new("test", vec![1.0, 0.0, 0.0], 2);
    let out = engine.retrieve_embedded(&request).await.unwrap();

    let ids: Vec<&str> = out.iter().map(|s| s.pattern.id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2"]);
    assert!(out[1].scores.diversity_penalty < 0.8);
}

#[tokio::test]
async fn repeated_retrieval_is_deterministic() {
    let engine = engine_with_dims(3).await;

    for (id, embedding) in [
        ("a", vec![1.0, 0.0, 0.0]),
        ("b", vec![0.8, 0.6, 0.0]),
        ("c", vec![0.0, 1.0, 0.0]),
        ("d", vec![0.5, 0.5, 0.7]),
    ] {
        engine
            .store()
            .put_pattern(&seeded_pattern("ns", id, embedding, 0.5, 3))
            .await
            .unwrap();
    }

    let request = RetrievalRequest::new("ns", vec![1.0, 0.0, 0.0], 3);
    let first = engine.retrieve_embedded(&request).await.unwrap();
    for _ in 0..5 {
        let again = engine.retrieve_embedded(&request).await.unwrap();
        let first_ids: Vec<_> = first.iter().map(|s| &s.pattern.id).collect();
        let again_ids: Vec<_> = again.iter().map(|s| &s.pattern.id).collect();
        assert_eq!(first_ids, again_ids);
    }
}

#[tokio::test]
async fn results_are_strictly_rank_ordered_with_breakdowns() {
    let engine = engine_with_dims(3).await;

    for (id, embedding, confidence, usage) in [
        ("a", vec![1.0, 0.0, 0.0], 0.5, 0),
        ("b", vec![0.7, 0.7, 0.0], 0.9, 20),
        ("c", vec![0.0, 0.0, 1.0], 0.3, 2),
    ] {
        engine
            .store()
            .put_pattern(&seeded_pattern("ns", id, embedding, confidence, usage))
            .await
            .unwrap();
    }

    let request = RetrievalRequest::new("ns", vec![1.0, 0.0, 0.0], 3);
    let out = engine.retrieve_embedded(&request).await.unwrap();
    assert_eq!(out.len(), 3);

    for pair in out.windows(2) {
        assert!(pair[0].scores.final_score >= pair[1].scores.final_score);
    }
    for scored in &out {
        let s = &scored.scores;
        assert!(s.reliability >= 0.0 && s.reliability <= 1.0);
        assert!(s.recency > 0.0 && s.recency <= 1.0);
        assert!(s.similarity >= -1.0 && s.similarity <= 1.0);
        assert!(
            (s.final_score - (s.base_score - 0.10 * s.diversity_penalty)).abs() < 1e-9
        );
    }
}

#[tokio::test]
async fn k_of_zero_and_oversized_k_edge_cases() {
    let engine = engine_with_dims(3).await;
    engine
        .store()
        .put_pattern(&seeded_pattern("ns", "only", vec![1.0, 0.0, 0.0], 0.5, 0))
        .await
        .unwrap();

    let none = engine
        .retrieve_embedded(&RetrievalRequest::new("ns", vec![1.0, 0.0, 0.0], 0))
        .await
        .unwrap();
    assert!(none.is_empty());

    let all = engine
        .retrieve_embedded(&RetrievalRequest::new("ns", vec![1.0, 0.0, 0.0], 50))
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn domain_filter_restricts_candidates() {
    let engine = engine_with_dims(3).await;

    let mut api = seeded_pattern("ns", "api", vec![1.0, 0.0, 0.0], 0.5, 0);
    api.domain = Some("api".into());
    let mut cli = seeded_pattern("ns", "cli", vec![1.0, 0.0, 0.0], 0.5, 0);
    cli.domain = Some("cli".into());
    engine.store().put_pattern(&api).await.unwrap();
    engine.store().put_pattern(&cli).await.unwrap();

    let request =
        RetrievalRequest::new("ns", vec![1.0, 0.0, 0.0], 10).with_domain("api");
    let out = engine.retrieve_embedded(&request).await.unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].pattern.id, "api");
}

#[tokio::test]
async fn query_text_path_embeds_and_matches_seeded_content() {
    let engine = engine_with_dims(16).await;
    let embedder = hindsight::HashEmbedder::new(16);

    let content = "use a circuit breaker around the flaky dependency";
    let embedding = hindsight::Embedder::embed(&embedder, content, "ns")
        .await
        .unwrap();
    engine
        .store()
        .put_pattern(&seeded_pattern("ns", "cb", embedding, 0.5, 0))
        .await
        .unwrap();

    let out = engine.retrieve("ns", content, None, 1).await.unwrap();
    assert_eq!(out.len(), 1);
    assert!(out[0].scores.similarity > 0.99);
}
