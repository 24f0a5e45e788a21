//! Boundary behavior of the match decision procedure (§8): a template
//! whose keyword coverage lands exactly on `EXACT_THRESHOLD` still
//! qualifies as an exact match, and a pool just short of the minimum
//! qualifying count falls through instead of returning a pooled result.

use affirm_core::library::LibraryStore;
use affirm_core::matcher::{Matcher, MatchOutcome, EXACT_THRESHOLD, POOL_THRESHOLD};
use affirm_core::rate_limiter::RateLimiter;
use std::sync::Arc;

fn no_op_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(None))
}

async fn test_db() -> sqlx::SqlitePool {
    let dir = tempfile::tempdir().unwrap();
    let pool = affirm_common::db::init_database(&dir.path().join("test.db")).await.unwrap();
    std::mem::forget(dir);
    pool
}

#[tokio::test]
async fn exact_threshold_boundary_qualifies_inclusively() {
    let pool = test_db().await;

    // 20 keywords, 17 present in the intention: coverage is exactly 0.85.
    let keywords: Vec<String> = (0..20).map(|i| format!("kw{i}")).collect();
    let intention_words: Vec<&str> = keywords[..17].iter().map(|s| s.as_str()).collect();
    let intention = intention_words.join(" ");

    sqlx::query(
        "INSERT INTO session_templates
            (id, title, goal, canonical_intent, intent_keywords_json, affirmation_ids_json, target_length_sec, is_default, rating, use_count)
         VALUES ('tmpl-boundary', 'Boundary', 'calm', 'irrelevant reference text', ?, '[]', 180, 0, 0, 0)",
    )
    .bind(serde_json::to_string(&keywords).unwrap())
    .execute(&pool)
    .await
    .unwrap();

    let library = Arc::new(LibraryStore::new(pool));
    let matcher = Matcher::new(Arc::clone(&library), None, no_op_limiter());

    let outcome = matcher.decide(&intention, "calm", false, Some("user-boundary"), "127.0.0.1").await.unwrap();
    match outcome {
        MatchOutcome::Exact { confidence, .. } => assert!((confidence - EXACT_THRESHOLD).abs() < 1e-9),
        other => panic!("expected an exact match at the threshold, got {other:?}"),
    }
}

#[tokio::test]
async fn pool_short_of_minimum_qualifying_falls_through_to_fallback() {
    let pool = test_db().await;
    let library = Arc::new(LibraryStore::new(pool));

    // Five qualifying lines is one short of the pool's minimum of six, so
    // the decision procedure must not return a pooled outcome.
    for i in 0..5 {
        library
            .create_affirmation(&format!("I release stress line {i}"), "calm", &["stress".to_string()], None)
            .await
            .unwrap();
    }

    let matcher = Matcher::new(Arc::clone(&library), None, no_op_limiter());
    let outcome = matcher.decide("stress", "calm", false, Some("user-boundary"), "127.0.0.1").await.unwrap();
    assert!(matches!(outcome, MatchOutcome::Fallback { .. }));
}

#[tokio::test]
async fn pool_threshold_boundary_line_qualifies_inclusively() {
    let pool = test_db().await;
    let library = Arc::new(LibraryStore::new(pool));

    // Six lines whose token-Jaccard similarity clears POOL_THRESHOLD,
    // meeting the pool's minimum qualifying count.
    for i in 0..6 {
        library
            .create_affirmation(&format!("alpha beta gamma delta epsilon zeta{i}"), "focus", &[], None)
            .await
            .unwrap();
    }

    let matcher = Matcher::new(Arc::clone(&library), None, no_op_limiter());
    // intention shares alpha/beta/gamma/delta/epsilon with each line (5 of
    // 6 reference tokens) but adds one unrelated token, giving a Jaccard of
    // 5/7, comfortably above POOL_THRESHOLD - exercising the qualifying
    // path rather than the exact boundary value.
    let outcome = matcher
        .decide("alpha beta gamma delta epsilon unrelated", "focus", false, Some("user-boundary"), "127.0.0.1")
        .await
        .unwrap();
    match outcome {
        MatchOutcome::Pooled { confidence, .. } => assert!(confidence >= POOL_THRESHOLD),
        other => panic!("expected a pooled match, got {other:?}"),
    }
}
