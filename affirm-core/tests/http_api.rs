//! End-to-end HTTP-surface tests exercising the scenarios a client
//! player actually drives: generate, list, play, rate, and the
//! subscription/default-session boundaries around them.

mod common;

use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn fresh_guest_generates_a_fallback_session_without_persisting_it() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request("POST", "/api/sessions/generate", None, Some(json!({ "goal": "calm" })))
        .await;

    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(body["goal"], "calm");
    assert_eq!(body["affirmations"].as_array().unwrap().len(), 6);

    // guest sessions are never persisted, so nothing shows up for any user.
    let (_, listed) = app.request("GET", "/api/sessions", Some("guest-would-be-id"), None).await;
    let owned: Vec<_> = listed["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|s| s["isDefault"].as_bool() != Some(true))
        .collect();
    assert!(owned.is_empty());
}

#[tokio::test]
async fn authenticated_user_generates_and_lists_a_persisted_session() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request("POST", "/api/sessions/generate", Some("user-1"), Some(json!({ "goal": "sleep" })))
        .await;
    assert_eq!(status, axum::http::StatusCode::OK);
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    let (_, listed) = app.request("GET", "/api/sessions", Some("user-1"), None).await;
    let owned = listed["sessions"].as_array().unwrap();
    assert!(owned.iter().any(|s| s["sessionId"] == session_id));
}

#[tokio::test]
async fn playlist_total_duration_matches_segment_sum() {
    let app = TestApp::new().await;

    let (_, generated) = app
        .request("POST", "/api/sessions/generate", Some("user-2"), Some(json!({ "goal": "focus" })))
        .await;
    let session_id = generated["sessionId"].as_str().unwrap();

    let (status, playlist) = app
        .request("GET", &format!("/api/sessions/{session_id}/playlist"), Some("user-2"), None)
        .await;
    assert_eq!(status, axum::http::StatusCode::OK);

    let segments = playlist["affirmations"].as_array().unwrap();
    let expected: i64 = segments
        .iter()
        .map(|s| s["durationMs"].as_i64().unwrap() + s["silenceAfterMs"].as_i64().unwrap())
        .sum();
    assert_eq!(playlist["totalDurationMs"].as_i64().unwrap(), expected);

    // no TTS provider is configured in this harness, so every segment
    // surfaces a null audio URL rather than failing the request.
    assert!(segments.iter().all(|s| s["audioUrl"].is_null()));
}

#[tokio::test]
async fn default_session_playlist_has_no_owner_and_carries_layer_metadata() {
    let app = TestApp::new().await;

    let (status, playlist) =
        app.request("GET", "/api/sessions/default-sleep-1/playlist", None, None).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(playlist["affirmations"].as_array().unwrap().len(), 0);
    assert_eq!(playlist["binauralCategory"], "delta");
    assert_eq!(playlist["backgroundNoise"], "rain");
}

#[tokio::test]
async fn default_session_favorite_toggle_is_rejected() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request(
            "PATCH",
            "/api/sessions/default-sleep-1/favorite",
            Some("user-3"),
            Some(json!({ "isFavorite": true })),
        )
        .await;

    assert_eq!(status, axum::http::StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn custom_session_quota_enforces_the_free_tier_limit() {
    let app = TestApp::new().await;
    let body = json!({ "title": "My Mix", "affirmations": ["I am capable"] });

    for _ in 0..3 {
        let (status, _) = app.request("POST", "/api/sessions/create", Some("user-4"), Some(body.clone())).await;
        assert_eq!(status, axum::http::StatusCode::OK);
    }

    let (status, err) = app.request("POST", "/api/sessions/create", Some("user-4"), Some(body)).await;
    assert_eq!(status, axum::http::StatusCode::FORBIDDEN);
    assert_eq!(err["code"], "SUBSCRIPTION_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn verify_purchase_lifts_the_quota_and_is_idempotent() {
    let app = TestApp::new().await;
    let body = json!({ "title": "My Mix", "affirmations": ["I am capable"] });

    for _ in 0..3 {
        app.request("POST", "/api/sessions/create", Some("user-5"), Some(body.clone())).await;
    }

    let purchase = json!({ "productId": "pro-monthly", "platform": "ios" });
    let (status, sub) = app.request("POST", "/api/subscription/verify-purchase", Some("user-5"), Some(purchase.clone())).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(sub["tier"], "pro");

    // replaying the same purchase must not error or double-charge a quota.
    let (status2, sub2) = app.request("POST", "/api/subscription/verify-purchase", Some("user-5"), Some(purchase)).await;
    assert_eq!(status2, axum::http::StatusCode::OK);
    assert_eq!(sub2["tier"], "pro");

    let (status3, _) = app.request("POST", "/api/sessions/create", Some("user-5"), Some(body)).await;
    assert_eq!(status3, axum::http::StatusCode::OK);
}

#[tokio::test]
async fn feedback_rating_is_idempotent_under_repeated_submission() {
    let app = TestApp::new().await;
    let (_, generated) = app
        .request("POST", "/api/sessions/generate", Some("user-6"), Some(json!({ "goal": "manifest" })))
        .await;
    let session_id = generated["sessionId"].as_str().unwrap();

    for _ in 0..2 {
        let (status, ack) = app
            .request(
                "POST",
                &format!("/api/sessions/{session_id}/feedback"),
                Some("user-6"),
                Some(json!({ "rating": 5, "wasReplayed": false })),
            )
            .await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(ack["success"], true);
    }
}

#[tokio::test]
async fn unauthenticated_custom_session_creation_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .request("POST", "/api/sessions/create", None, Some(json!({ "title": "x", "affirmations": ["a"] })))
        .await;
    assert_eq!(status, axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_goal_is_a_validation_error() {
    let app = TestApp::new().await;
    let (status, err) = app
        .request("POST", "/api/sessions/generate", Some("user-7"), Some(json!({ "goal": "nope" })))
        .await;
    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn preferences_round_trip_through_the_api() {
    let app = TestApp::new().await;
    let update = json!({
        "voiceId": "neutral",
        "paceId": "slow",
        "backgroundNoise": "ocean",
        "affirmationSpacingSec": 15,
    });

    let (status, prefs) = app.request("PATCH", "/api/preferences", Some("user-8"), Some(update)).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert_eq!(prefs["paceId"], "slow");

    let (_, fetched) = app.request("GET", "/api/preferences", Some("user-8"), None).await;
    assert_eq!(fetched["backgroundNoise"], "ocean");
    assert_eq!(fetched["affirmationSpacingSec"], 15);
}

#[tokio::test]
async fn invalid_spacing_preset_is_rejected() {
    let app = TestApp::new().await;
    let update = json!({
        "voiceId": "neutral",
        "paceId": "normal",
        "backgroundNoise": "rain",
        "affirmationSpacingSec": 7,
    });
    let (status, err) = app.request("PATCH", "/api/preferences", Some("user-9"), Some(update)).await;
    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "VALIDATION_ERROR");
}
