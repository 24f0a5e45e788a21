//! Concurrency properties the atomic check-and-increment quota and the
//! session junction layout both depend on (§8): the free-tier quota
//! never over-admits under concurrent requests, and persisted sessions
//! have contiguous, correctly-terminated silence timing.

mod common;

use axum::body::Body;
use common::TestApp;
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn concurrent_custom_session_creation_never_exceeds_the_quota() {
    let app = TestApp::new().await;
    let body = json!({ "title": "Concurrent Mix", "affirmations": ["I stay grounded"] });

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = app.router.clone();
        let body = body.clone();
        handles.push(tokio::spawn(async move {
            let request = axum::http::Request::builder()
                .method("POST")
                .uri("/api/sessions/create")
                .header("x-user-id", "user-race")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap();
            let response = router.oneshot(request).await.unwrap();
            let status = response.status();
            let _ = response.into_body().collect().await.unwrap().to_bytes();
            status
        }));
    }

    let mut ok_count = 0;
    let mut rejected_count = 0;
    for handle in handles {
        match handle.await.unwrap() {
            axum::http::StatusCode::OK => ok_count += 1,
            axum::http::StatusCode::FORBIDDEN => rejected_count += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(ok_count, 3);
    assert_eq!(rejected_count, 5);

    let (_, sub) = app.request("GET", "/api/subscription", Some("user-race"), None).await;
    assert_eq!(sub["customSessionsUsedThisMonth"].as_i64().unwrap(), 3);
}

#[tokio::test]
async fn persisted_session_junctions_are_contiguous_with_zero_silence_on_the_last_segment() {
    let app = TestApp::new().await;
    let body = json!({
        "title": "Three Lines",
        "affirmations": ["First line", "Second line", "Third line"],
    });

    let (status, created) = app.request("POST", "/api/sessions/create", Some("user-contig"), Some(body)).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    let session_id = created["sessionId"].as_str().unwrap();

    let (_, playlist) = app
        .request("GET", &format!("/api/sessions/{session_id}/playlist"), Some("user-contig"), None)
        .await;
    let segments = playlist["affirmations"].as_array().unwrap();
    assert_eq!(segments.len(), 3);
    assert_eq!(segments.last().unwrap()["silenceAfterMs"].as_i64().unwrap(), 0);
    assert!(segments[..segments.len() - 1].iter().all(|s| s["silenceAfterMs"].as_i64().unwrap() > 0));
}
