//! Shared harness for the HTTP-surface integration tests: wires a real
//! `AppState` against a throwaway SQLite file, with no LLM/TTS providers
//! configured so the matcher's fallback route and the TTS best-effort
//! skip path are exercised deterministically.

use affirm_core::config::Config;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        std::mem::forget(dir);

        let config = Config::load(None, Some(db_path.clone()), Some(0)).unwrap();
        let pool = affirm_common::db::init_database(&db_path).await.unwrap();
        let state = affirm_core::build_state(pool, &config).await;
        let router = affirm_core::build_router(state);

        Self { router }
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        user_id: Option<&str>,
        body: Option<Value>,
    ) -> (axum::http::StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(uid) = user_id {
            builder = builder.header("x-user-id", uid);
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(axum::body::Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(axum::body::Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }
}
