#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use courseware_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    services::{lesson_service::LessonService, AppState},
    store::{CatalogSeed, InMemoryStore, LearningStore},
    utils::time::{Clock, ManualClock},
};
use http_body_util::BodyExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const HTML: &str = "mod-html";
pub const CSS: &str = "mod-css";
pub const HTML_LESSONS: [&str; 3] = ["les-html-1", "les-html-2", "les-html-3"];

pub struct TestContext {
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-02T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn catalog() -> CatalogSeed {
    CatalogSeed::from_path(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/catalog.json"))
        .expect("fixture catalog must parse")
}

pub fn context() -> TestContext {
    context_with(Config::for_tests(), 42)
}

pub fn context_with(config: Config, seed: u64) -> TestContext {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(InMemoryStore::with_catalog(catalog()));
    let clock = Arc::new(ManualClock::new(start_time()));
    let state = AppState::with_parts(
        config,
        store.clone() as Arc<dyn LearningStore>,
        clock.clone() as Arc<dyn Clock>,
        StdRng::seed_from_u64(seed),
    );

    TestContext {
        state: Arc::new(state),
        store,
        clock,
    }
}

impl TestContext {
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn token(&self, user_id: &str) -> String {
        JwtService::new(&self.state.config.jwt_secret)
            .generate_token(&JwtClaims::new(user_id, "student", 3600))
            .unwrap()
    }

    /// Opens every active lesson of the module in order.
    pub async fn complete_lessons(&self, user_id: &str, module_id: &str, lessons: &[&str]) {
        let service = LessonService::new(&self.state);
        for lesson in lessons {
            service
                .open_lesson(user_id, module_id, lesson)
                .await
                .unwrap_or_else(|e| panic!("opening {} failed: {}", lesson, e));
        }
    }
}

pub async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}
