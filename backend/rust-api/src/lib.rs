use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{LearningError, LearningResult};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    let protected = learner_routes().route_layer(middleware::from_fn_with_state(
        app_state.clone(),
        middlewares::auth::auth_middleware,
    ));

    let public = Router::new().route(
        "/certificates/{code}/verify",
        get(handlers::certificates::verify),
    );

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1", public.merge(protected))
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn learner_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Modules and lessons
        .route("/modules", get(handlers::lessons::list_modules))
        .route(
            "/modules/{module_id}/progress",
            get(handlers::progress::module_progress),
        )
        .route(
            "/modules/{module_id}/continue",
            get(handlers::lessons::continue_point),
        )
        .route(
            "/modules/{module_id}/lessons/{lesson_id}",
            get(handlers::lessons::open_lesson),
        )
        .route(
            "/modules/{module_id}/lessons/{lesson_id}/unlocked",
            get(handlers::lessons::lesson_unlocked),
        )
        .route(
            "/modules/{module_id}/lessons/{lesson_id}/view",
            post(handlers::lessons::open_lesson),
        )
        .route(
            "/modules/{module_id}/lessons/{lesson_id}/navigation",
            get(handlers::lessons::navigation),
        )
        // Practice exercises
        .route(
            "/modules/{module_id}/lessons/{lesson_id}/exercises",
            get(handlers::exercises::list),
        )
        .route(
            "/modules/{module_id}/lessons/{lesson_id}/exercises/results",
            get(handlers::exercises::results),
        )
        .route(
            "/modules/{module_id}/lessons/{lesson_id}/exercises/{exercise_id}/attempts",
            post(handlers::exercises::submit),
        )
        // Evaluation
        .route(
            "/modules/{module_id}/evaluation",
            get(handlers::evaluations::overview),
        )
        .route(
            "/modules/{module_id}/evaluation/unlock-status",
            get(handlers::evaluations::unlock_status),
        )
        .route(
            "/modules/{module_id}/evaluation/attempts",
            get(handlers::evaluations::history).post(handlers::evaluations::start_attempt),
        )
        .route(
            "/modules/{module_id}/evaluation/attempts/current",
            get(handlers::evaluations::current_attempt),
        )
        .route(
            "/attempts/{attempt_id}/answers",
            post(handlers::evaluations::submit_answer),
        )
        .route(
            "/attempts/{attempt_id}/finalize",
            post(handlers::evaluations::finalize),
        )
        .route(
            "/attempts/{attempt_id}/result",
            get(handlers::evaluations::result),
        )
        // Rankings
        .route(
            "/rankings/modules/{module_id}",
            get(handlers::ranking::module_ranking),
        )
        .route("/rankings/overview", get(handlers::ranking::overview))
        // Certificates
        .route(
            "/modules/{module_id}/certificate/eligibility",
            get(handlers::certificates::eligibility),
        )
        .route(
            "/modules/{module_id}/certificate",
            post(handlers::certificates::issue),
        )
        .route("/certificates", get(handlers::certificates::list_mine))
        .route(
            "/certificates/{code}/downloaded",
            post(handlers::certificates::mark_downloaded),
        )
}
