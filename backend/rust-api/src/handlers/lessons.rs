use axum::{
    extract::{Extension, Path, State},
    Json,
};
use std::sync::Arc;

use crate::{
    error::LearningResult,
    middlewares::auth::JwtClaims,
    models::lesson::{
        ContinuePoint, LessonAccessResponse, LessonNavigation, LessonUnlockResponse, ModuleSummary,
    },
    services::{lesson_service::LessonService, AppState},
};

pub async fn list_modules(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> LearningResult<Json<Vec<ModuleSummary>>> {
    tracing::debug!("Listing modules for user_id={}", claims.sub);
    let modules = LessonService::new(&state).list_modules(&claims.sub).await?;
    Ok(Json(modules))
}

pub async fn continue_point(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
) -> LearningResult<Json<ContinuePoint>> {
    let point = LessonService::new(&state)
        .continue_point(&claims.sub, &module_id)
        .await?;
    Ok(Json(point))
}

/// Opening a lesson also records the view; used by both GET and POST .../view.
pub async fn open_lesson(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((module_id, lesson_id)): Path<(String, String)>,
) -> LearningResult<Json<LessonAccessResponse>> {
    tracing::info!(
        "Opening lesson user_id={} module_id={} lesson_id={}",
        claims.sub,
        module_id,
        lesson_id
    );
    let access = LessonService::new(&state)
        .open_lesson(&claims.sub, &module_id, &lesson_id)
        .await?;
    Ok(Json(access))
}

pub async fn lesson_unlocked(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((module_id, lesson_id)): Path<(String, String)>,
) -> LearningResult<Json<LessonUnlockResponse>> {
    let status = LessonService::new(&state)
        .unlock_status(&claims.sub, &module_id, &lesson_id)
        .await?;
    Ok(Json(status))
}

pub async fn navigation(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((module_id, lesson_id)): Path<(String, String)>,
) -> LearningResult<Json<LessonNavigation>> {
    let navigation = LessonService::new(&state)
        .navigation(&claims.sub, &module_id, &lesson_id)
        .await?;
    Ok(Json(navigation))
}
