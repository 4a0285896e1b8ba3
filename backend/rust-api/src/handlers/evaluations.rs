use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    error::LearningResult,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{
        attempt::{
            AnswerOutcome, AttemptClosure, AttemptHistory, AttemptResultDetail, CurrentAttempt,
            EvaluationOverview, StartedAttempt, SubmitAnswerRequest,
        },
        lesson::EvaluationUnlockStatus,
    },
    services::{evaluation_service::EvaluationService, lesson_service::LessonService, AppState},
};

pub async fn overview(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
) -> LearningResult<Json<EvaluationOverview>> {
    let overview = EvaluationService::new(&state)
        .overview(&claims.sub, &module_id)
        .await?;
    Ok(Json(overview))
}

pub async fn unlock_status(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
) -> LearningResult<Json<EvaluationUnlockStatus>> {
    let status = LessonService::new(&state)
        .evaluation_unlock_status(&claims.sub, &module_id)
        .await?;
    Ok(Json(status))
}

pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
) -> LearningResult<(StatusCode, Json<StartedAttempt>)> {
    tracing::info!(
        "Starting attempt for user_id={} module_id={}",
        claims.sub,
        module_id
    );
    let started = EvaluationService::new(&state)
        .start_attempt(&claims.sub, &module_id)
        .await?;
    Ok((StatusCode::CREATED, Json(started)))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
) -> LearningResult<Json<AttemptHistory>> {
    let history = EvaluationService::new(&state)
        .history(&claims.sub, &module_id)
        .await?;
    Ok(Json(history))
}

pub async fn current_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
) -> LearningResult<Json<CurrentAttempt>> {
    let current = EvaluationService::new(&state)
        .current_attempt(&claims.sub, &module_id)
        .await?;
    Ok(Json(current))
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> LearningResult<Json<AnswerOutcome>> {
    tracing::debug!(
        "Submitting answer attempt_id={} question_id={}",
        attempt_id,
        req.question_id
    );
    let outcome = EvaluationService::new(&state)
        .submit_answer(&claims.sub, &attempt_id, req)
        .await?;
    Ok(Json(outcome))
}

pub async fn finalize(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> LearningResult<Json<AttemptClosure>> {
    tracing::info!("Finalizing attempt_id={} user_id={}", attempt_id, claims.sub);
    let closure = EvaluationService::new(&state)
        .finalize(&claims.sub, &attempt_id)
        .await?;
    Ok(Json(closure))
}

pub async fn result(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(attempt_id): Path<String>,
) -> LearningResult<Json<AttemptResultDetail>> {
    let detail = EvaluationService::new(&state)
        .result(&claims.sub, &attempt_id)
        .await?;
    Ok(Json(detail))
}
