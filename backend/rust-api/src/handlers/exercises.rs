use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    error::LearningResult,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{
        attempt::AnswerPayload,
        exercise::{ExerciseFeedback, ExerciseView, LessonExerciseResults},
    },
    services::{exercise_service::ExerciseService, AppState},
};

#[derive(Debug, Deserialize)]
pub struct SubmitExerciseRequest {
    pub answer: AnswerPayload,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((module_id, lesson_id)): Path<(String, String)>,
) -> LearningResult<Json<Vec<ExerciseView>>> {
    let exercises = ExerciseService::new(&state)
        .list(&claims.sub, &module_id, &lesson_id)
        .await?;
    Ok(Json(exercises))
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((module_id, lesson_id, exercise_id)): Path<(String, String, String)>,
    AppJson(req): AppJson<SubmitExerciseRequest>,
) -> LearningResult<Json<ExerciseFeedback>> {
    tracing::debug!(
        "Exercise submission user_id={} exercise_id={}",
        claims.sub,
        exercise_id
    );
    let feedback = ExerciseService::new(&state)
        .submit(&claims.sub, &module_id, &lesson_id, &exercise_id, req.answer)
        .await?;
    Ok(Json(feedback))
}

pub async fn results(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((module_id, lesson_id)): Path<(String, String)>,
) -> LearningResult<Json<LessonExerciseResults>> {
    let results = ExerciseService::new(&state)
        .results(&claims.sub, &module_id, &lesson_id)
        .await?;
    Ok(Json(results))
}
