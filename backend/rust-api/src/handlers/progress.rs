use axum::{
    extract::{Extension, Path, State},
    Json,
};
use std::sync::Arc;

use crate::{
    error::LearningResult,
    middlewares::auth::JwtClaims,
    models::progress::ModuleProgressResponse,
    services::{progress_service::ProgressService, AppState},
};

pub async fn module_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
) -> LearningResult<Json<ModuleProgressResponse>> {
    let progress = ProgressService::new(&state)
        .get_module_progress(&claims.sub, &module_id)
        .await?;
    Ok(Json(ModuleProgressResponse::from(&progress)))
}
