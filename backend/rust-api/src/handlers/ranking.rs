use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::{LearningError, LearningResult},
    middlewares::auth::JwtClaims,
    models::ranking::{ModuleRanking, RankingOverview},
    services::{
        ranking_service::{RankingService, MAX_RANKING_LIMIT},
        AppState,
    },
};

#[derive(Debug, Deserialize, Validate)]
pub struct RankingQuery {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<usize>,
}

impl RankingQuery {
    fn resolve(&self, default_limit: usize) -> LearningResult<usize> {
        self.validate()
            .map_err(|e| LearningError::Validation(e.to_string()))?;
        Ok(self.limit.unwrap_or(default_limit).min(MAX_RANKING_LIMIT))
    }
}

pub async fn module_ranking(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
    Query(query): Query<RankingQuery>,
) -> LearningResult<Json<ModuleRanking>> {
    let limit = query.resolve(state.config.ranking_default_limit)?;
    let ranking = RankingService::new(&state)
        .module_ranking(&claims.sub, &module_id, limit)
        .await?;
    Ok(Json(ranking))
}

pub async fn overview(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<RankingQuery>,
) -> LearningResult<Json<RankingOverview>> {
    let limit = query.resolve(state.config.ranking_default_limit)?;
    let overview = RankingService::new(&state)
        .overview(&claims.sub, limit)
        .await?;
    Ok(Json(overview))
}
