use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    error::LearningResult,
    middlewares::auth::JwtClaims,
    models::certificate::{CertificateResponse, EligibilityResponse, VerificationResponse},
    services::{certificate_service::CertificateService, AppState},
};

pub async fn eligibility(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
) -> LearningResult<Json<EligibilityResponse>> {
    let eligibility = CertificateService::new(&state)
        .eligibility(&claims.sub, &module_id)
        .await?;
    Ok(Json(eligibility))
}

pub async fn issue(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_id): Path<String>,
) -> LearningResult<(StatusCode, Json<CertificateResponse>)> {
    tracing::info!(
        "Certificate requested user_id={} module_id={}",
        claims.sub,
        module_id
    );
    let certificate = CertificateService::new(&state)
        .issue(&claims.sub, &module_id)
        .await?;
    Ok((StatusCode::CREATED, Json(certificate)))
}

pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> LearningResult<Json<Vec<CertificateResponse>>> {
    let certificates = CertificateService::new(&state)
        .list_mine(&claims.sub)
        .await?;
    Ok(Json(certificates))
}

pub async fn mark_downloaded(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(code): Path<String>,
) -> LearningResult<Json<CertificateResponse>> {
    let certificate = CertificateService::new(&state)
        .mark_downloaded(&claims.sub, &code)
        .await?;
    Ok(Json(certificate))
}

/// Public; no token required.
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> LearningResult<Json<VerificationResponse>> {
    let verification = CertificateService::new(&state).verify(&code).await?;
    Ok(Json(verification))
}
