use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::progress_service::ProgressService;
use super::AppState;
use crate::error::{LearningError, LearningResult, PolicyViolation};
use crate::metrics::CERTIFICATES_ISSUED_TOTAL;
use crate::models::attempt::{AttemptState, EvaluationAttempt};
use crate::models::catalog::Module;
use crate::models::certificate::{
    Certificate, CertificateResponse, EligibilityResponse, VerificationResponse,
};
use crate::store::LearningStore;
use crate::utils::time::{to_millis, Clock};

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Four upper-case alphanumerics from the module slug, padded with `X`.
fn slug_prefix(slug: &str) -> String {
    let mut prefix: String = slug
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(4)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    while prefix.len() < 4 {
        prefix.push('X');
    }
    prefix
}

/// `CERT-<SLUG4>-<YYYYMMDD>-<6 hex>`
pub fn certificate_code(slug: &str, user_id: &str, module_id: &str, issued_at: DateTime<Utc>) -> String {
    let digest = sha256_hex(&format!(
        "{}:{}:{}",
        user_id,
        module_id,
        issued_at.timestamp_millis()
    ));
    format!(
        "CERT-{}-{}-{}",
        slug_prefix(slug),
        issued_at.format("%Y%m%d"),
        digest[..6].to_ascii_uppercase()
    )
}

pub fn verification_hash(
    code: &str,
    user_id: &str,
    module_id: &str,
    score_percent: f64,
    issued_at: DateTime<Utc>,
) -> String {
    sha256_hex(&format!(
        "{}|{}|{}|{:.2}|{}",
        code,
        user_id,
        module_id,
        score_percent,
        issued_at.timestamp_millis()
    ))
}

/// Best completed and passed attempt; ties go to the earlier one.
fn passing_attempt(attempts: &[EvaluationAttempt]) -> Option<&EvaluationAttempt> {
    attempts
        .iter()
        .filter(|a| a.state == AttemptState::Completed && a.passed)
        .reduce(|best, a| if a.score_percent > best.score_percent { a } else { best })
}

pub struct CertificateService {
    store: Arc<dyn LearningStore>,
    clock: Arc<dyn Clock>,
    progress: ProgressService,
}

impl CertificateService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            clock: state.clock.clone(),
            progress: ProgressService::new(state),
        }
    }

    async fn active_module(&self, module_id: &str) -> LearningResult<Module> {
        self.store
            .get_module(module_id)
            .await?
            .filter(|m| m.state.is_active())
            .ok_or_else(|| LearningError::not_found("module", module_id))
    }

    async fn response(&self, certificate: &Certificate) -> LearningResult<CertificateResponse> {
        let module_title = self
            .store
            .get_module(&certificate.module_id)
            .await?
            .map(|m| m.title)
            .unwrap_or_default();
        Ok(CertificateResponse {
            code: certificate.code.clone(),
            module_id: certificate.module_id.clone(),
            module_title,
            score_percent: certificate.score_percent,
            issued_at: certificate.issued_at,
            downloaded: certificate.downloaded,
        })
    }

    pub async fn is_eligible(&self, user_id: &str, module_id: &str) -> LearningResult<bool> {
        Ok(self.progress.recompute(user_id, module_id).await?.certificate_eligible)
    }

    pub async fn eligibility(&self, user_id: &str, module_id: &str) -> LearningResult<EligibilityResponse> {
        let module = self.active_module(module_id).await?;
        let progress = self.progress.recompute(user_id, &module.id).await?;
        let existing = self.store.get_certificate(user_id, &module.id).await?;

        Ok(EligibilityResponse {
            module_id: module.id,
            eligible: progress.certificate_eligible,
            percent_complete: progress.percent_complete,
            evaluation_passed: progress.evaluation_passed,
            certificate_code: existing.map(|c| c.code),
        })
    }

    /// One-time issuance. A second call fails with `AlreadyCertified`
    /// carrying the code of the certificate already on record.
    pub async fn issue(&self, user_id: &str, module_id: &str) -> LearningResult<CertificateResponse> {
        let module = self.active_module(module_id).await?;
        let progress = self.progress.recompute(user_id, &module.id).await?;
        if !progress.certificate_eligible {
            tracing::warn!(
                "Certificate refused: user={} module={} percent={}",
                user_id,
                module.id,
                progress.percent_complete
            );
            return Err(PolicyViolation::NotEligible {
                percent_complete: progress.percent_complete,
            }
            .into());
        }

        let attempts = match self.store.evaluation_for_module(&module.id).await? {
            Some(evaluation) => self.store.attempts_for(user_id, &evaluation.id).await?,
            None => Vec::new(),
        };
        let passing = passing_attempt(&attempts);
        let score_percent = passing.map_or(0.0, |a| a.score_percent);

        let issued_at = to_millis(self.clock.now());
        let code = certificate_code(&module.slug, user_id, &module.id, issued_at);
        let certificate = Certificate {
            id: Certificate::key(user_id, &module.id),
            verification_hash: verification_hash(&code, user_id, &module.id, score_percent, issued_at),
            code,
            user_id: user_id.to_string(),
            module_id: module.id.clone(),
            attempt_id: passing.map(|a| a.id.clone()),
            score_percent,
            issued_at,
            downloaded: false,
            downloaded_at: None,
        };

        self.store.insert_certificate(certificate.clone()).await?;

        CERTIFICATES_ISSUED_TOTAL.inc();
        tracing::info!(
            "Certificate issued: code={} user={} module={}",
            certificate.code,
            user_id,
            module.id
        );

        Ok(CertificateResponse {
            code: certificate.code,
            module_id: module.id,
            module_title: module.title,
            score_percent,
            issued_at,
            downloaded: false,
        })
    }

    pub async fn list_mine(&self, user_id: &str) -> LearningResult<Vec<CertificateResponse>> {
        let certificates = self.store.certificates_for_user(user_id).await?;
        let mut responses = Vec::with_capacity(certificates.len());
        for certificate in &certificates {
            responses.push(self.response(certificate).await?);
        }
        Ok(responses)
    }

    pub async fn mark_downloaded(&self, user_id: &str, code: &str) -> LearningResult<CertificateResponse> {
        let mut certificate = self
            .store
            .certificate_by_code(code)
            .await?
            .filter(|c| c.user_id == user_id)
            .ok_or_else(|| LearningError::not_found("certificate", code))?;

        if !certificate.downloaded {
            certificate.downloaded = true;
            certificate.downloaded_at = Some(to_millis(self.clock.now()));
            self.store.mark_certificate_downloaded(&certificate).await?;
            tracing::debug!("Certificate downloaded: code={}", certificate.code);
        }

        self.response(&certificate).await
    }

    /// Public lookup; unknown codes are reported as not found.
    pub async fn verify(&self, code: &str) -> LearningResult<VerificationResponse> {
        let certificate = self
            .store
            .certificate_by_code(code)
            .await?
            .ok_or_else(|| LearningError::not_found("certificate", code))?;

        let expected = verification_hash(
            &certificate.code,
            &certificate.user_id,
            &certificate.module_id,
            certificate.score_percent,
            certificate.issued_at,
        );
        let module_title = self
            .store
            .get_module(&certificate.module_id)
            .await?
            .map(|m| m.title)
            .unwrap_or_default();

        Ok(VerificationResponse {
            valid: expected == certificate.verification_hash,
            code: certificate.code,
            module_title,
            score_percent: certificate.score_percent,
            issued_at: certificate.issued_at,
            verification_hash: certificate.verification_hash,
        })
    }
}
