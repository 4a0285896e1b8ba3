use chrono::Duration;
use courseware_api::{
    error::{ConflictKind, LearningError, PolicyViolation},
    models::attempt::{AnswerPayload, MatchPair, SubmitAnswerRequest},
    services::{certificate_service::CertificateService, evaluation_service::EvaluationService},
};

mod common;

use common::CSS;

/// Completes the CSS module: its lesson, then a perfect attempt.
async fn complete_css(ctx: &common::TestContext, user: &str) -> String {
    ctx.complete_lessons(user, CSS, &["les-css-1"]).await;
    let service = EvaluationService::new(&ctx.state);
    let id = service.start_attempt(user, CSS).await.unwrap().attempt.attempt_id;
    let pairs = [
        ("q-css-flex", "flexbox"),
        ("q-css-grid", "grid"),
        ("q-css-float", "float"),
    ]
    .iter()
    .map(|(option_id, pair_key)| MatchPair {
        option_id: option_id.to_string(),
        pair_key: pair_key.to_string(),
    })
    .collect();
    service
        .submit_answer(
            user,
            &id,
            SubmitAnswerRequest {
                question_id: "q-css-pairs".to_string(),
                answer: AnswerPayload::Pairs { pairs },
            },
        )
        .await
        .unwrap();
    assert!(service.finalize(user, &id).await.unwrap().attempt.passed);
    id
}

#[tokio::test]
async fn certificate_requires_a_passed_evaluation() {
    let ctx = common::context();
    let certificates = CertificateService::new(&ctx.state);

    ctx.complete_lessons("ana", CSS, &["les-css-1"]).await;
    assert!(!certificates.is_eligible("ana", CSS).await.unwrap());

    let err = certificates.issue("ana", CSS).await.unwrap_err();
    match err {
        LearningError::PolicyViolation(PolicyViolation::NotEligible { percent_complete }) => {
            assert_eq!(percent_complete, 99.99)
        }
        other => panic!("expected NotEligible, got {:?}", other),
    }
}

#[tokio::test]
async fn issuance_happens_once() {
    let ctx = common::context();
    let certificates = CertificateService::new(&ctx.state);
    complete_css(&ctx, "ana").await;

    let eligibility = certificates.eligibility("ana", CSS).await.unwrap();
    assert!(eligibility.eligible);
    assert!(eligibility.certificate_code.is_none());

    let issued = certificates.issue("ana", CSS).await.unwrap();
    assert!(issued.code.starts_with("CERT-CSSL-20260302-"));
    assert_eq!(issued.score_percent, 100.0);
    assert_eq!(issued.module_title, "CSS Layout");

    ctx.clock.advance(Duration::days(2));
    let err = certificates.issue("ana", CSS).await.unwrap_err();
    match err {
        LearningError::Conflict(ConflictKind::AlreadyCertified { certificate_code }) => {
            assert_eq!(certificate_code, issued.code)
        }
        other => panic!("expected AlreadyCertified, got {:?}", other),
    }

    let mine = certificates.list_mine("ana").await.unwrap();
    assert_eq!(mine.len(), 1);
    let eligibility = certificates.eligibility("ana", CSS).await.unwrap();
    assert_eq!(eligibility.certificate_code, Some(issued.code));
}

#[tokio::test]
async fn verification_is_public_and_checks_the_hash() {
    let ctx = common::context();
    let certificates = CertificateService::new(&ctx.state);
    complete_css(&ctx, "ana").await;

    let issued = certificates.issue("ana", CSS).await.unwrap();
    let verified = certificates.verify(&issued.code).await.unwrap();
    assert!(verified.valid);
    assert_eq!(verified.code, issued.code);
    assert_eq!(verified.verification_hash.len(), 64);

    let body = serde_json::to_value(&verified).unwrap();
    assert!(body.get("user_id").is_none());

    let err = certificates.verify("CERT-NOPE-20260302-000000").await.unwrap_err();
    assert!(matches!(err, LearningError::NotFound { .. }));
}

#[tokio::test]
async fn only_the_holder_marks_a_download() {
    let ctx = common::context();
    let certificates = CertificateService::new(&ctx.state);
    complete_css(&ctx, "ana").await;
    let issued = certificates.issue("ana", CSS).await.unwrap();

    let err = certificates
        .mark_downloaded("ben", &issued.code)
        .await
        .unwrap_err();
    assert!(matches!(err, LearningError::NotFound { .. }));

    let downloaded = certificates.mark_downloaded("ana", &issued.code).await.unwrap();
    assert!(downloaded.downloaded);
    assert!(certificates.list_mine("ana").await.unwrap()[0].downloaded);
}
