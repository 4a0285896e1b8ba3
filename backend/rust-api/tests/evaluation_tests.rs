use chrono::Duration;
use courseware_api::{
    error::{ConflictKind, LearningError, PolicyViolation},
    models::attempt::{
        AnswerOutcome, AnswerPayload, AttemptState, CurrentAttempt, MatchPair, SubmitAnswerRequest,
    },
    services::evaluation_service::EvaluationService,
};

mod common;

use common::{CSS, HTML, HTML_LESSONS};

fn choice(question_id: &str, option_id: &str) -> SubmitAnswerRequest {
    SubmitAnswerRequest {
        question_id: question_id.to_string(),
        answer: AnswerPayload::Choice {
            option_id: option_id.to_string(),
        },
    }
}

fn pairs(entries: &[(&str, &str)]) -> SubmitAnswerRequest {
    SubmitAnswerRequest {
        question_id: "q-css-pairs".to_string(),
        answer: AnswerPayload::Pairs {
            pairs: entries
                .iter()
                .map(|(option_id, pair_key)| MatchPair {
                    option_id: option_id.to_string(),
                    pair_key: pair_key.to_string(),
                })
                .collect(),
        },
    }
}

/// Starts an HTML attempt, answers one question wrongly and finalizes it.
async fn failed_html_attempt(service: &EvaluationService, user: &str) -> String {
    let started = service.start_attempt(user, HTML).await.unwrap();
    let id = started.attempt.attempt_id.clone();
    service
        .submit_answer(user, &id, choice("q-html-1", "q-html-1-b"))
        .await
        .unwrap();
    let closure = service.finalize(user, &id).await.unwrap();
    assert!(!closure.attempt.passed);
    id
}

#[tokio::test]
async fn evaluation_stays_locked_until_every_lesson_is_seen() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &["les-html-1", "les-html-2"]).await;
    let err = service.start_attempt("ana", HTML).await.unwrap_err();
    match err {
        LearningError::PolicyViolation(PolicyViolation::EvaluationLocked {
            lessons_seen,
            lessons_required,
        }) => {
            assert_eq!(lessons_seen, 2);
            assert_eq!(lessons_required, 3);
        }
        other => panic!("expected EvaluationLocked, got {:?}", other),
    }

    let overview = service.overview("ana", HTML).await.unwrap();
    assert!(!overview.unlocked);
    assert!(!overview.can_attempt);
}

#[tokio::test]
async fn started_attempt_samples_the_pool_without_revealing_answers() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    let started = service.start_attempt("ana", HTML).await.unwrap();
    assert_eq!(started.attempt.attempt_number, 1);
    assert_eq!(started.attempt.state, AttemptState::InProgress);
    assert_eq!(started.questions.len(), 2);
    assert_eq!(
        started.expires_at,
        Some(common::start_time() + Duration::minutes(30))
    );

    let body = serde_json::to_value(&started).unwrap();
    assert!(!body.to_string().contains("is_correct"));
}

#[tokio::test]
async fn concurrent_starts_create_a_single_attempt() {
    let ctx = common::context();
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    let first = EvaluationService::new(&ctx.state);
    let second = EvaluationService::new(&ctx.state);
    let (a, b) = tokio::join!(
        first.start_attempt("ana", HTML),
        second.start_attempt("ana", HTML)
    );

    let (ok, err) = match (a, b) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected exactly one success, got {:?}", other),
    };
    match err {
        LearningError::Conflict(ConflictKind::AttemptInProgress { attempt_id }) => {
            assert_eq!(attempt_id, ok.attempt.attempt_id)
        }
        other => panic!("expected AttemptInProgress, got {:?}", other),
    }

    let history = first.history("ana", HTML).await.unwrap();
    assert_eq!(history.attempts.len(), 1);
}

#[tokio::test]
async fn half_the_points_fails_a_seventy_percent_evaluation() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    let started = service.start_attempt("ana", HTML).await.unwrap();
    let id = started.attempt.attempt_id;

    let outcome = service
        .submit_answer("ana", &id, choice("q-html-1", "q-html-1-a"))
        .await
        .unwrap();
    match outcome {
        AnswerOutcome::Recorded {
            answered_count,
            total_questions,
            remaining_seconds,
            ..
        } => {
            assert_eq!(answered_count, 1);
            assert_eq!(total_questions, 2);
            assert_eq!(remaining_seconds, Some(30 * 60));
        }
        other => panic!("expected a recorded answer, got {:?}", other),
    }
    service
        .submit_answer("ana", &id, choice("q-html-2", "q-html-2-true"))
        .await
        .unwrap();

    ctx.clock.advance(Duration::minutes(4));
    let closure = service.finalize("ana", &id).await.unwrap();
    assert_eq!(closure.attempt.state, AttemptState::Completed);
    assert_eq!(closure.attempt.score_percent, 50.0);
    assert_eq!(closure.attempt.correct_count, 1);
    assert_eq!(closure.attempt.incorrect_count, 1);
    assert_eq!(closure.attempt.elapsed_seconds, Some(240));
    assert!(!closure.attempt.passed);
    assert!(!closure.progress.evaluation_passed);
    assert_eq!(closure.progress.percent_complete, 99.99);
}

#[tokio::test]
async fn resubmitting_replaces_the_previous_answer() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    let id = service.start_attempt("ana", HTML).await.unwrap().attempt.attempt_id;
    service
        .submit_answer("ana", &id, choice("q-html-1", "q-html-1-c"))
        .await
        .unwrap();
    service
        .submit_answer("ana", &id, choice("q-html-1", "q-html-1-a"))
        .await
        .unwrap();
    service
        .submit_answer("ana", &id, choice("q-html-2", "q-html-2-false"))
        .await
        .unwrap();

    let closure = service.finalize("ana", &id).await.unwrap();
    assert_eq!(closure.attempt.score_percent, 100.0);
    assert!(closure.attempt.passed);
    assert_eq!(closure.progress.percent_complete, 100.0);
    assert!(closure.progress.certificate_eligible);

    let err = service.start_attempt("ana", HTML).await.unwrap_err();
    assert!(matches!(
        err,
        LearningError::PolicyViolation(PolicyViolation::AlreadyPassed)
    ));
}

#[tokio::test]
async fn one_wrong_pair_scores_the_whole_question_as_wrong() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", CSS, &["les-css-1"]).await;

    let started = service.start_attempt("ana", CSS).await.unwrap();
    assert!(started.expires_at.is_none());
    let question = &started.questions[0];
    assert_eq!(question.match_keys, vec!["flexbox", "float", "grid"]);

    let id = started.attempt.attempt_id;
    service
        .submit_answer(
            "ana",
            &id,
            pairs(&[
                ("q-css-flex", "flexbox"),
                ("q-css-grid", "float"),
                ("q-css-float", "grid"),
            ]),
        )
        .await
        .unwrap();

    let closure = service.finalize("ana", &id).await.unwrap();
    assert_eq!(closure.attempt.score_percent, 0.0);
    assert!(!closure.attempt.passed);

    let result = service.result("ana", &id).await.unwrap();
    let answer = &result.answers[0];
    assert!(answer.answered);
    assert!(!answer.is_correct);
    assert_eq!(answer.correct_options.len(), 3);
    assert!(answer
        .correct_options
        .iter()
        .any(|o| o.id == "q-css-grid" && o.pair_key.as_deref() == Some("grid")));
}

#[tokio::test]
async fn submitted_pairs_only_need_to_be_right() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", CSS, &["les-css-1"]).await;

    let id = service.start_attempt("ana", CSS).await.unwrap().attempt.attempt_id;
    service
        .submit_answer(
            "ana",
            &id,
            pairs(&[("q-css-flex", "flexbox"), ("q-css-grid", "grid")]),
        )
        .await
        .unwrap();

    let closure = service.finalize("ana", &id).await.unwrap();
    assert_eq!(closure.attempt.score_percent, 100.0);
    assert!(closure.attempt.passed);
}

#[tokio::test]
async fn answers_outside_the_attempt_are_rejected() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    let id = service.start_attempt("ana", HTML).await.unwrap().attempt.attempt_id;
    let err = service
        .submit_answer("ana", &id, pairs(&[("q-css-flex", "flexbox")]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LearningError::Conflict(ConflictKind::QuestionNotInAttempt { .. })
    ));

    // Someone else's attempt does not exist for this user.
    let err = service
        .submit_answer("ben", &id, choice("q-html-1", "q-html-1-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, LearningError::NotFound { .. }));
}

#[tokio::test]
async fn exhausted_attempts_wait_for_the_cooldown() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    for _ in 0..3 {
        failed_html_attempt(&service, "ana").await;
        ctx.clock.advance(Duration::minutes(10));
    }

    // Last attempt ended 10 minutes ago; move to two hours after it.
    ctx.clock.advance(Duration::minutes(110));
    let err = service.start_attempt("ana", HTML).await.unwrap_err();
    match err {
        LearningError::PolicyViolation(PolicyViolation::RetryCooldown {
            remaining_seconds, ..
        }) => assert_eq!(remaining_seconds, 22 * 3600),
        other => panic!("expected RetryCooldown, got {:?}", other),
    }

    let overview = service.overview("ana", HTML).await.unwrap();
    assert!(!overview.can_attempt);
    assert_eq!(overview.finished_count, 3);
    assert_eq!(overview.remaining_attempts, 0);
    assert!(overview.next_available_at.is_some());

    ctx.clock.advance(Duration::hours(22));
    let started = service.start_attempt("ana", HTML).await.unwrap();
    assert_eq!(started.attempt.attempt_number, 4);
}

#[tokio::test]
async fn overdue_attempts_expire_lazily() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    let id = service.start_attempt("ana", HTML).await.unwrap().attempt.attempt_id;
    service
        .submit_answer("ana", &id, choice("q-html-1", "q-html-1-a"))
        .await
        .unwrap();

    ctx.clock.advance(Duration::minutes(31));
    let outcome = service
        .submit_answer("ana", &id, choice("q-html-2", "q-html-2-false"))
        .await
        .unwrap();
    let closure = match outcome {
        AnswerOutcome::Expired(closure) => closure,
        other => panic!("expected expiry, got {:?}", other),
    };
    assert_eq!(closure.attempt.state, AttemptState::Expired);
    assert_eq!(closure.attempt.elapsed_seconds, Some(30 * 60));
    // Only the answered question is scored, and expiry never passes.
    assert_eq!(closure.attempt.score_percent, 100.0);
    assert!(!closure.attempt.passed);
    assert!(!closure.progress.evaluation_passed);

    // The late answer was not stored.
    let result = service.result("ana", &id).await.unwrap();
    assert_eq!(result.answers.iter().filter(|a| a.answered).count(), 1);

    let err = service.finalize("ana", &id).await.unwrap_err();
    assert!(matches!(
        err,
        LearningError::Conflict(ConflictKind::AttemptClosed { .. })
    ));
}

#[tokio::test]
async fn current_attempt_reports_expiry() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    assert!(matches!(
        service.current_attempt("ana", HTML).await.unwrap(),
        CurrentAttempt::None
    ));

    service.start_attempt("ana", HTML).await.unwrap();
    ctx.clock.advance(Duration::minutes(12));
    match service.current_attempt("ana", HTML).await.unwrap() {
        CurrentAttempt::InProgress(view) => {
            assert_eq!(view.elapsed_seconds, 12 * 60);
            assert_eq!(view.remaining_seconds, Some(18 * 60));
            assert_eq!(view.answered_count, 0);
        }
        other => panic!("expected an attempt in progress, got {:?}", other),
    }

    ctx.clock.advance(Duration::minutes(20));
    assert!(matches!(
        service.current_attempt("ana", HTML).await.unwrap(),
        CurrentAttempt::Expired(_)
    ));

    // The expired attempt counts and a new one can start right away.
    let started = service.start_attempt("ana", HTML).await.unwrap();
    assert_eq!(started.attempt.attempt_number, 2);
}

#[tokio::test]
async fn closed_attempts_cannot_be_finalized_again() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    let id = service.start_attempt("ana", HTML).await.unwrap().attempt.attempt_id;
    let err = service.result("ana", &id).await.unwrap_err();
    assert!(matches!(
        err,
        LearningError::Conflict(ConflictKind::AttemptInProgress { .. })
    ));

    service.finalize("ana", &id).await.unwrap();
    let err = service.finalize("ana", &id).await.unwrap_err();
    match err {
        LearningError::Conflict(ConflictKind::AttemptClosed { state, .. }) => {
            assert_eq!(state, "completed")
        }
        other => panic!("expected AttemptClosed, got {:?}", other),
    }

    let err = service
        .submit_answer("ana", &id, choice("q-html-1", "q-html-1-a"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LearningError::Conflict(ConflictKind::AttemptClosed { .. })
    ));
}

#[tokio::test]
async fn history_lists_newest_first() {
    let ctx = common::context();
    let service = EvaluationService::new(&ctx.state);
    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    failed_html_attempt(&service, "ana").await;
    ctx.clock.advance(Duration::minutes(1));
    let id = service.start_attempt("ana", HTML).await.unwrap().attempt.attempt_id;
    service
        .submit_answer("ana", &id, choice("q-html-1", "q-html-1-a"))
        .await
        .unwrap();
    service
        .submit_answer("ana", &id, choice("q-html-2", "q-html-2-false"))
        .await
        .unwrap();
    service.finalize("ana", &id).await.unwrap();

    let history = service.history("ana", HTML).await.unwrap();
    let numbers: Vec<u32> = history.attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![2, 1]);
    assert_eq!(history.finished_count, 2);
    assert_eq!(history.passed_count, 1);
    assert_eq!(history.best_percent, Some(100.0));
}
