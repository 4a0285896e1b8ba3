use chrono::Duration;
use courseware_api::{
    models::attempt::{AnswerPayload, SubmitAnswerRequest},
    services::{
        evaluation_service::EvaluationService,
        progress_service::{ProgressService, UNPASSED_CEILING},
    },
    store::LearningStore,
};

mod common;

use common::{HTML, HTML_LESSONS};

async fn pass_html(ctx: &common::TestContext, user: &str) {
    let service = EvaluationService::new(&ctx.state);
    let id = service.start_attempt(user, HTML).await.unwrap().attempt.attempt_id;
    for (question, option) in [("q-html-1", "q-html-1-a"), ("q-html-2", "q-html-2-false")] {
        service
            .submit_answer(
                user,
                &id,
                SubmitAnswerRequest {
                    question_id: question.to_string(),
                    answer: AnswerPayload::Choice {
                        option_id: option.to_string(),
                    },
                },
            )
            .await
            .unwrap();
    }
    assert!(service.finalize(user, &id).await.unwrap().attempt.passed);
}

#[tokio::test]
async fn percent_tracks_seen_lessons() {
    let ctx = common::context();
    let progress = ProgressService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &["les-html-1", "les-html-2"]).await;
    let row = progress.get_module_progress("ana", HTML).await.unwrap();

    assert_eq!(row.lessons_seen, 2);
    assert_eq!(row.total_lessons, 3);
    assert_eq!(row.percent_complete, 66.67);
    assert_eq!(row.last_lesson_seen.as_deref(), Some("les-html-2"));
    assert!(!row.evaluation_passed);
    assert!(!row.certificate_eligible);
}

#[tokio::test]
async fn module_without_lessons_stays_at_zero() {
    let ctx = common::context();
    let progress = ProgressService::new(&ctx.state);

    let row = progress.recompute("ana", "mod-git").await.unwrap();
    assert_eq!(row.total_lessons, 0);
    assert_eq!(row.percent_complete, 0.0);
    assert!(!row.certificate_eligible);
}

#[tokio::test]
async fn recompute_is_idempotent() {
    let ctx = common::context();
    let progress = ProgressService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &["les-html-1"]).await;
    let first = progress.recompute("ana", HTML).await.unwrap();
    ctx.clock.advance(Duration::hours(3));
    let second = progress.recompute("ana", HTML).await.unwrap();

    assert_eq!(first, second);
    let stored = ctx.store.get_module_progress("ana", HTML).await.unwrap();
    assert_eq!(stored.as_ref(), Some(&second));
}

#[tokio::test]
async fn every_lesson_without_a_pass_stays_below_one_hundred() {
    let ctx = common::context();
    let progress = ProgressService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;
    let row = progress.recompute("ana", HTML).await.unwrap();

    assert_eq!(row.lessons_seen, 3);
    assert_eq!(row.percent_complete, UNPASSED_CEILING);
    assert!(!row.certificate_eligible);
}

#[tokio::test]
async fn passing_the_evaluation_completes_the_module() {
    let ctx = common::context();
    let progress = ProgressService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;
    pass_html(&ctx, "ana").await;

    let row = progress.get_module_progress("ana", HTML).await.unwrap();
    assert_eq!(row.percent_complete, 100.0);
    assert!(row.evaluation_passed);
    assert!(row.certificate_eligible);

    let ranking = ctx.store.get_ranking(HTML, "ana").await.unwrap().unwrap();
    assert_eq!(ranking.progress_percent, 100.0);
}

#[tokio::test]
async fn ranking_row_follows_each_progress_change() {
    let ctx = common::context();

    ctx.complete_lessons("ana", HTML, &["les-html-1"]).await;
    let first = ctx.store.get_ranking(HTML, "ana").await.unwrap().unwrap();
    assert_eq!(first.progress_percent, 33.33);
    assert_eq!(first.last_updated, common::start_time());

    ctx.clock.advance(Duration::minutes(20));
    ctx.complete_lessons("ana", HTML, &["les-html-1"]).await;
    let unchanged = ctx.store.get_ranking(HTML, "ana").await.unwrap().unwrap();
    assert_eq!(unchanged.last_updated, common::start_time());

    ctx.complete_lessons("ana", HTML, &["les-html-2"]).await;
    let moved = ctx.store.get_ranking(HTML, "ana").await.unwrap().unwrap();
    assert_eq!(moved.progress_percent, 66.67);
    assert_eq!(moved.last_updated, common::start_time() + Duration::minutes(20));
}
