use courseware_api::{
    error::{LearningError, PolicyViolation},
    models::lesson::ContinueReason,
    services::lesson_service::LessonService,
};

mod common;

use common::{HTML, HTML_LESSONS};

#[tokio::test]
async fn first_lesson_is_open_and_the_next_waits_for_it() {
    let ctx = common::context();
    let lessons = LessonService::new(&ctx.state);

    assert!(lessons.is_lesson_unlocked("ana", "les-html-1").await.unwrap());
    assert!(!lessons.is_lesson_unlocked("ana", "les-html-2").await.unwrap());

    let err = lessons
        .open_lesson("ana", HTML, "les-html-2")
        .await
        .unwrap_err();
    match err {
        LearningError::PolicyViolation(PolicyViolation::LessonLocked { required_lesson_id }) => {
            assert_eq!(required_lesson_id, "les-html-1")
        }
        other => panic!("expected LessonLocked, got {:?}", other),
    }

    lessons.open_lesson("ana", HTML, "les-html-1").await.unwrap();
    assert!(lessons.is_lesson_unlocked("ana", "les-html-2").await.unwrap());
}

#[tokio::test]
async fn draft_lessons_do_not_block_the_sequence() {
    let ctx = common::context();
    let lessons = LessonService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &["les-html-1", "les-html-2"]).await;

    // les-html-3 follows a draft lesson; its predecessor is les-html-2
    assert!(lessons.is_lesson_unlocked("ana", "les-html-3").await.unwrap());
    let status = lessons.unlock_status("ana", HTML, "les-html-3").await.unwrap();
    assert!(status.unlocked);
    assert!(status.required_lesson_id.is_none());
}

#[tokio::test]
async fn unlocking_is_per_learner() {
    let ctx = common::context();
    let lessons = LessonService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;

    assert!(lessons.is_lesson_unlocked("ana", "les-html-3").await.unwrap());
    assert!(!lessons.is_lesson_unlocked("ben", "les-html-2").await.unwrap());
    assert!(!lessons.is_lesson_unlocked("ben", "les-html-3").await.unwrap());
}

#[tokio::test]
async fn repeated_views_are_no_ops() {
    let ctx = common::context();
    let lessons = LessonService::new(&ctx.state);

    let first = lessons.open_lesson("ana", HTML, "les-html-1").await.unwrap();
    ctx.clock.advance(chrono::Duration::minutes(5));
    let again = lessons.open_lesson("ana", HTML, "les-html-1").await.unwrap();

    assert!(again.view_recorded);
    assert_eq!(first.progress.lessons_seen, 1);
    assert_eq!(again.progress.lessons_seen, 1);
    assert_eq!(first.progress.updated_at, again.progress.updated_at);
}

#[tokio::test]
async fn continue_point_moves_through_the_module() {
    let ctx = common::context();
    let lessons = LessonService::new(&ctx.state);

    let point = lessons.continue_point("ana", HTML).await.unwrap();
    assert_eq!(point.reason, ContinueReason::NotStarted);
    assert_eq!(point.lesson.unwrap().id, "les-html-1");

    ctx.complete_lessons("ana", HTML, &["les-html-1"]).await;
    let point = lessons.continue_point("ana", HTML).await.unwrap();
    assert_eq!(point.reason, ContinueReason::NextUnseen);
    assert_eq!(point.lesson.unwrap().id, "les-html-2");

    ctx.complete_lessons("ana", HTML, &["les-html-2", "les-html-3"]).await;
    let point = lessons.continue_point("ana", HTML).await.unwrap();
    assert_eq!(point.reason, ContinueReason::AllSeen);
    assert_eq!(point.lesson.unwrap().id, "les-html-3");
}

#[tokio::test]
async fn navigation_reports_neighbours_and_evaluation_access() {
    let ctx = common::context();
    let lessons = LessonService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &["les-html-1"]).await;
    let nav = lessons.navigation("ana", HTML, "les-html-2").await.unwrap();
    assert_eq!(nav.previous.as_ref().unwrap().id, "les-html-1");
    assert!(nav.previous.unwrap().seen);
    assert_eq!(nav.next.as_ref().unwrap().id, "les-html-3");
    assert!(!nav.next.unwrap().unlocked);
    assert!(!nav.is_last);
    assert!(!nav.evaluation_available);

    ctx.complete_lessons("ana", HTML, &["les-html-2", "les-html-3"]).await;
    let nav = lessons.navigation("ana", HTML, "les-html-3").await.unwrap();
    assert!(nav.is_last);
    assert!(nav.next.is_none());
    assert!(nav.evaluation_available);
}

#[tokio::test]
async fn module_list_hides_inactive_modules() {
    let ctx = common::context();
    let lessons = LessonService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &["les-html-1"]).await;
    let modules = lessons.list_modules("ana").await.unwrap();

    let ids: Vec<_> = modules.iter().map(|m| m.module.id.as_str()).collect();
    assert_eq!(ids, vec!["mod-html", "mod-css", "mod-git"]);

    let html = &modules[0];
    assert_eq!(html.total_lessons, 3);
    assert!(html.has_evaluation);
    assert_eq!(html.progress.percent_complete, 33.33);
    assert!(!modules[2].has_evaluation);
}

#[tokio::test]
async fn evaluation_unlocks_after_every_lesson() {
    let ctx = common::context();
    let lessons = LessonService::new(&ctx.state);

    let status = lessons.evaluation_unlock_status("ana", HTML).await.unwrap();
    assert!(!status.unlocked);
    assert_eq!(status.total_lessons, 3);

    ctx.complete_lessons("ana", HTML, &HTML_LESSONS).await;
    let status = lessons.evaluation_unlock_status("ana", HTML).await.unwrap();
    assert!(status.unlocked);
    assert_eq!(status.lessons_seen, 3);
    assert_eq!(status.evaluation_id.as_deref(), Some("eval-html"));
}
