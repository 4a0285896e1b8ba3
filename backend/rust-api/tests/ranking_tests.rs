use chrono::Duration;
use courseware_api::{
    models::ranking::Medal,
    services::{progress_service::ProgressService, ranking_service::RankingService},
};

mod common;

use common::{CSS, HTML};

#[tokio::test]
async fn ties_go_to_whoever_got_there_first() {
    let ctx = common::context();
    let ranking = RankingService::new(&ctx.state);

    ctx.complete_lessons("carla", HTML, &["les-html-1"]).await;
    ctx.clock.advance(Duration::minutes(5));
    ctx.complete_lessons("ana", HTML, &["les-html-1"]).await;
    ctx.clock.advance(Duration::minutes(5));
    ctx.complete_lessons("ben", HTML, &["les-html-1", "les-html-2"]).await;

    let top = ranking.top_n(HTML, 10).await.unwrap();
    let order: Vec<&str> = top.iter().map(|r| r.user_id.as_str()).collect();
    assert_eq!(order, vec!["ben", "carla", "ana"]);
    assert_eq!(top[0].position, 1);
    assert_eq!(top[0].medal, Medal::Gold);
    assert_eq!(top[1].medal, Medal::Silver);
    assert_eq!(top[2].medal, Medal::Bronze);
    assert_eq!(top[1].progress_percent, top[2].progress_percent);
}

#[tokio::test]
async fn learners_without_progress_are_not_listed() {
    let ctx = common::context();
    let ranking = RankingService::new(&ctx.state);

    ctx.complete_lessons("ana", HTML, &["les-html-1"]).await;
    // A plain recompute writes a zero row for dan.
    ProgressService::new(&ctx.state)
        .recompute("dan", HTML)
        .await
        .unwrap();

    let top = ranking.top_n(HTML, 10).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].user_id, "ana");

    let board = ranking.module_ranking("dan", HTML, 10).await.unwrap();
    assert!(board.my_position.is_none());
    assert_eq!(board.stats.participants, 1);
}

#[tokio::test]
async fn limit_cuts_the_board_but_not_my_position() {
    let ctx = common::context();
    let ranking = RankingService::new(&ctx.state);

    for user in ["u1", "u2", "u3", "u4"] {
        ctx.complete_lessons(user, HTML, &["les-html-1"]).await;
        ctx.clock.advance(Duration::seconds(30));
    }

    let board = ranking.module_ranking("u4", HTML, 2).await.unwrap();
    assert_eq!(board.top.len(), 2);
    let mine = board.my_position.unwrap();
    assert_eq!(mine.position, 4);
    assert_eq!(mine.medal, Medal::Top);
    assert_eq!(board.stats.participants, 4);
    assert_eq!(board.stats.average_percent, 33.33);
}

#[tokio::test]
async fn overview_covers_active_modules() {
    let ctx = common::context();
    let ranking = RankingService::new(&ctx.state);

    ctx.complete_lessons("ana", CSS, &["les-css-1"]).await;
    let overview = ranking.overview("ana", 5).await.unwrap();

    let ids: Vec<&str> = overview.modules.iter().map(|m| m.module.id.as_str()).collect();
    assert_eq!(ids, vec!["mod-html", "mod-css", "mod-git"]);
    let css = &overview.modules[1];
    assert_eq!(css.top.len(), 1);
    assert_eq!(css.top[0].progress_percent, 99.99);
    assert!(overview.modules[0].top.is_empty());
}
