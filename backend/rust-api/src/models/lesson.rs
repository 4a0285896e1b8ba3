use serde::Serialize;

use super::catalog::{LessonRef, ModuleRef};
use super::progress::ModuleProgressResponse;

#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub module: ModuleRef,
    pub ordering: i32,
    pub total_lessons: u32,
    pub has_evaluation: bool,
    pub progress: ModuleProgressResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonUnlockResponse {
    pub lesson_id: String,
    pub unlocked: bool,
    pub required_lesson_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonAccessResponse {
    pub module: ModuleRef,
    pub lesson: LessonRef,
    /// False when recording the view failed; the lesson is served anyway.
    pub view_recorded: bool,
    pub progress: ModuleProgressResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigationEntry {
    pub id: String,
    pub title: String,
    pub order: u32,
    pub seen: bool,
    pub unlocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonNavigation {
    pub current: NavigationEntry,
    pub previous: Option<NavigationEntry>,
    pub next: Option<NavigationEntry>,
    pub is_last: bool,
    pub evaluation_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinueReason {
    NotStarted,
    NextUnseen,
    AllSeen,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContinuePoint {
    pub module_id: String,
    pub lesson: Option<LessonRef>,
    pub reason: ContinueReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationUnlockStatus {
    pub module_id: String,
    pub evaluation_id: Option<String>,
    pub unlocked: bool,
    pub lessons_seen: u32,
    pub total_lessons: u32,
}
