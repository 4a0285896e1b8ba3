use std::collections::HashSet;
use std::sync::Arc;

use super::progress_service::ProgressService;
use super::AppState;
use crate::error::{LearningError, LearningResult, PolicyViolation};
use crate::metrics::{record_bookkeeping_failure, LESSON_VIEWS_TOTAL};
use crate::models::catalog::{active_in_order, Lesson, LessonRef, Module, ModuleRef};
use crate::models::lesson::{
    ContinuePoint, ContinueReason, EvaluationUnlockStatus, LessonAccessResponse,
    LessonNavigation, LessonUnlockResponse, ModuleSummary, NavigationEntry,
};
use crate::models::progress::{LessonProgress, ModuleProgressResponse};
use crate::store::LearningStore;
use crate::utils::time::Clock;

/// Lesson that has to be seen before `lesson` opens: the active lesson with
/// the highest order below it. `lessons` must be active and ordered.
pub fn predecessor<'a>(lessons: &'a [Lesson], lesson: &Lesson) -> Option<&'a Lesson> {
    lessons
        .iter()
        .filter(|candidate| candidate.order < lesson.order)
        .max_by_key(|candidate| candidate.order)
}

pub fn unlocked_given(lessons: &[Lesson], lesson: &Lesson, seen: &HashSet<String>) -> bool {
    match predecessor(lessons, lesson) {
        Some(previous) => seen.contains(&previous.id),
        None => true,
    }
}

/// Next lesson to study: the first unseen lesson after the furthest one
/// seen, the last lesson when everything is seen, the first otherwise.
pub fn continue_point<'a>(
    lessons: &'a [Lesson],
    seen: &HashSet<String>,
) -> (Option<&'a Lesson>, ContinueReason) {
    let furthest = lessons
        .iter()
        .filter(|lesson| seen.contains(&lesson.id))
        .max_by_key(|lesson| lesson.order);

    match furthest {
        None => (lessons.first(), ContinueReason::NotStarted),
        Some(furthest) => match lessons
            .iter()
            .find(|lesson| lesson.order > furthest.order && !seen.contains(&lesson.id))
        {
            Some(next) => (Some(next), ContinueReason::NextUnseen),
            None if lessons.iter().all(|lesson| seen.contains(&lesson.id)) => {
                (lessons.last(), ContinueReason::AllSeen)
            }
            // Everything after the furthest lesson is seen but a gap remains earlier.
            None => (
                lessons.iter().find(|lesson| !seen.contains(&lesson.id)),
                ContinueReason::NextUnseen,
            ),
        },
    }
}

struct ModuleContext {
    module: Module,
    lessons: Vec<Lesson>,
    seen: HashSet<String>,
}

impl ModuleContext {
    fn lesson(&self, lesson_id: &str) -> LearningResult<&Lesson> {
        self.lessons
            .iter()
            .find(|lesson| lesson.id == lesson_id)
            .ok_or_else(|| LearningError::not_found("lesson", lesson_id))
    }

    fn entry(&self, lesson: &Lesson) -> NavigationEntry {
        NavigationEntry {
            id: lesson.id.clone(),
            title: lesson.title.clone(),
            order: lesson.order,
            seen: self.seen.contains(&lesson.id),
            unlocked: unlocked_given(&self.lessons, lesson, &self.seen),
        }
    }

    fn all_seen(&self) -> bool {
        !self.lessons.is_empty() && self.lessons.iter().all(|l| self.seen.contains(&l.id))
    }
}

pub struct LessonService {
    store: Arc<dyn LearningStore>,
    clock: Arc<dyn Clock>,
    progress: ProgressService,
}

impl LessonService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            clock: state.clock.clone(),
            progress: ProgressService::new(state),
        }
    }

    async fn context(&self, user_id: &str, module_id: &str) -> LearningResult<ModuleContext> {
        let module = self
            .store
            .get_module(module_id)
            .await?
            .filter(|m| m.state.is_active())
            .ok_or_else(|| LearningError::not_found("module", module_id))?;
        let lessons = active_in_order(self.store.lessons_for_module(&module.id).await?);
        let seen = self
            .store
            .lesson_progress_for_module(user_id, &module.id)
            .await?
            .into_iter()
            .filter(|p| p.seen)
            .map(|p| p.lesson_id)
            .collect();
        Ok(ModuleContext {
            module,
            lessons,
            seen,
        })
    }

    pub async fn list_modules(&self, user_id: &str) -> LearningResult<Vec<ModuleSummary>> {
        let mut summaries = Vec::new();
        for module in self.store.list_modules().await? {
            if !module.state.is_active() {
                continue;
            }
            let total_lessons = active_in_order(self.store.lessons_for_module(&module.id).await?).len();
            let has_evaluation = self
                .store
                .evaluation_for_module(&module.id)
                .await?
                .is_some_and(|e| e.state.is_active());
            let progress = self.progress.recompute(user_id, &module.id).await?;
            summaries.push(ModuleSummary {
                module: ModuleRef::from(&module),
                ordering: module.ordering,
                total_lessons: total_lessons as u32,
                has_evaluation,
                progress: ModuleProgressResponse::from(&progress),
            });
        }
        Ok(summaries)
    }

    /// Whether the user may open the lesson. Independent of other users.
    pub async fn is_lesson_unlocked(&self, user_id: &str, lesson_id: &str) -> LearningResult<bool> {
        let lesson = self
            .store
            .get_lesson(lesson_id)
            .await?
            .filter(|l| l.state.is_active())
            .ok_or_else(|| LearningError::not_found("lesson", lesson_id))?;
        let ctx = self.context(user_id, &lesson.module_id).await?;
        Ok(unlocked_given(&ctx.lessons, &lesson, &ctx.seen))
    }

    pub async fn unlock_status(
        &self,
        user_id: &str,
        module_id: &str,
        lesson_id: &str,
    ) -> LearningResult<LessonUnlockResponse> {
        let ctx = self.context(user_id, module_id).await?;
        let lesson = ctx.lesson(lesson_id)?;
        let required = predecessor(&ctx.lessons, lesson)
            .filter(|previous| !ctx.seen.contains(&previous.id))
            .map(|previous| previous.id.clone());

        Ok(LessonUnlockResponse {
            lesson_id: lesson.id.clone(),
            unlocked: required.is_none(),
            required_lesson_id: required,
        })
    }

    /// Marks the lesson as seen. Repeats are no-ops and failures are logged
    /// and swallowed; returns whether the view is known to be stored.
    pub async fn record_view(&self, user_id: &str, lesson: &Lesson) -> bool {
        let row = LessonProgress::seen(user_id, &lesson.id, &lesson.module_id, self.clock.now());
        match self.store.mark_lesson_seen(row).await {
            Ok(true) => {
                LESSON_VIEWS_TOTAL.with_label_values(&["recorded"]).inc();
                tracing::info!("Lesson seen: user={} lesson={}", user_id, lesson.id);
                true
            }
            Ok(false) => {
                LESSON_VIEWS_TOTAL.with_label_values(&["repeat"]).inc();
                true
            }
            Err(e) => {
                LESSON_VIEWS_TOTAL.with_label_values(&["failed"]).inc();
                record_bookkeeping_failure("lesson_view");
                tracing::warn!(
                    "Failed to record lesson view user={} lesson={}: {}",
                    user_id,
                    lesson.id,
                    e
                );
                false
            }
        }
    }

    /// Unlock check, view recording and progress recompute for one access.
    pub async fn open_lesson(
        &self,
        user_id: &str,
        module_id: &str,
        lesson_id: &str,
    ) -> LearningResult<LessonAccessResponse> {
        let ctx = self.context(user_id, module_id).await?;
        let lesson = ctx.lesson(lesson_id)?;

        if let Some(previous) = predecessor(&ctx.lessons, lesson) {
            if !ctx.seen.contains(&previous.id) {
                tracing::warn!(
                    "Locked lesson requested: user={} lesson={} requires={}",
                    user_id,
                    lesson.id,
                    previous.id
                );
                return Err(PolicyViolation::LessonLocked {
                    required_lesson_id: previous.id.clone(),
                }
                .into());
            }
        }

        let view_recorded = self.record_view(user_id, lesson).await;
        let progress = self.progress.recompute(user_id, &ctx.module.id).await?;

        Ok(LessonAccessResponse {
            module: ModuleRef::from(&ctx.module),
            lesson: LessonRef::from(lesson),
            view_recorded,
            progress: ModuleProgressResponse::from(&progress),
        })
    }

    pub async fn navigation(
        &self,
        user_id: &str,
        module_id: &str,
        lesson_id: &str,
    ) -> LearningResult<LessonNavigation> {
        let ctx = self.context(user_id, module_id).await?;
        let lesson = ctx.lesson(lesson_id)?;

        let previous = ctx
            .lessons
            .iter()
            .filter(|l| l.order < lesson.order)
            .max_by_key(|l| l.order)
            .map(|l| ctx.entry(l));
        let next = ctx
            .lessons
            .iter()
            .filter(|l| l.order > lesson.order)
            .min_by_key(|l| l.order)
            .map(|l| ctx.entry(l));

        let evaluation_available = ctx.all_seen()
            && self
                .store
                .evaluation_for_module(&ctx.module.id)
                .await?
                .is_some_and(|e| e.state.is_active());

        Ok(LessonNavigation {
            current: ctx.entry(lesson),
            is_last: next.is_none(),
            previous,
            next,
            evaluation_available,
        })
    }

    pub async fn continue_point(&self, user_id: &str, module_id: &str) -> LearningResult<ContinuePoint> {
        let ctx = self.context(user_id, module_id).await?;
        let (lesson, reason) = continue_point(&ctx.lessons, &ctx.seen);
        Ok(ContinuePoint {
            module_id: ctx.module.id.clone(),
            lesson: lesson.map(LessonRef::from),
            reason,
        })
    }

    pub async fn evaluation_unlock_status(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<EvaluationUnlockStatus> {
        let ctx = self.context(user_id, module_id).await?;
        let evaluation_id = self
            .store
            .evaluation_for_module(&ctx.module.id)
            .await?
            .filter(|e| e.state.is_active())
            .map(|e| e.id);
        let lessons_seen = ctx
            .lessons
            .iter()
            .filter(|l| ctx.seen.contains(&l.id))
            .count() as u32;

        Ok(EvaluationUnlockStatus {
            module_id: ctx.module.id.clone(),
            unlocked: evaluation_id.is_some() && ctx.all_seen(),
            evaluation_id,
            lessons_seen,
            total_lessons: ctx.lessons.len() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::LifecycleState;

    fn lesson(id: &str, order: u32) -> Lesson {
        Lesson {
            id: id.to_string(),
            module_id: "m1".to_string(),
            slug: id.to_string(),
            title: id.to_string(),
            order,
            state: LifecycleState::Active,
        }
    }

    fn seen(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn first_lesson_is_always_open() {
        let lessons = vec![lesson("a", 1), lesson("b", 2)];
        assert!(unlocked_given(&lessons, &lessons[0], &seen(&[])));
        assert!(!unlocked_given(&lessons, &lessons[1], &seen(&[])));
        assert!(unlocked_given(&lessons, &lessons[1], &seen(&["a"])));
    }

    #[test]
    fn unlock_depends_only_on_the_direct_predecessor() {
        let lessons = vec![lesson("a", 1), lesson("b", 2), lesson("c", 3)];
        assert!(unlocked_given(&lessons, &lessons[2], &seen(&["b"])));
        assert!(!unlocked_given(&lessons, &lessons[2], &seen(&["a"])));
    }

    #[test]
    fn gaps_in_order_use_the_closest_lower_lesson() {
        // Lesson 2 is inactive and therefore not in the list.
        let lessons = vec![lesson("a", 1), lesson("c", 3)];
        assert_eq!(predecessor(&lessons, &lessons[1]).map(|l| l.id.as_str()), Some("a"));
    }

    #[test]
    fn continue_point_walks_forward() {
        let lessons = vec![lesson("a", 1), lesson("b", 2), lesson("c", 3)];

        let (l, reason) = continue_point(&lessons, &seen(&[]));
        assert_eq!((l.map(|l| l.id.as_str()), reason), (Some("a"), ContinueReason::NotStarted));

        let (l, reason) = continue_point(&lessons, &seen(&["a", "b"]));
        assert_eq!((l.map(|l| l.id.as_str()), reason), (Some("c"), ContinueReason::NextUnseen));

        let (l, reason) = continue_point(&lessons, &seen(&["a", "b", "c"]));
        assert_eq!((l.map(|l| l.id.as_str()), reason), (Some("c"), ContinueReason::AllSeen));
    }
}
