//! Progress aggregation. This service is the only writer of module progress
//! and ranking rows; every other service asks it to recompute.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::ranking_service::next_ranking_entry;
use super::scope_lock::{progress_scope, ScopeLocks};
use super::scoring::round2;
use super::AppState;
use crate::error::{LearningError, LearningResult};
use crate::metrics::PROGRESS_RECOMPUTES_TOTAL;
use crate::models::attempt::{AttemptState, EvaluationAttempt};
use crate::models::catalog::{active_in_order, Lesson, Module};
use crate::models::progress::{LessonProgress, ModuleProgress};
use crate::store::{LearningStore, ProgressCommit};
use crate::utils::time::{to_millis, Clock};

/// Everything the aggregation depends on, already loaded.
pub struct ProgressInputs<'a> {
    /// Active lessons of the module, in order.
    pub lessons: &'a [Lesson],
    pub lesson_progress: &'a [LessonProgress],
    pub evaluation_passed: bool,
}

/// Highest percent a learner can reach without passing the evaluation;
/// 100 is reserved for a passed module.
pub const UNPASSED_CEILING: f64 = 99.99;

/// Pure aggregation. `previous` keeps `updated_at` stable when nothing moved,
/// so recomputing twice without a state change gives identical rows.
pub fn compute_module_progress(
    user_id: &str,
    module_id: &str,
    inputs: &ProgressInputs<'_>,
    previous: Option<&ModuleProgress>,
    now: DateTime<Utc>,
) -> ModuleProgress {
    let seen_ids: HashSet<&str> = inputs
        .lesson_progress
        .iter()
        .filter(|p| p.seen)
        .map(|p| p.lesson_id.as_str())
        .collect();

    let seen_lessons: Vec<&Lesson> = inputs
        .lessons
        .iter()
        .filter(|lesson| seen_ids.contains(lesson.id.as_str()))
        .collect();

    let total_lessons = inputs.lessons.len() as u32;
    let lessons_seen = seen_lessons.len() as u32;
    let last_lesson_seen = seen_lessons
        .iter()
        .max_by_key(|lesson| lesson.order)
        .map(|lesson| lesson.id.clone());

    let percent_complete = if inputs.evaluation_passed {
        100.0
    } else if total_lessons == 0 {
        0.0
    } else {
        round2(f64::from(lessons_seen) / f64::from(total_lessons) * 100.0).min(UNPASSED_CEILING)
    };

    let mut progress = ModuleProgress {
        id: ModuleProgress::key(user_id, module_id),
        user_id: user_id.to_string(),
        module_id: module_id.to_string(),
        lessons_seen,
        total_lessons,
        percent_complete,
        evaluation_passed: inputs.evaluation_passed,
        certificate_eligible: inputs.evaluation_passed,
        last_lesson_seen,
        updated_at: to_millis(now),
    };

    if let Some(previous) = previous {
        progress.updated_at = previous.updated_at;
        if progress != *previous {
            progress.updated_at = to_millis(now);
        }
    }
    progress
}

pub fn has_passed(attempts: &[EvaluationAttempt]) -> bool {
    attempts
        .iter()
        .any(|a| a.state == AttemptState::Completed && a.passed)
}

pub struct ProgressService {
    store: Arc<dyn LearningStore>,
    locks: Arc<ScopeLocks>,
    clock: Arc<dyn Clock>,
}

impl ProgressService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            locks: state.locks.clone(),
            clock: state.clock.clone(),
        }
    }

    pub async fn recompute(&self, user_id: &str, module_id: &str) -> LearningResult<ModuleProgress> {
        self.recompute_inner(user_id, module_id, None).await
    }

    /// Closes `attempt` and recomputes in the same atomic commit.
    pub async fn commit_attempt(
        &self,
        user_id: &str,
        attempt: EvaluationAttempt,
    ) -> LearningResult<ModuleProgress> {
        let module_id = attempt.module_id.clone();
        self.recompute_inner(user_id, &module_id, Some(attempt)).await
    }

    /// Module progress for a learner, recomputed from current state.
    pub async fn get_module_progress(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<ModuleProgress> {
        self.recompute(user_id, module_id).await
    }

    async fn recompute_inner(
        &self,
        user_id: &str,
        module_id: &str,
        attempt: Option<EvaluationAttempt>,
    ) -> LearningResult<ModuleProgress> {
        let scope = progress_scope(user_id, module_id);
        let guard = self.locks.acquire(&scope).await?;
        let result = self.recompute_locked(user_id, module_id, attempt).await;
        guard.release().await;
        result
    }

    async fn recompute_locked(
        &self,
        user_id: &str,
        module_id: &str,
        attempt: Option<EvaluationAttempt>,
    ) -> LearningResult<ModuleProgress> {
        let module = self.active_module(module_id).await?;
        let lessons = active_in_order(self.store.lessons_for_module(&module.id).await?);
        let lesson_progress = self
            .store
            .lesson_progress_for_module(user_id, &module.id)
            .await?;

        let mut evaluation_passed = attempt
            .as_ref()
            .is_some_and(|a| a.state == AttemptState::Completed && a.passed);
        if !evaluation_passed {
            if let Some(evaluation) = self.store.evaluation_for_module(&module.id).await? {
                let attempts = self.store.attempts_for(user_id, &evaluation.id).await?;
                evaluation_passed = has_passed(&attempts);
            }
        }

        let previous = self.store.get_module_progress(user_id, &module.id).await?;
        let now = self.clock.now();
        let progress = compute_module_progress(
            user_id,
            &module.id,
            &ProgressInputs {
                lessons: &lessons,
                lesson_progress: &lesson_progress,
                evaluation_passed,
            },
            previous.as_ref(),
            now,
        );

        let changed = previous.as_ref() != Some(&progress);
        PROGRESS_RECOMPUTES_TOTAL
            .with_label_values(&[if changed { "true" } else { "false" }])
            .inc();

        if !changed && attempt.is_none() {
            return Ok(progress);
        }

        let previous_ranking = self.store.get_ranking(&module.id, user_id).await?;
        let ranking = next_ranking_entry(
            &module.id,
            user_id,
            progress.percent_complete,
            previous_ranking.as_ref(),
            now,
        );

        self.store
            .commit_progress(ProgressCommit {
                attempt,
                progress: progress.clone(),
                ranking,
            })
            .await?;

        if changed {
            tracing::info!(
                "Progress updated: user={} module={} percent={} eligible={}",
                user_id,
                module.id,
                progress.percent_complete,
                progress.certificate_eligible
            );
        }
        Ok(progress)
    }

    async fn active_module(&self, module_id: &str) -> LearningResult<Module> {
        self.store
            .get_module(module_id)
            .await?
            .filter(|m| m.state.is_active())
            .ok_or_else(|| LearningError::not_found("module", module_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::LifecycleState;
    use chrono::Duration;

    fn lessons(n: u32) -> Vec<Lesson> {
        (1..=n)
            .map(|order| Lesson {
                id: format!("l{}", order),
                module_id: "m1".to_string(),
                slug: format!("lesson-{}", order),
                title: format!("Lesson {}", order),
                order,
                state: LifecycleState::Active,
            })
            .collect()
    }

    fn seen(ids: &[&str]) -> Vec<LessonProgress> {
        ids.iter()
            .map(|id| LessonProgress::seen("u1", id, "m1", Utc::now()))
            .collect()
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000, 0).unwrap()
    }

    #[test]
    fn percent_follows_seen_lessons() {
        let lessons = lessons(3);
        let rows = seen(&["l1", "l2"]);
        let progress = compute_module_progress(
            "u1",
            "m1",
            &ProgressInputs {
                lessons: &lessons,
                lesson_progress: &rows,
                evaluation_passed: false,
            },
            None,
            now(),
        );

        assert_eq!(progress.lessons_seen, 2);
        assert_eq!(progress.percent_complete, 66.67);
        assert_eq!(progress.last_lesson_seen.as_deref(), Some("l2"));
        assert!(!progress.certificate_eligible);
    }

    #[test]
    fn passing_is_all_or_nothing() {
        let lessons = lessons(4);
        let rows = seen(&["l1"]);
        let progress = compute_module_progress(
            "u1",
            "m1",
            &ProgressInputs {
                lessons: &lessons,
                lesson_progress: &rows,
                evaluation_passed: true,
            },
            None,
            now(),
        );
        assert_eq!(progress.percent_complete, 100.0);
        assert!(progress.certificate_eligible);

        let all = seen(&["l1", "l2", "l3", "l4"]);
        let not_passed = compute_module_progress(
            "u1",
            "m1",
            &ProgressInputs {
                lessons: &lessons,
                lesson_progress: &all,
                evaluation_passed: false,
            },
            None,
            now(),
        );
        assert_eq!(not_passed.percent_complete, UNPASSED_CEILING);
        assert!(!not_passed.certificate_eligible);
    }

    #[test]
    fn no_lessons_means_zero_percent() {
        let progress = compute_module_progress(
            "u1",
            "m1",
            &ProgressInputs {
                lessons: &[],
                lesson_progress: &[],
                evaluation_passed: false,
            },
            None,
            now(),
        );
        assert_eq!(progress.percent_complete, 0.0);
        assert_eq!(progress.total_lessons, 0);
    }

    #[test]
    fn views_of_inactive_lessons_do_not_count() {
        let lessons = lessons(2);
        let rows = seen(&["l1", "retired"]);
        let progress = compute_module_progress(
            "u1",
            "m1",
            &ProgressInputs {
                lessons: &lessons,
                lesson_progress: &rows,
                evaluation_passed: false,
            },
            None,
            now(),
        );
        assert_eq!(progress.lessons_seen, 1);
        assert_eq!(progress.percent_complete, 50.0);
    }

    #[test]
    fn recompute_without_change_is_identical() {
        let lessons = lessons(2);
        let rows = seen(&["l1"]);
        let inputs = ProgressInputs {
            lessons: &lessons,
            lesson_progress: &rows,
            evaluation_passed: false,
        };

        let first = compute_module_progress("u1", "m1", &inputs, None, now());
        let second = compute_module_progress(
            "u1",
            "m1",
            &inputs,
            Some(&first),
            now() + Duration::minutes(5),
        );
        assert_eq!(first, second);

        let more = seen(&["l1", "l2"]);
        let third = compute_module_progress(
            "u1",
            "m1",
            &ProgressInputs {
                lessons: &lessons,
                lesson_progress: &more,
                evaluation_passed: false,
            },
            Some(&second),
            now() + Duration::minutes(10),
        );
        assert_eq!(third.updated_at, now() + Duration::minutes(10));
    }
}
