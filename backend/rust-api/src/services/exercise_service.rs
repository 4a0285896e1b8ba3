use std::sync::Arc;

use uuid::Uuid;

use super::lesson_service::LessonService;
use super::scoring::{exercise_recommendation, grade, round2};
use super::AppState;
use crate::error::{LearningError, LearningResult, PolicyViolation};
use crate::metrics::record_bookkeeping_failure;
use crate::models::attempt::AnswerPayload;
use crate::models::catalog::Lesson;
use crate::models::evaluation::{OptionView, QuestionKind};
use crate::models::exercise::{
    Exercise, ExerciseAttempt, ExerciseFeedback, ExerciseResult, ExerciseView,
    LessonExerciseResults,
};
use crate::store::LearningStore;
use crate::utils::time::{to_millis, Clock};

fn feedback(kind: QuestionKind, is_correct: bool) -> &'static str {
    match (kind, is_correct) {
        (QuestionKind::SingleChoice, true) => "Correct! You picked the right answer.",
        (QuestionKind::SingleChoice, false) => "Not quite. Review the lesson content.",
        (QuestionKind::TrueFalse, true) => "Correct!",
        (QuestionKind::TrueFalse, false) => "Incorrect, the statement evaluates the other way.",
        (QuestionKind::MatchPairs, true) => "Excellent! Every item is matched correctly.",
        (QuestionKind::MatchPairs, false) => "Some matches are wrong. Try again.",
    }
}

/// Per-lesson practice summary. An exercise counts as correct when its
/// latest attempt was.
pub fn summarize(lesson_id: &str, exercises: &[Exercise], attempts: &[ExerciseAttempt]) -> LessonExerciseResults {
    let results: Vec<ExerciseResult> = exercises
        .iter()
        .map(|exercise| {
            let mine: Vec<&ExerciseAttempt> = attempts
                .iter()
                .filter(|a| a.exercise_id == exercise.id)
                .collect();
            let latest = mine.iter().max_by_key(|a| a.submitted_at);
            ExerciseResult {
                exercise_id: exercise.id.clone(),
                prompt: exercise.prompt.clone(),
                kind: exercise.kind,
                order: exercise.order,
                answered: latest.is_some(),
                correct: latest.is_some_and(|a| a.is_correct),
                attempts: mine.len() as u32,
                last_attempt_at: latest.map(|a| a.submitted_at),
            }
        })
        .collect();

    let total = results.len() as u32;
    let answered = results.iter().filter(|r| r.answered).count() as u32;
    let correct = results.iter().filter(|r| r.correct).count() as u32;
    let percent_answered = if total > 0 {
        round2(f64::from(answered) / f64::from(total) * 100.0)
    } else {
        0.0
    };
    let percent_correct = if answered > 0 {
        round2(f64::from(correct) / f64::from(answered) * 100.0)
    } else {
        0.0
    };

    LessonExerciseResults {
        lesson_id: lesson_id.to_string(),
        total_exercises: total,
        answered,
        correct,
        pending: total - answered,
        percent_answered,
        percent_correct,
        recommendation: exercise_recommendation(percent_correct, answered),
        results,
    }
}

pub struct ExerciseService {
    store: Arc<dyn LearningStore>,
    clock: Arc<dyn Clock>,
    lessons: LessonService,
}

impl ExerciseService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            clock: state.clock.clone(),
            lessons: LessonService::new(state),
        }
    }

    /// The lesson, provided it belongs to `module_id` and is open to the user.
    async fn unlocked_lesson(&self, user_id: &str, module_id: &str, lesson_id: &str) -> LearningResult<Lesson> {
        let lesson = self
            .store
            .get_lesson(lesson_id)
            .await?
            .filter(|l| l.module_id == module_id && l.state.is_active())
            .ok_or_else(|| LearningError::not_found("lesson", lesson_id))?;

        let status = self.lessons.unlock_status(user_id, module_id, lesson_id).await?;
        if !status.unlocked {
            return Err(PolicyViolation::LessonLocked {
                required_lesson_id: status.required_lesson_id.unwrap_or_default(),
            }
            .into());
        }
        Ok(lesson)
    }

    async fn active_exercises(&self, lesson_id: &str) -> LearningResult<Vec<Exercise>> {
        let mut exercises = self.store.exercises_for_lesson(lesson_id).await?;
        exercises.retain(|e| e.state.is_active());
        Ok(exercises)
    }

    pub async fn list(&self, user_id: &str, module_id: &str, lesson_id: &str) -> LearningResult<Vec<ExerciseView>> {
        let lesson = self.unlocked_lesson(user_id, module_id, lesson_id).await?;
        let exercises = self.active_exercises(&lesson.id).await?;
        Ok(exercises.iter().map(ExerciseView::from).collect())
    }

    /// Grades a practice answer. The attempt log is bookkeeping: a failed
    /// write is logged and the feedback is still returned.
    pub async fn submit(
        &self,
        user_id: &str,
        module_id: &str,
        lesson_id: &str,
        exercise_id: &str,
        payload: AnswerPayload,
    ) -> LearningResult<ExerciseFeedback> {
        let lesson = self.unlocked_lesson(user_id, module_id, lesson_id).await?;
        let exercise = self
            .store
            .get_exercise(exercise_id)
            .await?
            .filter(|e| e.lesson_id == lesson.id && e.state.is_active())
            .ok_or_else(|| LearningError::not_found("exercise", exercise_id))?;

        let graded = grade(exercise.kind, &exercise.options, 1.0, &payload)?;

        let attempt = ExerciseAttempt {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            exercise_id: exercise.id.clone(),
            lesson_id: lesson.id.clone(),
            payload,
            is_correct: graded.is_correct,
            submitted_at: to_millis(self.clock.now()),
        };
        let attempt_id = attempt.id.clone();
        if let Err(e) = self.store.insert_exercise_attempt(attempt).await {
            record_bookkeeping_failure("exercise_attempt");
            tracing::warn!(
                "Failed to log exercise attempt user={} exercise={}: {}",
                user_id,
                exercise.id,
                e
            );
        }

        Ok(ExerciseFeedback {
            exercise_id: exercise.id.clone(),
            attempt_id,
            is_correct: graded.is_correct,
            feedback: feedback(exercise.kind, graded.is_correct),
            correct_options: exercise
                .options
                .iter()
                .filter(|o| o.is_correct)
                .map(OptionView::revealed)
                .collect(),
        })
    }

    pub async fn results(&self, user_id: &str, module_id: &str, lesson_id: &str) -> LearningResult<LessonExerciseResults> {
        let lesson = self.unlocked_lesson(user_id, module_id, lesson_id).await?;
        let exercises = self.active_exercises(&lesson.id).await?;
        let attempts = self.store.exercise_attempts_for(user_id, &lesson.id).await?;
        Ok(summarize(&lesson.id, &exercises, &attempts))
    }
}
