use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CatalogSeed, LearningStore, ProgressCommit};
use crate::error::{ConflictKind, LearningError, LearningResult};
use crate::models::attempt::{AttemptAnswer, AttemptState, EvaluationAttempt};
use crate::models::catalog::{Lesson, Module};
use crate::models::certificate::Certificate;
use crate::models::evaluation::{Evaluation, Question};
use crate::models::exercise::{Exercise, ExerciseAttempt};
use crate::models::progress::{LessonProgress, ModuleProgress, RankingEntry};

#[derive(Default)]
struct State {
    modules: HashMap<String, Module>,
    lessons: HashMap<String, Lesson>,
    evaluations: HashMap<String, Evaluation>,
    questions: HashMap<String, Question>,
    exercises: HashMap<String, Exercise>,
    lesson_progress: HashMap<String, LessonProgress>,
    module_progress: HashMap<String, ModuleProgress>,
    rankings: HashMap<String, RankingEntry>,
    attempts: HashMap<String, EvaluationAttempt>,
    answers: HashMap<String, AttemptAnswer>,
    certificates: HashMap<String, Certificate>,
    exercise_attempts: Vec<ExerciseAttempt>,
}

/// Process-local store. Every multi-record write happens under one write
/// lock, which gives `commit_progress` the same all-or-nothing behaviour as
/// the MongoDB transaction.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(seed: CatalogSeed) -> Self {
        let mut state = State::default();
        apply_seed(&mut state, seed);
        Self {
            state: RwLock::new(state),
        }
    }
}

fn apply_seed(state: &mut State, seed: CatalogSeed) {
    for module in seed.modules {
        state.modules.insert(module.id.clone(), module);
    }
    for lesson in seed.lessons {
        state.lessons.insert(lesson.id.clone(), lesson);
    }
    for evaluation in seed.evaluations {
        state.evaluations.insert(evaluation.id.clone(), evaluation);
    }
    for question in seed.questions {
        state.questions.insert(question.id.clone(), question);
    }
    for exercise in seed.exercises {
        state.exercises.insert(exercise.id.clone(), exercise);
    }
}

#[async_trait]
impl LearningStore for InMemoryStore {
    async fn ping(&self) -> LearningResult<()> {
        Ok(())
    }

    async fn load_catalog(&self, seed: CatalogSeed) -> LearningResult<()> {
        let mut state = self.state.write().await;
        apply_seed(&mut state, seed);
        Ok(())
    }

    async fn list_modules(&self) -> LearningResult<Vec<Module>> {
        let state = self.state.read().await;
        let mut modules: Vec<Module> = state.modules.values().cloned().collect();
        modules.sort_by(|a, b| a.ordering.cmp(&b.ordering).then_with(|| a.id.cmp(&b.id)));
        Ok(modules)
    }

    async fn get_module(&self, module_id: &str) -> LearningResult<Option<Module>> {
        Ok(self.state.read().await.modules.get(module_id).cloned())
    }

    async fn lessons_for_module(&self, module_id: &str) -> LearningResult<Vec<Lesson>> {
        let state = self.state.read().await;
        let mut lessons: Vec<Lesson> = state
            .lessons
            .values()
            .filter(|lesson| lesson.module_id == module_id)
            .cloned()
            .collect();
        lessons.sort_by_key(|lesson| lesson.order);
        Ok(lessons)
    }

    async fn get_lesson(&self, lesson_id: &str) -> LearningResult<Option<Lesson>> {
        Ok(self.state.read().await.lessons.get(lesson_id).cloned())
    }

    async fn evaluation_for_module(&self, module_id: &str) -> LearningResult<Option<Evaluation>> {
        let state = self.state.read().await;
        Ok(state
            .evaluations
            .values()
            .find(|evaluation| evaluation.module_id == module_id)
            .cloned())
    }

    async fn get_evaluation(&self, evaluation_id: &str) -> LearningResult<Option<Evaluation>> {
        Ok(self.state.read().await.evaluations.get(evaluation_id).cloned())
    }

    async fn questions_for_evaluation(&self, evaluation_id: &str) -> LearningResult<Vec<Question>> {
        let state = self.state.read().await;
        let mut questions: Vec<Question> = state
            .questions
            .values()
            .filter(|question| question.evaluation_id == evaluation_id)
            .cloned()
            .collect();
        questions.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Ok(questions)
    }

    async fn exercises_for_lesson(&self, lesson_id: &str) -> LearningResult<Vec<Exercise>> {
        let state = self.state.read().await;
        let mut exercises: Vec<Exercise> = state
            .exercises
            .values()
            .filter(|exercise| exercise.lesson_id == lesson_id)
            .cloned()
            .collect();
        exercises.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        Ok(exercises)
    }

    async fn get_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> LearningResult<Option<LessonProgress>> {
        let key = LessonProgress::key(user_id, lesson_id);
        Ok(self.state.read().await.lesson_progress.get(&key).cloned())
    }

    async fn lesson_progress_for_module(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<Vec<LessonProgress>> {
        let state = self.state.read().await;
        Ok(state
            .lesson_progress
            .values()
            .filter(|p| p.user_id == user_id && p.module_id == module_id)
            .cloned()
            .collect())
    }

    async fn mark_lesson_seen(&self, progress: LessonProgress) -> LearningResult<bool> {
        let mut state = self.state.write().await;
        match state.lesson_progress.get(&progress.id) {
            Some(existing) if existing.seen => Ok(false),
            _ => {
                state.lesson_progress.insert(progress.id.clone(), progress);
                Ok(true)
            }
        }
    }

    async fn get_module_progress(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<Option<ModuleProgress>> {
        let key = ModuleProgress::key(user_id, module_id);
        Ok(self.state.read().await.module_progress.get(&key).cloned())
    }

    async fn get_ranking(
        &self,
        module_id: &str,
        user_id: &str,
    ) -> LearningResult<Option<RankingEntry>> {
        let key = RankingEntry::key(module_id, user_id);
        Ok(self.state.read().await.rankings.get(&key).cloned())
    }

    async fn rankings_for_module(&self, module_id: &str) -> LearningResult<Vec<RankingEntry>> {
        let state = self.state.read().await;
        Ok(state
            .rankings
            .values()
            .filter(|entry| entry.module_id == module_id)
            .cloned()
            .collect())
    }

    async fn commit_progress(&self, commit: ProgressCommit) -> LearningResult<()> {
        let mut state = self.state.write().await;

        if let Some(attempt) = &commit.attempt {
            match state.attempts.get(&attempt.id) {
                Some(stored) if stored.state == AttemptState::InProgress => {}
                Some(stored) => {
                    return Err(ConflictKind::AttemptClosed {
                        attempt_id: stored.id.clone(),
                        state: stored.state.as_str().to_string(),
                    }
                    .into())
                }
                None => return Err(LearningError::not_found("attempt", attempt.id.clone())),
            }
        }

        if let Some(attempt) = commit.attempt {
            state.attempts.insert(attempt.id.clone(), attempt);
        }
        state
            .module_progress
            .insert(commit.progress.id.clone(), commit.progress);
        state
            .rankings
            .insert(commit.ranking.id.clone(), commit.ranking);
        Ok(())
    }

    async fn insert_attempt(&self, attempt: EvaluationAttempt) -> LearningResult<()> {
        let mut state = self.state.write().await;

        let same_scope = |a: &&EvaluationAttempt| {
            a.user_id == attempt.user_id && a.evaluation_id == attempt.evaluation_id
        };
        if let Some(open) = state
            .attempts
            .values()
            .filter(same_scope)
            .find(|a| a.state == AttemptState::InProgress)
        {
            return Err(ConflictKind::AttemptInProgress {
                attempt_id: open.id.clone(),
            }
            .into());
        }
        if state
            .attempts
            .values()
            .filter(same_scope)
            .any(|a| a.attempt_number == attempt.attempt_number)
        {
            return Err(ConflictKind::Duplicate(format!(
                "attempt number {} already exists",
                attempt.attempt_number
            ))
            .into());
        }

        state.attempts.insert(attempt.id.clone(), attempt);
        Ok(())
    }

    async fn get_attempt(&self, attempt_id: &str) -> LearningResult<Option<EvaluationAttempt>> {
        Ok(self.state.read().await.attempts.get(attempt_id).cloned())
    }

    async fn attempts_for(
        &self,
        user_id: &str,
        evaluation_id: &str,
    ) -> LearningResult<Vec<EvaluationAttempt>> {
        let state = self.state.read().await;
        let mut attempts: Vec<EvaluationAttempt> = state
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.evaluation_id == evaluation_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }

    async fn upsert_answer(&self, answer: AttemptAnswer) -> LearningResult<()> {
        let mut state = self.state.write().await;
        state.answers.insert(answer.id.clone(), answer);
        Ok(())
    }

    async fn answers_for_attempt(&self, attempt_id: &str) -> LearningResult<Vec<AttemptAnswer>> {
        let state = self.state.read().await;
        Ok(state
            .answers
            .values()
            .filter(|answer| answer.attempt_id == attempt_id)
            .cloned()
            .collect())
    }

    async fn insert_certificate(&self, certificate: Certificate) -> LearningResult<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.certificates.get(&certificate.id) {
            return Err(ConflictKind::AlreadyCertified {
                certificate_code: existing.code.clone(),
            }
            .into());
        }
        if state.certificates.values().any(|c| c.code == certificate.code) {
            return Err(ConflictKind::Duplicate(format!(
                "certificate code {} already exists",
                certificate.code
            ))
            .into());
        }
        state.certificates.insert(certificate.id.clone(), certificate);
        Ok(())
    }

    async fn get_certificate(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<Option<Certificate>> {
        let key = Certificate::key(user_id, module_id);
        Ok(self.state.read().await.certificates.get(&key).cloned())
    }

    async fn certificate_by_code(&self, code: &str) -> LearningResult<Option<Certificate>> {
        let state = self.state.read().await;
        Ok(state.certificates.values().find(|c| c.code == code).cloned())
    }

    async fn certificates_for_user(&self, user_id: &str) -> LearningResult<Vec<Certificate>> {
        let state = self.state.read().await;
        let mut certificates: Vec<Certificate> = state
            .certificates
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        certificates.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(certificates)
    }

    async fn mark_certificate_downloaded(&self, certificate: &Certificate) -> LearningResult<()> {
        let mut state = self.state.write().await;
        let stored = state
            .certificates
            .get_mut(&certificate.id)
            .ok_or_else(|| LearningError::not_found("certificate", certificate.code.clone()))?;
        stored.downloaded = true;
        stored.downloaded_at = certificate.downloaded_at;
        Ok(())
    }

    async fn get_exercise(&self, exercise_id: &str) -> LearningResult<Option<Exercise>> {
        Ok(self.state.read().await.exercises.get(exercise_id).cloned())
    }

    async fn insert_exercise_attempt(&self, attempt: ExerciseAttempt) -> LearningResult<()> {
        self.state.write().await.exercise_attempts.push(attempt);
        Ok(())
    }

    async fn exercise_attempts_for(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> LearningResult<Vec<ExerciseAttempt>> {
        let state = self.state.read().await;
        Ok(state
            .exercise_attempts
            .iter()
            .filter(|a| a.user_id == user_id && a.lesson_id == lesson_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attempt(id: &str, number: u32, state: AttemptState) -> EvaluationAttempt {
        EvaluationAttempt {
            id: id.to_string(),
            user_id: "u1".to_string(),
            evaluation_id: "e1".to_string(),
            module_id: "m1".to_string(),
            attempt_number: number,
            questions: Vec::new(),
            state,
            started_at: Utc::now(),
            ended_at: None,
            elapsed_seconds: None,
            points_available: 0.0,
            points_earned: 0.0,
            score_percent: 0.0,
            correct_count: 0,
            incorrect_count: 0,
            passed: false,
        }
    }

    #[tokio::test]
    async fn second_open_attempt_is_rejected() {
        let store = InMemoryStore::new();
        store
            .insert_attempt(attempt("a1", 1, AttemptState::InProgress))
            .await
            .unwrap();

        let err = store
            .insert_attempt(attempt("a2", 2, AttemptState::InProgress))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LearningError::Conflict(ConflictKind::AttemptInProgress { ref attempt_id }) if attempt_id == "a1"
        ));
    }

    #[tokio::test]
    async fn seen_lesson_is_not_rewritten() {
        let store = InMemoryStore::new();
        let first = LessonProgress::seen("u1", "l1", "m1", Utc::now());
        assert!(store.mark_lesson_seen(first.clone()).await.unwrap());

        let later = LessonProgress::seen("u1", "l1", "m1", Utc::now() + chrono::Duration::hours(1));
        assert!(!store.mark_lesson_seen(later).await.unwrap());

        let stored = store.get_lesson_progress("u1", "l1").await.unwrap().unwrap();
        assert_eq!(stored.seen_at, first.seen_at);
    }
}
