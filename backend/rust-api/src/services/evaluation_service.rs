//! Evaluation attempts: start, answer, finalize and lazy expiry.
//!
//! Nothing closes an attempt in the background. An attempt past its time
//! limit still reads as in progress in storage until the next operation on
//! that user's evaluation touches it; `resolve_state` decides what it really
//! is and the touching operation performs the expiry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use super::progress_service::{has_passed, ProgressService};
use super::scope_lock::{evaluation_scope, ScopeLocks};
use super::scoring::{grade, Grade, ScoreSummary};
use super::{AppState, SharedRng};
use crate::config::EvaluationPolicy;
use crate::error::{ConflictKind, LearningError, LearningResult, PolicyViolation};
use crate::metrics::{EVALUATION_ANSWERS_TOTAL, EVALUATION_ATTEMPTS_TOTAL};
use crate::models::attempt::{
    AnswerDetail, AnswerOutcome, AttemptAnswer, AttemptClosure, AttemptHistory,
    AttemptResultDetail, AttemptState, AttemptSummary, CurrentAttempt, CurrentAttemptView,
    CurrentQuestion, EffectiveState, EvaluationAttempt, EvaluationOverview, Recommendation,
    SampledQuestion, StartedAttempt, SubmitAnswerRequest,
};
use crate::models::catalog::active_in_order;
use crate::models::evaluation::{Evaluation, EvaluationInfo, OptionView, Question, QuestionView};
use crate::models::progress::{ModuleProgress, ModuleProgressResponse};
use crate::store::LearningStore;
use crate::utils::time::{to_millis, Clock};

/// Effective state of `attempt` at `now`. A limit of zero minutes disables
/// expiry.
pub fn resolve_state(
    attempt: &EvaluationAttempt,
    time_limit_minutes: u32,
    now: DateTime<Utc>,
) -> EffectiveState {
    match attempt.state {
        AttemptState::Completed => EffectiveState::Completed,
        AttemptState::Expired => EffectiveState::Expired,
        AttemptState::InProgress if time_limit_minutes == 0 => EffectiveState::InProgress {
            remaining_seconds: None,
        },
        AttemptState::InProgress => {
            let limit = i64::from(time_limit_minutes) * 60;
            let elapsed = (now - attempt.started_at).num_seconds();
            if elapsed > limit {
                EffectiveState::Overdue
            } else {
                EffectiveState::InProgress {
                    remaining_seconds: Some(limit - elapsed),
                }
            }
        }
    }
}

/// Decides whether a new attempt may start given the user's settled
/// attempts (none overdue). Returns the number of the new attempt.
pub fn check_start_policy(
    attempts: &[EvaluationAttempt],
    max_attempts: u32,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> LearningResult<u32> {
    if let Some(open) = attempts.iter().find(|a| a.state == AttemptState::InProgress) {
        return Err(ConflictKind::AttemptInProgress {
            attempt_id: open.id.clone(),
        }
        .into());
    }
    if has_passed(attempts) {
        return Err(PolicyViolation::AlreadyPassed.into());
    }

    let finished: Vec<&EvaluationAttempt> =
        attempts.iter().filter(|a| a.state.is_finished()).collect();
    let finished_count = finished.len() as u32;

    if finished_count >= max_attempts.max(1) {
        let last_end = finished
            .iter()
            .map(|a| a.ended_at.unwrap_or(a.started_at))
            .max();
        if let Some(last_end) = last_end {
            let available_at = last_end + cooldown;
            if now < available_at {
                return Err(PolicyViolation::RetryCooldown {
                    remaining_seconds: (available_at - now).num_seconds(),
                    available_at,
                }
                .into());
            }
        }
    }

    Ok(finished_count + 1)
}

/// Picks `count` questions uniformly without replacement (the whole pool
/// when `count` is zero or larger than the pool) and shuffles each
/// question's options independently.
pub fn sample_questions<R: Rng + ?Sized>(
    pool: &[Question],
    count: u32,
    rng: &mut R,
) -> Vec<SampledQuestion> {
    let mut picked: Vec<&Question> = pool.iter().collect();
    picked.shuffle(rng);
    let count = count as usize;
    if count > 0 && count < picked.len() {
        picked.truncate(count);
    }

    picked
        .into_iter()
        .map(|question| {
            let mut option_order: Vec<String> =
                question.options.iter().map(|o| o.id.clone()).collect();
            option_order.shuffle(rng);
            SampledQuestion {
                question_id: question.id.clone(),
                option_order,
            }
        })
        .collect()
}

/// Score of the answered questions of an attempt. Answers to questions that
/// left the pool are ignored.
pub fn score_attempt(
    attempt: &EvaluationAttempt,
    pool: &[Question],
    answers: &[AttemptAnswer],
) -> ScoreSummary {
    let points: HashMap<&str, f64> = pool.iter().map(|q| (q.id.as_str(), q.points)).collect();
    ScoreSummary::from_graded(answers.iter().filter_map(|answer| {
        if !attempt.contains_question(&answer.question_id) {
            return None;
        }
        points.get(answer.question_id.as_str()).map(|points| {
            (
                *points,
                Grade {
                    is_correct: answer.is_correct,
                    points_awarded: answer.points_awarded,
                },
            )
        })
    }))
}

fn best_percent(attempts: &[EvaluationAttempt]) -> Option<f64> {
    attempts
        .iter()
        .filter(|a| a.state.is_finished())
        .map(|a| a.score_percent)
        .reduce(f64::max)
}

pub struct EvaluationService {
    store: Arc<dyn LearningStore>,
    locks: Arc<ScopeLocks>,
    clock: Arc<dyn Clock>,
    rng: SharedRng,
    policy: EvaluationPolicy,
    progress: ProgressService,
}

impl EvaluationService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            locks: state.locks.clone(),
            clock: state.clock.clone(),
            rng: state.rng.clone(),
            policy: state.config.evaluation.clone(),
            progress: ProgressService::new(state),
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::hours(self.policy.retry_cooldown_hours)
    }

    async fn locked<T, F, Fut>(&self, user_id: &str, evaluation_id: &str, f: F) -> LearningResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LearningResult<T>>,
    {
        let guard = self
            .locks
            .acquire(&evaluation_scope(user_id, evaluation_id))
            .await?;
        let result = f().await;
        guard.release().await;
        result
    }

    async fn active_evaluation(&self, module_id: &str) -> LearningResult<Evaluation> {
        self.store
            .get_module(module_id)
            .await?
            .filter(|m| m.state.is_active())
            .ok_or_else(|| LearningError::not_found("module", module_id))?;
        self.store
            .evaluation_for_module(module_id)
            .await?
            .filter(|e| e.state.is_active())
            .ok_or_else(|| LearningError::not_found("evaluation", module_id))
    }

    async fn owned_attempt(&self, user_id: &str, attempt_id: &str) -> LearningResult<EvaluationAttempt> {
        self.store
            .get_attempt(attempt_id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| LearningError::not_found("attempt", attempt_id))
    }

    async fn evaluation_of(&self, attempt: &EvaluationAttempt) -> LearningResult<Evaluation> {
        self.store
            .get_evaluation(&attempt.evaluation_id)
            .await?
            .ok_or_else(|| LearningError::not_found("evaluation", attempt.evaluation_id.clone()))
    }

    /// (lessons seen, active lessons) for the evaluation's module.
    async fn lesson_coverage(&self, user_id: &str, module_id: &str) -> LearningResult<(u32, u32)> {
        let lessons = active_in_order(self.store.lessons_for_module(module_id).await?);
        let seen = self
            .store
            .lesson_progress_for_module(user_id, module_id)
            .await?;
        let seen_count = lessons
            .iter()
            .filter(|lesson| {
                seen.iter()
                    .any(|p| p.seen && p.lesson_id == lesson.id)
            })
            .count();
        Ok((seen_count as u32, lessons.len() as u32))
    }

    fn lessons_unlock(&self, seen: u32, total: u32) -> bool {
        !self.policy.require_lessons_completed || (total > 0 && seen == total)
    }

    /// Closes an overdue attempt as expired: scored for information, never
    /// passed, elapsed time set to the full limit.
    async fn expire_locked(
        &self,
        mut attempt: EvaluationAttempt,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> LearningResult<(EvaluationAttempt, ModuleProgress)> {
        let pool = self.store.questions_for_evaluation(&evaluation.id).await?;
        let answers = self.store.answers_for_attempt(&attempt.id).await?;
        let score = score_attempt(&attempt, &pool, &answers);

        attempt.state = AttemptState::Expired;
        attempt.ended_at = Some(to_millis(now));
        attempt.elapsed_seconds = Some(i64::from(evaluation.time_limit_minutes) * 60);
        attempt.points_available = score.points_available;
        attempt.points_earned = score.points_earned;
        attempt.score_percent = score.score_percent;
        attempt.correct_count = score.correct_count;
        attempt.incorrect_count = score.incorrect_count;
        attempt.passed = false;

        let progress = self
            .progress
            .commit_attempt(&attempt.user_id, attempt.clone())
            .await?;

        EVALUATION_ATTEMPTS_TOTAL.with_label_values(&["expired"]).inc();
        tracing::info!(
            "Attempt expired: id={} user={} score={}",
            attempt.id,
            attempt.user_id,
            attempt.score_percent
        );
        Ok((attempt, progress))
    }

    /// Loads the user's attempts and expires every overdue one.
    async fn settle(
        &self,
        user_id: &str,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> LearningResult<Vec<EvaluationAttempt>> {
        let mut attempts = self.store.attempts_for(user_id, &evaluation.id).await?;
        for attempt in attempts.iter_mut() {
            if resolve_state(attempt, evaluation.time_limit_minutes, now) == EffectiveState::Overdue {
                let (expired, _) = self.expire_locked(attempt.clone(), evaluation, now).await?;
                *attempt = expired;
            }
        }
        Ok(attempts)
    }

    pub async fn overview(&self, user_id: &str, module_id: &str) -> LearningResult<EvaluationOverview> {
        let evaluation = self.active_evaluation(module_id).await?;
        let (seen, total) = self.lesson_coverage(user_id, module_id).await?;
        let unlocked = self.lessons_unlock(seen, total);

        let attempts = self
            .locked(user_id, &evaluation.id, || {
                self.settle(user_id, &evaluation, self.clock.now())
            })
            .await?;

        let now = self.clock.now();
        let policy = check_start_policy(&attempts, evaluation.max_attempts, self.cooldown(), now);
        let finished_count = attempts.iter().filter(|a| a.state.is_finished()).count() as u32;
        let already_passed = has_passed(&attempts);

        let (can_attempt, message, next_available_at) = match (&policy, unlocked) {
            (_, false) => (
                false,
                format!("Complete all lessons first ({}/{} seen)", seen, total),
                None,
            ),
            (Ok(number), true) => (true, format!("Attempt {} is available", number), None),
            (
                Err(LearningError::PolicyViolation(PolicyViolation::RetryCooldown {
                    available_at,
                    ..
                })),
                true,
            ) => (false, policy_message(&policy), Some(*available_at)),
            (Err(_), true) => (false, policy_message(&policy), None),
        };

        let max_attempts = evaluation.max_attempts.max(1);
        let remaining_attempts = if already_passed {
            0
        } else if finished_count < max_attempts {
            max_attempts - finished_count
        } else if can_attempt {
            1
        } else {
            0
        };

        let mut summaries: Vec<AttemptSummary> = attempts.iter().map(AttemptSummary::from).collect();
        summaries.sort_by(|a, b| b.attempt_number.cmp(&a.attempt_number));

        Ok(EvaluationOverview {
            evaluation: EvaluationInfo::from(&evaluation),
            unlocked,
            can_attempt,
            message,
            finished_count,
            remaining_attempts,
            in_progress_attempt_id: attempts
                .iter()
                .find(|a| a.state == AttemptState::InProgress)
                .map(|a| a.id.clone()),
            already_passed,
            best_percent: best_percent(&attempts),
            next_available_at,
            attempts: summaries,
        })
    }

    pub async fn start_attempt(&self, user_id: &str, module_id: &str) -> LearningResult<StartedAttempt> {
        let evaluation = self.active_evaluation(module_id).await?;

        let (seen, total) = self.lesson_coverage(user_id, module_id).await?;
        if !self.lessons_unlock(seen, total) {
            EVALUATION_ATTEMPTS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(PolicyViolation::EvaluationLocked {
                lessons_seen: seen,
                lessons_required: total,
            }
            .into());
        }

        self.locked(user_id, &evaluation.id, || self.start_locked(user_id, &evaluation))
            .await
    }

    async fn start_locked(&self, user_id: &str, evaluation: &Evaluation) -> LearningResult<StartedAttempt> {
        let now = self.clock.now();
        let attempts = self.settle(user_id, evaluation, now).await?;

        let attempt_number =
            match check_start_policy(&attempts, evaluation.max_attempts, self.cooldown(), now) {
                Ok(number) => number,
                Err(e) => {
                    EVALUATION_ATTEMPTS_TOTAL.with_label_values(&["rejected"]).inc();
                    tracing::warn!(
                        "Attempt start rejected: user={} evaluation={}: {}",
                        user_id,
                        evaluation.id,
                        e
                    );
                    return Err(e);
                }
            };

        let pool = self.store.questions_for_evaluation(&evaluation.id).await?;
        if pool.is_empty() {
            return Err(LearningError::not_found("questions", evaluation.id.clone()));
        }

        let questions = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            sample_questions(&pool, evaluation.question_count, &mut *rng)
        };

        let started_at = to_millis(now);
        let attempt = EvaluationAttempt {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            evaluation_id: evaluation.id.clone(),
            module_id: evaluation.module_id.clone(),
            attempt_number,
            questions,
            state: AttemptState::InProgress,
            started_at,
            ended_at: None,
            elapsed_seconds: None,
            points_available: 0.0,
            points_earned: 0.0,
            score_percent: 0.0,
            correct_count: 0,
            incorrect_count: 0,
            passed: false,
        };
        self.store.insert_attempt(attempt.clone()).await?;

        EVALUATION_ATTEMPTS_TOTAL.with_label_values(&["started"]).inc();
        tracing::info!(
            "Attempt started: id={} user={} evaluation={} number={}",
            attempt.id,
            user_id,
            evaluation.id,
            attempt_number
        );

        let by_id: HashMap<&str, &Question> = pool.iter().map(|q| (q.id.as_str(), q)).collect();
        let views = attempt
            .questions
            .iter()
            .filter_map(|s| {
                by_id
                    .get(s.question_id.as_str())
                    .map(|q| QuestionView::ordered(q, &s.option_order))
            })
            .collect();

        Ok(StartedAttempt {
            attempt: AttemptSummary::from(&attempt),
            evaluation: EvaluationInfo::from(evaluation),
            expires_at: (evaluation.time_limit_minutes > 0)
                .then(|| started_at + Duration::minutes(i64::from(evaluation.time_limit_minutes))),
            questions: views,
        })
    }

    pub async fn current_attempt(&self, user_id: &str, module_id: &str) -> LearningResult<CurrentAttempt> {
        let evaluation = self.active_evaluation(module_id).await?;
        self.locked(user_id, &evaluation.id, || self.current_locked(user_id, &evaluation))
            .await
    }

    async fn current_locked(&self, user_id: &str, evaluation: &Evaluation) -> LearningResult<CurrentAttempt> {
        let attempts = self.store.attempts_for(user_id, &evaluation.id).await?;
        let Some(attempt) = attempts
            .into_iter()
            .find(|a| a.state == AttemptState::InProgress)
        else {
            return Ok(CurrentAttempt::None);
        };

        let now = self.clock.now();
        let remaining_seconds = match resolve_state(&attempt, evaluation.time_limit_minutes, now) {
            EffectiveState::Overdue => {
                let (expired, progress) = self.expire_locked(attempt, evaluation, now).await?;
                return Ok(CurrentAttempt::Expired(AttemptClosure {
                    attempt: AttemptSummary::from(&expired),
                    progress: ModuleProgressResponse::from(&progress),
                }));
            }
            EffectiveState::InProgress { remaining_seconds } => remaining_seconds,
            EffectiveState::Completed | EffectiveState::Expired => return Ok(CurrentAttempt::None),
        };

        let pool = self.store.questions_for_evaluation(&evaluation.id).await?;
        let answers = self.store.answers_for_attempt(&attempt.id).await?;
        let by_id: HashMap<&str, &Question> = pool.iter().map(|q| (q.id.as_str(), q)).collect();

        let questions: Vec<CurrentQuestion> = attempt
            .questions
            .iter()
            .filter_map(|s| {
                by_id.get(s.question_id.as_str()).map(|q| CurrentQuestion {
                    question: QuestionView::ordered(q, &s.option_order),
                    answered: answers.iter().any(|a| a.question_id == s.question_id),
                })
            })
            .collect();
        let answered_count = questions.iter().filter(|q| q.answered).count() as u32;

        Ok(CurrentAttempt::InProgress(CurrentAttemptView {
            attempt: AttemptSummary::from(&attempt),
            evaluation: EvaluationInfo::from(evaluation),
            elapsed_seconds: (now - attempt.started_at).num_seconds().max(0),
            remaining_seconds,
            answered_count,
            questions,
        }))
    }

    pub async fn submit_answer(
        &self,
        user_id: &str,
        attempt_id: &str,
        request: SubmitAnswerRequest,
    ) -> LearningResult<AnswerOutcome> {
        let attempt = self.owned_attempt(user_id, attempt_id).await?;
        let evaluation = self.evaluation_of(&attempt).await?;
        self.locked(user_id, &evaluation.id, || {
            self.answer_locked(user_id, attempt_id, &evaluation, request)
        })
        .await
    }

    async fn answer_locked(
        &self,
        user_id: &str,
        attempt_id: &str,
        evaluation: &Evaluation,
        request: SubmitAnswerRequest,
    ) -> LearningResult<AnswerOutcome> {
        // Re-read under the lock; the attempt may have closed meanwhile.
        let attempt = self.owned_attempt(user_id, attempt_id).await?;
        let now = self.clock.now();

        let remaining_seconds = match resolve_state(&attempt, evaluation.time_limit_minutes, now) {
            EffectiveState::InProgress { remaining_seconds } => remaining_seconds,
            EffectiveState::Overdue => {
                let (expired, progress) = self.expire_locked(attempt, evaluation, now).await?;
                return Ok(AnswerOutcome::Expired(AttemptClosure {
                    attempt: AttemptSummary::from(&expired),
                    progress: ModuleProgressResponse::from(&progress),
                }));
            }
            EffectiveState::Completed | EffectiveState::Expired => {
                return Err(ConflictKind::AttemptClosed {
                    attempt_id: attempt.id.clone(),
                    state: attempt.state.as_str().to_string(),
                }
                .into())
            }
        };

        if !attempt.contains_question(&request.question_id) {
            return Err(ConflictKind::QuestionNotInAttempt {
                question_id: request.question_id,
            }
            .into());
        }

        let question = self
            .store
            .questions_for_evaluation(&evaluation.id)
            .await?
            .into_iter()
            .find(|q| q.id == request.question_id)
            .ok_or_else(|| LearningError::not_found("question", request.question_id.clone()))?;

        let graded = grade(question.kind, &question.options, question.points, &request.answer)?;

        self.store
            .upsert_answer(AttemptAnswer {
                id: AttemptAnswer::key(&attempt.id, &question.id),
                attempt_id: attempt.id.clone(),
                question_id: question.id.clone(),
                payload: request.answer,
                is_correct: graded.is_correct,
                points_awarded: graded.points_awarded,
                answered_at: to_millis(now),
            })
            .await?;

        EVALUATION_ANSWERS_TOTAL
            .with_label_values(&[if graded.is_correct { "true" } else { "false" }])
            .inc();
        tracing::debug!(
            "Answer recorded: attempt={} question={} correct={}",
            attempt.id,
            question.id,
            graded.is_correct
        );

        let answered_count = self
            .store
            .answers_for_attempt(&attempt.id)
            .await?
            .iter()
            .filter(|a| attempt.contains_question(&a.question_id))
            .count() as u32;

        Ok(AnswerOutcome::Recorded {
            question_id: question.id,
            answered_count,
            total_questions: attempt.questions.len() as u32,
            remaining_seconds,
        })
    }

    /// Completes the attempt and recomputes module progress in the same
    /// commit. An overdue attempt is expired instead.
    pub async fn finalize(&self, user_id: &str, attempt_id: &str) -> LearningResult<AttemptClosure> {
        let attempt = self.owned_attempt(user_id, attempt_id).await?;
        let evaluation = self.evaluation_of(&attempt).await?;
        self.locked(user_id, &evaluation.id, || {
            self.finalize_locked(user_id, attempt_id, &evaluation)
        })
        .await
    }

    async fn finalize_locked(
        &self,
        user_id: &str,
        attempt_id: &str,
        evaluation: &Evaluation,
    ) -> LearningResult<AttemptClosure> {
        let mut attempt = self.owned_attempt(user_id, attempt_id).await?;
        let now = self.clock.now();

        match resolve_state(&attempt, evaluation.time_limit_minutes, now) {
            EffectiveState::InProgress { .. } => {}
            EffectiveState::Overdue => {
                let (expired, progress) = self.expire_locked(attempt, evaluation, now).await?;
                return Ok(AttemptClosure {
                    attempt: AttemptSummary::from(&expired),
                    progress: ModuleProgressResponse::from(&progress),
                });
            }
            EffectiveState::Completed | EffectiveState::Expired => {
                return Err(ConflictKind::AttemptClosed {
                    attempt_id: attempt.id.clone(),
                    state: attempt.state.as_str().to_string(),
                }
                .into())
            }
        }

        let pool = self.store.questions_for_evaluation(&evaluation.id).await?;
        let answers = self.store.answers_for_attempt(&attempt.id).await?;
        let score = score_attempt(&attempt, &pool, &answers);
        let ended_at = to_millis(now);

        attempt.state = AttemptState::Completed;
        attempt.ended_at = Some(ended_at);
        attempt.elapsed_seconds = Some((ended_at - attempt.started_at).num_seconds().max(0));
        attempt.points_available = score.points_available;
        attempt.points_earned = score.points_earned;
        attempt.score_percent = score.score_percent;
        attempt.correct_count = score.correct_count;
        attempt.incorrect_count = score.incorrect_count;
        attempt.passed = score.passes(evaluation.passing_score_percent);

        let progress = self.progress.commit_attempt(user_id, attempt.clone()).await?;

        EVALUATION_ATTEMPTS_TOTAL
            .with_label_values(&[if attempt.passed { "passed" } else { "failed" }])
            .inc();
        tracing::info!(
            "Attempt finalized: id={} user={} score={} passed={}",
            attempt.id,
            user_id,
            attempt.score_percent,
            attempt.passed
        );

        Ok(AttemptClosure {
            attempt: AttemptSummary::from(&attempt),
            progress: ModuleProgressResponse::from(&progress),
        })
    }

    /// Detailed result of a finished attempt, with the right answers revealed.
    pub async fn result(&self, user_id: &str, attempt_id: &str) -> LearningResult<AttemptResultDetail> {
        let mut attempt = self.owned_attempt(user_id, attempt_id).await?;
        let evaluation = self.evaluation_of(&attempt).await?;

        if attempt.state == AttemptState::InProgress {
            attempt = self
                .locked(user_id, &evaluation.id, || {
                    self.closed_attempt_locked(user_id, attempt_id, &evaluation)
                })
                .await?;
        }

        let pool = self.store.questions_for_evaluation(&evaluation.id).await?;
        let answers = self.store.answers_for_attempt(&attempt.id).await?;
        let by_id: HashMap<&str, &Question> = pool.iter().map(|q| (q.id.as_str(), q)).collect();

        let details = attempt
            .questions
            .iter()
            .filter_map(|s| by_id.get(s.question_id.as_str()))
            .map(|question| {
                let answer = answers.iter().find(|a| a.question_id == question.id);
                AnswerDetail {
                    question_id: question.id.clone(),
                    prompt: question.prompt.clone(),
                    kind: question.kind,
                    points: question.points,
                    answered: answer.is_some(),
                    is_correct: answer.is_some_and(|a| a.is_correct),
                    points_awarded: answer.map_or(0.0, |a| a.points_awarded),
                    submitted: answer.map(|a| a.payload.clone()),
                    correct_options: question.correct_options().map(OptionView::revealed).collect(),
                }
            })
            .collect();

        let recommendation = Recommendation::for_attempt(attempt.score_percent, attempt.passed);
        Ok(AttemptResultDetail {
            attempt: AttemptSummary::from(&attempt),
            evaluation: EvaluationInfo::from(&evaluation),
            points_available: attempt.points_available,
            points_earned: attempt.points_earned,
            recommendation,
            recommendation_message: recommendation.message(),
            answers: details,
        })
    }

    async fn closed_attempt_locked(
        &self,
        user_id: &str,
        attempt_id: &str,
        evaluation: &Evaluation,
    ) -> LearningResult<EvaluationAttempt> {
        let fresh = self.owned_attempt(user_id, attempt_id).await?;
        let now = self.clock.now();
        match resolve_state(&fresh, evaluation.time_limit_minutes, now) {
            EffectiveState::Overdue => Ok(self.expire_locked(fresh, evaluation, now).await?.0),
            EffectiveState::InProgress { .. } => Err(ConflictKind::AttemptInProgress {
                attempt_id: fresh.id.clone(),
            }
            .into()),
            EffectiveState::Completed | EffectiveState::Expired => Ok(fresh),
        }
    }

    pub async fn history(&self, user_id: &str, module_id: &str) -> LearningResult<AttemptHistory> {
        let evaluation = self.active_evaluation(module_id).await?;
        let attempts = self
            .locked(user_id, &evaluation.id, || {
                self.settle(user_id, &evaluation, self.clock.now())
            })
            .await?;

        let mut summaries: Vec<AttemptSummary> = attempts.iter().map(AttemptSummary::from).collect();
        summaries.sort_by(|a, b| b.attempt_number.cmp(&a.attempt_number));

        Ok(AttemptHistory {
            evaluation_id: evaluation.id.clone(),
            finished_count: attempts.iter().filter(|a| a.state.is_finished()).count() as u32,
            passed_count: attempts
                .iter()
                .filter(|a| a.state == AttemptState::Completed && a.passed)
                .count() as u32,
            best_percent: best_percent(&attempts),
            attempts: summaries,
        })
    }
}

fn policy_message(policy: &LearningResult<u32>) -> String {
    match policy {
        Ok(number) => format!("Attempt {} is available", number),
        Err(e) => e.to_string(),
    }
}
