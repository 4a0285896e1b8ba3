use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluation::{EvaluationInfo, OptionView, QuestionKind, QuestionView};
use super::progress::ModuleProgressResponse;
use crate::utils::time::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    InProgress,
    Completed,
    Expired,
}

impl AttemptState {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptState::InProgress => "in_progress",
            AttemptState::Completed => "completed",
            AttemptState::Expired => "expired",
        }
    }

    /// Completed and expired attempts both count toward the attempt quota.
    pub fn is_finished(self) -> bool {
        !matches!(self, AttemptState::InProgress)
    }
}

/// Question picked for an attempt, with the option order the learner sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledQuestion {
    pub question_id: String,
    pub option_order: Vec<String>,
}

/// Stored in the "evaluation_attempts" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationAttempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub evaluation_id: String,
    pub module_id: String,
    pub attempt_number: u32,
    pub questions: Vec<SampledQuestion>,
    pub state: AttemptState,
    #[serde(with = "bson_datetime_as_chrono")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub elapsed_seconds: Option<i64>,
    #[serde(default)]
    pub points_available: f64,
    #[serde(default)]
    pub points_earned: f64,
    #[serde(default)]
    pub score_percent: f64,
    #[serde(default)]
    pub correct_count: u32,
    #[serde(default)]
    pub incorrect_count: u32,
    #[serde(default)]
    pub passed: bool,
}

impl EvaluationAttempt {
    pub fn contains_question(&self, question_id: &str) -> bool {
        self.questions.iter().any(|q| q.question_id == question_id)
    }
}

/// Answer submitted for one question. A choice answer names the selected
/// option; a match-pairs answer lists (option, pair key) associations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerPayload {
    Choice { option_id: String },
    Pairs { pairs: Vec<MatchPair> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPair {
    pub option_id: String,
    pub pair_key: String,
}

/// Stored in the "attempt_answers" collection; `_id` is "{attempt}:{question}"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptAnswer {
    #[serde(rename = "_id")]
    pub id: String,
    pub attempt_id: String,
    pub question_id: String,
    pub payload: AnswerPayload,
    pub is_correct: bool,
    pub points_awarded: f64,
    #[serde(with = "bson_datetime_as_chrono")]
    pub answered_at: DateTime<Utc>,
}

impl AttemptAnswer {
    pub fn key(attempt_id: &str, question_id: &str) -> String {
        format!("{}:{}", attempt_id, question_id)
    }
}

/// State of an attempt as of a given instant, regardless of what is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveState {
    InProgress { remaining_seconds: Option<i64> },
    Completed,
    Expired,
    /// Stored as in progress but past its limit; has to be closed.
    Overdue,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub question_id: String,
    pub answer: AnswerPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub attempt_id: String,
    pub attempt_number: u32,
    pub state: AttemptState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: Option<i64>,
    pub score_percent: f64,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub passed: bool,
}

impl From<&EvaluationAttempt> for AttemptSummary {
    fn from(attempt: &EvaluationAttempt) -> Self {
        AttemptSummary {
            attempt_id: attempt.id.clone(),
            attempt_number: attempt.attempt_number,
            state: attempt.state,
            started_at: attempt.started_at,
            ended_at: attempt.ended_at,
            elapsed_seconds: attempt.elapsed_seconds,
            score_percent: attempt.score_percent,
            correct_count: attempt.correct_count,
            incorrect_count: attempt.incorrect_count,
            passed: attempt.passed,
        }
    }
}

/// Attempt closed by finalize or by expiry, with the progress it produced.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptClosure {
    pub attempt: AttemptSummary,
    pub progress: ModuleProgressResponse,
}

/// Outcome of an answer submission. Expiry is reported, not raised.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Recorded {
        question_id: String,
        answered_count: u32,
        total_questions: u32,
        remaining_seconds: Option<i64>,
    },
    Expired(AttemptClosure),
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedAttempt {
    pub attempt: AttemptSummary,
    pub evaluation: EvaluationInfo,
    pub expires_at: Option<DateTime<Utc>>,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentQuestion {
    #[serde(flatten)]
    pub question: QuestionView,
    pub answered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentAttemptView {
    pub attempt: AttemptSummary,
    pub evaluation: EvaluationInfo,
    pub elapsed_seconds: i64,
    pub remaining_seconds: Option<i64>,
    pub answered_count: u32,
    pub questions: Vec<CurrentQuestion>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CurrentAttempt {
    None,
    InProgress(CurrentAttemptView),
    Expired(AttemptClosure),
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOverview {
    pub evaluation: EvaluationInfo,
    pub unlocked: bool,
    pub can_attempt: bool,
    pub message: String,
    pub finished_count: u32,
    pub remaining_attempts: u32,
    pub in_progress_attempt_id: Option<String>,
    pub already_passed: bool,
    pub best_percent: Option<f64>,
    pub next_available_at: Option<DateTime<Utc>>,
    pub attempts: Vec<AttemptSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptHistory {
    pub evaluation_id: String,
    pub attempts: Vec<AttemptSummary>,
    pub finished_count: u32,
    pub passed_count: u32,
    pub best_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerDetail {
    pub question_id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub points: f64,
    pub answered: bool,
    pub is_correct: bool,
    pub points_awarded: f64,
    pub submitted: Option<AnswerPayload>,
    pub correct_options: Vec<OptionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptResultDetail {
    pub attempt: AttemptSummary,
    pub evaluation: EvaluationInfo,
    pub points_available: f64,
    pub points_earned: f64,
    pub recommendation: Recommendation,
    pub recommendation_message: &'static str,
    pub answers: Vec<AnswerDetail>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Excellent,
    VeryGood,
    Passed,
    Close,
    Review,
}

impl Recommendation {
    pub fn for_attempt(score_percent: f64, passed: bool) -> Self {
        match (passed, score_percent) {
            (true, s) if s >= 90.0 => Recommendation::Excellent,
            (true, s) if s >= 80.0 => Recommendation::VeryGood,
            (true, _) => Recommendation::Passed,
            (false, s) if s >= 60.0 => Recommendation::Close,
            (false, _) => Recommendation::Review,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Recommendation::Excellent => "Outstanding result, you have mastered this module.",
            Recommendation::VeryGood => "Very good work, the module is complete.",
            Recommendation::Passed => "Passed. Reviewing the weaker topics will help.",
            Recommendation::Close => "Almost there. Review the missed questions and try again.",
            Recommendation::Review => "Go through the lessons again before the next attempt.",
        }
    }
}
