use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::AnswerPayload;
use super::catalog::LifecycleState;
use super::evaluation::{match_keys, OptionView, QuestionKind, QuestionOption};
use crate::utils::time::bson_datetime_as_chrono;

/// Practice exercise attached to a lesson, stored in "exercises"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exercise {
    #[serde(rename = "_id")]
    pub id: String,
    pub lesson_id: String,
    pub module_id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    #[serde(default)]
    pub order: u32,
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub state: LifecycleState,
}

/// Append-only log entry in "exercise_attempts"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseAttempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub exercise_id: String,
    pub lesson_id: String,
    pub payload: AnswerPayload,
    pub is_correct: bool,
    #[serde(with = "bson_datetime_as_chrono")]
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExerciseView {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub order: u32,
    pub instructions: &'static str,
    pub options: Vec<OptionView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub match_keys: Vec<String>,
}

impl From<&Exercise> for ExerciseView {
    fn from(exercise: &Exercise) -> Self {
        let mut options: Vec<&QuestionOption> = exercise.options.iter().collect();
        options.sort_by_key(|option| option.order);

        ExerciseView {
            id: exercise.id.clone(),
            prompt: exercise.prompt.clone(),
            kind: exercise.kind,
            order: exercise.order,
            instructions: exercise.kind.instructions(),
            options: options.into_iter().map(OptionView::from).collect(),
            match_keys: match_keys(&exercise.options),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExerciseFeedback {
    pub exercise_id: String,
    pub attempt_id: String,
    pub is_correct: bool,
    pub feedback: &'static str,
    pub correct_options: Vec<OptionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExerciseResult {
    pub exercise_id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub order: u32,
    pub answered: bool,
    pub correct: bool,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonExerciseResults {
    pub lesson_id: String,
    pub total_exercises: u32,
    pub answered: u32,
    pub correct: u32,
    pub pending: u32,
    pub percent_answered: f64,
    pub percent_correct: f64,
    pub recommendation: &'static str,
    pub results: Vec<ExerciseResult>,
}
