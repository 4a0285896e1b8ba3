use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

pub type LearningResult<T> = Result<T, LearningError>;

/// Error taxonomy shared by the store, the services and the HTTP layer.
#[derive(Debug, Error)]
pub enum LearningError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Conflict(ConflictKind),

    #[error("{0}")]
    PolicyViolation(PolicyViolation),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConflictKind {
    #[error("an attempt is already in progress ({attempt_id})")]
    AttemptInProgress { attempt_id: String },

    #[error("a certificate was already issued for this module ({certificate_code})")]
    AlreadyCertified { certificate_code: String },

    #[error("question {question_id} is not part of this attempt")]
    QuestionNotInAttempt { question_id: String },

    #[error("attempt {attempt_id} is already {state}")]
    AttemptClosed { attempt_id: String, state: String },

    #[error("another operation is running for {scope}")]
    Busy { scope: String },

    #[error("duplicate record: {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyViolation {
    #[error("attempt limit reached, next attempt available at {available_at}")]
    RetryCooldown {
        remaining_seconds: i64,
        available_at: DateTime<Utc>,
    },

    #[error("the evaluation has already been passed")]
    AlreadyPassed,

    #[error("complete lesson {required_lesson_id} first")]
    LessonLocked { required_lesson_id: String },

    #[error("evaluation locked: {lessons_seen}/{lessons_required} lessons seen")]
    EvaluationLocked {
        lessons_seen: u32,
        lessons_required: u32,
    },

    #[error("module must be 100% complete with the evaluation passed (currently {percent_complete}%)")]
    NotEligible { percent_complete: f64 },
}

impl LearningError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        LearningError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        LearningError::Storage(err.to_string())
    }

    pub fn code(&self) -> &'static str {
        match self {
            LearningError::NotFound { .. } => "not_found",
            LearningError::Conflict(_) => "conflict",
            LearningError::PolicyViolation(PolicyViolation::RetryCooldown { .. }) => {
                "retry_cooldown"
            }
            LearningError::PolicyViolation(_) => "policy_violation",
            LearningError::Validation(_) => "validation_failed",
            LearningError::Storage(_) => "storage_failure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            LearningError::NotFound { .. } => StatusCode::NOT_FOUND,
            LearningError::Conflict(_) => StatusCode::CONFLICT,
            LearningError::PolicyViolation(PolicyViolation::RetryCooldown { .. }) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            LearningError::PolicyViolation(_) => StatusCode::FORBIDDEN,
            LearningError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LearningError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Value {
        match self {
            LearningError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
            LearningError::Conflict(ConflictKind::AttemptInProgress { attempt_id }) => {
                json!({ "attempt_id": attempt_id })
            }
            LearningError::Conflict(ConflictKind::AlreadyCertified { certificate_code }) => {
                json!({ "certificate_code": certificate_code })
            }
            LearningError::Conflict(ConflictKind::QuestionNotInAttempt { question_id }) => {
                json!({ "question_id": question_id })
            }
            LearningError::Conflict(ConflictKind::AttemptClosed { attempt_id, state }) => {
                json!({ "attempt_id": attempt_id, "state": state })
            }
            LearningError::PolicyViolation(PolicyViolation::RetryCooldown {
                remaining_seconds,
                available_at,
            }) => json!({
                "remaining_seconds": remaining_seconds,
                "available_at": available_at,
            }),
            LearningError::PolicyViolation(PolicyViolation::LessonLocked {
                required_lesson_id,
            }) => json!({ "required_lesson_id": required_lesson_id }),
            LearningError::PolicyViolation(PolicyViolation::EvaluationLocked {
                lessons_seen,
                lessons_required,
            }) => json!({
                "lessons_seen": lessons_seen,
                "lessons_required": lessons_required,
            }),
            LearningError::PolicyViolation(PolicyViolation::NotEligible { percent_complete }) => {
                json!({ "percent_complete": percent_complete })
            }
            _ => Value::Null,
        }
    }
}

impl From<ConflictKind> for LearningError {
    fn from(kind: ConflictKind) -> Self {
        LearningError::Conflict(kind)
    }
}

impl From<PolicyViolation> for LearningError {
    fn from(violation: PolicyViolation) -> Self {
        LearningError::PolicyViolation(violation)
    }
}

impl From<mongodb::error::Error> for LearningError {
    fn from(err: mongodb::error::Error) -> Self {
        LearningError::Storage(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for LearningError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        LearningError::Storage(format!("Failed to encode document: {}", err))
    }
}

impl IntoResponse for LearningError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected ({}): {}", self.code(), self);
        }

        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
            "details": self.details(),
        });

        (status, Json(body)).into_response()
    }
}
