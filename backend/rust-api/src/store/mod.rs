//! Persistence boundary. Services talk to a `LearningStore` and never to a
//! driver directly, so the same rules run against MongoDB in production and
//! against the in-memory store in tests and local runs.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LearningResult;
use crate::models::attempt::{AttemptAnswer, EvaluationAttempt};
use crate::models::catalog::{Lesson, Module};
use crate::models::certificate::Certificate;
use crate::models::evaluation::{Evaluation, Question};
use crate::models::exercise::{Exercise, ExerciseAttempt};
use crate::models::progress::{LessonProgress, ModuleProgress, RankingEntry};

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

/// Derived state written in one atomic step: the (optional) closed attempt,
/// the recomputed module progress and the matching ranking row.
#[derive(Debug, Clone)]
pub struct ProgressCommit {
    /// Replaces a stored attempt that must still be in progress.
    pub attempt: Option<EvaluationAttempt>,
    pub progress: ModuleProgress,
    pub ranking: RankingEntry,
}

/// Course content loaded at startup (memory backend) or upserted into
/// MongoDB for local environments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(default)]
    pub evaluations: Vec<Evaluation>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub exercises: Vec<Exercise>,
}

impl CatalogSeed {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read catalog seed {}: {}", path, e))?;
        let seed = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid catalog seed {}: {}", path, e))?;
        Ok(seed)
    }
}

#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn ping(&self) -> LearningResult<()>;

    async fn load_catalog(&self, seed: CatalogSeed) -> LearningResult<()>;

    // Catalog
    async fn list_modules(&self) -> LearningResult<Vec<Module>>;
    async fn get_module(&self, module_id: &str) -> LearningResult<Option<Module>>;
    async fn lessons_for_module(&self, module_id: &str) -> LearningResult<Vec<Lesson>>;
    async fn get_lesson(&self, lesson_id: &str) -> LearningResult<Option<Lesson>>;
    async fn evaluation_for_module(&self, module_id: &str) -> LearningResult<Option<Evaluation>>;
    async fn get_evaluation(&self, evaluation_id: &str) -> LearningResult<Option<Evaluation>>;
    async fn questions_for_evaluation(&self, evaluation_id: &str) -> LearningResult<Vec<Question>>;
    async fn exercises_for_lesson(&self, lesson_id: &str) -> LearningResult<Vec<Exercise>>;

    // Lesson progress
    async fn get_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> LearningResult<Option<LessonProgress>>;
    async fn lesson_progress_for_module(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<Vec<LessonProgress>>;
    /// Inserts the row unless the lesson is already seen. Returns whether a
    /// new row was written.
    async fn mark_lesson_seen(&self, progress: LessonProgress) -> LearningResult<bool>;

    // Module progress and rankings
    async fn get_module_progress(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<Option<ModuleProgress>>;
    async fn get_ranking(&self, module_id: &str, user_id: &str)
        -> LearningResult<Option<RankingEntry>>;
    async fn rankings_for_module(&self, module_id: &str) -> LearningResult<Vec<RankingEntry>>;
    /// Applies every write of the commit or none of them. Fails with
    /// `Conflict(AttemptClosed)` when the attempt is no longer in progress.
    async fn commit_progress(&self, commit: ProgressCommit) -> LearningResult<()>;

    // Attempts
    /// Fails with `Conflict(AttemptInProgress)` when the user already has an
    /// open attempt for the evaluation.
    async fn insert_attempt(&self, attempt: EvaluationAttempt) -> LearningResult<()>;
    async fn get_attempt(&self, attempt_id: &str) -> LearningResult<Option<EvaluationAttempt>>;
    async fn attempts_for(
        &self,
        user_id: &str,
        evaluation_id: &str,
    ) -> LearningResult<Vec<EvaluationAttempt>>;
    async fn upsert_answer(&self, answer: AttemptAnswer) -> LearningResult<()>;
    async fn answers_for_attempt(&self, attempt_id: &str) -> LearningResult<Vec<AttemptAnswer>>;

    // Certificates
    /// Fails with `Conflict(AlreadyCertified)` carrying the stored code when
    /// the (user, module) pair already holds a certificate.
    async fn insert_certificate(&self, certificate: Certificate) -> LearningResult<()>;
    async fn get_certificate(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<Option<Certificate>>;
    async fn certificate_by_code(&self, code: &str) -> LearningResult<Option<Certificate>>;
    async fn certificates_for_user(&self, user_id: &str) -> LearningResult<Vec<Certificate>>;
    async fn mark_certificate_downloaded(
        &self,
        certificate: &Certificate,
    ) -> LearningResult<()>;

    // Practice exercises
    async fn get_exercise(&self, exercise_id: &str) -> LearningResult<Option<Exercise>>;
    async fn insert_exercise_attempt(&self, attempt: ExerciseAttempt) -> LearningResult<()>;
    async fn exercise_attempts_for(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> LearningResult<Vec<ExerciseAttempt>>;
}
