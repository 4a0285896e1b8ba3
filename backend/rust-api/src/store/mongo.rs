use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_document, Document};
use mongodb::error::{
    Error as MongoError, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use mongodb::options::{IndexOptions, ReplaceOptions};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CatalogSeed, LearningStore, ProgressCommit};
use crate::error::{ConflictKind, LearningError, LearningResult};
use crate::metrics::track_db_operation;
use crate::models::attempt::{AttemptAnswer, AttemptState, EvaluationAttempt};
use crate::models::catalog::{Lesson, Module};
use crate::models::certificate::Certificate;
use crate::models::evaluation::{Evaluation, Question};
use crate::models::exercise::{Exercise, ExerciseAttempt};
use crate::models::progress::{LessonProgress, ModuleProgress, RankingEntry};
use crate::utils::retry::{retry_when, retry_with, RetryConfig};
use crate::utils::time::chrono_to_bson;

const MODULES: &str = "modules";
const LESSONS: &str = "lessons";
const EVALUATIONS: &str = "evaluations";
const QUESTIONS: &str = "questions";
const EXERCISES: &str = "exercises";
const LESSON_PROGRESS: &str = "lesson_progress";
const MODULE_PROGRESS: &str = "module_progress";
const ATTEMPTS: &str = "evaluation_attempts";
const ANSWERS: &str = "attempt_answers";
const RANKINGS: &str = "rankings";
const CERTIFICATES: &str = "certificates";
const EXERCISE_ATTEMPTS: &str = "exercise_attempts";

/// MongoDB-backed store. `commit_progress` needs a replica set because it
/// runs as a multi-document transaction.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

enum CommitOutcome {
    Applied,
    AttemptNotOpen,
}

pub fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        ErrorKind::Command(ce) => ce.code == 11000,
        _ => false,
    }
}

/// The whole transaction may be re-run.
fn is_transient(err: &MongoError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
}

/// Only the commit may be re-sent; the writes may already be durable.
fn is_unknown_commit(err: &MongoError) -> bool {
    err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
}

fn upsert() -> ReplaceOptions {
    ReplaceOptions::builder().upsert(true).build()
}

impl MongoStore {
    pub fn new(client: Client, db: Database) -> Self {
        Self { client, db }
    }

    fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection::<T>(name)
    }

    /// Creates the unique indexes the business rules rely on. Composite
    /// `_id`s already cover (user, lesson), (user, module) and
    /// (module, user).
    pub async fn ensure_indexes(&self) -> LearningResult<()> {
        let unique = |keys: Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };

        let attempts = self.collection::<Document>(ATTEMPTS);
        attempts
            .create_index(unique(
                doc! { "user_id": 1, "evaluation_id": 1, "attempt_number": 1 },
            ))
            .await?;
        attempts
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "evaluation_id": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .partial_filter_expression(doc! { "state": "in_progress" })
                            .name("one_open_attempt".to_string())
                            .build(),
                    )
                    .build(),
            )
            .await?;

        let certificates = self.collection::<Document>(CERTIFICATES);
        certificates
            .create_index(unique(doc! { "user_id": 1, "module_id": 1 }))
            .await?;
        certificates.create_index(unique(doc! { "code": 1 })).await?;

        self.collection::<Document>(RANKINGS)
            .create_index(unique(doc! { "module_id": 1, "user_id": 1 }))
            .await?;
        self.collection::<Document>(LESSON_PROGRESS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "module_id": 1 })
                    .build(),
            )
            .await?;
        self.collection::<Document>(ANSWERS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "attempt_id": 1 })
                    .build(),
            )
            .await?;
        self.collection::<Document>(EXERCISE_ATTEMPTS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "lesson_id": 1 })
                    .build(),
            )
            .await?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }

    async fn find_by_id<T>(&self, name: &str, id: &str) -> LearningResult<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let collection = self.collection::<T>(name);
        track_db_operation("find_one", name, async {
            collection
                .find_one(doc! { "_id": id })
                .await
                .map_err(LearningError::from)
        })
        .await
    }

    async fn find_many<T>(&self, name: &str, filter: Document, sort: Document) -> LearningResult<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let collection = self.collection::<T>(name);
        track_db_operation("find", name, async {
            let cursor = collection.find(filter).sort(sort).await?;
            cursor.try_collect().await.map_err(LearningError::from)
        })
        .await
    }

    async fn replace_by_id<T>(&self, name: &str, id: &str, value: &T) -> LearningResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let collection = self.collection::<T>(name);
        track_db_operation("replace_one", name, async {
            collection
                .replace_one(doc! { "_id": id }, value)
                .with_options(upsert())
                .await
                .map(|_| ())
                .map_err(LearningError::from)
        })
        .await
    }

    async fn commit_once(
        &self,
        session: &mut ClientSession,
        commit: &ProgressCommit,
    ) -> Result<CommitOutcome, MongoError> {
        session.start_transaction().await?;

        if let Some(attempt) = &commit.attempt {
            let result = self
                .collection::<EvaluationAttempt>(ATTEMPTS)
                .replace_one(
                    doc! { "_id": &attempt.id, "state": AttemptState::InProgress.as_str() },
                    attempt,
                )
                .session(&mut *session)
                .await?;
            if result.matched_count == 0 {
                session.abort_transaction().await?;
                return Ok(CommitOutcome::AttemptNotOpen);
            }
        }

        self.collection::<ModuleProgress>(MODULE_PROGRESS)
            .replace_one(doc! { "_id": &commit.progress.id }, &commit.progress)
            .with_options(upsert())
            .session(&mut *session)
            .await?;

        self.collection::<RankingEntry>(RANKINGS)
            .replace_one(doc! { "_id": &commit.ranking.id }, &commit.ranking)
            .with_options(upsert())
            .session(&mut *session)
            .await?;

        retry_with(
            RetryConfig::transactional(),
            is_unknown_commit,
            session,
            |session| Box::pin(async move { session.commit_transaction().await }),
        )
        .await?;
        Ok(CommitOutcome::Applied)
    }
}

#[async_trait]
impl LearningStore for MongoStore {
    async fn ping(&self) -> LearningResult<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn load_catalog(&self, seed: CatalogSeed) -> LearningResult<()> {
        for module in &seed.modules {
            self.replace_by_id(MODULES, &module.id, module).await?;
        }
        for lesson in &seed.lessons {
            self.replace_by_id(LESSONS, &lesson.id, lesson).await?;
        }
        for evaluation in &seed.evaluations {
            self.replace_by_id(EVALUATIONS, &evaluation.id, evaluation).await?;
        }
        for question in &seed.questions {
            self.replace_by_id(QUESTIONS, &question.id, question).await?;
        }
        for exercise in &seed.exercises {
            self.replace_by_id(EXERCISES, &exercise.id, exercise).await?;
        }
        tracing::info!(
            "Catalog loaded: {} modules, {} lessons, {} evaluations",
            seed.modules.len(),
            seed.lessons.len(),
            seed.evaluations.len()
        );
        Ok(())
    }

    async fn list_modules(&self) -> LearningResult<Vec<Module>> {
        self.find_many(MODULES, doc! {}, doc! { "ordering": 1, "_id": 1 })
            .await
    }

    async fn get_module(&self, module_id: &str) -> LearningResult<Option<Module>> {
        self.find_by_id(MODULES, module_id).await
    }

    async fn lessons_for_module(&self, module_id: &str) -> LearningResult<Vec<Lesson>> {
        self.find_many(LESSONS, doc! { "module_id": module_id }, doc! { "order": 1 })
            .await
    }

    async fn get_lesson(&self, lesson_id: &str) -> LearningResult<Option<Lesson>> {
        self.find_by_id(LESSONS, lesson_id).await
    }

    async fn evaluation_for_module(&self, module_id: &str) -> LearningResult<Option<Evaluation>> {
        let collection = self.collection::<Evaluation>(EVALUATIONS);
        track_db_operation("find_one", EVALUATIONS, async {
            collection
                .find_one(doc! { "module_id": module_id })
                .await
                .map_err(LearningError::from)
        })
        .await
    }

    async fn get_evaluation(&self, evaluation_id: &str) -> LearningResult<Option<Evaluation>> {
        self.find_by_id(EVALUATIONS, evaluation_id).await
    }

    async fn questions_for_evaluation(&self, evaluation_id: &str) -> LearningResult<Vec<Question>> {
        self.find_many(
            QUESTIONS,
            doc! { "evaluation_id": evaluation_id },
            doc! { "order": 1, "_id": 1 },
        )
        .await
    }

    async fn exercises_for_lesson(&self, lesson_id: &str) -> LearningResult<Vec<Exercise>> {
        self.find_many(
            EXERCISES,
            doc! { "lesson_id": lesson_id },
            doc! { "order": 1, "_id": 1 },
        )
        .await
    }

    async fn get_lesson_progress(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> LearningResult<Option<LessonProgress>> {
        self.find_by_id(LESSON_PROGRESS, &LessonProgress::key(user_id, lesson_id))
            .await
    }

    async fn lesson_progress_for_module(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<Vec<LessonProgress>> {
        self.find_many(
            LESSON_PROGRESS,
            doc! { "user_id": user_id, "module_id": module_id },
            doc! { "_id": 1 },
        )
        .await
    }

    async fn mark_lesson_seen(&self, progress: LessonProgress) -> LearningResult<bool> {
        let collection = self.collection::<Document>(LESSON_PROGRESS);
        let on_insert = to_document(&progress)?;

        let result = track_db_operation("update_one", LESSON_PROGRESS, async {
            collection
                .update_one(doc! { "_id": &progress.id }, doc! { "$setOnInsert": on_insert })
                .upsert(true)
                .await
        })
        .await;

        match result {
            Ok(update) => Ok(update.upserted_id.is_some()),
            // Two concurrent first views race on the upsert; one of them wins.
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_module_progress(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<Option<ModuleProgress>> {
        self.find_by_id(MODULE_PROGRESS, &ModuleProgress::key(user_id, module_id))
            .await
    }

    async fn get_ranking(
        &self,
        module_id: &str,
        user_id: &str,
    ) -> LearningResult<Option<RankingEntry>> {
        self.find_by_id(RANKINGS, &RankingEntry::key(module_id, user_id))
            .await
    }

    async fn rankings_for_module(&self, module_id: &str) -> LearningResult<Vec<RankingEntry>> {
        self.find_many(
            RANKINGS,
            doc! { "module_id": module_id },
            doc! { "progress_percent": -1, "last_updated": 1, "user_id": 1 },
        )
        .await
    }

    async fn commit_progress(&self, commit: ProgressCommit) -> LearningResult<()> {
        let outcome = track_db_operation("transaction", MODULE_PROGRESS, async {
            retry_when(RetryConfig::transactional(), is_transient, || async {
                let mut session = self.client.start_session().await?;
                self.commit_once(&mut session, &commit).await
            })
            .await
        })
        .await?;

        match outcome {
            CommitOutcome::Applied => Ok(()),
            CommitOutcome::AttemptNotOpen => {
                let attempt_id = commit
                    .attempt
                    .as_ref()
                    .map(|a| a.id.clone())
                    .unwrap_or_default();
                let stored: Option<EvaluationAttempt> =
                    self.find_by_id(ATTEMPTS, &attempt_id).await?;
                match stored {
                    Some(stored) => Err(ConflictKind::AttemptClosed {
                        attempt_id,
                        state: stored.state.as_str().to_string(),
                    }
                    .into()),
                    None => Err(LearningError::not_found("attempt", attempt_id)),
                }
            }
        }
    }

    async fn insert_attempt(&self, attempt: EvaluationAttempt) -> LearningResult<()> {
        let collection = self.collection::<EvaluationAttempt>(ATTEMPTS);
        let result = track_db_operation("insert_one", ATTEMPTS, async {
            collection.insert_one(&attempt).await
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                let open: Option<EvaluationAttempt> = self
                    .collection::<EvaluationAttempt>(ATTEMPTS)
                    .find_one(doc! {
                        "user_id": &attempt.user_id,
                        "evaluation_id": &attempt.evaluation_id,
                        "state": AttemptState::InProgress.as_str(),
                    })
                    .await?;
                match open {
                    Some(open) => Err(ConflictKind::AttemptInProgress {
                        attempt_id: open.id,
                    }
                    .into()),
                    None => Err(ConflictKind::Duplicate(format!(
                        "attempt number {} already exists",
                        attempt.attempt_number
                    ))
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_attempt(&self, attempt_id: &str) -> LearningResult<Option<EvaluationAttempt>> {
        self.find_by_id(ATTEMPTS, attempt_id).await
    }

    async fn attempts_for(
        &self,
        user_id: &str,
        evaluation_id: &str,
    ) -> LearningResult<Vec<EvaluationAttempt>> {
        self.find_many(
            ATTEMPTS,
            doc! { "user_id": user_id, "evaluation_id": evaluation_id },
            doc! { "attempt_number": 1 },
        )
        .await
    }

    async fn upsert_answer(&self, answer: AttemptAnswer) -> LearningResult<()> {
        self.replace_by_id(ANSWERS, &answer.id, &answer).await
    }

    async fn answers_for_attempt(&self, attempt_id: &str) -> LearningResult<Vec<AttemptAnswer>> {
        self.find_many(ANSWERS, doc! { "attempt_id": attempt_id }, doc! { "_id": 1 })
            .await
    }

    async fn insert_certificate(&self, certificate: Certificate) -> LearningResult<()> {
        let collection = self.collection::<Certificate>(CERTIFICATES);
        let result = track_db_operation("insert_one", CERTIFICATES, async {
            collection.insert_one(&certificate).await
        })
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                match self
                    .get_certificate(&certificate.user_id, &certificate.module_id)
                    .await?
                {
                    Some(existing) => Err(ConflictKind::AlreadyCertified {
                        certificate_code: existing.code,
                    }
                    .into()),
                    None => Err(ConflictKind::Duplicate(format!(
                        "certificate code {} already exists",
                        certificate.code
                    ))
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_certificate(
        &self,
        user_id: &str,
        module_id: &str,
    ) -> LearningResult<Option<Certificate>> {
        self.find_by_id(CERTIFICATES, &Certificate::key(user_id, module_id))
            .await
    }

    async fn certificate_by_code(&self, code: &str) -> LearningResult<Option<Certificate>> {
        let collection = self.collection::<Certificate>(CERTIFICATES);
        track_db_operation("find_one", CERTIFICATES, async {
            collection
                .find_one(doc! { "code": code })
                .await
                .map_err(LearningError::from)
        })
        .await
    }

    async fn certificates_for_user(&self, user_id: &str) -> LearningResult<Vec<Certificate>> {
        self.find_many(
            CERTIFICATES,
            doc! { "user_id": user_id },
            doc! { "issued_at": -1 },
        )
        .await
    }

    async fn mark_certificate_downloaded(&self, certificate: &Certificate) -> LearningResult<()> {
        let downloaded_at = certificate.downloaded_at.map(chrono_to_bson);
        let collection = self.collection::<Document>(CERTIFICATES);
        let result = track_db_operation("update_one", CERTIFICATES, async {
            collection
                .update_one(
                    doc! { "_id": &certificate.id },
                    doc! { "$set": { "downloaded": true, "downloaded_at": downloaded_at } },
                )
                .await
                .map_err(LearningError::from)
        })
        .await?;

        if result.matched_count == 0 {
            return Err(LearningError::not_found("certificate", certificate.code.clone()));
        }
        Ok(())
    }

    async fn get_exercise(&self, exercise_id: &str) -> LearningResult<Option<Exercise>> {
        self.find_by_id(EXERCISES, exercise_id).await
    }

    async fn insert_exercise_attempt(&self, attempt: ExerciseAttempt) -> LearningResult<()> {
        let collection = self.collection::<ExerciseAttempt>(EXERCISE_ATTEMPTS);
        track_db_operation("insert_one", EXERCISE_ATTEMPTS, async {
            collection
                .insert_one(&attempt)
                .await
                .map(|_| ())
                .map_err(LearningError::from)
        })
        .await
    }

    async fn exercise_attempts_for(
        &self,
        user_id: &str,
        lesson_id: &str,
    ) -> LearningResult<Vec<ExerciseAttempt>> {
        self.find_many(
            EXERCISE_ATTEMPTS,
            doc! { "user_id": user_id, "lesson_id": lesson_id },
            doc! { "submitted_at": 1 },
        )
        .await
    }
}
