use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::time::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// Stored in "lesson_progress"; `_id` is "{user}:{lesson}". Created lazily on
/// the first view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonProgress {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub lesson_id: String,
    pub module_id: String,
    pub seen: bool,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub seen_at: Option<DateTime<Utc>>,
}

impl LessonProgress {
    pub fn key(user_id: &str, lesson_id: &str) -> String {
        format!("{}:{}", user_id, lesson_id)
    }

    pub fn seen(user_id: &str, lesson_id: &str, module_id: &str, at: DateTime<Utc>) -> Self {
        LessonProgress {
            id: Self::key(user_id, lesson_id),
            user_id: user_id.to_string(),
            lesson_id: lesson_id.to_string(),
            module_id: module_id.to_string(),
            seen: true,
            seen_at: Some(at),
        }
    }
}

/// Derived per-module progress, stored in "module_progress" with `_id`
/// "{user}:{module}". Only the progress aggregator writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleProgress {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub module_id: String,
    pub lessons_seen: u32,
    pub total_lessons: u32,
    pub percent_complete: f64,
    pub evaluation_passed: bool,
    pub certificate_eligible: bool,
    #[serde(default)]
    pub last_lesson_seen: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl ModuleProgress {
    pub fn key(user_id: &str, module_id: &str) -> String {
        format!("{}:{}", user_id, module_id)
    }
}

/// Leaderboard row, stored in "rankings" with `_id` "{module}:{user}".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub module_id: String,
    pub user_id: String,
    pub progress_percent: f64,
    #[serde(with = "bson_datetime_as_chrono")]
    pub last_updated: DateTime<Utc>,
}

impl RankingEntry {
    pub fn key(module_id: &str, user_id: &str) -> String {
        format!("{}:{}", module_id, user_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleProgressResponse {
    pub module_id: String,
    pub lessons_seen: u32,
    pub total_lessons: u32,
    pub percent_complete: f64,
    pub evaluation_passed: bool,
    pub certificate_eligible: bool,
    pub last_lesson_seen: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ModuleProgress> for ModuleProgressResponse {
    fn from(progress: &ModuleProgress) -> Self {
        ModuleProgressResponse {
            module_id: progress.module_id.clone(),
            lessons_seen: progress.lessons_seen,
            total_lessons: progress.total_lessons,
            percent_complete: progress.percent_complete,
            evaluation_passed: progress.evaluation_passed,
            certificate_eligible: progress.certificate_eligible,
            last_lesson_seen: progress.last_lesson_seen.clone(),
            updated_at: progress.updated_at,
        }
    }
}
