use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::time::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

/// Issued certificate, stored in "certificates" with `_id` "{user}:{module}".
/// Immutable except for the download flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    #[serde(rename = "_id")]
    pub id: String,
    pub code: String,
    pub user_id: String,
    pub module_id: String,
    pub attempt_id: Option<String>,
    pub score_percent: f64,
    pub verification_hash: String,
    #[serde(with = "bson_datetime_as_chrono")]
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(default, with = "bson_datetime_as_chrono_option")]
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl Certificate {
    pub fn key(user_id: &str, module_id: &str) -> String {
        format!("{}:{}", user_id, module_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CertificateResponse {
    pub code: String,
    pub module_id: String,
    pub module_title: String,
    pub score_percent: f64,
    pub issued_at: DateTime<Utc>,
    pub downloaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibilityResponse {
    pub module_id: String,
    pub eligible: bool,
    pub percent_complete: f64,
    pub evaluation_passed: bool,
    pub certificate_code: Option<String>,
}

/// Public verification view; never exposes the holder's user id.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResponse {
    pub valid: bool,
    pub code: String,
    pub module_title: String,
    pub score_percent: f64,
    pub issued_at: DateTime<Utc>,
    pub verification_hash: String,
}
