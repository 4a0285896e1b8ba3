use chrono::{DateTime, Utc};
use serde::Serialize;

use super::catalog::ModuleRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Medal {
    Gold,
    Silver,
    Bronze,
    Top,
}

impl Medal {
    pub fn for_position(position: usize) -> Self {
        match position {
            1 => Medal::Gold,
            2 => Medal::Silver,
            3 => Medal::Bronze,
            _ => Medal::Top,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingRow {
    pub position: usize,
    pub user_id: String,
    pub progress_percent: f64,
    pub last_updated: DateTime<Utc>,
    pub medal: Medal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingStats {
    pub participants: u32,
    pub average_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleRanking {
    pub module: ModuleRef,
    pub top: Vec<RankingRow>,
    pub my_position: Option<RankingRow>,
    pub stats: RankingStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingOverview {
    pub modules: Vec<ModuleRanking>,
}
