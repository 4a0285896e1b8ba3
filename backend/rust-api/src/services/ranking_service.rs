use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::scoring::round2;
use super::AppState;
use crate::error::{LearningError, LearningResult};
use crate::models::catalog::{Module, ModuleRef};
use crate::models::progress::RankingEntry;
use crate::models::ranking::{Medal, ModuleRanking, RankingOverview, RankingRow, RankingStats};
use crate::store::LearningStore;
use crate::utils::time::to_millis;

pub const MAX_RANKING_LIMIT: usize = 100;

/// Ranking row after a recompute. `last_updated` only moves when the percent
/// does, so an earlier achiever keeps the tie-break.
pub fn next_ranking_entry(
    module_id: &str,
    user_id: &str,
    percent: f64,
    previous: Option<&RankingEntry>,
    now: DateTime<Utc>,
) -> RankingEntry {
    let last_updated = match previous {
        Some(prev) if prev.progress_percent == percent => prev.last_updated,
        _ => to_millis(now),
    };
    RankingEntry {
        id: RankingEntry::key(module_id, user_id),
        module_id: module_id.to_string(),
        user_id: user_id.to_string(),
        progress_percent: percent,
        last_updated,
    }
}

/// Percent descending, then earliest update, then user id.
pub fn ranking_order(a: &RankingEntry, b: &RankingEntry) -> Ordering {
    b.progress_percent
        .total_cmp(&a.progress_percent)
        .then_with(|| a.last_updated.cmp(&b.last_updated))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Entries eligible for display, best first.
pub fn ranked(mut entries: Vec<RankingEntry>) -> Vec<RankingEntry> {
    entries.retain(|entry| entry.progress_percent > 0.0);
    entries.sort_by(ranking_order);
    entries
}

fn row(position: usize, entry: &RankingEntry) -> RankingRow {
    RankingRow {
        position,
        user_id: entry.user_id.clone(),
        progress_percent: entry.progress_percent,
        last_updated: entry.last_updated,
        medal: Medal::for_position(position),
    }
}

pub struct RankingService {
    store: Arc<dyn LearningStore>,
}

impl RankingService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
        }
    }

    pub async fn top_n(&self, module_id: &str, limit: usize) -> LearningResult<Vec<RankingRow>> {
        let entries = ranked(self.store.rankings_for_module(module_id).await?);
        Ok(entries
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, entry)| row(i + 1, entry))
            .collect())
    }

    pub async fn module_ranking(
        &self,
        user_id: &str,
        module_id: &str,
        limit: usize,
    ) -> LearningResult<ModuleRanking> {
        let module = self
            .store
            .get_module(module_id)
            .await?
            .filter(|m| m.state.is_active())
            .ok_or_else(|| LearningError::not_found("module", module_id))?;
        self.build(user_id, &module, limit).await
    }

    pub async fn overview(&self, user_id: &str, limit: usize) -> LearningResult<RankingOverview> {
        let mut modules = Vec::new();
        for module in self.store.list_modules().await? {
            if !module.state.is_active() {
                continue;
            }
            modules.push(self.build(user_id, &module, limit).await?);
        }
        Ok(RankingOverview { modules })
    }

    async fn build(&self, user_id: &str, module: &Module, limit: usize) -> LearningResult<ModuleRanking> {
        let entries = ranked(self.store.rankings_for_module(&module.id).await?);

        let participants = entries.len() as u32;
        let average_percent = if entries.is_empty() {
            0.0
        } else {
            round2(entries.iter().map(|e| e.progress_percent).sum::<f64>() / entries.len() as f64)
        };

        let my_position = entries
            .iter()
            .position(|entry| entry.user_id == user_id)
            .map(|i| row(i + 1, &entries[i]));

        let top = entries
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, entry)| row(i + 1, entry))
            .collect();

        tracing::debug!(
            "Ranking built: module={} participants={}",
            module.id,
            participants
        );

        Ok(ModuleRanking {
            module: ModuleRef::from(module),
            top,
            my_position,
            stats: RankingStats {
                participants,
                average_percent,
            },
        })
    }
}
