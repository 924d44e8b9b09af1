use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, TryLockError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::outcome::PerformanceFields;
use crate::ranking::RankingDecision;
use crate::record::RecommendationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    Created,
    Updated,
    /// Kickoff passed or the result is in; the stored row was left alone.
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub generation: u64,
    pub unmarked: usize,
    pub marked: usize,
    /// Selected ids that were unknown, started or completed.
    pub skipped: usize,
}

/// Persistence seam for prediction records, keyed by fixture id.
///
/// `apply_ranking` must be atomic: readers see either the old or the new
/// recommended set, never a mix, and a second concurrent refresh is rejected
/// with [`EngineError::StaleRefreshRace`].
pub trait PredictionStore: Send + Sync {
    fn upsert_prediction(
        &self,
        record: &RecommendationRecord,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome>;

    fn get(&self, fixture_id: u64) -> Result<Option<RecommendationRecord>>;

    fn future_records(&self, now: DateTime<Utc>) -> Result<Vec<RecommendationRecord>>;

    fn recommended_records(&self) -> Result<Vec<RecommendationRecord>>;

    fn completed_records(&self) -> Result<Vec<RecommendationRecord>>;

    fn apply_ranking(&self, decision: &RankingDecision, now: DateTime<Utc>)
    -> Result<RefreshSummary>;

    /// Returns `false` when the stored fields already match.
    fn store_performance(
        &self,
        fixture_id: u64,
        perf: &PerformanceFields,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<u64, RecommendationRecord>,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct MemoryPredictionStore {
    state: RwLock<MemoryState>,
    refresh_slot: Mutex<()>,
}

impl MemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn refresh_slot(&self) -> Result<MutexGuard<'_, ()>> {
        claim_refresh_slot(&self.refresh_slot)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn collect(&self, keep: impl Fn(&RecommendationRecord) -> bool) -> Vec<RecommendationRecord> {
        let mut out: Vec<RecommendationRecord> =
            self.read().records.values().filter(|r| keep(r)).cloned().collect();
        sort_records(&mut out);
        out
    }
}

impl PredictionStore for MemoryPredictionStore {
    fn upsert_prediction(
        &self,
        record: &RecommendationRecord,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let mut state = self.write();
        match state.records.get_mut(&record.fixture_id) {
            Some(existing) => {
                if existing.is_completed() || !existing.is_future(now) {
                    debug!(fixture_id = record.fixture_id, "prediction frozen, upsert ignored");
                    return Ok(UpsertOutcome::Frozen);
                }
                let is_recommended = existing.is_recommended;
                let recommendation_score = existing.recommendation_score;
                *existing = record.clone();
                existing.clear_performance();
                existing.is_recommended = is_recommended;
                existing.recommendation_score = recommendation_score;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let mut fresh = record.clone();
                fresh.is_recommended = false;
                fresh.clear_performance();
                state.records.insert(record.fixture_id, fresh);
                Ok(UpsertOutcome::Created)
            }
        }
    }

    fn get(&self, fixture_id: u64) -> Result<Option<RecommendationRecord>> {
        Ok(self.read().records.get(&fixture_id).cloned())
    }

    fn future_records(&self, now: DateTime<Utc>) -> Result<Vec<RecommendationRecord>> {
        Ok(self.collect(|r| r.is_future(now)))
    }

    fn recommended_records(&self) -> Result<Vec<RecommendationRecord>> {
        Ok(self.collect(|r| r.is_recommended))
    }

    fn completed_records(&self) -> Result<Vec<RecommendationRecord>> {
        Ok(self.collect(|r| r.is_completed()))
    }

    fn apply_ranking(
        &self,
        decision: &RankingDecision,
        now: DateTime<Utc>,
    ) -> Result<RefreshSummary> {
        let _slot = self.refresh_slot()?;
        let mut state = self.write();
        let mut summary = RefreshSummary::default();

        for record in state.records.values_mut() {
            if !record.is_future(now) {
                continue;
            }
            if record.is_recommended && !decision.is_selected(record.fixture_id) {
                summary.unmarked += 1;
            }
            record.is_recommended = false;
            if let Some(score) = decision.score_for(record.fixture_id) {
                record.recommendation_score = Some(score);
            }
        }

        for fixture_id in &decision.selected {
            match state.records.get_mut(fixture_id) {
                Some(record) if record.is_future(now) && !record.is_completed() => {
                    record.is_recommended = true;
                    summary.marked += 1;
                }
                _ => summary.skipped += 1,
            }
        }

        state.generation += 1;
        summary.generation = state.generation;
        info!(
            generation = summary.generation,
            unmarked = summary.unmarked,
            marked = summary.marked,
            skipped = summary.skipped,
            "recommendations refreshed"
        );
        Ok(summary)
    }

    fn store_performance(
        &self,
        fixture_id: u64,
        perf: &PerformanceFields,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.write();
        let record = state
            .records
            .get_mut(&fixture_id)
            .ok_or(EngineError::UnknownFixture(fixture_id))?;
        if performance_matches(record, perf) {
            return Ok(false);
        }
        record.apply_performance(perf, now);
        Ok(true)
    }
}

pub(crate) fn claim_refresh_slot(slot: &Mutex<()>) -> Result<MutexGuard<'_, ()>> {
    match slot.try_lock() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::WouldBlock) => Err(EngineError::StaleRefreshRace),
        Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
    }
}

pub(crate) fn performance_matches(record: &RecommendationRecord, perf: &PerformanceFields) -> bool {
    record.actual_outcome == Some(perf.actual_outcome)
        && record.actual_score_home == Some(perf.score_home)
        && record.actual_score_away == Some(perf.score_away)
        && record.match_status == Some(perf.match_status)
        && record.was_correct == Some(perf.was_correct)
        && record.profit_loss_10 == perf.profit_loss
        && record.roi_percent == perf.roi_percent
}

pub(crate) fn sort_records(records: &mut [RecommendationRecord]) {
    records.sort_by(|a, b| a.kickoff.cmp(&b.kickoff).then(a.fixture_id.cmp(&b.fixture_id)));
}
