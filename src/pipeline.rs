use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::calibration::{self, CalibrationReport};
use crate::config::EngineConfig;
use crate::ensemble::{self, FusedPrediction, ModelPrediction};
use crate::error::{EngineError, Result};
use crate::expected_value::{self, ValueAssessment};
use crate::outcome::{self, MatchResult, PerformanceFields};
use crate::ranking::{self, Exclusion, RankingDecision};
use crate::record::{FixtureInfo, MarketOdds, RecommendationRecord};
use crate::store::{PredictionStore, RefreshSummary, UpsertOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureInput {
    pub fixture: FixtureInfo,
    pub predictions: Vec<ModelPrediction>,
    #[serde(default)]
    pub odds: MarketOdds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketVerdict {
    Priced(ValueAssessment),
    /// Odds missing or meaningless; kept for auditing, never ranked.
    Unpriced { reason: String },
}

impl MarketVerdict {
    pub fn assessment(&self) -> Option<&ValueAssessment> {
        match self {
            MarketVerdict::Priced(v) => Some(v),
            MarketVerdict::Unpriced { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureEvaluation {
    pub fused: FusedPrediction,
    pub market: MarketVerdict,
    pub record: RecommendationRecord,
    pub eligible: bool,
    pub exclusion: Option<Exclusion>,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub evaluated: Vec<FixtureEvaluation>,
    pub failed: Vec<(u64, EngineError)>,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub recorded: usize,
    pub unchanged: usize,
    /// Not finished yet or missing a usable score; retry later.
    pub pending: usize,
    pub failed: usize,
}

/// Fuses one fixture, prices the chosen outcome and checks every ranking gate.
///
/// Fusion errors are returned. Pricing errors are not: the fixture still
/// gets a loggable record, marked ineligible.
pub fn evaluate_fixture(
    input: &FixtureInput,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<FixtureEvaluation> {
    let fixture_id = input.fixture.fixture_id;
    let fused = ensemble::fuse(fixture_id, &input.predictions, &cfg.fusion)?;

    let market = match expected_value::evaluate(
        fixture_id,
        fused.outcome,
        fused.confidence(),
        input.odds.for_outcome(fused.outcome),
        &cfg.thresholds,
    ) {
        Ok(value) => MarketVerdict::Priced(value),
        Err(err @ EngineError::InvalidMarketData { .. }) => {
            warn!(fixture_id, error = %err, "fixture not priced");
            MarketVerdict::Unpriced {
                reason: err.to_string(),
            }
        }
        Err(err) => return Err(err),
    };

    let record = RecommendationRecord::from_prediction(
        &input.fixture,
        &fused,
        &input.odds,
        market.assessment(),
        now,
    );
    let exclusion = ranking::eligibility(&record, &cfg.thresholds, now).err();

    Ok(FixtureEvaluation {
        eligible: exclusion.is_none(),
        exclusion,
        fused,
        market,
        record,
    })
}

/// Evaluates a batch in parallel. Setting `cancel` stops fixtures that have
/// not started yet; results already produced are kept.
pub fn evaluate_batch(
    inputs: &[FixtureInput],
    cfg: &EngineConfig,
    now: DateTime<Utc>,
    cancel: Option<&AtomicBool>,
) -> BatchOutcome {
    let results: Vec<Option<Result<FixtureEvaluation>>> = inputs
        .par_iter()
        .map(|input| {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                return None;
            }
            Some(evaluate_fixture(input, cfg, now))
        })
        .collect();

    let mut out = BatchOutcome::default();
    for (input, result) in inputs.iter().zip(results) {
        match result {
            None => out.cancelled += 1,
            Some(Ok(eval)) => out.evaluated.push(eval),
            Some(Err(err)) => {
                warn!(fixture_id = input.fixture.fixture_id, error = %err, "fixture skipped");
                out.failed.push((input.fixture.fixture_id, err));
            }
        }
    }
    debug!(
        evaluated = out.evaluated.len(),
        failed = out.failed.len(),
        cancelled = out.cancelled,
        "batch evaluated"
    );
    out
}

pub fn log_predictions(
    store: &dyn PredictionStore,
    evaluations: &[FixtureEvaluation],
    now: DateTime<Utc>,
) -> Result<Vec<(u64, UpsertOutcome)>> {
    evaluations
        .iter()
        .map(|eval| {
            let outcome = store.upsert_prediction(&eval.record, now)?;
            Ok((eval.record.fixture_id, outcome))
        })
        .collect()
}

pub fn select_recommendations(
    records: &[RecommendationRecord],
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> RankingDecision {
    ranking::rank(records, &cfg.thresholds, now)
}

/// Re-ranks all future records and swaps the recommended set in one step.
pub fn refresh_recommendations(
    store: &dyn PredictionStore,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<(RankingDecision, RefreshSummary)> {
    let future = store.future_records(now)?;
    let decision = ranking::rank(&future, &cfg.thresholds, now);
    for (fixture_id, reason) in &decision.excluded {
        debug!(fixture_id, ?reason, "excluded from ranking");
    }
    let summary = store.apply_ranking(&decision, now)?;
    Ok((decision, summary))
}

pub fn record_result(
    record: &RecommendationRecord,
    result: &MatchResult,
    cfg: &EngineConfig,
) -> Result<PerformanceFields> {
    outcome::record_outcome(record, result, cfg.stake)
}

pub fn record_finished_results(
    store: &dyn PredictionStore,
    results: &[MatchResult],
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<RecordingSummary> {
    let mut summary = RecordingSummary::default();
    for result in results {
        let fixture_id = result.fixture_id;
        let Some(record) = store.get(fixture_id)? else {
            warn!(fixture_id, "result for unknown fixture");
            summary.failed += 1;
            continue;
        };
        let perf = match outcome::record_outcome(&record, result, cfg.stake) {
            Ok(perf) => perf,
            Err(err @ EngineError::MatchNotFinished { .. }) => {
                debug!(fixture_id, error = %err, "result not final yet");
                summary.pending += 1;
                continue;
            }
            Err(err @ EngineError::IncompleteResult { .. }) => {
                warn!(fixture_id, error = %err, "incomplete result left unrecorded");
                summary.pending += 1;
                continue;
            }
            Err(err) if err.is_per_fixture() => {
                warn!(fixture_id, error = %err, "result rejected");
                summary.failed += 1;
                continue;
            }
            Err(err) => return Err(err),
        };
        if store.store_performance(fixture_id, &perf, now)? {
            debug!(fixture_id, correct = perf.was_correct, "result recorded");
            summary.recorded += 1;
        } else {
            summary.unchanged += 1;
        }
    }
    info!(
        recorded = summary.recorded,
        unchanged = summary.unchanged,
        pending = summary.pending,
        failed = summary.failed,
        "results processed"
    );
    Ok(summary)
}

/// Recomputes derived fields of every completed record from its stored
/// score and odds. Returns how many records changed.
pub fn recalculate_performance(store: &dyn PredictionStore, cfg: &EngineConfig) -> Result<usize> {
    let mut changed = 0usize;
    for record in store.completed_records()? {
        let Some(perf) = outcome::recompute(&record, cfg.stake) else {
            warn!(fixture_id = record.fixture_id, "completed record cannot be recomputed");
            continue;
        };
        let logged_at = record.result_logged_at.unwrap_or(record.kickoff);
        if store.store_performance(record.fixture_id, &perf, logged_at)? {
            changed += 1;
        }
    }
    info!(changed, "performance recalculated");
    Ok(changed)
}

pub fn calibration_report(
    store: &dyn PredictionStore,
    cfg: &EngineConfig,
) -> Result<CalibrationReport> {
    let completed = store.completed_records()?;
    Ok(calibration::analyze(&completed, cfg))
}
