use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::error::{EngineError, Result};
use crate::probability::{Outcome, round_to};

/// Odds at or below this pay out nothing meaningful.
pub const MIN_MEANINGFUL_ODDS: f64 = 1.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueAssessment {
    pub outcome: Outcome,
    pub probability: f64,
    pub odds: f64,
    /// Rounded to 4 decimals; 0.43 means +43%.
    pub expected_value: f64,
    pub implied_probability: f64,
    pub kelly_fraction: f64,
    /// Confidence gate result. EV floors are applied later by ranking.
    pub passes_confidence_gate: bool,
}

impl ValueAssessment {
    pub fn expected_value_pct(&self) -> f64 {
        self.expected_value * 100.0
    }

    pub fn meets_ev_floor(&self, thresholds: &Thresholds) -> bool {
        self.expected_value >= thresholds.min_expected_value
    }
}

pub fn expected_value(fixture_id: u64, probability: f64, odds: f64) -> Result<f64> {
    if !odds.is_finite() || odds <= MIN_MEANINGFUL_ODDS {
        return Err(EngineError::invalid_market(
            fixture_id,
            format!("odds {odds} do not exceed {MIN_MEANINGFUL_ODDS}"),
        ));
    }
    if !probability.is_finite() || probability <= 0.0 {
        return Err(EngineError::invalid_market(
            fixture_id,
            format!("probability {probability} is not positive"),
        ));
    }
    Ok(round_to(probability * odds - 1.0, 4))
}

pub fn kelly_fraction(probability: f64, odds: f64) -> f64 {
    if probability <= 0.0 || odds <= 1.0 {
        return 0.0;
    }
    let b = odds - 1.0;
    ((probability * odds - 1.0) / b).max(0.0)
}

/// Prices the chosen outcome. `odds` is `None` when the bookmaker quoted nothing.
pub fn evaluate(
    fixture_id: u64,
    outcome: Outcome,
    probability: f64,
    odds: Option<f64>,
    thresholds: &Thresholds,
) -> Result<ValueAssessment> {
    let Some(odds) = odds else {
        return Err(EngineError::invalid_market(
            fixture_id,
            format!("no {outcome} odds quoted"),
        ));
    };
    let ev = expected_value(fixture_id, probability, odds)?;
    Ok(ValueAssessment {
        outcome,
        probability,
        odds,
        expected_value: ev,
        implied_probability: 1.0 / odds,
        kelly_fraction: kelly_fraction(probability, odds),
        passes_confidence_gate: probability >= thresholds.min_confidence,
    })
}
