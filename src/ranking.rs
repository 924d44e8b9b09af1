use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::record::RecommendationRecord;

const RISK_WEIGHT: f64 = 0.8;

/// Revenue-vs-risk score for one candidate. Confidence and EV are in percent here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub confidence_pct: f64,
    pub expected_value_pct: f64,
    pub revenue_score: f64,
    pub risk_score: f64,
    pub combined_score: f64,
    pub quality_bonus: f64,
    pub ev_bonus: f64,
    pub final_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub fixture_id: u64,
    pub score: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    AlreadyStarted,
    AlreadyCompleted,
    BelowConfidence,
    MissingExpectedValue,
    BelowExpectedValue,
    MissingOdds,
    AboveMaxOdds,
    BelowProbabilityGap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingDecision {
    pub decided_at: DateTime<Utc>,
    pub ranked: Vec<ScoredCandidate>,
    pub selected: Vec<u64>,
    pub excluded: Vec<(u64, Exclusion)>,
}

impl RankingDecision {
    pub fn score_for(&self, fixture_id: u64) -> Option<f64> {
        self.ranked
            .iter()
            .find(|c| c.fixture_id == fixture_id)
            .map(|c| c.score.final_score)
    }

    pub fn is_selected(&self, fixture_id: u64) -> bool {
        self.selected.contains(&fixture_id)
    }
}

/// `confidence` is 0-1 and `expected_value` a fraction of stake.
pub fn score_candidate(confidence: f64, expected_value: f64) -> ScoreBreakdown {
    let confidence_pct = confidence * 100.0;
    let ev_pct = expected_value * 100.0;

    let revenue_score = ev_pct * (confidence_pct / 100.0);
    let risk_score = 1.0 - confidence_pct / 100.0;
    let combined_score = revenue_score - risk_score * RISK_WEIGHT;

    let quality_bonus = if confidence_pct >= 70.0 {
        0.5
    } else if confidence_pct >= 65.0 {
        0.3
    } else if confidence_pct >= 60.0 {
        0.2
    } else {
        0.0
    };
    let ev_bonus = if ev_pct >= 30.0 {
        0.2
    } else if ev_pct >= 15.0 {
        0.1
    } else {
        0.0
    };

    ScoreBreakdown {
        confidence_pct,
        expected_value_pct: ev_pct,
        revenue_score,
        risk_score,
        combined_score,
        quality_bonus,
        ev_bonus,
        final_score: combined_score + quality_bonus + ev_bonus,
    }
}

pub fn eligibility(
    record: &RecommendationRecord,
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> Result<f64, Exclusion> {
    if record.is_completed() {
        return Err(Exclusion::AlreadyCompleted);
    }
    if !record.is_future(now) {
        return Err(Exclusion::AlreadyStarted);
    }
    if record.confidence < thresholds.min_confidence {
        return Err(Exclusion::BelowConfidence);
    }
    let Some(ev) = record.expected_value else {
        return Err(Exclusion::MissingExpectedValue);
    };
    if ev < thresholds.min_expected_value {
        return Err(Exclusion::BelowExpectedValue);
    }
    if let Some(max_odds) = thresholds.max_odds {
        match record.predicted_odds() {
            None => return Err(Exclusion::MissingOdds),
            Some(odds) if odds > max_odds => return Err(Exclusion::AboveMaxOdds),
            Some(_) => {}
        }
    }
    if record.probabilities().probability_gap() < thresholds.min_probability_gap {
        return Err(Exclusion::BelowProbabilityGap);
    }
    Ok(ev)
}

/// Scores every eligible record and picks the top N. Ties keep input order.
pub fn rank(
    records: &[RecommendationRecord],
    thresholds: &Thresholds,
    now: DateTime<Utc>,
) -> RankingDecision {
    let mut ranked = Vec::new();
    let mut excluded = Vec::new();

    for record in records {
        match eligibility(record, thresholds, now) {
            Ok(ev) => ranked.push(ScoredCandidate {
                fixture_id: record.fixture_id,
                score: score_candidate(record.confidence, ev),
            }),
            Err(reason) => excluded.push((record.fixture_id, reason)),
        }
    }

    ranked.sort_by(|a, b| b.score.final_score.total_cmp(&a.score.final_score));
    let selected = ranked
        .iter()
        .take(thresholds.top_n)
        .map(|c| c.fixture_id)
        .collect();

    RankingDecision {
        decided_at: now,
        ranked,
        selected,
        excluded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_matches_hand_computation() {
        let s = score_candidate(0.65, 0.43);
        // 43 * 0.65 = 27.95; risk 0.35 * 0.8 = 0.28; bonuses 0.3 + 0.2
        assert!((s.revenue_score - 27.95).abs() < 1e-9);
        assert!((s.risk_score - 0.35).abs() < 1e-9);
        assert!((s.final_score - (27.95 - 0.28 + 0.3 + 0.2)).abs() < 1e-9);
    }

    #[test]
    fn bonus_tiers() {
        assert_eq!(score_candidate(0.72, 0.05).quality_bonus, 0.5);
        assert_eq!(score_candidate(0.61, 0.05).quality_bonus, 0.2);
        assert_eq!(score_candidate(0.56, 0.05).quality_bonus, 0.0);
        assert_eq!(score_candidate(0.56, 0.16).ev_bonus, 0.1);
        assert_eq!(score_candidate(0.56, 0.31).ev_bonus, 0.2);
        assert_eq!(score_candidate(0.56, 0.14).ev_bonus, 0.0);
    }
}
