use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::probability::{Outcome, classify_outcome, round_to};
use crate::record::RecommendationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    HalfTime,
    Finished,
    Postponed,
    Cancelled,
    Abandoned,
}

impl MatchStatus {
    pub fn is_finished(self) -> bool {
        self == MatchStatus::Finished
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Live => "live",
            MatchStatus::HalfTime => "half_time",
            MatchStatus::Finished => "finished",
            MatchStatus::Postponed => "postponed",
            MatchStatus::Cancelled => "cancelled",
            MatchStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    /// Accepts both long names and the usual provider short codes.
    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let s = raw.trim().to_ascii_lowercase();
        let status = match s.as_str() {
            "ft" | "aet" | "pen" | "finished" | "full_time" | "match finished" => {
                MatchStatus::Finished
            }
            "ns" | "tbd" | "scheduled" | "not started" => MatchStatus::Scheduled,
            "1h" | "2h" | "et" | "bt" | "p" | "live" | "in_play" => MatchStatus::Live,
            "ht" | "half_time" | "halftime" => MatchStatus::HalfTime,
            "pst" | "postponed" => MatchStatus::Postponed,
            "canc" | "cancelled" | "canceled" => MatchStatus::Cancelled,
            "abd" | "abandoned" | "susp" => MatchStatus::Abandoned,
            other => return Err(format!("unknown match status '{other}'")),
        };
        Ok(status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub fixture_id: u64,
    pub status: MatchStatus,
    #[serde(default)]
    pub home_score: Option<i32>,
    #[serde(default)]
    pub away_score: Option<i32>,
    /// Raw score text such as "2-1", used when numeric scores are absent.
    #[serde(default)]
    pub score_text: Option<String>,
}

impl MatchResult {
    pub fn finished(fixture_id: u64, home_score: i32, away_score: i32) -> Self {
        Self {
            fixture_id,
            status: MatchStatus::Finished,
            home_score: Some(home_score),
            away_score: Some(away_score),
            score_text: None,
        }
    }

    fn scores(&self) -> Option<(i32, i32)> {
        match (self.home_score, self.away_score) {
            (Some(h), Some(a)) => Some((h, a)),
            _ => self.score_text.as_deref().and_then(parse_score_text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceFields {
    pub actual_outcome: Outcome,
    pub score_home: i32,
    pub score_away: i32,
    pub match_status: MatchStatus,
    pub was_correct: bool,
    /// `None` when the predicted outcome has no usable price.
    pub profit_loss: Option<f64>,
    pub roi_percent: Option<f64>,
}

/// Derives the post-match fields for a logged prediction. Pure: the same
/// record and result always give the same fields.
pub fn record_outcome(
    record: &RecommendationRecord,
    result: &MatchResult,
    stake: f64,
) -> Result<PerformanceFields> {
    if result.fixture_id != record.fixture_id {
        return Err(EngineError::invalid_input(
            record.fixture_id,
            format!("result belongs to fixture {}", result.fixture_id),
        ));
    }
    if !result.status.is_finished() {
        return Err(EngineError::MatchNotFinished {
            fixture_id: record.fixture_id,
            status: result.status.to_string(),
        });
    }
    let Some((home, away)) = result.scores() else {
        return Err(EngineError::incomplete_result(
            record.fixture_id,
            "finished without a parseable score",
        ));
    };
    if home < 0 || away < 0 {
        return Err(EngineError::incomplete_result(
            record.fixture_id,
            format!("negative score {home}-{away}"),
        ));
    }

    let actual_outcome = classify_outcome(home, away);
    let was_correct = actual_outcome == record.predicted_outcome;
    let profit_loss = settle(was_correct, record.predicted_odds(), stake);

    Ok(PerformanceFields {
        actual_outcome,
        score_home: home,
        score_away: away,
        match_status: result.status,
        was_correct,
        profit_loss,
        roi_percent: profit_loss.map(|pl| round_to(pl / stake * 100.0, 2)),
    })
}

pub fn recompute(record: &RecommendationRecord, stake: f64) -> Option<PerformanceFields> {
    let result = MatchResult {
        fixture_id: record.fixture_id,
        status: record.match_status?,
        home_score: record.actual_score_home,
        away_score: record.actual_score_away,
        score_text: None,
    };
    record_outcome(record, &result, stake).ok()
}

fn settle(was_correct: bool, odds: Option<f64>, stake: f64) -> Option<f64> {
    let odds = odds.filter(|o| o.is_finite() && *o > 1.0)?;
    let pl = if was_correct { stake * odds - stake } else { -stake };
    Some(round_to(pl, 2))
}

fn parse_score_text(raw: &str) -> Option<(i32, i32)> {
    let (h, a) = raw.split_once(['-', ':'])?;
    Some((h.trim().parse().ok()?, a.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_codes_map_to_status() {
        assert_eq!("FT".parse::<MatchStatus>().unwrap(), MatchStatus::Finished);
        assert_eq!("aet".parse::<MatchStatus>().unwrap(), MatchStatus::Finished);
        assert_eq!("2H".parse::<MatchStatus>().unwrap(), MatchStatus::Live);
        assert_eq!("PST".parse::<MatchStatus>().unwrap(), MatchStatus::Postponed);
        assert!("??".parse::<MatchStatus>().is_err());
    }

    #[test]
    fn score_text_parses_common_separators() {
        assert_eq!(parse_score_text("2-1"), Some((2, 1)));
        assert_eq!(parse_score_text(" 0 : 0 "), Some((0, 0)));
        assert_eq!(parse_score_text("2-"), None);
        assert_eq!(parse_score_text("abandoned"), None);
    }

    #[test]
    fn settle_handles_missing_price() {
        assert_eq!(settle(true, Some(2.2), 10.0), Some(12.0));
        assert_eq!(settle(false, Some(2.2), 10.0), Some(-10.0));
        assert_eq!(settle(true, None, 10.0), None);
        assert_eq!(settle(false, Some(f64::NAN), 10.0), None);
    }
}
