use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ensemble::{FusedPrediction, Strategy};
use crate::expected_value::ValueAssessment;
use crate::outcome::{MatchStatus, PerformanceFields};
use crate::probability::{Outcome, Prob3};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureInfo {
    pub fixture_id: u64,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    #[serde(default)]
    pub league_id: Option<u32>,
    pub kickoff: DateTime<Utc>,
    #[serde(default)]
    pub market_type: Option<String>,
    #[serde(default)]
    pub home_form: Option<String>,
    #[serde(default)]
    pub away_form: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketOdds {
    pub home: Option<f64>,
    pub draw: Option<f64>,
    pub away: Option<f64>,
    #[serde(default)]
    pub bookmaker: Option<String>,
}

impl MarketOdds {
    pub fn for_outcome(&self, outcome: Outcome) -> Option<f64> {
        match outcome {
            Outcome::Home => self.home,
            Outcome::Draw => self.draw,
            Outcome::Away => self.away,
        }
    }
}

/// One logged prediction, keyed by fixture id. Pre-match fields are written
/// before kickoff; post-match fields are filled once the result is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub fixture_id: u64,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub league_id: Option<u32>,
    pub kickoff: DateTime<Utc>,
    #[serde(default)]
    pub market_type: Option<String>,
    #[serde(default)]
    pub home_form: Option<String>,
    #[serde(default)]
    pub away_form: Option<String>,

    pub predicted_outcome: Outcome,
    pub confidence: f64,
    pub probability_home: f64,
    pub probability_draw: f64,
    pub probability_away: f64,
    pub odds_home: Option<f64>,
    pub odds_draw: Option<f64>,
    pub odds_away: Option<f64>,
    pub bookmaker: Option<String>,
    pub expected_value: Option<f64>,
    pub model_count: Option<u32>,
    pub consensus: Option<f64>,
    pub variance: Option<f64>,
    pub ensemble_strategy: Option<String>,
    pub recommendation_score: Option<f64>,
    pub is_recommended: bool,
    pub prediction_logged_at: DateTime<Utc>,

    pub actual_outcome: Option<Outcome>,
    pub actual_score_home: Option<i32>,
    pub actual_score_away: Option<i32>,
    pub match_status: Option<MatchStatus>,
    pub result_logged_at: Option<DateTime<Utc>>,
    pub was_correct: Option<bool>,
    pub profit_loss_10: Option<f64>,
    pub roi_percent: Option<f64>,
}

impl RecommendationRecord {
    /// Builds the pre-match row. `value` is `None` when the market could not be priced.
    pub fn from_prediction(
        fixture: &FixtureInfo,
        fused: &FusedPrediction,
        odds: &MarketOdds,
        value: Option<&ValueAssessment>,
        logged_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fixture_id: fixture.fixture_id,
            home_team: fixture.home_team.clone(),
            away_team: fixture.away_team.clone(),
            league: fixture.league.clone(),
            league_id: fixture.league_id,
            kickoff: fixture.kickoff,
            market_type: fixture.market_type.clone(),
            home_form: fixture.home_form.clone(),
            away_form: fixture.away_form.clone(),
            predicted_outcome: fused.outcome,
            confidence: fused.confidence(),
            probability_home: fused.probabilities.home,
            probability_draw: fused.probabilities.draw,
            probability_away: fused.probabilities.away,
            odds_home: odds.home,
            odds_draw: odds.draw,
            odds_away: odds.away,
            bookmaker: odds.bookmaker.clone(),
            expected_value: value.map(|v| v.expected_value),
            model_count: u32::try_from(fused.model_count).ok(),
            consensus: Some(fused.consensus),
            variance: Some(fused.variance),
            ensemble_strategy: Some(fused.strategy.name().to_string()),
            recommendation_score: None,
            is_recommended: false,
            prediction_logged_at: logged_at,
            actual_outcome: None,
            actual_score_home: None,
            actual_score_away: None,
            match_status: None,
            result_logged_at: None,
            was_correct: None,
            profit_loss_10: None,
            roi_percent: None,
        }
    }

    pub fn probabilities(&self) -> Prob3 {
        Prob3 {
            home: self.probability_home,
            draw: self.probability_draw,
            away: self.probability_away,
        }
    }

    pub fn odds_for(&self, outcome: Outcome) -> Option<f64> {
        match outcome {
            Outcome::Home => self.odds_home,
            Outcome::Draw => self.odds_draw,
            Outcome::Away => self.odds_away,
        }
    }

    pub fn predicted_odds(&self) -> Option<f64> {
        self.odds_for(self.predicted_outcome)
    }

    pub fn confidence_pct(&self) -> f64 {
        self.confidence * 100.0
    }

    pub fn expected_value_pct(&self) -> Option<f64> {
        self.expected_value.map(|ev| ev * 100.0)
    }

    pub fn consensus_pct(&self) -> Option<f64> {
        self.consensus.map(|c| c * 100.0)
    }

    pub fn probability_gap_pct(&self) -> f64 {
        self.probabilities().probability_gap() * 100.0
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.ensemble_strategy.as_deref().and_then(Strategy::from_name)
    }

    pub fn is_completed(&self) -> bool {
        self.actual_outcome.is_some()
    }

    /// Compared at whole seconds, the precision kickoffs are persisted at.
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.kickoff.timestamp() > now.timestamp()
    }

    /// Post-match fields arrive through result recording only.
    pub fn clear_performance(&mut self) {
        self.actual_outcome = None;
        self.actual_score_home = None;
        self.actual_score_away = None;
        self.match_status = None;
        self.result_logged_at = None;
        self.was_correct = None;
        self.profit_loss_10 = None;
        self.roi_percent = None;
    }

    pub fn apply_performance(&mut self, perf: &PerformanceFields, logged_at: DateTime<Utc>) {
        self.actual_outcome = Some(perf.actual_outcome);
        self.actual_score_home = Some(perf.score_home);
        self.actual_score_away = Some(perf.score_away);
        self.match_status = Some(perf.match_status);
        self.was_correct = Some(perf.was_correct);
        self.profit_loss_10 = perf.profit_loss;
        self.roi_percent = perf.roi_percent;
        if self.result_logged_at.is_none() {
            self.result_logged_at = Some(logged_at);
        }
    }
}
