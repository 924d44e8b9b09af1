use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::error::{EngineError, Result};
use crate::probability::{Outcome, Prob3};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub fixture_id: u64,
    pub model_id: String,
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl ModelPrediction {
    pub fn new(
        fixture_id: u64,
        model_id: impl Into<String>,
        home: f64,
        draw: f64,
        away: f64,
    ) -> Self {
        Self {
            fixture_id,
            model_id: model_id.into(),
            home,
            draw,
            away,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    EnsembleAverage,
    HighestConfidenceWithConsensus,
    HighestConfidence,
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::EnsembleAverage => "Ensemble Average",
            Strategy::HighestConfidenceWithConsensus => "Highest Confidence with Consensus",
            Strategy::HighestConfidence => "Highest Confidence",
        }
    }

    pub fn from_name(raw: &str) -> Option<Self> {
        let s = raw.trim().to_ascii_lowercase();
        match s.as_str() {
            "ensemble average" => Some(Strategy::EnsembleAverage),
            "highest confidence with consensus" => Some(Strategy::HighestConfidenceWithConsensus),
            "highest confidence" => Some(Strategy::HighestConfidence),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedPrediction {
    pub fixture_id: u64,
    pub probabilities: Prob3,
    pub outcome: Outcome,
    /// Share of models whose own top pick is the chosen outcome (0-1).
    pub consensus: f64,
    /// Population variance of each model's top-pick probability, in percent units.
    pub variance: f64,
    pub strategy: Strategy,
    pub model_count: usize,
    /// Model whose vector was adopted by the highest-confidence strategies.
    pub source_model: Option<String>,
}

impl FusedPrediction {
    pub fn confidence(&self) -> f64 {
        self.probabilities.get(self.outcome)
    }
}

struct ModelView<'a> {
    model_id: &'a str,
    probs: Prob3,
    top: Outcome,
    top_pct: f64,
}

pub fn fuse(
    fixture_id: u64,
    predictions: &[ModelPrediction],
    cfg: &FusionConfig,
) -> Result<FusedPrediction> {
    if predictions.is_empty() {
        return Err(EngineError::invalid_input(fixture_id, "no contributing models"));
    }

    let mut views = Vec::with_capacity(predictions.len());
    for p in predictions {
        if p.fixture_id != fixture_id {
            return Err(EngineError::invalid_input(
                fixture_id,
                format!("model {} belongs to fixture {}", p.model_id, p.fixture_id),
            ));
        }
        let tolerance = cfg.renormalize_tolerance;
        let probs = Prob3::validated(fixture_id, p.home, p.draw, p.away, tolerance).map_err(
            |err| match err {
                EngineError::InvalidInputData { fixture_id, reason } => {
                    EngineError::InvalidInputData {
                        fixture_id,
                        reason: format!("model {}: {reason}", p.model_id),
                    }
                }
                other => other,
            },
        )?;
        let top = probs.argmax();
        views.push(ModelView {
            model_id: &p.model_id,
            probs,
            top,
            top_pct: probs.get(top) * 100.0,
        });
    }

    let model_count = views.len();
    let majority = majority_outcome(&views);
    let plurality_share = agreement(&views, majority);
    let variance = population_variance(views.iter().map(|v| v.top_pct));

    let enough_models = model_count >= cfg.min_models_for_consensus;
    let strategy = if enough_models
        && plurality_share > cfg.consensus_threshold
        && variance < cfg.variance_threshold
    {
        Strategy::EnsembleAverage
    } else if enough_models {
        Strategy::HighestConfidenceWithConsensus
    } else {
        Strategy::HighestConfidence
    };

    let (probabilities, source_model) = match strategy {
        Strategy::EnsembleAverage => (average(&views), None),
        Strategy::HighestConfidenceWithConsensus | Strategy::HighestConfidence => {
            let best = most_confident(&views);
            (best.probs, Some(best.model_id.to_string()))
        }
    };

    // The averaged argmax can differ from the plurality pick.
    let outcome = probabilities.argmax();
    Ok(FusedPrediction {
        fixture_id,
        outcome,
        probabilities,
        consensus: agreement(&views, outcome),
        variance,
        strategy,
        model_count,
        source_model,
    })
}

/// Plurality of per-model top picks; a tie goes to the pick seen first.
fn majority_outcome(views: &[ModelView<'_>]) -> Outcome {
    let mut counts: Vec<(Outcome, usize)> = Vec::with_capacity(3);
    for v in views {
        match counts.iter_mut().find(|(o, _)| *o == v.top) {
            Some((_, n)) => *n += 1,
            None => counts.push((v.top, 1)),
        }
    }
    let mut best = counts[0];
    for entry in &counts[1..] {
        if entry.1 > best.1 {
            best = *entry;
        }
    }
    best.0
}

fn agreement(views: &[ModelView<'_>], outcome: Outcome) -> f64 {
    let agreeing = views.iter().filter(|v| v.top == outcome).count();
    agreeing as f64 / views.len() as f64
}

fn most_confident<'a, 'b>(views: &'b [ModelView<'a>]) -> &'b ModelView<'a> {
    let mut best = &views[0];
    for v in &views[1..] {
        if v.top_pct > best.top_pct {
            best = v;
        }
    }
    best
}

fn average(views: &[ModelView<'_>]) -> Prob3 {
    let n = views.len() as f64;
    let sum = views.iter().fold(
        Prob3 {
            home: 0.0,
            draw: 0.0,
            away: 0.0,
        },
        |acc, v| Prob3 {
            home: acc.home + v.probs.home,
            draw: acc.draw + v.probs.draw,
            away: acc.away + v.probs.away,
        },
    );
    Prob3 {
        home: sum.home / n,
        draw: sum.draw / n,
        away: sum.away / n,
    }
    .normalized()
}

fn population_variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(model: &str, h: f64, d: f64, a: f64) -> ModelPrediction {
        ModelPrediction::new(7, model, h, d, a)
    }

    #[test]
    fn agreeing_models_are_averaged() {
        let cfg = FusionConfig::default();
        let fused = fuse(
            7,
            &[
                pred("xgb", 0.65, 0.20, 0.15),
                pred("lgbm", 0.63, 0.22, 0.15),
                pred("cat", 0.67, 0.19, 0.14),
            ],
            &cfg,
        )
        .unwrap();
        assert_eq!(fused.strategy, Strategy::EnsembleAverage);
        assert_eq!(fused.outcome, Outcome::Home);
        assert!((fused.consensus - 1.0).abs() < 1e-12);
        assert!((fused.variance - 8.0 / 3.0).abs() < 1e-9);
        assert!((fused.probabilities.home - 0.65).abs() < 1e-9);
        assert!(fused.source_model.is_none());
    }

    #[test]
    fn split_models_take_most_confident_vector() {
        let cfg = FusionConfig::default();
        let fused = fuse(
            7,
            &[
                pred("a", 0.50, 0.30, 0.20),
                pred("b", 0.20, 0.30, 0.50),
                pred("c", 0.25, 0.45, 0.30),
            ],
            &cfg,
        )
        .unwrap();
        assert_eq!(fused.strategy, Strategy::HighestConfidenceWithConsensus);
        // "a" and "b" tie at 50%; the first one wins.
        assert_eq!(fused.source_model.as_deref(), Some("a"));
        assert_eq!(fused.outcome, Outcome::Home);
    }

    #[test]
    fn high_variance_blocks_averaging() {
        let cfg = FusionConfig::default();
        let fused = fuse(
            7,
            &[
                pred("a", 0.90, 0.05, 0.05),
                pred("b", 0.40, 0.35, 0.25),
                pred("c", 0.80, 0.10, 0.10),
            ],
            &cfg,
        )
        .unwrap();
        assert!(fused.variance >= 50.0);
        assert_eq!(fused.strategy, Strategy::HighestConfidenceWithConsensus);
        assert_eq!(fused.source_model.as_deref(), Some("a"));
    }

    #[test]
    fn consensus_follows_the_chosen_outcome() {
        let cfg = FusionConfig::default();
        let fused = fuse(
            7,
            &[
                pred("a", 0.40, 0.35, 0.25),
                pred("b", 0.40, 0.25, 0.35),
                pred("c", 0.10, 0.45, 0.45),
            ],
            &cfg,
        )
        .unwrap();
        // Two models back home, but the averaged vector leans draw.
        assert_eq!(fused.strategy, Strategy::EnsembleAverage);
        assert_eq!(fused.outcome, Outcome::Draw);
        assert!((fused.consensus - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn small_ensembles_fall_back() {
        let cfg = FusionConfig::default();
        let fused = fuse(
            7,
            &[pred("a", 0.60, 0.25, 0.15), pred("b", 0.58, 0.27, 0.15)],
            &cfg,
        )
        .unwrap();
        assert_eq!(fused.strategy, Strategy::HighestConfidence);
        assert_eq!(fused.model_count, 2);
        assert_eq!(fused.source_model.as_deref(), Some("a"));
    }

    #[test]
    fn empty_and_foreign_inputs_are_rejected() {
        let cfg = FusionConfig::default();
        assert!(matches!(
            fuse(7, &[], &cfg),
            Err(EngineError::InvalidInputData { fixture_id: 7, .. })
        ));
        let foreign = ModelPrediction::new(8, "a", 0.5, 0.3, 0.2);
        assert!(fuse(7, &[foreign], &cfg).is_err());
    }

    #[test]
    fn strategy_names_round_trip() {
        for s in [
            Strategy::EnsembleAverage,
            Strategy::HighestConfidenceWithConsensus,
            Strategy::HighestConfidence,
        ] {
            assert_eq!(Strategy::from_name(s.name()), Some(s));
        }
    }
}
