use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum fused top-outcome probability (0-1).
    pub min_confidence: f64,
    /// Minimum expected value as a fraction of stake (0.10 = 10%).
    pub min_expected_value: f64,
    pub top_n: usize,
    pub max_odds: Option<f64>,
    /// Minimum top-minus-second probability (0-1).
    pub min_probability_gap: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.55,
            min_expected_value: 0.10,
            top_n: 10,
            max_odds: None,
            min_probability_gap: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub consensus_threshold: f64,
    /// Upper bound on the variance of top-pick percentages.
    pub variance_threshold: f64,
    pub min_models_for_consensus: usize,
    pub renormalize_tolerance: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.60,
            variance_threshold: 50.0,
            min_models_for_consensus: 3,
            renormalize_tolerance: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub min_backtest_samples: usize,
    pub over_confidence_gap: f64,
    pub under_confidence_gap: f64,
    pub min_league_samples: usize,
    pub draw_gap: f64,
    pub high_ev_pct: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_backtest_samples: 10,
            over_confidence_gap: 10.0,
            under_confidence_gap: 5.0,
            min_league_samples: 5,
            draw_gap: 10.0,
            high_ev_pct: 25.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: Thresholds,
    pub fusion: FusionConfig,
    pub calibration: CalibrationConfig,
    pub stake: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            fusion: FusionConfig::default(),
            calibration: CalibrationConfig::default(),
            stake: 10.0,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let thresholds = Thresholds {
            min_confidence: env_f64("EDGE_MIN_CONFIDENCE")
                .unwrap_or(defaults.thresholds.min_confidence)
                .clamp(0.0, 1.0),
            min_expected_value: env_f64("EDGE_MIN_EV")
                .unwrap_or(defaults.thresholds.min_expected_value)
                .clamp(-1.0, 10.0),
            top_n: env::var("EDGE_TOP_N")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(defaults.thresholds.top_n)
                .clamp(1, 500),
            max_odds: env_f64("EDGE_MAX_ODDS").filter(|v| *v > 1.0),
            min_probability_gap: env_f64("EDGE_MIN_PROB_GAP")
                .unwrap_or(defaults.thresholds.min_probability_gap)
                .clamp(0.0, 1.0),
        };
        let calibration = CalibrationConfig {
            min_backtest_samples: env::var("EDGE_BACKTEST_MIN_SAMPLES")
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(defaults.calibration.min_backtest_samples)
                .max(1),
            ..defaults.calibration
        };

        Self {
            thresholds,
            fusion: defaults.fusion,
            calibration,
            stake: env_f64("EDGE_STAKE")
                .unwrap_or(defaults.stake)
                .clamp(0.01, 1_000_000.0),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| EngineError::Config(format!("read {}: {err}", path.display())))?;
        let cfg: EngineConfig = serde_json::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if !(0.0..=1.0).contains(&t.min_confidence) {
            return Err(EngineError::Config(format!(
                "min_confidence {} outside [0, 1]",
                t.min_confidence
            )));
        }
        if t.top_n == 0 {
            return Err(EngineError::Config("top_n must be at least 1".to_string()));
        }
        if let Some(max_odds) = t.max_odds {
            if max_odds <= 1.0 {
                return Err(EngineError::Config(format!("max_odds {max_odds} must exceed 1")));
            }
        }
        if self.fusion.min_models_for_consensus == 0 {
            return Err(EngineError::Config(
                "min_models_for_consensus must be at least 1".to_string(),
            ));
        }
        if self.stake <= 0.0 {
            return Err(EngineError::Config(format!("stake {} must be positive", self.stake)));
        }
        Ok(())
    }
}

fn env_f64(name: &str) -> Option<f64> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
