use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{CalibrationConfig, Thresholds};
use crate::record::RecommendationRecord;

pub const CONFIDENCE_GRID_PCT: [f64; 5] = [50.0, 55.0, 60.0, 65.0, 70.0];
pub const EV_GRID_PCT: [f64; 5] = [0.0, 5.0, 10.0, 15.0, 20.0];
pub const MAX_ODDS_SWEEP: [Option<f64>; 8] = [
    Some(1.8),
    Some(2.0),
    Some(2.5),
    Some(3.0),
    Some(3.5),
    Some(4.0),
    Some(5.0),
    None,
];
pub const GAP_SWEEP_PCT: [f64; 6] = [0.0, 5.0, 10.0, 15.0, 20.0, 25.0];

// Absorbs float noise from percent conversion (0.55 * 100 != 55.0 exactly).
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub min_confidence_pct: f64,
    pub min_ev_pct: f64,
    pub max_odds: Option<f64>,
    pub min_gap_pct: f64,
}

impl ThresholdSet {
    pub fn from_thresholds(t: &Thresholds) -> Self {
        Self {
            min_confidence_pct: t.min_confidence * 100.0,
            min_ev_pct: t.min_expected_value * 100.0,
            max_odds: t.max_odds,
            min_gap_pct: t.min_probability_gap * 100.0,
        }
    }

    pub fn admits(&self, record: &RecommendationRecord) -> bool {
        if record.confidence_pct() + EPS < self.min_confidence_pct {
            return false;
        }
        let Some(ev_pct) = record.expected_value_pct() else {
            return false;
        };
        if ev_pct + EPS < self.min_ev_pct {
            return false;
        }
        if let Some(max_odds) = self.max_odds {
            match record.predicted_odds() {
                Some(odds) if odds <= max_odds + EPS => {}
                _ => return false,
            }
        }
        record.probability_gap_pct() + EPS >= self.min_gap_pct
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCell {
    pub thresholds: ThresholdSet,
    pub count: usize,
    pub correct: usize,
    pub accuracy_pct: Option<f64>,
    pub total_profit_loss: f64,
    pub roi_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub min_samples: usize,
    pub production: ThresholdCell,
    pub grid: Vec<ThresholdCell>,
    pub odds_sweep: Vec<ThresholdCell>,
    pub gap_sweep: Vec<ThresholdCell>,
    pub best: Option<ThresholdCell>,
}

pub fn evaluate_cell(
    records: &[RecommendationRecord],
    thresholds: ThresholdSet,
    stake: f64,
) -> ThresholdCell {
    let mut count = 0usize;
    let mut correct = 0usize;
    let mut pl = 0.0_f64;
    let mut settled = 0usize;
    for record in records.iter().filter(|r| r.is_completed() && thresholds.admits(r)) {
        count += 1;
        if record.was_correct == Some(true) {
            correct += 1;
        }
        if let Some(v) = record.profit_loss_10 {
            pl += v;
            settled += 1;
        }
    }
    ThresholdCell {
        thresholds,
        count,
        correct,
        accuracy_pct: (count > 0).then(|| correct as f64 / count as f64 * 100.0),
        total_profit_loss: pl,
        roi_pct: (settled > 0).then(|| pl / (settled as f64 * stake) * 100.0),
    }
}

pub fn run_backtest(
    records: &[RecommendationRecord],
    production: &Thresholds,
    cfg: &CalibrationConfig,
    stake: f64,
) -> BacktestReport {
    let base = ThresholdSet::from_thresholds(production);

    let grid_points: Vec<ThresholdSet> = CONFIDENCE_GRID_PCT
        .iter()
        .flat_map(|c| {
            EV_GRID_PCT.iter().map(move |e| ThresholdSet {
                min_confidence_pct: *c,
                min_ev_pct: *e,
                max_odds: None,
                min_gap_pct: 0.0,
            })
        })
        .collect();
    let odds_points: Vec<ThresholdSet> = MAX_ODDS_SWEEP
        .iter()
        .map(|m| ThresholdSet {
            max_odds: *m,
            ..base
        })
        .collect();
    let gap_points: Vec<ThresholdSet> = GAP_SWEEP_PCT
        .iter()
        .map(|g| ThresholdSet {
            min_gap_pct: *g,
            ..base
        })
        .collect();

    let evaluate_all = |points: &[ThresholdSet]| -> Vec<ThresholdCell> {
        points
            .par_iter()
            .map(|p| evaluate_cell(records, *p, stake))
            .collect()
    };
    let grid = evaluate_all(&grid_points);
    let odds_sweep = evaluate_all(&odds_points);
    let gap_sweep = evaluate_all(&gap_points);

    BacktestReport {
        min_samples: cfg.min_backtest_samples,
        production: evaluate_cell(records, base, stake),
        best: best_cell(&grid, cfg.min_backtest_samples),
        grid,
        odds_sweep,
        gap_sweep,
    }
}

/// Highest accuracy above the sample floor; ties prefer the larger sample, then grid order.
pub fn best_cell(cells: &[ThresholdCell], min_samples: usize) -> Option<ThresholdCell> {
    let mut best: Option<ThresholdCell> = None;
    for cell in cells {
        if cell.count < min_samples.max(1) {
            continue;
        }
        let Some(acc) = cell.accuracy_pct else {
            continue;
        };
        let better = match &best {
            None => true,
            Some(b) => {
                let b_acc = b.accuracy_pct.unwrap_or(0.0);
                acc > b_acc || (acc == b_acc && cell.count > b.count)
            }
        };
        if better {
            best = Some(*cell);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(count: usize, correct: usize) -> ThresholdCell {
        ThresholdCell {
            thresholds: ThresholdSet {
                min_confidence_pct: 50.0,
                min_ev_pct: 0.0,
                max_odds: None,
                min_gap_pct: 0.0,
            },
            count,
            correct,
            accuracy_pct: (count > 0).then(|| correct as f64 / count as f64 * 100.0),
            total_profit_loss: 0.0,
            roi_pct: None,
        }
    }

    #[test]
    fn best_cell_respects_sample_floor() {
        let cells = [cell(4, 4), cell(12, 9), cell(20, 15), cell(30, 18)];
        let best = best_cell(&cells, 10).unwrap();
        // 9/12 and 15/20 are both 75%; the larger sample wins.
        assert_eq!(best.count, 20);
    }

    #[test]
    fn no_cell_above_floor_means_no_recommendation() {
        assert!(best_cell(&[cell(3, 3), cell(0, 0)], 10).is_none());
    }
}
