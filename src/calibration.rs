use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backtest::{self, BacktestReport};
use crate::buckets::{self, Band, BucketStats, aggregate_bands, aggregate_by};
use crate::config::EngineConfig;
use crate::probability::{self, Metrics, Outcome, Prob3, ReliabilityBin};
use crate::record::RecommendationRecord;

pub const CONFIDENCE_BANDS: [Band; 8] = [
    Band::new("30-40%", 30.0, 40.0),
    Band::new("40-50%", 40.0, 50.0),
    Band::new("50-55%", 50.0, 55.0),
    Band::new("55-60%", 55.0, 60.0),
    Band::new("60-65%", 60.0, 65.0),
    Band::new("65-70%", 65.0, 70.0),
    Band::new("70-80%", 70.0, 80.0),
    Band::new("80-100%", 80.0, 100.0),
];

pub const VARIANCE_BANDS: [Band; 5] = [
    Band::new("0-2", 0.0, 2.0),
    Band::new("2-5", 2.0, 5.0),
    Band::new("5-10", 5.0, 10.0),
    Band::new("10-20", 10.0, 20.0),
    Band::new("20+", 20.0, f64::INFINITY),
];

pub const CONSENSUS_BANDS: [Band; 4] = [
    Band::new("<60%", 0.0, 60.0),
    Band::new("60-75%", 60.0, 75.0),
    Band::new("75-90%", 75.0, 90.0),
    Band::new("90%+", 90.0, 100.0),
];

pub const EV_BANDS: [Band; 7] = [
    Band::new("negative", f64::NEG_INFINITY, 0.0),
    Band::new("0-5%", 0.0, 5.0),
    Band::new("5-10%", 5.0, 10.0),
    Band::new("10-15%", 10.0, 15.0),
    Band::new("15-25%", 15.0, 25.0),
    Band::new("25-50%", 25.0, 50.0),
    Band::new("50%+", 50.0, f64::INFINITY),
];

pub const ODDS_BANDS: [Band; 6] = [
    Band::new("<1.50", 1.0, 1.5),
    Band::new("1.50-2.00", 1.5, 2.0),
    Band::new("2.00-2.50", 2.0, 2.5),
    Band::new("2.50-3.00", 2.5, 3.0),
    Band::new("3.00-4.00", 3.0, 4.0),
    Band::new("4.00+", 4.0, f64::INFINITY),
];

pub const GAP_BANDS: [Band; 6] = [
    Band::new("0-5%", 0.0, 5.0),
    Band::new("5-10%", 5.0, 10.0),
    Band::new("10-15%", 10.0, 15.0),
    Band::new("15-25%", 15.0, 25.0),
    Band::new("25-40%", 25.0, 40.0),
    Band::new("40%+", 40.0, 100.0),
];

const RELIABILITY_BINS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationVerdict {
    OverConfident,
    UnderConfident,
    Calibrated,
    InsufficientData,
}

impl CalibrationVerdict {
    pub fn label(self) -> &'static str {
        match self {
            CalibrationVerdict::OverConfident => "OVER-CONFIDENT!",
            CalibrationVerdict::UnderConfident => "UNDER-CONFIDENT",
            CalibrationVerdict::Calibrated => "OK",
            CalibrationVerdict::InsufficientData => "insufficient data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBandRow {
    pub stats: BucketStats,
    pub expected_pct: f64,
    /// Observed minus expected accuracy, in points.
    pub gap: Option<f64>,
    pub verdict: CalibrationVerdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissPatternRow {
    pub metric: String,
    pub correct_avg: Option<f64>,
    pub incorrect_avg: Option<f64>,
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub overall: BucketStats,
    pub avg_predicted_odds: Option<f64>,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityCurve {
    pub outcome: Outcome,
    pub bins: Vec<ReliabilityBin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub topic: String,
    pub message: String,
}

impl Finding {
    fn warning(topic: &str, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            topic: topic.to_string(),
            message,
        }
    }

    fn info(topic: &str, message: String) -> Self {
        Self {
            severity: Severity::Info,
            topic: topic.to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub summary: Summary,
    pub confidence: Vec<ConfidenceBandRow>,
    pub miss_patterns: Vec<MissPatternRow>,
    pub variance: Vec<BucketStats>,
    pub consensus: Vec<BucketStats>,
    pub expected_value: Vec<BucketStats>,
    pub league: Vec<BucketStats>,
    pub market_type: Vec<BucketStats>,
    pub odds_range: Vec<BucketStats>,
    pub outcome_type: Vec<BucketStats>,
    pub probability_gap: Vec<BucketStats>,
    pub form_alignment: Vec<BucketStats>,
    pub strategy: Vec<BucketStats>,
    pub reliability: Vec<ReliabilityCurve>,
    pub backtest: BacktestReport,
    pub findings: Vec<Finding>,
}

pub fn analyze(records: &[RecommendationRecord], cfg: &EngineConfig) -> CalibrationReport {
    let completed: Vec<RecommendationRecord> = records
        .iter()
        .filter(|r| r.is_completed() && r.was_correct.is_some())
        .cloned()
        .collect();
    let stake = cfg.stake;

    let summary = summarize(&completed, stake);
    let confidence = confidence_calibration(&completed, cfg);
    let miss_patterns = miss_patterns(&completed);

    let variance = aggregate_bands(&completed, &VARIANCE_BANDS, |r| r.variance, stake);
    let consensus = aggregate_bands(&completed, &CONSENSUS_BANDS, |r| r.consensus_pct(), stake);
    let expected_value = aggregate_bands(&completed, &EV_BANDS, |r| r.expected_value_pct(), stake);
    let odds_range = aggregate_bands(&completed, &ODDS_BANDS, |r| r.predicted_odds(), stake);
    let probability_gap =
        aggregate_bands(&completed, &GAP_BANDS, |r| Some(r.probability_gap_pct()), stake);

    let league = aggregate_by(&completed, |r| Some(r.league.clone()), |k| k.clone(), stake);
    let market_type = aggregate_by(
        &completed,
        |r| r.market_type.as_deref().map(str::to_ascii_uppercase),
        |k| k.clone(),
        stake,
    );
    let outcome_type = aggregate_by(
        &completed,
        |r| Some(r.predicted_outcome),
        |k| k.as_str().to_string(),
        stake,
    );
    let form_alignment = aggregate_by(
        &completed,
        form_alignment_key,
        |k| k.label().to_string(),
        stake,
    );
    let strategy = aggregate_by(
        &completed,
        |r| r.ensemble_strategy.clone(),
        |k| k.clone(),
        stake,
    );

    let reliability = reliability_curves(&completed);
    let backtest = backtest::run_backtest(&completed, &cfg.thresholds, &cfg.calibration, stake);

    let mut report = CalibrationReport {
        summary,
        confidence,
        miss_patterns,
        variance,
        consensus,
        expected_value,
        league,
        market_type,
        odds_range,
        outcome_type,
        probability_gap,
        form_alignment,
        strategy,
        reliability,
        backtest,
        findings: Vec::new(),
    };
    report.findings = findings(&report, &completed, cfg);

    info!(
        completed = report.summary.overall.count,
        accuracy = report.summary.overall.accuracy_pct.unwrap_or(0.0),
        findings = report.findings.len(),
        "calibration analysis finished"
    );
    report
}

pub fn summarize(completed: &[RecommendationRecord], stake: f64) -> Summary {
    let overall = buckets::overall(completed, stake);
    let odds: Vec<f64> = completed.iter().filter_map(|r| r.predicted_odds()).collect();
    let predictions: Vec<Prob3> = completed.iter().map(|r| r.probabilities()).collect();
    let outcomes: Vec<Outcome> = completed.iter().filter_map(|r| r.actual_outcome).collect();
    Summary {
        overall,
        avg_predicted_odds: mean(&odds),
        metrics: probability::evaluate_probs(&predictions, &outcomes),
    }
}

pub fn confidence_calibration(
    completed: &[RecommendationRecord],
    cfg: &EngineConfig,
) -> Vec<ConfidenceBandRow> {
    let stats = aggregate_bands(
        completed,
        &CONFIDENCE_BANDS,
        |r| Some(r.confidence_pct()),
        cfg.stake,
    );
    CONFIDENCE_BANDS
        .iter()
        .zip(stats)
        .map(|(band, stats)| {
            let expected_pct = band.midpoint();
            let gap = stats.accuracy_pct.map(|acc| acc - expected_pct);
            let verdict = match gap {
                None => CalibrationVerdict::InsufficientData,
                Some(g) if g <= -cfg.calibration.over_confidence_gap => {
                    CalibrationVerdict::OverConfident
                }
                Some(g) if g >= cfg.calibration.under_confidence_gap => {
                    CalibrationVerdict::UnderConfident
                }
                Some(_) => CalibrationVerdict::Calibrated,
            };
            ConfidenceBandRow {
                stats,
                expected_pct,
                gap,
                verdict,
            }
        })
        .collect()
}

pub fn miss_patterns(completed: &[RecommendationRecord]) -> Vec<MissPatternRow> {
    type Metric = fn(&RecommendationRecord) -> Option<f64>;
    let metrics: [(&str, Metric); 5] = [
        ("confidence %", |r| Some(r.confidence_pct())),
        ("expected value %", |r| r.expected_value_pct()),
        ("predicted odds", |r| r.predicted_odds()),
        ("consensus %", |r| r.consensus_pct()),
        ("variance", |r| r.variance),
    ];

    metrics
        .iter()
        .map(|(name, metric)| {
            let side = |correct: bool| -> Option<f64> {
                let values: Vec<f64> = completed
                    .iter()
                    .filter(|r| r.was_correct == Some(correct))
                    .filter_map(metric)
                    .collect();
                mean(&values)
            };
            let correct_avg = side(true);
            let incorrect_avg = side(false);
            MissPatternRow {
                metric: name.to_string(),
                correct_avg,
                incorrect_avg,
                delta: correct_avg.zip(incorrect_avg).map(|(c, i)| c - i),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormAlignment {
    Agrees,
    Level,
    Disagrees,
}

impl FormAlignment {
    pub fn label(self) -> &'static str {
        match self {
            FormAlignment::Agrees => "form agrees",
            FormAlignment::Level => "form level",
            FormAlignment::Disagrees => "form disagrees",
        }
    }
}

/// Compares recent wins of the backed side against its opponent.
/// Draw picks and records without both form strings have no alignment.
pub fn form_alignment_key(record: &RecommendationRecord) -> Option<FormAlignment> {
    let home = form_wins(record.home_form.as_deref()?)?;
    let away = form_wins(record.away_form.as_deref()?)?;
    let (backed, other) = match record.predicted_outcome {
        Outcome::Home => (home, away),
        Outcome::Away => (away, home),
        Outcome::Draw => return None,
    };
    Some(match backed.cmp(&other) {
        std::cmp::Ordering::Greater => FormAlignment::Agrees,
        std::cmp::Ordering::Equal => FormAlignment::Level,
        std::cmp::Ordering::Less => FormAlignment::Disagrees,
    })
}

fn form_wins(form: &str) -> Option<usize> {
    let games: Vec<char> = form
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != ',')
        .take(5)
        .collect();
    if games.is_empty() {
        return None;
    }
    Some(games.iter().filter(|c| c.eq_ignore_ascii_case(&'w')).count())
}

fn reliability_curves(completed: &[RecommendationRecord]) -> Vec<ReliabilityCurve> {
    let predictions: Vec<Prob3> = completed.iter().map(|r| r.probabilities()).collect();
    let outcomes: Vec<Outcome> = completed.iter().filter_map(|r| r.actual_outcome).collect();
    Outcome::ALL
        .iter()
        .map(|outcome| ReliabilityCurve {
            outcome: *outcome,
            bins: probability::reliability_bins(
                &predictions,
                &outcomes,
                *outcome,
                RELIABILITY_BINS,
            ),
        })
        .collect()
}

fn findings(
    report: &CalibrationReport,
    completed: &[RecommendationRecord],
    cfg: &EngineConfig,
) -> Vec<Finding> {
    let cal = &cfg.calibration;
    let mut out = Vec::new();

    let Some(overall_acc) = report.summary.overall.accuracy_pct else {
        out.push(Finding::info(
            "data",
            "insufficient data: no completed predictions to analyze".to_string(),
        ));
        return out;
    };

    for row in &report.confidence {
        let (Some(acc), Some(gap)) = (row.stats.accuracy_pct, row.gap) else {
            continue;
        };
        match row.verdict {
            CalibrationVerdict::OverConfident => out.push(Finding::warning(
                "confidence",
                format!(
                    "{} band: {:.1}% observed vs {:.1}% expected ({:+.1} pts, n={}) {}",
                    row.stats.label,
                    acc,
                    row.expected_pct,
                    gap,
                    row.stats.count,
                    row.verdict.label()
                ),
            )),
            CalibrationVerdict::UnderConfident => out.push(Finding::info(
                "confidence",
                format!(
                    "{} band: {:.1}% observed vs {:.1}% expected ({:+.1} pts, n={}) {}",
                    row.stats.label,
                    acc,
                    row.expected_pct,
                    gap,
                    row.stats.count,
                    row.verdict.label()
                ),
            )),
            _ => {}
        }
    }

    if let Some(draw) = report
        .outcome_type
        .iter()
        .find(|b| b.label == Outcome::Draw.as_str())
    {
        if let Some(acc) = draw.accuracy_pct {
            if acc < overall_acc - cal.draw_gap {
                out.push(Finding::warning(
                    "outcome",
                    format!(
                        "draw picks hit {:.1}% vs {:.1}% overall (n={}); raise the bar for draws",
                        acc, overall_acc, draw.count
                    ),
                ));
            }
        }
    }

    for league in &report.league {
        if !league.has_samples(cal.min_league_samples) {
            continue;
        }
        if let Some(acc) = league.accuracy_pct.filter(|acc| *acc < 50.0) {
            out.push(Finding::warning(
                "league",
                format!(
                    "{}: {:.1}% accuracy over {} predictions; consider excluding it",
                    league.label, acc, league.count
                ),
            ));
        }
    }

    let high_ev = buckets::overall(
        completed
            .iter()
            .filter(|r| r.expected_value_pct().is_some_and(|ev| ev >= cal.high_ev_pct)),
        cfg.stake,
    );
    if let Some(acc) = high_ev.accuracy_pct.filter(|acc| *acc < overall_acc) {
        out.push(Finding::warning(
            "expected value",
            format!(
                "EV >= {:.0}% picks hit {:.1}% vs {:.1}% overall (n={}); \
                 high EV looks inflated rather than real edge",
                cal.high_ev_pct, acc, overall_acc, high_ev.count
            ),
        ));
    }

    if let Some(ev_row) = report.miss_patterns.iter().find(|r| r.metric == "expected value %") {
        if let Some(delta) = ev_row.delta.filter(|d| *d < 0.0) {
            out.push(Finding::info(
                "expected value",
                format!("misses carried {:.1} pts more EV than hits on average", -delta),
            ));
        }
    }

    let bt = &report.backtest;
    match (&bt.best, bt.production.accuracy_pct) {
        (Some(best), Some(prod_acc)) => {
            let best_acc = best.accuracy_pct.unwrap_or(0.0);
            if best_acc > prod_acc {
                out.push(Finding::info(
                    "thresholds",
                    format!(
                        "confidence >= {:.0}% and EV >= {:.0}% reached {:.1}% over {} predictions \
                         vs {:.1}% at production thresholds",
                        best.thresholds.min_confidence_pct,
                        best.thresholds.min_ev_pct,
                        best_acc,
                        best.count,
                        prod_acc
                    ),
                ));
            }
        }
        (None, _) => out.push(Finding::info(
            "thresholds",
            format!(
                "insufficient data: no threshold combination reaches {} predictions",
                bt.min_samples
            ),
        )),
        _ => {}
    }

    out.sort_by(|a, b| b.severity.cmp(&a.severity));
    out
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_counts_only_recent_five() {
        assert_eq!(form_wins("WWDLW"), Some(3));
        assert_eq!(form_wins("w-w-l-d-l-w-w"), Some(2));
        assert_eq!(form_wins(""), None);
    }

    #[test]
    fn band_families_are_contiguous() {
        for family in [
            &CONFIDENCE_BANDS[..],
            &VARIANCE_BANDS[..],
            &CONSENSUS_BANDS[..],
            &EV_BANDS[..],
            &ODDS_BANDS[..],
            &GAP_BANDS[..],
        ] {
            for pair in family.windows(2) {
                assert_eq!(pair[0].hi, pair[1].lo, "gap after {}", pair[0].label);
            }
        }
    }

    #[test]
    fn verdict_labels() {
        assert_eq!(CalibrationVerdict::OverConfident.label(), "OVER-CONFIDENT!");
        assert_eq!(CalibrationVerdict::Calibrated.label(), "OK");
    }
}
