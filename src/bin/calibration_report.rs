use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use matchday_edge::calibration::{self, CalibrationReport};
use matchday_edge::prediction_log::{self, SqlitePredictionStore};
use matchday_edge::{EngineConfig, pipeline, report_export, synthetic};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = match parse_path_arg("--config") {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => EngineConfig::from_env(),
    };

    let report = if let Some(count) = parse_usize_arg("--synthetic") {
        let seed = parse_usize_arg("--seed").unwrap_or(42) as u64;
        let history = synthetic::generate_history(count, seed);
        println!("Source: synthetic history ({count} fixtures, seed {seed})");
        calibration::analyze(&history, &cfg)
    } else {
        let db_path = parse_path_arg("--db").unwrap_or_else(prediction_log::default_db_path);
        let store = SqlitePredictionStore::open(&db_path)
            .with_context(|| format!("open prediction log {}", db_path.display()))?;
        if has_flag("--recalculate") {
            let changed = pipeline::recalculate_performance(&store, &cfg)?;
            println!("Recalculated performance: {changed} records changed");
        }
        println!("Source: {}", db_path.display());
        pipeline::calibration_report(&store, &cfg)?
    };

    print_report(&report);

    if let Some(path) = parse_path_arg("--xlsx") {
        let summary = report_export::export_report_xlsx(&path, &report)
            .with_context(|| format!("export {}", path.display()))?;
        println!(
            "Wrote {} ({} sheets, {} rows)",
            path.display(),
            summary.sheets,
            summary.rows
        );
    }
    if let Some(path) = parse_path_arg("--json") {
        let raw = serde_json::to_string_pretty(&report)?;
        fs::write(&path, raw).with_context(|| format!("write {}", path.display()))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn print_report(report: &CalibrationReport) {
    let overall = &report.summary.overall;
    println!();
    println!("== Summary ==");
    println!("Completed: {}  Correct: {}", overall.count, overall.correct);
    println!(
        "Accuracy: {}  P/L: {:+.2}  ROI: {}  Avg odds: {}",
        pct(overall.accuracy_pct),
        overall.total_profit_loss,
        pct(overall.roi_pct),
        report
            .summary
            .avg_predicted_odds
            .map(|o| format!("{o:.2}"))
            .unwrap_or_else(|| "n/a".to_string())
    );
    if overall.count > 0 {
        println!(
            "Brier: {:.4}  Log loss: {:.4}",
            report.summary.metrics.brier, report.summary.metrics.log_loss
        );
    }

    println!();
    println!("== Confidence calibration ==");
    for row in &report.confidence {
        println!(
            "{:<9} n={:<4} acc={:<7} exp={:>5.1}% gap={:<7} {}",
            row.stats.label,
            row.stats.count,
            pct(row.stats.accuracy_pct),
            row.expected_pct,
            row.gap.map(|g| format!("{g:+.1}")).unwrap_or_else(|| "-".to_string()),
            row.verdict.label()
        );
    }

    println!();
    println!("== Hits vs misses ==");
    for row in &report.miss_patterns {
        println!(
            "{:<18} correct={:<8} incorrect={:<8} delta={}",
            row.metric,
            num(row.correct_avg),
            num(row.incorrect_avg),
            num(row.delta)
        );
    }

    let sections = [
        ("Variance", &report.variance),
        ("Consensus", &report.consensus),
        ("Expected value", &report.expected_value),
        ("League", &report.league),
        ("Market type", &report.market_type),
        ("Odds range", &report.odds_range),
        ("Outcome type", &report.outcome_type),
        ("Probability gap", &report.probability_gap),
        ("Form alignment", &report.form_alignment),
        ("Strategy", &report.strategy),
    ];
    for (title, rows) in sections {
        println!();
        println!("== {title} ==");
        for b in rows.iter() {
            println!(
                "{:<34} n={:<4} acc={:<7} roi={}",
                b.label,
                b.count,
                pct(b.accuracy_pct),
                pct(b.roi_pct)
            );
        }
    }

    let bt = &report.backtest;
    println!();
    println!("== Threshold backtest (min {} samples) ==", bt.min_samples);
    println!(
        "production: n={} acc={} roi={}",
        bt.production.count,
        pct(bt.production.accuracy_pct),
        pct(bt.production.roi_pct)
    );
    match &bt.best {
        Some(best) => println!(
            "best: conf>={:.0}% ev>={:.0}% n={} acc={} roi={}",
            best.thresholds.min_confidence_pct,
            best.thresholds.min_ev_pct,
            best.count,
            pct(best.accuracy_pct),
            pct(best.roi_pct)
        ),
        None => println!("best: insufficient data"),
    }

    println!();
    println!("== Findings ==");
    for finding in &report.findings {
        println!("[{:?}] {}: {}", finding.severity, finding.topic, finding.message);
    }
}

fn pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.1}%"))
        .unwrap_or_else(|| "-".to_string())
}

fn num(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(PathBuf::from(raw.trim()));
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<usize>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<usize>()
        {
            return Some(v);
        }
    }
    None
}
