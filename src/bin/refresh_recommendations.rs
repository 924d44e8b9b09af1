use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use matchday_edge::prediction_log::{self, SqlitePredictionStore};
use matchday_edge::store::PredictionStore;
use matchday_edge::{EngineConfig, pipeline};

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
    let db_path = parse_path_arg("--db").unwrap_or_else(prediction_log::default_db_path);
    let store = SqlitePredictionStore::open(&db_path)
        .with_context(|| format!("open prediction log {}", db_path.display()))?;

    let now = Utc::now();
    let (decision, summary) =
        pipeline::refresh_recommendations(&store, &cfg, now).context("refresh failed")?;

    println!("Refresh #{} at {}", summary.generation, prediction_log::fmt_ts(now));
    println!(
        "Candidates: {} eligible, {} excluded",
        decision.ranked.len(),
        decision.excluded.len()
    );
    println!(
        "Flags: {} marked, {} unmarked, {} skipped",
        summary.marked, summary.unmarked, summary.skipped
    );

    for record in store.recommended_records()? {
        println!(
            "{:>9}  {} vs {} ({})  {} conf={:.1}% ev={} score={}",
            record.fixture_id,
            record.home_team,
            record.away_team,
            record.league,
            record.predicted_outcome,
            record.confidence_pct(),
            record
                .expected_value_pct()
                .map(|v| format!("{v:+.1}%"))
                .unwrap_or_else(|| "-".to_string()),
            record
                .recommendation_score
                .map(|v| format!("{v:.2}"))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
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
