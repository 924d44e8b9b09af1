use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use chrono::Duration;

use matchday_edge::calibration;
use matchday_edge::ensemble::ModelPrediction;
use matchday_edge::pipeline::{self, FixtureInput};
use matchday_edge::ranking;
use matchday_edge::record::{FixtureInfo, MarketOdds};
use matchday_edge::synthetic;
use matchday_edge::EngineConfig;

fn sample_inputs(count: usize) -> Vec<FixtureInput> {
    let now = synthetic::anchor();
    (0..count)
        .map(|i| {
            let id = i as u64;
            let tilt = (i % 17) as f64 / 100.0;
            let home = 0.40 + tilt;
            let draw = 0.27;
            let away = 1.0 - home - draw;
            FixtureInput {
                fixture: FixtureInfo {
                    fixture_id: id,
                    home_team: format!("Home {i}"),
                    away_team: format!("Away {i}"),
                    league: "Premier League".to_string(),
                    league_id: Some(47),
                    kickoff: now + Duration::hours(1 + (i % 72) as i64),
                    market_type: Some("1X2".to_string()),
                    home_form: Some("WDWLW".to_string()),
                    away_form: Some("LDLWW".to_string()),
                },
                predictions: vec![
                    ModelPrediction::new(id, "elo", home, draw, away),
                    ModelPrediction::new(id, "poisson", home - 0.02, draw + 0.01, away + 0.01),
                    ModelPrediction::new(id, "xg", home + 0.02, draw - 0.01, away - 0.01),
                    ModelPrediction::new(id, "form", home - 0.05, draw + 0.02, away + 0.03),
                ],
                odds: MarketOdds {
                    home: Some(1.0 / (home * 0.9)),
                    draw: Some(3.3),
                    away: Some(1.0 / (away * 0.95)),
                    bookmaker: Some("Pinnacle".to_string()),
                },
            }
        })
        .collect()
}

fn bench_fusion(c: &mut Criterion) {
    let cfg = EngineConfig::default();
    let inputs = sample_inputs(2_000);
    let now = synthetic::anchor();
    c.bench_function("evaluate_batch_2000", |b| {
        b.iter(|| pipeline::evaluate_batch(black_box(&inputs), &cfg, now, None))
    });
}

fn bench_ranking(c: &mut Criterion) {
    let cfg = EngineConfig::default();
    let now = synthetic::anchor();
    let records: Vec<_> = synthetic::generate_history(5_000, 3)
        .into_iter()
        .filter(|r| r.is_future(now))
        .collect();
    c.bench_function("rank_future_records", |b| {
        b.iter(|| ranking::rank(black_box(&records), &cfg.thresholds, now))
    });
}

fn bench_calibration(c: &mut Criterion) {
    let cfg = EngineConfig::default();
    let history = synthetic::generate_history(10_000, 5);
    c.bench_function("analyze_10000", |b| {
        b.iter(|| calibration::analyze(black_box(&history), &cfg))
    });
}

criterion_group!(benches, bench_fusion, bench_ranking, bench_calibration);
criterion_main!(benches);
