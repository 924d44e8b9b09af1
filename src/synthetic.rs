use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::EngineConfig;
use crate::ensemble::{self, ModelPrediction};
use crate::expected_value;
use crate::outcome::{self, MatchResult};
use crate::probability::{Outcome, Prob3, round_to};
use crate::record::{FixtureInfo, MarketOdds, RecommendationRecord};

const ANCHOR_TS: i64 = 1_748_736_000; // 2025-06-01T00:00:00Z
const FIRST_FIXTURE_ID: u64 = 900_000;
const COMPLETED_SHARE: f64 = 0.8;
const BOOK_MARGIN: f64 = 1.06;

const LEAGUES: [(&str, u32); 6] = [
    ("Premier League", 47),
    ("LaLiga", 87),
    ("Serie A", 55),
    ("Bundesliga", 54),
    ("Ligue 1", 53),
    ("Eredivisie", 57),
];
const TEAMS: [&str; 12] = [
    "Arsenal", "Chelsea", "Everton", "Fulham", "Brentford", "Burnley", "Sevilla", "Getafe",
    "Torino", "Bologna", "Mainz", "Lens",
];
const MODELS: [&str; 5] = ["elo", "poisson", "xg", "market", "form"];
const BOOKMAKERS: [&str; 3] = ["Pinnacle", "Bet365", "Unibet"];

/// Reference "now" for generated histories: completed fixtures kick off
/// before it and future fixtures after it.
pub fn anchor() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ANCHOR_TS, 0).unwrap_or_default()
}

pub fn generate_history(count: usize, seed: u64) -> Vec<RecommendationRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let cfg = EngineConfig::default();
    let now = anchor();
    let mut out = Vec::with_capacity(count);

    for i in 0..count {
        let fixture_id = FIRST_FIXTURE_ID + i as u64;
        let completed = rng.gen_bool(COMPLETED_SHARE);
        let kickoff = if completed {
            now - Duration::hours(rng.gen_range(2..24 * 120))
        } else {
            now + Duration::hours(rng.gen_range(1..24 * 10))
        };

        let truth = true_vector(&mut rng);
        let predictions = model_views(&mut rng, fixture_id, &truth);
        let Ok(fused) = ensemble::fuse(fixture_id, &predictions, &cfg.fusion) else {
            continue;
        };

        let odds = price(&mut rng, &truth);
        let value = expected_value::evaluate(
            fixture_id,
            fused.outcome,
            fused.confidence(),
            odds.for_outcome(fused.outcome),
            &cfg.thresholds,
        )
        .ok();

        let fixture = fixture_info(&mut rng, fixture_id, kickoff);
        let mut record = RecommendationRecord::from_prediction(
            &fixture,
            &fused,
            &odds,
            value.as_ref(),
            kickoff - Duration::hours(rng.gen_range(3..48)),
        );

        if completed {
            let (home, away) = final_score(&mut rng, &truth);
            let result = MatchResult::finished(fixture_id, home, away);
            if let Ok(perf) = outcome::record_outcome(&record, &result, cfg.stake) {
                record.apply_performance(&perf, kickoff + Duration::hours(2));
            }
        }
        out.push(record);
    }
    out
}

fn true_vector(rng: &mut StdRng) -> Prob3 {
    let home: f64 = rng.gen_range(0.22..0.68);
    let draw: f64 = rng.gen_range(0.18..0.30);
    let away = (1.0 - home - draw).max(0.06);
    Prob3 { home, draw, away }.normalized()
}

fn model_views(rng: &mut StdRng, fixture_id: u64, truth: &Prob3) -> Vec<ModelPrediction> {
    let n = rng.gen_range(1..=MODELS.len());
    MODELS[..n]
        .iter()
        .map(|model| {
            let noisy = Prob3 {
                home: truth.home * rng.gen_range(0.85..1.15),
                draw: truth.draw * rng.gen_range(0.85..1.15),
                away: truth.away * rng.gen_range(0.85..1.15),
            }
            .normalized();
            ModelPrediction::new(
                fixture_id,
                *model,
                round_to(noisy.home, 4),
                round_to(noisy.draw, 4),
                round_to(noisy.away, 4),
            )
        })
        .collect()
}

fn price(rng: &mut StdRng, truth: &Prob3) -> MarketOdds {
    let mut quote = |p: f64| -> Option<f64> {
        if rng.gen_bool(0.03) {
            return None;
        }
        let fair = 1.0 / (p * BOOK_MARGIN);
        Some(round_to((fair * rng.gen_range(0.92..1.10)).max(1.02), 2))
    };
    MarketOdds {
        home: quote(truth.home),
        draw: quote(truth.draw),
        away: quote(truth.away),
        bookmaker: Some(BOOKMAKERS[rng.gen_range(0..BOOKMAKERS.len())].to_string()),
    }
}

fn fixture_info(rng: &mut StdRng, fixture_id: u64, kickoff: DateTime<Utc>) -> FixtureInfo {
    let (league, league_id) = LEAGUES[rng.gen_range(0..LEAGUES.len())];
    let home = rng.gen_range(0..TEAMS.len());
    let away = (home + rng.gen_range(1..TEAMS.len())) % TEAMS.len();
    FixtureInfo {
        fixture_id,
        home_team: TEAMS[home].to_string(),
        away_team: TEAMS[away].to_string(),
        league: league.to_string(),
        league_id: Some(league_id),
        kickoff,
        market_type: rng.gen_bool(0.9).then(|| "1X2".to_string()),
        home_form: rng.gen_bool(0.85).then(|| form_string(rng)),
        away_form: rng.gen_bool(0.85).then(|| form_string(rng)),
    }
}

fn form_string(rng: &mut StdRng) -> String {
    (0..5)
        .map(|_| match rng.gen_range(0..3) {
            0 => 'W',
            1 => 'D',
            _ => 'L',
        })
        .collect()
}

fn final_score(rng: &mut StdRng, truth: &Prob3) -> (i32, i32) {
    let roll: f64 = rng.r#gen();
    let winner = if roll < truth.home {
        Outcome::Home
    } else if roll < truth.home + truth.draw {
        Outcome::Draw
    } else {
        Outcome::Away
    };
    let low = rng.gen_range(0..3);
    let margin = rng.gen_range(1..4);
    match winner {
        Outcome::Home => (low + margin, low),
        Outcome::Draw => (low, low),
        Outcome::Away => (low, low + margin),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_history() {
        let a = generate_history(50, 7);
        let b = generate_history(50, 7);
        assert_eq!(a, b);
        assert_ne!(a, generate_history(50, 8));
    }

    #[test]
    fn completed_records_sit_before_anchor() {
        let now = anchor();
        for r in generate_history(200, 42) {
            if r.is_completed() {
                assert!(r.kickoff < now);
                assert!(r.was_correct.is_some());
            } else {
                assert!(r.is_future(now));
            }
        }
    }
}
