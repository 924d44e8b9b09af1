use chrono::{DateTime, Duration, TimeZone, Utc};

use matchday_edge::ensemble::Strategy;
use matchday_edge::outcome::{MatchResult, MatchStatus};
use matchday_edge::pipeline;
use matchday_edge::prediction_log::SqlitePredictionStore;
use matchday_edge::probability::Outcome;
use matchday_edge::record::RecommendationRecord;
use matchday_edge::store::{MemoryPredictionStore, PredictionStore, UpsertOutcome};
use matchday_edge::{EngineConfig, EngineError};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

fn record(
    fixture_id: u64,
    confidence: f64,
    ev: Option<f64>,
    kickoff: DateTime<Utc>,
) -> RecommendationRecord {
    let rest = 1.0 - confidence;
    RecommendationRecord {
        fixture_id,
        home_team: format!("Home {fixture_id}"),
        away_team: format!("Away {fixture_id}"),
        league: "LaLiga".to_string(),
        league_id: Some(87),
        kickoff,
        market_type: Some("1X2".to_string()),
        home_form: Some("WWDLW".to_string()),
        away_form: Some("LDLLW".to_string()),
        predicted_outcome: Outcome::Home,
        confidence,
        probability_home: confidence,
        probability_draw: rest * 0.5,
        probability_away: rest * 0.5,
        odds_home: ev.map(|ev| ((ev + 1.0) / confidence * 100.0).round() / 100.0),
        odds_draw: Some(3.6),
        odds_away: Some(4.2),
        bookmaker: Some("Unibet".to_string()),
        expected_value: ev,
        model_count: Some(4),
        consensus: Some(0.75),
        variance: Some(6.5),
        ensemble_strategy: Some(Strategy::EnsembleAverage.name().to_string()),
        recommendation_score: None,
        is_recommended: false,
        prediction_logged_at: now() - Duration::hours(6),
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

fn stores() -> Vec<(&'static str, Box<dyn PredictionStore>)> {
    let memory: Box<dyn PredictionStore> = Box::new(MemoryPredictionStore::new());
    let sqlite: Box<dyn PredictionStore> =
        Box::new(SqlitePredictionStore::open_in_memory().unwrap());
    vec![("memory", memory), ("sqlite", sqlite)]
}

/// Six future candidates of varying quality, one below the gates, one past.
fn seed(store: &dyn PredictionStore) {
    let soon = now() + Duration::days(1);
    let rows = [
        record(1, 0.70, Some(0.30), soon),
        record(2, 0.66, Some(0.20), soon),
        record(3, 0.60, Some(0.12), soon),
        record(4, 0.58, Some(0.40), soon),
        record(5, 0.50, Some(0.50), soon),
        record(6, 0.72, None, soon),
        record(7, 0.80, Some(0.35), now() - Duration::hours(2)),
    ];
    for row in &rows {
        store.upsert_prediction(row, now() - Duration::days(1)).unwrap();
    }
}

fn flags(store: &dyn PredictionStore) -> Vec<(u64, bool)> {
    (1..=7)
        .map(|id| (id, store.get(id).unwrap().unwrap().is_recommended))
        .collect()
}

#[test]
fn backends_agree_on_recommended_flags() {
    let mut cfg = EngineConfig::default();
    cfg.thresholds.top_n = 3;

    let mut seen = Vec::new();
    for (name, store) in stores() {
        seed(store.as_ref());
        let (decision, summary) =
            pipeline::refresh_recommendations(store.as_ref(), &cfg, now()).unwrap();
        assert_eq!(decision.selected.len(), 3, "{name}");
        assert_eq!(summary.marked, 3, "{name}");
        assert_eq!(summary.unmarked, 0, "{name}");
        let recommended: Vec<u64> = store
            .recommended_records()
            .unwrap()
            .iter()
            .map(|r| r.fixture_id)
            .collect();
        assert_eq!(recommended.len(), 3, "{name}");
        assert!(!recommended.contains(&5), "{name}: below confidence gate");
        assert!(!recommended.contains(&6), "{name}: no expected value");
        assert!(!recommended.contains(&7), "{name}: already kicked off");
        seen.push(flags(store.as_ref()));
    }
    assert_eq!(seen[0], seen[1]);
}

#[test]
fn refresh_twice_is_idempotent() {
    let cfg = EngineConfig::default();
    for (name, store) in stores() {
        seed(store.as_ref());
        pipeline::refresh_recommendations(store.as_ref(), &cfg, now()).unwrap();
        let before = flags(store.as_ref());
        let (_, summary) = pipeline::refresh_recommendations(store.as_ref(), &cfg, now()).unwrap();
        assert_eq!(flags(store.as_ref()), before, "{name}");
        assert_eq!(summary.unmarked, 0, "{name}");
        assert_eq!(summary.generation, 2, "{name}");
    }
}

#[test]
fn refresh_never_touches_started_fixtures() {
    let mut cfg = EngineConfig::default();
    cfg.thresholds.top_n = 1;
    for (name, store) in stores() {
        seed(store.as_ref());
        let (first, _) = pipeline::refresh_recommendations(store.as_ref(), &cfg, now()).unwrap();
        let flagged = first.selected[0];

        // The flagged fixture kicks off; a later refresh must leave it alone.
        let later = now() + Duration::days(2);
        let late = record(20, 0.75, Some(0.40), later + Duration::days(1));
        store.upsert_prediction(&late, later).unwrap();
        let (second, summary) =
            pipeline::refresh_recommendations(store.as_ref(), &cfg, later).unwrap();
        assert_eq!(second.selected, vec![20], "{name}");
        assert_eq!(summary.unmarked, 0, "{name}");

        assert!(store.get(flagged).unwrap().unwrap().is_recommended, "{name}");
        assert!(store.get(20).unwrap().unwrap().is_recommended, "{name}");
    }
}

#[test]
fn replacing_the_recommended_set_unmarks_losers() {
    let mut cfg = EngineConfig::default();
    cfg.thresholds.top_n = 2;
    for (name, store) in stores() {
        seed(store.as_ref());
        pipeline::refresh_recommendations(store.as_ref(), &cfg, now()).unwrap();

        let better = record(30, 0.78, Some(0.60), now() + Duration::days(1));
        store.upsert_prediction(&better, now()).unwrap();
        let (_, summary) = pipeline::refresh_recommendations(store.as_ref(), &cfg, now()).unwrap();
        assert_eq!(summary.unmarked, 1, "{name}");
        assert_eq!(summary.marked, 2, "{name}");
        assert_eq!(store.recommended_records().unwrap().len(), 2, "{name}");
    }
}

#[test]
fn concurrent_refresh_is_rejected() {
    let cfg = EngineConfig::default();

    let memory = MemoryPredictionStore::new();
    seed(&memory);
    {
        let _guard = memory.refresh_slot().unwrap();
        let err = pipeline::refresh_recommendations(&memory, &cfg, now()).unwrap_err();
        assert!(matches!(err, EngineError::StaleRefreshRace));
        assert!(memory.recommended_records().unwrap().is_empty());
    }
    assert!(pipeline::refresh_recommendations(&memory, &cfg, now()).is_ok());

    let sqlite = SqlitePredictionStore::open_in_memory().unwrap();
    seed(&sqlite);
    {
        let _guard = sqlite.refresh_slot().unwrap();
        let err = pipeline::refresh_recommendations(&sqlite, &cfg, now()).unwrap_err();
        assert!(matches!(err, EngineError::StaleRefreshRace));
        assert!(sqlite.recommended_records().unwrap().is_empty());
    }
    assert!(pipeline::refresh_recommendations(&sqlite, &cfg, now()).is_ok());
}

#[test]
fn upsert_after_kickoff_is_frozen() {
    for (name, store) in stores() {
        let kickoff = now() + Duration::hours(1);
        let original = record(40, 0.62, Some(0.15), kickoff);
        assert_eq!(
            store.upsert_prediction(&original, now()).unwrap(),
            UpsertOutcome::Created,
            "{name}"
        );

        let mut revised = original.clone();
        revised.confidence = 0.70;
        revised.probability_home = 0.70;
        assert_eq!(
            store.upsert_prediction(&revised, now()).unwrap(),
            UpsertOutcome::Updated,
            "{name}"
        );

        let mut late = original.clone();
        late.confidence = 0.90;
        let after = kickoff + Duration::minutes(5);
        assert_eq!(
            store.upsert_prediction(&late, after).unwrap(),
            UpsertOutcome::Frozen,
            "{name}"
        );
        let stored = store.get(40).unwrap().unwrap();
        assert_eq!(stored.confidence, 0.70, "{name}");
        assert!(!stored.is_recommended, "{name}");
    }
}

#[test]
fn upsert_keeps_recommendation_flag() {
    let cfg = EngineConfig::default();
    for (name, store) in stores() {
        seed(store.as_ref());
        pipeline::refresh_recommendations(store.as_ref(), &cfg, now()).unwrap();
        let flagged = store.recommended_records().unwrap()[0].clone();

        let mut refreshed = flagged.clone();
        refreshed.is_recommended = false;
        refreshed.bookmaker = Some("Pinnacle".to_string());
        assert_eq!(
            store.upsert_prediction(&refreshed, now()).unwrap(),
            UpsertOutcome::Updated,
            "{name}"
        );
        let stored = store.get(flagged.fixture_id).unwrap().unwrap();
        assert!(stored.is_recommended, "{name}");
        assert_eq!(stored.bookmaker.as_deref(), Some("Pinnacle"), "{name}");
    }
}

#[test]
fn recording_results_is_idempotent() {
    let cfg = EngineConfig::default();
    for (name, store) in stores() {
        let kickoff = now() - Duration::hours(3);
        store
            .upsert_prediction(&record(50, 0.65, Some(0.43), kickoff), now() - Duration::days(1))
            .unwrap();
        store
            .upsert_prediction(&record(51, 0.60, None, kickoff), now() - Duration::days(1))
            .unwrap();
        store
            .upsert_prediction(&record(52, 0.60, Some(0.10), kickoff), now() - Duration::days(1))
            .unwrap();

        let results = vec![
            MatchResult::finished(50, 2, 1),
            MatchResult::finished(51, 1, 1),
            MatchResult {
                fixture_id: 52,
                status: MatchStatus::Live,
                home_score: Some(0),
                away_score: Some(0),
                score_text: None,
            },
            MatchResult::finished(99, 1, 0),
        ];

        let first =
            pipeline::record_finished_results(store.as_ref(), &results, &cfg, now()).unwrap();
        assert_eq!(first.recorded, 2, "{name}");
        assert_eq!(first.pending, 1, "{name}");
        assert_eq!(first.failed, 1, "{name}");

        let won = store.get(50).unwrap().unwrap();
        assert_eq!(won.was_correct, Some(true), "{name}");
        assert_eq!(won.profit_loss_10, Some(12.0), "{name}");
        assert_eq!(won.roi_percent, Some(120.0), "{name}");
        assert_eq!(won.result_logged_at, Some(now()), "{name}");

        let unpriced = store.get(51).unwrap().unwrap();
        assert_eq!(unpriced.actual_outcome, Some(Outcome::Draw), "{name}");
        assert_eq!(unpriced.was_correct, Some(false), "{name}");
        assert_eq!(unpriced.profit_loss_10, None, "{name}");
        assert_eq!(unpriced.roi_percent, None, "{name}");

        let live = store.get(52).unwrap().unwrap();
        assert!(live.actual_outcome.is_none(), "{name}");
        assert!(live.was_correct.is_none(), "{name}");

        let later = now() + Duration::hours(1);
        let second =
            pipeline::record_finished_results(store.as_ref(), &results, &cfg, later).unwrap();
        assert_eq!(second.recorded, 0, "{name}");
        assert_eq!(second.unchanged, 2, "{name}");
        assert_eq!(store.get(50).unwrap().unwrap(), won, "{name}");
    }
}

#[test]
fn incomplete_result_leaves_record_untouched() {
    let cfg = EngineConfig::default();
    for (name, store) in stores() {
        let kickoff = now() - Duration::hours(3);
        store
            .upsert_prediction(&record(60, 0.65, Some(0.20), kickoff), now() - Duration::days(1))
            .unwrap();
        let results = [MatchResult {
            fixture_id: 60,
            status: MatchStatus::Finished,
            home_score: None,
            away_score: None,
            score_text: Some("abandoned".to_string()),
        }];
        let summary =
            pipeline::record_finished_results(store.as_ref(), &results, &cfg, now()).unwrap();
        assert_eq!(summary.pending, 1, "{name}");
        let stored = store.get(60).unwrap().unwrap();
        assert!(stored.actual_outcome.is_none(), "{name}");
        assert!(stored.result_logged_at.is_none(), "{name}");
    }
}

#[test]
fn recalculate_performance_settles_once() {
    let mut cfg = EngineConfig::default();
    for (name, store) in stores() {
        let kickoff = now() - Duration::hours(3);
        for (id, home, away) in [(70, 2, 0), (71, 0, 0), (72, 1, 3)] {
            store
                .upsert_prediction(
                    &record(id, 0.64, Some(0.25), kickoff),
                    now() - Duration::days(1),
                )
                .unwrap();
            pipeline::record_finished_results(
                store.as_ref(),
                &[MatchResult::finished(id, home, away)],
                &cfg,
                now(),
            )
            .unwrap();
        }

        cfg.stake = 10.0;
        assert_eq!(pipeline::recalculate_performance(store.as_ref(), &cfg).unwrap(), 0, "{name}");

        cfg.stake = 20.0;
        assert_eq!(pipeline::recalculate_performance(store.as_ref(), &cfg).unwrap(), 3, "{name}");
        assert_eq!(pipeline::recalculate_performance(store.as_ref(), &cfg).unwrap(), 0, "{name}");
        assert_eq!(store.get(71).unwrap().unwrap().profit_loss_10, Some(-20.0), "{name}");
        assert_eq!(store.get(70).unwrap().unwrap().result_logged_at, Some(now()), "{name}");
        cfg.stake = 10.0;
    }
}

#[test]
fn sqlite_round_trips_every_field() {
    let store = SqlitePredictionStore::open_in_memory().unwrap();
    let mut original = record(80, 0.61, Some(0.18), now() + Duration::days(3));
    original.league_id = None;
    original.market_type = None;
    original.home_form = None;
    original.model_count = None;
    store.upsert_prediction(&original, now()).unwrap();
    assert_eq!(store.get(80).unwrap().unwrap(), original);
    assert!(store.get(81).unwrap().is_none());
}

#[test]
fn backends_agree_on_kickoff_within_the_same_second() {
    let kickoff = now() + Duration::milliseconds(400);
    for (name, store) in stores() {
        let row = record(90, 0.66, Some(0.20), kickoff);
        store.upsert_prediction(&row, now() - Duration::days(1)).unwrap();
        assert!(store.future_records(now()).unwrap().is_empty(), "{name}");
        assert_eq!(
            store.upsert_prediction(&row, now()).unwrap(),
            UpsertOutcome::Frozen,
            "{name}"
        );
        let earlier = now() - Duration::seconds(1);
        assert_eq!(store.future_records(earlier).unwrap().len(), 1, "{name}");
    }
}

#[test]
fn sqlite_rejects_ids_beyond_its_integer_range() {
    let store = SqlitePredictionStore::open_in_memory().unwrap();
    let huge = i64::MAX as u64 + 1;
    let row = record(huge, 0.62, Some(0.15), now() + Duration::days(1));
    let err = store.upsert_prediction(&row, now()).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInputData { fixture_id, .. } if fixture_id == huge));
    assert!(store.get(huge).unwrap().is_none());
    assert!(store.future_records(now()).unwrap().is_empty());
}
