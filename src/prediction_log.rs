use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::outcome::PerformanceFields;
use crate::ranking::RankingDecision;
use crate::record::RecommendationRecord;
use crate::store::{
    PredictionStore, RefreshSummary, UpsertOutcome, claim_refresh_slot, performance_matches,
};

const SELECT_COLUMNS: &str = r#"
    fixture_id, home_team, away_team, league, league_id, kickoff,
    market_type, home_form, away_form,
    predicted_outcome, confidence, probability_home, probability_draw, probability_away,
    odds_home, odds_draw, odds_away, bookmaker, expected_value,
    model_count, consensus, variance, ensemble_strategy, recommendation_score,
    is_recommended, prediction_logged_at,
    actual_outcome, actual_score_home, actual_score_away, match_status,
    result_logged_at, was_correct, profit_loss_10, roi_percent
"#;

/// `EDGE_DB_PATH`, falling back to `data/prediction_log.sqlite`.
pub fn default_db_path() -> PathBuf {
    env::var("EDGE_DB_PATH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data").join("prediction_log.sqlite"))
}

/// SQLite-backed prediction log.
pub struct SqlitePredictionStore {
    conn: Mutex<Connection>,
    refresh_slot: Mutex<()>,
}

impl SqlitePredictionStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            refresh_slot: Mutex::new(()),
        })
    }

    /// Claims the refresh slot without waiting.
    pub fn refresh_slot(&self) -> Result<MutexGuard<'_, ()>> {
        claim_refresh_slot(&self.refresh_slot)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_records(&self, filter: &str, now: Option<&str>) -> Result<Vec<RecommendationRecord>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM prediction_log WHERE {filter} \
             ORDER BY kickoff ASC, fixture_id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = match now {
            Some(now) => stmt.query_map(params![now], record_from_row)?,
            None => stmt.query_map([], record_from_row)?,
        };
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS prediction_log (
            fixture_id INTEGER PRIMARY KEY,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            league TEXT NOT NULL,
            league_id INTEGER NULL,
            kickoff TEXT NOT NULL,
            market_type TEXT NULL,
            home_form TEXT NULL,
            away_form TEXT NULL,
            predicted_outcome TEXT NOT NULL,
            confidence REAL NOT NULL,
            probability_home REAL NOT NULL,
            probability_draw REAL NOT NULL,
            probability_away REAL NOT NULL,
            odds_home REAL NULL,
            odds_draw REAL NULL,
            odds_away REAL NULL,
            bookmaker TEXT NULL,
            expected_value REAL NULL,
            model_count INTEGER NULL,
            consensus REAL NULL,
            variance REAL NULL,
            ensemble_strategy TEXT NULL,
            recommendation_score REAL NULL,
            is_recommended INTEGER NOT NULL DEFAULT 0,
            prediction_logged_at TEXT NOT NULL,
            actual_outcome TEXT NULL,
            actual_score_home INTEGER NULL,
            actual_score_away INTEGER NULL,
            match_status TEXT NULL,
            result_logged_at TEXT NULL,
            was_correct INTEGER NULL,
            profit_loss_10 REAL NULL,
            roi_percent REAL NULL
        );
        CREATE INDEX IF NOT EXISTS idx_prediction_log_kickoff ON prediction_log(kickoff);
        CREATE INDEX IF NOT EXISTS idx_prediction_log_recommended ON prediction_log(is_recommended);
        CREATE INDEX IF NOT EXISTS idx_prediction_log_outcome ON prediction_log(actual_outcome);

        CREATE TABLE IF NOT EXISTS refresh_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            refreshed_at TEXT NOT NULL,
            marked INTEGER NOT NULL,
            unmarked INTEGER NOT NULL,
            skipped INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}

impl PredictionStore for SqlitePredictionStore {
    fn upsert_prediction(
        &self,
        record: &RecommendationRecord,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        let id = sql_id(record.fixture_id)?;
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                "SELECT kickoff, actual_outcome IS NOT NULL FROM prediction_log \
                 WHERE fixture_id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;

        let outcome = match existing {
            Some((kickoff, completed)) => {
                if completed || kickoff <= fmt_ts(now) {
                    debug!(fixture_id = record.fixture_id, "prediction frozen, upsert ignored");
                    return Ok(UpsertOutcome::Frozen);
                }
                update_prediction(&tx, record)?;
                UpsertOutcome::Updated
            }
            None => {
                insert_prediction(&tx, record)?;
                UpsertOutcome::Created
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn get(&self, fixture_id: u64) -> Result<Option<RecommendationRecord>> {
        let Ok(id) = i64::try_from(fixture_id) else {
            return Ok(None);
        };
        let conn = self.lock();
        let sql = format!("SELECT {SELECT_COLUMNS} FROM prediction_log WHERE fixture_id = ?1");
        let record = conn
            .query_row(&sql, params![id], record_from_row)
            .optional()?;
        Ok(record)
    }

    fn future_records(&self, now: DateTime<Utc>) -> Result<Vec<RecommendationRecord>> {
        self.query_records("kickoff > ?1", Some(&fmt_ts(now)))
    }

    fn recommended_records(&self) -> Result<Vec<RecommendationRecord>> {
        self.query_records("is_recommended = 1", None)
    }

    fn completed_records(&self) -> Result<Vec<RecommendationRecord>> {
        self.query_records("actual_outcome IS NOT NULL", None)
    }

    fn apply_ranking(
        &self,
        decision: &RankingDecision,
        now: DateTime<Utc>,
    ) -> Result<RefreshSummary> {
        let _slot = self.refresh_slot()?;
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(busy_as_race)?;
        let now_s = fmt_ts(now);
        let mut summary = RefreshSummary::default();

        let previously: Vec<u64> = {
            let mut stmt = tx.prepare(
                "SELECT fixture_id FROM prediction_log WHERE is_recommended = 1 AND kickoff > ?1",
            )?;
            let rows = stmt.query_map(params![now_s], |row| row.get::<_, u64>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        summary.unmarked = previously
            .iter()
            .filter(|id| !decision.is_selected(**id))
            .count();

        tx.execute(
            "UPDATE prediction_log SET is_recommended = 0 WHERE kickoff > ?1",
            params![now_s],
        )?;
        for candidate in &decision.ranked {
            tx.execute(
                "UPDATE prediction_log SET recommendation_score = ?2 \
                 WHERE fixture_id = ?1 AND kickoff > ?3",
                params![sql_id(candidate.fixture_id)?, candidate.score.final_score, now_s],
            )?;
        }
        for fixture_id in &decision.selected {
            let changed = tx.execute(
                "UPDATE prediction_log SET is_recommended = 1
                 WHERE fixture_id = ?1 AND kickoff > ?2 AND actual_outcome IS NULL",
                params![sql_id(*fixture_id)?, now_s],
            )?;
            if changed == 1 {
                summary.marked += 1;
            } else {
                summary.skipped += 1;
            }
        }

        tx.execute(
            "INSERT INTO refresh_runs (refreshed_at, marked, unmarked, skipped) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                now_s,
                summary.marked as i64,
                summary.unmarked as i64,
                summary.skipped as i64
            ],
        )?;
        summary.generation = tx.last_insert_rowid() as u64;
        tx.commit().map_err(busy_as_race)?;

        info!(
            generation = summary.generation,
            unmarked = summary.unmarked,
            marked = summary.marked,
            skipped = summary.skipped,
            "recommendations refreshed"
        );
        Ok(summary)
    }

    fn store_performance(
        &self,
        fixture_id: u64,
        perf: &PerformanceFields,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(record) = self.get(fixture_id)? else {
            return Err(EngineError::UnknownFixture(fixture_id));
        };
        if performance_matches(&record, perf) {
            return Ok(false);
        }
        let conn = self.lock();
        conn.execute(
            r#"
            UPDATE prediction_log SET
                actual_outcome = ?2,
                actual_score_home = ?3,
                actual_score_away = ?4,
                match_status = ?5,
                was_correct = ?6,
                profit_loss_10 = ?7,
                roi_percent = ?8,
                result_logged_at = COALESCE(result_logged_at, ?9)
            WHERE fixture_id = ?1
            "#,
            params![
                sql_id(fixture_id)?,
                perf.actual_outcome.as_str(),
                perf.score_home,
                perf.score_away,
                perf.match_status.as_str(),
                perf.was_correct,
                perf.profit_loss,
                perf.roi_percent,
                fmt_ts(now),
            ],
        )?;
        Ok(true)
    }
}

fn insert_prediction(tx: &rusqlite::Transaction<'_>, r: &RecommendationRecord) -> Result<()> {
    tx.execute(
        r#"
        INSERT INTO prediction_log (
            fixture_id, home_team, away_team, league, league_id, kickoff,
            market_type, home_form, away_form,
            predicted_outcome, confidence, probability_home, probability_draw, probability_away,
            odds_home, odds_draw, odds_away, bookmaker, expected_value,
            model_count, consensus, variance, ensemble_strategy, recommendation_score,
            is_recommended, prediction_logged_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9,
            ?10, ?11, ?12, ?13, ?14,
            ?15, ?16, ?17, ?18, ?19,
            ?20, ?21, ?22, ?23, ?24,
            0, ?25
        )
        "#,
        params![
            sql_id(r.fixture_id)?,
            r.home_team,
            r.away_team,
            r.league,
            r.league_id,
            fmt_ts(r.kickoff),
            r.market_type,
            r.home_form,
            r.away_form,
            r.predicted_outcome.as_str(),
            r.confidence,
            r.probability_home,
            r.probability_draw,
            r.probability_away,
            r.odds_home,
            r.odds_draw,
            r.odds_away,
            r.bookmaker,
            r.expected_value,
            r.model_count,
            r.consensus,
            r.variance,
            r.ensemble_strategy,
            r.recommendation_score,
            fmt_ts(r.prediction_logged_at),
        ],
    )?;
    Ok(())
}

fn update_prediction(tx: &rusqlite::Transaction<'_>, r: &RecommendationRecord) -> Result<()> {
    tx.execute(
        r#"
        UPDATE prediction_log SET
            home_team = ?2, away_team = ?3, league = ?4, league_id = ?5, kickoff = ?6,
            market_type = ?7, home_form = ?8, away_form = ?9,
            predicted_outcome = ?10, confidence = ?11,
            probability_home = ?12, probability_draw = ?13, probability_away = ?14,
            odds_home = ?15, odds_draw = ?16, odds_away = ?17, bookmaker = ?18,
            expected_value = ?19, model_count = ?20, consensus = ?21, variance = ?22,
            ensemble_strategy = ?23, prediction_logged_at = ?24
        WHERE fixture_id = ?1
        "#,
        params![
            sql_id(r.fixture_id)?,
            r.home_team,
            r.away_team,
            r.league,
            r.league_id,
            fmt_ts(r.kickoff),
            r.market_type,
            r.home_form,
            r.away_form,
            r.predicted_outcome.as_str(),
            r.confidence,
            r.probability_home,
            r.probability_draw,
            r.probability_away,
            r.odds_home,
            r.odds_draw,
            r.odds_away,
            r.bookmaker,
            r.expected_value,
            r.model_count,
            r.consensus,
            r.variance,
            r.ensemble_strategy,
            fmt_ts(r.prediction_logged_at),
        ],
    )?;
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RecommendationRecord> {
    Ok(RecommendationRecord {
        fixture_id: row.get::<_, u64>(0)?,
        home_team: row.get(1)?,
        away_team: row.get(2)?,
        league: row.get(3)?,
        league_id: row.get(4)?,
        kickoff: parse_ts(row, 5)?,
        market_type: row.get(6)?,
        home_form: row.get(7)?,
        away_form: row.get(8)?,
        predicted_outcome: parse_text(row, 9)?,
        confidence: row.get(10)?,
        probability_home: row.get(11)?,
        probability_draw: row.get(12)?,
        probability_away: row.get(13)?,
        odds_home: row.get(14)?,
        odds_draw: row.get(15)?,
        odds_away: row.get(16)?,
        bookmaker: row.get(17)?,
        expected_value: row.get(18)?,
        model_count: row.get(19)?,
        consensus: row.get(20)?,
        variance: row.get(21)?,
        ensemble_strategy: row.get(22)?,
        recommendation_score: row.get(23)?,
        is_recommended: row.get::<_, i64>(24)? != 0,
        prediction_logged_at: parse_ts(row, 25)?,
        actual_outcome: parse_opt_text(row, 26)?,
        actual_score_home: row.get(27)?,
        actual_score_away: row.get(28)?,
        match_status: parse_opt_text(row, 29)?,
        result_logged_at: parse_opt_ts(row, 30)?,
        was_correct: row.get::<_, Option<i64>>(31)?.map(|v| v != 0),
        profit_loss_10: row.get(32)?,
        roi_percent: row.get(33)?,
    })
}

/// SQLite integers are signed; ids past `i64::MAX` cannot round-trip.
fn sql_id(fixture_id: u64) -> Result<i64> {
    i64::try_from(fixture_id)
        .map_err(|_| EngineError::invalid_input(fixture_id, "fixture id exceeds SQLite range"))
}

/// Second precision with a `Z` suffix, so stored timestamps order as text.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => parse_ts(row, idx).map(Some),
        None => Ok(None),
    }
}

fn parse_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|msg| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into()))
}

fn parse_opt_text<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => parse_text(row, idx).map(Some),
        None => Ok(None),
    }
}

fn busy_as_race(err: rusqlite::Error) -> EngineError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::DatabaseBusy => {
            EngineError::StaleRefreshRace
        }
        _ => EngineError::Storage(err),
    }
}
