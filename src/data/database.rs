//! SQLite storage for teams, contests, snapshots and predictions

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;

use crate::data::snapshot::{ContestantSnapshot, PointInTimeLookup, SnapshotLog};
use crate::{
    Contest, ContestId, ContestKey, ForecastError, Outcome, PredictionRecord, Result, Team, TeamId,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

const CONTEST_COLUMNS: &str =
    "id, date, COALESCE(seq, id), home_team_id, away_team_id, home_score, away_score";

const SNAPSHOT_COLUMNS: &str = "contest_id, team_id, opponent_id, is_home, date, seq, \
     form_before, form_after, rating_before, rating_after, rest_days, back_to_back, \
     outcome, points_scored, points_allowed";

const PREDICTION_COLUMNS: &str = "contest_id, date, home_team_id, away_team_id, ensemble_prob, \
     classifier_prob, rating_prob, point_diff, home_rating, away_rating";

/// Database connection and operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS contests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                seq INTEGER,
                home_team_id INTEGER NOT NULL REFERENCES teams(id),
                away_team_id INTEGER NOT NULL REFERENCES teams(id),
                home_score INTEGER,
                away_score INTEGER,
                UNIQUE(date, home_team_id, away_team_id)
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                contest_id INTEGER NOT NULL REFERENCES contests(id),
                team_id INTEGER NOT NULL REFERENCES teams(id),
                opponent_id INTEGER NOT NULL REFERENCES teams(id),
                is_home INTEGER NOT NULL,
                date TEXT NOT NULL,
                seq INTEGER NOT NULL,
                form_before TEXT NOT NULL,
                form_after TEXT NOT NULL,
                rating_before REAL NOT NULL,
                rating_after REAL NOT NULL,
                rest_days INTEGER,
                back_to_back INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                points_scored INTEGER NOT NULL,
                points_allowed INTEGER NOT NULL,
                PRIMARY KEY (contest_id, team_id)
            );

            CREATE TABLE IF NOT EXISTS predictions (
                contest_id INTEGER PRIMARY KEY REFERENCES contests(id),
                date TEXT NOT NULL,
                home_team_id INTEGER NOT NULL REFERENCES teams(id),
                away_team_id INTEGER NOT NULL REFERENCES teams(id),
                ensemble_prob REAL NOT NULL,
                classifier_prob REAL NOT NULL,
                rating_prob REAL NOT NULL,
                point_diff REAL NOT NULL,
                home_rating REAL NOT NULL,
                away_rating REAL NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_contests_date ON contests(date, seq);
            CREATE INDEX IF NOT EXISTS idx_snapshots_team_key ON snapshots(team_id, date, seq);
            CREATE INDEX IF NOT EXISTS idx_predictions_date ON predictions(date);
            "#,
        )?;
        Ok(())
    }

    // ==================== Team Operations ====================

    /// Get or create a team by name
    pub fn get_or_create_team(&self, name: &str) -> Result<Team> {
        if let Some(team) = self.find_team_by_name(name)? {
            return Ok(team);
        }

        self.conn
            .execute("INSERT INTO teams (name) VALUES (?1)", params![name])?;

        Ok(Team {
            id: TeamId(self.conn.last_insert_rowid()),
            name: name.to_string(),
        })
    }

    /// Find a team by name (case-insensitive)
    pub fn find_team_by_name(&self, name: &str) -> Result<Option<Team>> {
        let team = self
            .conn
            .query_row(
                "SELECT id, name FROM teams WHERE LOWER(name) = ?1",
                params![name.to_lowercase()],
                Self::row_to_team,
            )
            .optional()?;
        Ok(team)
    }

    /// Find a team by name, failing when it does not exist
    pub fn require_team(&self, name: &str) -> Result<Team> {
        self.find_team_by_name(name)?
            .ok_or_else(|| ForecastError::UnknownTeam(name.to_string()))
    }

    pub fn get_team(&self, id: TeamId) -> Result<Team> {
        self.conn
            .query_row(
                "SELECT id, name FROM teams WHERE id = ?1",
                params![id.0],
                Self::row_to_team,
            )
            .optional()?
            .ok_or_else(|| ForecastError::UnknownTeam(id.to_string()))
    }

    pub fn get_all_teams(&self) -> Result<Vec<Team>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM teams ORDER BY name")?;
        let teams = stmt
            .query_map([], Self::row_to_team)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(teams)
    }

    fn row_to_team(row: &rusqlite::Row) -> rusqlite::Result<Team> {
        Ok(Team {
            id: TeamId(row.get(0)?),
            name: row.get(1)?,
        })
    }

    // ==================== Contest Operations ====================

    /// Insert or update a contest with a known id
    ///
    /// Existing scores are kept when the incoming contest has none.
    pub fn upsert_contest(&self, contest: &Contest) -> Result<()> {
        check_contest(contest)?;
        self.conn.execute(
            r#"
            INSERT INTO contests (id, date, seq, home_team_id, away_team_id, home_score, away_score)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                date = excluded.date,
                seq = excluded.seq,
                home_team_id = excluded.home_team_id,
                away_team_id = excluded.away_team_id,
                home_score = COALESCE(excluded.home_score, home_score),
                away_score = COALESCE(excluded.away_score, away_score)
            "#,
            params![
                contest.id.0,
                contest.date.format(DATE_FORMAT).to_string(),
                contest.seq,
                contest.home.0,
                contest.away.0,
                contest.home_score,
                contest.away_score,
            ],
        )?;
        Ok(())
    }

    /// Insert a contest identified by date and teams, assigning a new id
    ///
    /// Re-importing the same fixture updates its scores and keeps its id.
    pub fn insert_contest(
        &self,
        date: NaiveDate,
        home: TeamId,
        away: TeamId,
        home_score: Option<u32>,
        away_score: Option<u32>,
    ) -> Result<Contest> {
        let probe = Contest {
            id: ContestId(0),
            date,
            seq: 0,
            home,
            away,
            home_score,
            away_score,
        };
        check_contest(&probe)?;

        let date_str = date.format(DATE_FORMAT).to_string();
        self.conn.execute(
            r#"
            INSERT INTO contests (date, home_team_id, away_team_id, home_score, away_score)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(date, home_team_id, away_team_id) DO UPDATE SET
                home_score = COALESCE(excluded.home_score, home_score),
                away_score = COALESCE(excluded.away_score, away_score)
            "#,
            params![date_str, home.0, away.0, home_score, away_score],
        )?;

        let sql = format!(
            "SELECT {CONTEST_COLUMNS} FROM contests
             WHERE date = ?1 AND home_team_id = ?2 AND away_team_id = ?3"
        );
        let contest = self
            .conn
            .query_row(&sql, params![date_str, home.0, away.0], Self::row_to_contest)?;
        Ok(contest)
    }

    /// All contests in key order
    pub fn get_all_contests(&self) -> Result<Vec<Contest>> {
        let sql = format!("SELECT {CONTEST_COLUMNS} FROM contests ORDER BY date, COALESCE(seq, id)");
        let mut stmt = self.conn.prepare(&sql)?;
        let contests = stmt
            .query_map([], Self::row_to_contest)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contests)
    }

    /// Contests without a final score, in key order
    pub fn get_scheduled_contests(&self) -> Result<Vec<Contest>> {
        let sql = format!(
            "SELECT {CONTEST_COLUMNS} FROM contests
             WHERE home_score IS NULL OR away_score IS NULL
             ORDER BY date, COALESCE(seq, id)"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let contests = stmt
            .query_map([], Self::row_to_contest)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contests)
    }

    pub fn get_contest(&self, id: ContestId) -> Result<Contest> {
        let sql = format!("SELECT {CONTEST_COLUMNS} FROM contests WHERE id = ?1");
        self.conn
            .query_row(&sql, params![id.0], Self::row_to_contest)
            .optional()?
            .ok_or(ForecastError::ContestNotFound(id))
    }

    /// Contests in an inclusive date range, in key order
    pub fn get_contests_in_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Contest>> {
        let sql = format!(
            "SELECT {CONTEST_COLUMNS} FROM contests
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date, COALESCE(seq, id)"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let contests = stmt
            .query_map(
                params![
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string()
                ],
                Self::row_to_contest,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(contests)
    }

    fn row_to_contest(row: &rusqlite::Row) -> rusqlite::Result<Contest> {
        let date_str: String = row.get(1)?;
        Ok(Contest {
            id: ContestId(row.get(0)?),
            date: parse_date(1, &date_str)?,
            seq: row.get(2)?,
            home: TeamId(row.get(3)?),
            away: TeamId(row.get(4)?),
            home_score: row.get(5)?,
            away_score: row.get(6)?,
        })
    }

    /// Fix the final score of a contest
    ///
    /// Only the contest row and the outcome fields of its own snapshots change.
    /// Ratings and form of later snapshots stay stale until the next full pass.
    pub fn correct_score(&mut self, id: ContestId, home_score: u32, away_score: u32) -> Result<()> {
        let contest = self.get_contest(id)?;
        let home_outcome = Outcome::from_scores(home_score, away_score);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "UPDATE contests SET home_score = ?1, away_score = ?2 WHERE id = ?3",
            params![home_score, away_score, id.0],
        )?;

        let mut updated = 0;
        for (team, outcome, scored, allowed) in [
            (contest.home, home_outcome, home_score, away_score),
            (contest.away, home_outcome.reversed(), away_score, home_score),
        ] {
            updated += tx.execute(
                "UPDATE snapshots SET outcome = ?1, points_scored = ?2, points_allowed = ?3
                 WHERE contest_id = ?4 AND team_id = ?5",
                params![outcome.code(), scored, allowed, id.0, team.0],
            )?;
        }
        tx.commit()?;

        if updated > 0 {
            log::warn!(
                "Corrected score of contest {} to {}-{}; later snapshots are stale until `compute` runs again",
                id,
                home_score,
                away_score
            );
        } else {
            log::info!("Recorded score of contest {} as {}-{}", id, home_score, away_score);
        }
        Ok(())
    }

    // ==================== Snapshot Operations ====================

    /// Replace every stored snapshot with the contents of a pass
    pub fn replace_snapshots(&mut self, log: &SnapshotLog) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM snapshots", [])?;

        {
            let sql = format!(
                "INSERT INTO snapshots ({SNAPSHOT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            );
            let mut stmt = tx.prepare(&sql)?;
            for s in log.iter() {
                let form_before = serde_json::to_string(&s.form_before)
                    .map_err(|e| ForecastError::Parse(e.to_string()))?;
                let form_after = serde_json::to_string(&s.form_after)
                    .map_err(|e| ForecastError::Parse(e.to_string()))?;
                stmt.execute(params![
                    s.contest_id.0,
                    s.team.0,
                    s.opponent.0,
                    s.is_home,
                    s.date.format(DATE_FORMAT).to_string(),
                    s.seq,
                    form_before,
                    form_after,
                    s.rating_before,
                    s.rating_after,
                    s.rest_days,
                    s.back_to_back,
                    s.outcome.code(),
                    s.points_scored,
                    s.points_allowed,
                ])?;
            }
        }

        tx.commit()?;
        log::info!("Stored {} snapshots", log.len());
        Ok(log.len())
    }

    /// Rebuild the in-memory log from the stored snapshots
    pub fn load_snapshot_log(&self) -> Result<SnapshotLog> {
        let sql = format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY date, seq, is_home DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let snapshots = stmt
            .query_map([], Self::row_to_snapshot)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        SnapshotLog::from_snapshots(snapshots)
    }

    /// A team's snapshots, oldest first
    pub fn snapshots_for_team(&self, team: TeamId) -> Result<Vec<ContestantSnapshot>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE team_id = ?1 ORDER BY date, seq"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let snapshots = stmt
            .query_map(params![team.0], Self::row_to_snapshot)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    /// The snapshots of one contest, home first
    pub fn snapshots_for_contest(&self, contest: ContestId) -> Result<Vec<ContestantSnapshot>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE contest_id = ?1 ORDER BY is_home DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let snapshots = stmt
            .query_map(params![contest.0], Self::row_to_snapshot)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<ContestantSnapshot> {
        let date_str: String = row.get(4)?;
        let form_before: String = row.get(6)?;
        let form_after: String = row.get(7)?;
        let outcome_code: String = row.get(12)?;
        let outcome = Outcome::from_code(&outcome_code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                12,
                Type::Text,
                format!("unknown outcome code {outcome_code:?}").into(),
            )
        })?;

        Ok(ContestantSnapshot {
            contest_id: ContestId(row.get(0)?),
            team: TeamId(row.get(1)?),
            opponent: TeamId(row.get(2)?),
            is_home: row.get(3)?,
            date: parse_date(4, &date_str)?,
            seq: row.get(5)?,
            form_before: parse_json(6, &form_before)?,
            form_after: parse_json(7, &form_after)?,
            rating_before: row.get(8)?,
            rating_after: row.get(9)?,
            rest_days: row.get(10)?,
            back_to_back: row.get(11)?,
            outcome,
            points_scored: row.get(13)?,
            points_allowed: row.get(14)?,
        })
    }

    // ==================== Prediction Operations ====================

    /// Insert or replace the prediction for a contest
    pub fn upsert_prediction(&self, record: &PredictionRecord) -> Result<()> {
        write_prediction(&self.conn, record)
    }

    /// Store a batch of predictions in one transaction
    pub fn upsert_predictions(&mut self, records: &[PredictionRecord]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        for record in records {
            write_prediction(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn get_prediction(&self, contest: ContestId) -> Result<Option<PredictionRecord>> {
        let sql = format!("SELECT {PREDICTION_COLUMNS} FROM predictions WHERE contest_id = ?1");
        let record = self
            .conn
            .query_row(&sql, params![contest.0], Self::row_to_prediction)
            .optional()?;
        Ok(record)
    }

    /// Predictions for contests in an inclusive date range
    pub fn get_predictions_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PredictionRecord>> {
        let sql = format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date, contest_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string()
                ],
                Self::row_to_prediction,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn row_to_prediction(row: &rusqlite::Row) -> rusqlite::Result<PredictionRecord> {
        let date_str: String = row.get(1)?;
        Ok(PredictionRecord {
            contest_id: ContestId(row.get(0)?),
            date: parse_date(1, &date_str)?,
            home: TeamId(row.get(2)?),
            away: TeamId(row.get(3)?),
            ensemble_prob: row.get(4)?,
            classifier_prob: row.get(5)?,
            rating_prob: row.get(6)?,
            point_diff: row.get(7)?,
            home_rating: row.get(8)?,
            away_rating: row.get(9)?,
        })
    }

    // ==================== Statistics ====================

    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        let min_date: Option<String> = self
            .conn
            .query_row("SELECT MIN(date) FROM contests", [], |row| row.get(0))
            .optional()?
            .flatten();

        let max_date: Option<String> = self
            .conn
            .query_row("SELECT MAX(date) FROM contests", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(DatabaseStats {
            team_count: count("SELECT COUNT(*) FROM teams")?,
            contest_count: count("SELECT COUNT(*) FROM contests")?,
            completed_count: count(
                "SELECT COUNT(*) FROM contests WHERE home_score IS NOT NULL AND away_score IS NOT NULL",
            )?,
            snapshot_count: count("SELECT COUNT(*) FROM snapshots")?,
            prediction_count: count("SELECT COUNT(*) FROM predictions")?,
            earliest_contest: min_date.and_then(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).ok()),
            latest_contest: max_date.and_then(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).ok()),
        })
    }
}

impl PointInTimeLookup for Database {
    fn latest_snapshot_before(
        &self,
        team: TeamId,
        key: ContestKey,
    ) -> Result<Option<ContestantSnapshot>> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
             WHERE team_id = ?1 AND (date < ?2 OR (date = ?2 AND seq < ?3))
             ORDER BY date DESC, seq DESC
             LIMIT 1"
        );
        let snapshot = self
            .conn
            .query_row(
                &sql,
                params![team.0, key.date.format(DATE_FORMAT).to_string(), key.seq],
                Self::row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }
}

fn write_prediction(conn: &Connection, record: &PredictionRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO predictions (contest_id, date, home_team_id, away_team_id, ensemble_prob,
                                 classifier_prob, rating_prob, point_diff, home_rating, away_rating)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(contest_id) DO UPDATE SET
            date = excluded.date,
            home_team_id = excluded.home_team_id,
            away_team_id = excluded.away_team_id,
            ensemble_prob = excluded.ensemble_prob,
            classifier_prob = excluded.classifier_prob,
            rating_prob = excluded.rating_prob,
            point_diff = excluded.point_diff,
            home_rating = excluded.home_rating,
            away_rating = excluded.away_rating,
            updated_at = datetime('now')
        "#,
        params![
            record.contest_id.0,
            record.date.format(DATE_FORMAT).to_string(),
            record.home.0,
            record.away.0,
            record.ensemble_prob,
            record.classifier_prob,
            record.rating_prob,
            record.point_diff,
            record.home_rating,
            record.away_rating,
        ],
    )?;
    Ok(())
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub team_count: usize,
    pub contest_count: usize,
    pub completed_count: usize,
    pub snapshot_count: usize,
    pub prediction_count: usize,
    pub earliest_contest: Option<NaiveDate>,
    pub latest_contest: Option<NaiveDate>,
}

fn check_contest(contest: &Contest) -> Result<()> {
    if contest.home == contest.away {
        return Err(ForecastError::InvalidContest {
            contest: contest.id,
            reason: format!("team {} cannot play itself", contest.home),
        });
    }
    if contest.home_score.is_some() != contest.away_score.is_some() {
        return Err(ForecastError::InvalidContest {
            contest: contest.id,
            reason: "only one side has a score".to_string(),
        });
    }
    Ok(())
}

fn parse_date(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
