//! Walk-forward game prediction
//!
//! Builds leakage-free, point-in-time team snapshots (form, Elo rating, rest)
//! from a chronological stream of contests and blends a trained classifier
//! with the rating-only probability into one prediction per contest.

pub mod data;
pub mod features;
pub mod model;
pub mod predict;
pub mod training;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Unique identifier for a team
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TeamId(pub i64);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Team({})", self.0)
    }
}

/// Unique identifier for a contest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContestId(pub i64);

impl fmt::Display for ContestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Contest({})", self.0)
    }
}

/// Chronological position of a contest: date first, then the stable tie-break sequence.
///
/// Every "strictly before" comparison in the crate goes through this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContestKey {
    pub date: NaiveDate,
    pub seq: i64,
}

impl fmt::Display for ContestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.date, self.seq)
    }
}

/// A team
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}

/// Result of a contest from one side's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

impl Outcome {
    /// Outcome for a side that scored `scored` and allowed `allowed`
    pub fn from_scores(scored: u32, allowed: u32) -> Self {
        match scored.cmp(&allowed) {
            std::cmp::Ordering::Greater => Outcome::Win,
            std::cmp::Ordering::Less => Outcome::Loss,
            std::cmp::Ordering::Equal => Outcome::Draw,
        }
    }

    /// Actual score used by the rating update (1, 0.5, 0)
    pub fn actual_score(&self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Draw => 0.5,
            Outcome::Loss => 0.0,
        }
    }

    /// The same result seen from the other side
    pub fn reversed(&self) -> Self {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Loss => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Outcome::Win => "W",
            Outcome::Loss => "L",
            Outcome::Draw => "D",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "W" => Some(Outcome::Win),
            "L" => Some(Outcome::Loss),
            "D" => Some(Outcome::Draw),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Final score of a completed contest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContestResult {
    pub home_score: u32,
    pub away_score: u32,
}

impl ContestResult {
    pub fn home_outcome(&self) -> Outcome {
        Outcome::from_scores(self.home_score, self.away_score)
    }

    /// Point differential (positive = home win)
    pub fn margin(&self) -> i64 {
        self.home_score as i64 - self.away_score as i64
    }
}

/// A single scheduled or completed contest
///
/// Scores are `None` until the contest is final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contest {
    pub id: ContestId,
    pub date: NaiveDate,
    /// Stable tie-break key for contests on the same date
    pub seq: i64,
    pub home: TeamId,
    pub away: TeamId,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
}

impl Contest {
    /// Scheduled contest whose tie-break key is its id
    pub fn scheduled(id: i64, date: NaiveDate, home: TeamId, away: TeamId) -> Self {
        Contest {
            id: ContestId(id),
            date,
            seq: id,
            home,
            away,
            home_score: None,
            away_score: None,
        }
    }

    /// Completed contest whose tie-break key is its id
    pub fn completed(
        id: i64,
        date: NaiveDate,
        home: TeamId,
        away: TeamId,
        home_score: u32,
        away_score: u32,
    ) -> Self {
        Contest {
            home_score: Some(home_score),
            away_score: Some(away_score),
            ..Self::scheduled(id, date, home, away)
        }
    }

    pub fn key(&self) -> ContestKey {
        ContestKey {
            date: self.date,
            seq: self.seq,
        }
    }

    /// Final score, if both sides have one
    pub fn result(&self) -> Option<ContestResult> {
        match (self.home_score, self.away_score) {
            (Some(home_score), Some(away_score)) => Some(ContestResult {
                home_score,
                away_score,
            }),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.result().is_some()
    }

    /// Check if the given team plays in this contest
    pub fn involves(&self, team: TeamId) -> bool {
        self.home == team || self.away == team
    }

    /// Get the opponent for a given team
    pub fn opponent(&self, team: TeamId) -> Option<TeamId> {
        if team == self.home {
            Some(self.away)
        } else if team == self.away {
            Some(self.home)
        } else {
            None
        }
    }
}

/// Ensemble prediction for one contest
///
/// Holds no wall-clock data so that two generations for the same contest
/// compare equal field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub contest_id: ContestId,
    pub date: NaiveDate,
    pub home: TeamId,
    pub away: TeamId,
    /// Blended P(home wins)
    pub ensemble_prob: f64,
    /// P(home wins) from the trained classifier alone
    pub classifier_prob: f64,
    /// P(home wins) from pre-contest Elo ratings alone
    pub rating_prob: f64,
    /// Predicted home minus away points
    pub point_diff: f64,
    pub home_rating: f64,
    pub away_rating: f64,
}

impl PredictionRecord {
    /// Get the predicted winner (side with >= 50% ensemble probability)
    pub fn predicted_winner(&self) -> TeamId {
        if self.ensemble_prob >= 0.5 {
            self.home
        } else {
            self.away
        }
    }

    /// Win probability for a specific team, if it plays
    pub fn win_prob_for(&self, team: TeamId) -> Option<f64> {
        if team == self.home {
            Some(self.ensemble_prob)
        } else if team == self.away {
            Some(1.0 - self.ensemble_prob)
        } else {
            None
        }
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Contests out of chronological order: {found} does not come after {previous}")]
    OrderingViolation { previous: String, found: String },

    #[error("Invalid contest {contest}: {reason}")]
    InvalidContest { contest: ContestId, reason: String },

    #[error("Training of the {model} failed: {reason}")]
    TrainingFailed { model: String, reason: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Feature layout mismatch: expected {expected}, found {found}")]
    FeatureMismatch { expected: String, found: String },

    #[error("Contest not found: {0}")]
    ContestNotFound(ContestId),

    #[error("Unknown team: {0}")]
    UnknownTeam(String),

    #[error("Model not trained - run `hoopcast train` first")]
    NoModel,

    #[error("Model error: {0}")]
    Model(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ForecastError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub rating: RatingConfig,
    pub form: FormConfig,
    pub ensemble: EnsembleConfig,
    pub training: TrainingConfig,
    pub projection: ProjectionConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingConfig {
    /// How much ratings move per contest
    pub k_factor: f64,
    /// Starting rating for teams without history
    pub initial_rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormConfig {
    /// Rolling window sizes, in prior contests
    pub windows: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub model_weight: f64,
    pub rating_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub margin_learning_rate: f64,
    /// First date of the held-out set; everything earlier is training data
    pub train_cutoff: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    pub simulations: usize,
    pub seed: u64,
    pub momentum_window: usize,
    pub momentum_boost: f64,
    pub min_prob: f64,
    pub max_prob: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub database_path: String,
    pub model_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rating: RatingConfig {
                k_factor: 32.0,
                initial_rating: 1500.0,
            },
            form: FormConfig {
                windows: vec![5, 10, 20],
            },
            ensemble: EnsembleConfig {
                model_weight: 0.7,
                rating_weight: 0.3,
            },
            training: TrainingConfig {
                epochs: 400,
                learning_rate: 0.1,
                margin_learning_rate: 0.05,
                train_cutoff: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            },
            projection: ProjectionConfig {
                simulations: 10_000,
                seed: 42,
                momentum_window: 5,
                momentum_boost: 0.02,
                min_prob: 0.05,
                max_prob: 0.95,
            },
            data: DataConfig {
                database_path: "data/hoopcast.db".to_string(),
                model_path: "model/hoopcast".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ForecastError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ForecastError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ForecastError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the settings that would otherwise produce silently wrong numbers
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.rating.k_factor <= 0.0 {
            errors.push("rating.k_factor must be > 0".to_string());
        }
        if self.rating.initial_rating <= 0.0 {
            errors.push("rating.initial_rating must be > 0".to_string());
        }
        if self.form.windows.is_empty() {
            errors.push("form.windows must not be empty".to_string());
        }
        if self.form.windows.iter().any(|w| *w == 0) {
            errors.push("form.windows must all be >= 1".to_string());
        }
        let weights_sum = self.ensemble.model_weight + self.ensemble.rating_weight;
        if (weights_sum - 1.0).abs() > 1e-3 {
            errors.push(format!("ensemble weights must sum to 1.0, got {}", weights_sum));
        }
        if self.ensemble.model_weight < 0.0 || self.ensemble.rating_weight < 0.0 {
            errors.push("ensemble weights must be non-negative".to_string());
        }
        if self.training.epochs == 0 {
            errors.push("training.epochs must be >= 1".to_string());
        }
        if self.training.learning_rate <= 0.0 || self.training.margin_learning_rate <= 0.0 {
            errors.push("training learning rates must be > 0".to_string());
        }
        if self.projection.simulations == 0 {
            errors.push("projection.simulations must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.projection.min_prob)
            || !(0.0..=1.0).contains(&self.projection.max_prob)
            || self.projection.min_prob > self.projection.max_prob
        {
            errors.push("projection probability bounds must satisfy 0 <= min <= max <= 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ForecastError::Config(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_contest_key_orders_by_date_then_seq() {
        let a = Contest::scheduled(11, date(2024, 1, 1), TeamId(1), TeamId(2));
        let b = Contest::scheduled(10, date(2024, 1, 2), TeamId(1), TeamId(2));
        let c = Contest::scheduled(12, date(2024, 1, 1), TeamId(1), TeamId(2));
        assert!(a.key() < b.key());
        assert!(a.key() < c.key());
        assert!(c.key() < b.key());
    }

    #[test]
    fn test_contest_result() {
        let scheduled = Contest::scheduled(1, date(2024, 1, 1), TeamId(1), TeamId(2));
        assert!(scheduled.result().is_none());

        let played = Contest::completed(1, date(2024, 1, 1), TeamId(1), TeamId(2), 101, 99);
        let result = played.result().unwrap();
        assert_eq!(result.home_outcome(), Outcome::Win);
        assert_eq!(result.margin(), 2);
        assert_eq!(played.opponent(TeamId(2)), Some(TeamId(1)));
        assert_eq!(played.opponent(TeamId(3)), None);
    }

    #[test]
    fn test_half_scored_contest_is_not_completed() {
        let mut contest = Contest::scheduled(1, date(2024, 1, 1), TeamId(1), TeamId(2));
        contest.home_score = Some(100);
        assert!(!contest.is_completed());
    }

    #[test]
    fn test_outcome_scores() {
        assert_eq!(Outcome::Win.actual_score(), 1.0);
        assert_eq!(Outcome::Draw.actual_score(), 0.5);
        assert_eq!(Outcome::Loss.actual_score(), 0.0);
        assert_eq!(Outcome::Win.reversed(), Outcome::Loss);
        assert_eq!(Outcome::from_code("D"), Some(Outcome::Draw));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_weights() {
        let mut config = Config::default();
        config.ensemble.model_weight = 0.8;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.form.windows, vec![5, 10, 20]);
        assert_eq!(parsed.training.train_cutoff, config.training.train_cutoff);
    }
}
