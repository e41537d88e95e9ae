//! Elo rating system for team strength estimation
//!
//! The ledger holds one rating per team and is only valid inside a single
//! chronological pass. It rejects reads and writes that would move backwards.

use std::collections::{HashMap, HashSet};

use crate::{ContestKey, ForecastError, Outcome, RatingConfig, Result, TeamId};

/// Expected score (0-1) of a side rated `rating` against `opponent_rating`
pub fn expected_score(rating: f64, opponent_rating: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((opponent_rating - rating) / 400.0))
}

/// Rating-only probability that the home side wins
pub fn rating_probability(home_rating: f64, away_rating: f64) -> f64 {
    expected_score(home_rating, away_rating)
}

/// Mutable per-team ratings for one walk-forward pass
pub struct RatingLedger {
    ratings: HashMap<TeamId, f64>,
    config: RatingConfig,
    /// Key of the most recent contest whose result has been applied
    applied: Option<ContestKey>,
    /// Teams already updated at `applied`
    applied_teams: HashSet<TeamId>,
}

impl RatingLedger {
    pub fn new(config: RatingConfig) -> Self {
        RatingLedger {
            ratings: HashMap::new(),
            config,
            applied: None,
            applied_teams: HashSet::new(),
        }
    }

    /// Rating going into the contest at `key` (initial rating if unknown)
    ///
    /// Reading at or before a contest that has already been applied would mix
    /// that contest's result into its own inputs, so it is refused.
    pub fn rating_before(&self, team: TeamId, key: ContestKey) -> Result<f64> {
        if let Some(applied) = self.applied {
            if key <= applied {
                return Err(ForecastError::OrderingViolation {
                    previous: applied.to_string(),
                    found: key.to_string(),
                });
            }
        }
        Ok(self.current(team))
    }

    /// Update a team's rating with its result in the contest at `key`
    ///
    /// `opponent_rating` must be the opponent's rating before the contest.
    /// Returns the rating after the contest.
    pub fn apply_result(
        &mut self,
        team: TeamId,
        key: ContestKey,
        opponent_rating: f64,
        outcome: Outcome,
    ) -> Result<f64> {
        match self.applied {
            Some(applied) if key < applied => {
                return Err(ForecastError::OrderingViolation {
                    previous: applied.to_string(),
                    found: key.to_string(),
                });
            }
            Some(applied) if key == applied => {
                if self.applied_teams.contains(&team) {
                    return Err(ForecastError::OrderingViolation {
                        previous: format!("{} already applied for {}", applied, team),
                        found: key.to_string(),
                    });
                }
            }
            _ => self.applied_teams.clear(),
        }

        let rating = self.current(team);
        let expected = expected_score(rating, opponent_rating);
        let updated = rating + self.config.k_factor * (outcome.actual_score() - expected);

        self.ratings.insert(team, updated);
        self.applied = Some(key);
        self.applied_teams.insert(team);
        Ok(updated)
    }

    fn current(&self, team: TeamId) -> f64 {
        *self
            .ratings
            .get(&team)
            .unwrap_or(&self.config.initial_rating)
    }

    /// Number of teams with at least one applied result
    pub fn team_count(&self) -> usize {
        self.ratings.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn key(day: u32, seq: i64) -> ContestKey {
        ContestKey {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            seq,
        }
    }

    fn ledger() -> RatingLedger {
        RatingLedger::new(RatingConfig {
            k_factor: 32.0,
            initial_rating: 1500.0,
        })
    }

    #[test]
    fn test_initial_ratings() {
        let elo = ledger();
        assert_eq!(elo.rating_before(TeamId(1), key(1, 1)).unwrap(), 1500.0);
        assert_eq!(elo.rating_before(TeamId(999), key(1, 1)).unwrap(), 1500.0);
    }

    #[test]
    fn test_equal_ratings_give_even_odds() {
        assert_eq!(rating_probability(1500.0, 1500.0), 0.5);
    }

    #[test]
    fn test_400_point_edge() {
        let p = rating_probability(1900.0, 1500.0);
        assert!((p - 10.0 / 11.0).abs() < 1e-12);
        let q = rating_probability(1500.0, 1900.0);
        assert!((p + q - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_even_loss_costs_half_k() {
        let mut elo = ledger();
        let k = key(1, 1);
        let home = elo.rating_before(TeamId(1), k).unwrap();
        let away = elo.rating_before(TeamId(2), k).unwrap();

        let home_after = elo.apply_result(TeamId(1), k, away, Outcome::Loss).unwrap();
        let away_after = elo.apply_result(TeamId(2), k, home, Outcome::Win).unwrap();

        assert_eq!(home_after, 1484.0);
        assert_eq!(away_after, 1516.0);
    }

    #[test]
    fn test_draw_between_equals_is_neutral() {
        let mut elo = ledger();
        let after = elo.apply_result(TeamId(1), key(1, 1), 1500.0, Outcome::Draw).unwrap();
        assert_eq!(after, 1500.0);
    }

    #[test]
    fn test_upset_moves_more_than_expected_win() {
        let mut elo = ledger();
        // Team 1 builds a lead
        for day in 1..=5 {
            let k = key(day, day as i64);
            let opp = elo.rating_before(TeamId(2), k).unwrap();
            let own = elo.rating_before(TeamId(1), k).unwrap();
            elo.apply_result(TeamId(1), k, opp, Outcome::Win).unwrap();
            elo.apply_result(TeamId(2), k, own, Outcome::Loss).unwrap();
        }

        let k = key(10, 10);
        let strong = elo.rating_before(TeamId(1), k).unwrap();
        let weak = elo.rating_before(TeamId(2), k).unwrap();
        assert!(strong > weak);

        let weak_after = elo.apply_result(TeamId(2), k, strong, Outcome::Win).unwrap();
        assert!(weak_after - weak > 16.0);
    }

    #[test]
    fn test_read_after_apply_is_refused() {
        let mut elo = ledger();
        elo.apply_result(TeamId(1), key(2, 5), 1500.0, Outcome::Win).unwrap();

        // Same contest: would read its own post-game rating
        assert!(matches!(
            elo.rating_before(TeamId(1), key(2, 5)),
            Err(ForecastError::OrderingViolation { .. })
        ));
        // Earlier contest
        assert!(elo.rating_before(TeamId(1), key(1, 9)).is_err());
        // Later contest is fine
        assert!(elo.rating_before(TeamId(1), key(2, 6)).is_ok());
    }

    #[test]
    fn test_apply_out_of_order_is_refused() {
        let mut elo = ledger();
        elo.apply_result(TeamId(1), key(3, 1), 1500.0, Outcome::Win).unwrap();
        assert!(elo
            .apply_result(TeamId(2), key(2, 1), 1500.0, Outcome::Win)
            .is_err());
    }

    #[test]
    fn test_second_update_in_same_contest_is_refused() {
        let mut elo = ledger();
        let k = key(1, 1);
        elo.apply_result(TeamId(1), k, 1500.0, Outcome::Win).unwrap();
        elo.apply_result(TeamId(2), k, 1500.0, Outcome::Loss).unwrap();

        assert!(matches!(
            elo.apply_result(TeamId(1), k, 1500.0, Outcome::Win),
            Err(ForecastError::OrderingViolation { .. })
        ));
        assert_eq!(elo.rating_before(TeamId(1), key(1, 2)).unwrap(), 1516.0);

        // The next contest starts a fresh set
        assert!(elo.apply_result(TeamId(1), key(1, 2), 1484.0, Outcome::Win).is_ok());
    }
}
