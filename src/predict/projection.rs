//! Monte Carlo season projection
//!
//! Plays out a team's remaining contests many times using the ensemble
//! win probabilities, nudged by a small momentum term.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::{ForecastError, PredictionRecord, ProjectionConfig, Result, TeamId};

/// A contest still to be played and P(home wins) for it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemainingContest {
    pub home: TeamId,
    pub away: TeamId,
    pub home_win_prob: f64,
}

impl From<&PredictionRecord> for RemainingContest {
    fn from(record: &PredictionRecord) -> Self {
        RemainingContest {
            home: record.home,
            away: record.away,
            home_win_prob: record.ensemble_prob,
        }
    }
}

/// Distribution of final win totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionResult {
    pub team: TeamId,
    pub current_wins: u32,
    pub current_losses: u32,
    pub remaining: usize,
    pub mean_wins: f64,
    pub median_wins: u32,
    pub std_dev: f64,
    pub percentile_10: u32,
    pub percentile_90: u32,
    /// Final win totals of every simulation, sorted ascending
    pub distribution: Vec<u32>,
}

pub struct SeasonProjector {
    config: ProjectionConfig,
}

impl SeasonProjector {
    pub fn new(config: ProjectionConfig) -> Self {
        SeasonProjector { config }
    }

    /// Simulate the rest of a team's season
    ///
    /// Contests that do not involve `team` are ignored. Runs are seeded, so the
    /// same inputs always give the same distribution.
    pub fn project(
        &self,
        team: TeamId,
        current_wins: u32,
        current_losses: u32,
        remaining: &[RemainingContest],
    ) -> Result<ProjectionResult> {
        let team_probs = remaining
            .iter()
            .filter_map(|c| {
                if c.home == team {
                    Some(c.home_win_prob)
                } else if c.away == team {
                    Some(1.0 - c.home_win_prob)
                } else {
                    None
                }
            })
            .map(|p| {
                if p.is_finite() && (0.0..=1.0).contains(&p) {
                    Ok(p)
                } else {
                    Err(ForecastError::Model(format!("invalid win probability {}", p)))
                }
            })
            .collect::<Result<Vec<f64>>>()?;

        let simulations = self.config.simulations.max(1);
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut distribution = Vec::with_capacity(simulations);

        for _ in 0..simulations {
            distribution.push(current_wins + self.simulate_once(&team_probs, &mut rng));
        }
        distribution.sort_unstable();

        let n = distribution.len() as f64;
        let mean_wins = distribution.iter().map(|&w| w as f64).sum::<f64>() / n;
        let variance = distribution
            .iter()
            .map(|&w| (w as f64 - mean_wins).powi(2))
            .sum::<f64>()
            / n;
        let at = |q: f64| distribution[((distribution.len() as f64 * q) as usize).min(distribution.len() - 1)];

        let result = ProjectionResult {
            team,
            current_wins,
            current_losses,
            remaining: team_probs.len(),
            mean_wins,
            median_wins: distribution[distribution.len() / 2],
            std_dev: variance.sqrt(),
            percentile_10: at(0.10),
            percentile_90: at(0.90),
            distribution,
        };

        log::debug!(
            "Projected team {} over {} simulations: mean {:.1} wins",
            team,
            simulations,
            result.mean_wins
        );
        Ok(result)
    }

    /// Wins from one run through the remaining contests
    fn simulate_once(&self, probs: &[f64], rng: &mut StdRng) -> u32 {
        let window = self.config.momentum_window;
        let mut recent: VecDeque<bool> = VecDeque::with_capacity(window + 1);
        let mut wins = 0;

        for &p in probs {
            let p = (p + self.momentum(&recent)).clamp(self.config.min_prob, self.config.max_prob);
            let won = rng.gen::<f64>() < p;
            if won {
                wins += 1;
            }
            recent.push_back(won);
            if recent.len() > window {
                recent.pop_front();
            }
        }
        wins
    }

    /// Hot streak (all but one won) boosts, cold streak (at most one won) penalises
    fn momentum(&self, recent: &VecDeque<bool>) -> f64 {
        let window = self.config.momentum_window;
        if window == 0 || recent.len() < window {
            return 0.0;
        }
        let wins = recent.iter().filter(|w| **w).count();
        if wins + 1 >= window {
            self.config.momentum_boost
        } else if wins <= 1 {
            -self.config.momentum_boost
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn projector(simulations: usize) -> SeasonProjector {
        let mut config = Config::default().projection;
        config.simulations = simulations;
        SeasonProjector::new(config)
    }

    fn home_games(team: TeamId, prob: f64, n: usize) -> Vec<RemainingContest> {
        (0..n)
            .map(|i| RemainingContest {
                home: team,
                away: TeamId(100 + i as i64),
                home_win_prob: prob,
            })
            .collect()
    }

    #[test]
    fn test_no_remaining_contests() {
        let result = projector(500).project(TeamId(1), 30, 20, &[]).unwrap();
        assert_eq!(result.mean_wins, 30.0);
        assert_eq!(result.std_dev, 0.0);
        assert_eq!(result.percentile_10, 30);
        assert_eq!(result.percentile_90, 30);
        assert_eq!(result.distribution.len(), 500);
    }

    #[test]
    fn test_probabilities_are_clamped() {
        let games = home_games(TeamId(1), 1.0, 10);
        let result = projector(10_000).project(TeamId(1), 0, 0, &games).unwrap();
        // Capped at 0.95 per contest
        assert!(result.mean_wins > 9.3 && result.mean_wins < 9.7);
        assert!(result.distribution.iter().any(|&w| w < 10));

        let games = home_games(TeamId(1), 0.0, 10);
        let result = projector(10_000).project(TeamId(1), 0, 0, &games).unwrap();
        assert!(result.mean_wins > 0.3 && result.mean_wins < 0.7);
    }

    #[test]
    fn test_away_contests_use_complement() {
        let games: Vec<_> = (0..20)
            .map(|i| RemainingContest {
                home: TeamId(50 + i),
                away: TeamId(1),
                home_win_prob: 0.8,
            })
            .collect();
        let result = projector(5_000).project(TeamId(1), 0, 0, &games).unwrap();
        assert!(result.mean_wins > 3.0 && result.mean_wins < 5.0);
    }

    #[test]
    fn test_other_teams_contests_are_ignored() {
        let mut games = home_games(TeamId(1), 0.5, 4);
        games.push(RemainingContest {
            home: TeamId(2),
            away: TeamId(3),
            home_win_prob: 0.5,
        });
        let result = projector(100).project(TeamId(1), 0, 0, &games).unwrap();
        assert_eq!(result.remaining, 4);
        assert!(result.distribution.iter().all(|&w| w <= 4));
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let games = home_games(TeamId(1), 0.6, 30);
        let a = projector(2_000).project(TeamId(1), 10, 5, &games).unwrap();
        let b = projector(2_000).project(TeamId(1), 10, 5, &games).unwrap();
        assert_eq!(a, b);
        assert!(a.distribution.windows(2).all(|w| w[0] <= w[1]));
        assert!(a.percentile_10 <= a.median_wins && a.median_wins <= a.percentile_90);
    }

    #[test]
    fn test_momentum_thresholds() {
        let p = projector(1);
        let streak = |wins: &[bool]| p.momentum(&wins.iter().copied().collect());
        assert_eq!(streak(&[true, true, true, true]), 0.0);
        assert_eq!(streak(&[true, true, true, true, false]), 0.02);
        assert_eq!(streak(&[true, false, false, false, false]), -0.02);
        assert_eq!(streak(&[true, true, false, false, false]), 0.0);
    }

    #[test]
    fn test_invalid_probability_is_rejected() {
        let games = home_games(TeamId(1), f64::NAN, 1);
        assert!(projector(10).project(TeamId(1), 0, 0, &games).is_err());
    }
}
