//! Team form statistics
//!
//! Cumulative and rolling-window scoring form, built incrementally from each
//! team's own completed contests.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::{Outcome, TeamId};

/// Rolling averages over a team's last `window` contests
///
/// When fewer than `window` contests exist, the averages cover exactly the
/// available ones; with none they are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingForm {
    pub window: usize,
    /// Contests actually averaged (<= window)
    pub games: usize,
    pub points_for: Option<f64>,
    pub points_against: Option<f64>,
    pub differential: Option<f64>,
}

/// Form of a team at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormStats {
    pub games: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub total_points_for: u64,
    pub total_points_against: u64,
    pub rolling: Vec<RollingForm>,
}

impl FormStats {
    /// Form of a team with no history
    pub fn empty(windows: &[usize]) -> Self {
        FormStats {
            games: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            total_points_for: 0,
            total_points_against: 0,
            rolling: windows
                .iter()
                .map(|&window| RollingForm {
                    window,
                    games: 0,
                    points_for: None,
                    points_against: None,
                    differential: None,
                })
                .collect(),
        }
    }

    /// Win ratio (0 when no games)
    pub fn win_pct(&self) -> f64 {
        if self.games == 0 {
            0.0
        } else {
            self.wins as f64 / self.games as f64
        }
    }

    /// Average points scored per contest
    pub fn points_for_avg(&self) -> f64 {
        if self.games == 0 {
            0.0
        } else {
            self.total_points_for as f64 / self.games as f64
        }
    }

    /// Average points conceded per contest
    pub fn points_against_avg(&self) -> f64 {
        if self.games == 0 {
            0.0
        } else {
            self.total_points_against as f64 / self.games as f64
        }
    }

    /// Average point differential per contest
    pub fn point_diff_avg(&self) -> f64 {
        self.points_for_avg() - self.points_against_avg()
    }

    /// Rolling form for a given window size
    pub fn window(&self, window: usize) -> Option<&RollingForm> {
        self.rolling.iter().find(|r| r.window == window)
    }
}

#[derive(Debug, Clone, Copy)]
struct GameLine {
    points_for: u32,
    points_against: u32,
}

/// Running totals for one team
#[derive(Debug, Clone, Default)]
struct TeamForm {
    games: u32,
    wins: u32,
    losses: u32,
    draws: u32,
    total_points_for: u64,
    total_points_against: u64,
    /// Most recent contests, newest at the back
    recent: VecDeque<GameLine>,
}

/// Tracks form for every team during a walk-forward pass
pub struct FormTracker {
    windows: Vec<usize>,
    max_window: usize,
    teams: HashMap<TeamId, TeamForm>,
}

impl FormTracker {
    pub fn new(windows: &[usize]) -> Self {
        FormTracker {
            windows: windows.to_vec(),
            max_window: windows.iter().copied().max().unwrap_or(0),
            teams: HashMap::new(),
        }
    }

    /// Current form for a team (empty form if it has not played)
    pub fn form(&self, team: TeamId) -> FormStats {
        let Some(state) = self.teams.get(&team) else {
            return FormStats::empty(&self.windows);
        };

        let rolling = self
            .windows
            .iter()
            .map(|&window| {
                let games = window.min(state.recent.len());
                if games == 0 {
                    return RollingForm {
                        window,
                        games: 0,
                        points_for: None,
                        points_against: None,
                        differential: None,
                    };
                }
                let (pf, pa) = state
                    .recent
                    .iter()
                    .rev()
                    .take(games)
                    .fold((0u64, 0u64), |(pf, pa), line| {
                        (pf + line.points_for as u64, pa + line.points_against as u64)
                    });
                let points_for = pf as f64 / games as f64;
                let points_against = pa as f64 / games as f64;
                RollingForm {
                    window,
                    games,
                    points_for: Some(points_for),
                    points_against: Some(points_against),
                    differential: Some(points_for - points_against),
                }
            })
            .collect();

        FormStats {
            games: state.games,
            wins: state.wins,
            losses: state.losses,
            draws: state.draws,
            total_points_for: state.total_points_for,
            total_points_against: state.total_points_against,
            rolling,
        }
    }

    /// Record a completed contest for a team
    pub fn record(&mut self, team: TeamId, points_for: u32, points_against: u32) {
        let state = self.teams.entry(team).or_default();

        state.games += 1;
        state.total_points_for += points_for as u64;
        state.total_points_against += points_against as u64;

        match Outcome::from_scores(points_for, points_against) {
            Outcome::Win => state.wins += 1,
            Outcome::Loss => state.losses += 1,
            Outcome::Draw => state.draws += 1,
        }

        state.recent.push_back(GameLine {
            points_for,
            points_against,
        });
        while state.recent.len() > self.max_window {
            state.recent.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_form() {
        let tracker = FormTracker::new(&[5, 10, 20]);
        let form = tracker.form(TeamId(1));
        assert_eq!(form.games, 0);
        assert_eq!(form.win_pct(), 0.0);
        assert_eq!(form.rolling.len(), 3);
        assert!(form.rolling.iter().all(|r| r.points_for.is_none()));
    }

    #[test]
    fn test_cumulative_totals() {
        let mut tracker = FormTracker::new(&[5]);
        tracker.record(TeamId(1), 110, 100);
        tracker.record(TeamId(1), 90, 95);
        tracker.record(TeamId(1), 100, 100);

        let form = tracker.form(TeamId(1));
        assert_eq!(form.games, 3);
        assert_eq!(form.wins, 1);
        assert_eq!(form.losses, 1);
        assert_eq!(form.draws, 1);
        assert_eq!(form.total_points_for, 300);
        assert_eq!(form.points_against_avg(), 295.0 / 3.0);
    }

    #[test]
    fn test_short_history_uses_available_games() {
        let mut tracker = FormTracker::new(&[5, 10]);
        tracker.record(TeamId(1), 100, 90);
        tracker.record(TeamId(1), 120, 100);

        let form = tracker.form(TeamId(1));
        let ten = form.window(10).unwrap();
        assert_eq!(ten.games, 2);
        assert_eq!(ten.points_for, Some(110.0));
        assert_eq!(ten.points_against, Some(95.0));
        assert_eq!(ten.differential, Some(15.0));
    }

    #[test]
    fn test_window_drops_oldest_games() {
        let mut tracker = FormTracker::new(&[2, 3]);
        for pts in [80, 90, 100, 110] {
            tracker.record(TeamId(1), pts, 100);
        }

        let form = tracker.form(TeamId(1));
        assert_eq!(form.window(2).unwrap().points_for, Some(105.0));
        assert_eq!(form.window(3).unwrap().points_for, Some(100.0));
        // Cumulative totals keep everything
        assert_eq!(form.games, 4);
        assert_eq!(form.points_for_avg(), 95.0);
    }

    #[test]
    fn test_teams_are_independent() {
        let mut tracker = FormTracker::new(&[5]);
        tracker.record(TeamId(1), 100, 90);
        assert_eq!(tracker.form(TeamId(2)).games, 0);
    }
}
