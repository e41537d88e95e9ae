//! Rest and back-to-back tracking
//!
//! Days since each team's previous contest.

use chrono::NaiveDate;
use std::collections::HashMap;

use crate::TeamId;

/// Rest going into a contest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestState {
    /// Days since the previous contest, `None` without one
    pub days: Option<i64>,
    /// Previous contest was the same day or the day before
    pub back_to_back: bool,
}

impl RestState {
    /// Rest between a previous contest date and the current one
    pub fn between(previous: Option<NaiveDate>, current: NaiveDate) -> Self {
        match previous {
            Some(previous) => {
                let days = (current - previous).num_days();
                RestState {
                    days: Some(days),
                    back_to_back: days <= 1,
                }
            }
            None => RestState::default(),
        }
    }
}

/// Last contest date per team during a walk-forward pass
#[derive(Default)]
pub struct RestTracker {
    last_played: HashMap<TeamId, NaiveDate>,
}

impl RestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rest for a team going into a contest on `date` (call BEFORE `record`)
    pub fn rest(&self, team: TeamId, date: NaiveDate) -> RestState {
        RestState::between(self.last_played.get(&team).copied(), date)
    }

    pub fn record(&mut self, team: TeamId, date: NaiveDate) {
        self.last_played.insert(team, date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_no_history() {
        let tracker = RestTracker::new();
        let rest = tracker.rest(TeamId(1), date(5));
        assert_eq!(rest.days, None);
        assert!(!rest.back_to_back);
    }

    #[test]
    fn test_rest_days() {
        let mut tracker = RestTracker::new();
        tracker.record(TeamId(1), date(1));
        let rest = tracker.rest(TeamId(1), date(4));
        assert_eq!(rest.days, Some(3));
        assert!(!rest.back_to_back);
    }

    #[test]
    fn test_consecutive_days_are_back_to_back() {
        let mut tracker = RestTracker::new();
        tracker.record(TeamId(1), date(1));
        assert!(tracker.rest(TeamId(1), date(2)).back_to_back);
    }

    #[test]
    fn test_same_day_is_back_to_back() {
        let rest = RestState::between(Some(date(7)), date(7));
        assert_eq!(rest.days, Some(0));
        assert!(rest.back_to_back);
    }
}
