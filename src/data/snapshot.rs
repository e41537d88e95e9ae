//! Per-team contest snapshots and the point-in-time lookup
//!
//! A snapshot is written once per (contest, side) by the walk-forward pass and
//! never mutated afterwards. Prediction-time reads go through
//! [`PointInTimeLookup::latest_snapshot_before`], which only ever returns
//! snapshots of strictly earlier contests.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::features::team_stats::FormStats;
use crate::{ContestId, ContestKey, ForecastError, Outcome, Result, TeamId};

/// Immutable record of one team's state around one contest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContestantSnapshot {
    pub contest_id: ContestId,
    pub team: TeamId,
    pub opponent: TeamId,
    pub is_home: bool,
    pub date: NaiveDate,
    pub seq: i64,
    /// Form from strictly earlier contests
    pub form_before: FormStats,
    /// Form including this contest (for later contests only)
    pub form_after: FormStats,
    pub rating_before: f64,
    /// Rating including this contest (for later contests only)
    pub rating_after: f64,
    /// Days since the previous contest, `None` for a first contest
    pub rest_days: Option<i64>,
    pub back_to_back: bool,
    pub outcome: Outcome,
    pub points_scored: u32,
    pub points_allowed: u32,
}

impl ContestantSnapshot {
    pub fn key(&self) -> ContestKey {
        ContestKey {
            date: self.date,
            seq: self.seq,
        }
    }
}

/// Most recent snapshot of a team dated strictly before a contest
///
/// This is the only read path for ratings and form when building inputs for
/// a contest; `None` means the team has no history and the caller applies
/// defaults.
pub trait PointInTimeLookup {
    fn latest_snapshot_before(
        &self,
        team: TeamId,
        key: ContestKey,
    ) -> Result<Option<ContestantSnapshot>>;
}

/// Append-only, in-memory snapshot log
#[derive(Debug, Clone, Default)]
pub struct SnapshotLog {
    snapshots: Vec<ContestantSnapshot>,
    /// Indices into `snapshots` per team, in ascending key order
    by_team: HashMap<TeamId, Vec<usize>>,
    by_contest: HashMap<ContestId, Vec<usize>>,
}

impl SnapshotLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from stored snapshots (any order)
    pub fn from_snapshots(mut snapshots: Vec<ContestantSnapshot>) -> Result<Self> {
        snapshots.sort_by(|a, b| {
            a.key()
                .cmp(&b.key())
                .then_with(|| b.is_home.cmp(&a.is_home))
        });
        let mut log = SnapshotLog::new();
        for snapshot in snapshots {
            log.append(snapshot)?;
        }
        Ok(log)
    }

    /// Append a snapshot; each team's snapshots must arrive in strictly increasing key order
    pub(crate) fn append(&mut self, snapshot: ContestantSnapshot) -> Result<()> {
        let team_index = self.by_team.entry(snapshot.team).or_default();
        if let Some(&last) = team_index.last() {
            let previous = &self.snapshots[last];
            if previous.key() >= snapshot.key() {
                return Err(ForecastError::OrderingViolation {
                    previous: format!("{} ({})", previous.contest_id, previous.key()),
                    found: format!("{} ({})", snapshot.contest_id, snapshot.key()),
                });
            }
        }

        let idx = self.snapshots.len();
        team_index.push(idx);
        self.by_contest
            .entry(snapshot.contest_id)
            .or_default()
            .push(idx);
        self.snapshots.push(snapshot);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// All snapshots in emission order
    pub fn iter(&self) -> impl Iterator<Item = &ContestantSnapshot> {
        self.snapshots.iter()
    }

    /// A team's snapshots, oldest first
    pub fn for_team(&self, team: TeamId) -> impl Iterator<Item = &ContestantSnapshot> {
        self.by_team
            .get(&team)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.snapshots[idx])
    }

    /// The snapshots written for a contest (home first)
    pub fn for_contest(&self, contest: ContestId) -> Vec<&ContestantSnapshot> {
        self.by_contest
            .get(&contest)
            .into_iter()
            .flatten()
            .map(|&idx| &self.snapshots[idx])
            .collect()
    }

    /// Borrowing form of the point-in-time lookup
    pub fn latest_before(&self, team: TeamId, key: ContestKey) -> Option<&ContestantSnapshot> {
        let indices = self.by_team.get(&team)?;
        let count = indices.partition_point(|&idx| self.snapshots[idx].key() < key);
        count
            .checked_sub(1)
            .map(|pos| &self.snapshots[indices[pos]])
    }

    /// Teams that have at least one snapshot
    pub fn teams(&self) -> Vec<TeamId> {
        let mut teams: Vec<TeamId> = self.by_team.keys().copied().collect();
        teams.sort();
        teams
    }
}

impl PointInTimeLookup for SnapshotLog {
    fn latest_snapshot_before(
        &self,
        team: TeamId,
        key: ContestKey,
    ) -> Result<Option<ContestantSnapshot>> {
        Ok(self.latest_before(team, key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(contest: i64, team: i64, day: u32, seq: i64) -> ContestantSnapshot {
        ContestantSnapshot {
            contest_id: ContestId(contest),
            team: TeamId(team),
            opponent: TeamId(99),
            is_home: true,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            seq,
            form_before: FormStats::empty(&[5]),
            form_after: FormStats::empty(&[5]),
            rating_before: 1500.0,
            rating_after: 1500.0 + contest as f64,
            rest_days: None,
            back_to_back: false,
            outcome: Outcome::Win,
            points_scored: 100,
            points_allowed: 90,
        }
    }

    fn key(day: u32, seq: i64) -> ContestKey {
        ContestKey {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            seq,
        }
    }

    fn log() -> SnapshotLog {
        let mut log = SnapshotLog::new();
        log.append(snapshot(1, 1, 1, 1)).unwrap();
        log.append(snapshot(10, 1, 5, 10)).unwrap();
        log.append(snapshot(11, 1, 5, 11)).unwrap();
        log.append(snapshot(12, 2, 6, 12)).unwrap();
        log
    }

    #[test]
    fn test_no_history_returns_none() {
        let log = log();
        assert!(log.latest_before(TeamId(1), key(1, 1)).is_none());
        assert!(log.latest_before(TeamId(3), key(9, 1)).is_none());
    }

    #[test]
    fn test_excludes_target_contest_itself() {
        let log = log();
        let prior = log.latest_before(TeamId(1), key(5, 11)).unwrap();
        assert_eq!(prior.contest_id, ContestId(10));
    }

    #[test]
    fn test_same_day_uses_tie_break() {
        let log = log();
        let prior = log.latest_before(TeamId(1), key(5, 10)).unwrap();
        assert_eq!(prior.contest_id, ContestId(1));
        let later = log.latest_before(TeamId(1), key(5, 12)).unwrap();
        assert_eq!(later.contest_id, ContestId(11));
    }

    #[test]
    fn test_later_date_sees_everything_before() {
        let log = log();
        let prior = log.latest_before(TeamId(1), key(30, 0)).unwrap();
        assert_eq!(prior.contest_id, ContestId(11));
    }

    #[test]
    fn test_append_rejects_out_of_order() {
        let mut log = log();
        let err = log.append(snapshot(13, 1, 4, 13)).unwrap_err();
        assert!(matches!(err, ForecastError::OrderingViolation { .. }));
        // Duplicate key for the same team
        assert!(log.append(snapshot(11, 1, 5, 11)).is_err());
    }

    #[test]
    fn test_from_snapshots_sorts() {
        let original = log();
        let mut shuffled: Vec<_> = original.iter().cloned().collect();
        shuffled.reverse();
        let rebuilt = SnapshotLog::from_snapshots(shuffled).unwrap();
        assert_eq!(rebuilt.len(), original.len());
        assert_eq!(
            rebuilt.latest_before(TeamId(1), key(5, 11)).map(|s| s.contest_id),
            Some(ContestId(10))
        );
        assert_eq!(rebuilt.for_contest(ContestId(12)).len(), 1);
        assert_eq!(rebuilt.teams(), vec![TeamId(1), TeamId(2)]);
    }
}
