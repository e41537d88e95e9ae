//! Fixed-width feature vectors for a contest
//!
//! Each side's inputs come from the most recent snapshot strictly before the
//! contest, read through [`PointInTimeLookup`]. The contest's own snapshots
//! are never consulted, so a played contest yields the same vector as it did
//! while it was still scheduled.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::data::snapshot::{ContestantSnapshot, PointInTimeLookup};
use crate::features::rest::RestState;
use crate::features::team_stats::FormStats;
use crate::{Contest, ContestId, ForecastError, Result};

/// Days of rest assumed when a team has no previous contest
pub const UNKNOWN_REST_DAYS: f32 = 0.0;

/// Ordered feature names for a set of rolling windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    windows: Vec<usize>,
    names: Vec<String>,
}

impl FeatureLayout {
    pub fn new(windows: &[usize]) -> Self {
        let mut names = Vec::new();
        for side in ["home", "away"] {
            names.push(format!("{side}_elo"));
            names.push(format!("{side}_ppf"));
            names.push(format!("{side}_ppa"));
            names.push(format!("{side}_point_diff"));
            names.push(format!("{side}_win_pct"));
            for w in windows {
                names.push(format!("{side}_ppf_{w}game"));
                names.push(format!("{side}_ppa_{w}game"));
                names.push(format!("{side}_diff_{w}game"));
            }
            names.push(format!("{side}_days_rest"));
            names.push(format!("{side}_back_to_back"));
        }
        names.push("elo_diff".to_string());
        names.push("ppf_diff".to_string());
        names.push("ppa_diff".to_string());
        for w in windows {
            names.push(format!("diff_{w}game_diff"));
        }

        FeatureLayout {
            windows: windows.to_vec(),
            names,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn windows(&self) -> &[usize] {
        &self.windows
    }

    pub fn dim(&self) -> usize {
        self.names.len()
    }
}

/// Rolling averages for one window (0 when unavailable)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowFeatures {
    pub points_for: f32,
    pub points_against: f32,
    pub differential: f32,
}

/// One side's inputs as of just before a contest
#[derive(Debug, Clone, PartialEq)]
pub struct SideFeatures {
    pub rating: f64,
    pub win_pct: f32,
    pub points_for: f32,
    pub points_against: f32,
    pub point_diff: f32,
    pub windows: Vec<WindowFeatures>,
    pub rest_days: f32,
    pub back_to_back: f32,
    /// Whether a prior snapshot existed
    pub has_history: bool,
}

impl SideFeatures {
    /// Defaults for a team without history
    pub fn without_history(initial_rating: f64, windows: usize) -> Self {
        SideFeatures {
            rating: initial_rating,
            win_pct: 0.0,
            points_for: 0.0,
            points_against: 0.0,
            point_diff: 0.0,
            windows: vec![WindowFeatures::default(); windows],
            rest_days: UNKNOWN_REST_DAYS,
            back_to_back: 0.0,
            has_history: false,
        }
    }

    /// Inputs for a contest on `date` from the prior snapshot's post-contest state
    pub fn from_prior(
        prior: &ContestantSnapshot,
        date: NaiveDate,
        layout: &FeatureLayout,
    ) -> Result<Self> {
        let form: &FormStats = &prior.form_after;
        let windows = layout
            .windows()
            .iter()
            .map(|&w| {
                let rolling = form.window(w).ok_or_else(|| ForecastError::FeatureMismatch {
                    expected: format!("rolling window {w}"),
                    found: format!(
                        "snapshot of {} with windows {:?}",
                        prior.contest_id,
                        form.rolling.iter().map(|r| r.window).collect::<Vec<_>>()
                    ),
                })?;
                Ok(WindowFeatures {
                    points_for: rolling.points_for.unwrap_or(0.0) as f32,
                    points_against: rolling.points_against.unwrap_or(0.0) as f32,
                    differential: rolling.differential.unwrap_or(0.0) as f32,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let rest = RestState::between(Some(prior.date), date);

        Ok(SideFeatures {
            rating: prior.rating_after,
            win_pct: form.win_pct() as f32,
            points_for: form.points_for_avg() as f32,
            points_against: form.points_against_avg() as f32,
            point_diff: form.point_diff_avg() as f32,
            windows,
            rest_days: rest.days.map(|d| d as f32).unwrap_or(UNKNOWN_REST_DAYS),
            back_to_back: if rest.back_to_back { 1.0 } else { 0.0 },
            has_history: true,
        })
    }

    fn push_values(&self, out: &mut Vec<f32>) {
        out.push(self.rating as f32);
        out.push(self.points_for);
        out.push(self.points_against);
        out.push(self.point_diff);
        out.push(self.win_pct);
        for w in &self.windows {
            out.push(w.points_for);
            out.push(w.points_against);
            out.push(w.differential);
        }
        out.push(self.rest_days);
        out.push(self.back_to_back);
    }
}

/// Both sides' inputs for a contest plus the flattened vector
#[derive(Debug, Clone, PartialEq)]
pub struct MatchupFeatures {
    pub contest_id: ContestId,
    pub home: SideFeatures,
    pub away: SideFeatures,
    pub values: Vec<f32>,
}

impl MatchupFeatures {
    fn assemble(contest_id: ContestId, home: SideFeatures, away: SideFeatures) -> Self {
        let mut values = Vec::new();
        home.push_values(&mut values);
        away.push_values(&mut values);

        // Interactions
        values.push((home.rating - away.rating) as f32);
        values.push(home.points_for - away.points_for);
        values.push(home.points_against - away.points_against);
        for (h, a) in home.windows.iter().zip(away.windows.iter()) {
            values.push(h.differential - a.differential);
        }

        MatchupFeatures {
            contest_id,
            home,
            away,
            values,
        }
    }
}

/// Builds feature vectors through a point-in-time lookup
pub struct FeatureBuilder<'a, L: PointInTimeLookup + ?Sized> {
    lookup: &'a L,
    layout: &'a FeatureLayout,
    initial_rating: f64,
}

impl<'a, L: PointInTimeLookup + ?Sized> FeatureBuilder<'a, L> {
    pub fn new(lookup: &'a L, layout: &'a FeatureLayout, initial_rating: f64) -> Self {
        FeatureBuilder {
            lookup,
            layout,
            initial_rating,
        }
    }

    pub fn layout(&self) -> &FeatureLayout {
        self.layout
    }

    /// Feature vector for a scheduled or completed contest
    pub fn build(&self, contest: &Contest) -> Result<MatchupFeatures> {
        let key = contest.key();
        let home = self.side(self.lookup.latest_snapshot_before(contest.home, key)?, contest.date)?;
        let away = self.side(self.lookup.latest_snapshot_before(contest.away, key)?, contest.date)?;

        let features = MatchupFeatures::assemble(contest.id, home, away);
        debug_assert_eq!(features.values.len(), self.layout.dim());
        Ok(features)
    }

    fn side(&self, prior: Option<ContestantSnapshot>, date: NaiveDate) -> Result<SideFeatures> {
        match prior {
            Some(snapshot) => SideFeatures::from_prior(&snapshot, date, self.layout),
            None => Ok(SideFeatures::without_history(
                self.initial_rating,
                self.layout.windows().len(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::snapshot::SnapshotLog;
    use crate::data::walk_forward::WalkForwardEngine;
    use crate::{RatingConfig, TeamId};

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn run(contests: &[Contest]) -> SnapshotLog {
        WalkForwardEngine::new(
            RatingConfig {
                k_factor: 32.0,
                initial_rating: 1500.0,
            },
            vec![5, 10, 20],
        )
        .run(contests)
        .unwrap()
    }

    fn index(layout: &FeatureLayout, name: &str) -> usize {
        layout.names().iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_layout_width_and_order() {
        let layout = FeatureLayout::new(&[5, 10, 20]);
        assert_eq!(layout.dim(), 38);
        assert_eq!(layout.names()[0], "home_elo");
        assert_eq!(layout.names()[16], "away_elo");
        assert_eq!(layout.names()[32], "elo_diff");
        assert_eq!(layout.names()[37], "diff_20game_diff");
        assert_eq!(layout, FeatureLayout::new(&[5, 10, 20]));
    }

    #[test]
    fn test_no_history_defaults() {
        let layout = FeatureLayout::new(&[5, 10, 20]);
        let log = SnapshotLog::new();
        let builder = FeatureBuilder::new(&log, &layout, 1500.0);
        let contest = Contest::scheduled(1, date(1, 1), TeamId(1), TeamId(2));

        let features = builder.build(&contest).unwrap();
        assert_eq!(features.values.len(), layout.dim());
        assert_eq!(features.values[index(&layout, "home_elo")], 1500.0);
        assert_eq!(features.values[index(&layout, "elo_diff")], 0.0);
        assert_eq!(features.values[index(&layout, "away_days_rest")], UNKNOWN_REST_DAYS);
        assert!(!features.home.has_history);
    }

    #[test]
    fn test_played_contest_uses_pre_contest_state() {
        let contests = vec![
            Contest::completed(1, date(1, 1), TeamId(1), TeamId(2), 100, 110),
            Contest::completed(2, date(1, 3), TeamId(1), TeamId(2), 120, 100),
        ];
        let log = run(&contests);
        let layout = FeatureLayout::new(&[5, 10, 20]);
        let builder = FeatureBuilder::new(&log, &layout, 1500.0);

        let features = builder.build(&contests[1]).unwrap();
        // Rating after contest 1, not after contest 2
        assert_eq!(features.home.rating, 1484.0);
        assert_eq!(features.away.rating, 1516.0);
        assert_eq!(features.home.points_for, 100.0);
        assert_eq!(features.home.win_pct, 0.0);
        assert_eq!(features.values[index(&layout, "home_days_rest")], 2.0);
        assert_eq!(features.values[index(&layout, "elo_diff")], -32.0);
    }

    #[test]
    fn test_third_contest_ten_game_average() {
        let contests = vec![
            Contest::completed(1, date(1, 1), TeamId(1), TeamId(2), 100, 90),
            Contest::completed(2, date(1, 3), TeamId(3), TeamId(1), 80, 110),
            Contest::completed(3, date(1, 5), TeamId(1), TeamId(4), 90, 95),
        ];
        let log = run(&contests);
        let layout = FeatureLayout::new(&[5, 10, 20]);
        let builder = FeatureBuilder::new(&log, &layout, 1500.0);

        let features = builder.build(&contests[2]).unwrap();
        let ppf10 = features.values[index(&layout, "home_ppf_10game")];
        let ppa10 = features.values[index(&layout, "home_ppa_10game")];
        assert_eq!(ppf10, 105.0);
        assert_eq!(ppa10, 85.0);
        assert_eq!(features.values[index(&layout, "home_diff_10game")], 20.0);
    }

    #[test]
    fn test_same_day_second_contest_sees_first() {
        let contests = vec![
            Contest::completed(10, date(2, 1), TeamId(1), TeamId(2), 100, 90),
            Contest::completed(11, date(2, 1), TeamId(1), TeamId(3), 90, 100),
        ];
        let log = WalkForwardEngine::new(
            RatingConfig {
                k_factor: 32.0,
                initial_rating: 1500.0,
            },
            vec![5],
        )
        .run(&contests)
        .unwrap();
        let layout = FeatureLayout::new(&[5]);
        let builder = FeatureBuilder::new(&log, &layout, 1500.0);

        let first = builder.build(&contests[0]).unwrap();
        assert!(!first.home.has_history);

        let second = builder.build(&contests[1]).unwrap();
        assert!(second.home.has_history);
        assert_eq!(second.home.win_pct, 1.0);
        assert_eq!(second.home.rest_days, 0.0);
        assert_eq!(second.home.back_to_back, 1.0);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_window_mismatch_is_reported() {
        let contests = vec![
            Contest::completed(1, date(1, 1), TeamId(1), TeamId(2), 100, 90),
            Contest::scheduled(2, date(1, 3), TeamId(1), TeamId(2)),
        ];
        let log = run(&contests);
        let layout = FeatureLayout::new(&[7]);
        let builder = FeatureBuilder::new(&log, &layout, 1500.0);
        assert!(matches!(
            builder.build(&contests[1]),
            Err(ForecastError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn test_repeated_builds_are_identical() {
        let contests = vec![
            Contest::completed(1, date(1, 1), TeamId(1), TeamId(2), 101, 99),
            Contest::completed(2, date(1, 2), TeamId(2), TeamId(1), 87, 93),
            Contest::scheduled(3, date(1, 4), TeamId(1), TeamId(2)),
        ];
        let log = run(&contests);
        let layout = FeatureLayout::new(&[5, 10, 20]);
        let builder = FeatureBuilder::new(&log, &layout, 1500.0);
        let a = builder.build(&contests[2]).unwrap();
        let b = builder.build(&contests[2]).unwrap();
        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a.values), bits(&b.values));
    }
}
