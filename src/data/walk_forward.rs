//! Walk-forward snapshot engine
//!
//! Processes completed contests strictly in chronological order and emits two
//! snapshots per contest, each built only from state accumulated before it.

use std::collections::HashSet;

use crate::data::snapshot::{ContestantSnapshot, SnapshotLog};
use crate::features::elo::RatingLedger;
use crate::features::rest::RestTracker;
use crate::features::team_stats::FormTracker;
use crate::{Contest, ContestResult, ForecastError, RatingConfig, Result};

/// Counts from one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub processed: usize,
    pub skipped_incomplete: usize,
    pub teams: usize,
}

/// Everything the pass mutates, owned by a single `run` call
struct PassState {
    ledger: RatingLedger,
    form: FormTracker,
    rest: RestTracker,
}

impl PassState {
    fn new(rating: RatingConfig, windows: &[usize]) -> Self {
        PassState {
            ledger: RatingLedger::new(rating),
            form: FormTracker::new(windows),
            rest: RestTracker::new(),
        }
    }

    /// Produce the (home, away) snapshots for a completed contest and advance state
    fn advance(
        &mut self,
        contest: &Contest,
        result: ContestResult,
    ) -> Result<(ContestantSnapshot, ContestantSnapshot)> {
        let key = contest.key();

        // Everything read here reflects only earlier contests
        let home_rating = self.ledger.rating_before(contest.home, key)?;
        let away_rating = self.ledger.rating_before(contest.away, key)?;
        let home_rest = self.rest.rest(contest.home, contest.date);
        let away_rest = self.rest.rest(contest.away, contest.date);
        let home_form = self.form.form(contest.home);
        let away_form = self.form.form(contest.away);

        let home_outcome = result.home_outcome();
        let away_outcome = home_outcome.reversed();

        let home_rating_after =
            self.ledger
                .apply_result(contest.home, key, away_rating, home_outcome)?;
        let away_rating_after =
            self.ledger
                .apply_result(contest.away, key, home_rating, away_outcome)?;

        self.form
            .record(contest.home, result.home_score, result.away_score);
        self.form
            .record(contest.away, result.away_score, result.home_score);
        self.rest.record(contest.home, contest.date);
        self.rest.record(contest.away, contest.date);

        let home = ContestantSnapshot {
            contest_id: contest.id,
            team: contest.home,
            opponent: contest.away,
            is_home: true,
            date: contest.date,
            seq: contest.seq,
            form_before: home_form,
            form_after: self.form.form(contest.home),
            rating_before: home_rating,
            rating_after: home_rating_after,
            rest_days: home_rest.days,
            back_to_back: home_rest.back_to_back,
            outcome: home_outcome,
            points_scored: result.home_score,
            points_allowed: result.away_score,
        };
        let away = ContestantSnapshot {
            contest_id: contest.id,
            team: contest.away,
            opponent: contest.home,
            is_home: false,
            date: contest.date,
            seq: contest.seq,
            form_before: away_form,
            form_after: self.form.form(contest.away),
            rating_before: away_rating,
            rating_after: away_rating_after,
            rest_days: away_rest.days,
            back_to_back: away_rest.back_to_back,
            outcome: away_outcome,
            points_scored: result.away_score,
            points_allowed: result.home_score,
        };

        Ok((home, away))
    }
}

/// Sequential snapshot builder
pub struct WalkForwardEngine {
    rating: RatingConfig,
    windows: Vec<usize>,
}

impl WalkForwardEngine {
    pub fn new(rating: RatingConfig, windows: Vec<usize>) -> Self {
        WalkForwardEngine { rating, windows }
    }

    /// Build the full snapshot log from contests sorted by (date, seq)
    ///
    /// Scheduled contests may be interleaved and are skipped. Unsorted input
    /// is refused before any state is touched.
    pub fn run(&self, contests: &[Contest]) -> Result<SnapshotLog> {
        self.run_with_summary(contests).map(|(log, _)| log)
    }

    pub fn run_with_summary(&self, contests: &[Contest]) -> Result<(SnapshotLog, PassSummary)> {
        check_preconditions(contests)?;

        log::info!("Starting walk-forward pass over {} contests", contests.len());

        let mut state = PassState::new(self.rating.clone(), &self.windows);
        let mut log = SnapshotLog::new();
        let mut summary = PassSummary::default();

        for (idx, contest) in contests.iter().enumerate() {
            if (idx + 1) % 500 == 0 {
                log::debug!("Processing contest {}/{}", idx + 1, contests.len());
            }

            let Some(result) = contest.result() else {
                summary.skipped_incomplete += 1;
                continue;
            };

            let (home, away) = state.advance(contest, result)?;
            log.append(home)?;
            log.append(away)?;
            summary.processed += 1;
        }

        summary.teams = state.ledger.team_count();
        log::info!(
            "Walk-forward pass complete: {} contests processed, {} incomplete skipped, {} teams",
            summary.processed,
            summary.skipped_incomplete,
            summary.teams
        );

        Ok((log, summary))
    }
}

/// Strict (date, seq) ordering, unique ids, two distinct sides
fn check_preconditions(contests: &[Contest]) -> Result<()> {
    let mut seen = HashSet::with_capacity(contests.len());

    for contest in contests {
        if contest.home == contest.away {
            return Err(ForecastError::InvalidContest {
                contest: contest.id,
                reason: format!("{} is listed on both sides", contest.home),
            });
        }
        if !seen.insert(contest.id) {
            return Err(ForecastError::InvalidContest {
                contest: contest.id,
                reason: "duplicate contest id".to_string(),
            });
        }
    }

    for pair in contests.windows(2) {
        if pair[0].key() >= pair[1].key() {
            return Err(ForecastError::OrderingViolation {
                previous: format!("{} ({})", pair[0].id, pair[0].key()),
                found: format!("{} ({})", pair[1].id, pair[1].key()),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::{ContestId, Outcome, TeamId};

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn engine() -> WalkForwardEngine {
        WalkForwardEngine::new(
            RatingConfig {
                k_factor: 32.0,
                initial_rating: 1500.0,
            },
            vec![5, 10, 20],
        )
    }

    fn season() -> Vec<Contest> {
        vec![
            Contest::completed(1, date(1, 1), TeamId(1), TeamId(2), 100, 110),
            Contest::completed(2, date(1, 2), TeamId(3), TeamId(1), 95, 105),
            Contest::completed(3, date(1, 4), TeamId(2), TeamId(3), 120, 101),
            Contest::scheduled(4, date(1, 5), TeamId(1), TeamId(3)),
            Contest::completed(5, date(1, 6), TeamId(1), TeamId(2), 99, 98),
            Contest::completed(6, date(1, 8), TeamId(3), TeamId(2), 90, 90),
        ]
    }

    #[test]
    fn test_loss_at_even_odds() {
        let log = engine().run(&season()).unwrap();
        let first = log.for_contest(ContestId(1));
        assert_eq!(first.len(), 2);

        let home = first[0];
        assert!(home.is_home);
        assert_eq!(home.rating_before, 1500.0);
        assert_eq!(home.rating_after, 1484.0);
        assert_eq!(home.outcome, Outcome::Loss);

        let away = first[1];
        assert_eq!(away.rating_after, 1516.0);
        assert_eq!(away.points_scored, 110);
    }

    #[test]
    fn test_ratings_chain_between_contests() {
        let log = engine().run(&season()).unwrap();
        let mut previous_after: Option<f64> = None;
        for snapshot in log.for_team(TeamId(1)) {
            if let Some(after) = previous_after {
                assert_eq!(snapshot.rating_before, after);
            }
            previous_after = Some(snapshot.rating_after);
        }
    }

    #[test]
    fn test_scheduled_contests_are_skipped() {
        let (log, summary) = engine().run_with_summary(&season()).unwrap();
        assert_eq!(summary.processed, 5);
        assert_eq!(summary.skipped_incomplete, 1);
        assert_eq!(summary.teams, 3);
        assert_eq!(log.len(), 10);
        assert!(log.for_contest(ContestId(4)).is_empty());
    }

    #[test]
    fn test_rest_days_and_first_contest() {
        let log = engine().run(&season()).unwrap();
        let team1: Vec<_> = log.for_team(TeamId(1)).collect();

        assert_eq!(team1[0].rest_days, None);
        assert!(!team1[0].back_to_back);
        // Jan 1 -> Jan 2
        assert_eq!(team1[1].rest_days, Some(1));
        assert!(team1[1].back_to_back);
        // Jan 2 -> Jan 6 (the Jan 5 contest was never played)
        assert_eq!(team1[2].rest_days, Some(4));
        assert!(!team1[2].back_to_back);
    }

    #[test]
    fn test_form_before_excludes_current_contest() {
        let log = engine().run(&season()).unwrap();
        let third = log.for_contest(ContestId(3));
        let team2 = third[0];
        assert_eq!(team2.form_before.games, 1);
        assert_eq!(team2.form_before.total_points_for, 110);
        assert_eq!(team2.form_after.games, 2);
        assert_eq!(team2.form_after.total_points_for, 230);
    }

    #[test]
    fn test_draw_recorded() {
        let log = engine().run(&season()).unwrap();
        let last = log.for_contest(ContestId(6));
        assert_eq!(last[0].outcome, Outcome::Draw);
        assert_eq!(last[1].outcome, Outcome::Draw);
        assert_eq!(last[0].form_after.draws, 1);
    }

    #[test]
    fn test_same_day_tie_break() {
        let contests = vec![
            Contest::completed(10, date(2, 1), TeamId(1), TeamId(2), 100, 90),
            Contest::completed(11, date(2, 1), TeamId(3), TeamId(1), 100, 90),
        ];
        let log = engine().run(&contests).unwrap();

        let c10 = log.for_contest(ContestId(10))[0];
        assert_eq!(c10.form_before.games, 0);
        assert_eq!(c10.rating_before, 1500.0);

        let c11 = log.for_contest(ContestId(11))[1];
        assert_eq!(c11.team, TeamId(1));
        assert_eq!(c11.form_before.games, 1);
        assert_eq!(c11.form_before.wins, 1);
        assert_eq!(c11.rating_before, c10.rating_after);
        assert_eq!(c11.rest_days, Some(0));
        assert!(c11.back_to_back);
    }

    #[test]
    fn test_third_contest_ten_game_window_uses_two() {
        let contests = vec![
            Contest::completed(1, date(1, 1), TeamId(1), TeamId(2), 100, 90),
            Contest::completed(2, date(1, 3), TeamId(1), TeamId(3), 110, 120),
            Contest::completed(3, date(1, 5), TeamId(1), TeamId(4), 90, 80),
        ];
        let log = engine().run(&contests).unwrap();
        let third = log.for_contest(ContestId(3))[0];
        let ten = third.form_before.window(10).unwrap();
        assert_eq!(ten.games, 2);
        assert_eq!(ten.points_for, Some(105.0));
        assert_eq!(ten.points_against, Some(105.0));
        assert_eq!(ten.differential, Some(0.0));
    }

    #[test]
    fn test_unsorted_input_is_refused() {
        let mut contests = season();
        contests.swap(1, 2);
        let err = engine().run(&contests).unwrap_err();
        assert!(matches!(err, ForecastError::OrderingViolation { .. }));
    }

    #[test]
    fn test_equal_keys_are_refused() {
        let mut contests = season();
        contests[1].date = contests[0].date;
        contests[1].seq = contests[0].seq;
        assert!(engine().run(&contests).is_err());
    }

    #[test]
    fn test_self_contest_is_refused() {
        let contests = vec![Contest::completed(1, date(1, 1), TeamId(1), TeamId(1), 1, 0)];
        assert!(matches!(
            engine().run(&contests),
            Err(ForecastError::InvalidContest { .. })
        ));
    }

    #[test]
    fn test_rerun_is_identical() {
        let first = engine().run(&season()).unwrap();
        let second = engine().run(&season()).unwrap();
        let a: Vec<_> = first.iter().collect();
        let b: Vec<_> = second.iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_snapshots_independent_of_later_contests() {
        let full = engine().run(&season()).unwrap();
        let contests = season();
        for cut in 1..=contests.len() {
            let prefix = engine().run(&contests[..cut]).unwrap();
            for snapshot in prefix.iter() {
                let matching = full
                    .for_contest(snapshot.contest_id)
                    .into_iter()
                    .find(|s| s.team == snapshot.team)
                    .unwrap();
                assert_eq!(matching, snapshot);
            }
        }
    }
}
