//! Feature extraction
//!
//! Elo ratings, scoring form and rest, and the flattened per-contest vector
//! built from point-in-time snapshots.

pub mod elo;
pub mod rest;
pub mod team_stats;
pub mod vector;

pub use elo::{expected_score, rating_probability, RatingLedger};
pub use rest::{RestState, RestTracker};
pub use team_stats::{FormStats, FormTracker, RollingForm};
pub use vector::{FeatureBuilder, FeatureLayout, MatchupFeatures, SideFeatures};
