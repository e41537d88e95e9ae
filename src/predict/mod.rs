//! Prediction and inference
//!
//! Serve a trained ensemble and project seasons from its probabilities.

pub mod inference;
pub mod projection;

pub use inference::{EnsemblePredictor, EnsembleScores};
pub use projection::{ProjectionResult, RemainingContest, SeasonProjector};
