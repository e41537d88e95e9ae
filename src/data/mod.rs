//! Contest storage, the walk-forward pass and training datasets

pub mod database;
pub mod dataset;
pub mod snapshot;
pub mod walk_forward;

pub use database::{Database, DatabaseStats};
pub use dataset::{ContestDataset, FeatureNormalization, MarginNormalization, TrainingSample};
pub use snapshot::{ContestantSnapshot, PointInTimeLookup, SnapshotLog};
pub use walk_forward::{PassSummary, WalkForwardEngine};
