//! Model training
//!
//! Training loop, loss functions, and metrics tracking.

pub mod metrics;
pub mod trainer;

pub use metrics::{
    CalibrationTable, ClassificationMetrics, EvaluationReport, Metrics, RegressionMetrics,
    TrainingHistory,
};
pub use trainer::{evaluate, EnsembleTrainer, ModelManifest, TrainedEnsemble};
