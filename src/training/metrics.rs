//! Training metrics and held-out evaluation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Probabilities are clamped to this distance from 0 and 1 before taking logs
const LOG_EPS: f64 = 1e-15;

/// Metrics accumulated over one epoch of one head
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Sum of batch losses
    pub total_loss: f64,
    /// Number of correct win predictions (classifier only)
    pub correct: usize,
    /// Total predictions
    pub total_predictions: usize,
    /// Sum of absolute margin errors in points (regressor only)
    pub abs_error_sum: f64,
    /// Number of batches accumulated
    pub batch_count: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update metrics with a batch result
    pub fn update(&mut self, loss: f32, correct: usize, batch_size: usize, abs_error_sum: f64) {
        self.total_loss += loss as f64;
        self.correct += correct;
        self.total_predictions += batch_size;
        self.abs_error_sum += abs_error_sum;
        self.batch_count += 1;
    }

    pub fn avg_loss(&self) -> f64 {
        if self.batch_count == 0 {
            0.0
        } else {
            self.total_loss / self.batch_count as f64
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total_predictions == 0 {
            0.0
        } else {
            self.correct as f64 / self.total_predictions as f64
        }
    }

    /// Mean absolute margin error in points
    pub fn mae(&self) -> f64 {
        if self.total_predictions == 0 {
            0.0
        } else {
            self.abs_error_sum / self.total_predictions as f64
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loss: {:.4} | Acc: {:.2}% | Margin MAE: {:.2}",
            self.avg_loss(),
            self.accuracy() * 100.0,
            self.mae()
        )
    }
}

/// Per-epoch losses of one head
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
    pub best_val_loss: Option<f64>,
    pub best_epoch: usize,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record metrics for an epoch (validation is optional)
    pub fn record_epoch(&mut self, epoch: usize, train: &Metrics, val: Option<&Metrics>) {
        self.train_losses.push(train.avg_loss());
        if let Some(val) = val {
            let loss = val.avg_loss();
            self.val_losses.push(loss);
            if self.best_val_loss.map_or(true, |best| loss < best) {
                self.best_val_loss = Some(loss);
                self.best_epoch = epoch;
            }
        }
    }

    pub fn initial_loss(&self) -> Option<f64> {
        self.train_losses.first().copied()
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.train_losses.last().copied()
    }

    pub fn epochs(&self) -> usize {
        self.train_losses.len()
    }
}

/// Win-probability quality over a set of contests
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub count: usize,
    /// Share of contests where the side given >= 50% won
    pub accuracy: f64,
    pub log_loss: f64,
    pub brier: f64,
}

impl ClassificationMetrics {
    /// `probs` are P(home wins); `outcomes` are 1 for a home win, else 0
    pub fn compute(probs: &[f64], outcomes: &[f64]) -> Option<Self> {
        if probs.is_empty() || probs.len() != outcomes.len() {
            return None;
        }
        let n = probs.len() as f64;

        let correct = probs
            .iter()
            .zip(outcomes)
            .filter(|(p, y)| (**p >= 0.5) == (**y >= 0.5))
            .count();

        let log_loss = probs
            .iter()
            .zip(outcomes)
            .map(|(p, y)| {
                let p = p.clamp(LOG_EPS, 1.0 - LOG_EPS);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            })
            .sum::<f64>()
            / n;

        let brier = probs
            .iter()
            .zip(outcomes)
            .map(|(p, y)| (p - y).powi(2))
            .sum::<f64>()
            / n;

        Some(ClassificationMetrics {
            count: probs.len(),
            accuracy: correct as f64 / n,
            log_loss,
            brier,
        })
    }
}

impl fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} | Acc: {:.2}% | Log loss: {:.4} | Brier: {:.4}",
            self.count,
            self.accuracy * 100.0,
            self.log_loss,
            self.brier
        )
    }
}

/// Margin prediction quality in points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub count: usize,
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    pub fn compute(predicted: &[f64], actual: &[f64]) -> Option<Self> {
        if predicted.is_empty() || predicted.len() != actual.len() {
            return None;
        }
        let n = predicted.len() as f64;

        let mae = predicted
            .iter()
            .zip(actual)
            .map(|(p, a)| (p - a).abs())
            .sum::<f64>()
            / n;
        let sse = predicted
            .iter()
            .zip(actual)
            .map(|(p, a)| (p - a).powi(2))
            .sum::<f64>();
        let mean = actual.iter().sum::<f64>() / n;
        let sst = actual.iter().map(|a| (a - mean).powi(2)).sum::<f64>();

        Some(RegressionMetrics {
            count: predicted.len(),
            mae,
            rmse: (sse / n).sqrt(),
            // Constant targets: perfect fit scores 1, anything else 0
            r2: if sst > 0.0 {
                1.0 - sse / sst
            } else if sse == 0.0 {
                1.0
            } else {
                0.0
            },
        })
    }
}

impl fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} | MAE: {:.2} | RMSE: {:.2} | R²: {:.3}",
            self.count, self.mae, self.rmse, self.r2
        )
    }
}

/// Predicted vs actual win rate within one probability bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_predicted: Option<f64>,
    pub actual_rate: Option<f64>,
}

/// Calibration by equal-width probability buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub buckets: Vec<CalibrationBucket>,
}

impl CalibrationTable {
    pub const DEFAULT_BUCKETS: usize = 10;

    pub fn compute(probs: &[f64], outcomes: &[f64], buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let width = 1.0 / buckets as f64;
        let mut sums = vec![(0usize, 0.0f64, 0.0f64); buckets];

        for (p, y) in probs.iter().zip(outcomes) {
            let idx = ((p / width).floor() as usize).min(buckets - 1);
            let entry = &mut sums[idx];
            entry.0 += 1;
            entry.1 += p;
            entry.2 += y;
        }

        let buckets = sums
            .into_iter()
            .enumerate()
            .map(|(i, (count, pred_sum, actual_sum))| CalibrationBucket {
                lower: i as f64 * width,
                upper: (i + 1) as f64 * width,
                count,
                mean_predicted: (count > 0).then(|| pred_sum / count as f64),
                actual_rate: (count > 0).then(|| actual_sum / count as f64),
            })
            .collect();

        CalibrationTable { buckets }
    }

    /// Count-weighted mean of |actual - predicted| across buckets
    pub fn expected_calibration_error(&self) -> f64 {
        let total: usize = self.buckets.iter().map(|b| b.count).sum();
        if total == 0 {
            return 0.0;
        }
        self.buckets
            .iter()
            .filter_map(|b| match (b.mean_predicted, b.actual_rate) {
                (Some(p), Some(a)) => Some(b.count as f64 / total as f64 * (a - p).abs()),
                _ => None,
            })
            .sum()
    }
}

impl fmt::Display for CalibrationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:>7} {:>10} {:>10} {:>8}",
            "Bucket", "Games", "Predicted", "Actual", "Diff"
        )?;
        for b in &self.buckets {
            let label = format!("{:.0}-{:.0}%", b.lower * 100.0, b.upper * 100.0);
            match (b.mean_predicted, b.actual_rate) {
                (Some(p), Some(a)) => writeln!(
                    f,
                    "{:<12} {:>7} {:>9.1}% {:>9.1}% {:>+7.1}%",
                    label,
                    b.count,
                    p * 100.0,
                    a * 100.0,
                    (a - p) * 100.0
                )?,
                _ => writeln!(f, "{:<12} {:>7} {:>10} {:>10} {:>8}", label, 0, "-", "-", "-")?,
            }
        }
        write!(f, "ECE: {:.4}", self.expected_calibration_error())
    }
}

/// Held-out evaluation of every component of the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub classifier: Option<ClassificationMetrics>,
    pub rating: Option<ClassificationMetrics>,
    pub ensemble: Option<ClassificationMetrics>,
    pub regressor: Option<RegressionMetrics>,
    pub calibration: CalibrationTable,
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = |m: &Option<ClassificationMetrics>| match m {
            Some(m) => m.to_string(),
            None => "no contests".to_string(),
        };
        writeln!(f, "Classifier: {}", line(&self.classifier))?;
        writeln!(f, "Rating:     {}", line(&self.rating))?;
        writeln!(f, "Ensemble:   {}", line(&self.ensemble))?;
        match &self.regressor {
            Some(m) => writeln!(f, "Margin:     {}", m)?,
            None => writeln!(f, "Margin:     no contests")?,
        }
        writeln!(f)?;
        write!(f, "{}", self.calibration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_metrics() {
        let mut m = Metrics::new();
        m.update(0.6, 3, 4, 20.0);
        m.update(0.4, 1, 4, 12.0);
        assert!((m.avg_loss() - 0.5).abs() < 1e-6);
        assert_eq!(m.accuracy(), 0.5);
        assert_eq!(m.mae(), 4.0);
    }

    #[test]
    fn test_history() {
        let mut history = TrainingHistory::new();
        let mut a = Metrics::new();
        a.update(0.7, 0, 1, 0.0);
        let mut b = Metrics::new();
        b.update(0.3, 0, 1, 0.0);
        history.record_epoch(0, &a, Some(&a));
        history.record_epoch(1, &b, Some(&b));
        assert_eq!(history.epochs(), 2);
        assert!((history.initial_loss().unwrap() - 0.7).abs() < 1e-6);
        assert!((history.final_loss().unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(history.best_epoch, 1);
    }

    #[test]
    fn test_coin_flip_classification() {
        let m = ClassificationMetrics::compute(&[0.5, 0.5], &[1.0, 0.0]).unwrap();
        assert!((m.log_loss - std::f64::consts::LN_2).abs() < 1e-12);
        assert!((m.brier - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_and_brier() {
        let m = ClassificationMetrics::compute(&[0.9, 0.2, 0.6, 0.3], &[1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(m.count, 4);
        assert_eq!(m.accuracy, 0.5);
        let brier = (0.01 + 0.04 + 0.36 + 0.49) / 4.0;
        assert!((m.brier - brier).abs() < 1e-12);
        assert!(ClassificationMetrics::compute(&[], &[]).is_none());
    }

    #[test]
    fn test_regression_metrics() {
        let perfect = RegressionMetrics::compute(&[1.0, -3.0, 5.0], &[1.0, -3.0, 5.0]).unwrap();
        assert_eq!(perfect.mae, 0.0);
        assert_eq!(perfect.r2, 1.0);

        let m = RegressionMetrics::compute(&[2.0, 2.0], &[0.0, 4.0]).unwrap();
        assert_eq!(m.mae, 2.0);
        assert_eq!(m.rmse, 2.0);
        assert_eq!(m.r2, 0.0);
    }

    #[test]
    fn test_calibration_buckets() {
        let probs = [0.05, 0.12, 0.15, 0.55, 1.0];
        let outcomes = [0.0, 0.0, 1.0, 1.0, 1.0];
        let table = CalibrationTable::compute(&probs, &outcomes, CalibrationTable::DEFAULT_BUCKETS);

        assert_eq!(table.buckets.len(), 10);
        assert_eq!(table.buckets[0].count, 1);
        assert_eq!(table.buckets[1].count, 2);
        assert_eq!(table.buckets[1].actual_rate, Some(0.5));
        assert_eq!(table.buckets[5].count, 1);
        // A certain prediction lands in the top bucket
        assert_eq!(table.buckets[9].count, 1);
        assert!(table.buckets[3].mean_predicted.is_none());

        let text = table.to_string();
        assert!(text.contains("Bucket"));
        assert!(text.contains("ECE"));
    }

    #[test]
    fn test_perfect_calibration_has_zero_error() {
        let table = CalibrationTable::compute(&[1.0, 1.0, 0.0], &[1.0, 1.0, 0.0], 10);
        assert_eq!(table.expected_calibration_error(), 0.0);
    }
}
