//! Ensemble training: logistic classifier and margin regressor
//!
//! Both heads are single linear layers trained with full-batch SGD on
//! z-score normalised features. Normalisation statistics come from the
//! training split only and are stored with the model.

use burn::data::dataloader::batcher::Batcher;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::dataset::{
    ContestBatch, ContestBatcher, ContestDataset, FeatureNormalization, MarginNormalization,
};
use crate::features::vector::FeatureLayout;
use crate::model::linear::LinearHead;
use crate::predict::inference::EnsemblePredictor;
use crate::training::metrics::{
    CalibrationTable, ClassificationMetrics, EvaluationReport, Metrics, RegressionMetrics,
    TrainingHistory,
};
use crate::{Config, EnsembleConfig, ForecastError, Result, TrainingConfig};

/// Losses at or below this count as already converged
const CONVERGED_LOSS: f64 = 1e-9;

/// Epochs between progress lines
const LOG_EVERY: usize = 50;

/// Everything needed besides the head weights to serve a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub feature_names: Vec<String>,
    pub windows: Vec<usize>,
    pub initial_rating: f64,
    pub k_factor: f64,
    pub feature_norm: FeatureNormalization,
    pub margin_norm: MarginNormalization,
    pub train_cutoff: NaiveDate,
    pub train_samples: usize,
    pub heldout_samples: usize,
    pub epochs: usize,
    pub classifier_loss: (f64, f64),
    pub regressor_loss: (f64, f64),
    pub evaluation: Option<EvaluationReport>,
}

impl ModelManifest {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ForecastError::Parse(format!("Failed to parse model manifest {}: {}", path, e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ForecastError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Trained heads plus their manifest
pub struct TrainedEnsemble<B: Backend> {
    pub classifier: LinearHead<B>,
    pub regressor: LinearHead<B>,
    pub manifest: ModelManifest,
}

impl<B: Backend> TrainedEnsemble<B> {
    /// Plain-data predictor for serving
    pub fn to_predictor(&self, weights: EnsembleConfig) -> Result<EnsemblePredictor> {
        EnsemblePredictor::from_parts(
            self.classifier.to_weights()?,
            self.regressor.to_weights()?,
            self.manifest.feature_norm.clone(),
            self.manifest.margin_norm,
            FeatureLayout::new(&self.manifest.windows),
            self.manifest.initial_rating,
            weights,
        )
    }

    /// Write `<path>_classifier.mpk`, `<path>_regressor.mpk` and `<path>.json`
    pub fn save(&self, path: &str) -> Result<()>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.classifier.save(&format!("{path}_classifier"))?;
        self.regressor.save(&format!("{path}_regressor"))?;
        self.manifest.save(&format!("{path}.json"))?;
        log::info!("Model saved to {}", path);
        Ok(())
    }
}

/// Trainer for the ensemble heads
pub struct EnsembleTrainer<B: AutodiffBackend> {
    training: TrainingConfig,
    ensemble: EnsembleConfig,
    windows: Vec<usize>,
    initial_rating: f64,
    k_factor: f64,
    device: B::Device,
}

impl<B: AutodiffBackend> EnsembleTrainer<B> {
    pub fn new(config: &Config, device: B::Device) -> Self {
        EnsembleTrainer {
            training: config.training.clone(),
            ensemble: config.ensemble.clone(),
            windows: config.form.windows.clone(),
            initial_rating: config.rating.initial_rating,
            k_factor: config.rating.k_factor,
            device,
        }
    }

    /// Train both heads and evaluate them on the held-out split
    ///
    /// Nothing is returned unless both heads trained successfully.
    pub fn train(
        &self,
        train: &ContestDataset,
        heldout: &ContestDataset,
    ) -> Result<TrainedEnsemble<B::InnerBackend>> {
        if train.is_empty() {
            return Err(ForecastError::TrainingFailed {
                model: "classifier".to_string(),
                reason: "training set is empty".to_string(),
            });
        }
        let layout = FeatureLayout::new(&self.windows);
        if train.feature_names() != layout.names() {
            return Err(ForecastError::FeatureMismatch {
                expected: format!("{} features", layout.dim()),
                found: format!("{} features", train.dim()),
            });
        }

        let feature_norm = FeatureNormalization::from_dataset(train);
        let margin_norm = MarginNormalization::from_dataset(train);
        log::debug!(
            "Feature normalization: mean={:?}, std={:?}",
            feature_norm.mean,
            feature_norm.std
        );
        log::info!(
            "Margin normalization: mean={:.2}, std={:.2}",
            margin_norm.mean,
            margin_norm.std
        );

        // Full batch, no shuffle
        let batch: ContestBatch<B> = ContestBatcher.batch(train.samples().to_vec(), &self.device);
        let val_batch: Option<ContestBatch<B>> = (!heldout.is_empty())
            .then(|| ContestBatcher.batch(heldout.samples().to_vec(), &self.device));

        let (classifier, classifier_history) =
            self.train_classifier(train.dim(), &batch, val_batch.as_ref(), &feature_norm)?;
        let (regressor, regressor_history) = self.train_regressor(
            train.dim(),
            &batch,
            val_batch.as_ref(),
            &feature_norm,
            margin_norm,
        )?;

        let loss_pair = |h: &TrainingHistory| {
            (
                h.initial_loss().unwrap_or(f64::NAN),
                h.final_loss().unwrap_or(f64::NAN),
            )
        };

        let mut trained = TrainedEnsemble {
            classifier: classifier.valid(),
            regressor: regressor.valid(),
            manifest: ModelManifest {
                feature_names: train.feature_names().to_vec(),
                windows: self.windows.clone(),
                initial_rating: self.initial_rating,
                k_factor: self.k_factor,
                feature_norm,
                margin_norm,
                train_cutoff: self.training.train_cutoff,
                train_samples: train.len(),
                heldout_samples: heldout.len(),
                epochs: self.training.epochs,
                classifier_loss: loss_pair(&classifier_history),
                regressor_loss: loss_pair(&regressor_history),
                evaluation: None,
            },
        };

        if !heldout.is_empty() {
            let predictor = trained.to_predictor(self.ensemble.clone())?;
            let report = evaluate(&predictor, heldout)?;
            log::info!("Held-out evaluation:\n{}", report);
            trained.manifest.evaluation = Some(report);
        } else {
            log::warn!("No held-out contests on or after {}", self.training.train_cutoff);
        }

        Ok(trained)
    }

    fn train_classifier(
        &self,
        dim: usize,
        batch: &ContestBatch<B>,
        val_batch: Option<&ContestBatch<B>>,
        feature_norm: &FeatureNormalization,
    ) -> Result<(LinearHead<B>, TrainingHistory)> {
        let mut model = LinearHead::<B>::new(&self.device, dim);
        let mut optimizer = SgdConfig::new().init::<B, LinearHead<B>>();
        let mut history = TrainingHistory::new();

        let features = feature_norm.normalize(batch.features.clone());
        let targets: Tensor<B, 2> = batch.home_win.clone().unsqueeze_dim(1);
        let val = val_batch.map(|b| {
            (
                feature_norm.normalize(b.features.clone()),
                b.home_win.clone().unsqueeze_dim::<2>(1),
            )
        });

        log::info!("Training classifier for {} epochs", self.training.epochs);

        for epoch in 0..self.training.epochs {
            let logits = model.forward(features.clone());
            let loss = binary_cross_entropy(logits.clone(), targets.clone());
            let loss_val: f32 = loss.clone().into_scalar().elem();
            check_finite("classifier", epoch, loss_val)?;

            let mut train_metrics = Metrics::new();
            let correct = count_correct(logits, &targets)?;
            train_metrics.update(loss_val, correct, batch.home_win.dims()[0], 0.0);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(self.training.learning_rate, model, grads);

            let val_metrics = match &val {
                Some((x, y)) => {
                    let logits = model.forward(x.clone());
                    let loss: f32 = binary_cross_entropy(logits.clone(), y.clone())
                        .into_scalar()
                        .elem();
                    let mut m = Metrics::new();
                    m.update(loss, count_correct(logits, y)?, y.dims()[0], 0.0);
                    Some(m)
                }
                None => None,
            };

            history.record_epoch(epoch, &train_metrics, val_metrics.as_ref());
            if epoch % LOG_EVERY == 0 || epoch + 1 == self.training.epochs {
                match &val_metrics {
                    Some(v) => log::debug!(
                        "Classifier epoch {}/{}: Train: {} | Val: {}",
                        epoch + 1,
                        self.training.epochs,
                        train_metrics,
                        v
                    ),
                    None => log::debug!(
                        "Classifier epoch {}/{}: Train: {}",
                        epoch + 1,
                        self.training.epochs,
                        train_metrics
                    ),
                }
            }
        }

        let final_loss: f32 = binary_cross_entropy(model.forward(features), targets)
            .into_scalar()
            .elem();
        check_converged("classifier", &history, final_loss as f64)?;
        history.train_losses.push(final_loss as f64);

        log::info!(
            "Classifier trained: loss {:.4} -> {:.4}",
            history.initial_loss().unwrap_or(f64::NAN),
            final_loss
        );
        Ok((model, history))
    }

    fn train_regressor(
        &self,
        dim: usize,
        batch: &ContestBatch<B>,
        val_batch: Option<&ContestBatch<B>>,
        feature_norm: &FeatureNormalization,
        margin_norm: MarginNormalization,
    ) -> Result<(LinearHead<B>, TrainingHistory)> {
        let mut model = LinearHead::<B>::new(&self.device, dim);
        let mut optimizer = SgdConfig::new().init::<B, LinearHead<B>>();
        let mut history = TrainingHistory::new();

        let normalize_targets = |margin: Tensor<B, 1>| -> Tensor<B, 2> {
            margin
                .sub_scalar(margin_norm.mean)
                .div_scalar(margin_norm.std)
                .unsqueeze_dim(1)
        };
        let features = feature_norm.normalize(batch.features.clone());
        let targets = normalize_targets(batch.margin.clone());
        let val = val_batch.map(|b| {
            (
                feature_norm.normalize(b.features.clone()),
                normalize_targets(b.margin.clone()),
            )
        });

        log::info!("Training margin regressor for {} epochs", self.training.epochs);

        for epoch in 0..self.training.epochs {
            let preds = model.forward(features.clone());
            let loss = mean_squared_error(preds.clone(), targets.clone());
            let loss_val: f32 = loss.clone().into_scalar().elem();
            check_finite("regressor", epoch, loss_val)?;

            let mut train_metrics = Metrics::new();
            let abs_err = margin_abs_error(preds, &targets, margin_norm)?;
            train_metrics.update(loss_val, 0, batch.margin.dims()[0], abs_err);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(self.training.margin_learning_rate, model, grads);

            let val_metrics = match &val {
                Some((x, y)) => {
                    let preds = model.forward(x.clone());
                    let loss: f32 = mean_squared_error(preds.clone(), y.clone())
                        .into_scalar()
                        .elem();
                    let mut m = Metrics::new();
                    m.update(loss, 0, y.dims()[0], margin_abs_error(preds, y, margin_norm)?);
                    Some(m)
                }
                None => None,
            };

            history.record_epoch(epoch, &train_metrics, val_metrics.as_ref());
            if epoch % LOG_EVERY == 0 || epoch + 1 == self.training.epochs {
                log::debug!(
                    "Regressor epoch {}/{}: Train: {}",
                    epoch + 1,
                    self.training.epochs,
                    train_metrics
                );
            }
        }

        let final_loss: f32 = mean_squared_error(model.forward(features), targets)
            .into_scalar()
            .elem();
        check_converged("regressor", &history, final_loss as f64)?;
        history.train_losses.push(final_loss as f64);

        log::info!(
            "Regressor trained: loss {:.4} -> {:.4}",
            history.initial_loss().unwrap_or(f64::NAN),
            final_loss
        );
        Ok((model, history))
    }
}

/// Score a dataset with a predictor and compare against the results
pub fn evaluate(predictor: &EnsemblePredictor, dataset: &ContestDataset) -> Result<EvaluationReport> {
    let mut classifier = Vec::with_capacity(dataset.len());
    let mut rating = Vec::with_capacity(dataset.len());
    let mut ensemble = Vec::with_capacity(dataset.len());
    let mut margins = Vec::with_capacity(dataset.len());
    let mut outcomes = Vec::with_capacity(dataset.len());
    let mut actual_margins = Vec::with_capacity(dataset.len());

    for sample in dataset.samples() {
        let scores = predictor.score(&sample.features, sample.home_rating, sample.away_rating)?;
        classifier.push(scores.classifier_prob);
        rating.push(scores.rating_prob);
        ensemble.push(scores.ensemble_prob);
        margins.push(scores.point_diff);
        outcomes.push(sample.home_win as f64);
        actual_margins.push(sample.margin as f64);
    }

    Ok(EvaluationReport {
        classifier: ClassificationMetrics::compute(&classifier, &outcomes),
        rating: ClassificationMetrics::compute(&rating, &outcomes),
        ensemble: ClassificationMetrics::compute(&ensemble, &outcomes),
        regressor: RegressionMetrics::compute(&margins, &actual_margins),
        calibration: CalibrationTable::compute(
            &ensemble,
            &outcomes,
            CalibrationTable::DEFAULT_BUCKETS,
        ),
    })
}

/// Binary cross-entropy on logits, probabilities clamped away from 0 and 1
fn binary_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let probs = sigmoid(logits).clamp(1e-7, 1.0 - 1e-7);
    let loss = targets.clone().neg() * probs.clone().log()
        - (targets.neg() + 1.0) * (probs.neg() + 1.0).log();
    loss.mean()
}

fn mean_squared_error<B: Backend>(preds: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    (preds - targets).powf_scalar(2.0).mean()
}

fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ForecastError::Model(format!("Failed to read tensor: {:?}", e)))
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: &Tensor<B, 2>) -> Result<usize> {
    let logits = to_vec(logits)?;
    let targets = to_vec(targets.clone())?;
    Ok(logits
        .iter()
        .zip(&targets)
        .filter(|(z, y)| (**z >= 0.0) == (**y >= 0.5))
        .count())
}

/// Sum of absolute margin errors in points
fn margin_abs_error<B: Backend>(
    preds: Tensor<B, 2>,
    targets: &Tensor<B, 2>,
    norm: MarginNormalization,
) -> Result<f64> {
    let preds = to_vec(preds)?;
    let targets = to_vec(targets.clone())?;
    Ok(preds
        .iter()
        .zip(&targets)
        .map(|(p, t)| ((p - t) * norm.std).abs() as f64)
        .sum())
}

fn check_finite(model: &str, epoch: usize, loss: f32) -> Result<()> {
    if loss.is_finite() {
        Ok(())
    } else {
        Err(ForecastError::TrainingFailed {
            model: model.to_string(),
            reason: format!("loss became {} at epoch {}", loss, epoch + 1),
        })
    }
}

fn check_converged(model: &str, history: &TrainingHistory, final_loss: f64) -> Result<()> {
    let initial = history.initial_loss().ok_or_else(|| ForecastError::TrainingFailed {
        model: model.to_string(),
        reason: "no epochs were run".to_string(),
    })?;

    if !final_loss.is_finite() {
        return Err(ForecastError::TrainingFailed {
            model: model.to_string(),
            reason: format!("final loss is {}", final_loss),
        });
    }
    if final_loss >= initial && initial > CONVERGED_LOSS {
        return Err(ForecastError::TrainingFailed {
            model: model.to_string(),
            reason: format!("loss did not decrease ({:.6} -> {:.6})", initial, final_loss),
        });
    }
    Ok(())
}
