//! Ensemble inference for contests

use burn::backend::NdArray;
use rayon::prelude::*;
use std::path::Path;

use crate::data::dataset::{FeatureNormalization, MarginNormalization};
use crate::data::snapshot::PointInTimeLookup;
use crate::features::elo::rating_probability;
use crate::features::vector::{FeatureBuilder, FeatureLayout};
use crate::model::linear::{sigmoid, HeadWeights, LinearHead};
use crate::training::trainer::ModelManifest;
use crate::{Contest, EnsembleConfig, ForecastError, PredictionRecord, Result};

/// The four numbers produced for one feature vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleScores {
    pub classifier_prob: f64,
    pub rating_prob: f64,
    pub ensemble_prob: f64,
    pub point_diff: f64,
}

/// Trained ensemble in plain data, shareable across threads
#[derive(Debug, Clone)]
pub struct EnsemblePredictor {
    classifier: HeadWeights,
    regressor: HeadWeights,
    feature_norm: FeatureNormalization,
    margin_norm: MarginNormalization,
    layout: FeatureLayout,
    initial_rating: f64,
    weights: EnsembleConfig,
}

impl EnsemblePredictor {
    pub fn from_parts(
        classifier: HeadWeights,
        regressor: HeadWeights,
        feature_norm: FeatureNormalization,
        margin_norm: MarginNormalization,
        layout: FeatureLayout,
        initial_rating: f64,
        weights: EnsembleConfig,
    ) -> Result<Self> {
        let dim = layout.dim();
        for (what, found) in [
            ("classifier", classifier.dim()),
            ("regressor", regressor.dim()),
            ("normalization", feature_norm.dim()),
        ] {
            if found != dim {
                return Err(ForecastError::FeatureMismatch {
                    expected: format!("{} inputs", dim),
                    found: format!("{} with {} inputs", what, found),
                });
            }
        }

        Ok(EnsemblePredictor {
            classifier,
            regressor,
            feature_norm,
            margin_norm,
            layout,
            initial_rating,
            weights,
        })
    }

    /// Load a saved ensemble, refusing one trained on a different feature layout
    pub fn load(path: &str, weights: EnsembleConfig, layout: &FeatureLayout) -> Result<Self> {
        let manifest_path = format!("{path}.json");
        if !Path::new(&manifest_path).exists() {
            return Err(ForecastError::NoModel);
        }
        let manifest = ModelManifest::load(&manifest_path)?;

        if manifest.feature_names != layout.names() {
            return Err(ForecastError::FeatureMismatch {
                expected: format!("{} features {:?}", layout.dim(), layout.names()),
                found: format!(
                    "{} features {:?}",
                    manifest.feature_names.len(),
                    manifest.feature_names
                ),
            });
        }

        let device = Default::default();
        let dim = layout.dim();
        let classifier =
            LinearHead::<NdArray>::load(&device, &format!("{path}_classifier"), dim)?.to_weights()?;
        let regressor =
            LinearHead::<NdArray>::load(&device, &format!("{path}_regressor"), dim)?.to_weights()?;

        log::info!(
            "Loaded model from {} (trained on {} contests before {})",
            path,
            manifest.train_samples,
            manifest.train_cutoff
        );

        Self::from_parts(
            classifier,
            regressor,
            manifest.feature_norm,
            manifest.margin_norm,
            layout.clone(),
            manifest.initial_rating,
            weights,
        )
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn initial_rating(&self) -> f64 {
        self.initial_rating
    }

    /// Score one raw (unnormalised) feature vector
    pub fn score(&self, features: &[f32], home_rating: f64, away_rating: f64) -> Result<EnsembleScores> {
        if features.len() != self.layout.dim() {
            return Err(ForecastError::FeatureMismatch {
                expected: format!("{} features", self.layout.dim()),
                found: format!("{} features", features.len()),
            });
        }

        let row = self.feature_norm.normalize_row(features);
        let classifier_prob = sigmoid(self.classifier.apply(&row));
        let point_diff = self.margin_norm.denormalize(self.regressor.apply(&row) as f32) as f64;
        let rating_prob = rating_probability(home_rating, away_rating);
        let ensemble_prob =
            self.weights.model_weight * classifier_prob + self.weights.rating_weight * rating_prob;

        Ok(EnsembleScores {
            classifier_prob,
            rating_prob,
            ensemble_prob,
            point_diff,
        })
    }

    /// Predict a scheduled or completed contest from the state strictly before it
    pub fn predict<L: PointInTimeLookup + ?Sized>(
        &self,
        contest: &Contest,
        lookup: &L,
    ) -> Result<PredictionRecord> {
        let builder = FeatureBuilder::new(lookup, &self.layout, self.initial_rating);
        let features = builder.build(contest)?;
        let scores = self.score(&features.values, features.home.rating, features.away.rating)?;

        Ok(PredictionRecord {
            contest_id: contest.id,
            date: contest.date,
            home: contest.home,
            away: contest.away,
            ensemble_prob: scores.ensemble_prob,
            classifier_prob: scores.classifier_prob,
            rating_prob: scores.rating_prob,
            point_diff: scores.point_diff,
            home_rating: features.home.rating,
            away_rating: features.away.rating,
        })
    }

    /// Predict many contests in parallel, keeping input order
    pub fn predict_many<L>(&self, contests: &[Contest], lookup: &L) -> Result<Vec<PredictionRecord>>
    where
        L: PointInTimeLookup + Sync + ?Sized,
    {
        contests
            .par_iter()
            .map(|contest| self.predict(contest, lookup))
            .collect()
    }
}
