//! Training samples for completed contests
//!
//! One sample per completed contest, with features read through the
//! point-in-time lookup and labels taken from the final score.

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::snapshot::PointInTimeLookup;
use crate::features::vector::{FeatureBuilder, FeatureLayout};
use crate::{Contest, ContestId, ContestKey, ForecastError, Outcome, Result};

/// A labelled feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub contest_id: ContestId,
    pub key: ContestKey,
    pub features: Vec<f32>,
    /// 1 for a home win, 0 otherwise (draws count as non-wins)
    pub home_win: f32,
    /// Home minus away points
    pub margin: f32,
    /// Pre-contest ratings
    pub home_rating: f64,
    pub away_rating: f64,
}

/// Labelled samples in contest order
#[derive(Debug, Clone)]
pub struct ContestDataset {
    samples: Vec<TrainingSample>,
    feature_names: Vec<String>,
}

impl ContestDataset {
    /// Build samples for every completed contest
    ///
    /// Scheduled contests are skipped. Rows are built in parallel and returned
    /// in contest key order.
    pub fn build<L>(
        contests: &[Contest],
        lookup: &L,
        layout: &FeatureLayout,
        initial_rating: f64,
    ) -> Result<Self>
    where
        L: PointInTimeLookup + Sync + ?Sized,
    {
        let builder = FeatureBuilder::new(lookup, layout, initial_rating);

        let mut samples = contests
            .par_iter()
            .filter_map(|contest| contest.result().map(|result| (contest, result)))
            .map(|(contest, result)| {
                let features = builder.build(contest)?;
                Ok(TrainingSample {
                    contest_id: contest.id,
                    key: contest.key(),
                    home_rating: features.home.rating,
                    away_rating: features.away.rating,
                    features: features.values,
                    home_win: if result.home_outcome() == Outcome::Win { 1.0 } else { 0.0 },
                    margin: result.margin() as f32,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        samples.sort_by_key(|s| s.key);

        log::debug!("Built {} samples from {} contests", samples.len(), contests.len());

        Ok(ContestDataset {
            samples,
            feature_names: layout.names().to_vec(),
        })
    }

    /// Create dataset directly from pre-computed samples
    pub fn from_samples(samples: Vec<TrainingSample>, feature_names: Vec<String>) -> Self {
        ContestDataset {
            samples,
            feature_names,
        }
    }

    /// Split at a date: training strictly before `cutoff`, held-out on or after
    pub fn temporal_split(self, cutoff: NaiveDate) -> Result<(Self, Self)> {
        let (train, heldout): (Vec<_>, Vec<_>) = self
            .samples
            .into_iter()
            .partition(|s| s.key.date < cutoff);

        let last_train = train.iter().map(|s| s.key.date).max();
        let first_heldout = heldout.iter().map(|s| s.key.date).min();
        if let (Some(last), Some(first)) = (last_train, first_heldout) {
            if last >= first {
                return Err(ForecastError::OrderingViolation {
                    previous: format!("held-out contest on {}", first),
                    found: format!("training contest on {}", last),
                });
            }
        }

        log::info!(
            "Temporal split at {}: {} training, {} held-out",
            cutoff,
            train.len(),
            heldout.len()
        );

        Ok((
            ContestDataset {
                samples: train,
                feature_names: self.feature_names.clone(),
            },
            ContestDataset {
                samples: heldout,
                feature_names: self.feature_names,
            },
        ))
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn dim(&self) -> usize {
        self.feature_names.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-feature z-score parameters, computed from training samples only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureNormalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl FeatureNormalization {
    pub fn from_dataset(dataset: &ContestDataset) -> Self {
        let dim = dataset.dim();
        let mut sum = vec![0.0f64; dim];
        let mut sum_sq = vec![0.0f64; dim];

        for sample in dataset.samples() {
            for (j, &v) in sample.features.iter().enumerate().take(dim) {
                sum[j] += v as f64;
                sum_sq[j] += (v as f64) * (v as f64);
            }
        }

        let n = dataset.len().max(1) as f64;
        let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
        let std = sum_sq
            .iter()
            .zip(mean.iter())
            .map(|(sq, m)| ((sq / n - m * m).max(0.0).sqrt() as f32).max(0.001))
            .collect();

        FeatureNormalization {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            std,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Normalize one feature row
    pub fn normalize_row(&self, row: &[f32]) -> Vec<f32> {
        row.iter()
            .zip(self.mean.iter().zip(self.std.iter()))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    /// Normalize a [batch, dim] tensor using z-score: (x - mean) / std
    pub fn normalize<B: Backend>(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = features.device();
        let mean = Tensor::<B, 1>::from_floats(self.mean.as_slice(), &device).unsqueeze_dim(0);
        let std = Tensor::<B, 1>::from_floats(self.std.as_slice(), &device).unsqueeze_dim(0);
        (features - mean) / std
    }
}

/// Margin normalization parameters (computed from training data)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginNormalization {
    pub mean: f32,
    pub std: f32,
}

impl Default for MarginNormalization {
    fn default() -> Self {
        MarginNormalization {
            mean: 0.0,
            std: 12.0,
        }
    }
}

impl MarginNormalization {
    pub fn from_dataset(dataset: &ContestDataset) -> Self {
        if dataset.is_empty() {
            return Self::default();
        }

        let margins: Vec<f32> = dataset.samples().iter().map(|s| s.margin).collect();
        let n = margins.len() as f32;
        let mean = margins.iter().sum::<f32>() / n;
        let variance = margins.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / n;
        let std = variance.sqrt().max(1.0);

        MarginNormalization { mean, std }
    }

    pub fn normalize(&self, margin: f32) -> f32 {
        (margin - self.mean) / self.std
    }

    pub fn denormalize(&self, normalized: f32) -> f32 {
        normalized * self.std + self.mean
    }
}

/// Batch of samples for training
#[derive(Debug, Clone)]
pub struct ContestBatch<B: Backend> {
    /// Raw features: [batch, dim]
    pub features: Tensor<B, 2>,
    /// Target win labels: [batch]
    pub home_win: Tensor<B, 1>,
    /// Target margins: [batch]
    pub margin: Tensor<B, 1>,
}

/// Batcher for creating training batches
#[derive(Debug, Clone, Default)]
pub struct ContestBatcher;

impl<B: Backend> Batcher<B, TrainingSample, ContestBatch<B>> for ContestBatcher {
    fn batch(&self, items: Vec<TrainingSample>, device: &B::Device) -> ContestBatch<B> {
        let batch_size = items.len();
        let dim = items.first().map(|s| s.features.len()).unwrap_or(0);

        let mut feature_data = Vec::with_capacity(batch_size * dim);
        let mut home_win_data = Vec::with_capacity(batch_size);
        let mut margin_data = Vec::with_capacity(batch_size);

        for sample in &items {
            feature_data.extend_from_slice(&sample.features);
            home_win_data.push(sample.home_win);
            margin_data.push(sample.margin);
        }

        let features = Tensor::<B, 1>::from_floats(feature_data.as_slice(), device)
            .reshape([batch_size, dim]);
        let home_win = Tensor::<B, 1>::from_floats(home_win_data.as_slice(), device);
        let margin = Tensor::<B, 1>::from_floats(margin_data.as_slice(), device);

        ContestBatch {
            features,
            home_win,
            margin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::walk_forward::WalkForwardEngine;
    use crate::{RatingConfig, TeamId};
    use burn::backend::NdArray;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn contests() -> Vec<Contest> {
        vec![
            Contest::completed(1, date(2023, 11, 1), TeamId(1), TeamId(2), 110, 100),
            Contest::completed(2, date(2023, 11, 3), TeamId(2), TeamId(3), 98, 104),
            Contest::completed(3, date(2023, 12, 20), TeamId(3), TeamId(1), 90, 95),
            Contest::completed(4, date(2024, 1, 2), TeamId(1), TeamId(2), 101, 101),
            Contest::completed(5, date(2024, 1, 4), TeamId(2), TeamId(3), 120, 99),
            Contest::scheduled(6, date(2024, 1, 8), TeamId(3), TeamId(1)),
        ]
    }

    fn dataset() -> ContestDataset {
        let contests = contests();
        let log = WalkForwardEngine::new(
            RatingConfig {
                k_factor: 32.0,
                initial_rating: 1500.0,
            },
            vec![5, 10, 20],
        )
        .run(&contests)
        .unwrap();
        let layout = FeatureLayout::new(&[5, 10, 20]);
        ContestDataset::build(&contests, &log, &layout, 1500.0).unwrap()
    }

    #[test]
    fn test_build_skips_scheduled_and_keeps_order() {
        let dataset = dataset();
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.dim(), 38);
        let ids: Vec<i64> = dataset.samples().iter().map(|s| s.contest_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(dataset.samples().iter().all(|s| s.features.len() == 38));
    }

    #[test]
    fn test_labels() {
        let dataset = dataset();
        let s = dataset.samples();
        assert_eq!(s[0].home_win, 1.0);
        assert_eq!(s[0].margin, 10.0);
        assert_eq!(s[1].home_win, 0.0);
        assert_eq!(s[3].home_win, 0.0);
        assert_eq!(s[3].margin, 0.0);
    }

    #[test]
    fn test_temporal_split() {
        let (train, heldout) = dataset().temporal_split(date(2024, 1, 1)).unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(heldout.len(), 2);
        assert!(train.samples().iter().all(|s| s.key.date < date(2024, 1, 1)));
        assert!(heldout.samples().iter().all(|s| s.key.date >= date(2024, 1, 1)));
        assert_eq!(train.feature_names(), heldout.feature_names());
    }

    #[test]
    fn test_split_with_cutoff_before_all_data() {
        let (train, heldout) = dataset().temporal_split(date(2020, 1, 1)).unwrap();
        assert!(train.is_empty());
        assert_eq!(heldout.len(), 5);
    }

    #[test]
    fn test_feature_normalization() {
        let names = vec!["a".to_string(), "b".to_string()];
        let sample = |a: f32, b: f32| TrainingSample {
            contest_id: ContestId(1),
            key: ContestKey {
                date: date(2024, 1, 1),
                seq: 1,
            },
            features: vec![a, b],
            home_win: 1.0,
            margin: 0.0,
            home_rating: 1500.0,
            away_rating: 1500.0,
        };
        let dataset = ContestDataset::from_samples(vec![sample(1.0, 5.0), sample(3.0, 5.0)], names);
        let norm = FeatureNormalization::from_dataset(&dataset);

        assert!((norm.mean[0] - 2.0).abs() < 1e-6);
        assert!((norm.std[0] - 1.0).abs() < 1e-6);
        // Constant column keeps the floor
        assert_eq!(norm.std[1], 0.001);
        assert_eq!(norm.normalize_row(&[3.0, 5.0]), vec![1.0, 0.0]);
    }

    #[test]
    fn test_margin_normalization() {
        let dataset = dataset();
        let norm = MarginNormalization::from_dataset(&dataset);
        assert!(norm.std >= 1.0);
        let x = norm.normalize(7.0);
        assert!((norm.denormalize(x) - 7.0).abs() < 1e-4);
    }

    #[test]
    fn test_batcher_shapes() {
        let dataset = dataset();
        let device = Default::default();
        let batch: ContestBatch<NdArray> =
            ContestBatcher.batch(dataset.samples().to_vec(), &device);
        assert_eq!(batch.features.dims(), [5, 38]);
        assert_eq!(batch.home_win.dims(), [5]);
        assert_eq!(batch.margin.dims(), [5]);
    }
}
