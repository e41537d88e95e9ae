//! Single linear head: Input(dim) → output(1)
//!
//! Used both as the logistic classifier (sigmoid applied by the caller) and as
//! the margin regressor.

use burn::module::Module;
use burn::nn::{Initializer, Linear, LinearConfig};
use burn::record::{FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::{ForecastError, Result};

#[derive(Module, Debug)]
pub struct LinearHead<B: Backend> {
    linear: Linear<B>,
}

impl<B: Backend> LinearHead<B> {
    /// Zero-initialised head, so training always starts from the same point
    pub fn new(device: &B::Device, input_dim: usize) -> Self {
        Self::with_initializer(device, input_dim, Initializer::Zeros)
    }

    pub fn with_initializer(device: &B::Device, input_dim: usize, init: Initializer) -> Self {
        LinearHead {
            linear: LinearConfig::new(input_dim, 1)
                .with_initializer(init)
                .init(device),
        }
    }

    /// Forward pass: [batch, dim] → [batch, 1]
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.linear.forward(x)
    }

    /// Copy the parameters out of the backend
    pub fn to_weights(&self) -> Result<HeadWeights> {
        let weights = self
            .linear
            .weight
            .val()
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ForecastError::Model(format!("Failed to read weights: {:?}", e)))?;

        let bias = match &self.linear.bias {
            Some(bias) => bias
                .val()
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| ForecastError::Model(format!("Failed to read bias: {:?}", e)))?
                .first()
                .copied()
                .unwrap_or(0.0),
            None => 0.0,
        };

        Ok(HeadWeights { weights, bias })
    }

    /// Save model to file
    pub fn save(&self, path: &str) -> Result<()>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        let recorder = burn::record::NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        recorder
            .record(self.clone().into_record(), path.into())
            .map_err(|e| ForecastError::Io(std::io::Error::other(e.to_string())))
    }

    /// Load model from file
    pub fn load(device: &B::Device, path: &str, input_dim: usize) -> Result<Self>
    where
        B::FloatElem: serde::Serialize + serde::de::DeserializeOwned,
        B::IntElem: serde::Serialize + serde::de::DeserializeOwned,
    {
        let recorder = burn::record::NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let record = recorder
            .load(path.into(), device)
            .map_err(|e| ForecastError::Io(std::io::Error::other(e.to_string())))?;

        Ok(Self::new(device, input_dim).load_record(record))
    }
}

/// Plain copy of a head's parameters
///
/// Evaluates without a backend, so it can be shared across threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadWeights {
    pub weights: Vec<f32>,
    pub bias: f32,
}

impl HeadWeights {
    pub fn dim(&self) -> usize {
        self.weights.len()
    }

    /// `bias + w · x` for one (already normalised) row
    pub fn apply(&self, row: &[f32]) -> f64 {
        self.weights
            .iter()
            .zip(row.iter())
            .fold(self.bias as f64, |acc, (w, x)| acc + (*w as f64) * (*x as f64))
    }
}

/// Logistic function
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
