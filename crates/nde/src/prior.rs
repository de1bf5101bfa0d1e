//! Prior distributions over the conditioning parameters.
//!
//! The ensemble only needs `log_prior(theta)`; the concrete priors here cover
//! the common cases and can be described in TOML via [`PriorDistribution`]:
//!
//! ```toml
//! [prior]
//! type = "Uniform"
//! lower = [0.0, -1.0]
//! upper = [1.0, 1.0]
//! ```

use burn::prelude::*;
use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};

use crate::error::{NdeError, Result};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Log density over conditioning parameters.
pub trait Prior<B: Backend> {
    /// Number of conditioning parameters.
    fn dim(&self) -> usize;

    /// Log prior of each row of `conditional` (`(batch, n_parameters)` → `(batch,)`).
    ///
    /// # Panics
    ///
    /// Panics if `conditional` does not have [`Prior::dim`] columns; callers
    /// holding untrusted input check the width first, as the evaluator does.
    fn log_prob(&self, conditional: Tensor<B, 2>) -> Tensor<B, 1>;
}

fn row_tensor<B: Backend>(values: &[f64], device: &B::Device) -> Tensor<B, 2> {
    let row: Vec<f32> = values.iter().map(|&v| v as f32).collect();
    Tensor::from_data(TensorData::new(row, [1, values.len()]), device)
}

fn check_width<B: Backend>(conditional: &Tensor<B, 2>, expected: usize) {
    let [_, dim] = conditional.dims();
    assert_eq!(
        dim, expected,
        "prior has {expected} dimensions but conditional has {dim} columns"
    );
}

/// Uniform prior on an axis-aligned box; `-inf` outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformPrior {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl UniformPrior {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        if lower.is_empty() || lower.len() != upper.len() {
            return Err(NdeError::InvalidConfig(format!(
                "uniform prior bounds must be non-empty and equal length, got {} and {}",
                lower.len(),
                upper.len()
            )));
        }
        if let Some(i) = (0..lower.len()).find(|&i| upper[i] <= lower[i]) {
            return Err(NdeError::InvalidConfig(format!(
                "uniform prior dimension {i}: upper {} must exceed lower {}",
                upper[i], lower[i]
            )));
        }
        Ok(Self { lower, upper })
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    fn log_volume(&self) -> f64 {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(lo, hi)| (hi - lo).ln())
            .sum()
    }
}

impl<B: Backend> Prior<B> for UniformPrior {
    fn dim(&self) -> usize {
        UniformPrior::dim(self)
    }

    fn log_prob(&self, conditional: Tensor<B, 2>) -> Tensor<B, 1> {
        check_width(&conditional, self.dim());
        let device = conditional.device();
        let [batch, _] = conditional.dims();

        let lower = row_tensor::<B>(&self.lower, &device);
        let upper = row_tensor::<B>(&self.upper, &device);
        let below = (conditional.clone() - lower).lower_elem(0.0).int().sum_dim(1);
        let above = (conditional - upper).greater_elem(0.0).int().sum_dim(1);
        let outside = (below + above).greater_elem(0);

        Tensor::<B, 2>::full([batch, 1], -self.log_volume(), &device)
            .mask_fill(outside, f32::NEG_INFINITY)
            .squeeze::<1>(1)
    }
}

/// Independent Gaussian prior (diagonal covariance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianPrior {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl GaussianPrior {
    pub fn new(mean: Vec<f64>, std: Vec<f64>) -> Result<Self> {
        if mean.is_empty() || mean.len() != std.len() {
            return Err(NdeError::InvalidConfig(format!(
                "gaussian prior mean/std must be non-empty and equal length, got {} and {}",
                mean.len(),
                std.len()
            )));
        }
        if let Some(i) = std.iter().position(|&s| !(s > 0.0)) {
            return Err(NdeError::InvalidConfig(format!(
                "gaussian prior dimension {i}: std must be positive, got {}",
                std[i]
            )));
        }
        Ok(Self { mean, std })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

impl<B: Backend> Prior<B> for GaussianPrior {
    fn dim(&self) -> usize {
        GaussianPrior::dim(self)
    }

    fn log_prob(&self, conditional: Tensor<B, 2>) -> Tensor<B, 1> {
        check_width(&conditional, self.dim());
        let device = conditional.device();
        let mean = row_tensor::<B>(&self.mean, &device);
        let std = row_tensor::<B>(&self.std, &device);

        let normalizer: f64 = self.std.iter().map(|s| s.ln()).sum::<f64>()
            + 0.5 * self.dim() as f64 * LN_2PI;
        let z = (conditional - mean) / std;
        (z.powf_scalar(2.0).sum_dim(1).mul_scalar(-0.5) - normalizer).squeeze::<1>(1)
    }
}

/// Config-friendly prior selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PriorDistribution {
    Uniform { lower: Vec<f64>, upper: Vec<f64> },
    Gaussian { mean: Vec<f64>, std: Vec<f64> },
}

impl PriorDistribution {
    /// Validate the parameters and build the concrete prior.
    pub fn build(&self) -> Result<AnyPrior> {
        match self {
            Self::Uniform { lower, upper } => {
                UniformPrior::new(lower.clone(), upper.clone()).map(AnyPrior::Uniform)
            }
            Self::Gaussian { mean, std } => {
                GaussianPrior::new(mean.clone(), std.clone()).map(AnyPrior::Gaussian)
            }
        }
    }
}

/// A validated prior of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPrior {
    Uniform(UniformPrior),
    Gaussian(GaussianPrior),
}

impl AnyPrior {
    pub fn dim(&self) -> usize {
        match self {
            Self::Uniform(p) => p.dim(),
            Self::Gaussian(p) => p.dim(),
        }
    }
}

impl<B: Backend> Prior<B> for AnyPrior {
    fn dim(&self) -> usize {
        AnyPrior::dim(self)
    }

    fn log_prob(&self, conditional: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            Self::Uniform(p) => Prior::<B>::log_prob(p, conditional),
            Self::Gaussian(p) => Prior::<B>::log_prob(p, conditional),
        }
    }
}
