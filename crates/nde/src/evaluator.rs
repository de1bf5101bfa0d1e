//! Ensemble evaluation: per-member and weighted densities, samples, and
//! combinations with the prior.
//!
//! Every method takes an optional stack; `None` means the ensemble's current
//! stack. Weights are looked up by ensemble index and are not renormalized
//! over a subset, so `weighted_prob` over part of the ensemble is a partial
//! mixture.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::density::ConditionalDensity;
use crate::ensemble::Nde;
use crate::error::{NdeError, Result};
use crate::prior::Prior;

/// Weighted mean and spread of per-member samples, each `(n, batch, n_data)`.
#[derive(Debug, Clone)]
pub struct WeightedMoments<B: Backend> {
    pub mean: Tensor<B, 3>,
    pub variance: Tensor<B, 3>,
}

/// Moments over the leading (member) axis of `samples` `(members, n, batch, n_data)`.
///
/// `mean = Σ w_i x_i / Σ w_i` and `variance = Σ (x_i - mean)² / Σ w_i`; the
/// squared deviations are not weighted and no bias correction is applied.
///
/// # Panics
///
/// Panics if `weights` does not have one entry per member. [`Nde::variance`]
/// checks this and returns [`NdeError::InvalidData`] instead.
pub fn weighted_moments<B: Backend>(samples: Tensor<B, 4>, weights: &[f64]) -> WeightedMoments<B> {
    let [members, _, _, _] = samples.dims();
    assert_eq!(members, weights.len(), "one weight per member");
    let weight_sum: f64 = weights.iter().sum();

    let w: Vec<f32> = weights.iter().map(|&w| w as f32).collect();
    let w = Tensor::<B, 4>::from_data(TensorData::new(w, [members, 1, 1, 1]), &samples.device());

    let mean = (samples.clone() * w).sum_dim(0).div_scalar(weight_sum);
    let variance = (samples - mean.clone())
        .powf_scalar(2.0)
        .sum_dim(0)
        .div_scalar(weight_sum);

    WeightedMoments {
        mean: mean.squeeze::<3>(0),
        variance: variance.squeeze::<3>(0),
    }
}

impl<B, M, P> Nde<B, M, P>
where
    B: Backend,
    M: ConditionalDensity<B>,
    P: Prior<B>,
{
    /// The stack to evaluate: `stack` if given, else the current one. Must be
    /// non-empty with in-range indices.
    pub fn resolve_stack(&self, stack: Option<&[usize]>) -> Result<Vec<usize>> {
        let stack = stack.unwrap_or(&self.stack);
        if stack.is_empty() {
            return Err(NdeError::EmptyStack);
        }
        self.stack_manager.validate(stack)?;
        Ok(stack.to_vec())
    }

    /// `data` and `conditional` must pair up row for row.
    fn check_rows(&self, data: &Tensor<B, 2>, conditional: &Tensor<B, 2>) -> Result<()> {
        let (n_data, n_conditional) = (data.dims()[0], conditional.dims()[0]);
        if n_data != n_conditional {
            return Err(NdeError::InvalidData(format!(
                "{n_data} data rows but {n_conditional} conditional rows"
            )));
        }
        Ok(())
    }

    /// Log prior of `conditional`, after checking its width against the prior.
    fn log_prior(&self, conditional: Tensor<B, 2>) -> Result<Tensor<B, 1>> {
        let [_, width] = conditional.dims();
        let expected = self.prior.dim();
        if width != expected {
            return Err(NdeError::InvalidData(format!(
                "conditional has {width} columns, the prior expects {expected}"
            )));
        }
        Ok(self.prior.log_prob(conditional))
    }

    fn stack_weights(&self, stack: &[usize]) -> Tensor<B, 2> {
        let w: Vec<f32> = stack.iter().map(|&i| self.weighting[i] as f32).collect();
        Tensor::from_data(TensorData::new(w, [stack.len(), 1]), &self.device)
    }

    /// Log density under each member, `(stack, batch)`. Unweighted.
    pub fn log_prob(
        &self,
        data: Tensor<B, 2>,
        conditional: Tensor<B, 2>,
        stack: Option<&[usize]>,
    ) -> Result<Tensor<B, 2>> {
        let stack = self.resolve_stack(stack)?;
        self.check_rows(&data, &conditional)?;
        let rows = stack
            .iter()
            .map(|&i| {
                self.models[i]
                    .log_prob(data.clone(), conditional.clone())
                    .unsqueeze_dim::<2>(0)
            })
            .collect();
        Ok(Tensor::cat(rows, 0))
    }

    /// Density under each member, `(stack, batch)`.
    pub fn prob(
        &self,
        data: Tensor<B, 2>,
        conditional: Tensor<B, 2>,
        stack: Option<&[usize]>,
    ) -> Result<Tensor<B, 2>> {
        Ok(self.log_prob(data, conditional, stack)?.exp())
    }

    /// `Σ_{i ∈ stack} weighting[i] · p_i` per row, `(batch,)`.
    pub fn weighted_prob(
        &self,
        data: Tensor<B, 2>,
        conditional: Tensor<B, 2>,
        stack: Option<&[usize]>,
    ) -> Result<Tensor<B, 1>> {
        let stack = self.resolve_stack(stack)?;
        let probs = self.prob(data, conditional, Some(&stack))?;
        Ok((probs * self.stack_weights(&stack)).sum_dim(0).squeeze::<1>(0))
    }

    /// `log(weighted_prob)`, `(batch,)`.
    pub fn weighted_log_prob(
        &self,
        data: Tensor<B, 2>,
        conditional: Tensor<B, 2>,
        stack: Option<&[usize]>,
    ) -> Result<Tensor<B, 1>> {
        Ok(self.weighted_prob(data, conditional, stack)?.log())
    }

    /// `n` draws from each member, `(stack, n, batch, n_data)`.
    pub fn sample(
        &self,
        n: usize,
        conditional: Tensor<B, 2>,
        stack: Option<&[usize]>,
    ) -> Result<Tensor<B, 4>> {
        if n == 0 {
            return Err(NdeError::InvalidConfig("sample count must be positive".to_string()));
        }
        let stack = self.resolve_stack(stack)?;
        let draws = stack
            .iter()
            .map(|&i| self.models[i].sample(n, conditional.clone()).unsqueeze_dim::<4>(0))
            .collect();
        Ok(Tensor::cat(draws, 0))
    }

    /// Weighted mean and spread of per-member samples.
    pub fn weighted_sample(
        &self,
        n: usize,
        conditional: Tensor<B, 2>,
        stack: Option<&[usize]>,
    ) -> Result<WeightedMoments<B>> {
        let stack = self.resolve_stack(stack)?;
        let samples = self.sample(n, conditional, Some(&stack))?;
        self.variance(samples, Some(&stack))
    }

    /// [`weighted_moments`] of samples drawn from the members of `stack`.
    pub fn variance(&self, samples: Tensor<B, 4>, stack: Option<&[usize]>) -> Result<WeightedMoments<B>> {
        let stack = self.resolve_stack(stack)?;
        let members = samples.dims()[0];
        if members != stack.len() {
            return Err(NdeError::InvalidData(format!(
                "samples from {members} members for a stack of {}",
                stack.len()
            )));
        }
        let weights: Vec<f64> = stack.iter().map(|&i| self.weighting[i]).collect();
        Ok(weighted_moments(samples, &weights))
    }

    /// Per-member `log p(data | θ) + log π(θ)`, `(stack, batch)`.
    pub fn log_posterior(
        &self,
        data: Tensor<B, 2>,
        conditional: Tensor<B, 2>,
        stack: Option<&[usize]>,
    ) -> Result<Tensor<B, 2>> {
        let prior = self.log_prior(conditional.clone())?.unsqueeze_dim::<2>(0);
        Ok(self.log_prob(data, conditional, stack)? + prior)
    }

    /// `weighted_log_prob + log π(θ)`, `(batch,)`.
    pub fn weighted_log_posterior(
        &self,
        data: Tensor<B, 2>,
        conditional: Tensor<B, 2>,
        stack: Option<&[usize]>,
    ) -> Result<Tensor<B, 1>> {
        let prior = self.log_prior(conditional.clone())?;
        Ok(self.weighted_log_prob(data, conditional, stack)? + prior)
    }

    /// `0.5 · (weighted_log_prob + 2 · log π(θ))`, `(batch,)`.
    pub fn geometric_mean(
        &self,
        data: Tensor<B, 2>,
        conditional: Tensor<B, 2>,
        stack: Option<&[usize]>,
    ) -> Result<Tensor<B, 1>> {
        let prior = self.log_prior(conditional.clone())?;
        Ok((self.weighted_log_prob(data, conditional, stack)? + prior.mul_scalar(2.0)).mul_scalar(0.5))
    }
}
