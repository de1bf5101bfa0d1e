//! The capability every ensemble member exposes.
//!
//! The ensemble never looks inside a member: it only evaluates densities,
//! draws samples, and reads/writes trainable parameters through burn's
//! `Module` machinery (see [`crate::checkpoint`]).

use burn::prelude::*;

/// A conditional density estimator `p(data | conditional)`.
///
/// Shapes follow the row-batch convention used across the crate:
/// - `data`: `(batch, n_data)`
/// - `conditional`: `(batch, n_parameters)`
///
/// A single evaluation point is a batch of one.
pub trait ConditionalDensity<B: Backend> {
    /// Log density of each row of `data` given the matching row of `conditional`.
    ///
    /// Output shape: `(batch,)`
    fn log_prob(&self, data: Tensor<B, 2>, conditional: Tensor<B, 2>) -> Tensor<B, 1>;

    /// Density of each row. Output shape: `(batch,)`
    fn prob(&self, data: Tensor<B, 2>, conditional: Tensor<B, 2>) -> Tensor<B, 1> {
        self.log_prob(data, conditional).exp()
    }

    /// Draw `n` samples for every conditional row.
    ///
    /// Output shape: `(n, batch, n_data)`
    fn sample(&self, n: usize, conditional: Tensor<B, 2>) -> Tensor<B, 3>;
}
