use burn::prelude::*;
use burn::tensor::Distribution;

use crate::density::ConditionalDensity;
use crate::model::made::{InputOrder, Made};

/// ln(2π)
pub(crate) const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Configuration for a conditional masked autoregressive flow.
///
/// ```text
/// x ──MADE_1⁻¹──▶ ... ──MADE_k⁻¹──▶ u ~ N(0, I)
/// log p(x|θ) = log N(u) + Σ_j log|det ∂MADE_j⁻¹|
/// ```
#[derive(Config, Debug)]
pub struct MafConfig {
    /// Dimension of the conditioning parameters θ.
    pub n_parameters: usize,
    /// Dimension of the data d.
    pub n_data: usize,
    /// Number of stacked MADE bijectors.
    #[config(default = 1)]
    pub n_mades: usize,
    /// Hidden units per masked layer.
    #[config(default = "vec![50, 50]")]
    pub n_hidden: Vec<usize>,
    /// Input ordering of each MADE (drawn independently when random).
    #[config(default = "InputOrder::Random")]
    pub input_order: InputOrder,
}

impl MafConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConditionalMaf<B> {
        assert!(self.n_data > 0 && self.n_parameters > 0, "MAF dimensions must be positive");
        assert!(self.n_mades > 0, "MAF needs at least one MADE");
        let mades = (0..self.n_mades)
            .map(|_| Made::new(self.n_parameters, self.n_data, &self.n_hidden, self.input_order, device))
            .collect();
        ConditionalMaf {
            mades,
            n_data: self.n_data,
        }
    }
}

/// Conditional masked autoregressive flow over a standard-normal base.
#[derive(Module, Debug)]
pub struct ConditionalMaf<B: Backend> {
    mades: Vec<Made<B>>,
    n_data: usize,
}

impl<B: Backend> ConditionalMaf<B> {
    pub fn n_data(&self) -> usize {
        self.n_data
    }
}

impl<B: Backend> ConditionalDensity<B> for ConditionalMaf<B> {
    fn log_prob(&self, data: Tensor<B, 2>, conditional: Tensor<B, 2>) -> Tensor<B, 1> {
        let [batch, _] = data.dims();
        let mut u = data;
        let mut log_det = Tensor::<B, 1>::zeros([batch], &u.device());
        for made in &self.mades {
            let (next, ld) = made.inverse(u, conditional.clone());
            u = next;
            log_det = log_det + ld;
        }
        let base = u
            .powf_scalar(2.0)
            .sum_dim(1)
            .mul_scalar(-0.5)
            .sub_scalar(0.5 * self.n_data as f64 * LN_2PI)
            .squeeze::<1>(1);
        base + log_det
    }

    fn sample(&self, n: usize, conditional: Tensor<B, 2>) -> Tensor<B, 3> {
        assert!(n > 0, "sample count must be positive");
        let [batch, _] = conditional.dims();
        let device = conditional.device();
        let repeated = Tensor::cat(vec![conditional; n], 0);

        let mut x = Tensor::<B, 2>::random([n * batch, self.n_data], Distribution::Normal(0.0, 1.0), &device);
        for made in self.mades.iter().rev() {
            x = made.transform(x, repeated.clone());
        }
        x.reshape([n, batch, self.n_data])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_shapes() {
        let device = Default::default();
        let maf = MafConfig::new(3, 2)
            .with_n_mades(2)
            .with_n_hidden(vec![8, 8])
            .init::<TestBackend>(&device);
        let theta = Tensor::<TestBackend, 2>::random([5, 3], Distribution::Normal(0.0, 1.0), &device);
        let x = Tensor::<TestBackend, 2>::random([5, 2], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(maf.log_prob(x.clone(), theta.clone()).dims(), [5]);
        assert_eq!(maf.prob(x, theta.clone()).dims(), [5]);
        assert_eq!(maf.sample(7, theta).dims(), [7, 5, 2]);
    }

    #[test]
    fn test_density_integrates_to_one() {
        let device = Default::default();
        let maf = MafConfig::new(1, 1)
            .with_n_mades(2)
            .with_n_hidden(vec![8])
            .init::<TestBackend>(&device);

        let step = 0.005_f32;
        let grid: Vec<f32> = (0..24_000).map(|i| -60.0 + step * i as f32).collect();
        let n = grid.len();
        let x = Tensor::<TestBackend, 2>::from_data(TensorData::new(grid, [n, 1]), &device);
        let theta = Tensor::<TestBackend, 2>::full([n, 1], 0.3, &device);

        let mass: f32 = maf.prob(x, theta).sum().into_scalar().elem::<f32>() * step;
        assert!((mass - 1.0).abs() < 1e-2, "density integrates to {mass}");
    }

    #[test]
    fn test_samples_are_finite() {
        let device = Default::default();
        let maf = MafConfig::new(2, 3).with_n_hidden(vec![8]).init::<TestBackend>(&device);
        let theta = Tensor::<TestBackend, 2>::zeros([2, 2], &device);
        let samples = maf.sample(10, theta);
        let values: Vec<f32> = samples.into_data().iter::<f32>().collect();
        assert_eq!(values.len(), 60);
        assert!(values.iter().all(|v| v.is_finite()));
    }
}
