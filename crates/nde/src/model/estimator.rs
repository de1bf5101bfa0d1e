use burn::prelude::*;

use crate::density::ConditionalDensity;
use crate::model::maf::ConditionalMaf;
use crate::model::mdn::MixtureDensityNetwork;

/// Either density estimator, so one ensemble can mix flows and mixtures.
#[derive(Module, Debug)]
pub enum DensityEstimator<B: Backend> {
    Maf(ConditionalMaf<B>),
    Mdn(MixtureDensityNetwork<B>),
}

impl<B: Backend> DensityEstimator<B> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Maf(_) => "maf",
            Self::Mdn(_) => "mdn",
        }
    }
}

impl<B: Backend> From<ConditionalMaf<B>> for DensityEstimator<B> {
    fn from(model: ConditionalMaf<B>) -> Self {
        Self::Maf(model)
    }
}

impl<B: Backend> From<MixtureDensityNetwork<B>> for DensityEstimator<B> {
    fn from(model: MixtureDensityNetwork<B>) -> Self {
        Self::Mdn(model)
    }
}

impl<B: Backend> ConditionalDensity<B> for DensityEstimator<B> {
    fn log_prob(&self, data: Tensor<B, 2>, conditional: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            Self::Maf(m) => m.log_prob(data, conditional),
            Self::Mdn(m) => m.log_prob(data, conditional),
        }
    }

    fn sample(&self, n: usize, conditional: Tensor<B, 2>) -> Tensor<B, 3> {
        match self {
            Self::Maf(m) => m.sample(n, conditional),
            Self::Mdn(m) => m.sample(n, conditional),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::maf::MafConfig;
    use crate::model::mdn::MdnConfig;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_dispatch_matches_inner_model() {
        let device = Default::default();
        let maf = MafConfig::new(2, 2).with_n_hidden(vec![8]).init::<TestBackend>(&device);
        let mdn = MdnConfig::new(2, 2).with_n_hidden(vec![8]).init::<TestBackend>(&device);
        let theta = Tensor::<TestBackend, 2>::from_floats([[0.1, -0.2], [0.3, 0.4]], &device);
        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [-0.5, 0.5]], &device);

        let direct = maf.log_prob(x.clone(), theta.clone());
        let wrapped = DensityEstimator::from(maf);
        assert_eq!(wrapped.kind(), "maf");
        let diff: f32 = (wrapped.log_prob(x.clone(), theta.clone()) - direct)
            .abs()
            .max()
            .into_scalar()
            .elem();
        assert!(diff < 1e-6);

        let wrapped = DensityEstimator::from(mdn);
        assert_eq!(wrapped.kind(), "mdn");
        assert_eq!(wrapped.sample(3, theta).dims(), [3, 2, 2]);
    }
}
