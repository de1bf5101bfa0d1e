use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{leaky_relu, log_softmax, softmax, softplus};
use burn::tensor::{Distribution, TensorData};
use rand::distributions::{Distribution as _, WeightedIndex};

use crate::density::ConditionalDensity;
use crate::model::made::LEAKY_SLOPE;
use crate::model::maf::LN_2PI;

/// Floor added to the softplus diagonal of each precision factor.
const MIN_DIAG: f64 = 1e-5;

/// Configuration for a Gaussian mixture density network.
///
/// ```text
/// θ → Dense(n_hidden[0]) → LeakyReLU → ... → Dense(K + K·D + K·D(D+1)/2)
///   → mixture logits, component means, upper-triangular precision factors U_k
/// log N_k(x) = -½‖U_k (x - μ_k)‖² + Σ log diag(U_k) - D/2 · ln 2π
/// ```
#[derive(Config, Debug)]
pub struct MdnConfig {
    /// Dimension of the conditioning parameters θ.
    pub n_parameters: usize,
    /// Dimension of the data d.
    pub n_data: usize,
    /// Number of Gaussian components.
    #[config(default = 3)]
    pub n_components: usize,
    /// Hidden layer widths.
    #[config(default = "vec![50, 50]")]
    pub n_hidden: Vec<usize>,
}

impl MdnConfig {
    fn output_size(&self) -> usize {
        let k = self.n_components;
        let d = self.n_data;
        k + k * d + k * d * (d + 1) / 2
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MixtureDensityNetwork<B> {
        assert!(self.n_data > 0 && self.n_parameters > 0, "MDN dimensions must be positive");
        assert!(self.n_components > 0, "MDN needs at least one component");
        let mut widths = vec![self.n_parameters];
        widths.extend(&self.n_hidden);
        let hidden = widths
            .windows(2)
            .map(|w| LinearConfig::new(w[0], w[1]).init(device))
            .collect();
        let last = *widths.last().unwrap_or(&self.n_parameters);
        MixtureDensityNetwork {
            hidden,
            output: LinearConfig::new(last, self.output_size()).init(device),
            n_components: self.n_components,
            n_data: self.n_data,
        }
    }
}

/// Gaussian mixture whose parameters are a function of the conditional input.
#[derive(Module, Debug)]
pub struct MixtureDensityNetwork<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    n_components: usize,
    n_data: usize,
}

/// Mixture parameters for a batch of conditionals.
struct MixtureParams<B: Backend> {
    /// (batch, K)
    logits: Tensor<B, 2>,
    /// (batch, K, D)
    means: Tensor<B, 3>,
    /// Positive diagonal of U, (batch, K, D).
    diag: Tensor<B, 3>,
    /// Strict upper triangle of U, (batch, K, D(D-1)/2), row-major over i < j.
    off: Option<Tensor<B, 3>>,
}

impl<B: Backend> MixtureParams<B> {
    /// Column of the strict-upper-triangle block holding `U[i, j]`, `i < j`.
    fn off_index(n_data: usize, i: usize, j: usize) -> usize {
        i * n_data - i * (i + 1) / 2 + (j - i - 1)
    }

    /// `U[i, j]` for `j > i`, shape (batch, K, 1).
    fn upper(&self, n_data: usize, i: usize, j: usize) -> Tensor<B, 3> {
        match &self.off {
            Some(off) => off.clone().narrow(2, Self::off_index(n_data, i, j), 1),
            None => unreachable!("off-diagonal requested for one-dimensional data"),
        }
    }
}

impl<B: Backend> MixtureDensityNetwork<B> {
    fn params(&self, conditional: Tensor<B, 2>) -> MixtureParams<B> {
        let mut h = conditional;
        for layer in &self.hidden {
            h = leaky_relu(layer.forward(h), LEAKY_SLOPE);
        }
        let out = self.output.forward(h);
        let [batch, _] = out.dims();
        let (k, d) = (self.n_components, self.n_data);
        let n_off = d * (d - 1) / 2;

        let logits = out.clone().narrow(1, 0, k);
        let means = out.clone().narrow(1, k, k * d).reshape([batch, k, d]);
        let diag = softplus(out.clone().narrow(1, k + k * d, k * d).reshape([batch, k, d]), 1.0)
            .add_scalar(MIN_DIAG);
        let off = (n_off > 0).then(|| {
            out.narrow(1, k + 2 * k * d, k * n_off)
                .reshape([batch, k, n_off])
        });

        MixtureParams {
            logits,
            means,
            diag,
            off,
        }
    }

    /// Mixture weights for each conditional row, shape (batch, K).
    pub fn mixture_weights(&self, conditional: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.params(conditional).logits, 1)
    }
}

/// Flattened `(n, batch, K)` one-hot choice of a component per draw and row.
///
/// `weights` holds `batch` rows of `K` mixture weights. A row whose weights
/// cannot be sampled (NaN, all zero) is filled with NaN so its draws come out
/// NaN instead of silently favouring one component.
fn component_mask(weights: &[f32], n: usize, batch: usize, k: usize, rng: &mut impl rand::Rng) -> Vec<f32> {
    let dists: Vec<Option<WeightedIndex<f32>>> = (0..batch)
        .map(|b| WeightedIndex::new(&weights[b * k..(b + 1) * k]).ok())
        .collect();
    let invalid = dists.iter().filter(|d| d.is_none()).count();
    if invalid > 0 {
        tracing::warn!(rows = invalid, batch, "Invalid mixture weights, sampling NaN for those rows");
    }

    let mut one_hot = vec![0.0_f32; n * batch * k];
    for s in 0..n {
        for (b, dist) in dists.iter().enumerate() {
            let offset = (s * batch + b) * k;
            match dist {
                Some(dist) => one_hot[offset + dist.sample(rng)] = 1.0,
                None => one_hot[offset..offset + k].fill(f32::NAN),
            }
        }
    }
    one_hot
}

impl<B: Backend> ConditionalDensity<B> for MixtureDensityNetwork<B> {
    fn log_prob(&self, data: Tensor<B, 2>, conditional: Tensor<B, 2>) -> Tensor<B, 1> {
        let d = self.n_data;
        let params = self.params(conditional);
        let residual = data.unsqueeze_dim::<3>(1) - params.means.clone(); // (batch, K, D)

        // ‖U r‖² with U upper triangular: y_i = U_ii r_i + Σ_{j>i} U_ij r_j
        let r: Vec<Tensor<B, 3>> = (0..d).map(|j| residual.clone().narrow(2, j, 1)).collect();
        let [batch, k, _] = residual.dims();
        let mut quad = Tensor::<B, 3>::zeros([batch, k, 1], &residual.device());
        for i in 0..d {
            let mut y = params.diag.clone().narrow(2, i, 1) * r[i].clone();
            for j in (i + 1)..d {
                y = y + params.upper(d, i, j) * r[j].clone();
            }
            quad = quad + y.powf_scalar(2.0);
        }

        let log_det = params.diag.log().sum_dim(2);
        let log_component = (quad.mul_scalar(-0.5) + log_det)
            .sub_scalar(0.5 * d as f64 * LN_2PI)
            .squeeze::<2>(2); // (batch, K)

        let joint = log_softmax(params.logits, 1) + log_component;
        let max = joint.clone().max_dim(1);
        let lse = (joint - max.clone()).exp().sum_dim(1).log() + max;
        lse.squeeze::<1>(1)
    }

    fn sample(&self, n: usize, conditional: Tensor<B, 2>) -> Tensor<B, 3> {
        assert!(n > 0, "sample count must be positive");
        let (k, d) = (self.n_components, self.n_data);
        let [batch, _] = conditional.dims();
        let device = conditional.device();
        let params = self.params(conditional);

        // Solve U z = ε by back substitution, for every draw and component.
        let eps = Tensor::<B, 4>::random([n, batch, k, d], Distribution::Normal(0.0, 1.0), &device);
        // `solved[m]` holds z_{d-1-m}.
        let mut solved: Vec<Tensor<B, 4>> = Vec::with_capacity(d);
        for i in (0..d).rev() {
            let mut rhs = eps.clone().narrow(3, i, 1);
            for j in (i + 1)..d {
                rhs = rhs - params.upper(d, i, j).unsqueeze_dim::<4>(0) * solved[d - 1 - j].clone();
            }
            solved.push(rhs / params.diag.clone().narrow(2, i, 1).unsqueeze_dim::<4>(0));
        }
        solved.reverse();
        let z = Tensor::cat(solved, 3);
        let candidates = params.means.unsqueeze_dim::<4>(0) + z; // (n, batch, K, D)

        // Pick one component per (draw, row).
        let weights: Vec<f32> = softmax(params.logits, 1).into_data().iter::<f32>().collect();
        let one_hot = component_mask(&weights, n, batch, k, &mut rand::thread_rng());
        let mask = Tensor::<B, 4>::from_data(TensorData::new(one_hot, [n, batch, k, 1]), &device);

        (candidates * mask).sum_dim(2).reshape([n, batch, d])
    }
}
