use burn::module::{Param, ParamId};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::leaky_relu;
use burn::tensor::{Distribution, TensorData};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Slope of the LeakyReLU used between masked layers.
pub const LEAKY_SLOPE: f64 = 0.01;

/// Order in which a MADE factorizes its input dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputOrder {
    LeftToRight,
    RightToLeft,
    Random,
}

impl InputOrder {
    /// Autoregressive degree (1-based) of each input dimension.
    pub fn degrees(&self, n_data: usize) -> Vec<usize> {
        let mut degrees: Vec<usize> = (1..=n_data).collect();
        match self {
            Self::LeftToRight => {}
            Self::RightToLeft => degrees.reverse(),
            Self::Random => degrees.shuffle(&mut rand::thread_rng()),
        }
        degrees
    }
}

/// Degrees of a hidden layer: cycle through `1..n_data` (0 when `n_data == 1`,
/// so hidden units see only the conditional input).
pub fn hidden_degrees(n_units: usize, n_data: usize) -> Vec<usize> {
    if n_data <= 1 {
        return vec![0; n_units];
    }
    (0..n_units).map(|k| k % (n_data - 1) + 1).collect()
}

/// Connectivity mask `(d_in, d_out)`, flattened row-major.
///
/// Hidden layers connect when `out >= in`; the output layer connects only when
/// `out > in`, which keeps every output strictly autoregressive.
pub fn connectivity(in_degrees: &[usize], out_degrees: &[usize], strict: bool) -> Vec<f32> {
    let mut mask = Vec::with_capacity(in_degrees.len() * out_degrees.len());
    for &d_in in in_degrees {
        for &d_out in out_degrees {
            let connected = if strict { d_out > d_in } else { d_out >= d_in };
            mask.push(if connected { 1.0 } else { 0.0 });
        }
    }
    mask
}

/// Dense layer whose weight is multiplied by a fixed binary mask.
#[derive(Module, Debug)]
pub struct MaskedLinear<B: Backend> {
    /// Weight, shape (d_input, d_output). Glorot-uniform initialized.
    weight: Param<Tensor<B, 2>>,
    /// Bias, shape (d_output,). Zero initialized.
    bias: Param<Tensor<B, 1>>,
    /// Binary (d_input, d_output) mask. Recorded with the weights so a saved
    /// model reloads with its own input order; never receives gradients.
    mask: Param<Tensor<B, 2>>,
}

impl<B: Backend> MaskedLinear<B> {
    pub fn new(d_input: usize, d_output: usize, mask: Vec<f32>, device: &B::Device) -> Self {
        assert_eq!(mask.len(), d_input * d_output, "mask size mismatch");
        let limit = (6.0 / (d_input + d_output) as f64).sqrt();
        Self {
            weight: Param::from_tensor(Tensor::random(
                [d_input, d_output],
                Distribution::Uniform(-limit, limit),
                device,
            )),
            bias: Param::from_tensor(Tensor::zeros([d_output], device)),
            mask: Param::initialized(
                ParamId::new(),
                Tensor::from_data(TensorData::new(mask, [d_input, d_output]), device),
            ),
        }
    }

    /// `input @ (weight * mask) + bias`: (batch, d_input) → (batch, d_output)
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let weight = self.weight.val() * self.mask.val().detach();
        input.matmul(weight) + self.bias.val().unsqueeze_dim::<2>(0)
    }
}

/// One conditional MADE: a masked MLP producing per-dimension shift and
/// log-scale, with the conditional input projected into every layer.
///
/// ```text
/// h_1 = leaky_relu(masked(x) + cond_1(theta))
/// h_k = leaky_relu(masked(h_{k-1}) + cond_k(theta))
/// [shift, log_scale] = masked_out(h_L) + cond_out(theta)
/// ```
#[derive(Module, Debug)]
pub struct Made<B: Backend> {
    hidden: Vec<MaskedLinear<B>>,
    conditional_hidden: Vec<Linear<B>>,
    output: MaskedLinear<B>,
    conditional_output: Linear<B>,
    n_data: usize,
}

impl<B: Backend> Made<B> {
    pub fn new(
        n_parameters: usize,
        n_data: usize,
        n_hidden: &[usize],
        order: InputOrder,
        device: &B::Device,
    ) -> Self {
        let input_degrees = order.degrees(n_data);
        let mut previous = input_degrees.clone();
        let mut hidden = Vec::with_capacity(n_hidden.len());
        let mut conditional_hidden = Vec::with_capacity(n_hidden.len());

        for &units in n_hidden {
            let degrees = hidden_degrees(units, n_data);
            let mask = connectivity(&previous, &degrees, false);
            hidden.push(MaskedLinear::new(previous.len(), units, mask, device));
            conditional_hidden.push(LinearConfig::new(n_parameters, units).with_bias(false).init(device));
            previous = degrees;
        }

        // Output columns: [shift_1..shift_D, log_scale_1..log_scale_D].
        let output_degrees: Vec<usize> = input_degrees.iter().chain(&input_degrees).copied().collect();
        let mask = connectivity(&previous, &output_degrees, true);
        let output = MaskedLinear::new(previous.len(), 2 * n_data, mask, device);
        let conditional_output = LinearConfig::new(n_parameters, 2 * n_data)
            .with_bias(false)
            .init(device);

        Self {
            hidden,
            conditional_hidden,
            output,
            conditional_output,
            n_data,
        }
    }

    /// Shift and log-scale, each `(batch, n_data)`.
    pub fn forward(&self, x: Tensor<B, 2>, conditional: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let mut h = x;
        for (layer, cond) in self.hidden.iter().zip(&self.conditional_hidden) {
            h = leaky_relu(layer.forward(h) + cond.forward(conditional.clone()), LEAKY_SLOPE);
        }
        let out = self.output.forward(h) + self.conditional_output.forward(conditional);
        let shift = out.clone().narrow(1, 0, self.n_data);
        let log_scale = out.narrow(1, self.n_data, self.n_data);
        (shift, log_scale)
    }

    /// Data → base: `u = (x - shift(x)) * exp(-log_scale(x))`.
    ///
    /// Returns `u` and the per-row log-determinant `-sum(log_scale)`, shape `(batch,)`.
    pub fn inverse(&self, x: Tensor<B, 2>, conditional: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let (shift, log_scale) = self.forward(x.clone(), conditional);
        let u = (x - shift) * log_scale.clone().neg().exp();
        let log_det = log_scale.sum_dim(1).neg().squeeze::<1>(1);
        (u, log_det)
    }

    /// Base → data. Sequential: dimension of degree `k` is exact after pass `k`.
    pub fn transform(&self, u: Tensor<B, 2>, conditional: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = Tensor::zeros(u.dims(), &u.device());
        for _ in 0..self.n_data {
            let (shift, log_scale) = self.forward(x, conditional.clone());
            x = u.clone() * log_scale.exp() + shift;
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_hidden_mask_respects_degrees() {
        // Input degrees [1, 2], hidden degree 1 for both units.
        let mask = connectivity(&[1, 2], &[1, 1], false);
        assert_eq!(mask, vec![1.0, 1.0, 0.0, 0.0]);
        // Output layer is strict: degree-1 hidden feeds only degree-2 outputs.
        let out = connectivity(&[1], &[1, 2], true);
        assert_eq!(out, vec![0.0, 1.0]);
    }

    #[test]
    fn test_input_orders() {
        assert_eq!(InputOrder::LeftToRight.degrees(3), vec![1, 2, 3]);
        assert_eq!(InputOrder::RightToLeft.degrees(3), vec![3, 2, 1]);
        let mut random = InputOrder::Random.degrees(4);
        random.sort_unstable();
        assert_eq!(random, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_autoregressive_property() {
        // Changing the last input (degree 3) must not move any output.
        let device = Default::default();
        let made = Made::<TestBackend>::new(2, 3, &[16, 16], InputOrder::LeftToRight, &device);
        let theta = Tensor::<TestBackend, 2>::random([4, 2], Distribution::Normal(0.0, 1.0), &device);
        let x = Tensor::<TestBackend, 2>::random([4, 3], Distribution::Normal(0.0, 1.0), &device);
        let bump = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.0_f32, 0.0, 5.0].repeat(4), [4, 3]),
            &device,
        );

        let (shift_a, scale_a) = made.forward(x.clone(), theta.clone());
        let (shift_b, scale_b) = made.forward(x + bump, theta);
        let diff: f32 = (shift_a - shift_b).abs().max().into_scalar().elem();
        let diff_scale: f32 = (scale_a - scale_b).abs().max().into_scalar().elem();
        assert!(diff < 1e-6, "shift depends on last input: {diff}");
        assert!(diff_scale < 1e-6, "log_scale depends on last input: {diff_scale}");
    }

    #[test]
    fn test_masks_travel_with_parameters() {
        // Two independently ordered MADEs agree once parameters are copied over.
        let device = Default::default();
        let a = Made::<TestBackend>::new(1, 4, &[12], InputOrder::Random, &device);
        let b = Made::<TestBackend>::new(1, 4, &[12], InputOrder::Random, &device);
        let b = crate::checkpoint::ParamSnapshot::capture::<TestBackend, _>(&a)
            .apply::<TestBackend, _>(0, b)
            .unwrap();

        let theta = Tensor::<TestBackend, 2>::random([3, 1], Distribution::Normal(0.0, 1.0), &device);
        let x = Tensor::<TestBackend, 2>::random([3, 4], Distribution::Normal(0.0, 1.0), &device);
        let (shift_a, _) = a.forward(x.clone(), theta.clone());
        let (shift_b, _) = b.forward(x, theta);
        let diff: f32 = (shift_a - shift_b).abs().max().into_scalar().elem();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_transform_inverts_inverse() {
        let device = Default::default();
        let made = Made::<TestBackend>::new(1, 3, &[8], InputOrder::Random, &device);
        let theta = Tensor::<TestBackend, 2>::random([5, 1], Distribution::Normal(0.0, 1.0), &device);
        let x = Tensor::<TestBackend, 2>::random([5, 3], Distribution::Normal(0.0, 1.0), &device);

        let (u, _) = made.inverse(x.clone(), theta.clone());
        let back = made.transform(u, theta);
        let err: f32 = (back - x).abs().max().into_scalar().elem();
        assert!(err < 1e-4, "round trip error {err}");
    }
}
