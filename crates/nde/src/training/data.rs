//! Train/validation partition and batching of simulations.
//!
//! Simulations are `(conditional, data)` row pairs held as two tensors with
//! the same number of rows. A [`TrainValSplit`] is a random partition of the
//! row indices, drawn once per fit; training batches are reshuffled every
//! epoch and the final short batch is kept.

use burn::prelude::*;
use burn::tensor::TensorData;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{NdeError, Result};

/// Row indices of the training and validation sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainValSplit {
    train: Vec<usize>,
    val: Vec<usize>,
}

impl TrainValSplit {
    /// Hold out `floor(n_sims * f_val)` random rows for validation.
    ///
    /// Both sides must be non-empty.
    pub fn new(n_sims: usize, f_val: f64, rng: &mut impl Rng) -> Result<Self> {
        let n_val = (n_sims as f64 * f_val).floor() as usize;
        let n_train = n_sims.saturating_sub(n_val);
        if n_train == 0 || n_val == 0 {
            return Err(NdeError::DegenerateSplit {
                n_sims,
                n_train,
                n_val,
            });
        }

        let mut indices: Vec<usize> = (0..n_sims).collect();
        indices.shuffle(rng);
        let val = indices.split_off(n_train);
        Ok(Self {
            train: indices,
            val,
        })
    }

    pub fn train(&self) -> &[usize] {
        &self.train
    }

    pub fn val(&self) -> &[usize] {
        &self.val
    }

    pub fn n_train(&self) -> usize {
        self.train.len()
    }

    pub fn n_val(&self) -> usize {
        self.val.len()
    }

    /// Shuffled training batches of at most `n_batch` rows, covering every
    /// training row exactly once.
    pub fn train_batches(&self, n_batch: usize, rng: &mut impl Rng) -> Vec<Vec<usize>> {
        let mut order = self.train.clone();
        order.shuffle(rng);
        order.chunks(n_batch.max(1)).map(|c| c.to_vec()).collect()
    }
}

/// Divisor applied to the summed per-batch training losses.
pub fn n_train_batches(n_train: usize, n_batch: usize) -> usize {
    (n_train / n_batch.max(1)).max(1)
}

/// Paired conditional/data tensors with matching row counts.
#[derive(Debug, Clone)]
pub struct Simulations<B: Backend> {
    conditional: Tensor<B, 2>,
    data: Tensor<B, 2>,
}

impl<B: Backend> Simulations<B> {
    pub fn new(conditional: Tensor<B, 2>, data: Tensor<B, 2>) -> Result<Self> {
        let [n_cond, _] = conditional.dims();
        let [n_data, _] = data.dims();
        if n_cond != n_data {
            return Err(NdeError::InvalidData(format!(
                "conditional has {n_cond} rows but data has {n_data}"
            )));
        }
        Ok(Self { conditional, data })
    }

    pub fn len(&self) -> usize {
        self.conditional.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(conditional, data)` restricted to `rows`, in the given order.
    pub fn select(&self, rows: &[usize]) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let device = self.conditional.device();
        let index: Vec<i64> = rows.iter().map(|&r| r as i64).collect();
        let index = Tensor::<B, 1, Int>::from_data(TensorData::new(index, [rows.len()]), &device);
        (
            self.conditional.clone().select(0, index.clone()),
            self.data.clone().select(0, index),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_split_sizes_and_partition() {
        let mut rng = StdRng::seed_from_u64(7);
        let split = TrainValSplit::new(25, 0.1, &mut rng).unwrap();
        assert_eq!(split.n_val(), 2);
        assert_eq!(split.n_train(), 23);

        let mut all: Vec<usize> = split.train().iter().chain(split.val()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_degenerate_split() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = TrainValSplit::new(5, 0.0, &mut rng).unwrap_err();
        assert!(matches!(err, NdeError::DegenerateSplit { n_val: 0, .. }));

        let err = TrainValSplit::new(0, 0.5, &mut rng).unwrap_err();
        assert!(matches!(err, NdeError::DegenerateSplit { n_train: 0, .. }));

        // 9 * 0.1 floors to zero validation rows
        assert!(TrainValSplit::new(9, 0.1, &mut rng).is_err());
    }

    #[test]
    fn test_seeded_split_is_reproducible() {
        let a = TrainValSplit::new(50, 0.2, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = TrainValSplit::new(50, 0.2, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_batches_keep_remainder() {
        let mut rng = StdRng::seed_from_u64(1);
        let split = TrainValSplit::new(26, 0.1, &mut rng).unwrap();
        assert_eq!(split.n_train(), 24);

        let batches = split.train_batches(10, &mut rng);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![10, 10, 4]);

        let mut seen: Vec<usize> = batches.concat();
        seen.sort_unstable();
        let mut expected = split.train().to_vec();
        expected.sort_unstable();
        assert_eq!(seen, expected);

        assert_eq!(n_train_batches(24, 10), 2);
        assert_eq!(n_train_batches(24, 100), 1);
    }

    #[test]
    fn test_select_rows() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[0.0], [1.0], [2.0]], &device);
        let y = Tensor::<TestBackend, 2>::from_floats([[10.0, 0.0], [11.0, 1.0], [12.0, 2.0]], &device);
        let sims = Simulations::new(x, y).unwrap();
        assert_eq!(sims.len(), 3);

        let (x_sel, y_sel) = sims.select(&[2, 0]);
        let x_vals: Vec<f32> = x_sel.into_data().iter::<f32>().collect();
        let y_vals: Vec<f32> = y_sel.into_data().iter::<f32>().collect();
        assert_eq!(x_vals, vec![2.0, 0.0]);
        assert_eq!(y_vals, vec![12.0, 2.0, 10.0, 0.0]);
    }

    #[test]
    fn test_mismatched_rows_rejected() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::zeros([3, 1], &device);
        let y = Tensor::<TestBackend, 2>::zeros([4, 1], &device);
        assert!(matches!(Simulations::new(x, y), Err(NdeError::InvalidData(_))));
    }
}
