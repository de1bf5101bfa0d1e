//! Tensor bridge: conversions between row-major host data (`Vec<Vec<f32>>`)
//! and burn tensors.
//!
//! Simulations arrive from outside the crate as plain rows; the ensemble
//! works on `Tensor<B, 2>` batches and hands scores back as `Vec<f64>`.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{NdeError, Result};

/// Convert equal-length rows to a `(rows, dim)` tensor.
///
/// Fails on an empty input, zero-width rows, or ragged rows.
pub fn rows_to_tensor<B: Backend>(rows: &[Vec<f32>], device: &B::Device) -> Result<Tensor<B, 2>> {
    let Some(first) = rows.first() else {
        return Err(NdeError::InvalidData("no rows given".to_string()));
    };
    let dim = first.len();
    if dim == 0 {
        return Err(NdeError::InvalidData("rows must have at least one column".to_string()));
    }
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
        return Err(NdeError::InvalidData(format!(
            "row {i} has length {}, expected {dim}",
            row.len()
        )));
    }

    let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Ok(Tensor::from_data(TensorData::new(flat, [rows.len(), dim]), device))
}

/// Convert a single point to a `(1, dim)` tensor.
pub fn row_to_tensor<B: Backend>(row: &[f32], device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(row.to_vec(), [1, row.len()]), device)
}

/// Extract f64 values from any tensor, in row-major order.
pub fn tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f64> {
    tensor
        .into_data()
        .iter::<f32>()
        .map(|v| v as f64)
        .collect()
}

/// Extract a `(rows, cols)` tensor as nested rows.
pub fn tensor_to_rows<B: Backend>(tensor: Tensor<B, 2>) -> Vec<Vec<f64>> {
    let [_, cols] = tensor.dims();
    let flat = tensor_to_vec(tensor);
    if cols == 0 {
        return Vec::new();
    }
    flat.chunks(cols).map(|c| c.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_rows_round_trip() {
        let device = Default::default();
        let rows = vec![vec![1.0_f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]];

        let tensor = rows_to_tensor::<TestBackend>(&rows, &device).unwrap();
        assert_eq!(tensor.dims(), [2, 3]);

        let back = tensor_to_rows(tensor);
        assert_eq!(back, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let device = Default::default();
        let rows = vec![vec![1.0_f32, 2.0], vec![3.0]];
        let err = rows_to_tensor::<TestBackend>(&rows, &device).unwrap_err();
        assert!(err.to_string().contains("row 1 has length 1"), "{err}");

        assert!(rows_to_tensor::<TestBackend>(&[], &device).is_err());
    }

    #[test]
    fn test_single_row() {
        let device = Default::default();
        let tensor = row_to_tensor::<TestBackend>(&[0.5, -1.5], &device);
        assert_eq!(tensor.dims(), [1, 2]);
        assert_eq!(tensor_to_vec(tensor), vec![0.5, -1.5]);
    }
}
