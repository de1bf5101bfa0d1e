//! Density estimators usable as ensemble members (masked autoregressive
//! flow and Gaussian mixture density network), plus the host/tensor bridge.

pub mod bridge;
pub mod estimator;
pub mod made;
pub mod maf;
pub mod mdn;
