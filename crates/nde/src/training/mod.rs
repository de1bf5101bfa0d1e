//! Ensemble training: fit options, train/validation split, per-member early
//! stopping, loss history, and the fused-step training loop.

pub mod config;
pub mod data;
pub mod early_stopping;
pub mod history;
pub mod trainer;
