use burn::prelude::*;

use crate::error::NdeError;

/// Options for [`crate::Nde::fit`].
#[derive(Config, Debug)]
pub struct FitConfig {
    /// Fraction of simulations held out for validation, in `[0, 1)`.
    #[config(default = 0.1)]
    pub f_val: f64,
    /// Maximum number of epochs.
    #[config(default = 1000)]
    pub epochs: usize,
    /// Training batch size.
    #[config(default = 100)]
    pub n_batch: usize,
    /// Epochs without validation improvement before a member is stopped.
    #[config(default = 20)]
    pub patience: usize,
    /// Learning rate handed to the optimizer at every step.
    #[config(default = 1e-4)]
    pub learning_rate: f64,
    /// Draw an epoch progress bar.
    #[config(default = true)]
    pub progress_bar: bool,
    /// Seed for the train/validation split and batch shuffling.
    pub seed: Option<u64>,
    /// Prefix for model files written when training ends.
    pub file_name: Option<String>,
    /// Directory the checkpoint files go to (current directory if unset).
    pub checkpoint_dir: Option<String>,
}

impl FitConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if !(0.0..1.0).contains(&self.f_val) {
            return Err(NdeError::InvalidConfig(format!(
                "f_val must lie in [0, 1), got {}",
                self.f_val
            )));
        }
        if self.n_batch == 0 {
            return Err(NdeError::InvalidConfig("n_batch must be positive".to_string()));
        }
        if self.patience == 0 {
            return Err(NdeError::InvalidConfig("patience must be positive".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(NdeError::InvalidConfig(format!(
                "learning_rate must be finite and non-negative, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}
