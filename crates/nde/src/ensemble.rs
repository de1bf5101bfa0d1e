//! The ensemble controller: N model slots, the live stack, the softmax
//! weighting, and checkpoint plumbing.
//!
//! Training lives in [`crate::training::trainer`] and evaluation in
//! [`crate::evaluator`]; both are further `impl` blocks on [`Nde`].

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;

use crate::checkpoint::{self, Checkpoint, EnsembleMeta};
use crate::error::{NdeError, Result};
use crate::stack::StackManager;

/// Tolerance on `sum(weighting) == 1` for externally supplied weights.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// An ensemble of conditional density estimators with a shared prior.
#[derive(Debug)]
pub struct Nde<B: Backend, M, P> {
    pub(crate) models: Vec<M>,
    pub(crate) prior: P,
    pub(crate) weighting: Vec<f64>,
    pub(crate) stack: Vec<usize>,
    pub(crate) stack_manager: StackManager,
    pub(crate) device: B::Device,
}

impl<B: Backend, M: Module<B>, P> Nde<B, M, P> {
    /// Build an ensemble with uniform weighting and the full stack.
    pub fn new(models: Vec<M>, prior: P, device: &B::Device) -> Result<Self> {
        if models.is_empty() {
            return Err(NdeError::InvalidConfig(
                "an ensemble needs at least one model".to_string(),
            ));
        }
        let n = models.len();
        let stack_manager = StackManager::new(n);
        Ok(Self {
            models,
            prior,
            weighting: vec![1.0 / n as f64; n],
            stack: stack_manager.default_stack(),
            stack_manager,
            device: device.clone(),
        })
    }

    pub fn n_models(&self) -> usize {
        self.models.len()
    }

    pub fn models(&self) -> &[M] {
        &self.models
    }

    pub fn model(&self, index: usize) -> Option<&M> {
        self.models.get(index)
    }

    pub fn prior(&self) -> &P {
        &self.prior
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Mixture weights by ensemble index (length N, sums to 1).
    pub fn weighting(&self) -> &[f64] {
        &self.weighting
    }

    /// Replace the weighting. Must have length N, be non-negative and sum to 1.
    pub fn set_weighting(&mut self, weighting: Vec<f64>) -> Result<()> {
        if weighting.len() != self.n_models() {
            return Err(NdeError::InvalidConfig(format!(
                "weighting has {} entries for {} models",
                weighting.len(),
                self.n_models()
            )));
        }
        if weighting.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(NdeError::InvalidConfig(format!(
                "weights must be finite and non-negative: {weighting:?}"
            )));
        }
        let sum: f64 = weighting.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(NdeError::InvalidConfig(format!("weights sum to {sum}, expected 1")));
        }
        self.weighting = weighting;
        Ok(())
    }

    /// Indices used when no explicit stack is passed.
    pub fn stack(&self) -> &[usize] {
        &self.stack
    }

    /// Put every model back on the stack except the error-stack exclusions.
    pub fn reset_stack(&mut self) {
        self.stack = self.stack_manager.default_stack();
    }

    pub fn error_stack(&self) -> Option<&[usize]> {
        self.stack_manager.excluded()
    }

    /// Exclude `indices` from every default stack until cleared.
    pub fn set_error_stack(&mut self, indices: &[usize]) -> Result<()> {
        self.stack_manager.set_excluded(indices)?;
        self.reset_stack();
        Ok(())
    }

    pub fn clear_error_stack(&mut self) {
        self.stack_manager.clear_excluded();
        self.reset_stack();
    }

    pub fn stack_manager(&self) -> &StackManager {
        &self.stack_manager
    }

    /// In-memory copy of the parameters of the models at `indices`.
    pub fn snapshot(&self, indices: &[usize]) -> Result<Checkpoint> {
        Checkpoint::capture::<B, M>(&self.models, indices)
    }

    /// Write the parameters held in `checkpoint` back into the models at `indices`.
    pub fn restore(&mut self, indices: &[usize], checkpoint: &Checkpoint) -> Result<()> {
        checkpoint.restore::<B, M>(&mut self.models, indices)
    }

    /// Persist the models at `indices` as `{directory}/{prefix}_model_{i}.mpk`.
    pub fn save_models(&self, indices: &[usize], directory: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        checkpoint::persist::<B, M>(&self.models, indices, directory, prefix)
    }

    /// Load the models at `indices` from files written by [`Self::save_models`].
    pub fn load_models(&mut self, indices: &[usize], directory: &Path, prefix: &str) -> Result<()> {
        checkpoint::load::<B, M>(&mut self.models, indices, directory, prefix, &self.device)
    }

    pub fn meta(&self) -> EnsembleMeta {
        EnsembleMeta {
            n_models: self.n_models(),
            weighting: self.weighting.clone(),
            error_stack: self.error_stack().map(<[usize]>::to_vec),
        }
    }

    /// Persist every model plus the weighting and error stack.
    pub fn save(&self, directory: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        let all = self.stack_manager.initialize();
        let mut written = self.save_models(&all, directory, prefix)?;
        written.push(self.meta().save(directory, prefix)?);
        tracing::info!(
            n_models = self.n_models(),
            directory = %directory.display(),
            prefix,
            "Saved ensemble"
        );
        Ok(written)
    }

    /// Inverse of [`Self::save`]. The stack is reset afterwards.
    pub fn load(&mut self, directory: &Path, prefix: &str) -> Result<()> {
        let meta = EnsembleMeta::load(directory, prefix)?;
        if meta.n_models != self.n_models() {
            return Err(NdeError::InvalidConfig(format!(
                "saved ensemble has {} models, this one has {}",
                meta.n_models,
                self.n_models()
            )));
        }
        let all = self.stack_manager.initialize();
        self.load_models(&all, directory, prefix)?;
        self.set_weighting(meta.weighting)?;
        match meta.error_stack {
            Some(excluded) => self.set_error_stack(&excluded)?,
            None => self.clear_error_stack(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::UniformPrior;
    use burn::backend::ndarray::NdArray;
    use burn::nn::{Linear, LinearConfig};
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn ensemble(n: usize) -> Nde<TestBackend, Linear<TestBackend>, UniformPrior> {
        let device = Default::default();
        let models = (0..n).map(|_| LinearConfig::new(3, 2).init(&device)).collect();
        let prior = UniformPrior::new(vec![0.0], vec![1.0]).unwrap();
        Nde::new(models, prior, &device).unwrap()
    }

    #[test]
    fn test_new_defaults() {
        let nde = ensemble(3);
        assert_eq!(nde.n_models(), 3);
        assert_eq!(nde.stack(), &[0, 1, 2]);
        let sum: f64 = nde.weighting().iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(nde.error_stack().is_none());
    }

    #[test]
    fn test_empty_ensemble_rejected() {
        let device = Default::default();
        let prior = UniformPrior::new(vec![0.0], vec![1.0]).unwrap();
        let result = Nde::<TestBackend, Linear<TestBackend>, _>::new(Vec::new(), prior, &device);
        assert!(matches!(result, Err(NdeError::InvalidConfig(_))));
    }

    #[test]
    fn test_set_weighting_validates() {
        let mut nde = ensemble(3);
        assert!(nde.set_weighting(vec![0.5, 0.5]).is_err());
        assert!(nde.set_weighting(vec![0.5, 0.6, -0.1]).is_err());
        assert!(nde.set_weighting(vec![0.5, 0.5, 0.5]).is_err());
        nde.set_weighting(vec![0.2, 0.3, 0.5]).unwrap();
        assert_eq!(nde.weighting(), &[0.2, 0.3, 0.5]);
    }

    #[test]
    fn test_error_stack_restricts_default_stack() {
        let mut nde = ensemble(4);
        nde.set_error_stack(&[1]).unwrap();
        assert_eq!(nde.stack(), &[0, 2, 3]);
        nde.reset_stack();
        assert_eq!(nde.stack(), &[0, 2, 3]);
        nde.clear_error_stack();
        assert_eq!(nde.stack(), &[0, 1, 2, 3]);
        assert!(nde.set_error_stack(&[7]).is_err());
    }

    #[test]
    fn test_snapshot_restore_through_controller() {
        let mut nde = ensemble(2);
        let checkpoint = nde.snapshot(&[1]).unwrap();
        let before = crate::checkpoint::ParamSnapshot::capture::<TestBackend, _>(&nde.models()[1]);

        let device = Default::default();
        nde.models[1] = LinearConfig::new(3, 2).init(&device);
        nde.restore(&[1], &checkpoint).unwrap();
        assert_eq!(crate::checkpoint::ParamSnapshot::capture::<TestBackend, _>(&nde.models()[1]), before);

        assert!(matches!(
            nde.restore(&[0], &checkpoint),
            Err(NdeError::MissingSnapshot(0))
        ));
    }

    #[test]
    fn test_save_load_ensemble() {
        let dir = TempDir::new().unwrap();
        let mut source = ensemble(2);
        source.set_weighting(vec![0.25, 0.75]).unwrap();
        source.set_error_stack(&[0]).unwrap();
        let written = source.save(dir.path(), "run").unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.path().join("run_model_1.mpk").is_file());

        let mut target = ensemble(2);
        target.load(dir.path(), "run").unwrap();
        assert_eq!(target.weighting(), &[0.25, 0.75]);
        assert_eq!(target.error_stack(), Some(&[0][..]));
        assert_eq!(target.stack(), &[1]);
        for i in 0..2 {
            assert_eq!(
                crate::checkpoint::ParamSnapshot::capture::<TestBackend, _>(&target.models()[i]),
                crate::checkpoint::ParamSnapshot::capture::<TestBackend, _>(&source.models()[i])
            );
        }

        let mut wrong = ensemble(3);
        assert!(matches!(wrong.load(dir.path(), "run"), Err(NdeError::InvalidConfig(_))));
    }
}
