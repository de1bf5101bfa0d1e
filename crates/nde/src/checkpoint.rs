//! Snapshot/restore of per-model trainable parameters.
//!
//! In memory, a [`Checkpoint`] maps ensemble indices to a [`ParamSnapshot`]:
//! the ordered list of float parameter values of one model, captured with a
//! burn `ModuleVisitor` and written back with a `ModuleMapper` in the same
//! order. On disk, each model is recorded with burn's
//! `NamedMpkFileRecorder` under `{dir}/{prefix}_model_{index}.mpk`, and the
//! ensemble-level state (weighting, error stack) goes to
//! `{dir}/{prefix}_meta.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::TensorData;
use serde::{Deserialize, Serialize};

use crate::error::{NdeError, Result};

/// Ordered parameter values of a single model.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSnapshot {
    params: Vec<TensorData>,
}

struct ParamCollector {
    params: Vec<TensorData>,
}

impl<B: Backend> ModuleVisitor<B> for ParamCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.params.push(tensor.to_data());
    }
}

struct ParamRestorer<'a> {
    model: usize,
    params: &'a [TensorData],
    position: usize,
    mismatch: Option<NdeError>,
}

impl<B: Backend> ModuleMapper<B> for ParamRestorer<'_> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let position = self.position;
        self.position += 1;
        if self.mismatch.is_some() {
            return tensor;
        }

        let expected = tensor.dims().to_vec();
        let data = match self.params.get(position) {
            Some(data) if data.shape == expected => data.clone(),
            other => {
                self.mismatch = Some(NdeError::ShapeMismatch {
                    model: self.model,
                    param: position,
                    expected,
                    found: other.map(|d| d.shape.clone()).unwrap_or_default(),
                });
                return tensor;
            }
        };

        let require_grad = tensor.is_require_grad();
        Tensor::<B, D>::from_data(data, &tensor.device()).set_require_grad(require_grad)
    }
}

impl ParamSnapshot {
    /// Read the current parameter values of `model` without touching it.
    pub fn capture<B: Backend, M: Module<B>>(model: &M) -> Self {
        let mut collector = ParamCollector { params: Vec::new() };
        model.visit(&mut collector);
        Self {
            params: collector.params,
        }
    }

    /// Parameter values in visiting order.
    pub fn params(&self) -> &[TensorData] {
        &self.params
    }

    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.params.iter().map(|p| p.shape.clone()).collect()
    }

    /// Return `model` with every parameter replaced by the captured value.
    ///
    /// Parameter ids (and thus optimizer state) are preserved. `index` only
    /// labels errors.
    pub fn apply<B: Backend, M: Module<B>>(&self, index: usize, model: M) -> Result<M> {
        let mut restorer = ParamRestorer {
            model: index,
            params: &self.params,
            position: 0,
            mismatch: None,
        };
        let restored = model.map(&mut restorer);
        if let Some(err) = restorer.mismatch {
            return Err(err);
        }
        if restorer.position != self.params.len() {
            return Err(NdeError::ShapeMismatch {
                model: index,
                param: restorer.position,
                expected: Vec::new(),
                found: self.params[restorer.position].shape.clone(),
            });
        }
        Ok(restored)
    }
}

/// In-memory parameter snapshots keyed by ensemble index.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    snapshots: BTreeMap<usize, ParamSnapshot>,
}

fn check_indices<M>(models: &[M], indices: &[usize]) -> Result<()> {
    match indices.iter().find(|&&i| i >= models.len()) {
        Some(&index) => Err(NdeError::InvalidIndex {
            index,
            stack: (0..models.len()).collect(),
        }),
        None => Ok(()),
    }
}

impl Checkpoint {
    /// Snapshot the models at `indices`.
    pub fn capture<B: Backend, M: Module<B>>(models: &[M], indices: &[usize]) -> Result<Self> {
        let mut checkpoint = Self::default();
        checkpoint.update(models, indices)?;
        Ok(checkpoint)
    }

    /// Overwrite the snapshots of `indices` with the models' current values.
    pub fn update<B: Backend, M: Module<B>>(&mut self, models: &[M], indices: &[usize]) -> Result<()> {
        check_indices(models, indices)?;
        for &i in indices {
            self.snapshots.insert(i, ParamSnapshot::capture(&models[i]));
        }
        Ok(())
    }

    /// Write the snapshots of `indices` back into `models`.
    ///
    /// All-or-nothing: if any model fails to restore, none is modified.
    pub fn restore<B: Backend, M: Module<B>>(&self, models: &mut [M], indices: &[usize]) -> Result<()> {
        check_indices(models, indices)?;
        let mut restored = Vec::with_capacity(indices.len());
        for &i in indices {
            let snapshot = self.snapshots.get(&i).ok_or(NdeError::MissingSnapshot(i))?;
            restored.push((i, snapshot.apply(i, models[i].clone())?));
        }
        for (i, model) in restored {
            models[i] = model;
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&ParamSnapshot> {
        self.snapshots.get(&index)
    }

    pub fn indices(&self) -> Vec<usize> {
        self.snapshots.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Path of the parameter file for one model.
pub fn model_path(directory: &Path, prefix: &str, index: usize) -> PathBuf {
    directory.join(format!("{prefix}_model_{index}.mpk"))
}

/// Path of the ensemble metadata file.
pub fn meta_path(directory: &Path, prefix: &str) -> PathBuf {
    directory.join(format!("{prefix}_meta.json"))
}

/// Record the parameters of the models at `indices` to disk.
pub fn persist<B: Backend, M: Module<B>>(
    models: &[M],
    indices: &[usize],
    directory: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Err(NdeError::DirectoryNotFound(directory.to_path_buf()));
    }
    check_indices(models, indices)?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let mut written = Vec::with_capacity(indices.len());
    for &i in indices {
        let path = model_path(directory, prefix, i);
        models[i]
            .clone()
            .save_file(path.clone(), &recorder)
            .map_err(|e| NdeError::Recorder {
                path: path.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(model = i, path = %path.display(), "Saved model parameters");
        written.push(path);
    }
    Ok(written)
}

/// Load previously persisted parameters into the models at `indices`.
///
/// All-or-nothing, like [`Checkpoint::restore`].
pub fn load<B: Backend, M: Module<B>>(
    models: &mut [M],
    indices: &[usize],
    directory: &Path,
    prefix: &str,
    device: &B::Device,
) -> Result<()> {
    check_indices(models, indices)?;
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();

    let mut loaded = Vec::with_capacity(indices.len());
    for &i in indices {
        let path = model_path(directory, prefix, i);
        if !path.is_file() {
            return Err(NdeError::FileNotFound(path));
        }
        let candidate = models[i]
            .clone()
            .load_file(path.clone(), &recorder, device)
            .map_err(|e| NdeError::Recorder {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let expected = ParamSnapshot::capture(&models[i]).shapes();
        let found = ParamSnapshot::capture(&candidate).shapes();
        if let Some(param) = (0..expected.len().max(found.len()))
            .find(|&p| expected.get(p) != found.get(p))
        {
            return Err(NdeError::ShapeMismatch {
                model: i,
                param,
                expected: expected.get(param).cloned().unwrap_or_default(),
                found: found.get(param).cloned().unwrap_or_default(),
            });
        }
        loaded.push((i, candidate));
    }
    for (i, model) in loaded {
        models[i] = model;
    }
    tracing::info!(?indices, directory = %directory.display(), prefix, "Loaded model parameters");
    Ok(())
}

/// Ensemble-level state saved next to the model files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleMeta {
    pub n_models: usize,
    pub weighting: Vec<f64>,
    pub error_stack: Option<Vec<usize>>,
}

impl EnsembleMeta {
    pub fn save(&self, directory: &Path, prefix: &str) -> Result<PathBuf> {
        if !directory.is_dir() {
            return Err(NdeError::DirectoryNotFound(directory.to_path_buf()));
        }
        let path = meta_path(directory, prefix);
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(path)
    }

    pub fn load(directory: &Path, prefix: &str) -> Result<Self> {
        let path = meta_path(directory, prefix);
        if !path.is_file() {
            return Err(NdeError::FileNotFound(path));
        }
        let file = std::fs::File::open(&path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}
