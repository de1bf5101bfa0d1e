use std::path::PathBuf;

/// Errors raised by ensemble training, evaluation and checkpointing.
#[derive(Debug, thiserror::Error)]
pub enum NdeError {
    /// A model index is not part of the stack (or not part of the ensemble).
    #[error("model index {index} is not in the stack {stack:?}")]
    InvalidIndex { index: usize, stack: Vec<usize> },

    /// An operation needs at least one live model.
    #[error("the stack is empty")]
    EmptyStack,

    /// A restored parameter does not match the live parameter layout.
    #[error(
        "shape mismatch for model {model}, parameter {param}: expected {expected:?}, found {found:?}"
    )]
    ShapeMismatch {
        model: usize,
        param: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// Checkpoint directory does not exist.
    #[error("{} does not exist", .0.display())]
    DirectoryNotFound(PathBuf),

    /// Expected checkpoint file is missing.
    #[error("{} does not exist", .0.display())]
    FileNotFound(PathBuf),

    /// No in-memory snapshot has been captured for this model.
    #[error("no snapshot captured for model {0}")]
    MissingSnapshot(usize),

    /// The train/validation split leaves one side without a single batch.
    #[error("degenerate split: n_sims={n_sims}, n_train={n_train}, n_val={n_val}")]
    DegenerateSplit {
        n_sims: usize,
        n_train: usize,
        n_val: usize,
    },

    /// Training or evaluation inputs are malformed.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Configuration values out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Failure inside a burn recorder while saving or loading parameters.
    #[error("recorder error for {}: {message}", .path.display())]
    Recorder { path: PathBuf, message: String },

    /// Metadata (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// IO error from checkpoint files.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NdeError>;
