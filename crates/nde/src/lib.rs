//! Neural density estimator (NDE) ensembles for likelihood-free inference.
//!
//! An [`Nde`] holds N conditional density estimators `p(data | θ)` and a prior
//! `π(θ)`. [`Nde::fit`] trains all members jointly (one optimizer step per
//! batch over every member still training) with per-member early stopping,
//! then weights the members by `softmax(-best validation loss)`. The
//! evaluation methods combine the members into a weighted mixture and, with
//! the prior, into (log) posteriors.

pub mod checkpoint;
pub mod density;
pub mod ensemble;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod prior;
pub mod stack;
pub mod training;

pub use checkpoint::{Checkpoint, EnsembleMeta, ParamSnapshot};
pub use density::ConditionalDensity;
pub use ensemble::Nde;
pub use error::{NdeError, Result};
pub use evaluator::{weighted_moments, WeightedMoments};
pub use model::estimator::DensityEstimator;
pub use model::made::InputOrder;
pub use model::maf::{ConditionalMaf, MafConfig};
pub use model::mdn::{MdnConfig, MixtureDensityNetwork};
pub use prior::{AnyPrior, GaussianPrior, Prior, PriorDistribution, UniformPrior};
pub use stack::StackManager;
pub use training::config::FitConfig;
pub use training::history::TrainingHistory;
