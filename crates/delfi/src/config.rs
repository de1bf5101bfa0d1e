//! TOML config loading for the delfi CLI.
//!
//! Deserializes an ensemble description (`configs/ensemble.toml`) with the
//! problem dimensions, a `[prior]`, one `[[models]]` table per ensemble member
//! and optional `[fit]` overrides, then merges the fit options with CLI flags.

use std::path::Path;

use burn::prelude::*;
use nde::{DensityEstimator, FitConfig, InputOrder, MafConfig, MdnConfig, PriorDistribution};
use serde::Deserialize;

/// Top-level structure matching `configs/ensemble.toml`.
#[derive(Debug, Deserialize)]
pub struct EnsembleToml {
    /// Dimension of the conditioning parameters θ.
    pub n_parameters: usize,
    /// Dimension of the simulated data.
    pub n_data: usize,
    /// Prior over θ.
    pub prior: PriorDistribution,
    /// Ensemble members, in index order.
    pub models: Vec<ModelSpec>,
    /// Training overrides.
    #[serde(default)]
    pub fit: FitOverrides,
}

/// Architecture of one ensemble member.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ModelSpec {
    Maf {
        #[serde(default = "default_n_mades")]
        n_mades: usize,
        #[serde(default = "default_n_hidden")]
        n_hidden: Vec<usize>,
        #[serde(default = "default_input_order")]
        input_order: InputOrder,
    },
    Mdn {
        #[serde(default = "default_n_components")]
        n_components: usize,
        #[serde(default = "default_n_hidden")]
        n_hidden: Vec<usize>,
    },
}

// Architecture defaults come from the library configs.
fn default_n_mades() -> usize {
    MafConfig::new(1, 1).n_mades
}
fn default_n_hidden() -> Vec<usize> {
    vec![50, 50]
}
fn default_input_order() -> InputOrder {
    InputOrder::Random
}
fn default_n_components() -> usize {
    MdnConfig::new(1, 1).n_components
}

impl ModelSpec {
    pub fn build<B: Backend>(&self, n_parameters: usize, n_data: usize, device: &B::Device) -> DensityEstimator<B> {
        match self {
            Self::Maf {
                n_mades,
                n_hidden,
                input_order,
            } => MafConfig::new(n_parameters, n_data)
                .with_n_mades(*n_mades)
                .with_n_hidden(n_hidden.clone())
                .with_input_order(*input_order)
                .init(device)
                .into(),
            Self::Mdn {
                n_components,
                n_hidden,
            } => MdnConfig::new(n_parameters, n_data)
                .with_n_components(*n_components)
                .with_n_hidden(n_hidden.clone())
                .init(device)
                .into(),
        }
    }
}

/// Optional overrides for `FitConfig` fields.
#[derive(Debug, Default, Deserialize)]
pub struct FitOverrides {
    pub f_val: Option<f64>,
    pub epochs: Option<usize>,
    pub n_batch: Option<usize>,
    pub patience: Option<usize>,
    pub learning_rate: Option<f64>,
    pub progress_bar: Option<bool>,
    pub seed: Option<u64>,
}

impl EnsembleToml {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.n_parameters == 0 || self.n_data == 0 {
            anyhow::bail!("n_parameters and n_data must be positive");
        }
        if self.models.is_empty() {
            anyhow::bail!("at least one [[models]] entry is required");
        }
        for (i, model) in self.models.iter().enumerate() {
            let ok = match model {
                ModelSpec::Maf { n_mades, .. } => *n_mades > 0,
                ModelSpec::Mdn { n_components, .. } => *n_components > 0,
            };
            if !ok {
                anyhow::bail!("model {i} needs at least one MADE / mixture component");
            }
        }
        Ok(())
    }

    /// Build every ensemble member on `device`.
    pub fn build_models<B: Backend>(&self, device: &B::Device) -> Vec<DensityEstimator<B>> {
        self.models
            .iter()
            .map(|spec| spec.build(self.n_parameters, self.n_data, device))
            .collect()
    }
}

/// Load and deserialize an `EnsembleToml` from a TOML file.
pub fn load_ensemble_toml(path: &Path) -> anyhow::Result<EnsembleToml> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    let config: EnsembleToml = toml::from_str(&contents)?;
    config.validate()?;
    tracing::info!(
        path = %path.display(),
        n_models = config.models.len(),
        "Loaded ensemble config"
    );
    Ok(config)
}

/// Build a `FitConfig` from defaults, TOML overrides, and CLI flags.
///
/// Priority chain: `FitConfig` defaults < TOML `[fit]` < CLI flags.
pub fn build_fit_config(
    overrides: &FitOverrides,
    epochs_cli: Option<usize>,
    seed_cli: Option<u64>,
    no_progress_cli: bool,
) -> FitConfig {
    let mut config = FitConfig::new();

    // Apply TOML overrides
    if let Some(v) = overrides.f_val {
        config.f_val = v;
    }
    if let Some(v) = overrides.epochs {
        config.epochs = v;
    }
    if let Some(v) = overrides.n_batch {
        config.n_batch = v;
    }
    if let Some(v) = overrides.patience {
        config.patience = v;
    }
    if let Some(v) = overrides.learning_rate {
        config.learning_rate = v;
    }
    if let Some(v) = overrides.progress_bar {
        config.progress_bar = v;
    }
    config.seed = overrides.seed;

    // CLI overrides take highest priority
    if let Some(v) = epochs_cli {
        config.epochs = v;
    }
    if seed_cli.is_some() {
        config.seed = seed_cli;
    }
    if no_progress_cli {
        config.progress_bar = false;
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
n_parameters = 2
n_data = 3

[prior]
type = "Uniform"
lower = [0.0, 0.0]
upper = [1.0, 2.0]

[[models]]
type = "Maf"
n_mades = 2
n_hidden = [30, 30]
input_order = "LeftToRight"

[[models]]
type = "Mdn"
n_components = 4

[fit]
epochs = 300
patience = 10
learning_rate = 0.001
seed = 42
"#;

    #[test]
    fn test_deserialize_full_ensemble_toml() {
        let config: EnsembleToml = toml::from_str(FULL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.n_parameters, 2);
        assert_eq!(config.models.len(), 2);
        assert_eq!(
            config.models[0],
            ModelSpec::Maf {
                n_mades: 2,
                n_hidden: vec![30, 30],
                input_order: InputOrder::LeftToRight,
            }
        );
        assert_eq!(
            config.models[1],
            ModelSpec::Mdn {
                n_components: 4,
                n_hidden: vec![50, 50],
            }
        );
        assert_eq!(config.fit.epochs, Some(300));
        assert!(config.fit.n_batch.is_none());
        assert_eq!(config.prior.build().unwrap().dim(), 2);
    }

    #[test]
    fn test_deserialize_defaults() {
        let toml_str = r#"
n_parameters = 1
n_data = 1

[prior]
type = "Gaussian"
mean = [0.0]
std = [1.0]

[[models]]
type = "Maf"
"#;
        let config: EnsembleToml = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.models[0],
            ModelSpec::Maf {
                n_mades: 1,
                n_hidden: vec![50, 50],
                input_order: InputOrder::Random,
            }
        );
        assert_eq!(default_n_mades(), MafConfig::new(1, 1).n_mades);
        assert!(config.fit.epochs.is_none());
    }

    #[test]
    fn test_validate_rejects_empty_ensemble() {
        let toml_str = r#"
n_parameters = 1
n_data = 1
models = []

[prior]
type = "Gaussian"
mean = [0.0]
std = [1.0]
"#;
        let config: EnsembleToml = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_override_priority() {
        let config: EnsembleToml = toml::from_str(FULL).unwrap();

        let fit = build_fit_config(&config.fit, None, None, false);
        assert_eq!(fit.epochs, 300);
        assert_eq!(fit.patience, 10);
        assert_eq!(fit.n_batch, 100);
        assert_eq!(fit.seed, Some(42));
        assert!(fit.progress_bar);

        let fit = build_fit_config(&config.fit, Some(5), Some(7), true);
        assert_eq!(fit.epochs, 5);
        assert_eq!(fit.seed, Some(7));
        assert!(!fit.progress_bar);
    }
}
