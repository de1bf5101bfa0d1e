//! Training and evaluation pipelines behind the CLI subcommands.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::optim::AdamConfig;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use nde::model::bridge::{rows_to_tensor, tensor_to_vec};
use nde::{DensityEstimator, Nde};

use crate::config::{build_fit_config, load_ensemble_toml, EnsembleToml};

type EvalBackend = NdArray<f32>;
type TrainBackend = Autodiff<EvalBackend>;

/// Simulation or evaluation points: row `i` of `data` pairs with row `i` of `theta`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SimulationFile {
    pub theta: Vec<Vec<f32>>,
    pub data: Vec<Vec<f32>>,
}

impl SimulationFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
        let sims: Self = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))?;
        Ok(sims)
    }

    /// Check row counts and widths against the ensemble dimensions.
    pub fn check(&self, config: &EnsembleToml) -> anyhow::Result<()> {
        if self.theta.len() != self.data.len() {
            anyhow::bail!(
                "{} theta rows but {} data rows",
                self.theta.len(),
                self.data.len()
            );
        }
        if let Some((i, _)) = self.theta.iter().enumerate().find(|(_, r)| r.len() != config.n_parameters) {
            anyhow::bail!("theta row {i} does not have {} columns", config.n_parameters);
        }
        if let Some((i, _)) = self.data.iter().enumerate().find(|(_, r)| r.len() != config.n_data) {
            anyhow::bail!("data row {i} does not have {} columns", config.n_data);
        }
        Ok(())
    }

    fn tensors<B: Backend>(&self, device: &B::Device) -> anyhow::Result<(Tensor<B, 2>, Tensor<B, 2>)> {
        Ok((rows_to_tensor(&self.theta, device)?, rows_to_tensor(&self.data, device)?))
    }
}

/// Arguments for the `train` subcommand.
#[derive(Debug)]
pub struct TrainArgs {
    pub config: PathBuf,
    pub simulations: PathBuf,
    pub output_dir: PathBuf,
    pub prefix: String,
    pub epochs: Option<usize>,
    pub seed: Option<u64>,
    pub no_progress: bool,
}

/// Arguments for the `evaluate` subcommand.
#[derive(Debug)]
pub struct EvaluateArgs {
    pub config: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub prefix: String,
    pub points: PathBuf,
    pub output: Option<PathBuf>,
}

/// Scores of one evaluation point.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PointScore {
    pub row: usize,
    pub weighted_log_prob: f64,
    pub weighted_log_posterior: f64,
    pub geometric_mean: f64,
}

/// Train an ensemble on a simulation file and write checkpoints plus loss history.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Load config and simulations
    let toml = load_ensemble_toml(&args.config)?;
    let sims = SimulationFile::load(&args.simulations)?;
    sims.check(&toml)?;
    tracing::info!(n_sims = sims.theta.len(), "Loaded simulations");

    // 2. Build ensemble
    let device = Default::default();
    let prior = toml.prior.build()?;
    if prior.dim() != toml.n_parameters {
        anyhow::bail!("prior has dimension {}, expected {}", prior.dim(), toml.n_parameters);
    }
    let models: Vec<DensityEstimator<TrainBackend>> = toml.build_models(&device);
    let kinds: Vec<&str> = models.iter().map(|m| m.kind()).collect();
    tracing::info!(?kinds, "Built ensemble members");
    let mut ensemble = Nde::new(models, prior, &device)?;
    let mut optimizer = AdamConfig::new().init::<TrainBackend, Vec<DensityEstimator<TrainBackend>>>();

    // 3. Train
    std::fs::create_dir_all(&args.output_dir)?;
    let fit = build_fit_config(&toml.fit, args.epochs, args.seed, args.no_progress)
        .with_file_name(Some(args.prefix.clone()))
        .with_checkpoint_dir(Some(args.output_dir.to_string_lossy().into_owned()));
    let (theta, data) = sims.tensors::<TrainBackend>(&device)?;
    let history = ensemble.fit(&mut optimizer, theta, data, &fit)?;

    // 4. Loss history
    let history_path = args.output_dir.join(format!("{}_history.json", args.prefix));
    history.save(&history_path)?;

    tracing::info!(
        epochs_run = history.epochs_run(),
        weighting = ?ensemble.weighting(),
        history = %history_path.display(),
        elapsed_secs = format!("{:.1}", start.elapsed().as_secs_f64()),
        "Training complete"
    );
    Ok(())
}

/// Score points with a trained ensemble.
pub fn evaluate_points(
    toml: &EnsembleToml,
    checkpoint_dir: &Path,
    prefix: &str,
    points: &SimulationFile,
) -> anyhow::Result<Vec<PointScore>> {
    points.check(toml)?;
    let device = Default::default();
    let prior = toml.prior.build()?;
    let models: Vec<DensityEstimator<EvalBackend>> = toml.build_models(&device);
    let mut ensemble = Nde::new(models, prior, &device)?;
    ensemble.load(checkpoint_dir, prefix)?;

    let (theta, data) = points.tensors::<EvalBackend>(&device)?;
    let wlp = tensor_to_vec(ensemble.weighted_log_prob(data.clone(), theta.clone(), None)?);
    let posterior = tensor_to_vec(ensemble.weighted_log_posterior(data.clone(), theta.clone(), None)?);
    let geometric = tensor_to_vec(ensemble.geometric_mean(data, theta, None)?);

    Ok(wlp
        .into_iter()
        .zip(posterior)
        .zip(geometric)
        .enumerate()
        .map(|(row, ((weighted_log_prob, weighted_log_posterior), geometric_mean))| PointScore {
            row,
            weighted_log_prob,
            weighted_log_posterior,
            geometric_mean,
        })
        .collect())
}

/// Load a trained ensemble and print (or write) per-point scores as JSON.
pub fn run_evaluate(args: EvaluateArgs) -> anyhow::Result<()> {
    let toml = load_ensemble_toml(&args.config)?;
    let points = SimulationFile::load(&args.points)?;
    let scores = evaluate_points(&toml, &args.checkpoint_dir, &args.prefix, &points)?;

    let json = serde_json::to_string_pretty(&scores)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!(n_points = scores.len(), output = %path.display(), "Wrote scores");
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENSEMBLE: &str = r#"
n_parameters = 1
n_data = 1

[prior]
type = "Uniform"
lower = [0.0]
upper = [1.0]

[[models]]
type = "Maf"
n_mades = 1
n_hidden = [8]
input_order = "LeftToRight"

[[models]]
type = "Mdn"
n_components = 2
n_hidden = [8]

[fit]
n_batch = 20
patience = 50
learning_rate = 0.001
progress_bar = false
"#;

    fn simulation_file(n: usize) -> SimulationFile {
        let theta: Vec<Vec<f32>> = (0..n).map(|i| vec![(i as f32 + 0.5) / n as f32]).collect();
        let data = theta
            .iter()
            .enumerate()
            .map(|(i, t)| vec![t[0] + 0.05 * (i as f32 * 1.7).sin()])
            .collect();
        SimulationFile { theta, data }
    }

    fn write_inputs(dir: &Path) -> (PathBuf, PathBuf) {
        let config = dir.join("ensemble.toml");
        std::fs::write(&config, ENSEMBLE).unwrap();
        let sims = dir.join("sims.json");
        std::fs::write(&sims, serde_json::to_string(&simulation_file(100)).unwrap()).unwrap();
        (config, sims)
    }

    #[test]
    fn test_check_rejects_wrong_widths() {
        let toml: EnsembleToml = toml::from_str(ENSEMBLE).unwrap();
        let mut sims = simulation_file(4);
        sims.check(&toml).unwrap();

        sims.data[2].push(1.0);
        assert!(sims.check(&toml).is_err());

        let mut sims = simulation_file(4);
        sims.theta.pop();
        assert!(sims.check(&toml).is_err());
    }

    #[test]
    fn test_train_then_evaluate() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (config, simulations) = write_inputs(tmp.path());
        let output_dir = tmp.path().join("out");

        run_train(TrainArgs {
            config: config.clone(),
            simulations,
            output_dir: output_dir.clone(),
            prefix: "run".to_string(),
            epochs: Some(3),
            seed: Some(5),
            no_progress: true,
        })
        .unwrap();

        assert!(output_dir.join("run_model_0.mpk").exists());
        assert!(output_dir.join("run_model_1.mpk").exists());
        assert!(output_dir.join("run_meta.json").exists());
        let history = nde::TrainingHistory::load(&output_dir.join("run_history.json")).unwrap();
        assert_eq!(history.shape(), (3, 2));

        let toml = load_ensemble_toml(&config).unwrap();
        let points = SimulationFile {
            theta: vec![vec![0.5], vec![1.5]],
            data: vec![vec![0.5], vec![1.5]],
        };
        let scores = evaluate_points(&toml, &output_dir, "run", &points).unwrap();
        assert_eq!(scores.len(), 2);

        // Inside the unit prior the log prior is zero.
        let inside = &scores[0];
        assert!(inside.weighted_log_prob.is_finite());
        assert!((inside.weighted_log_posterior - inside.weighted_log_prob).abs() < 1e-4);
        assert!((inside.geometric_mean - 0.5 * inside.weighted_log_prob).abs() < 1e-4);

        // Outside it the posterior vanishes.
        assert_eq!(scores[1].row, 1);
        assert_eq!(scores[1].weighted_log_posterior, f64::NEG_INFINITY);
    }

    #[test]
    fn test_evaluate_without_checkpoint_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let toml: EnsembleToml = toml::from_str(ENSEMBLE).unwrap();
        let points = simulation_file(2);
        assert!(evaluate_points(&toml, &tmp.path().join("missing"), "run", &points).is_err());
    }
}
