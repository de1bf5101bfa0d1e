mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pipeline::{EvaluateArgs, TrainArgs};

/// delfi: train and evaluate neural density estimator ensembles.
#[derive(Parser)]
#[command(name = "delfi", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for ensemble training and evaluation.
#[derive(Subcommand)]
enum Command {
    /// Train an ensemble on simulations and save checkpoints.
    Train {
        /// Path to ensemble config TOML file.
        #[arg(long, default_value = "configs/ensemble.toml")]
        config: PathBuf,
        /// Simulation JSON file with `theta` and `data` rows.
        #[arg(long)]
        simulations: PathBuf,
        /// Directory for model checkpoints and loss history.
        #[arg(long, default_value = "checkpoints/nde")]
        output_dir: PathBuf,
        /// File prefix for checkpoints.
        #[arg(long, default_value = "nde")]
        prefix: String,
        /// Override the maximum number of epochs.
        #[arg(long)]
        epochs: Option<usize>,
        /// Seed for the train/validation split.
        #[arg(long)]
        seed: Option<u64>,
        /// Disable the progress bar.
        #[arg(long)]
        no_progress: bool,
    },
    /// Score points with a trained ensemble.
    Evaluate {
        /// Path to the ensemble config TOML file used for training.
        #[arg(long, default_value = "configs/ensemble.toml")]
        config: PathBuf,
        /// Directory holding the checkpoints.
        #[arg(long, default_value = "checkpoints/nde")]
        checkpoint_dir: PathBuf,
        /// File prefix of the checkpoints.
        #[arg(long, default_value = "nde")]
        prefix: String,
        /// JSON file with `theta` and `data` rows to score.
        #[arg(long)]
        points: PathBuf,
        /// Write scores here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train {
            config,
            simulations,
            output_dir,
            prefix,
            epochs,
            seed,
            no_progress,
        } => pipeline::run_train(TrainArgs {
            config,
            simulations,
            output_dir,
            prefix,
            epochs,
            seed,
            no_progress,
        }),
        Command::Evaluate {
            config,
            checkpoint_dir,
            prefix,
            points,
            output,
        } => pipeline::run_evaluate(EvaluateArgs {
            config,
            checkpoint_dir,
            prefix,
            points,
            output,
        }),
    }
}
