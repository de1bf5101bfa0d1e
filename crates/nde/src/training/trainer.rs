//! Joint training of the ensemble with per-member early stopping.
//!
//! Every batch takes one optimizer step over all members still on the stack:
//! the live members are gathered into a `Vec<M>` module, the loss is the
//! mean of their negative mean log-likelihoods, and the updated members are
//! written back to their slots. After each epoch the validation losses
//! decide which members improved (snapshot kept in memory) and which ran out
//! of patience (restored to their best snapshot and dropped from the stack).

use std::path::Path;

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::checkpoint::Checkpoint;
use crate::density::ConditionalDensity;
use crate::ensemble::Nde;
use crate::error::{NdeError, Result};
use crate::model::bridge::tensor_to_vec;
use crate::stack::remove_indices;
use crate::training::config::FitConfig;
use crate::training::data::{n_train_batches, Simulations, TrainValSplit};
use crate::training::early_stopping::EarlyStopping;
use crate::training::history::TrainingHistory;

/// `softmax(-best_val)` with the max subtracted first.
///
/// Non-finite losses get weight 0; if none is finite the result is uniform.
pub fn loss_weighting(best_val: &[f64]) -> Vec<f64> {
    let n = best_val.len();
    let max = best_val
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| -v)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![1.0 / n as f64; n];
    }

    let exp: Vec<f64> = best_val
        .iter()
        .map(|v| if v.is_finite() { (-v - max).exp() } else { 0.0 })
        .collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

fn format_losses(losses: &[f64]) -> String {
    let parts: Vec<String> = losses.iter().map(|l| format!("{l:.3}")).collect();
    format!("[{}]", parts.join(", "))
}

fn progress_bar(epochs: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(epochs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb
}

impl<B, M, P> Nde<B, M, P>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ConditionalDensity<B>,
    M::InnerModule: ConditionalDensity<B::InnerBackend>,
{
    /// Train every member on the default stack.
    ///
    /// `conditional` holds the simulation parameters (rows of θ) and `data`
    /// the matching simulated data. Returns the best-so-far train/validation
    /// losses after each epoch, shaped `(epochs_run, n_models)`. On return
    /// the weighting is `softmax(-best_val_loss)` and the stack is back to
    /// its default.
    pub fn fit<O>(
        &mut self,
        optimizer: &mut O,
        conditional: Tensor<B, 2>,
        data: Tensor<B, 2>,
        config: &FitConfig,
    ) -> Result<TrainingHistory>
    where
        O: Optimizer<Vec<M>, B>,
    {
        config.validate()?;
        let simulations = Simulations::new(conditional, data)?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let split = TrainValSplit::new(simulations.len(), config.f_val, &mut rng)?;
        let divisor = n_train_batches(split.n_train(), config.n_batch);
        let (val_conditional, val_data) = simulations.select(split.val());
        let (val_conditional, val_data) = (val_conditional.inner(), val_data.inner());

        self.reset_stack();
        let mut stack = self.stack.clone();
        if stack.is_empty() {
            return Err(NdeError::EmptyStack);
        }

        // Every member has a restore target from the start.
        let mut best = Checkpoint::capture::<B, M>(&self.models, &stack)?;
        let mut early_stopping = EarlyStopping::new(self.n_models(), config.patience);
        let mut history = TrainingHistory::default();

        tracing::info!(
            n_sims = simulations.len(),
            n_train = split.n_train(),
            n_val = split.n_val(),
            n_train_batches = divisor,
            ?stack,
            "Starting ensemble training"
        );

        let pb = progress_bar(config.epochs, config.progress_bar);
        for epoch in 0..config.epochs {
            let batches = split.train_batches(config.n_batch, &mut rng);
            let train_loss = self.train_epoch(
                optimizer,
                &simulations,
                &batches,
                &stack,
                config.learning_rate,
                divisor,
            );
            let val_loss = self.validation_loss(&stack, val_conditional.clone(), val_data.clone());

            let decision = early_stopping.update(&stack, &train_loss, &val_loss);
            best.update::<B, M>(&self.models, &decision.improved)?;

            pb.set_message(format!(
                "train {} val {} patience {:?} stack {:?}",
                format_losses(&train_loss),
                format_losses(&val_loss),
                early_stopping.counters_for(&stack),
                stack
            ));

            if !decision.ended.is_empty() {
                best.restore::<B, M>(&mut self.models, &decision.ended)?;
                remove_indices(&mut stack, &decision.ended, Some(epoch))?;
            }

            history.push(early_stopping.best_train(), early_stopping.best_val());
            pb.inc(1);

            tracing::debug!(
                epoch = epoch + 1,
                train = %format_losses(&train_loss),
                val = %format_losses(&val_loss),
                ?stack,
                "Epoch complete"
            );

            if stack.is_empty() {
                break;
            }
        }
        pb.finish_and_clear();

        self.weighting = loss_weighting(early_stopping.best_val());
        self.reset_stack();

        tracing::info!(
            epochs_run = history.epochs_run(),
            best_val = %format_losses(early_stopping.best_val()),
            weighting = %format_losses(&self.weighting),
            "Training finished"
        );

        if let Some(prefix) = &config.file_name {
            let directory = config.checkpoint_dir.as_deref().unwrap_or(".");
            self.save(Path::new(directory), prefix)?;
        }

        Ok(history)
    }

    /// One pass over the training batches; returns each live member's summed
    /// batch loss divided by `divisor`, in stack order.
    fn train_epoch<O>(
        &mut self,
        optimizer: &mut O,
        simulations: &Simulations<B>,
        batches: &[Vec<usize>],
        stack: &[usize],
        learning_rate: f64,
        divisor: usize,
    ) -> Vec<f64>
    where
        O: Optimizer<Vec<M>, B>,
    {
        let mut totals = vec![0.0; stack.len()];
        for rows in batches {
            let (conditional, data) = simulations.select(rows);
            let live: Vec<M> = stack.iter().map(|&i| self.models[i].clone()).collect();

            let losses: Vec<Tensor<B, 1>> = live
                .iter()
                .map(|model| model.log_prob(data.clone(), conditional.clone()).mean().neg())
                .collect();
            let losses = Tensor::cat(losses, 0);

            // Host values before backward consumes the graph
            for (total, loss) in totals.iter_mut().zip(tensor_to_vec(losses.clone())) {
                *total += loss;
            }

            let grads = GradientsParams::from_grads(losses.mean().backward(), &live);
            let updated = optimizer.step(learning_rate, live, grads);
            for (&i, model) in stack.iter().zip(updated) {
                self.models[i] = model;
            }
        }
        totals.into_iter().map(|t| t / divisor as f64).collect()
    }

    /// Negative mean log-likelihood of the validation set per live member,
    /// evaluated without gradients.
    fn validation_loss(
        &self,
        stack: &[usize],
        conditional: Tensor<B::InnerBackend, 2>,
        data: Tensor<B::InnerBackend, 2>,
    ) -> Vec<f64> {
        stack
            .iter()
            .map(|&i| {
                let model = self.models[i].valid();
                model
                    .log_prob(data.clone(), conditional.clone())
                    .mean()
                    .neg()
                    .into_scalar()
                    .elem::<f64>()
            })
            .collect()
    }
}
