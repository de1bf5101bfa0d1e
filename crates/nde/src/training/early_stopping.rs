//! Per-member patience bookkeeping.

/// Result of feeding one epoch of losses to [`EarlyStopping::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpochDecision {
    /// Members whose validation loss beat their best so far.
    pub improved: Vec<usize>,
    /// Members whose patience ran out this epoch.
    pub ended: Vec<usize>,
}

/// Best losses and patience counters, indexed by ensemble slot.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    counters: Vec<usize>,
    best_train: Vec<f64>,
    best_val: Vec<f64>,
}

impl EarlyStopping {
    pub fn new(n_models: usize, patience: usize) -> Self {
        Self {
            patience,
            counters: vec![0; n_models],
            best_train: vec![0.0; n_models],
            best_val: vec![f64::INFINITY; n_models],
        }
    }

    /// Compare this epoch's losses (aligned with `stack`) to the best so far.
    ///
    /// An improving member has its counter reset and its best losses replaced;
    /// any other member (including a NaN loss) has its counter incremented.
    pub fn update(&mut self, stack: &[usize], train: &[f64], val: &[f64]) -> EpochDecision {
        debug_assert_eq!(stack.len(), train.len());
        debug_assert_eq!(stack.len(), val.len());

        let mut decision = EpochDecision::default();
        for (pos, &model) in stack.iter().enumerate() {
            if val[pos] < self.best_val[model] {
                self.counters[model] = 0;
                self.best_val[model] = val[pos];
                self.best_train[model] = train[pos];
                decision.improved.push(model);
            } else {
                if !val[pos].is_finite() {
                    tracing::warn!(model, val_loss = val[pos], "Non-finite validation loss");
                }
                self.counters[model] += 1;
                if self.counters[model] >= self.patience {
                    decision.ended.push(model);
                }
            }
        }
        decision
    }

    pub fn best_train(&self) -> &[f64] {
        &self.best_train
    }

    pub fn best_val(&self) -> &[f64] {
        &self.best_val
    }

    pub fn counter(&self, model: usize) -> usize {
        self.counters[model]
    }

    /// Counters of the members on `stack`, in stack order.
    pub fn counters_for(&self, stack: &[usize]) -> Vec<usize> {
        stack.iter().map(|&i| self.counters[i]).collect()
    }
}
