//! Active-member bookkeeping for the ensemble.
//!
//! Ensemble slots keep their indices for the lifetime of the ensemble; the
//! "stack" is just the ordered list of indices still being trained or
//! evaluated. An optional error-stack override removes flagged members from
//! every default stack until it is cleared.

use crate::error::{NdeError, Result};

/// Tracks the full index range and the persistent exclusion set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackManager {
    n_models: usize,
    excluded: Option<Vec<usize>>,
}

impl StackManager {
    pub fn new(n_models: usize) -> Self {
        Self {
            n_models,
            excluded: None,
        }
    }

    pub fn n_models(&self) -> usize {
        self.n_models
    }

    /// The full range `[0, n_models)`, ignoring any override.
    pub fn initialize(&self) -> Vec<usize> {
        (0..self.n_models).collect()
    }

    /// The stack used whenever none is given: full range minus the error stack.
    pub fn default_stack(&self) -> Vec<usize> {
        match &self.excluded {
            Some(excluded) => restrict_stack(&self.initialize(), excluded),
            None => self.initialize(),
        }
    }

    /// Indices currently flagged as errored, if any.
    pub fn excluded(&self) -> Option<&[usize]> {
        self.excluded.as_deref()
    }

    /// Flag `indices` as errored. Replaces any previous override.
    pub fn set_excluded(&mut self, indices: &[usize]) -> Result<()> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.n_models) {
            return Err(NdeError::InvalidIndex {
                index,
                stack: self.initialize(),
            });
        }
        let mut excluded = indices.to_vec();
        excluded.sort_unstable();
        excluded.dedup();
        tracing::info!(?excluded, "Error stack set");
        self.excluded = Some(excluded);
        Ok(())
    }

    pub fn clear_excluded(&mut self) {
        if self.excluded.take().is_some() {
            tracing::info!("Error stack cleared");
        }
    }

    /// Check that every entry of `stack` is a valid ensemble index.
    pub fn validate(&self, stack: &[usize]) -> Result<()> {
        match stack.iter().find(|&&i| i >= self.n_models) {
            Some(&index) => Err(NdeError::InvalidIndex {
                index,
                stack: self.initialize(),
            }),
            None => Ok(()),
        }
    }
}

/// `full` without any index listed in `excluded`, order preserved.
pub fn restrict_stack(full: &[usize], excluded: &[usize]) -> Vec<usize> {
    full.iter()
        .copied()
        .filter(|i| !excluded.contains(i))
        .collect()
}

/// Remove `indices` from `stack`, preserving the order of the survivors.
///
/// Every index must be present (a repeated index counts as absent the second
/// time). On error the stack is left untouched. When `epoch` is given (0-based)
/// a termination notice is emitted per removed index.
pub fn remove_indices(stack: &mut Vec<usize>, indices: &[usize], epoch: Option<usize>) -> Result<()> {
    let mut remaining = stack.clone();
    for &index in indices {
        match remaining.iter().position(|&i| i == index) {
            Some(pos) => {
                remaining.remove(pos);
            }
            None => {
                return Err(NdeError::InvalidIndex {
                    index,
                    stack: remaining,
                })
            }
        }
    }
    *stack = remaining;

    if let Some(epoch) = epoch {
        for &model in indices {
            tracing::info!(
                model,
                epoch = epoch + 1,
                "Training terminated for model {model} at epoch {}",
                epoch + 1
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_full_range() {
        let manager = StackManager::new(4);
        assert_eq!(manager.initialize(), vec![0, 1, 2, 3]);
        assert_eq!(manager.default_stack(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut stack = vec![0, 1, 2, 3, 4];
        remove_indices(&mut stack, &[3, 1], Some(7)).unwrap();
        assert_eq!(stack, vec![0, 2, 4]);
    }

    #[test]
    fn test_remove_twice_fails() {
        let mut stack = vec![0, 1, 2];
        remove_indices(&mut stack, &[1], None).unwrap();
        let err = remove_indices(&mut stack, &[1], None).unwrap_err();
        assert!(matches!(err, NdeError::InvalidIndex { index: 1, .. }));
        assert_eq!(stack, vec![0, 2]);
    }

    #[test]
    fn test_remove_duplicate_in_one_call_is_atomic() {
        let mut stack = vec![0, 1, 2];
        let err = remove_indices(&mut stack, &[2, 2], None).unwrap_err();
        assert!(matches!(err, NdeError::InvalidIndex { index: 2, .. }));
        assert_eq!(stack, vec![0, 1, 2], "failed removal must not mutate");
    }

    #[test]
    fn test_error_stack_override() {
        let mut manager = StackManager::new(5);
        manager.set_excluded(&[3, 1]).unwrap();
        assert_eq!(manager.default_stack(), vec![0, 2, 4]);
        assert_eq!(manager.initialize(), vec![0, 1, 2, 3, 4]);
        assert_eq!(manager.excluded(), Some(&[1, 3][..]));

        manager.clear_excluded();
        assert_eq!(manager.default_stack(), vec![0, 1, 2, 3, 4]);
        assert!(manager.excluded().is_none());
    }

    #[test]
    fn test_error_stack_rejects_out_of_range() {
        let mut manager = StackManager::new(2);
        assert!(matches!(
            manager.set_excluded(&[2]),
            Err(NdeError::InvalidIndex { index: 2, .. })
        ));
        assert!(manager.excluded().is_none());
    }

    #[test]
    fn test_restrict_stack() {
        assert_eq!(restrict_stack(&[0, 1, 2, 3], &[0, 3]), vec![1, 2]);
        assert_eq!(restrict_stack(&[0, 1], &[]), vec![0, 1]);
    }

    #[test]
    fn test_validate() {
        let manager = StackManager::new(3);
        assert!(manager.validate(&[0, 2]).is_ok());
        assert!(manager.validate(&[0, 3]).is_err());
    }
}
