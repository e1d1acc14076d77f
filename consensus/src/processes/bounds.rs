//! Resource and bounds validation at ingress.
//!
//! Budgets are declared at commit and enforced again against the
//! materialized parameters at reveal. A first offense inside the rolling
//! window is rejected without slashing; repeat offenses slash reputation.

use std::collections::HashMap;

use doin_consensus_core::domain::{Domain, ResourceBudget};
use doin_consensus_core::errors::optima::{OptimaError, OptimaResult};
use doin_consensus_core::peer::PeerId;

/// Size in bytes of one parameter-vector element; dimension bounds are
/// expressed in elements.
pub const PARAM_ELEMENT_BYTES: usize = 8;

pub struct BoundsValidator {
    max_param_bytes: usize,
    max_training_seconds: u64,
    max_memory_mb: u64,
    offense_window_blocks: u64,
    /// Heights of recorded offenses per peer
    offenses: HashMap<PeerId, Vec<u64>>,
}

impl BoundsValidator {
    pub fn new(max_param_bytes: usize, max_training_seconds: u64, max_memory_mb: u64, offense_window_blocks: u64) -> Self {
        Self { max_param_bytes, max_training_seconds, max_memory_mb, offense_window_blocks, offenses: HashMap::new() }
    }

    /// Validates the budgets declared with a commit.
    pub fn check_declared(&self, budget: ResourceBudget) -> OptimaResult<()> {
        if budget.training_seconds > self.max_training_seconds {
            return Err(OptimaError::TrainingBudgetExceeded(budget.training_seconds, self.max_training_seconds));
        }
        if budget.memory_mb > self.max_memory_mb {
            return Err(OptimaError::MemoryBudgetExceeded(budget.memory_mb, self.max_memory_mb));
        }
        Ok(())
    }

    /// Validates materialized parameters at reveal against the global cap and
    /// the domain's dimension bounds.
    pub fn check_materialized(&self, domain: &Domain, parameters: &[u8]) -> OptimaResult<()> {
        if parameters.len() > self.max_param_bytes {
            return Err(OptimaError::ParamBytesExceeded(parameters.len(), self.max_param_bytes));
        }
        let dimension = parameters.len() / PARAM_ELEMENT_BYTES;
        if dimension < domain.min_dimensions || dimension > domain.max_dimensions {
            return Err(OptimaError::DimensionOutOfBounds(dimension, domain.min_dimensions, domain.max_dimensions));
        }
        Ok(())
    }

    /// Records an offense at `height`; returns true when the peer already
    /// offended inside the window, i.e. when the offense is slashable.
    pub fn record_offense(&mut self, peer: PeerId, height: u64) -> bool {
        let window_start = height.saturating_sub(self.offense_window_blocks);
        let heights = self.offenses.entry(peer).or_default();
        heights.retain(|h| *h >= window_start);
        let repeat = !heights.is_empty();
        heights.push(height);
        repeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain() -> Domain {
        Domain {
            domain_id: "quadratic".into(),
            weight: 1.0,
            higher_is_better: false,
            performance_metric: "loss".into(),
            baseline_metric: 0.0,
            min_dimensions: 2,
            max_dimensions: 4,
        }
    }

    fn validator() -> BoundsValidator {
        BoundsValidator::new(64, 100, 512, 10)
    }

    #[test]
    fn test_declared_budget_caps() {
        let v = validator();
        v.check_declared(ResourceBudget { training_seconds: 100, memory_mb: 512 }).unwrap();
        assert!(matches!(
            v.check_declared(ResourceBudget { training_seconds: 101, memory_mb: 1 }),
            Err(OptimaError::TrainingBudgetExceeded(..))
        ));
        assert!(matches!(
            v.check_declared(ResourceBudget { training_seconds: 1, memory_mb: 513 }),
            Err(OptimaError::MemoryBudgetExceeded(..))
        ));
    }

    #[test]
    fn test_materialized_param_bounds() {
        let v = validator();
        let domain = domain();
        v.check_materialized(&domain, &[0u8; 16]).unwrap(); // 2 elements
        v.check_materialized(&domain, &[0u8; 32]).unwrap(); // 4 elements
        assert!(matches!(v.check_materialized(&domain, &[0u8; 8]), Err(OptimaError::DimensionOutOfBounds(1, 2, 4))));
        assert!(matches!(v.check_materialized(&domain, &[0u8; 40]), Err(OptimaError::DimensionOutOfBounds(5, 2, 4))));
        assert!(matches!(v.check_materialized(&domain, &[0u8; 65]), Err(OptimaError::ParamBytesExceeded(65, 64))));
    }

    #[test]
    fn test_first_offense_is_not_slashable() {
        let mut v = validator();
        let peer = PeerId::from_bytes([1; 32]);
        assert!(!v.record_offense(peer, 100));
        assert!(v.record_offense(peer, 105));
        // outside the window the counter resets
        assert!(!v.record_offense(peer, 200));
    }
}
