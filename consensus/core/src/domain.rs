//! Problem domains and the plugin capability seam.
//!
//! The core never runs ML itself: optimization, inference and synthetic data
//! generation are capability interfaces resolved per domain through the
//! [`PluginRegistry`]. The registry is populated at startup; domains are never
//! removed once chain state references them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use doin_hashes::Hash;

use crate::DomainId;

/// Immutable descriptor of a registered optimization problem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Domain {
    pub domain_id: DomainId,
    /// Relative contribution of this domain's accepted increments to block production. Positive.
    pub weight: f64,
    pub higher_is_better: bool,
    /// Name of the metric the plugins report, e.g. "neg_mse" or "accuracy".
    pub performance_metric: String,
    /// Metric of the domain's null model; seeds the running best.
    pub baseline_metric: f64,
    /// Inclusive bounds on the parameter-vector dimension accepted at reveal.
    pub min_dimensions: usize,
    pub max_dimensions: usize,
}

impl Domain {
    /// Signed improvement of `candidate` over `reference`, respecting metric direction.
    pub fn improvement(&self, candidate: f64, reference: f64) -> f64 {
        if self.higher_is_better {
            candidate - reference
        } else {
            reference - candidate
        }
    }

    /// Whether `candidate` is a strictly better metric than `reference`.
    pub fn is_better(&self, candidate: f64, reference: f64) -> bool {
        self.improvement(candidate, reference) > 0.0
    }
}

/// Declared resource cost of an optimization run, checked against the
/// per-node caps at commit time and again at reveal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub training_seconds: u64,
    pub memory_mb: u64,
}

#[derive(Error, Debug, Clone)]
pub enum PluginError {
    #[error("plugin failure in domain {0}: {1}")]
    Failure(DomainId, String),

    #[error("plugin exceeded its deadline")]
    Timeout,
}

pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Output of a local optimization run.
#[derive(Clone, Debug)]
pub struct OptimizationOutcome {
    /// Opaque serialized model parameters.
    pub parameters: Vec<u8>,
    /// Metric the optimizer measured locally.
    pub metric: f64,
}

/// Local model training driven by a deterministic seed.
pub trait Optimize: Send + Sync {
    fn optimize(&self, domain: &Domain, seed: Hash, budget: ResourceBudget) -> PluginResult<OptimizationOutcome>;
}

/// Measures the performance metric of revealed parameters over (synthetic) data.
pub trait Infer: Send + Sync {
    fn evaluate(&self, domain: &Domain, parameters: &[u8], data_seed: Hash) -> PluginResult<f64>;
}

/// Deterministic synthetic-data generation; evaluators derive per-evaluator
/// seeds so an optimizer cannot overfit the verification set.
pub trait GenerateSynthetic: Send + Sync {
    fn generate(&self, domain: &Domain, seed: Hash, samples: usize) -> PluginResult<Vec<u8>>;
}

/// The three capability handles a domain registers.
#[derive(Clone)]
pub struct PluginSet {
    pub optimize: Arc<dyn Optimize>,
    pub infer: Arc<dyn Infer>,
    pub synthesize: Arc<dyn GenerateSynthetic>,
}

#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("domain {0} is already registered")]
    DuplicateDomain(DomainId),

    #[error("domain {0} is not registered")]
    UnknownDomain(DomainId),

    #[error("domain {0} has non-positive weight {1}")]
    NonPositiveWeight(DomainId, f64),
}

/// Maps `domain_id` to its descriptor and plugin triple.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    domains: HashMap<DomainId, (Domain, PluginSet)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, domain: Domain, plugins: PluginSet) -> Result<(), RegistryError> {
        if domain.weight <= 0.0 {
            return Err(RegistryError::NonPositiveWeight(domain.domain_id.clone(), domain.weight));
        }
        if self.domains.contains_key(&domain.domain_id) {
            return Err(RegistryError::DuplicateDomain(domain.domain_id.clone()));
        }
        self.domains.insert(domain.domain_id.clone(), (domain, plugins));
        Ok(())
    }

    pub fn domain(&self, domain_id: &str) -> Result<&Domain, RegistryError> {
        self.domains.get(domain_id).map(|(domain, _)| domain).ok_or_else(|| RegistryError::UnknownDomain(domain_id.to_string()))
    }

    pub fn plugins(&self, domain_id: &str) -> Result<&PluginSet, RegistryError> {
        self.domains.get(domain_id).map(|(_, plugins)| plugins).ok_or_else(|| RegistryError::UnknownDomain(domain_id.to_string()))
    }

    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domains.values().map(|(domain, _)| domain)
    }

    pub fn contains(&self, domain_id: &str) -> bool {
        self.domains.contains_key(domain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic() -> Domain {
        Domain {
            domain_id: "quadratic".into(),
            weight: 1.0,
            higher_is_better: false,
            performance_metric: "neg_loss".into(),
            baseline_metric: -1000.0,
            min_dimensions: 1,
            max_dimensions: 16,
        }
    }

    #[test]
    fn test_improvement_respects_direction() {
        let lower_is_better = quadratic();
        assert!(lower_is_better.improvement(-99.0, -100.0) < 0.0);
        assert!(lower_is_better.improvement(-101.0, -100.0) > 0.0);

        let higher_is_better = Domain { higher_is_better: true, ..quadratic() };
        assert!(higher_is_better.improvement(0.9, 0.8) > 0.0);
    }

    struct NoopPlugin;
    impl Optimize for NoopPlugin {
        fn optimize(&self, _: &Domain, _: Hash, _: ResourceBudget) -> PluginResult<OptimizationOutcome> {
            Ok(OptimizationOutcome { parameters: vec![], metric: 0.0 })
        }
    }
    impl Infer for NoopPlugin {
        fn evaluate(&self, _: &Domain, _: &[u8], _: Hash) -> PluginResult<f64> {
            Ok(0.0)
        }
    }
    impl GenerateSynthetic for NoopPlugin {
        fn generate(&self, _: &Domain, _: Hash, _: usize) -> PluginResult<Vec<u8>> {
            Ok(vec![])
        }
    }

    fn noop_set() -> PluginSet {
        let plugin = Arc::new(NoopPlugin);
        PluginSet { optimize: plugin.clone(), infer: plugin.clone(), synthesize: plugin }
    }

    #[test]
    fn test_registry_rejects_duplicates_and_bad_weights() {
        let mut registry = PluginRegistry::new();
        registry.register(quadratic(), noop_set()).unwrap();
        assert!(matches!(registry.register(quadratic(), noop_set()), Err(RegistryError::DuplicateDomain(_))));

        let bad = Domain { domain_id: "zero".into(), weight: 0.0, ..quadratic() };
        assert!(matches!(registry.register(bad, noop_set()), Err(RegistryError::NonPositiveWeight(..))));
        assert!(registry.domain("quadratic").is_ok());
        assert!(registry.domain("missing").is_err());
    }
}
