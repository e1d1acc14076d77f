//! Asymmetric incentive model: rewards scale with how closely the reported
//! metric matches the quorum's verified median, and only verified improvement
//! mints block weight.

use doin_consensus_core::constants::{BONUS_DISCREPANCY_CUTOFF, MAX_BONUS_MULTIPLIER, VOTE_CONFIDENCE_BONUS_MAX};
use doin_consensus_core::domain::Domain;

/// Outcome of comparing a reported metric against the verified median.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RewardDecision {
    pub accept: bool,
    /// `|reported − median_verified| / tolerance`
    pub discrepancy: f64,
    /// `1 − discrepancy`, zero when rejected
    pub confidence: f64,
    /// Fraction of the optimizer reward granted, in [0, 1]
    pub reward_fraction: f64,
}

/// Computes the reward fraction for a reported metric against the quorum's
/// median. A discrepancy beyond the tolerance rejects outright; well inside
/// the tolerance a bonus multiplier applies, capped at a full reward.
pub fn reward_fraction(reported: f64, median_verified: f64, tolerance: f64) -> RewardDecision {
    let discrepancy = (reported - median_verified).abs() / tolerance;
    if discrepancy > 1.0 {
        return RewardDecision { accept: false, discrepancy, confidence: 0.0, reward_fraction: 0.0 };
    }
    let confidence = 1.0 - discrepancy;
    let multiplier = if discrepancy <= BONUS_DISCREPANCY_CUTOFF { MAX_BONUS_MULTIPLIER } else { 1.0 };
    let fraction = (multiplier * confidence).min(1.0);
    RewardDecision { accept: true, discrepancy, confidence, reward_fraction: fraction }
}

/// Non-negative verified improvement over the domain's running best.
pub fn effective_increment(domain: &Domain, median_verified: f64, running_best: f64) -> f64 {
    domain.improvement(median_verified, running_best).max(0.0)
}

/// Reputation bonus for an aligned vote, scaled by decision confidence.
pub fn vote_bonus(confidence: f64) -> f64 {
    VOTE_CONFIDENCE_BONUS_MAX * confidence.clamp(0.0, 1.0)
}

/// Median of the received measured metrics. Callers guarantee at least one vote.
pub fn median(metrics: &mut Vec<f64>) -> f64 {
    metrics.sort_by(|a, b| a.partial_cmp(b).expect("metrics are never NaN"));
    let mid = metrics.len() / 2;
    if metrics.len() % 2 == 1 {
        metrics[mid]
    } else {
        (metrics[mid - 1] + metrics[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower_is_better() -> Domain {
        Domain {
            domain_id: "quadratic".into(),
            weight: 1.0,
            higher_is_better: false,
            performance_metric: "loss".into(),
            baseline_metric: -90.0,
            min_dimensions: 1,
            max_dimensions: 64,
        }
    }

    #[test]
    fn test_discrepancy_beyond_tolerance_rejects() {
        // |−100 − −99.7| / 0.15 = 2.0 > 1
        let decision = reward_fraction(-100.0, -99.7, 0.15);
        assert!(!decision.accept);
        assert!((decision.discrepancy - 2.0).abs() < 1e-9);
        assert_eq!(decision.reward_fraction, 0.0);
    }

    #[test]
    fn test_close_match_gets_bonus() {
        // |−100 − −99.99| / 0.15 ≈ 0.0667 ≤ 0.25 → bonus multiplier, capped at 1.0
        let decision = reward_fraction(-100.0, -99.99, 0.15);
        assert!(decision.accept);
        assert!(decision.discrepancy < BONUS_DISCREPANCY_CUTOFF);
        assert_eq!(decision.reward_fraction, 1.0);
    }

    #[test]
    fn test_moderate_match_scales_linearly() {
        // discrepancy = 0.5 → no bonus, fraction = confidence = 0.5
        let decision = reward_fraction(1.0, 1.075, 0.15);
        assert!(decision.accept);
        assert!((decision.discrepancy - 0.5).abs() < 1e-9);
        assert!((decision.reward_fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_bonus_boundary() {
        // just above the cutoff the multiplier drops away
        let above = reward_fraction(0.0, 0.15 * 0.26, 0.15);
        assert!((above.reward_fraction - above.confidence).abs() < 1e-9);

        // at 0.2 the bonus applies: 1.2 * 0.8 = 0.96
        let below = reward_fraction(0.0, 0.15 * 0.2, 0.15);
        assert!((below.reward_fraction - 0.96).abs() < 1e-9);
    }

    #[test]
    fn test_effective_increment_respects_direction_and_floor() {
        let domain = lower_is_better();
        // verified −99.99 against best −90: worse metric, no increment
        assert_eq!(effective_increment(&domain, -89.0, -90.0), 0.0);
        // verified −95 against best −90 in lower-is-better: improvement of 5
        assert!((effective_increment(&domain, -95.0, -90.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&mut vec![3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut vec![4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&mut vec![7.0]), 7.0);
    }
}
