use serde::{Deserialize, Serialize};

use super::genesis::{GenesisSpec, GENESIS, SIMNET_GENESIS};
use crate::errors::config::ConfigError;

/// Consensus parameters. A node's params are fixed at boot; peers on
/// different params fork immediately and by design.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    pub genesis: GenesisSpec,

    /// Target seconds between blocks; the threshold controller steers toward it
    pub target_block_time_seconds: u64,
    pub initial_threshold: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    /// Per-block EMA gain of the threshold controller
    pub threshold_ema_alpha: f64,
    /// Max relative per-block threshold step
    pub threshold_max_step: f64,
    /// Blocks per epoch correction window
    pub threshold_epoch_blocks: u64,

    pub confirmation_depth: u64,
    pub external_anchor_interval_blocks: u64,

    pub quorum_min_evaluators: usize,
    pub quorum_max_evaluators: usize,
    pub quorum_fraction: f64,
    pub quorum_tolerance: f64,

    pub commit_reveal_window_blocks: u64,
    pub voting_timeout_blocks: u64,
    /// Blocks after which an unfinished task claim reopens
    pub task_claim_timeout_blocks: u64,
    /// Window for counting bounds offenses per peer
    pub offense_window_blocks: u64,
    /// Commit rate limit: open (non-terminal) commits allowed per peer
    pub max_pending_commits_per_peer: usize,

    pub max_param_bytes: usize,
    pub max_training_seconds: u64,
    pub max_memory_mb: u64,

    pub reputation_half_life_seconds: u64,
    pub min_reputation_for_consensus: f64,

    /// Upper bound on blocks served per sync response
    pub max_blocks_per_response: usize,
    /// Accepted forward clock skew for block timestamps, in seconds
    pub max_timestamp_skew_seconds: u64,
}

impl Params {
    /// Milliseconds between blocks the controller steers toward.
    #[inline]
    pub fn target_block_time_millis(&self) -> u64 {
        self.target_block_time_seconds * 1000
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_threshold <= 0.0 || self.min_threshold > self.max_threshold {
            return Err(ConfigError::InvalidThresholdBounds(self.min_threshold, self.max_threshold));
        }
        if !(self.min_threshold..=self.max_threshold).contains(&self.initial_threshold) {
            return Err(ConfigError::InitialThresholdOutOfBounds(self.initial_threshold));
        }
        if self.quorum_min_evaluators == 0 || self.quorum_min_evaluators > self.quorum_max_evaluators {
            return Err(ConfigError::InvalidQuorumBounds(self.quorum_min_evaluators, self.quorum_max_evaluators));
        }
        if !(0.0..=1.0).contains(&self.quorum_fraction) {
            return Err(ConfigError::InvalidFraction("quorum_fraction", self.quorum_fraction));
        }
        if self.quorum_tolerance <= 0.0 {
            return Err(ConfigError::InvalidFraction("quorum_tolerance", self.quorum_tolerance));
        }
        if self.target_block_time_seconds == 0 {
            return Err(ConfigError::ZeroTargetBlockTime);
        }
        Ok(())
    }
}

pub const MAINNET_PARAMS: Params = Params {
    genesis: GENESIS,
    target_block_time_seconds: 600,
    initial_threshold: 1.0,
    min_threshold: 1e-6,
    max_threshold: 1e9,
    threshold_ema_alpha: 0.1,
    threshold_max_step: 0.02,
    threshold_epoch_blocks: 100,
    confirmation_depth: 6,
    external_anchor_interval_blocks: 100,
    quorum_min_evaluators: 3,
    quorum_max_evaluators: 10,
    quorum_fraction: 0.67,
    quorum_tolerance: 0.15,
    commit_reveal_window_blocks: 8,
    voting_timeout_blocks: 4,
    task_claim_timeout_blocks: 8,
    offense_window_blocks: 100,
    max_pending_commits_per_peer: 16,
    max_param_bytes: 4 * 1024 * 1024,
    max_training_seconds: 3600,
    max_memory_mb: 8192,
    reputation_half_life_seconds: 604_800,
    min_reputation_for_consensus: 2.0,
    max_blocks_per_response: 50,
    max_timestamp_skew_seconds: 120,
};

/// Simulation/test preset: single evaluator quorums, tight windows, fast blocks.
pub const SIMNET_PARAMS: Params = Params {
    genesis: SIMNET_GENESIS,
    target_block_time_seconds: 1,
    initial_threshold: 1.0,
    min_threshold: 1e-6,
    max_threshold: 1e9,
    threshold_ema_alpha: 0.1,
    threshold_max_step: 0.02,
    threshold_epoch_blocks: 100,
    confirmation_depth: 6,
    external_anchor_interval_blocks: 10,
    quorum_min_evaluators: 1,
    quorum_max_evaluators: 10,
    quorum_fraction: 0.67,
    quorum_tolerance: 0.15,
    commit_reveal_window_blocks: 8,
    voting_timeout_blocks: 4,
    task_claim_timeout_blocks: 8,
    offense_window_blocks: 100,
    max_pending_commits_per_peer: 16,
    max_param_bytes: 1024 * 1024,
    max_training_seconds: 60,
    max_memory_mb: 1024,
    reputation_half_life_seconds: 604_800,
    min_reputation_for_consensus: 2.0,
    max_blocks_per_response: 50,
    max_timestamp_skew_seconds: 120,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        MAINNET_PARAMS.validate().unwrap();
        SIMNET_PARAMS.validate().unwrap();
    }

    #[test]
    fn test_validation_catches_inversions() {
        let mut params = SIMNET_PARAMS.clone();
        params.min_threshold = 10.0;
        params.max_threshold = 1.0;
        assert!(params.validate().is_err());

        let mut params = SIMNET_PARAMS.clone();
        params.quorum_min_evaluators = 20;
        assert!(params.validate().is_err());

        let mut params = SIMNET_PARAMS.clone();
        params.quorum_fraction = 1.5;
        assert!(params.validate().is_err());
    }
}
