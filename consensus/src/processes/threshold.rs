//! Dynamic threshold controller for the proof-of-optimization engine.
//!
//! Two correction loops steer the threshold so that accumulated optimization
//! weight crosses it once per target block time on average:
//! - an epoch correction every `epoch_blocks`, clamped to [0.25, 4.0];
//! - a per-block EMA step, clamped to ± `max_step`.
//! When both fire on the same block the epoch correction applies first. The
//! `actual/target` ratio is a production-rate ratio (`target interval /
//! measured interval`), so faster-than-target blocks raise the threshold.

use std::collections::VecDeque;

use doin_core::debug;

pub struct ThresholdManager {
    threshold: f64,
    target_interval_millis: f64,
    ema_alpha: f64,
    max_step: f64,
    epoch_blocks: u64,
    min_threshold: f64,
    max_threshold: f64,
    /// Measured block intervals of the current epoch window, in millis
    intervals: VecDeque<u64>,
}

impl ThresholdManager {
    pub fn new(
        initial_threshold: f64,
        target_interval_millis: u64,
        ema_alpha: f64,
        max_step: f64,
        epoch_blocks: u64,
        min_threshold: f64,
        max_threshold: f64,
    ) -> Self {
        Self {
            threshold: initial_threshold.clamp(min_threshold, max_threshold),
            target_interval_millis: target_interval_millis as f64,
            ema_alpha,
            max_step,
            epoch_blocks,
            min_threshold,
            max_threshold,
            intervals: VecDeque::with_capacity(epoch_blocks as usize),
        }
    }

    pub fn current(&self) -> f64 {
        self.threshold
    }

    /// Adjusts the threshold after the block at `index` was produced
    /// `interval_millis` after its parent.
    pub fn on_block(&mut self, index: u64, interval_millis: u64) {
        self.intervals.push_back(interval_millis);
        while self.intervals.len() > self.epoch_blocks as usize {
            self.intervals.pop_front();
        }

        if index > 0 && index % self.epoch_blocks == 0 {
            self.apply_epoch_correction();
        }
        self.apply_ema_step(interval_millis);

        self.threshold = self.threshold.clamp(self.min_threshold, self.max_threshold);
    }

    fn apply_epoch_correction(&mut self) {
        let mean_interval = self.intervals.iter().sum::<u64>() as f64 / self.intervals.len() as f64;
        let rate_ratio = self.target_interval_millis / mean_interval.max(1.0);
        let factor = rate_ratio.clamp(0.25, 4.0);
        let old = self.threshold;
        self.threshold *= factor;
        debug!("threshold epoch correction: {:.6} -> {:.6} (factor {:.3})", old, self.threshold, factor);
    }

    fn apply_ema_step(&mut self, interval_millis: u64) {
        let rate_ratio = self.target_interval_millis / (interval_millis.max(1) as f64);
        let step = (self.ema_alpha * (rate_ratio - 1.0)).clamp(-self.max_step, self.max_step);
        self.threshold *= 1.0 + step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ThresholdManager {
        // target 600s blocks, alpha 0.1, 2% max step, 100-block epochs
        ThresholdManager::new(1.0, 600_000, 0.1, 0.02, 100, 1e-6, 1e9)
    }

    #[test]
    fn test_fast_blocks_raise_threshold() {
        let mut m = manager();
        m.on_block(1, 60_000); // 10x faster than target
        assert!(m.current() > 1.0);
        // single step capped at +2%
        assert!(m.current() <= 1.02 + 1e-12);
    }

    #[test]
    fn test_slow_blocks_lower_threshold() {
        let mut m = manager();
        m.on_block(1, 6_000_000); // 10x slower
        assert!(m.current() < 1.0);
        assert!(m.current() >= 0.98 - 1e-12);
    }

    #[test]
    fn test_on_target_block_is_a_fixpoint() {
        let mut m = manager();
        m.on_block(1, 600_000);
        assert!((m.current() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_epoch_correction_is_clamped_to_4x() {
        let mut m = manager();
        for i in 1..=100u64 {
            m.on_block(i, 1_000); // 600x faster than target
        }
        // 99 EMA steps of at most +2%, then one epoch correction of at most 4x
        // at block 100, then its EMA step
        let max_possible = 1.02_f64.powi(99) * 4.0 * 1.02;
        assert!(m.current() <= max_possible * (1.0 + 1e-9));
        // and the epoch really fired: far above what EMA alone provides
        assert!(m.current() > 1.02_f64.powi(100) * 2.0);
    }

    #[test]
    fn test_bounds_are_enforced() {
        let mut fast = ThresholdManager::new(1e9, 600_000, 0.1, 0.02, 100, 1e-6, 1e9);
        fast.on_block(1, 1);
        assert!(fast.current() <= 1e9);

        let mut slow = ThresholdManager::new(1e-6, 600_000, 0.1, 0.02, 100, 1e-6, 1e9);
        slow.on_block(1, u64::MAX / 2);
        assert!(slow.current() >= 1e-6);
    }

    #[test]
    fn test_initial_threshold_is_clamped() {
        let m = ThresholdManager::new(1e12, 600_000, 0.1, 0.02, 100, 1e-6, 1e9);
        assert_eq!(m.current(), 1e9);
    }
}
