//! Coin emission and per-block distribution.
//!
//! The subsidy starts at `BASE_SUBSIDY`, halves every
//! `SUBSIDY_HALVING_INTERVAL` blocks and cumulative emission is capped at
//! `MAX_SUPPLY`. A block's subsidy splits 65/30/5 between the optimizers it
//! accepts (proportional to rewarded increment), the evaluators of those
//! optimae (uniform) and the generator, with integer rounding dust paid to
//! the generator.

use std::collections::HashMap;

use doin_consensus_core::constants::{
    BASE_SUBSIDY, EVALUATOR_SHARE_PERCENT, MAX_SUPPLY, OPTIMIZER_SHARE_PERCENT, SUBSIDY_HALVING_INTERVAL,
};
use doin_consensus_core::errors::block::RuleError;
use doin_consensus_core::peer::PeerId;
use doin_consensus_core::tx::CoinShare;

#[derive(Clone, Copy, Debug, Default)]
pub struct CoinbaseManager;

impl CoinbaseManager {
    /// Subsidy minted by the block at `index`, given `minted` coins already
    /// emitted. The final partial subsidy is clipped against the supply cap.
    pub fn calc_block_subsidy(&self, index: u64, minted: u64) -> u64 {
        let halvings = index / SUBSIDY_HALVING_INTERVAL;
        if halvings >= 64 {
            return 0;
        }
        let subsidy = BASE_SUBSIDY >> halvings;
        subsidy.min(MAX_SUPPLY.saturating_sub(minted))
    }

    /// Splits `subsidy` into coin shares.
    ///
    /// `optimizer_rewards` maps each rewarded optimizer to its
    /// `effective_increment × reward_fraction`; `evaluators` is the union of
    /// quorum members over the block's accepted optimae. Empty pools fall to
    /// the generator, as does all rounding dust.
    pub fn distribute(
        &self,
        subsidy: u64,
        optimizer_rewards: &[(PeerId, f64)],
        evaluators: &[PeerId],
        generator: PeerId,
    ) -> Vec<CoinShare> {
        if subsidy == 0 {
            return Vec::new();
        }

        let optimizer_pool = subsidy * OPTIMIZER_SHARE_PERCENT / 100;
        let evaluator_pool = subsidy * EVALUATOR_SHARE_PERCENT / 100;

        let mut amounts: HashMap<PeerId, u64> = HashMap::new();
        let mut distributed = 0u64;

        let reward_total: f64 = optimizer_rewards.iter().map(|(_, w)| *w).sum();
        if reward_total > 0.0 {
            for (peer, weight) in optimizer_rewards {
                let amount = ((optimizer_pool as f64) * (weight / reward_total)).floor() as u64;
                if amount > 0 {
                    *amounts.entry(*peer).or_default() += amount;
                    distributed += amount;
                }
            }
        }

        if !evaluators.is_empty() {
            let per_evaluator = evaluator_pool / evaluators.len() as u64;
            if per_evaluator > 0 {
                for peer in evaluators {
                    *amounts.entry(*peer).or_default() += per_evaluator;
                    distributed += per_evaluator;
                }
            }
        }

        // generator share plus every rounding remainder
        let generator_amount = subsidy - distributed;
        if generator_amount > 0 {
            *amounts.entry(generator).or_default() += generator_amount;
        }

        let mut shares: Vec<CoinShare> = amounts.into_iter().map(|(peer_id, amount)| CoinShare { peer_id, amount }).collect();
        shares.sort_unstable_by(|a, b| a.peer_id.cmp(&b.peer_id));
        shares
    }
}

/// Per-peer confirmed balances. Mutated only when blocks finalize, so a reorg
/// above the finality fence never needs a ledger rollback.
#[derive(Clone, Debug, Default)]
pub struct CoinLedger {
    balances: HashMap<PeerId, u64>,
    total_minted: u64,
}

impl CoinLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, peer: PeerId) -> u64 {
        self.balances.get(&peer).copied().unwrap_or(0)
    }

    pub fn total_minted(&self) -> u64 {
        self.total_minted
    }

    /// Credits a finalized block's coin shares, enforcing the emission cap.
    pub fn apply_shares(&mut self, shares: &[CoinShare]) -> Result<(), RuleError> {
        let block_total: u64 = shares.iter().map(|s| s.amount).sum();
        let allowed = MAX_SUPPLY - self.total_minted;
        if block_total > allowed {
            return Err(RuleError::ExcessiveEmission(block_total, allowed));
        }
        for share in shares {
            *self.balances.entry(share.peer_id).or_default() += share.amount;
        }
        self.total_minted += block_total;
        Ok(())
    }
}
