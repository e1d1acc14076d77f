/// Current block version
pub const BLOCK_VERSION: u16 = 1;

/// Current wire protocol version
pub const PROTOCOL_VERSION: u8 = 1;

//
// Coin emission. Balances are integer whole-DOIN amounts.
//

/// Subsidy minted by a block in the first emission epoch
pub const BASE_SUBSIDY: u64 = 50;

/// Number of blocks between subsidy halvings
pub const SUBSIDY_HALVING_INTERVAL: u64 = 210_000;

/// Hard cap on cumulative minted supply
pub const MAX_SUPPLY: u64 = 21_000_000;

/// Per-block subsidy split, in percent. The rounding remainder of the
/// optimizer and evaluator pools is paid to the generator.
pub const OPTIMIZER_SHARE_PERCENT: u64 = 65;
pub const EVALUATOR_SHARE_PERCENT: u64 = 30;
pub const GENERATOR_SHARE_PERCENT: u64 = 5;

//
// Reputation accounting.
//

/// Base reward for a vote aligned with the accepted quorum outcome
pub const VOTE_ALIGNED_REWARD: f64 = 0.3;

/// Maximum confidence bonus on top of the base vote reward
pub const VOTE_CONFIDENCE_BONUS_MAX: f64 = 0.1;

/// Penalty for a vote diverging from the accepted quorum outcome
pub const DIVERGENCE_PENALTY: f64 = 3.0;

/// Penalty for a selected evaluator that failed to vote within the window
pub const NO_SHOW_PENALTY: f64 = 0.5;

/// Penalty for repeat resource-bounds offenses inside the offense window
pub const BOUNDS_OFFENSE_PENALTY: f64 = 1.0;

//
// Incentive model.
//

/// Reward multiplier granted when the reported metric lands well inside tolerance
pub const MAX_BONUS_MULTIPLIER: f64 = 1.2;

/// Discrepancy (as a fraction of tolerance) under which the bonus multiplier applies
pub const BONUS_DISCREPANCY_CUTOFF: f64 = 0.25;
