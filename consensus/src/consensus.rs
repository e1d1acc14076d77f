//! The consensus facade: a single-writer state machine owning the chain
//! store, the optimae pipeline and the proof-of-optimization engine.
//!
//! All methods are driven by one protocol loop (message ingress, worker
//! results, block processing); each call moves the state to a consistent
//! point before returning.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use doin_consensus_core::block::Block;
use doin_consensus_core::config::Params;
use doin_consensus_core::constants::{
    BLOCK_VERSION, BOUNDS_OFFENSE_PENALTY, DIVERGENCE_PENALTY, NO_SHOW_PENALTY, VOTE_ALIGNED_REWARD,
};
use doin_consensus_core::domain::PluginRegistry;
use doin_consensus_core::errors::block::RuleError;
use doin_consensus_core::errors::optima::{OptimaError, OptimaResult};
use doin_consensus_core::errors::sync::{SyncError, SyncResult};
use doin_consensus_core::hashing::seed;
use doin_consensus_core::optima::{ExperimentMeta, OptimaCommit, OptimaReveal, RejectReason, Vote};
use doin_consensus_core::peer::PeerId;
use doin_consensus_core::tx::Transaction;
use doin_consensus_core::{DomainId, OptimaId, TaskId};
use doin_hashes::Hash;

use doin_core::time::Stopwatch;
use doin_core::{debug, info, warn};

use crate::coordinator::{Coordinator, VerificationAssignment, VotingRound};
use crate::errors::{ConsensusError, ConsensusResult};
use crate::model::chain::{ChainStore, TipUpdate};
use crate::model::chainlog::ChainLog;
use crate::processes::anchor::{AnchorManager, AnchorSink};
use crate::processes::bounds::BoundsValidator;
use crate::processes::coinbase::{CoinLedger, CoinbaseManager};
use crate::processes::commit_reveal::CommitRevealManager;
use crate::processes::incentive;
use crate::processes::quorum;
use crate::processes::reputation::ReputationTracker;
use crate::processes::threshold::ThresholdManager;
use crate::tasks::TaskQueue;

/// Operating mode surfaced through the status endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeMode {
    Normal,
    Syncing,
    Suspect,
    Halted,
}

impl NodeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeMode::Normal => "NORMAL",
            NodeMode::Syncing => "SYNCING",
            NodeMode::Suspect => "SUSPECT",
            NodeMode::Halted => "HALTED",
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeStatus {
    pub mode: NodeMode,
    pub height: u64,
    pub tip_hash: Hash,
    pub finalized_height: u64,
    pub threshold: f64,
    pub pending_weight: f64,
}

/// Outcome of a verification round.
#[derive(Clone, Debug)]
pub struct Decision {
    pub optima_id: OptimaId,
    pub accepted: bool,
    pub reason: Option<RejectReason>,
    pub median_verified: Option<f64>,
    pub effective_increment: f64,
    pub reward_fraction: f64,
}

/// Everything a decided optima contributes to the next block. Kept as one
/// unit so a block arriving from elsewhere that records the same optima can
/// retract the whole contribution.
#[derive(Clone, Debug)]
struct DecisionBundle {
    txs: Vec<Transaction>,
    weighted_increment: f64,
    optimizer_reward: Option<(PeerId, f64)>,
    evaluators: Vec<PeerId>,
}

impl DecisionBundle {
    fn rejection(optima_id: OptimaId, reason: RejectReason, extra_txs: Vec<Transaction>) -> Self {
        let mut txs = vec![Transaction::RejectedOptima { optima_id, reason }];
        txs.extend(extra_txs);
        Self { txs, weighted_increment: 0.0, optimizer_reward: None, evaluators: Vec::new() }
    }
}

pub struct Consensus {
    params: Params,
    registry: PluginRegistry,
    chain: ChainStore,
    log: Option<ChainLog>,

    commit_reveal: CommitRevealManager,
    coordinator: Coordinator,
    reputation: ReputationTracker,
    bounds: BoundsValidator,
    threshold: ThresholdManager,
    coinbase: CoinbaseManager,
    ledger: CoinLedger,
    pub tasks: TaskQueue,
    anchors: AnchorManager,

    /// Peers registered as evaluators, per domain
    evaluators: HashMap<DomainId, HashSet<PeerId>>,

    /// Decided optimae awaiting block inclusion, in decision order
    pending_decisions: IndexMap<OptimaId, DecisionBundle>,
    /// Pending bookkeeping not tied to an optima decision
    pending_misc: Vec<Transaction>,

    /// Best verified metric per domain along the canonical chain
    running_best: HashMap<DomainId, f64>,
    /// Optima ids with a terminal record on the canonical chain
    terminal_optimae: HashSet<OptimaId>,

    mode: NodeMode,
}

impl Consensus {
    pub fn new(params: Params, registry: PluginRegistry, anchor_sink: Arc<dyn AnchorSink>) -> ConsensusResult<Self> {
        params.validate().map_err(ConsensusError::Config)?;
        let genesis = params.genesis.build();
        let running_best = registry.domains().map(|d| (d.domain_id.clone(), d.baseline_metric)).collect();
        Ok(Self {
            chain: ChainStore::new(genesis),
            log: None,
            commit_reveal: CommitRevealManager::new(params.commit_reveal_window_blocks, params.max_pending_commits_per_peer),
            coordinator: Coordinator::new(params.voting_timeout_blocks),
            reputation: ReputationTracker::new(params.reputation_half_life_seconds),
            bounds: BoundsValidator::new(
                params.max_param_bytes,
                params.max_training_seconds,
                params.max_memory_mb,
                params.offense_window_blocks,
            ),
            threshold: ThresholdManager::new(
                params.initial_threshold,
                params.target_block_time_millis(),
                params.threshold_ema_alpha,
                params.threshold_max_step,
                params.threshold_epoch_blocks,
                params.min_threshold,
                params.max_threshold,
            ),
            coinbase: CoinbaseManager,
            ledger: CoinLedger::new(),
            tasks: TaskQueue::new(params.task_claim_timeout_blocks),
            anchors: AnchorManager::new(params.external_anchor_interval_blocks, anchor_sink),
            evaluators: HashMap::new(),
            pending_decisions: IndexMap::new(),
            pending_misc: Vec::new(),
            running_best,
            terminal_optimae: HashSet::new(),
            mode: NodeMode::Normal,
            registry,
            params,
        })
    }

    /// Opens the chain log at `path`, replays locally persisted blocks and
    /// keeps appending canonical blocks to it from here on.
    pub fn attach_chain_log(&mut self, path: &Path, now: u64) -> ConsensusResult<()> {
        let mut log = ChainLog::open(path).map_err(ConsensusError::Store)?;
        if let Some(max_height) = log.max_height() {
            for height in 1..=max_height {
                let Ok(block) = log.get_by_height(height) else { break };
                self.accept_block(block, now)?;
            }
            info!("replayed chain log up to height {}", self.chain.height());
        }
        self.log = Some(log);
        Ok(())
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: NodeMode) {
        self.mode = mode;
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            mode: self.mode,
            height: self.chain.height(),
            tip_hash: self.chain.tip_hash(),
            finalized_height: self.chain.finalized_height(),
            threshold: self.threshold.current(),
            pending_weight: self.pending_weight(),
        }
    }

    pub fn tip_hash(&self) -> Hash {
        self.chain.tip_hash()
    }

    pub fn height(&self) -> u64 {
        self.chain.height()
    }

    pub fn finalized_height(&self) -> u64 {
        self.chain.finalized_height()
    }

    pub fn balance(&self, peer: PeerId) -> u64 {
        self.ledger.balance(peer)
    }

    pub fn reputation_of(&self, peer: PeerId, now: u64) -> f64 {
        self.reputation.score(peer, now)
    }

    /// Bootstrap hook: seeds a peer's reputation (e.g. from operator config).
    pub fn seed_reputation(&mut self, peer: PeerId, score: f64, now: u64) {
        self.reputation.set(peer, score, now);
    }

    /// The open voting round for an optima, if any.
    pub fn coordinator_round(&self, optima_id: OptimaId) -> Option<&VotingRound> {
        self.coordinator.round(optima_id)
    }

    /// All transactions currently queued for the next block, in order.
    pub fn pending_transactions(&self) -> Vec<&Transaction> {
        self.pending_decisions.values().flat_map(|b| b.txs.iter()).chain(self.pending_misc.iter()).collect()
    }

    pub fn register_evaluator(&mut self, peer: PeerId, domain_id: &str) -> OptimaResult<()> {
        if !self.registry.contains(domain_id) {
            return Err(OptimaError::UnknownDomain(domain_id.to_string()));
        }
        self.evaluators.entry(domain_id.to_string()).or_default().insert(peer);
        Ok(())
    }

    //
    // Optimae pipeline
    //

    /// Processes a commit. Budget bounds, reputation gate and the commit
    /// manager's duplicate/rate/signature rules all apply.
    pub fn handle_commit(&mut self, commit: OptimaCommit, now: u64) -> OptimaResult<()> {
        if !self.registry.contains(&commit.domain_id) {
            return Err(OptimaError::UnknownDomain(commit.domain_id.clone()));
        }
        let minimum = self.params.min_reputation_for_consensus;
        if !self.reputation.is_eligible(commit.optimizer_id, minimum, now) {
            let score = self.reputation.score(commit.optimizer_id, now);
            return Err(OptimaError::InsufficientReputation(commit.optimizer_id, score, minimum));
        }
        if let Err(err) = self.bounds.check_declared(commit.budget) {
            self.punish_bounds_offense(commit.optimizer_id);
            return Err(err);
        }
        self.commit_reveal.commit(commit, self.chain.height())
    }

    /// Processes a reveal. On success a quorum is selected at the current tip
    /// and one verification task per member is created; the returned
    /// assignments let the caller schedule local evaluation work.
    pub fn handle_reveal(&mut self, reveal: OptimaReveal, now: u64) -> OptimaResult<Vec<VerificationAssignment>> {
        let optima_id = reveal.optima_id;
        let optimizer_id = reveal.optimizer_id;
        let height = self.chain.height();

        let optima = match self.commit_reveal.reveal(reveal, height) {
            Ok(optima) => optima,
            Err(OptimaError::HashMismatch(id)) => {
                // slashable: the optimizer provably lied in commit or reveal
                self.record_decision(
                    id,
                    DecisionBundle::rejection(
                        id,
                        RejectReason::HashMismatch,
                        vec![Transaction::ReputationUpdate { peer_id: optimizer_id, delta: -DIVERGENCE_PENALTY }],
                    ),
                );
                return Err(OptimaError::HashMismatch(id));
            }
            Err(OptimaError::LateReveal(id, by)) => {
                self.record_decision(id, DecisionBundle::rejection(id, RejectReason::Expired, Vec::new()));
                return Err(OptimaError::LateReveal(id, by));
            }
            Err(err) => return Err(err),
        };

        let domain = self
            .registry
            .domain(&optima.domain_id)
            .map_err(|_| OptimaError::UnknownDomain(optima.domain_id.clone()))?
            .clone();

        if let Err(err) = self.bounds.check_materialized(&domain, &optima.parameters) {
            self.punish_bounds_offense(optima.optimizer_id);
            self.record_decision(optima_id, DecisionBundle::rejection(optima_id, RejectReason::BoundsExceeded, Vec::new()));
            self.commit_reveal.settle(optima_id);
            return Err(err);
        }

        let eligible = self.eligible_evaluators(&optima.domain_id, optima.optimizer_id, now);
        if eligible.len() < self.params.quorum_min_evaluators {
            debug!("optima {}: {} eligible evaluators, quorum impossible", optima_id, eligible.len());
            self.record_decision(optima_id, DecisionBundle::rejection(optima_id, RejectReason::InsufficientQuorum, Vec::new()));
            self.commit_reveal.settle(optima_id);
            return Ok(Vec::new());
        }

        let k = quorum::quorum_size(eligible.len(), self.params.quorum_min_evaluators, self.params.quorum_max_evaluators);
        let tip = self.chain.tip_hash();
        let selection_seed = seed::quorum_seed(tip, optima_id);
        let selected = quorum::select_quorum(selection_seed, eligible, k);

        let assignments = self.coordinator.begin_round(optima.clone(), selected, tip, height);
        for assignment in &assignments {
            self.tasks.create(assignment.to_task(optima.commit_hash));
        }
        Ok(assignments)
    }

    /// Processes a vote; returns the decision when the vote completed its round.
    pub fn handle_vote(&mut self, vote: Vote, _now: u64) -> OptimaResult<Option<Decision>> {
        let optima_id = vote.optima_id;
        let complete = self.coordinator.add_vote(vote)?;
        if !complete {
            return Ok(None);
        }
        let round = self.coordinator.close_round(optima_id).expect("round just reported complete");
        Ok(Some(self.decide(round)))
    }

    /// Computes accept/reject for a closed round and queues its decision
    /// bundle (outcome, reputation, reward bookkeeping) for the next block.
    fn decide(&mut self, round: VotingRound) -> Decision {
        let optima = round.optima.clone();
        let optima_id = optima.optima_id;
        self.commit_reveal.settle(optima_id);

        // everyone selected but silent loses a little: absence, not divergence
        let mut rep_txs: Vec<Transaction> = round
            .missing_voters()
            .into_iter()
            .map(|peer_id| Transaction::ReputationUpdate { peer_id, delta: -NO_SHOW_PENALTY })
            .collect();

        let required = (round.quorum.len() as f64 * self.params.quorum_fraction).ceil() as usize;
        if round.votes.len() < required {
            self.record_decision(optima_id, DecisionBundle::rejection(optima_id, RejectReason::InsufficientQuorum, rep_txs));
            return Decision {
                optima_id,
                accepted: false,
                reason: Some(RejectReason::InsufficientQuorum),
                median_verified: None,
                effective_increment: 0.0,
                reward_fraction: 0.0,
            };
        }

        let mut metrics: Vec<f64> = round.votes.values().map(|v| v.measured_metric).collect();
        let median_verified = incentive::median(&mut metrics);
        let tolerance = self.params.quorum_tolerance;
        let reward = incentive::reward_fraction(optima.reported_metric, median_verified, tolerance);

        // vote alignment against the verified median decides reputation
        for vote in round.votes.values() {
            let delta = if (vote.measured_metric - median_verified).abs() <= tolerance {
                VOTE_ALIGNED_REWARD + incentive::vote_bonus(reward.confidence)
            } else {
                -DIVERGENCE_PENALTY
            };
            rep_txs.push(Transaction::ReputationUpdate { peer_id: vote.evaluator_id, delta });
        }

        if !reward.accept {
            self.record_decision(optima_id, DecisionBundle::rejection(optima_id, RejectReason::Discrepancy, rep_txs));
            return Decision {
                optima_id,
                accepted: false,
                reason: Some(RejectReason::Discrepancy),
                median_verified: Some(median_verified),
                effective_increment: 0.0,
                reward_fraction: 0.0,
            };
        }

        let domain = self.registry.domain(&optima.domain_id).expect("domain checked at reveal").clone();
        let running_best = *self.running_best.get(&optima.domain_id).unwrap_or(&domain.baseline_metric);
        let effective_increment = incentive::effective_increment(&domain, median_verified, running_best);

        if domain.is_better(median_verified, running_best) {
            self.running_best.insert(optima.domain_id.clone(), median_verified);
        }

        rep_txs.push(Transaction::ReputationUpdate {
            peer_id: optima.optimizer_id,
            delta: VOTE_ALIGNED_REWARD + incentive::vote_bonus(reward.confidence),
        });

        let meta = ExperimentMeta {
            median_verified,
            quorum: round.quorum.clone(),
            optimization_seed: seed::optimization_seed(optima.commit_hash, &optima.domain_id),
        };
        let optimizer_id = optima.optimizer_id;
        let mut txs = vec![Transaction::AcceptedOptima {
            optima,
            effective_increment,
            reward_fraction: reward.reward_fraction,
            meta,
        }];
        txs.extend(rep_txs);

        self.record_decision(
            optima_id,
            DecisionBundle {
                txs,
                weighted_increment: domain.weight * effective_increment,
                optimizer_reward: Some((optimizer_id, effective_increment * reward.reward_fraction)),
                evaluators: round.quorum.clone(),
            },
        );

        Decision {
            optima_id,
            accepted: true,
            reason: None,
            median_verified: Some(median_verified),
            effective_increment,
            reward_fraction: reward.reward_fraction,
        }
    }

    /// Records a task completion flood; queues the pending transaction when
    /// the completion is authoritative.
    pub fn handle_task_completion(&mut self, task_id: TaskId, claimant: PeerId, result_hash: Hash) {
        if let Some(result_hash) = self.tasks.complete(task_id, claimant, result_hash) {
            self.pending_misc.push(Transaction::CompletedTask { task_id, result_hash });
        }
    }

    fn eligible_evaluators(&self, domain_id: &str, optimizer: PeerId, now: u64) -> Vec<PeerId> {
        let minimum = self.params.min_reputation_for_consensus;
        self.evaluators
            .get(domain_id)
            .map(|peers| {
                peers
                    .iter()
                    .copied()
                    .filter(|p| *p != optimizer && self.reputation.is_eligible(*p, minimum, now))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn punish_bounds_offense(&mut self, peer: PeerId) {
        let slashable = self.bounds.record_offense(peer, self.chain.height());
        if slashable {
            self.pending_misc.push(Transaction::ReputationUpdate { peer_id: peer, delta: -BOUNDS_OFFENSE_PENALTY });
        }
    }

    /// Queues a decision bundle unless the optima already has a terminal
    /// record (on chain or pending).
    fn record_decision(&mut self, optima_id: OptimaId, bundle: DecisionBundle) {
        if self.terminal_optimae.contains(&optima_id) || self.pending_decisions.contains_key(&optima_id) {
            return;
        }
        self.pending_decisions.insert(optima_id, bundle);
    }

    //
    // Proof-of-optimization engine
    //

    pub fn threshold(&self) -> f64 {
        self.threshold.current()
    }

    /// Accumulated weighted increment of pending accepted optimae.
    pub fn pending_weight(&self) -> f64 {
        self.pending_decisions.values().map(|b| b.weighted_increment).sum()
    }

    /// Whether accumulated weighted increment crosses the current threshold.
    pub fn can_generate_block(&self) -> bool {
        self.mode == NodeMode::Normal && self.pending_weight() >= self.threshold.current()
    }

    /// Atomically snapshots the pending pool into a block extending the tip,
    /// appends it and clears the accumulators.
    pub fn generate_block(&mut self, generator: PeerId, now: u64) -> ConsensusResult<Option<Block>> {
        if !self.can_generate_block() {
            return Ok(None);
        }
        let _sw = Stopwatch::<500>::with_threshold("generate_block");

        let parent = self.chain.tip();
        let bundles: Vec<DecisionBundle> = self.pending_decisions.drain(..).map(|(_, b)| b).collect();
        let mut transactions: Vec<Transaction> = bundles.iter().flat_map(|b| b.txs.clone()).collect();
        transactions.append(&mut self.pending_misc);

        let optimizer_rewards: Vec<(PeerId, f64)> = bundles.iter().filter_map(|b| b.optimizer_reward).collect();
        let mut evaluators: Vec<PeerId> = bundles.iter().flat_map(|b| b.evaluators.iter().copied()).collect();
        evaluators.sort_unstable();
        evaluators.dedup();

        let subsidy = self.coinbase.calc_block_subsidy(parent.index() + 1, self.minted_on_canonical());
        let shares = self.coinbase.distribute(subsidy, &optimizer_rewards, &evaluators, generator);
        if !shares.is_empty() {
            transactions.push(Transaction::CoinDistribution { shares });
        }

        // timestamps are monotone along the chain even under clock regress
        let timestamp = now.max(parent.header.timestamp);
        let block = Block::new(
            BLOCK_VERSION,
            parent.index() + 1,
            parent.hash(),
            timestamp,
            self.threshold.current(),
            generator,
            transactions,
        );

        info!("generated block {} at height {} ({} txs)", block.hash(), block.index(), block.transactions.len());
        self.accept_block(block.clone(), now)?;
        Ok(Some(block))
    }

    //
    // Block intake
    //

    /// Full validation of an incoming block against its (known) parent.
    pub fn validate_block(&self, block: &Block, now: u64) -> Result<(), RuleError> {
        if block.header.version != BLOCK_VERSION {
            return Err(RuleError::WrongBlockVersion(block.header.version));
        }
        let recomputed = block.header.recompute_hash();
        if recomputed != block.hash() {
            return Err(RuleError::BadBlockHash(block.hash(), recomputed));
        }
        let merkle = block.recompute_merkle_root();
        if merkle != block.header.merkle_root {
            return Err(RuleError::BadMerkleRoot(block.header.merkle_root, merkle));
        }

        let parent = self.chain.get(block.header.previous_hash).map_err(|_| RuleError::UnknownParent(block.header.previous_hash))?;
        if block.index() != parent.index() + 1 {
            return Err(RuleError::NonSequentialIndex(block.index(), parent.index()));
        }
        if block.header.timestamp < parent.header.timestamp {
            return Err(RuleError::TimeTooOld(block.header.timestamp, parent.header.timestamp));
        }
        let max_allowed = now + self.params.max_timestamp_skew_seconds * 1000;
        if block.header.timestamp > max_allowed {
            return Err(RuleError::TimeTooFarIntoTheFuture(block.header.timestamp, max_allowed));
        }

        let mut seen_terminal: HashSet<OptimaId> = HashSet::new();
        for tx in &block.transactions {
            match tx {
                Transaction::AcceptedOptima { optima, meta, .. } => {
                    if !optima.reveal_binds() {
                        return Err(RuleError::CommitBindingViolation(optima.optima_id));
                    }
                    // the optimization seed is derived, never chosen; a block
                    // claiming any other seed is advertising a ground result
                    if meta.optimization_seed != seed::optimization_seed(optima.commit_hash, &optima.domain_id) {
                        return Err(RuleError::SeedMismatch(optima.optima_id));
                    }
                    if !seen_terminal.insert(optima.optima_id) || self.terminal_optimae.contains(&optima.optima_id) {
                        return Err(RuleError::DuplicateTerminalOptima(optima.optima_id));
                    }
                }
                Transaction::RejectedOptima { optima_id, .. } => {
                    if !seen_terminal.insert(*optima_id) || self.terminal_optimae.contains(optima_id) {
                        return Err(RuleError::DuplicateTerminalOptima(*optima_id));
                    }
                }
                Transaction::CoinDistribution { shares } => {
                    let total: u64 = shares.iter().map(|s| s.amount).sum();
                    let ceiling = self.coinbase.calc_block_subsidy(block.index(), 0);
                    if total > ceiling {
                        return Err(RuleError::ExcessiveEmission(total, ceiling));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validates and inserts a block, runs fork choice, advances finality and
    /// all height-driven state machines.
    pub fn accept_block(&mut self, block: Block, now: u64) -> ConsensusResult<TipUpdate> {
        if matches!(self.mode, NodeMode::Suspect | NodeMode::Halted) {
            return Err(ConsensusError::Sync(SyncError::Suspended));
        }
        let _sw = Stopwatch::<500>::with_threshold("accept_block");
        self.validate_block(&block, now).map_err(ConsensusError::Rule)?;

        let weight = self.block_weight(&block);
        let hash = block.hash();
        let update = self.chain.insert(block, weight).map_err(ConsensusError::Rule)?;

        let newly_canonical: Vec<Hash> = match &update {
            TipUpdate::AlreadyKnown | TipUpdate::SideChain => return Ok(update),
            TipUpdate::Extended { new_tip } => {
                let tip = self.chain.tip();
                self.note_canonical_block(&tip);
                let parent = self.chain.get(tip.header.previous_hash).map_err(ConsensusError::Store)?;
                self.threshold.on_block(tip.index(), tip.header.timestamp.saturating_sub(parent.header.timestamp));
                vec![*new_tip]
            }
            TipUpdate::Reorged { detached, attached } => {
                warn!("reorg: detached {} blocks, attached {} at {}", detached.len(), attached.len(), hash);
                let detached = detached.clone();
                self.rebuild_canonical_state();
                // decisions recorded only on the abandoned fork go back into
                // the pending pool so they reach a block exactly once
                self.requeue_detached(&detached);
                attached.clone()
            }
        };

        if let Some(log) = self.log.as_mut() {
            for hash in newly_canonical {
                let block = self.chain.get(hash).map_err(ConsensusError::Store)?;
                log.append(&block).map_err(ConsensusError::Store)?;
            }
        }

        // finality advances ledgers; the rest is height-driven housekeeping
        let finalized = self.chain.advance_finality(self.params.confirmation_depth);
        for block in finalized {
            self.apply_finalized(&block, now)?;
        }
        self.on_height_advanced();

        let tip = self.chain.tip();
        self.anchors.maybe_publish(tip.index(), tip.hash(), now);
        Ok(update)
    }

    /// Weighted accepted increment carried by a block.
    fn block_weight(&self, block: &Block) -> f64 {
        block
            .transactions
            .iter()
            .filter_map(|tx| match tx {
                Transaction::AcceptedOptima { optima, effective_increment, .. } => {
                    self.registry.domain(&optima.domain_id).ok().map(|d| d.weight * effective_increment)
                }
                _ => None,
            })
            .sum()
    }

    fn note_canonical_block(&mut self, block: &Block) {
        for tx in &block.transactions {
            match tx {
                Transaction::AcceptedOptima { optima, meta, .. } => {
                    self.terminal_optimae.insert(optima.optima_id);
                    self.pending_decisions.shift_remove(&optima.optima_id);
                    self.commit_reveal.settle(optima.optima_id);
                    self.coordinator.close_round(optima.optima_id);
                    if let Ok(domain) = self.registry.domain(&optima.domain_id) {
                        let improvement = domain.improvement(meta.median_verified, *self.running_best.get(&optima.domain_id).unwrap_or(&domain.baseline_metric));
                        if improvement > 0.0 {
                            self.running_best.insert(optima.domain_id.clone(), meta.median_verified);
                        }
                    }
                }
                Transaction::RejectedOptima { optima_id, .. } => {
                    self.terminal_optimae.insert(*optima_id);
                    self.pending_decisions.shift_remove(optima_id);
                    self.commit_reveal.settle(*optima_id);
                    self.coordinator.close_round(*optima_id);
                }
                Transaction::CompletedTask { task_id, .. } => {
                    let recorded = *task_id;
                    self.pending_misc.retain(|t| !matches!(t, Transaction::CompletedTask { task_id, .. } if *task_id == recorded));
                }
                _ => {}
            }
        }
    }

    /// Recomputes chain-derived caches after a reorg.
    fn rebuild_canonical_state(&mut self) {
        self.terminal_optimae.clear();
        self.running_best = self.registry.domains().map(|d| (d.domain_id.clone(), d.baseline_metric)).collect();
        let blocks: Vec<_> = self.chain.canonical_blocks().collect();
        for block in &blocks {
            self.note_canonical_block(block);
        }
        // replay threshold history so all nodes agree on the controller state
        self.threshold = ThresholdManager::new(
            self.params.initial_threshold,
            self.params.target_block_time_millis(),
            self.params.threshold_ema_alpha,
            self.params.threshold_max_step,
            self.params.threshold_epoch_blocks,
            self.params.min_threshold,
            self.params.max_threshold,
        );
        for pair in blocks.windows(2) {
            let interval = pair[1].header.timestamp.saturating_sub(pair[0].header.timestamp);
            self.threshold.on_block(pair[1].index(), interval);
        }
    }

    /// Re-queues terminal records that lived only on a detached fork.
    fn requeue_detached(&mut self, detached: &[Hash]) {
        for hash in detached {
            let Ok(block) = self.chain.get(*hash) else { continue };
            for tx in &block.transactions {
                match tx {
                    Transaction::AcceptedOptima { optima, effective_increment, reward_fraction, meta } => {
                        let weight = self.registry.domain(&optima.domain_id).map(|d| d.weight).unwrap_or(0.0);
                        self.record_decision(
                            optima.optima_id,
                            DecisionBundle {
                                txs: vec![tx.clone()],
                                weighted_increment: weight * effective_increment,
                                optimizer_reward: Some((optima.optimizer_id, effective_increment * reward_fraction)),
                                evaluators: meta.quorum.clone(),
                            },
                        );
                    }
                    Transaction::RejectedOptima { optima_id, reason } => {
                        self.record_decision(*optima_id, DecisionBundle::rejection(*optima_id, *reason, Vec::new()));
                    }
                    _ => {}
                }
            }
        }
    }

    fn apply_finalized(&mut self, block: &Block, now: u64) -> ConsensusResult<()> {
        for tx in &block.transactions {
            match tx {
                Transaction::CoinDistribution { shares } => {
                    self.ledger.apply_shares(shares).map_err(ConsensusError::Rule)?;
                }
                Transaction::ReputationUpdate { peer_id, delta } => {
                    self.reputation.apply_delta(*peer_id, *delta, now);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Height-driven expiry: stale commits, voting timeouts, abandoned tasks.
    fn on_height_advanced(&mut self) {
        let height = self.chain.height();

        for optima in self.commit_reveal.expire(height) {
            debug!("optima {} expired unrevealed", optima.optima_id);
            self.record_decision(
                optima.optima_id,
                DecisionBundle::rejection(optima.optima_id, RejectReason::Expired, Vec::new()),
            );
        }

        for round in self.coordinator.take_timed_out(height) {
            // decide() handles both the sufficient-partial-votes path and the
            // insufficient-quorum rejection, and penalizes the absentees
            let decision = self.decide(round);
            debug!("voting window closed for {}: accepted={}", decision.optima_id, decision.accepted);
        }

        self.tasks.reopen_abandoned(height);
    }

    //
    // Sync serving & anchors
    //

    /// Serves a bounded canonical block range for a sync request.
    pub fn get_blocks(&self, from: u64, to: u64) -> SyncResult<Vec<Block>> {
        if to < from {
            return Err(SyncError::EmptyRange(from, to));
        }
        let span = (to - from + 1) as usize;
        if span > self.params.max_blocks_per_response {
            return Err(SyncError::RangeTooWide(from, to, self.params.max_blocks_per_response));
        }
        let mut blocks = Vec::with_capacity(span);
        for height in from..=to.min(self.chain.height()) {
            if let Ok(block) = self.chain.get_by_height(height) {
                blocks.push((*block).clone());
            }
        }
        Ok(blocks)
    }

    /// Checks a received external anchor; a conflict suspends the node.
    pub fn handle_anchor(&mut self, height: u64, anchored: Hash) -> SyncResult<()> {
        let local = self.chain.canonical_hash_at(height);
        match self.anchors.verify_received(height, anchored, local) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("anchor divergence at height {}; entering SUSPECT mode", height);
                self.mode = NodeMode::Suspect;
                Err(err)
            }
        }
    }

    fn minted_on_canonical(&self) -> u64 {
        let finalized = self.ledger.total_minted();
        let unfinalized: u64 = self
            .chain
            .canonical_blocks()
            .filter(|b| b.index() > self.chain.finalized_height())
            .flat_map(|b| {
                b.transactions
                    .iter()
                    .filter_map(|tx| match tx {
                        Transaction::CoinDistribution { shares } => Some(shares.iter().map(|s| s.amount).sum::<u64>()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            })
            .sum();
        finalized + unfinalized
    }
}
