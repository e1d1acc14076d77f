//! The node: a single-threaded protocol loop owning all shared state.
//!
//! Message ingress, worker-pool results and chain mutation all run on one
//! thread; each event is processed to a consistent state before the next is
//! taken. Heavy plugin work never runs here, only on the worker pool.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use secp256k1::Keypair;

use doin_consensus::consensus::Consensus;
use doin_consensus::coordinator::VerificationAssignment;
use doin_consensus::errors::ConsensusError;
use doin_consensus::processes::anchor::AnchorSink;
use doin_consensus_core::block::Block;
use doin_consensus_core::config::Params;
use doin_consensus_core::domain::{PluginRegistry, ResourceBudget};
use doin_consensus_core::errors::block::RuleError;
use doin_consensus_core::errors::optima::{OptimaError, OptimaResult};
use doin_consensus_core::errors::ErrorKind;
use doin_consensus_core::hashing;
use doin_consensus_core::optima::{OptimaCommit, OptimaReveal, Vote};
use doin_consensus_core::peer::PeerId;
use doin_consensus_core::sign::{self, signing_digest};
use doin_consensus_core::task::ClaimPriority;
use doin_consensus_core::{OptimaId, Uuid};

use doin_core::core::Core;
use doin_core::service::Service;
use doin_core::time::unix_now;
use doin_core::{debug, info, trace, warn};

use doin_p2p::envelope::{Envelope, DEFAULT_TTL};
use doin_p2p::flood::{FloodDisposition, FloodRouter};
use doin_p2p::message::{ChainStatus, Payload, PeerAnnouncement};
use doin_p2p::peer_book::PeerBook;
use doin_p2p::sync;

use crate::transport::{Delivery, Transport};
use crate::worker_pool::{EvaluationJob, EvaluationResult, WorkerPool};

const IDLE_TICK: Duration = Duration::from_millis(250);

pub struct NodeConfig {
    pub params: Params,
    /// Domains this node evaluates for
    pub evaluator_domains: Vec<String>,
    /// Whether this node packages blocks when the threshold is crossed
    pub generate_blocks: bool,
    pub worker_threads: usize,
}

pub struct DoinNode {
    keypair: Keypair,
    identity: PeerId,
    config: NodeConfig,
    pub consensus: Consensus,
    router: FloodRouter,
    peer_book: PeerBook,
    transport: Box<dyn Transport>,
    pool: WorkerPool,
    shutdown_rx: Receiver<()>,
    shutdown_tx: Sender<()>,
}

impl DoinNode {
    pub fn new(
        keypair: Keypair,
        config: NodeConfig,
        registry: PluginRegistry,
        anchor_sink: Arc<dyn AnchorSink>,
        transport: Box<dyn Transport>,
    ) -> Result<Self, ConsensusError> {
        let identity = sign::peer_id_of(&keypair);
        let mut consensus = Consensus::new(config.params.clone(), registry, anchor_sink)?;
        for domain in &config.evaluator_domains {
            consensus.register_evaluator(identity, domain).map_err(ConsensusError::Optima)?;
        }
        let pool = WorkerPool::new(config.worker_threads);
        let (shutdown_tx, shutdown_rx) = unbounded();
        Ok(Self {
            identity,
            consensus,
            router: FloodRouter::default(),
            peer_book: PeerBook::default(),
            transport,
            pool,
            shutdown_rx,
            shutdown_tx,
            keypair,
            config,
        })
    }

    pub fn identity(&self) -> PeerId {
        self.identity
    }

    /// Persists the canonical chain under `path`, replaying any prior log.
    pub fn attach_chain_log(&mut self, path: &std::path::Path) -> Result<(), ConsensusError> {
        self.consensus.attach_chain_log(path, unix_now())
    }

    pub fn shutdown_handle(&self) -> Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Announces this node to the mesh: identity, evaluated domains, chain tip.
    pub fn announce(&mut self) {
        let announcement = PeerAnnouncement { peer_id: self.identity, evaluator_domains: self.config.evaluator_domains.clone() };
        self.broadcast(Payload::PeerDiscovery(announcement));
        let status = self.chain_status();
        self.broadcast(Payload::ChainStatus(status));
    }

    /// Blocking protocol loop; returns on shutdown signal.
    pub fn run(&mut self) {
        info!("node {} entering protocol loop", self.identity);
        loop {
            select! {
                recv(self.shutdown_rx) -> _ => break,
                recv(self.transport.inbox()) -> delivery => {
                    if let Ok(delivery) = delivery {
                        self.on_delivery(delivery, unix_now());
                        self.try_generate(unix_now());
                    }
                }
                recv(self.pool.results()) -> result => {
                    if let Ok(result) = result {
                        self.on_evaluation(result, unix_now());
                        self.try_generate(unix_now());
                    }
                }
                default(IDLE_TICK) => {
                    self.try_generate(unix_now());
                }
            }
        }
        trace!("node {} left protocol loop", self.identity);
    }

    /// Drains everything currently queued without blocking. Returns the
    /// number of events processed; the simulation harness pumps nodes with
    /// this until the mesh goes quiet.
    pub fn pump(&mut self, now: u64) -> usize {
        let mut handled = 0;
        loop {
            let mut progressed = false;
            while let Ok(delivery) = self.transport.inbox().try_recv() {
                self.on_delivery(delivery, now);
                progressed = true;
                handled += 1;
            }
            // worker results may lag plugin execution; give them a moment
            while let Ok(result) = self.pool.results().recv_timeout(Duration::from_millis(50)) {
                self.on_evaluation(result, now);
                progressed = true;
                handled += 1;
            }
            self.try_generate(now);
            if !progressed {
                return handled;
            }
        }
    }

    //
    // Local work submission (the optimizer role)
    //

    /// Runs the domain's optimizer locally, commits and immediately reveals.
    /// Returns the new optima id.
    pub fn submit_optimization(&mut self, domain_id: &str, now: u64) -> OptimaResult<OptimaId> {
        let domain =
            self.consensus.registry().domain(domain_id).map_err(|_| OptimaError::UnknownDomain(domain_id.to_string()))?.clone();
        let plugins =
            self.consensus.registry().plugins(domain_id).map_err(|_| OptimaError::UnknownDomain(domain_id.to_string()))?.clone();

        // local training seed; the canonical derived seed is fixed by the
        // commitment below and recorded with the experiment
        let local_seed = signing_digest(&[self.identity.as_bytes().as_slice(), &now.to_be_bytes()].concat());
        let budget = ResourceBudget {
            training_seconds: self.config.params.max_training_seconds,
            memory_mb: self.config.params.max_memory_mb,
        };
        let outcome = plugins
            .optimize
            .optimize(&domain, local_seed, budget)
            .map_err(|e| OptimaError::PluginFailure(domain_id.to_string(), e.to_string()))?;

        let nonce: Vec<u8> = Uuid::new_v4().as_bytes().to_vec();
        let optima_id = Uuid::new_v4();
        let mut commit = OptimaCommit {
            optima_id,
            domain_id: domain_id.to_string(),
            optimizer_id: self.identity,
            commit_hash: hashing::optima::commit_hash(&outcome.parameters, &nonce),
            reported_metric: outcome.metric,
            timestamp: now,
            budget,
            signature: Default::default(),
        };
        commit.signature = sign::sign_message(&self.keypair, &commit.signing_bytes());

        self.consensus.handle_commit(commit.clone(), now)?;
        self.broadcast(Payload::OptimaeCommit(commit));

        let mut reveal = OptimaReveal {
            optima_id,
            optimizer_id: self.identity,
            parameters: outcome.parameters,
            nonce,
            signature: Default::default(),
        };
        reveal.signature = sign::sign_message(&self.keypair, &reveal.signing_bytes());

        let assignments = self.consensus.handle_reveal(reveal.clone(), now)?;
        self.broadcast(Payload::OptimaeReveal(reveal));
        self.schedule_own_assignments(&assignments, now);
        Ok(optima_id)
    }

    //
    // Event handling
    //

    fn on_delivery(&mut self, delivery: Delivery, now: u64) {
        if self.peer_book.is_untrusted(delivery.from) {
            return;
        }
        let envelope = match Envelope::from_bytes(&delivery.bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!("malformed envelope from {}: {}", delivery.from, err);
                self.peer_book.note_protocol_error(delivery.from);
                return;
            }
        };

        match self.router.handle(envelope, now) {
            Ok(FloodDisposition::Duplicate) => {}
            Ok(FloodDisposition::Deliver { deliver, relay }) => {
                if let Some(relay) = relay {
                    self.relay(relay, delivery.from);
                }
                self.dispatch(deliver, delivery.from, now);
            }
            Err(err) => {
                debug!("dropping envelope from {}: {}", delivery.from, err);
                self.peer_book.note_protocol_error(delivery.from);
            }
        }
    }

    fn dispatch(&mut self, payload: Payload, from: PeerId, now: u64) {
        match payload {
            Payload::OptimaeCommit(commit) => {
                if let Err(err) = self.consensus.handle_commit(commit, now) {
                    self.note_optima_error(err);
                }
            }
            Payload::OptimaeReveal(reveal) => match self.consensus.handle_reveal(reveal, now) {
                Ok(assignments) => self.schedule_own_assignments(&assignments, now),
                Err(err) => self.note_optima_error(err),
            },
            Payload::Vote(vote) => match self.consensus.handle_vote(vote, now) {
                Ok(Some(decision)) => {
                    debug!("optima {} decided: accepted={}", decision.optima_id, decision.accepted);
                }
                Ok(None) => {}
                Err(err) => self.note_optima_error(err),
            },
            Payload::BlockAnnouncement(block) => self.on_block(block, from, now),
            Payload::ChainStatus(status) => self.on_chain_status(status, from),
            Payload::BlockRequest { from: lo, to: hi } => match self.consensus.get_blocks(lo, hi) {
                Ok(blocks) => self.send_direct(from, Payload::BlockResponse(blocks)),
                Err(err) => {
                    debug!("refusing block request [{lo}, {hi}] from {from}: {err}");
                    self.peer_book.note_protocol_error(from);
                }
            },
            Payload::BlockResponse(blocks) => self.on_block_response(blocks, from, now),
            Payload::TaskCreated(task) => self.consensus.tasks.create(task),
            Payload::TaskClaimed { task_id, claimant, timestamp } => {
                let claim = ClaimPriority { block_height: self.consensus.height(), timestamp, claimant };
                self.consensus.tasks.claim(task_id, claim, self.consensus.height());
            }
            Payload::TaskCompleted { task_id, claimant, result_hash } => {
                self.consensus.handle_task_completion(task_id, claimant, result_hash);
            }
            Payload::PeerDiscovery(announcement) => {
                for domain in &announcement.evaluator_domains {
                    if let Err(err) = self.consensus.register_evaluator(announcement.peer_id, domain) {
                        debug!("ignoring evaluator registration: {err}");
                    }
                }
                // a newcomer wants our view of the chain
                let status = self.chain_status();
                self.send_direct(from, Payload::ChainStatus(status));
            }
        }
    }

    fn on_block(&mut self, block: Block, from: PeerId, now: u64) {
        if sync::announcement_needs_sync(self.consensus.height(), block.index()) {
            debug!("block {} is ahead of local height {}, requesting status", block.index(), self.consensus.height());
            let status = self.chain_status();
            self.send_direct(from, Payload::ChainStatus(status));
            return;
        }
        match self.consensus.accept_block(block, now) {
            Ok(update) => trace!("block accepted: {:?}", update),
            Err(ConsensusError::Rule(RuleError::UnknownParent(_))) => {
                // an honest fork we have no history for; trade statuses
                let status = self.chain_status();
                self.send_direct(from, Payload::ChainStatus(status));
            }
            Err(err) if err.kind() == ErrorKind::Consistency => {
                warn!("peer {} served an invalid block: {}", from, err);
                self.peer_book.mark_untrusted(from);
            }
            Err(err) => debug!("block not applied: {}", err),
        }
    }

    fn on_chain_status(&mut self, status: ChainStatus, from: PeerId) {
        let local = self.consensus.height();
        if let Some(request) = sync::plan_request(local, &status) {
            if self.consensus.mode() == doin_consensus::NodeMode::Normal {
                self.consensus.set_mode(doin_consensus::NodeMode::Syncing);
            }
            self.send_direct(from, request);
        } else if status.height < local {
            // they are behind; let them pull from us
            let ours = self.chain_status();
            self.send_direct(from, Payload::ChainStatus(ours));
        }
    }

    fn on_block_response(&mut self, blocks: Vec<Block>, from: PeerId, now: u64) {
        let Some(blocks) = sync::sequential_blocks(blocks) else {
            self.peer_book.note_protocol_error(from);
            return;
        };
        for block in blocks {
            match self.consensus.accept_block(block, now) {
                Ok(_) => {}
                Err(ConsensusError::Rule(RuleError::UnknownParent(_))) => {
                    debug!("sync response from {} does not connect to local history", from);
                    return;
                }
                Err(err) if err.kind() == ErrorKind::Consistency => {
                    warn!("sync peer {} served an invalid block: {}", from, err);
                    self.peer_book.mark_untrusted(from);
                    return;
                }
                Err(err) => {
                    debug!("sync append stopped: {}", err);
                    return;
                }
            }
        }
        // either pull the next window or conclude the handshake
        let status = self.chain_status();
        self.send_direct(from, Payload::ChainStatus(status));
        if self.consensus.mode() == doin_consensus::NodeMode::Syncing {
            self.consensus.set_mode(doin_consensus::NodeMode::Normal);
        }
    }

    fn on_evaluation(&mut self, result: EvaluationResult, now: u64) {
        match result.outcome {
            Ok(metric) => {
                let vote_bytes = Vote::signing_bytes(result.optima_id, self.identity, metric);
                let vote = Vote {
                    optima_id: result.optima_id,
                    evaluator_id: self.identity,
                    measured_metric: metric,
                    signature: sign::sign_message(&self.keypair, &vote_bytes),
                };
                match self.consensus.handle_vote(vote.clone(), now) {
                    Ok(_) => self.broadcast(Payload::Vote(vote)),
                    Err(err) => self.note_optima_error(err),
                }

                let result_hash = signing_digest(&metric.to_bits().to_be_bytes());
                self.consensus.handle_task_completion(result.task_id, self.identity, result_hash);
                self.broadcast(Payload::TaskCompleted { task_id: result.task_id, claimant: self.identity, result_hash });
            }
            Err(err) => {
                // no vote: the coordinator treats us as a no-show
                warn!("evaluation of {} failed: {}", result.optima_id, err);
                self.consensus.tasks.fail(result.task_id, self.identity);
            }
        }
    }

    fn schedule_own_assignments(&mut self, assignments: &[VerificationAssignment], now: u64) {
        let own_identity = self.identity;
        let own_assignments: Vec<_> = assignments.iter().filter(|a| a.evaluator == own_identity).cloned().collect();
        for assignment in own_assignments.iter() {
            let (domain_id, parameters) = match self.consensus.coordinator_round(assignment.optima_id) {
                Some(round) => (round.optima.domain_id.clone(), round.optima.parameters.clone()),
                None => continue,
            };
            let domain = match self.consensus.registry().domain(&domain_id) {
                Ok(domain) => domain.clone(),
                Err(_) => continue,
            };
            let plugins = match self.consensus.registry().plugins(&domain_id) {
                Ok(plugins) => plugins.clone(),
                Err(_) => continue,
            };

            // claim the verification task before starting the work
            let claim = ClaimPriority { block_height: self.consensus.height(), timestamp: now, claimant: self.identity };
            self.consensus.tasks.claim(assignment.task_id, claim, self.consensus.height());
            self.broadcast(Payload::TaskClaimed { task_id: assignment.task_id, claimant: self.identity, timestamp: now });

            self.pool.submit(EvaluationJob {
                optima_id: assignment.optima_id,
                task_id: assignment.task_id,
                evaluator: self.identity,
                domain,
                plugins,
                parameters: Arc::new(parameters),
                synthetic_seed: assignment.synthetic_seed,
                deadline: Duration::from_secs(self.config.params.max_training_seconds),
            });
        }
    }

    fn try_generate(&mut self, now: u64) {
        if !self.config.generate_blocks || !self.consensus.can_generate_block() {
            return;
        }
        match self.consensus.generate_block(self.identity, now) {
            Ok(Some(block)) => self.broadcast(Payload::BlockAnnouncement(block)),
            Ok(None) => {}
            Err(err) => warn!("block generation failed: {}", err),
        }
    }

    //
    // Outbound
    //

    fn chain_status(&self) -> ChainStatus {
        ChainStatus {
            height: self.consensus.height(),
            tip_hash: self.consensus.tip_hash(),
            finalized_height: self.consensus.finalized_height(),
        }
    }

    /// Floods a freshly-originated payload to all trusted peers.
    fn broadcast(&mut self, payload: Payload) {
        let envelope = Envelope::new(&self.keypair, payload, DEFAULT_TTL);
        // our own flood echoing back must dedup away
        let _ = self.router.handle(envelope.clone(), unix_now());
        let bytes = envelope.to_bytes();
        let peers = self.transport.peers();
        for peer in self.peer_book.trusted_peers(&peers) {
            self.transport.send_to(peer, bytes.clone());
        }
    }

    /// Relays a flood envelope to everyone except the hop it came from.
    fn relay(&mut self, envelope: Envelope, came_from: PeerId) {
        let bytes = envelope.to_bytes();
        let peers = self.transport.peers();
        for peer in self.peer_book.trusted_peers(&peers) {
            if peer == came_from || peer == envelope.origin {
                continue;
            }
            self.transport.send_to(peer, bytes.clone());
        }
    }

    /// Point-to-point message outside the flood (ttl 0, never relayed).
    fn send_direct(&mut self, peer: PeerId, payload: Payload) {
        let envelope = Envelope::new(&self.keypair, payload, 0);
        self.transport.send_to(peer, envelope.to_bytes());
    }

    fn note_optima_error(&self, err: OptimaError) {
        // protocol and economic failures are local and silent to the sender
        debug!("optima message dropped: {} (kind {:?})", err, err.kind());
    }

    pub fn shutdown(self) {
        self.pool.shutdown();
    }
}

/// Thread-service wrapper binding a node into the runtime [`Core`].
pub struct NodeService {
    node: Mutex<Option<DoinNode>>,
    shutdown: Sender<()>,
}

impl NodeService {
    pub fn new(node: DoinNode) -> Self {
        let shutdown = node.shutdown_handle();
        Self { node: Mutex::new(Some(node)), shutdown }
    }
}

impl Service for NodeService {
    fn ident(self: Arc<Self>) -> &'static str {
        "doin-node"
    }

    fn start(self: Arc<Self>, _core: Arc<Core>) -> Vec<std::thread::JoinHandle<()>> {
        let mut node = self.node.lock().take().expect("node service started twice");
        vec![std::thread::Builder::new()
            .name("doin-node".into())
            .spawn(move || {
                node.announce();
                node.run();
                node.shutdown();
            })
            .expect("spawning the node thread")]
    }

    fn stop(self: Arc<Self>) {
        let _ = self.shutdown.send(());
    }
}
