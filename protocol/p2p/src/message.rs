//! The closed set of protocol messages and their stable type codes.

use doin_consensus_core::block::Block;
use doin_consensus_core::encoding::{CanonicalDecode, CanonicalEncode, CanonicalReader, CanonicalWriter};
use doin_consensus_core::optima::{OptimaCommit, OptimaReveal, Vote};
use doin_consensus_core::peer::PeerId;
use doin_consensus_core::task::Task;
use doin_consensus_core::{DomainId, TaskId};
use doin_hashes::Hash;

use crate::errors::{ProtocolError, ProtocolResult};

pub const TYPE_OPTIMAE_COMMIT: u8 = 0x01;
pub const TYPE_OPTIMAE_REVEAL: u8 = 0x02;
pub const TYPE_VOTE: u8 = 0x03;
pub const TYPE_BLOCK_ANNOUNCEMENT: u8 = 0x04;
pub const TYPE_CHAIN_STATUS: u8 = 0x05;
pub const TYPE_BLOCK_REQUEST: u8 = 0x06;
pub const TYPE_BLOCK_RESPONSE: u8 = 0x07;
pub const TYPE_TASK_CREATED: u8 = 0x08;
pub const TYPE_TASK_CLAIMED: u8 = 0x09;
pub const TYPE_TASK_COMPLETED: u8 = 0x0a;
pub const TYPE_PEER_DISCOVERY: u8 = 0x0b;

/// Summary of a peer's chain exchanged on connect and on demand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainStatus {
    pub height: u64,
    pub tip_hash: Hash,
    pub finalized_height: u64,
}

/// Self-description flooded on join: identity plus the domains the peer
/// evaluates for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerAnnouncement {
    pub peer_id: PeerId,
    pub evaluator_domains: Vec<DomainId>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    OptimaeCommit(OptimaCommit),
    OptimaeReveal(OptimaReveal),
    Vote(Vote),
    BlockAnnouncement(Block),
    ChainStatus(ChainStatus),
    BlockRequest { from: u64, to: u64 },
    BlockResponse(Vec<Block>),
    TaskCreated(Task),
    TaskClaimed { task_id: TaskId, claimant: PeerId, timestamp: u64 },
    TaskCompleted { task_id: TaskId, claimant: PeerId, result_hash: Hash },
    PeerDiscovery(PeerAnnouncement),
}

impl Payload {
    pub fn type_code(&self) -> u8 {
        match self {
            Payload::OptimaeCommit(_) => TYPE_OPTIMAE_COMMIT,
            Payload::OptimaeReveal(_) => TYPE_OPTIMAE_REVEAL,
            Payload::Vote(_) => TYPE_VOTE,
            Payload::BlockAnnouncement(_) => TYPE_BLOCK_ANNOUNCEMENT,
            Payload::ChainStatus(_) => TYPE_CHAIN_STATUS,
            Payload::BlockRequest { .. } => TYPE_BLOCK_REQUEST,
            Payload::BlockResponse(_) => TYPE_BLOCK_RESPONSE,
            Payload::TaskCreated(_) => TYPE_TASK_CREATED,
            Payload::TaskClaimed { .. } => TYPE_TASK_CLAIMED,
            Payload::TaskCompleted { .. } => TYPE_TASK_COMPLETED,
            Payload::PeerDiscovery(_) => TYPE_PEER_DISCOVERY,
        }
    }

    /// Canonical payload bytes, excluding the type code (carried by the
    /// envelope header).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = CanonicalWriter::new();
        match self {
            Payload::OptimaeCommit(commit) => commit.encode(&mut writer),
            Payload::OptimaeReveal(reveal) => reveal.encode(&mut writer),
            Payload::Vote(vote) => vote.encode(&mut writer),
            Payload::BlockAnnouncement(block) => block.encode(&mut writer),
            Payload::ChainStatus(status) => {
                writer.write_u64(status.height).write_hash(status.tip_hash).write_u64(status.finalized_height);
            }
            Payload::BlockRequest { from, to } => {
                writer.write_u64(*from).write_u64(*to);
            }
            Payload::BlockResponse(blocks) => {
                writer.write_len(blocks.len());
                for block in blocks {
                    block.encode(&mut writer);
                }
            }
            Payload::TaskCreated(task) => {
                writer.write_uuid(task.task_id).write_u8(task.priority).write_hash(task.payload_ref);
            }
            Payload::TaskClaimed { task_id, claimant, timestamp } => {
                writer.write_uuid(*task_id).write_raw(claimant.as_bytes()).write_u64(*timestamp);
            }
            Payload::TaskCompleted { task_id, claimant, result_hash } => {
                writer.write_uuid(*task_id).write_raw(claimant.as_bytes()).write_hash(*result_hash);
            }
            Payload::PeerDiscovery(announcement) => {
                writer.write_raw(announcement.peer_id.as_bytes());
                writer.write_len(announcement.evaluator_domains.len());
                for domain in &announcement.evaluator_domains {
                    writer.write_str(domain);
                }
            }
        }
        writer.finish()
    }

    /// Decodes a payload of the given type code, requiring full consumption.
    pub fn from_bytes(type_code: u8, bytes: &[u8]) -> ProtocolResult<Self> {
        let mut reader = CanonicalReader::new(bytes);
        let payload = match type_code {
            TYPE_OPTIMAE_COMMIT => Payload::OptimaeCommit(OptimaCommit::decode(&mut reader)?),
            TYPE_OPTIMAE_REVEAL => Payload::OptimaeReveal(OptimaReveal::decode(&mut reader)?),
            TYPE_VOTE => Payload::Vote(Vote::decode(&mut reader)?),
            TYPE_BLOCK_ANNOUNCEMENT => Payload::BlockAnnouncement(Block::decode(&mut reader)?),
            TYPE_CHAIN_STATUS => Payload::ChainStatus(ChainStatus {
                height: reader.read_u64()?,
                tip_hash: reader.read_hash()?,
                finalized_height: reader.read_u64()?,
            }),
            TYPE_BLOCK_REQUEST => Payload::BlockRequest { from: reader.read_u64()?, to: reader.read_u64()? },
            TYPE_BLOCK_RESPONSE => {
                let len = reader.read_len()?;
                let mut blocks = Vec::with_capacity(len.min(64));
                for _ in 0..len {
                    blocks.push(Block::decode(&mut reader)?);
                }
                Payload::BlockResponse(blocks)
            }
            TYPE_TASK_CREATED => {
                let task_id = reader.read_uuid()?;
                let priority = reader.read_u8()?;
                let payload_ref = reader.read_hash()?;
                Payload::TaskCreated(Task::new(task_id, priority, payload_ref))
            }
            TYPE_TASK_CLAIMED => Payload::TaskClaimed {
                task_id: reader.read_uuid()?,
                claimant: PeerId::decode(&mut reader)?,
                timestamp: reader.read_u64()?,
            },
            TYPE_TASK_COMPLETED => Payload::TaskCompleted {
                task_id: reader.read_uuid()?,
                claimant: PeerId::decode(&mut reader)?,
                result_hash: reader.read_hash()?,
            },
            TYPE_PEER_DISCOVERY => {
                let peer_id = PeerId::decode(&mut reader)?;
                let len = reader.read_len()?;
                let mut evaluator_domains = Vec::with_capacity(len.min(256));
                for _ in 0..len {
                    evaluator_domains.push(reader.read_str()?);
                }
                Payload::PeerDiscovery(PeerAnnouncement { peer_id, evaluator_domains })
            }
            other => return Err(ProtocolError::UnknownType(other)),
        };
        reader.finish()?;
        Ok(payload)
    }

    /// The identity a payload claims to act as, where it carries one. The
    /// router cross-checks it against the envelope origin.
    pub fn claimed_identity(&self) -> Option<PeerId> {
        match self {
            Payload::OptimaeCommit(commit) => Some(commit.optimizer_id),
            Payload::OptimaeReveal(reveal) => Some(reveal.optimizer_id),
            Payload::Vote(vote) => Some(vote.evaluator_id),
            Payload::TaskClaimed { claimant, .. } => Some(*claimant),
            Payload::TaskCompleted { claimant, .. } => Some(*claimant),
            Payload::PeerDiscovery(announcement) => Some(announcement.peer_id),
            _ => None,
        }
    }
}
