//! Flood routing with bounded deduplication.
//!
//! Every flood message carries a `message_id`; a bounded LRU cache with entry
//! TTL drops redeliveries. Unknown messages are validated, delivered locally
//! and relayed to all peers except the sender with `ttl − 1`.

use indexmap::IndexMap;

use doin_consensus_core::Uuid;

use crate::envelope::Envelope;
use crate::errors::{ProtocolError, ProtocolResult};
use crate::message::Payload;

pub const DEFAULT_DEDUP_CAPACITY: usize = 16 * 1024;
pub const DEFAULT_DEDUP_TTL_MILLIS: u64 = 10 * 60 * 1000;

/// Bounded insertion-ordered dedup cache: oldest entries are evicted at
/// capacity, expired entries on access.
pub struct DedupCache {
    capacity: usize,
    entry_ttl_millis: u64,
    entries: IndexMap<Uuid, u64>,
}

impl DedupCache {
    pub fn new(capacity: usize, entry_ttl_millis: u64) -> Self {
        Self { capacity, entry_ttl_millis, entries: IndexMap::with_capacity(capacity) }
    }

    /// Records `id` at `now`. Returns false when the id is already present
    /// and fresh.
    pub fn insert(&mut self, id: Uuid, now: u64) -> bool {
        if let Some(seen_at) = self.entries.get(&id) {
            if now.saturating_sub(*seen_at) < self.entry_ttl_millis {
                return false;
            }
            self.entries.shift_remove(&id);
        }
        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(id, now);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What the node loop should do with an incoming envelope.
#[derive(Debug, PartialEq)]
pub enum FloodDisposition {
    /// Already seen: drop silently.
    Duplicate,
    /// Deliver the payload locally; relay the enclosed envelope if present.
    Deliver { deliver: Payload, relay: Option<Envelope> },
}

pub struct FloodRouter {
    dedup: DedupCache,
}

impl Default for FloodRouter {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TTL_MILLIS)
    }
}

impl FloodRouter {
    pub fn new(dedup_capacity: usize, dedup_ttl_millis: u64) -> Self {
        Self { dedup: DedupCache::new(dedup_capacity, dedup_ttl_millis) }
    }

    /// Validates an incoming envelope and decides delivery/relay. Protocol
    /// errors are returned for per-peer accounting and otherwise silent.
    pub fn handle(&mut self, envelope: Envelope, now: u64) -> ProtocolResult<FloodDisposition> {
        if !self.dedup.insert(envelope.message_id, now) {
            return Ok(FloodDisposition::Duplicate);
        }

        envelope.verify_signature()?;
        if let Some(claimed) = envelope.payload.claimed_identity() {
            if claimed != envelope.origin {
                return Err(ProtocolError::OriginMismatch);
            }
        }

        let relay = envelope.decremented();
        Ok(FloodDisposition::Deliver { deliver: envelope.payload, relay })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doin_consensus_core::peer::PeerId;
    use doin_consensus_core::sign::keypair_from_secret;

    fn envelope(ttl: u8) -> Envelope {
        let keypair = keypair_from_secret(&[7; 32]).unwrap();
        Envelope::new(&keypair, Payload::BlockRequest { from: 1, to: 5 }, ttl)
    }

    #[test]
    fn test_dedup_cache_basics() {
        let mut cache = DedupCache::new(4, 1000);
        let id = Uuid::from_u128(1);
        assert!(cache.insert(id, 0));
        assert!(!cache.insert(id, 500));
        // entry expired: accepted again
        assert!(cache.insert(id, 1500));
    }

    #[test]
    fn test_dedup_cache_evicts_oldest_at_capacity() {
        let mut cache = DedupCache::new(3, u64::MAX);
        for i in 0..3u128 {
            assert!(cache.insert(Uuid::from_u128(i), i as u64));
        }
        assert!(cache.insert(Uuid::from_u128(99), 10));
        assert_eq!(cache.len(), 3);
        // the oldest entry was evicted and is accepted anew
        assert!(cache.insert(Uuid::from_u128(0), 11));
    }

    #[test]
    fn test_router_delivers_then_drops_duplicate() {
        let mut router = FloodRouter::default();
        let envelope = envelope(5);

        match router.handle(envelope.clone(), 0).unwrap() {
            FloodDisposition::Deliver { deliver, relay } => {
                assert_eq!(deliver, Payload::BlockRequest { from: 1, to: 5 });
                assert_eq!(relay.unwrap().ttl, 4);
            }
            other => panic!("expected delivery, got {:?}", other),
        }

        assert_eq!(router.handle(envelope, 1).unwrap(), FloodDisposition::Duplicate);
    }

    #[test]
    fn test_router_stops_relay_at_zero_ttl() {
        let mut router = FloodRouter::default();
        match router.handle(envelope(0), 0).unwrap() {
            FloodDisposition::Deliver { relay, .. } => assert!(relay.is_none()),
            other => panic!("expected delivery, got {:?}", other),
        }
    }

    #[test]
    fn test_router_rejects_bad_signature() {
        let mut router = FloodRouter::default();
        let mut bad = envelope(5);
        bad.payload = Payload::BlockRequest { from: 1, to: 6 };
        assert!(matches!(router.handle(bad, 0), Err(ProtocolError::BadSignature(_))));
    }

    #[test]
    fn test_router_rejects_spoofed_identity() {
        let mut router = FloodRouter::default();
        let keypair = keypair_from_secret(&[7; 32]).unwrap();
        // a vote claiming another evaluator's identity, signed by the sender
        let vote = doin_consensus_core::optima::Vote {
            optima_id: Uuid::from_u128(1),
            evaluator_id: PeerId::from_bytes([9; 32]),
            measured_metric: 1.0,
            signature: Default::default(),
        };
        let spoofed = Envelope::new(&keypair, Payload::Vote(vote), 5);
        assert!(matches!(router.handle(spoofed, 0), Err(ProtocolError::OriginMismatch)));
    }
}
