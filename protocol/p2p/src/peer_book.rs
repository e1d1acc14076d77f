//! Per-peer standing: protocol-error accounting and trust downgrades.

use std::collections::HashMap;

use doin_consensus_core::peer::PeerId;

use doin_core::warn;

/// Protocol errors tolerated inside a session before the peer is downgraded.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 16;

#[derive(Clone, Copy, Debug, Default)]
struct PeerEntry {
    protocol_errors: u32,
    untrusted: bool,
}

pub struct PeerBook {
    error_threshold: u32,
    peers: HashMap<PeerId, PeerEntry>,
}

impl Default for PeerBook {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_THRESHOLD)
    }
}

impl PeerBook {
    pub fn new(error_threshold: u32) -> Self {
        Self { error_threshold, peers: HashMap::new() }
    }

    pub fn is_untrusted(&self, peer: PeerId) -> bool {
        self.peers.get(&peer).map(|e| e.untrusted).unwrap_or(false)
    }

    /// Counts a protocol error against `peer`; past the threshold the peer is
    /// downgraded.
    pub fn note_protocol_error(&mut self, peer: PeerId) {
        let entry = self.peers.entry(peer).or_default();
        entry.protocol_errors += 1;
        if entry.protocol_errors >= self.error_threshold && !entry.untrusted {
            warn!("peer {} exceeded the protocol error threshold, downgrading", peer);
            entry.untrusted = true;
        }
    }

    /// Immediate downgrade: the peer served provably invalid data (e.g. a
    /// block failing consistency validation).
    pub fn mark_untrusted(&mut self, peer: PeerId) {
        self.peers.entry(peer).or_default().untrusted = true;
    }

    pub fn trusted_peers<'a>(&'a self, all: &'a [PeerId]) -> impl Iterator<Item = PeerId> + 'a {
        all.iter().copied().filter(|p| !self.is_untrusted(*p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[test]
    fn test_error_threshold_downgrades() {
        let mut book = PeerBook::new(3);
        for _ in 0..2 {
            book.note_protocol_error(peer(1));
        }
        assert!(!book.is_untrusted(peer(1)));
        book.note_protocol_error(peer(1));
        assert!(book.is_untrusted(peer(1)));
    }

    #[test]
    fn test_invalid_block_is_immediate() {
        let mut book = PeerBook::default();
        book.mark_untrusted(peer(2));
        assert!(book.is_untrusted(peer(2)));

        let all = [peer(1), peer(2), peer(3)];
        let trusted: Vec<PeerId> = book.trusted_peers(&all).collect();
        assert_eq!(trusted, vec![peer(1), peer(3)]);
    }
}
