//! Message transport seam.
//!
//! The core only cares about the envelope contract; real deployments plug a
//! socket layer in here. The in-process channel network below connects
//! several nodes inside one process and backs the simulation tests.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

use doin_consensus_core::peer::PeerId;

/// A delivered wire message: raw envelope bytes plus the directly-connected
/// peer that handed them over (the hop sender, not necessarily the origin).
#[derive(Clone, Debug)]
pub struct Delivery {
    pub from: PeerId,
    pub bytes: Vec<u8>,
}

pub trait Transport: Send + Sync {
    /// Peers currently reachable.
    fn peers(&self) -> Vec<PeerId>;

    /// Sends raw envelope bytes to one peer; unknown peers are dropped.
    fn send_to(&self, peer: PeerId, bytes: Vec<u8>);

    /// The ingress channel the node loop selects over.
    fn inbox(&self) -> &Receiver<Delivery>;
}

#[derive(Default)]
struct Mesh {
    inboxes: HashMap<PeerId, Sender<Delivery>>,
}

/// An in-process mesh of nodes connected all-to-all over channels.
#[derive(Clone, Default)]
pub struct ChannelNetwork {
    mesh: Arc<RwLock<Mesh>>,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the mesh as `peer` and returns its transport endpoint.
    pub fn join(&self, peer: PeerId) -> ChannelTransport {
        let (tx, rx) = unbounded();
        self.mesh.write().inboxes.insert(peer, tx);
        ChannelTransport { network: self.clone(), identity: peer, inbox: rx }
    }

    pub fn leave(&self, peer: PeerId) {
        self.mesh.write().inboxes.remove(&peer);
    }
}

pub struct ChannelTransport {
    network: ChannelNetwork,
    identity: PeerId,
    inbox: Receiver<Delivery>,
}

impl Transport for ChannelTransport {
    fn peers(&self) -> Vec<PeerId> {
        self.network.mesh.read().inboxes.keys().copied().filter(|p| *p != self.identity).collect()
    }

    fn send_to(&self, peer: PeerId, bytes: Vec<u8>) {
        if let Some(tx) = self.network.mesh.read().inboxes.get(&peer) {
            let _ = tx.send(Delivery { from: self.identity, bytes });
        }
    }

    fn inbox(&self) -> &Receiver<Delivery> {
        &self.inbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> PeerId {
        PeerId::from_bytes([byte; 32])
    }

    #[test]
    fn test_mesh_delivery() {
        let network = ChannelNetwork::new();
        let a = network.join(peer(1));
        let b = network.join(peer(2));

        assert_eq!(a.peers(), vec![peer(2)]);
        a.send_to(peer(2), vec![1, 2, 3]);
        let delivery = b.inbox().recv().unwrap();
        assert_eq!(delivery.from, peer(1));
        assert_eq!(delivery.bytes, vec![1, 2, 3]);

        network.leave(peer(2));
        assert!(a.peers().is_empty());
        // sends to departed peers are dropped, not errors
        a.send_to(peer(2), vec![4]);
    }
}
