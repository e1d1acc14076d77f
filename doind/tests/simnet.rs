//! In-process multi-node simulation: the full optimae pipeline and block
//! sync running over the channel mesh.

use std::sync::Arc;

use doin_consensus::processes::anchor::MemoryAnchorSink;
use doin_consensus_core::config::SIMNET_PARAMS;
use doin_consensus_core::domain::PluginRegistry;
use doin_consensus_core::peer::PeerId;
use doin_consensus_core::sign::{keypair_from_secret, peer_id_of};
use doin_consensus_core::tx::Transaction;

use doind::daemon::{DoinNode, NodeConfig};
use doind::plugins::{quadratic_domain, quadratic_plugins, QUADRATIC_DOMAIN};
use doind::transport::ChannelNetwork;

const NOW: u64 = 1_700_000_000_000;

fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry.register(quadratic_domain(), quadratic_plugins()).unwrap();
    registry
}

fn spawn_node(network: &ChannelNetwork, secret: u8, evaluator: bool, generator: bool) -> DoinNode {
    let keypair = keypair_from_secret(&[secret; 32]).unwrap();
    let identity = peer_id_of(&keypair);
    let config = NodeConfig {
        params: SIMNET_PARAMS.clone(),
        evaluator_domains: if evaluator { vec![QUADRATIC_DOMAIN.to_string()] } else { vec![] },
        generate_blocks: generator,
        worker_threads: 1,
    };
    DoinNode::new(keypair, config, registry(), Arc::new(MemoryAnchorSink::new()), Box::new(network.join(identity))).unwrap()
}

fn seed_reputations(nodes: &mut [&mut DoinNode], peers: &[PeerId]) {
    for node in nodes.iter_mut() {
        for peer in peers {
            node.consensus.seed_reputation(*peer, 5.0, NOW);
        }
    }
}

/// Pumps every node until the whole mesh goes quiet.
fn settle(nodes: &mut [&mut DoinNode], now: u64) {
    for _round in 0..100 {
        let handled: usize = nodes.iter_mut().map(|n| n.pump(now)).sum();
        if handled == 0 {
            return;
        }
    }
    panic!("mesh did not settle");
}

#[test]
fn test_two_node_pipeline_produces_a_block() {
    let network = ChannelNetwork::new();
    let mut optimizer = spawn_node(&network, 1, false, true);
    let mut evaluator = spawn_node(&network, 2, true, false);
    let ids = [optimizer.identity(), evaluator.identity()];
    seed_reputations(&mut [&mut optimizer, &mut evaluator], &ids);

    optimizer.announce();
    evaluator.announce();
    settle(&mut [&mut optimizer, &mut evaluator], NOW);

    let optima_id = optimizer.submit_optimization(QUADRATIC_DOMAIN, NOW).unwrap();
    settle(&mut [&mut optimizer, &mut evaluator], NOW + 1000);

    // the accepted optima crossed the threshold and was packaged into block 1
    assert_eq!(optimizer.consensus.height(), 1);
    assert_eq!(evaluator.consensus.height(), 1);
    assert_eq!(optimizer.consensus.tip_hash(), evaluator.consensus.tip_hash());

    let block = optimizer.consensus.get_blocks(1, 1).unwrap().remove(0);
    assert!(block
        .transactions
        .iter()
        .any(|tx| matches!(tx, Transaction::AcceptedOptima { optima, .. } if optima.optima_id == optima_id)));
    assert!(block.transactions.iter().any(|tx| matches!(tx, Transaction::CoinDistribution { .. })));

    // the evaluator's duplicate decision was retracted by the incoming block
    assert_eq!(evaluator.consensus.pending_weight(), 0.0);
    assert!(evaluator.consensus.pending_transactions().is_empty());
}

#[test]
fn test_late_joiner_syncs_to_equal_state() {
    let network = ChannelNetwork::new();
    let mut optimizer = spawn_node(&network, 1, false, true);
    let mut evaluator = spawn_node(&network, 2, true, false);
    let ids = [optimizer.identity(), evaluator.identity()];
    seed_reputations(&mut [&mut optimizer, &mut evaluator], &ids);

    optimizer.announce();
    evaluator.announce();
    settle(&mut [&mut optimizer, &mut evaluator], NOW);

    for round in 0..3u64 {
        optimizer.submit_optimization(QUADRATIC_DOMAIN, NOW + round * 2000).unwrap();
        settle(&mut [&mut optimizer, &mut evaluator], NOW + round * 2000 + 1000);
    }
    let tip_height = optimizer.consensus.height();
    assert!(tip_height >= 1);

    // a fresh node joins with nothing but genesis and pulls the chain
    let mut joiner = spawn_node(&network, 3, false, false);
    joiner.announce();
    settle(&mut [&mut optimizer, &mut evaluator, &mut joiner], NOW + 10_000);

    assert_eq!(joiner.consensus.height(), tip_height);
    assert_eq!(joiner.consensus.tip_hash(), optimizer.consensus.tip_hash());
    assert_eq!(joiner.consensus.finalized_height(), optimizer.consensus.finalized_height());

    // block-by-block equality, the sync round-trip law
    for height in 0..=tip_height {
        let a = optimizer.consensus.get_blocks(height, height).unwrap();
        let b = joiner.consensus.get_blocks(height, height).unwrap();
        assert_eq!(a, b);
    }
}
