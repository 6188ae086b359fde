//! Test utilities for node testing

use crate::config::{GossipSettings, NodeSettings, PeeringSettings};
use crate::core::{build_block, state_transition, Block, ChainState, ConsensusParams};
use crate::error::Result;
use crate::network::{Gossip, Messaging, NodeIdentity, PeerNetwork, Search};
use crate::storage::ChainStore;
use crate::testnet::MemoryNetwork;
use crate::wallet::Wallet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Peering timers for tests with a given peer limit
pub fn peering_settings(peer_limit: usize) -> PeeringSettings {
    PeeringSettings {
        peer_limit,
        ping_interval: Duration::from_secs(10),
        activity_timeout: Duration::from_secs(30),
    }
}

pub fn gossip_settings() -> GossipSettings {
    NodeSettings::default().gossip()
}

/// Consensus rules cheap enough to mine inside a unit test
pub fn test_params() -> ConsensusParams {
    ConsensusParams {
        difficulty: 4,
        block_reward: 100,
        max_transactions: 10,
    }
}

pub fn test_settings() -> NodeSettings {
    NodeSettings {
        listen: "127.0.0.1:0".to_string(),
        difficulty: test_params().difficulty,
        block_reward: test_params().block_reward,
        max_transactions: test_params().max_transactions,
        ..NodeSettings::default()
    }
}

/// Messaging, peering, gossip and search on one memory endpoint
pub struct TestPeer {
    pub messaging: Arc<Messaging>,
    pub peering: Arc<PeerNetwork>,
    pub gossip: Arc<Gossip>,
    pub search: Arc<Search>,
}

impl TestPeer {
    pub fn new(network: &MemoryNetwork, peer_limit: usize) -> TestPeer {
        let messaging = network.connect();
        let identity = NodeIdentity::generate(messaging.local_addr()).unwrap();
        let peering = PeerNetwork::new(
            Arc::clone(&messaging),
            identity,
            peering_settings(peer_limit),
        );
        let gossip = Gossip::new(Arc::clone(&peering), gossip_settings());
        let search = Search::new(Arc::clone(&gossip));
        TestPeer {
            messaging,
            peering,
            gossip,
            search,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.messaging.local_addr()
    }
}

pub fn temporary_store() -> Result<ChainStore> {
    ChainStore::temporary(test_params())
}

/// Mine `count` empty blocks to `miner` on top of `state`, returning them in order
pub fn mine_chain(
    params: &ConsensusParams,
    state: &ChainState,
    previous: Option<&Block>,
    miner: &Wallet,
    count: usize,
) -> Result<(Vec<Block>, ChainState)> {
    let mut state = state.clone();
    let mut previous = previous.cloned();
    let mut blocks = vec![];
    for _ in 0..count {
        let block = build_block(
            params,
            &state,
            &[],
            &miner.get_address(),
            previous.as_ref(),
            params.difficulty,
        )?;
        state = state_transition(params, &state, &block)?;
        previous = Some(block.clone());
        blocks.push(block);
    }
    Ok((blocks, state))
}

/// A one-block chain paying the reward to a new wallet
pub fn funded_wallet(params: &ConsensusParams) -> Result<(Wallet, Block, ChainState)> {
    let wallet = Wallet::new()?;
    let (mut blocks, state) = mine_chain(params, &ChainState::empty(), None, &wallet, 1)?;
    let block = blocks.remove(0);
    Ok((wallet, block, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mine_chain_links_blocks() -> Result<()> {
        let params = test_params();
        let miner = Wallet::new()?;
        let (blocks, state) = mine_chain(&params, &ChainState::empty(), None, &miner, 3)?;
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1].get_previous_hash(), &blocks[0].hash());
        assert_eq!(state.balance(&miner.get_address()), 300);
        Ok(())
    }

    #[test]
    fn test_memory_network_drops_unknown_targets() {
        let network = MemoryNetwork::new();
        let peer = TestPeer::new(&network, 2);
        peer.peering.announce_to("127.0.0.1:1".parse().unwrap());
        assert_eq!(network.pending(), 2);
        assert_eq!(network.pump(), 0);
        assert_eq!(network.pending(), 0);
    }
}
