//! Tunables for a running node, read from TOML
//!
//! Every field has a default so an empty file (or no file) is a valid configuration.

use crate::core::{
    ConsensusParams, DEFAULT_BLOCK_REWARD, DEFAULT_DIFFICULTY, DEFAULT_MAX_TRANSACTIONS,
};
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:12345";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub listen: String,
    pub bootstrap: Vec<String>,
    pub peer_limit: usize,
    pub ping_interval_secs: u64,
    pub activity_timeout_secs: u64,
    pub message_timeout_secs: u64,
    pub gossip_sweep_secs: u64,
    pub search_timeout_secs: u64,
    pub search_sweep_millis: u64,
    pub mempool_timeout_secs: u64,
    pub difficulty: u32,
    pub block_reward: u64,
    pub max_transactions: usize,
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            listen: DEFAULT_LISTEN_ADDR.to_string(),
            bootstrap: vec![],
            peer_limit: 5,
            ping_interval_secs: 10,
            activity_timeout_secs: 30,
            message_timeout_secs: 30,
            gossip_sweep_secs: 10,
            search_timeout_secs: 60,
            search_sweep_millis: 500,
            mempool_timeout_secs: 60,
            difficulty: DEFAULT_DIFFICULTY,
            block_reward: DEFAULT_BLOCK_REWARD,
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
        }
    }
}

/// Peering timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeeringSettings {
    pub peer_limit: usize,
    pub ping_interval: Duration,
    pub activity_timeout: Duration,
}

/// Gossip and search timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipSettings {
    pub message_timeout: Duration,
    pub sweep_interval: Duration,
    pub search_timeout: Duration,
    pub search_sweep_interval: Duration,
}

impl NodeSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<NodeSettings> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BlockchainError::Config(format!("Cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<NodeSettings> {
        let settings: NodeSettings = toml::from_str(text)?;
        settings.listen_addr()?;
        if settings.peer_limit == 0 {
            return Err(BlockchainError::Config(
                "peer_limit must be at least 1".to_string(),
            ));
        }
        // These drive background loops, so zero would spin them
        let periods = [
            ("ping_interval_secs", settings.ping_interval_secs),
            ("gossip_sweep_secs", settings.gossip_sweep_secs),
            ("search_sweep_millis", settings.search_sweep_millis),
            ("mempool_timeout_secs", settings.mempool_timeout_secs),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, value)| *value == 0) {
            return Err(BlockchainError::Config(format!("{name} must be at least 1")));
        }
        Ok(settings)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr(&self.listen)
    }

    pub fn bootstrap_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.bootstrap.iter().map(|a| parse_socket_addr(a)).collect()
    }

    pub fn consensus(&self) -> ConsensusParams {
        ConsensusParams {
            difficulty: self.difficulty,
            block_reward: self.block_reward,
            max_transactions: self.max_transactions,
        }
    }

    pub fn peering(&self) -> PeeringSettings {
        PeeringSettings {
            peer_limit: self.peer_limit,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            activity_timeout: Duration::from_secs(self.activity_timeout_secs),
        }
    }

    pub fn gossip(&self) -> GossipSettings {
        GossipSettings {
            message_timeout: Duration::from_secs(self.message_timeout_secs),
            sweep_interval: Duration::from_secs(self.gossip_sweep_secs),
            search_timeout: Duration::from_secs(self.search_timeout_secs),
            search_sweep_interval: Duration::from_millis(self.search_sweep_millis),
        }
    }

    pub fn mempool_timeout(&self) -> Duration {
        Duration::from_secs(self.mempool_timeout_secs)
    }
}

/// Accepts `host:port`, resolving names such as `localhost`
pub fn parse_socket_addr(text: &str) -> Result<SocketAddr> {
    if let Ok(addr) = text.parse::<SocketAddr>() {
        return Ok(addr);
    }
    use std::net::ToSocketAddrs;
    text.to_socket_addrs()
        .map_err(|e| BlockchainError::Config(format!("Invalid address {text}: {e}")))?
        .next()
        .ok_or_else(|| BlockchainError::Config(format!("Address {text} did not resolve")))
}
