//! Configuration management
//!
//! `GLOBAL_CONFIG` holds process-wide paths taken from the environment;
//! `NodeSettings` holds the network and consensus tunables of one node.

pub mod node_settings;
pub mod settings;

pub use node_settings::{
    parse_socket_addr, GossipSettings, NodeSettings, PeeringSettings, DEFAULT_LISTEN_ADDR,
};
pub use settings::{Config, GLOBAL_CONFIG};
