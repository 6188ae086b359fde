//! # meshchain - My Peer-to-Peer Account Chain
//!
//! This is a small proof-of-work blockchain I built on top of a gossip mesh.
//! When I come back to this code, here's what I need to remember:
//!
//! ## What I Built
//! - **Mesh Networking**: UDP datagrams carrying kinded JSON messages between a bounded set of random peers
//! - **Gossip**: Flooding broadcast with content-derived ids so every message is forwarded once
//! - **Search**: Query/response lookups riding on gossip, with timeouts
//! - **Account Chain**: Balances and nonces per address, advanced by a pure state transition
//! - **Mining**: Leading-zero-bit proof of work over a canonical block encoding
//! - **Node Runtime**: Chain store, mempool and miner wired to the network
//!
//! ## How I Organized My Code
//! - `core/`: Blocks, transactions, account state, state transition and block building
//! - `network/`: Transport, messaging, peering, gossip, search and the node server
//! - `storage/`: The sled-backed block tree and the memory pool
//! - `wallet/`: Key management and signing transfers
//! - `config/`: Environment paths and TOML node settings
//! - `utils/`: Hashing, signatures, encoding and background loops
//! - `cli/`: Command-line interface for the binary
//!
//! ## When I Need to Understand Something
//! 1. Start with `main.rs` to see the CLI commands and the console
//! 2. Look at `core/blockchain.rs` for the consensus rules
//! 3. Check `network/gossip.rs` for how messages spread
//! 4. Review `network/server.rs` for how blocks get fetched and mined
//! 5. Examine `storage/chain_store.rs` for fork choice and orphans

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::{Config, NodeSettings, GLOBAL_CONFIG};
pub use core::{
    build_block, state_transition, Address, Block, BlockRef, ChainState, ConsensusParams,
    ProofOfWork, Transaction,
};
pub use error::{BlockchainError, Result, ValidationError, ValidationErrorKind};
pub use network::{
    Gossip, GossipMessage, Message, Messaging, NodeHandle, NodeIdentity, PeerNetwork, Search,
    Server, Transport, UdpTransport,
};
pub use storage::{ChainStore, MemoryPool, Submission};
pub use utils::{
    ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, new_key_pair, sha256_digest,
    ShutdownToken,
};
pub use wallet::{Wallet, Wallets};
