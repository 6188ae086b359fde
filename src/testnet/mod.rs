//! Testnet framework for node testing
//!
//! An in-memory datagram network that tests pump by hand, plus helpers for
//! funded wallets and throwaway chain stores.

pub mod memory_network;
pub mod test_utils;

pub use memory_network::{MemoryEndpoint, MemoryNetwork};
pub use test_utils::*;
