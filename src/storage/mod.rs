//! Data storage and persistence
//!
//! This module keeps the block tree with per-block states on disk
//! and the memory pool of pending transactions.

pub mod chain_store;
pub mod memory_pool;

pub use chain_store::{ChainIterator, ChainStore, Submission, MAX_ORPHANS, ORPHAN_TIMEOUT};
pub use memory_pool::MemoryPool;
