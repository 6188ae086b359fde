//! Core blockchain functionality
//!
//! This module contains the fundamental blockchain components including
//! blocks, transactions, account state and the proof-of-work consensus rules.

pub mod block;
pub mod blockchain;
pub mod monetary;
pub mod proof_of_work;
pub mod state;
pub mod transaction;

pub use block::{Block, GENESIS_PARENT_HASH};
pub use blockchain::{
    build_block, build_block_cancellable, select_transactions, state_transition, ConsensusParams,
};
pub use monetary::{DEFAULT_BLOCK_REWARD, DEFAULT_DIFFICULTY, DEFAULT_MAX_TRANSACTIONS};
pub use proof_of_work::{ProofOfWork, CANCEL_CHECK_INTERVAL};
pub use state::{Account, BlockRef, ChainState};
pub use transaction::{Address, Transaction, ADDRESS_LEN};
