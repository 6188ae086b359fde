//! Wallet management
//!
//! This module handles key generation, file storage of key pairs,
//! and signing transfers from a wallet's address.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::Wallet;
pub use wallets::{Wallets, WALLET_FILE};
