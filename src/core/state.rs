//! Account balances as produced by applying blocks in order

use crate::core::{Address, GENESIS_PARENT_HASH};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

/// Number and hash of the last applied block
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct BlockRef {
    pub number: u64,
    pub hash: [u8; 32],
}

impl BlockRef {
    pub fn hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct ChainState {
    last_block: Option<BlockRef>,
    accounts: BTreeMap<Address, Account>,
}

impl ChainState {
    /// State before any block has been applied
    pub fn empty() -> ChainState {
        ChainState::default()
    }

    pub fn get_last_block(&self) -> Option<&BlockRef> {
        self.last_block.as_ref()
    }

    pub fn set_last_block(&mut self, last_block: BlockRef) {
        self.last_block = Some(last_block);
    }

    /// Number the next block must carry
    pub fn expected_number(&self) -> u64 {
        match &self.last_block {
            Some(last) => last.number + 1,
            None => 0,
        }
    }

    /// Parent hash the next block must carry
    pub fn expected_parent(&self) -> [u8; 32] {
        match &self.last_block {
            Some(last) => last.hash,
            None => GENESIS_PARENT_HASH,
        }
    }

    /// Unknown addresses read as a zero account
    pub fn account(&self, address: &Address) -> Account {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.account(address).balance
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.account(address).nonce
    }

    pub fn accounts(&self) -> &BTreeMap<Address, Account> {
        &self.accounts
    }

    pub fn credit(&mut self, address: &Address, amount: u64) {
        let account = self.accounts.entry(address.clone()).or_default();
        account.balance = account.balance.saturating_add(amount);
    }

    /// Debit `amount` and bump the nonce. The caller has already checked the balance.
    pub fn debit(&mut self, address: &Address, amount: u64) {
        let account = self.accounts.entry(address.clone()).or_default();
        account.balance -= amount;
        account.nonce += 1;
    }
}
