use crate::core::transaction::{put_bytes, CANONICAL_VERSION};
use crate::core::{Address, BlockRef, Transaction};
use crate::error::Result;
use crate::utils::{deserialize, serialize, sha256_array};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

/// Parent hash carried by the first block of a chain
pub const GENESIS_PARENT_HASH: [u8; 32] = [0u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    previous_hash: [u8; 32],
    number: u64,
    miner: Address,
    difficulty: u32,
    nonce: u64,
    transactions: Vec<Transaction>,
}

impl Block {
    /// Unmined block with nonce 0
    pub fn new(
        previous_hash: [u8; 32],
        number: u64,
        miner: Address,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Block {
        Block {
            previous_hash,
            number,
            miner,
            difficulty,
            nonce: 0,
            transactions,
        }
    }

    /// Canonical bytes hashed for proof-of-work and parent linkage
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = vec![CANONICAL_VERSION];
        out.extend(self.previous_hash);
        out.extend(self.number.to_be_bytes());
        put_bytes(&mut out, self.miner.as_bytes());
        out.extend(self.difficulty.to_be_bytes());
        out.extend(self.nonce.to_be_bytes());
        out.extend((self.transactions.len() as u32).to_be_bytes());
        for tx in &self.transactions {
            tx.write_canonical(&mut out);
        }
        out
    }

    /// Byte offset of the nonce inside `canonical_bytes`
    pub(crate) fn nonce_offset(&self) -> usize {
        1 + 32 + 8 + 2 + self.miner.as_bytes().len() + 4
    }

    pub fn hash(&self) -> [u8; 32] {
        sha256_array(&self.canonical_bytes())
    }

    pub fn hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash())
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            number: self.number,
            hash: self.hash(),
        }
    }

    pub fn get_previous_hash(&self) -> &[u8; 32] {
        &self.previous_hash
    }

    pub fn get_number(&self) -> u64 {
        self.number
    }

    pub fn get_miner(&self) -> &Address {
        &self.miner
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn is_first(&self) -> bool {
        self.number == 0 && self.previous_hash == GENESIS_PARENT_HASH
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }
}
