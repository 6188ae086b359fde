// This file implements the transaction system - how value moves between accounts
// I use an account model: every transfer debits the sender, bumps its nonce and credits the receiver
// The signature covers a fixed big-endian encoding so every node hashes the same bytes

use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify};
use crate::utils::{serialize, sha256_digest};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// I prefix every canonical encoding with this version byte
pub const CANONICAL_VERSION: u8 = 0x01;

// Length of an uncompressed SEC1 P-256 public key
pub const ADDRESS_LEN: usize = 65;

// An address is the raw public key of the account owner
// I keep it as bytes and only turn it into hex for display and the CLI
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Address(Vec<u8>);

impl Address {
    pub fn from_public_key(public_key: &[u8]) -> Address {
        Address(public_key.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = BlockchainError;

    fn from_str(s: &str) -> Result<Address> {
        let bytes = HEXLOWER
            .decode(s.trim().to_ascii_lowercase().as_bytes())
            .map_err(|e| BlockchainError::InvalidAddress(format!("{s}: {e}")))?;
        if bytes.len() != ADDRESS_LEN {
            return Err(BlockchainError::InvalidAddress(format!(
                "{s}: expected {ADDRESS_LEN} bytes, found {}",
                bytes.len()
            )));
        }
        Ok(Address(bytes))
    }
}

// I write a length-prefixed byte field the same way everywhere in the canonical encoding
pub(crate) fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend((bytes.len() as u16).to_be_bytes());
    out.extend(bytes);
}

// This is a single value transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    sender: Address,    // Who pays (and who must have signed)
    receiver: Address,  // Who gets credited
    amount: u64,        // How much moves
    nonce: u64,         // Must equal the sender's current account nonce
    signature: Vec<u8>, // ECDSA P-256 signature over the signing bytes
}

impl Transaction {
    // When I build a transfer before signing it
    pub fn new(sender: Address, receiver: Address, amount: u64, nonce: u64) -> Transaction {
        Transaction {
            sender,
            receiver,
            amount,
            nonce,
            signature: vec![],
        }
    }

    // When I want a transfer that is ready to broadcast
    pub fn new_signed(
        pkcs8: &[u8],
        sender: Address,
        receiver: Address,
        amount: u64,
        nonce: u64,
    ) -> Result<Transaction> {
        let mut tx = Transaction::new(sender, receiver, amount, nonce);
        tx.sign(pkcs8)?;
        Ok(tx)
    }

    // These are the exact bytes I sign and verify
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 2 * (2 + ADDRESS_LEN) + 16);
        out.push(CANONICAL_VERSION);
        put_bytes(&mut out, self.sender.as_bytes());
        put_bytes(&mut out, self.receiver.as_bytes());
        out.extend(self.amount.to_be_bytes());
        out.extend(self.nonce.to_be_bytes());
        out
    }

    // I append the signature so a block hash commits to it too
    pub(crate) fn write_canonical(&self, out: &mut Vec<u8>) {
        out.extend(self.signing_bytes());
        put_bytes(out, &self.signature);
    }

    pub fn sign(&mut self, pkcs8: &[u8]) -> Result<()> {
        self.signature = ecdsa_p256_sha256_sign_digest(pkcs8, &self.signing_bytes())?;
        Ok(())
    }

    // A transaction is authentic when the sender's public key verifies the signature
    pub fn verify(&self) -> bool {
        ecdsa_p256_sha256_sign_verify(
            self.sender.as_bytes(),
            &self.signature,
            &self.signing_bytes(),
        )
    }

    // I use this as a short handle in logs
    pub fn id(&self) -> String {
        let mut bytes = vec![];
        self.write_canonical(&mut bytes);
        HEXLOWER.encode(&sha256_digest(&bytes))
    }

    pub fn get_sender(&self) -> &Address {
        &self.sender
    }

    pub fn get_receiver(&self) -> &Address {
        &self.receiver
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    #[cfg(test)]
    pub fn set_signature(&mut self, signature: Vec<u8>) {
        self.signature = signature;
    }
}
