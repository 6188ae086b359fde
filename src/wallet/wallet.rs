use crate::core::{Address, Transaction};
use crate::error::Result;
use crate::utils::{new_key_pair, public_key_from_pkcs8};
use serde::{Deserialize, Serialize};

/// A P-256 key pair; its address is the public key itself
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        Self::from_pkcs8(pkcs8)
    }

    pub fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Wallet> {
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    pub fn get_address(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }

    /// Signed transfer from this wallet's address
    pub fn sign_transfer(&self, receiver: Address, amount: u64, nonce: u64) -> Result<Transaction> {
        Transaction::new_signed(&self.pkcs8, self.get_address(), receiver, amount, nonce)
    }
}
