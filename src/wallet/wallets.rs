use crate::config::GLOBAL_CONFIG;
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// Wallets keyed by hex address, persisted as one bincode file
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    /// Load from the configured wallet file
    pub fn new() -> Wallets {
        Self::open(GLOBAL_CONFIG.get_wallet_file())
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Wallets {
        let mut wallets = Wallets {
            wallets: HashMap::new(),
            path: path.as_ref().to_path_buf(),
        };
        wallets.load_from_file();
        wallets
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address().to_hex();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(&address.trim().to_ascii_lowercase())
    }

    fn load_from_file(&mut self) {
        // A missing or unreadable file just means an empty wallet set
        if let Err(e) = self.load_from_file_safe() {
            log::warn!("Could not load wallets from {}: {e}", self.path.display());
        }
    }

    fn load_from_file_safe(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let mut file = File::open(&self.path)?;
        let mut buf = vec![];
        file.read_to_end(&mut buf)?;
        self.wallets = deserialize(&buf[..])?;
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                BlockchainError::Wallet(format!("Cannot write {}: {e}", self.path.display()))
            })?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}
