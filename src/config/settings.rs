use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_DATA_DIR: &str = "data";
static DEFAULT_WALLET_FILE: &str = "wallet.dat";

const DATA_DIR_KEY: &str = "NODE_DATA_DIR";
const WALLET_FILE_KEY: &str = "NODE_WALLET_FILE";

/// Process-wide paths, seeded from the environment and overridable from the CLI
pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let mut map = HashMap::new();
        map.insert(
            String::from(DATA_DIR_KEY),
            env::var(DATA_DIR_KEY).unwrap_or_else(|_| String::from(DEFAULT_DATA_DIR)),
        );
        map.insert(
            String::from(WALLET_FILE_KEY),
            env::var(WALLET_FILE_KEY).unwrap_or_else(|_| String::from(DEFAULT_WALLET_FILE)),
        );

        Config {
            inner: RwLock::new(map),
        }
    }

    fn get(&self, key: &str, default: &str) -> String {
        match self.inner.read() {
            Ok(inner) => inner.get(key).cloned().unwrap_or_else(|| default.to_string()),
            Err(_) => {
                log::error!("Failed to acquire read lock on config");
                default.to_string()
            }
        }
    }

    fn set(&self, key: &str, value: String) {
        match self.inner.write() {
            Ok(mut inner) => {
                inner.insert(String::from(key), value);
            }
            Err(_) => log::error!("Failed to acquire write lock on config"),
        }
    }

    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(self.get(DATA_DIR_KEY, DEFAULT_DATA_DIR))
    }

    pub fn set_data_dir(&self, dir: String) {
        self.set(DATA_DIR_KEY, dir);
    }

    pub fn get_wallet_file(&self) -> PathBuf {
        PathBuf::from(self.get(WALLET_FILE_KEY, DEFAULT_WALLET_FILE))
    }

    pub fn set_wallet_file(&self, file: String) {
        self.set(WALLET_FILE_KEY, file);
    }

    /// Chain database location for a node listening on `port`, so several nodes share a machine
    pub fn node_db_path(&self, port: u16) -> PathBuf {
        self.get_data_dir().join(format!("node_{port}"))
    }
}
