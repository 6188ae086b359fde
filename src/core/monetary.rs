/// Default consensus constants
///
/// Balances are plain integer units; there is no sub-unit and no fee.
///
/// Units credited to the miner of every block
pub const DEFAULT_BLOCK_REWARD: u64 = 10_000;

/// Leading zero bits a block hash needs by default
pub const DEFAULT_DIFFICULTY: u32 = 20;

/// Most transactions a miner packs into one block
pub const DEFAULT_MAX_TRANSACTIONS: usize = 10;
