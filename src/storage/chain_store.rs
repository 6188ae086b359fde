// This is where I persist the block tree and pick the chain I follow
// Every stored block comes with the state it produces, so any block can be extended directly
// The tip is the highest block I've accepted; on a tie I keep the one I saw first

use crate::core::{
    state_transition, Block, BlockRef, ChainState, ConsensusParams, ProofOfWork,
    GENESIS_PARENT_HASH,
};
use crate::error::{BlockchainError, Result, ValidationError};
use crate::utils::{deserialize, serialize};
use log::{info, warn};
use sled::{Db, Transactional, Tree};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

const BLOCKS_TREE: &str = "blocks"; // hash -> block
const STATES_TREE: &str = "states"; // hash -> state after that block
const TIP_KEY: &str = "tip";

// I only hold this many blocks whose parent I haven't seen yet
pub const MAX_ORPHANS: usize = 512;
// Orphans whose parent never shows up are dropped after this long
pub const ORPHAN_TIMEOUT: Duration = Duration::from_secs(600);

type OrphanPool = HashMap<[u8; 32], Vec<(Block, Instant)>>;

// What happened to a block I was handed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Duplicate,
    Orphaned { missing_parent: [u8; 32] },
    Rejected(ValidationError),
    Accepted {
        connected: Vec<BlockRef>, // The block plus any orphans it unlocked, in order
        tip_changed: bool,
    },
}

pub struct ChainStore {
    db: Db,
    blocks: Tree,
    states: Tree,
    params: ConsensusParams,
    tip: RwLock<Option<BlockRef>>,
    // Parent hash -> children waiting for it, with when I parked them; this lock also serialises submissions
    orphans: Mutex<OrphanPool>,
}

impl ChainStore {
    pub fn open<P: AsRef<Path>>(path: P, params: ConsensusParams) -> Result<ChainStore> {
        let db = sled::open(path.as_ref())
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        Self::with_db(db, params)
    }

    // When I need a store that disappears with the process (tests, chat-only nodes)
    pub fn temporary(params: ConsensusParams) -> Result<ChainStore> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db, params)
    }

    fn with_db(db: Db, params: ConsensusParams) -> Result<ChainStore> {
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;
        let states = db
            .open_tree(STATES_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open states tree: {e}")))?;
        let tip = match db.get(TIP_KEY)? {
            Some(bytes) => Some(deserialize::<BlockRef>(&bytes)?),
            None => None,
        };
        Ok(ChainStore {
            db,
            blocks,
            states,
            params,
            tip: RwLock::new(tip),
            orphans: Mutex::new(HashMap::new()),
        })
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn tip(&self) -> Option<BlockRef> {
        match self.tip.read() {
            Ok(tip) => *tip,
            Err(_) => {
                log::error!("Failed to acquire read lock on chain tip");
                None
            }
        }
    }

    pub fn tip_block(&self) -> Result<Option<Block>> {
        match self.tip() {
            Some(tip) => self.block(&tip.hash),
            None => Ok(None),
        }
    }

    // The state I mine on and answer balance queries from
    pub fn tip_state(&self) -> Result<ChainState> {
        match self.tip() {
            Some(tip) => self
                .state(&tip.hash)?
                .ok_or_else(|| BlockchainError::Database("Tip state is missing".to_string())),
            None => Ok(ChainState::empty()),
        }
    }

    pub fn contains(&self, hash: &[u8; 32]) -> Result<bool> {
        Ok(self.blocks.contains_key(hash)?)
    }

    pub fn block(&self, hash: &[u8; 32]) -> Result<Option<Block>> {
        match self.blocks.get(hash)? {
            Some(bytes) => Ok(Some(Block::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn state(&self, hash: &[u8; 32]) -> Result<Option<ChainState>> {
        match self.states.get(hash)? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    // I walk back from the tip; fine for the short chains this node keeps
    pub fn block_by_number(&self, number: u64) -> Result<Option<Block>> {
        for block in self.iter() {
            let block = block?;
            if block.get_number() == number {
                return Ok(Some(block));
            }
            if block.get_number() < number {
                break;
            }
        }
        Ok(None)
    }

    pub fn orphan_count(&self) -> usize {
        match self.orphans.lock() {
            Ok(orphans) => orphans.values().map(Vec::len).sum(),
            Err(_) => 0,
        }
    }

    // A parked block I can still hand to peers that are syncing the same branch
    pub fn orphan(&self, hash: &[u8; 32]) -> Option<Block> {
        match self.orphans.lock() {
            Ok(orphans) => orphans
                .values()
                .flatten()
                .map(|(block, _)| block)
                .find(|block| block.hash() == *hash)
                .cloned(),
            Err(_) => {
                log::error!("Failed to acquire lock on orphan pool");
                None
            }
        }
    }

    /// Drop orphans parked for longer than `ORPHAN_TIMEOUT`, as of `now`
    pub fn expire_orphans_at(&self, now: Instant) -> usize {
        match self.orphans.lock() {
            Ok(mut orphans) => {
                let before: usize = orphans.values().map(Vec::len).sum();
                for waiting in orphans.values_mut() {
                    waiting.retain(|(_, parked)| {
                        now.saturating_duration_since(*parked) <= ORPHAN_TIMEOUT
                    });
                }
                orphans.retain(|_, waiting| !waiting.is_empty());
                before - orphans.values().map(Vec::len).sum::<usize>()
            }
            Err(_) => {
                log::error!("Failed to acquire lock on orphan pool");
                0
            }
        }
    }

    pub fn iter(&self) -> ChainIterator {
        ChainIterator {
            next_hash: self.tip().map(|tip| tip.hash),
            blocks: self.blocks.clone(),
        }
    }

    // Blocks enter my store only through here
    pub fn submit(&self, block: Block) -> Result<Submission> {
        let mut orphans = self
            .orphans
            .lock()
            .map_err(|_| BlockchainError::Database("Orphan pool lock poisoned".to_string()))?;

        let hash = block.hash();
        if self.contains(&hash)? {
            return Ok(Submission::Duplicate);
        }

        let Some(parent_state) = self.parent_state(&block)? else {
            return Ok(self.park(&mut orphans, block));
        };

        let post = match state_transition(&self.params, &parent_state, &block) {
            Ok(post) => post,
            Err(e) => return Ok(Submission::Rejected(e)),
        };

        let mut connected = vec![];
        let mut tip_changed = false;
        let mut ready = vec![(block, post)];
        while let Some((block, post)) = ready.pop() {
            let block_ref = block.block_ref();
            tip_changed |= self.store(&block, &post)?;
            connected.push(block_ref);

            // I retry the orphans that were waiting for exactly this block
            for (child, _) in orphans.remove(&block_ref.hash).unwrap_or_default() {
                if self.contains(&child.hash())? {
                    continue;
                }
                match state_transition(&self.params, &post, &child) {
                    Ok(child_post) => ready.push((child, child_post)),
                    Err(e) => warn!("Dropping orphan block {}: {e}", child.hash_hex()),
                }
            }
        }

        Ok(Submission::Accepted {
            connected,
            tip_changed,
        })
    }

    fn parent_state(&self, block: &Block) -> Result<Option<ChainState>> {
        if *block.get_previous_hash() == GENESIS_PARENT_HASH {
            return Ok(Some(ChainState::empty()));
        }
        self.state(block.get_previous_hash())
    }

    fn park(&self, orphans: &mut OrphanPool, block: Block) -> Submission {
        // An orphan can't be fully checked yet, but it must at least carry real work
        let found = ProofOfWork::work(&block);
        if block.get_difficulty() < self.params.difficulty || found < block.get_difficulty() {
            return Submission::Rejected(ValidationError::InvalidProofOfWork {
                required: block.get_difficulty().max(self.params.difficulty),
                found,
            });
        }

        let missing_parent = *block.get_previous_hash();
        let already_parked = orphans
            .get(&missing_parent)
            .is_some_and(|waiting| waiting.iter().any(|(parked, _)| *parked == block));
        if already_parked {
            return Submission::Orphaned { missing_parent };
        }

        let held: usize = orphans.values().map(Vec::len).sum();
        if held >= MAX_ORPHANS {
            Self::evict_oldest_orphan(orphans);
        }
        orphans
            .entry(missing_parent)
            .or_default()
            .push((block, Instant::now()));
        Submission::Orphaned { missing_parent }
    }

    // When the pool is full the longest-waiting orphan makes room
    fn evict_oldest_orphan(orphans: &mut OrphanPool) {
        let oldest = orphans
            .iter()
            .flat_map(|(parent, waiting)| {
                waiting
                    .iter()
                    .enumerate()
                    .map(move |(index, (_, parked))| (*parked, *parent, index))
            })
            .min();
        let Some((_, parent, index)) = oldest else {
            return;
        };
        if let Some(waiting) = orphans.get_mut(&parent) {
            let (evicted, _) = waiting.remove(index);
            warn!("Orphan pool full, dropped block {}", evicted.hash_hex());
            if waiting.is_empty() {
                orphans.remove(&parent);
            }
        }
    }

    // I write the block, its state and (if it's now the highest) the tip in one transaction
    fn store(&self, block: &Block, post: &ChainState) -> Result<bool> {
        let block_ref = block.block_ref();
        let hash = block_ref.hash;
        let block_data = block.serialize()?;
        let state_data = serialize(post)?;
        let tip_data = serialize(&block_ref)?;

        let mut tip = self
            .tip
            .write()
            .map_err(|_| BlockchainError::Database("Tip lock poisoned".to_string()))?;
        let higher = match *tip {
            Some(current) => block_ref.number > current.number,
            None => true,
        };

        let meta: &Tree = &self.db;
        (&self.blocks, &self.states, meta)
            .transaction(|(blocks, states, meta)| {
                blocks.insert(&hash[..], block_data.as_slice())?;
                states.insert(&hash[..], state_data.as_slice())?;
                if higher {
                    meta.insert(TIP_KEY, tip_data.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                BlockchainError::Database(format!("Failed to store block: {e}"))
            })?;
        self.db.flush()?;

        if higher {
            *tip = Some(block_ref);
            info!(
                "New chain tip {} at height {}",
                block_ref.hash_hex(),
                block_ref.number
            );
        }
        Ok(higher)
    }
}

// I use this to walk from the tip back to the first block
pub struct ChainIterator {
    next_hash: Option<[u8; 32]>,
    blocks: Tree,
}

impl Iterator for ChainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Result<Block>> {
        let hash = self.next_hash.take()?;
        let block = match self.blocks.get(hash) {
            Ok(Some(bytes)) => Block::deserialize(&bytes),
            Ok(None) => Err(BlockchainError::Database(
                "Chain is missing a stored block".to_string(),
            )),
            Err(e) => Err(e.into()),
        };
        if let Ok(block) = &block {
            if !block.is_first() {
                self.next_hash = Some(*block.get_previous_hash());
            }
        }
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationErrorKind;
    use crate::testnet::{mine_chain, temporary_store, test_params};
    use crate::wallet::Wallet;

    #[test]
    fn test_longest_chain_becomes_tip() -> Result<()> {
        let store = temporary_store()?;
        let params = test_params();
        let alice = Wallet::new()?;
        let bob = Wallet::new()?;

        let (main, _) = mine_chain(&params, &ChainState::empty(), None, &alice, 2)?;
        for block in &main {
            store.submit(block.clone())?;
        }
        assert_eq!(store.tip(), Some(main[1].block_ref()));

        // A competing branch from the first block overtakes once it is longer
        let base = store.state(&main[0].hash())?.unwrap();
        let (fork, _) = mine_chain(&params, &base, Some(&main[0]), &bob, 2)?;
        let first = store.submit(fork[0].clone())?;
        assert_eq!(
            first,
            Submission::Accepted {
                connected: vec![fork[0].block_ref()],
                tip_changed: false
            }
        );
        assert_eq!(store.tip(), Some(main[1].block_ref()));

        store.submit(fork[1].clone())?;
        assert_eq!(store.tip(), Some(fork[1].block_ref()));
        assert_eq!(store.tip_state()?.balance(&bob.get_address()), 200);
        Ok(())
    }

    #[test]
    fn test_orphans_connect_when_parent_arrives() -> Result<()> {
        let store = temporary_store()?;
        let params = test_params();
        let miner = Wallet::new()?;
        let (chain, _) = mine_chain(&params, &ChainState::empty(), None, &miner, 3)?;

        assert_eq!(
            store.submit(chain[2].clone())?,
            Submission::Orphaned {
                missing_parent: chain[1].hash()
            }
        );
        assert_eq!(
            store.submit(chain[1].clone())?,
            Submission::Orphaned {
                missing_parent: chain[0].hash()
            }
        );
        assert_eq!(store.orphan_count(), 2);

        match store.submit(chain[0].clone())? {
            Submission::Accepted {
                connected,
                tip_changed,
            } => {
                assert!(tip_changed);
                assert_eq!(connected.len(), 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.orphan_count(), 0);
        assert_eq!(store.tip(), Some(chain[2].block_ref()));
        Ok(())
    }

    #[test]
    fn test_invalid_and_duplicate_blocks() -> Result<()> {
        let store = temporary_store()?;
        let params = test_params();
        let miner = Wallet::new()?;
        let (chain, _) = mine_chain(&params, &ChainState::empty(), None, &miner, 1)?;

        assert!(matches!(store.submit(chain[0].clone())?, Submission::Accepted { .. }));
        assert_eq!(store.submit(chain[0].clone())?, Submission::Duplicate);

        let wrong_number = Block::new(chain[0].hash(), 5, miner.get_address(), 0, vec![]);
        match store.submit(wrong_number)? {
            Submission::Rejected(e) => assert_eq!(e.kind(), ValidationErrorKind::InvalidBlockNumber),
            other => panic!("unexpected {other:?}"),
        }

        let unmined = Block::new([3u8; 32], 1, miner.get_address(), 0, vec![]);
        match store.submit(unmined)? {
            Submission::Rejected(e) => assert_eq!(e.kind(), ValidationErrorKind::InvalidProofOfWork),
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_chain_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let params = test_params();
        let miner = Wallet::new()?;
        let (chain, _) = mine_chain(&params, &ChainState::empty(), None, &miner, 3)?;
        {
            let store = ChainStore::open(dir.path(), params)?;
            for block in &chain {
                store.submit(block.clone())?;
            }
        }

        let store = ChainStore::open(dir.path(), params)?;
        assert_eq!(store.tip(), Some(chain[2].block_ref()));
        let walked: Vec<u64> = store
            .iter()
            .map(|b| b.map(|b| b.get_number()))
            .collect::<Result<_>>()?;
        assert_eq!(walked, vec![2, 1, 0]);
        assert_eq!(store.block_by_number(1)?, Some(chain[1].clone()));
        assert_eq!(store.block_by_number(7)?, None);
        Ok(())
    }

    #[test]
    fn test_full_orphan_pool_evicts_oldest() -> Result<()> {
        let store = temporary_store()?;
        let params = test_params();
        let miner = Wallet::new()?;
        let orphan = |seed: u64| {
            let parent = crate::utils::sha256_array(&seed.to_be_bytes());
            let template = Block::new(parent, 1, miner.get_address(), params.difficulty, vec![]);
            ProofOfWork::new_proof_of_work(template, params.difficulty)
                .run()
                .unwrap()
        };

        let first = orphan(0);
        store.submit(first.clone())?;
        std::thread::sleep(Duration::from_millis(2));
        for seed in 1..MAX_ORPHANS as u64 + 5 {
            assert!(matches!(store.submit(orphan(seed))?, Submission::Orphaned { .. }));
        }

        assert_eq!(store.orphan_count(), MAX_ORPHANS);
        assert!(store.orphan(&first.hash()).is_none());
        assert_eq!(store.orphans.lock().unwrap().len(), MAX_ORPHANS);

        // The same orphan twice takes one slot
        let last = orphan(MAX_ORPHANS as u64 + 4);
        store.submit(last.clone())?;
        assert_eq!(store.orphan_count(), MAX_ORPHANS);
        assert_eq!(store.orphan(&last.hash()), Some(last));
        Ok(())
    }

    #[test]
    fn test_stale_orphans_expire() -> Result<()> {
        let store = temporary_store()?;
        let params = test_params();
        let miner = Wallet::new()?;
        let (chain, _) = mine_chain(&params, &ChainState::empty(), None, &miner, 2)?;
        store.submit(chain[1].clone())?;

        assert_eq!(store.expire_orphans_at(Instant::now()), 0);
        assert_eq!(store.orphan(&chain[1].hash()), Some(chain[1].clone()));

        let later = Instant::now() + ORPHAN_TIMEOUT + Duration::from_secs(1);
        assert_eq!(store.expire_orphans_at(later), 1);
        assert_eq!(store.orphan_count(), 0);
        assert!(store.orphans.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_tip_is_written_with_its_block() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let params = test_params();
        let miner = Wallet::new()?;
        let (chain, _) = mine_chain(&params, &ChainState::empty(), None, &miner, 2)?;
        {
            let store = ChainStore::open(dir.path(), params)?;
            store.submit(chain[0].clone())?;
            store.submit(chain[1].clone())?;
        }

        // Whatever the tip key names must be readable, with its state
        let store = ChainStore::open(dir.path(), params)?;
        let tip = store.tip().unwrap();
        assert_eq!(tip, chain[1].block_ref());
        assert!(store.block(&tip.hash)?.is_some());
        assert!(store.state(&tip.hash)?.is_some());
        assert_eq!(store.submit(chain[1].clone())?, Submission::Duplicate);
        Ok(())
    }
}
