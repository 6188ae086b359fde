// This is the consensus heart of my blockchain: two pure functions over ChainState
// state_transition decides whether a block may extend a state and what comes out of it
// build_block picks transactions from the mempool and mines a block that state_transition accepts

use crate::core::monetary::{DEFAULT_BLOCK_REWARD, DEFAULT_DIFFICULTY, DEFAULT_MAX_TRANSACTIONS};
use crate::core::{Address, Block, ChainState, ProofOfWork, Transaction, GENESIS_PARENT_HASH};
use crate::error::{BlockchainError, Result, ValidationError};
use log::debug;

// These are the rules every node in the network must agree on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusParams {
    pub difficulty: u32,         // Minimum leading zero bits on every block hash
    pub block_reward: u64,       // Credited to the miner of each block
    pub max_transactions: usize, // Upper bound on transactions a miner packs
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams {
            difficulty: DEFAULT_DIFFICULTY,
            block_reward: DEFAULT_BLOCK_REWARD,
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
        }
    }
}

// I run one transaction's checks in a fixed order: signature, then nonce, then balance
fn check_transaction(
    state: &ChainState,
    tx: &Transaction,
) -> std::result::Result<(), ValidationError> {
    if !tx.verify() {
        return Err(ValidationError::InvalidSignature);
    }
    let account = state.account(tx.get_sender());
    if tx.get_nonce() != account.nonce {
        return Err(ValidationError::InvalidNonce {
            expected: account.nonce,
            found: tx.get_nonce(),
        });
    }
    if tx.get_amount() > account.balance {
        return Err(ValidationError::InsufficientBalance {
            required: tx.get_amount(),
            available: account.balance,
        });
    }
    Ok(())
}

fn apply_transaction(state: &mut ChainState, tx: &Transaction) {
    state.debit(tx.get_sender(), tx.get_amount());
    state.credit(tx.get_receiver(), tx.get_amount());
}

// When a block arrives I check it against the state it claims to extend
// The input state is never touched; I work on a clone and hand that back
pub fn state_transition(
    params: &ConsensusParams,
    state: &ChainState,
    block: &Block,
) -> std::result::Result<ChainState, ValidationError> {
    let expected = state.expected_number();
    if block.get_number() != expected {
        return Err(ValidationError::InvalidBlockNumber {
            expected,
            found: block.get_number(),
        });
    }

    if *block.get_previous_hash() != state.expected_parent() {
        return Err(ValidationError::InvalidParent);
    }

    let required = block.get_difficulty().max(params.difficulty);
    let found = ProofOfWork::work(block);
    if block.get_difficulty() < params.difficulty || found < block.get_difficulty() {
        return Err(ValidationError::InvalidProofOfWork { required, found });
    }

    let mut next = state.clone();
    for tx in block.get_transactions() {
        check_transaction(&next, tx)?;
        apply_transaction(&mut next, tx);
    }

    next.credit(block.get_miner(), params.block_reward);
    next.set_last_block(block.block_ref());
    Ok(next)
}

// I pick the transactions a miner would include right now
// Candidates go in (sender, nonce) order so a sender's chain of nonces lines up
pub fn select_transactions(
    params: &ConsensusParams,
    state: &ChainState,
    candidates: &[Transaction],
) -> Vec<Transaction> {
    let mut ordered: Vec<&Transaction> = candidates
        .iter()
        .filter(|tx| tx.verify() && tx.get_nonce() >= state.nonce(tx.get_sender()))
        .collect();
    ordered.sort_by(|a, b| {
        (a.get_sender(), a.get_nonce()).cmp(&(b.get_sender(), b.get_nonce()))
    });

    let mut projected = state.clone();
    let mut selected = Vec::new();
    for tx in ordered {
        if selected.len() >= params.max_transactions {
            break;
        }
        match check_transaction(&projected, tx) {
            Ok(()) => {
                apply_transaction(&mut projected, tx);
                selected.push(tx.clone());
            }
            Err(e) => debug!("Leaving transaction {} out of block: {e}", tx.id()),
        }
    }
    selected
}

fn block_template(
    params: &ConsensusParams,
    state: &ChainState,
    candidates: &[Transaction],
    miner: &Address,
    previous: Option<&Block>,
    difficulty: u32,
) -> Block {
    let (number, previous_hash) = match previous {
        Some(parent) => (parent.get_number() + 1, parent.hash()),
        None => (0, GENESIS_PARENT_HASH),
    };
    let transactions = select_transactions(params, state, candidates);
    Block::new(previous_hash, number, miner.clone(), difficulty, transactions)
}

// When it's my turn to mine I build on `previous` (the block whose post-state is `state`)
pub fn build_block(
    params: &ConsensusParams,
    state: &ChainState,
    candidates: &[Transaction],
    miner: &Address,
    previous: Option<&Block>,
    difficulty: u32,
) -> Result<Block> {
    let template = block_template(params, state, candidates, miner, previous, difficulty);
    ProofOfWork::new_proof_of_work(template, difficulty)
        .run()
        .ok_or_else(|| BlockchainError::Mining("Nonce space exhausted".to_string()))
}

// Same as build_block, but I give up (None) as soon as `cancelled` says so
pub fn build_block_cancellable<F>(
    params: &ConsensusParams,
    state: &ChainState,
    candidates: &[Transaction],
    miner: &Address,
    previous: Option<&Block>,
    difficulty: u32,
    cancelled: F,
) -> Option<Block>
where
    F: Fn() -> bool,
{
    let template = block_template(params, state, candidates, miner, previous, difficulty);
    ProofOfWork::new_proof_of_work(template, difficulty).run_cancellable(cancelled)
}
