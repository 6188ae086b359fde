//! Blockchain integration tests
//!
//! Drives the consensus rules, the on-disk chain store and the wallet file
//! through the public API only.

use meshchain::core::{
    build_block, select_transactions, state_transition, Block, ChainState, ConsensusParams,
    ProofOfWork,
};
use meshchain::error::ValidationError;
use meshchain::storage::{ChainStore, Submission};
use meshchain::wallet::{Wallet, Wallets};
use meshchain::Transaction;
use tempfile::tempdir;

fn params() -> ConsensusParams {
    ConsensusParams {
        difficulty: 6,
        block_reward: 50,
        max_transactions: 3,
    }
}

fn mine(
    state: &ChainState,
    previous: Option<&Block>,
    miner: &Wallet,
    txs: &[Transaction],
) -> Block {
    let params = params();
    build_block(
        &params,
        state,
        txs,
        &miner.get_address(),
        previous,
        params.difficulty,
    )
    .unwrap()
}

#[test]
fn test_mined_block_carries_work() {
    let miner = Wallet::new().unwrap();
    let block = mine(&ChainState::empty(), None, &miner, &[]);

    assert_eq!(block.get_number(), 0);
    assert!(block.is_first());
    assert!(ProofOfWork::validate(&block));
    assert!(ProofOfWork::work(&block) >= params().difficulty);
}

#[test]
fn test_transfers_move_balances_and_nonces() {
    let params = params();
    let alice = Wallet::new().unwrap();
    let bob = Wallet::new().unwrap();

    let first = mine(&ChainState::empty(), None, &alice, &[]);
    let state = state_transition(&params, &ChainState::empty(), &first).unwrap();

    let pay = alice.sign_transfer(bob.get_address(), 20, 0).unwrap();
    let again = alice.sign_transfer(bob.get_address(), 5, 1).unwrap();
    let second = mine(&state, Some(&first), &bob, &[again.clone(), pay.clone()]);

    // The builder orders by nonce no matter how candidates arrive
    assert_eq!(second.get_transactions(), &[pay, again][..]);

    let state = state_transition(&params, &state, &second).unwrap();
    assert_eq!(state.balance(&alice.get_address()), 25);
    assert_eq!(state.balance(&bob.get_address()), 75);
    assert_eq!(state.nonce(&alice.get_address()), 2);
    assert_eq!(state.get_last_block(), Some(&second.block_ref()));
}

#[test]
fn test_overdraft_is_left_out_of_blocks_and_rejected_in_them() {
    let params = params();
    let alice = Wallet::new().unwrap();
    let bob = Wallet::new().unwrap();
    let first = mine(&ChainState::empty(), None, &alice, &[]);
    let state = state_transition(&params, &ChainState::empty(), &first).unwrap();

    let overdraft = alice.sign_transfer(bob.get_address(), 51, 0).unwrap();
    assert!(select_transactions(&params, &state, &[overdraft.clone()]).is_empty());

    // Hand-assembled block that includes it anyway
    let template = Block::new(
        first.hash(),
        1,
        bob.get_address(),
        params.difficulty,
        vec![overdraft],
    );
    let forged = ProofOfWork::new_proof_of_work(template, params.difficulty)
        .run()
        .unwrap();
    assert_eq!(
        state_transition(&params, &state, &forged),
        Err(ValidationError::InsufficientBalance {
            required: 51,
            available: 50
        })
    );
}

#[test]
fn test_store_follows_longest_chain_and_persists() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("chain");
    let params = params();
    let alice = Wallet::new().unwrap();
    let bob = Wallet::new().unwrap();

    let first = mine(&ChainState::empty(), None, &alice, &[]);
    let base = state_transition(&params, &ChainState::empty(), &first).unwrap();
    let short = mine(&base, Some(&first), &alice, &[]);
    let long_1 = mine(&base, Some(&first), &bob, &[]);
    let long_state = state_transition(&params, &base, &long_1).unwrap();
    let long_2 = mine(&long_state, Some(&long_1), &bob, &[]);

    {
        let store = ChainStore::open(&db_path, params).unwrap();
        assert!(matches!(
            store.submit(first.clone()).unwrap(),
            Submission::Accepted { tip_changed: true, .. }
        ));
        store.submit(short.clone()).unwrap();
        assert_eq!(store.tip(), Some(short.block_ref()));

        // The long fork's tail arrives first and waits for its parent
        assert!(matches!(
            store.submit(long_2.clone()).unwrap(),
            Submission::Orphaned { .. }
        ));
        match store.submit(long_1.clone()).unwrap() {
            Submission::Accepted {
                connected,
                tip_changed,
            } => {
                assert_eq!(connected, vec![long_1.block_ref(), long_2.block_ref()]);
                assert!(tip_changed);
            }
            other => panic!("unexpected submission {other:?}"),
        }
        assert_eq!(store.submit(long_1.clone()).unwrap(), Submission::Duplicate);
    }

    let store = ChainStore::open(&db_path, params).unwrap();
    assert_eq!(store.tip(), Some(long_2.block_ref()));
    assert_eq!(store.tip_state().unwrap().balance(&bob.get_address()), 100);
    let walked: Vec<u64> = store
        .iter()
        .map(|block| block.unwrap().get_number())
        .collect();
    assert_eq!(walked, vec![2, 1, 0]);
    assert!(store.block(&short.hash()).unwrap().is_some());
}

#[test]
fn test_wallet_file_roundtrip() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("wallet.dat");

    let address = {
        let mut wallets = Wallets::open(&path);
        wallets.create_wallet().unwrap()
    };

    let wallets = Wallets::open(&path);
    assert_eq!(wallets.get_addresses(), vec![address.clone()]);
    let wallet = wallets.get_wallet(&address).unwrap();
    assert_eq!(wallet.get_address().to_hex(), address);

    let tx = wallet
        .sign_transfer(Wallet::new().unwrap().get_address(), 1, 0)
        .unwrap();
    assert!(tx.verify());
}
