use crate::core::{Address, ChainState, Transaction};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// ( K -> (sender, nonce), V => (Transaction, last seen) )
pub struct MemoryPool {
    inner: RwLock<HashMap<(Address, u64), (Transaction, Instant)>>,
    timeout: Duration,
}

impl MemoryPool {
    pub fn new(timeout: Duration) -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Store `tx`, replacing any other transaction for the same sender and nonce.
    /// Returns false when the exact transaction was already pooled.
    pub fn add(&self, tx: Transaction) -> bool {
        let key = (tx.get_sender().clone(), tx.get_nonce());
        match self.inner.write() {
            Ok(mut pool) => {
                let known = matches!(pool.get(&key), Some((pooled, _)) if *pooled == tx);
                pool.insert(key, (tx, Instant::now()));
                !known
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                false
            }
        }
    }

    pub fn get(&self, sender: &Address, nonce: u64) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.get(&(sender.clone(), nonce)).map(|(tx, _)| tx.clone()),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                None
            }
        }
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.get(tx.get_sender(), tx.get_nonce())
            .is_some_and(|pooled| pooled == *tx)
    }

    /// Drop transactions whose nonce `state` has already consumed
    pub fn remove_confirmed(&self, state: &ChainState) -> usize {
        match self.inner.write() {
            Ok(mut pool) => {
                let before = pool.len();
                pool.retain(|(sender, nonce), _| *nonce >= state.nonce(sender));
                before - pool.len()
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                0
            }
        }
    }

    /// Drop transactions not seen within the timeout, as of `now`
    pub fn expire_at(&self, now: Instant) -> usize {
        let timeout = self.timeout;
        match self.inner.write() {
            Ok(mut pool) => {
                let before = pool.len();
                pool.retain(|_, (_, seen)| now.saturating_duration_since(*seen) <= timeout);
                before - pool.len()
            }
            Err(_) => {
                log::error!("Failed to acquire write lock on memory pool");
                0
            }
        }
    }

    /// Nonce a new transfer from `sender` should use, counting pooled ones
    pub fn next_nonce(&self, sender: &Address, state: &ChainState) -> u64 {
        let mut nonce = state.nonce(sender);
        match self.inner.read() {
            Ok(pool) => {
                while pool.contains_key(&(sender.clone(), nonce)) {
                    nonce += 1;
                }
            }
            Err(_) => log::error!("Failed to acquire read lock on memory pool"),
        }
        nonce
    }

    pub fn candidates(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.values().map(|(tx, _)| tx.clone()).collect(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                Vec::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on memory pool");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state_transition;
    use crate::error::Result;
    use crate::testnet::{funded_wallet, test_params};
    use crate::wallet::Wallet;

    #[test]
    fn test_latest_transaction_wins_per_sender_nonce() -> Result<()> {
        let pool = MemoryPool::new(Duration::from_secs(60));
        let alice = Wallet::new()?;
        let bob = Wallet::new()?;

        let first = alice.sign_transfer(bob.get_address(), 1, 0)?;
        let second = alice.sign_transfer(bob.get_address(), 2, 0)?;
        assert!(pool.add(first.clone()));
        assert!(!pool.add(first.clone()));
        assert!(pool.add(second.clone()));

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&alice.get_address(), 0), Some(second));
        assert!(!pool.contains(&first));
        Ok(())
    }

    #[test]
    fn test_expiry_and_confirmation() -> Result<()> {
        let params = test_params();
        let (alice, genesis, state) = funded_wallet(&params)?;
        let bob = Wallet::new()?;
        let pool = MemoryPool::new(Duration::from_secs(60));

        let tx0 = alice.sign_transfer(bob.get_address(), 1, 0)?;
        let tx1 = alice.sign_transfer(bob.get_address(), 1, 1)?;
        pool.add(tx0.clone());
        pool.add(tx1);
        assert_eq!(pool.next_nonce(&alice.get_address(), &state), 2);

        let block = crate::core::build_block(
            &params,
            &state,
            &[tx0],
            &bob.get_address(),
            Some(&genesis),
            params.difficulty,
        )?;
        let next = state_transition(&params, &state, &block)?;
        assert_eq!(pool.remove_confirmed(&next), 1);
        assert_eq!(pool.len(), 1);

        assert_eq!(pool.expire_at(Instant::now()), 0);
        assert_eq!(pool.expire_at(Instant::now() + Duration::from_secs(61)), 1);
        assert!(pool.is_empty());
        Ok(())
    }
}
