use crate::core::Block;
use crate::utils::{leading_zero_bits, sha256_digest};
use log::{debug, info};

/// How many nonces go by between cancellation checks
pub const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Nonce search over a block template. Difficulty is a count of leading zero bits.
pub struct ProofOfWork {
    block: Block,
    difficulty: u32,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: Block, difficulty: u32) -> ProofOfWork {
        ProofOfWork { block, difficulty }
    }

    /// Leading zero bits of the block's current hash
    pub fn work(block: &Block) -> u32 {
        leading_zero_bits(&block.hash())
    }

    /// Whether the block's hash carries the difficulty it declares
    pub fn validate(block: &Block) -> bool {
        Self::work(block) >= block.get_difficulty()
    }

    /// Search nonces upward from 0. None only if all 2^64 nonces miss.
    pub fn run(self) -> Option<Block> {
        self.run_cancellable(|| false)
    }

    /// Returns None if `cancelled` reports true at a check point or the nonce space runs out.
    pub fn run_cancellable<F>(self, cancelled: F) -> Option<Block>
    where
        F: Fn() -> bool,
    {
        let ProofOfWork {
            mut block,
            difficulty,
        } = self;
        info!(
            "Mining block {} with difficulty {difficulty}",
            block.get_number()
        );

        // I hash the encoded template in place and only rewrite the 8 nonce bytes each round
        let mut data = block.canonical_bytes();
        let offset = block.nonce_offset();
        let mut nonce: u64 = 0;
        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancelled() {
                debug!("Mining block {} cancelled at nonce {nonce}", block.get_number());
                return None;
            }
            data[offset..offset + 8].copy_from_slice(&nonce.to_be_bytes());
            if leading_zero_bits(&sha256_digest(&data)) >= difficulty {
                block.set_nonce(nonce);
                info!(
                    "Proof-of-work completed for block {}: {}",
                    block.get_number(),
                    block.hash_hex()
                );
                return Some(block);
            }
            nonce = nonce.checked_add(1)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GENESIS_PARENT_HASH;
    use crate::error::Result;
    use crate::wallet::Wallet;
    use std::cell::Cell;

    fn template(difficulty: u32) -> Result<Block> {
        let miner = Wallet::new()?.get_address();
        Ok(Block::new(GENESIS_PARENT_HASH, 0, miner, difficulty, vec![]))
    }

    #[test]
    fn test_mined_block_meets_difficulty() -> Result<()> {
        let block = ProofOfWork::new_proof_of_work(template(8)?, 8).run().unwrap();
        assert!(ProofOfWork::validate(&block));
        assert!(ProofOfWork::work(&block) >= 8);
        Ok(())
    }

    #[test]
    fn test_zero_difficulty_takes_first_nonce() -> Result<()> {
        let block = ProofOfWork::new_proof_of_work(template(0)?, 0).run().unwrap();
        assert_eq!(block.get_nonce(), 0);
        Ok(())
    }

    #[test]
    fn test_subsequent_nonce_change_breaks_work() -> Result<()> {
        let mut block = ProofOfWork::new_proof_of_work(template(12)?, 12).run().unwrap();
        let found = block.get_nonce();
        // Some neighbouring nonce will almost surely miss a 12 bit target
        let mut broken = false;
        for delta in 1..64 {
            block.set_nonce(found.wrapping_add(delta));
            if !ProofOfWork::validate(&block) {
                broken = true;
                break;
            }
        }
        assert!(broken);
        Ok(())
    }

    #[test]
    fn test_cancellation_stops_search() -> Result<()> {
        let checks = Cell::new(0u32);
        let result = ProofOfWork::new_proof_of_work(template(255)?, 255).run_cancellable(|| {
            checks.set(checks.get() + 1);
            checks.get() > 2
        });
        assert!(result.is_none());
        assert_eq!(checks.get(), 3);
        Ok(())
    }
}
