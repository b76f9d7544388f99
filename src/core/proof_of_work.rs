use crate::core::{Block, MerkleTree};
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use num_bigint::BigUint;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fixed difficulty: a valid hash has this many leading zero bits.
pub const TARGET_BITS: u32 = 24;

const MAX_NONCE: i64 = i64::MAX;

/// How many nonces are tried between checks of the cancellation flag.
const CANCEL_CHECK_INTERVAL: i64 = 4096;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    merkle_root: Vec<u8>,
    target: BigUint,
    target_bits: u32,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> ProofOfWork<'a> {
        Self::with_target_bits(block, TARGET_BITS)
    }

    pub fn with_target_bits(block: &'a Block, target_bits: u32) -> ProofOfWork<'a> {
        ProofOfWork {
            block,
            merkle_root: MerkleTree::root_of(block.get_transactions()),
            target: Self::target_for(target_bits),
            target_bits,
        }
    }

    /// `2^(256 - target_bits)`
    pub fn target_for(target_bits: u32) -> BigUint {
        BigUint::from(1u8) << (256 - target_bits.min(256)) as usize
    }

    /// `prevHash ‖ merkleRoot ‖ be64(timestamp) ‖ be64(targetBits) ‖ be64(nonce)`
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = Vec::with_capacity(self.block.get_pre_block_hash().len() + 56);
        data_bytes.extend(self.block.get_pre_block_hash());
        data_bytes.extend(&self.merkle_root);
        data_bytes.extend(self.block.get_timestamp().to_be_bytes());
        data_bytes.extend(i64::from(self.target_bits).to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigUint::from_bytes_be(hash) < self.target
    }

    /// Searches nonces upward from zero. Returns `Ok(None)` when `cancel` is
    /// raised before a solution is found.
    pub fn run(&self, cancel: &AtomicBool) -> Result<Option<(i64, Vec<u8>)>> {
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                log::info!("Proof-of-work cancelled at nonce {nonce}");
                return Ok(None);
            }
            let hash = sha256_digest(self.prepare_data(nonce).as_slice());
            if self.meets_target(&hash) {
                log::debug!("Found {} at nonce {nonce}", HEXLOWER.encode(&hash));
                return Ok(Some((nonce, hash)));
            }
            nonce += 1;
        }
        Err(BlockchainError::MiningExhausted)
    }

    /// Recomputes the hash at the block's nonce; it must match the stored
    /// hash and fall below the target. Transactions are not checked here.
    pub fn validate(&self) -> bool {
        let hash = sha256_digest(self.prepare_data(self.block.get_nonce()).as_slice());
        hash.as_slice() == self.block.get_hash() && self.meets_target(&hash)
    }
}
