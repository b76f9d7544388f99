use crate::core::proof_of_work::TARGET_BITS;
use crate::core::{MerkleTree, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: Vec<u8>,
    hash: Vec<u8>,
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize,
}

impl Block {
    pub fn new_block(
        pre_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        Self::new_block_with_target_bits(pre_block_hash, transactions, height, TARGET_BITS)
    }

    pub fn new_block_with_target_bits(
        pre_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
        target_bits: u32,
    ) -> Result<Block> {
        let never = AtomicBool::new(false);
        Self::mine(pre_block_hash, transactions, height, target_bits, &never)?.ok_or_else(|| {
            BlockchainError::InvalidBlock("Proof-of-work stopped unexpectedly".to_string())
        })
    }

    /// Assembles a block and runs proof-of-work on it. `Ok(None)` means the
    /// search was cancelled.
    pub fn mine(
        pre_block_hash: Vec<u8>,
        transactions: &[Transaction],
        height: usize,
        target_bits: u32,
        cancel: &AtomicBool,
    ) -> Result<Option<Block>> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: vec![],
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
        };

        info!("Starting proof-of-work for block at height {height}");
        let solution = ProofOfWork::with_target_bits(&block, target_bits).run(cancel)?;
        let Some((nonce, hash)) = solution else {
            return Ok(None);
        };
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Proof-of-work completed for block {} at height {height}",
            HEXLOWER.encode(&block.hash)
        );
        Ok(Some(block))
    }

    pub fn generate_genesis_block(coinbase: &Transaction, target_bits: u32) -> Result<Block> {
        Block::new_block_with_target_bits(vec![], std::slice::from_ref(coinbase), 0, target_bits)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    pub fn hash_transactions(&self) -> Vec<u8> {
        MerkleTree::root_of(&self.transactions)
    }
}

#[cfg(test)]
impl Block {
    pub(crate) fn set_nonce_for_test(&mut self, nonce: i64) {
        self.nonce = nonce;
    }
}
