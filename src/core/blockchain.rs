// The chain is a backward-linked list of blocks kept in a sled tree keyed by
// block hash, plus one tip pointer. Nothing else is held in memory. A node's
// chain is strictly append-only; there is no fork or reorg handling.

use crate::core::proof_of_work::TARGET_BITS;
use crate::core::{Block, PrevTransactions, ProofOfWork, TXOutput, Transaction};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use log::info;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

const TIP_BLOCK_HASH_KEY: &str = "l";
const BLOCKS_TREE: &str = "blocks";
const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Unspent outputs grouped by transaction id, each tagged with its index.
pub type UtxoMap = BTreeMap<Vec<u8>, Vec<(usize, TXOutput)>>;

#[derive(Clone)]
pub struct Blockchain {
    db: Db,
    blocks: Tree,
    db_path: PathBuf,
    target_bits: u32,
}

impl Blockchain {
    /// Creates a store at `db_path` holding a genesis block that pays
    /// `genesis_address`.
    pub fn create_blockchain_with_path(
        genesis_address: &str,
        db_path: impl AsRef<Path>,
    ) -> Result<Blockchain> {
        Self::create_blockchain_with_target_bits(genesis_address, db_path, TARGET_BITS)
    }

    pub fn create_blockchain_with_target_bits(
        genesis_address: &str,
        db_path: impl AsRef<Path>,
        target_bits: u32,
    ) -> Result<Blockchain> {
        let blockchain = Self::new_blockchain_with_path(db_path)?.with_target_bits(target_bits);
        if !blockchain.is_empty()? {
            return Err(BlockchainError::Database(format!(
                "Blockchain already exists at {}",
                blockchain.db_path.display()
            )));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx(genesis_address, GENESIS_COINBASE_DATA)?;
        let genesis = Block::generate_genesis_block(&coinbase_tx, target_bits)?;
        blockchain.append_block(&genesis)?;
        Ok(blockchain)
    }

    /// Opens the store at `db_path`. The chain may be empty, e.g. on a node
    /// that is about to sync from its peers.
    pub fn new_blockchain_with_path(db_path: impl AsRef<Path>) -> Result<Blockchain> {
        let path = db_path.as_ref().to_path_buf();
        let db = sled::open(&path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;

        Ok(Blockchain {
            db,
            blocks,
            db_path: path,
            target_bits: TARGET_BITS,
        })
    }

    /// Overrides the proof-of-work difficulty used for mining and validation.
    pub fn with_target_bits(mut self, target_bits: u32) -> Blockchain {
        self.target_bits = target_bits;
        self
    }

    pub fn target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_tip_hash(&self) -> Result<Option<Vec<u8>>> {
        let tip = self
            .blocks
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| BlockchainError::Database(format!("Failed to get tip hash: {e}")))?;
        Ok(tip.map(|hash| hash.to_vec()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.get_tip_hash()?.is_none())
    }

    fn map_store_error(err: TransactionError<BlockchainError>) -> BlockchainError {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(e) => {
                BlockchainError::Database(format!("Block store transaction failed: {e}"))
            }
        }
    }

    /// Writes `block` and moves the tip to it in one store transaction. The
    /// block must extend the current tip.
    pub fn append_block(&self, block: &Block) -> Result<()> {
        let block_data = block.serialize()?;

        self.blocks
            .transaction(|tx_db| {
                let tip = tx_db.get(TIP_BLOCK_HASH_KEY)?;
                let expected: &[u8] = tip.as_deref().unwrap_or_default();
                if block.get_pre_block_hash() != expected {
                    return Err(ConflictableTransactionError::Abort(
                        BlockchainError::InvalidBlock(format!(
                            "Block {} does not extend tip {}",
                            block.get_hash_hex(),
                            HEXLOWER.encode(expected)
                        )),
                    ));
                }
                tx_db.insert(block.get_hash(), block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                Ok(())
            })
            .map_err(Self::map_store_error)
    }

    /// Stores a block received from a peer. Blocks arrive tip-first during a
    /// sync, so the tip only moves when `block` is higher than the current
    /// tip. Returns whether the tip moved.
    pub fn add_block(&self, block: &Block) -> Result<bool> {
        let block_data = block.serialize()?;

        self.blocks
            .transaction(|tx_db| {
                if tx_db.get(block.get_hash())?.is_some() {
                    return Ok(false);
                }
                tx_db.insert(block.get_hash(), block_data.as_slice())?;

                let advance = match tx_db.get(TIP_BLOCK_HASH_KEY)? {
                    None => true,
                    Some(tip_hash) => match tx_db.get(tip_hash)? {
                        None => true,
                        Some(tip_bytes) => {
                            let tip_block = Block::deserialize(tip_bytes.as_ref())
                                .map_err(ConflictableTransactionError::Abort)?;
                            block.get_height() > tip_block.get_height()
                        }
                    },
                };
                if advance {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                }
                Ok(advance)
            })
            .map_err(Self::map_store_error)
    }

    /// Mines `transactions` on top of the current tip and appends the result.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        let never = AtomicBool::new(false);
        self.mine_block_cancellable(transactions, &never)?
            .ok_or_else(|| BlockchainError::InvalidBlock("Mining was cancelled".to_string()))
    }

    pub fn mine_block_cancellable(
        &self,
        transactions: &[Transaction],
        cancel: &AtomicBool,
    ) -> Result<Option<Block>> {
        let (pre_block_hash, height) = match self.get_tip_hash()? {
            Some(tip) => {
                let tip_block = self.read_block(&tip)?.ok_or_else(|| {
                    BlockchainError::Database("Tip block not found".to_string())
                })?;
                (tip, tip_block.get_height() + 1)
            }
            None => (vec![], 0),
        };

        info!(
            "Mining block at height {height} with {} transactions",
            transactions.len()
        );
        let Some(block) = Block::mine(
            pre_block_hash,
            transactions,
            height,
            self.target_bits,
            cancel,
        )?
        else {
            return Ok(None);
        };
        self.append_block(&block)?;
        info!("Successfully mined block: {}", block.get_hash_hex());
        Ok(Some(block))
    }

    /// Proof-of-work check at this chain's difficulty.
    pub fn validate_block(&self, block: &Block) -> bool {
        ProofOfWork::with_target_bits(block, self.target_bits).validate()
    }

    pub fn iterator(&self) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator {
            current_hash: self.get_tip_hash()?,
            blocks: self.blocks.clone(),
        })
    }

    fn read_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        let bytes = self
            .blocks
            .get(block_hash)
            .map_err(|e| BlockchainError::Database(format!("Failed to get block: {e}")))?;
        bytes.map(|b| Block::deserialize(b.as_ref())).transpose()
    }

    /// Height of the tip block, `None` for an empty chain.
    pub fn get_best_height(&self) -> Result<Option<usize>> {
        match self.get_tip_hash()? {
            None => Ok(None),
            Some(tip) => {
                let tip_block = self.read_block(&tip)?.ok_or_else(|| {
                    BlockchainError::Database("Tip block not found".to_string())
                })?;
                Ok(Some(tip_block.get_height()))
            }
        }
    }

    /// Finds a block on the chain reachable from the tip.
    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        for block in self.iterator()? {
            let block = block?;
            if block.get_hash() == block_hash {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    /// All block hashes from tip to genesis.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.iterator()?
            .map(|block| block.map(|b| b.get_hash().to_vec()))
            .collect()
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        for block in self.iterator()? {
            let block = block?;
            if let Some(tx) = block.get_transactions().iter().find(|tx| tx.get_id() == txid) {
                return Ok(Some(tx.clone()));
            }
        }
        Ok(None)
    }

    /// Collects every transaction referenced by `tx`'s inputs.
    pub fn find_prev_transactions(&self, tx: &Transaction) -> Result<PrevTransactions> {
        let mut prev_txs = PrevTransactions::new();
        if tx.is_coinbase() {
            return Ok(prev_txs);
        }
        for input in tx.get_vin() {
            if prev_txs.contains_key(input.get_txid()) {
                continue;
            }
            let prev_tx = self.find_transaction(input.get_txid())?.ok_or_else(|| {
                BlockchainError::MissingPreviousTransaction(HEXLOWER.encode(input.get_txid()))
            })?;
            prev_txs.insert(input.get_txid().to_vec(), prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.find_prev_transactions(tx)?;
        tx.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        let prev_txs = self.find_prev_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    /// Full scan for outputs never referenced by any input on the chain.
    /// The first pass gathers every spend, the second keeps what is left.
    pub fn find_utxo(&self) -> Result<UtxoMap> {
        let mut spent: HashSet<(Vec<u8>, usize)> = HashSet::new();
        for block in self.iterator()? {
            for tx in block?.get_transactions() {
                if tx.is_coinbase() {
                    continue;
                }
                for input in tx.get_vin() {
                    if let Some(idx) = input.output_index() {
                        spent.insert((input.get_txid().to_vec(), idx));
                    }
                }
            }
        }

        let mut utxo = UtxoMap::new();
        for block in self.iterator()? {
            for tx in block?.get_transactions() {
                let txid = tx.get_id().to_vec();
                let unspent: Vec<(usize, TXOutput)> = tx
                    .get_vout()
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| !spent.contains(&(txid.clone(), *idx)))
                    .map(|(idx, out)| (idx, out.clone()))
                    .collect();
                if !unspent.is_empty() {
                    utxo.insert(txid, unspent);
                }
            }
        }
        Ok(utxo)
    }
}

/// Walks the chain from the tip back to genesis, one store read per step.
pub struct BlockchainIterator {
    blocks: Tree,
    current_hash: Option<Vec<u8>>,
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        let data = match self.blocks.get(&hash) {
            Ok(Some(data)) => data,
            Ok(None) => {
                return Some(Err(BlockchainError::Database(format!(
                    "Block {} not found",
                    HEXLOWER.encode(&hash)
                ))))
            }
            Err(e) => {
                return Some(Err(BlockchainError::Database(format!(
                    "Failed to read block: {e}"
                ))))
            }
        };
        let block = match Block::deserialize(data.as_ref()) {
            Ok(block) => block,
            Err(e) => return Some(Err(e)),
        };
        if !block.is_genesis() {
            self.current_hash = Some(block.get_pre_block_hash().to_vec());
        }
        Some(Ok(block))
    }
}
