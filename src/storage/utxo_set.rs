use crate::core::{Block, Blockchain, TXOutput, UtxoMap};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Tree};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const UTXO_TREE: &str = "chainstate";

/// Outputs stored under one transaction id, each tagged with its original
/// index so inputs keep referring to the right slot after partial spends.
type IndexedOutputs = Vec<(usize, TXOutput)>;

/// Derived index of unspent outputs, kept in its own sled tree next to the
/// blocks. It can always be rebuilt from the chain with [`UTXOSet::reindex`].
/// Queries hold the read side of `guard` so they never observe a rebuild or
/// an update halfway through.
#[derive(Clone)]
pub struct UTXOSet {
    blockchain: Blockchain,
    guard: Arc<RwLock<()>>,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet {
            blockchain,
            guard: Arc::new(RwLock::new(())),
        }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn tree(&self) -> Result<Tree> {
        self.blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))
    }

    fn lock_reader(&self) -> RwLockReadGuard<'_, ()> {
        self.guard
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_writer(&self) -> RwLockWriteGuard<'_, ()> {
        self.guard
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, IndexedOutputs)>> {
        let _reader = self.lock_reader();
        let mut entries = vec![];
        for item in self.tree()?.iter() {
            let (k, v) = item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            let outs: IndexedOutputs = deserialize(v.as_ref())?;
            entries.push((k.to_vec(), outs));
        }
        Ok(entries)
    }

    /// Picks outputs locked to `pub_key_hash` until their sum reaches
    /// `amount`. Keys are visited in sled's byte order and outputs in index
    /// order, so the same index always yields the same selection.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, Vec<(Vec<u8>, usize)>)> {
        let mut accumulated = 0;
        let mut selected = vec![];

        'scan: for (txid, outs) in self.entries()? {
            for (idx, out) in outs {
                if accumulated >= amount {
                    break 'scan;
                }
                if out.is_locked_with_key(pub_key_hash) {
                    accumulated = checked_total(accumulated, out.get_value())?;
                    selected.push((txid.clone(), idx));
                }
            }
        }
        Ok((accumulated, selected))
    }

    /// Every unspent output locked to `pub_key_hash`.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        Ok(self
            .entries()?
            .into_iter()
            .flat_map(|(_, outs)| outs)
            .filter(|(_, out)| out.is_locked_with_key(pub_key_hash))
            .map(|(_, out)| out)
            .collect())
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        self.find_utxo(pub_key_hash)?
            .iter()
            .try_fold(0, |total, out| checked_total(total, out.get_value()))
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize> {
        let _reader = self.lock_reader();
        let mut counter = 0;
        for item in self.tree()?.iter() {
            item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            counter += 1;
        }
        Ok(counter)
    }

    pub fn is_unspent(&self, txid: &[u8], index: usize) -> Result<bool> {
        let _reader = self.lock_reader();
        let Some(bytes) = self
            .tree()?
            .get(txid)
            .map_err(|e| BlockchainError::Database(format!("Failed to get UTXO: {e}")))?
        else {
            return Ok(false);
        };
        let outs: IndexedOutputs = deserialize(bytes.as_ref())?;
        Ok(outs.iter().any(|(idx, _)| *idx == index))
    }

    /// Current index contents, ordered by transaction id.
    pub fn snapshot(&self) -> Result<UtxoMap> {
        Ok(self.entries()?.into_iter().collect())
    }

    /// Rebuilds the index from a full chain scan. Stale entries are removed
    /// and fresh ones written in a single batch.
    pub fn reindex(&self) -> Result<()> {
        let _writer = self.lock_writer();
        let utxo_map = self.blockchain.find_utxo()?;
        let utxo_tree = self.tree()?;

        let mut batch = Batch::default();
        for key in utxo_tree.iter().keys() {
            let key = key.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            if !utxo_map.contains_key(&*key) {
                batch.remove(key);
            }
        }
        for (txid, outs) in &utxo_map {
            batch.insert(txid.as_slice(), serialize(outs)?);
        }
        utxo_tree
            .apply_batch(batch)
            .map_err(|e| BlockchainError::Database(format!("Failed to rebuild UTXO tree: {e}")))?;
        info!(
            "Reindexed UTXO set: {} transactions with unspent outputs",
            utxo_map.len()
        );
        Ok(())
    }

    /// Applies one block that has just been appended to the tip: spent
    /// outputs leave the index, every new output enters it.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _writer = self.lock_writer();
        let utxo_tree = self.tree()?;

        utxo_tree
            .transaction(|tx_db| {
                for tx in block.get_transactions() {
                    if !tx.is_coinbase() {
                        for vin in tx.get_vin() {
                            let abort = |msg: String| {
                                ConflictableTransactionError::Abort(BlockchainError::Database(msg))
                            };
                            let outs_bytes = tx_db.get(vin.get_txid())?.ok_or_else(|| {
                                abort(format!(
                                    "UTXO entry for {} not found",
                                    HEXLOWER.encode(vin.get_txid())
                                ))
                            })?;
                            let mut outs: IndexedOutputs = deserialize(outs_bytes.as_ref())
                                .map_err(ConflictableTransactionError::Abort)?;

                            let before = outs.len();
                            outs.retain(|(idx, _)| Some(*idx) != vin.output_index());
                            if outs.len() == before {
                                return Err(abort(format!(
                                    "Output {}:{} is not unspent",
                                    HEXLOWER.encode(vin.get_txid()),
                                    vin.get_vout()
                                )));
                            }

                            if outs.is_empty() {
                                tx_db.remove(vin.get_txid())?;
                            } else {
                                let bytes =
                                    serialize(&outs).map_err(ConflictableTransactionError::Abort)?;
                                tx_db.insert(vin.get_txid(), bytes)?;
                            }
                        }
                    }

                    let new_outputs: IndexedOutputs =
                        tx.get_vout().iter().cloned().enumerate().collect();
                    let bytes =
                        serialize(&new_outputs).map_err(ConflictableTransactionError::Abort)?;
                    tx_db.insert(tx.get_id(), bytes)?;
                }
                Ok(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(inner) => inner,
                TransactionError::Storage(e) => {
                    BlockchainError::Database(format!("UTXO update failed: {e}"))
                }
            })?;

        debug!("Applied block {} to UTXO set", block.get_hash_hex());
        Ok(())
    }
}

fn checked_total(total: u64, value: u64) -> Result<u64> {
    total.checked_add(value).ok_or_else(|| {
        BlockchainError::Transaction("Sum of unspent output values overflows".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::testnet::create_funded_chain;
    use crate::wallet::hash_pub_key;

    #[test]
    fn test_reindex_after_genesis() {
        let fixture = create_funded_chain().unwrap();
        assert_eq!(fixture.utxo_set.count_transactions().unwrap(), 1);

        let sender = fixture.wallets.get_wallet(&fixture.addresses[0]).unwrap();
        let pkh = hash_pub_key(sender.get_public_key());
        assert_eq!(fixture.utxo_set.get_balance(&pkh).unwrap(), 10);
    }

    #[test]
    fn test_update_matches_reindex() {
        let fixture = create_funded_chain().unwrap();
        let sender = fixture.wallets.get_wallet(&fixture.addresses[0]).unwrap();
        let tx =
            Transaction::new_utxo_transaction(sender, &fixture.addresses[1], 3, &fixture.utxo_set)
                .unwrap();
        let coinbase = Transaction::new_coinbase_tx(&fixture.addresses[0], "").unwrap();
        let block = fixture.blockchain.mine_block(&[tx, coinbase]).unwrap();

        fixture.utxo_set.update(&block).unwrap();
        let incremental = fixture.utxo_set.snapshot().unwrap();
        fixture.utxo_set.reindex().unwrap();
        assert_eq!(incremental, fixture.utxo_set.snapshot().unwrap());
    }

    #[test]
    fn test_partial_spend_keeps_original_indices() {
        let fixture = create_funded_chain().unwrap();
        let sender = fixture.wallets.get_wallet(&fixture.addresses[0]).unwrap();
        let tx =
            Transaction::new_utxo_transaction(sender, &fixture.addresses[1], 3, &fixture.utxo_set)
                .unwrap();
        let coinbase = Transaction::new_coinbase_tx(&fixture.addresses[2], "").unwrap();
        let block = fixture
            .blockchain
            .mine_block(&[tx.clone(), coinbase])
            .unwrap();
        fixture.utxo_set.update(&block).unwrap();

        // Spend the change output (index 1) and leave the payment behind.
        let recipient = fixture.wallets.get_wallet(&fixture.addresses[0]).unwrap();
        let second =
            Transaction::new_utxo_transaction(recipient, &fixture.addresses[2], 7, &fixture.utxo_set)
                .unwrap();
        assert_eq!(second.get_vin()[0].get_txid(), tx.get_id());
        assert_eq!(second.get_vin()[0].output_index(), Some(1));

        let coinbase = Transaction::new_coinbase_tx(&fixture.addresses[2], "").unwrap();
        let block = fixture.blockchain.mine_block(&[second, coinbase]).unwrap();
        fixture.utxo_set.update(&block).unwrap();

        assert!(fixture.utxo_set.is_unspent(tx.get_id(), 0).unwrap());
        assert!(!fixture.utxo_set.is_unspent(tx.get_id(), 1).unwrap());
        let incremental = fixture.utxo_set.snapshot().unwrap();
        fixture.utxo_set.reindex().unwrap();
        assert_eq!(incremental, fixture.utxo_set.snapshot().unwrap());
    }

    #[test]
    fn test_update_with_missing_entry_fails() {
        let fixture = create_funded_chain().unwrap();
        let sender = fixture.wallets.get_wallet(&fixture.addresses[0]).unwrap();
        let tx =
            Transaction::new_utxo_transaction(sender, &fixture.addresses[1], 3, &fixture.utxo_set)
                .unwrap();
        let coinbase = Transaction::new_coinbase_tx(&fixture.addresses[0], "").unwrap();
        let block = fixture.blockchain.mine_block(&[tx, coinbase]).unwrap();

        fixture.utxo_set.update(&block).unwrap();
        assert!(matches!(
            fixture.utxo_set.update(&block),
            Err(BlockchainError::Database(_))
        ));
    }

    #[test]
    fn test_find_spendable_outputs_stops_at_amount() {
        let fixture = create_funded_chain().unwrap();
        for _ in 0..3 {
            let coinbase = Transaction::new_coinbase_tx(&fixture.addresses[0], "").unwrap();
            let block = fixture.blockchain.mine_block(&[coinbase]).unwrap();
            fixture.utxo_set.update(&block).unwrap();
        }
        let sender = fixture.wallets.get_wallet(&fixture.addresses[0]).unwrap();
        let pkh = hash_pub_key(sender.get_public_key());

        let (accumulated, selected) = fixture.utxo_set.find_spendable_outputs(&pkh, 15).unwrap();
        assert_eq!(accumulated, 20);
        assert_eq!(selected.len(), 2);
        for (txid, idx) in &selected {
            assert!(fixture.utxo_set.is_unspent(txid, *idx).unwrap());
        }

        let (everything, all) = fixture.utxo_set.find_spendable_outputs(&pkh, 1000).unwrap();
        assert_eq!(everything, 40);
        assert_eq!(all.len(), 4);

        let stranger = hash_pub_key(&[0u8; 64]);
        let (none, empty) = fixture.utxo_set.find_spendable_outputs(&stranger, 5).unwrap();
        assert_eq!(none, 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_reindex_never_exposes_an_empty_index() {
        let fixture = create_funded_chain().unwrap();
        let sender = fixture.wallets.get_wallet(&fixture.addresses[0]).unwrap();
        let pkh = hash_pub_key(sender.get_public_key());

        let rebuilder = fixture.utxo_set.clone();
        let handle = std::thread::spawn(move || {
            for _ in 0..200 {
                rebuilder.reindex().unwrap();
            }
        });
        while !handle.is_finished() {
            assert_eq!(fixture.utxo_set.get_balance(&pkh).unwrap(), 10);
            assert_eq!(fixture.utxo_set.count_transactions().unwrap(), 1);
        }
        handle.join().unwrap();
        assert_eq!(fixture.utxo_set.get_balance(&pkh).unwrap(), 10);
    }

    #[test]
    fn test_reindex_drops_entries_missing_from_chain() {
        let fixture = create_funded_chain().unwrap();
        let tree = fixture.utxo_set.tree().unwrap();
        let orphan: IndexedOutputs = vec![(0, TXOutput::new(5, &fixture.addresses[1]).unwrap())];
        tree.insert(vec![0xAA; 32], serialize(&orphan).unwrap())
            .unwrap();
        assert_eq!(fixture.utxo_set.count_transactions().unwrap(), 2);

        fixture.utxo_set.reindex().unwrap();
        assert_eq!(fixture.utxo_set.count_transactions().unwrap(), 1);
        assert!(!fixture.utxo_set.is_unspent(&[0xAA; 32], 0).unwrap());
    }

    #[test]
    fn test_overflowing_values_are_an_error() {
        let fixture = create_funded_chain().unwrap();
        let sender = fixture.wallets.get_wallet(&fixture.addresses[0]).unwrap();
        let pkh = hash_pub_key(sender.get_public_key());
        let huge: IndexedOutputs = vec![(0, TXOutput::new(u64::MAX, &fixture.addresses[0]).unwrap())];
        fixture
            .utxo_set
            .tree()
            .unwrap()
            .insert(vec![0xFF; 32], serialize(&huge).unwrap())
            .unwrap();

        assert!(matches!(
            fixture.utxo_set.get_balance(&pkh),
            Err(BlockchainError::Transaction(_))
        ));
        assert!(matches!(
            fixture.utxo_set.find_spendable_outputs(&pkh, u64::MAX),
            Err(BlockchainError::Transaction(_))
        ));
    }
}
