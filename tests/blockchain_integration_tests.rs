//! Ledger integration tests
//!
//! Balances, spend selection, and index maintenance exercised through the
//! public API on low-difficulty chains.

use minichain::core::{Blockchain, ProofOfWork, Transaction};
use minichain::storage::UTXOSet;
use minichain::wallet::{address_to_pub_key_hash, Wallets};
use minichain::BlockchainError;
use std::collections::HashSet;
use tempfile::{tempdir, TempDir};

const TEST_TARGET_BITS: u32 = 8;

struct Ledger {
    blockchain: Blockchain,
    utxo_set: UTXOSet,
    wallets: Wallets,
    addresses: Vec<String>,
    _dir: TempDir,
}

impl Ledger {
    /// Genesis pays `addresses[0]`.
    fn new(wallet_count: usize) -> Ledger {
        let dir = tempdir().unwrap();
        let mut wallets = Wallets::load(dir.path().join("wallet.dat")).unwrap();
        let addresses: Vec<String> = (0..wallet_count)
            .map(|_| wallets.create_wallet().unwrap())
            .collect();
        let blockchain = Blockchain::create_blockchain_with_target_bits(
            &addresses[0],
            dir.path().join("blocks"),
            TEST_TARGET_BITS,
        )
        .unwrap();
        let utxo_set = UTXOSet::new(blockchain.clone());
        utxo_set.reindex().unwrap();
        Ledger {
            blockchain,
            utxo_set,
            wallets,
            addresses,
            _dir: dir,
        }
    }

    fn balance(&self, idx: usize) -> u64 {
        let pkh = address_to_pub_key_hash(&self.addresses[idx]).unwrap();
        self.utxo_set.get_balance(&pkh).unwrap()
    }

    fn pay(&self, from: usize, to: usize, amount: u64) -> Transaction {
        let wallet = self.wallets.get_wallet(&self.addresses[from]).unwrap();
        Transaction::new_utxo_transaction(wallet, &self.addresses[to], amount, &self.utxo_set)
            .unwrap()
    }

    /// Mines `txs` plus a reward to `miner` and applies the block to the index.
    fn mine(&self, mut txs: Vec<Transaction>, miner: usize) {
        txs.push(Transaction::new_coinbase_tx(&self.addresses[miner], "").unwrap());
        let block = self.blockchain.mine_block(&txs).unwrap();
        self.utxo_set.update(&block).unwrap();
    }
}

#[test]
fn test_genesis_balance() {
    let ledger = Ledger::new(2);
    assert_eq!(ledger.balance(0), 10);
    assert_eq!(ledger.balance(1), 0);
}

#[test]
fn test_payment_with_separate_miner() {
    let ledger = Ledger::new(3);
    let tx = ledger.pay(0, 1, 4);
    assert!(ledger.blockchain.verify_transaction(&tx).unwrap());
    ledger.mine(vec![tx], 2);

    assert_eq!(ledger.balance(1), 4);
    assert_eq!(ledger.balance(0), 6);
    assert_eq!(ledger.balance(2), 10);
}

#[test]
fn test_update_equals_reindex_over_several_blocks() {
    let ledger = Ledger::new(3);
    ledger.mine(vec![ledger.pay(0, 1, 4)], 2);
    ledger.mine(vec![ledger.pay(1, 2, 3)], 0);
    ledger.mine(vec![ledger.pay(2, 0, 12)], 1);

    let incremental = ledger.utxo_set.snapshot().unwrap();
    ledger.utxo_set.reindex().unwrap();
    assert_eq!(incremental, ledger.utxo_set.snapshot().unwrap());

    let total: u64 = (0..3).map(|idx| ledger.balance(idx)).sum();
    assert_eq!(total, 40);
}

#[test]
fn test_spend_accumulation() {
    let ledger = Ledger::new(2);
    for _ in 0..4 {
        ledger.mine(vec![], 0);
    }
    let pkh = address_to_pub_key_hash(&ledger.addresses[0]).unwrap();

    for amount in [1, 10, 11, 35, 50] {
        let (accumulated, selected) = ledger.utxo_set.find_spendable_outputs(&pkh, amount).unwrap();
        assert!(accumulated >= amount, "amount {amount}");
        let unique: HashSet<_> = selected.iter().cloned().collect();
        assert_eq!(unique.len(), selected.len());
        assert_eq!(selected.len() as u64 * 10, accumulated);
    }

    let (accumulated, selected) = ledger.utxo_set.find_spendable_outputs(&pkh, 51).unwrap();
    assert_eq!(accumulated, 50);
    assert_eq!(selected.len(), 5);

    let first = ledger.utxo_set.find_spendable_outputs(&pkh, 25).unwrap();
    let second = ledger.utxo_set.find_spendable_outputs(&pkh, 25).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_insufficient_funds_reports_available() {
    let ledger = Ledger::new(2);
    let wallet = ledger.wallets.get_wallet(&ledger.addresses[0]).unwrap();
    let result =
        Transaction::new_utxo_transaction(wallet, &ledger.addresses[1], 25, &ledger.utxo_set);
    assert!(matches!(
        result,
        Err(BlockchainError::InsufficientFunds {
            required: 25,
            available: 10
        })
    ));
}

#[test]
fn test_chain_links_and_proof_of_work() {
    let ledger = Ledger::new(2);
    ledger.mine(vec![ledger.pay(0, 1, 2)], 1);
    ledger.mine(vec![], 0);

    let blocks: Vec<_> = ledger
        .blockchain
        .iterator()
        .unwrap()
        .map(|block| block.unwrap())
        .collect();
    assert_eq!(blocks.len(), 3);
    for pair in blocks.windows(2) {
        assert_eq!(pair[0].get_pre_block_hash(), pair[1].get_hash());
    }
    assert!(blocks[2].get_pre_block_hash().is_empty());
    for block in &blocks {
        assert!(ProofOfWork::with_target_bits(block, TEST_TARGET_BITS).validate());
        for tx in block.get_transactions() {
            assert!(ledger.blockchain.verify_transaction(tx).unwrap());
        }
    }
}
