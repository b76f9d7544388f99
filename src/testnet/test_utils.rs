//! Test utilities for ledger and node testing

use crate::core::{Blockchain, PrevTransactions, TXOutput, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::{NodeContext, Package, Transport};
use crate::storage::UTXOSet;
use crate::wallet::{convert_address, Wallets};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Difficulty used by every test chain; a block takes a few hundred hashes.
pub const TEST_TARGET_BITS: u32 = 8;

pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))
}

/// Creates `count` wallets in a throwaway wallet file.
pub fn create_test_wallets(count: usize) -> Result<(Wallets, Vec<String>)> {
    let temp_dir = create_temp_dir()?;
    let mut wallets = Wallets::load(temp_dir.path().join("wallet.dat"))?;
    let mut addresses = Vec::new();
    for _ in 0..count {
        addresses.push(wallets.create_wallet()?);
    }
    Ok((wallets, addresses))
}

/// A fresh chain whose genesis pays a new wallet address.
pub fn create_test_blockchain() -> Result<(Blockchain, TempDir, String)> {
    let temp_dir = create_temp_dir()?;
    let (_wallets, addresses) = create_test_wallets(1)?;
    let blockchain = Blockchain::create_blockchain_with_target_bits(
        &addresses[0],
        temp_dir.path().join("blocks"),
        TEST_TARGET_BITS,
    )?;
    Ok((blockchain, temp_dir, addresses[0].clone()))
}

/// Chain, index, and three wallets; `addresses[0]` owns the genesis reward.
pub struct Fixture {
    pub blockchain: Blockchain,
    pub utxo_set: UTXOSet,
    pub wallets: Wallets,
    pub addresses: Vec<String>,
    _dir: TempDir,
}

pub fn create_funded_chain() -> Result<Fixture> {
    let dir = create_temp_dir()?;
    let (wallets, addresses) = create_test_wallets(3)?;
    let blockchain = Blockchain::create_blockchain_with_target_bits(
        &addresses[0],
        dir.path().join("blocks"),
        TEST_TARGET_BITS,
    )?;
    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex()?;
    Ok(Fixture {
        blockchain,
        utxo_set,
        wallets,
        addresses,
        _dir: dir,
    })
}

pub fn prev_transactions(blockchain: &Blockchain, tx: &Transaction) -> PrevTransactions {
    blockchain
        .find_prev_transactions(tx)
        .expect("previous transactions are on the test chain")
}

pub fn address_of(output: &TXOutput) -> String {
    convert_address(output.get_pub_key_hash())
}

/// Captures every outbound package instead of dialing. Addresses marked
/// unreachable fail like a refused connection; broken ones fail mid-write.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, Package)>>,
    unreachable: Mutex<HashSet<String>>,
    broken: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport::default())
    }

    pub fn mark_unreachable(&self, addr: &str) {
        self.unreachable.lock().unwrap().insert(addr.to_string());
    }

    pub fn mark_broken(&self, addr: &str) {
        self.broken.lock().unwrap().insert(addr.to_string());
    }

    pub fn take(&self) -> Vec<(String, Package)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Transport for RecordingTransport {
    fn send(&self, addr: &str, frame: &[u8]) -> Result<()> {
        if self.unreachable.lock().unwrap().contains(addr) {
            return Err(BlockchainError::Unreachable(format!("{addr} refused")));
        }
        if self.broken.lock().unwrap().contains(addr) {
            return Err(BlockchainError::Network(format!("{addr} reset the connection")));
        }
        let package = Package::from_frame(frame)?;
        self.sent.lock().unwrap().push((addr.to_string(), package));
        Ok(())
    }
}

/// Node state over `blockchain` with a recording transport.
pub fn create_test_node(
    blockchain: Blockchain,
    node_address: &str,
    miner_address: Option<String>,
    seeds: &[&str],
) -> (Arc<NodeContext>, Arc<RecordingTransport>) {
    let transport = RecordingTransport::new();
    let ctx = NodeContext::new(
        node_address,
        miner_address,
        seeds,
        blockchain,
        transport.clone(),
        4,
    );
    (Arc::new(ctx), transport)
}
