use crate::core::Transaction;
use data_encoding::HEXLOWER;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Pending transactions, keyed by hex txid.
pub struct MemoryPool {
    inner: Mutex<BTreeMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    fn pool(&self) -> MutexGuard<'_, BTreeMap<String, Transaction>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, txid_hex: &str) -> Option<Transaction> {
        self.pool().get(txid_hex).cloned()
    }

    /// Adds `tx`, returning false if it was already pending.
    pub fn add(&self, tx: Transaction) -> bool {
        let key = HEXLOWER.encode(tx.get_id());
        let mut pool = self.pool();
        if pool.contains_key(&key) {
            return false;
        }
        pool.insert(key, tx);
        true
    }

    pub fn contains(&self, txid_hex: &str) -> bool {
        self.pool().contains_key(txid_hex)
    }

    /// Removes every listed transaction under one lock.
    pub fn remove_batch<'a>(&self, txids_hex: impl IntoIterator<Item = &'a str>) {
        let mut pool = self.pool();
        for txid in txids_hex {
            pool.remove(txid);
        }
    }

    pub fn len(&self) -> usize {
        self.pool().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool().is_empty()
    }

    /// Copy of the pending set, ordered by txid.
    pub fn get_all(&self) -> Vec<Transaction> {
        self.pool().values().cloned().collect()
    }
}

/// Block hashes announced by a peer and not yet fetched, in announcement
/// order.
pub struct BlockInTransit {
    inner: Mutex<VecDeque<Vec<u8>>>,
}

impl Default for BlockInTransit {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Vec<u8>>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drops whatever was queued and queues `blocks` instead.
    pub fn replace(&self, blocks: &[Vec<u8>]) {
        let mut queue = self.queue();
        queue.clear();
        queue.extend(blocks.iter().cloned());
    }

    pub fn pop_front(&self) -> Option<Vec<u8>> {
        self.queue().pop_front()
    }
}

#[cfg(test)]
impl BlockInTransit {
    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}
