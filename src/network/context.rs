use crate::core::Blockchain;
use crate::error::BlockchainError;
use crate::network::message::Package;
use crate::network::node::Nodes;
use crate::network::transport::Transport;
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};

/// State shared by every connection handler and the mining worker of one
/// node.
pub struct NodeContext {
    node_address: String,
    miner_address: Option<String>,
    known_nodes: Nodes,
    mempool: MemoryPool,
    blocks_in_transit: BlockInTransit,
    blockchain: Blockchain,
    utxo_set: UTXOSet,
    transport: Arc<dyn Transport>,
    mining_cancel: AtomicBool,
    mining_jobs: SyncSender<()>,
    mining_queue: Mutex<Option<Receiver<()>>>,
}

impl NodeContext {
    pub fn new<S: AsRef<str>>(
        node_address: &str,
        miner_address: Option<String>,
        seed_nodes: &[S],
        blockchain: Blockchain,
        transport: Arc<dyn Transport>,
        mining_queue_capacity: usize,
    ) -> NodeContext {
        let (mining_jobs, mining_queue) = sync_channel(mining_queue_capacity.max(1));
        let utxo_set = UTXOSet::new(blockchain.clone());
        NodeContext {
            node_address: node_address.to_string(),
            miner_address,
            known_nodes: Nodes::with_seeds(seed_nodes),
            mempool: MemoryPool::new(),
            blocks_in_transit: BlockInTransit::new(),
            blockchain,
            utxo_set,
            transport,
            mining_cancel: AtomicBool::new(false),
            mining_jobs,
            mining_queue: Mutex::new(Some(mining_queue)),
        }
    }

    pub fn node_address(&self) -> &str {
        self.node_address.as_str()
    }

    pub fn miner_address(&self) -> Option<&str> {
        self.miner_address.as_deref()
    }

    pub fn known_nodes(&self) -> &Nodes {
        &self.known_nodes
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    pub fn blocks_in_transit(&self) -> &BlockInTransit {
        &self.blocks_in_transit
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn utxo_set(&self) -> &UTXOSet {
        &self.utxo_set
    }

    /// The first known node relays transactions instead of mining them.
    pub fn is_hub(&self) -> bool {
        self.known_nodes
            .first()
            .is_some_and(|node| node.get_addr() == self.node_address)
    }

    /// Best height as advertised in `version`, `-1` for an empty chain.
    pub fn best_height(&self) -> crate::error::Result<i64> {
        Ok(self
            .blockchain
            .get_best_height()?
            .map_or(-1, |height| height as i64))
    }

    /// Encodes and delivers `package`. A peer that cannot be dialed is
    /// dropped from the known set; nothing is retried.
    pub fn send_package(&self, addr: &str, package: &Package) {
        let frame = match package.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode '{}' for {addr}: {e}", package.command());
                return;
            }
        };
        info!("Sending '{}' to {addr}", package.command());
        match self.transport.send(addr, &frame) {
            Ok(()) => {}
            Err(e @ BlockchainError::Unreachable(_)) => {
                warn!("{addr} is not available, evicting it: {e}");
                self.known_nodes.evict_node(addr);
                if self.known_nodes.is_empty() {
                    warn!("No known nodes left, waiting for peers to connect");
                }
            }
            Err(e) => warn!("Failed to deliver '{}' to {addr}: {e}", package.command()),
        }
    }

    /// Queues a mining job. A full queue already holds a pending job, so the
    /// request is dropped.
    pub fn request_mining(&self) {
        match self.mining_jobs.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                warn!("Mining worker is not running, dropping mining request");
            }
        }
    }

    pub fn cancel_mining(&self) {
        self.mining_cancel.store(true, Ordering::SeqCst);
    }

    pub fn mining_cancel_flag(&self) -> &AtomicBool {
        &self.mining_cancel
    }

    /// Takes the job queue for the mining worker. Only the first caller gets
    /// it.
    pub(crate) fn take_mining_queue(&self) -> Option<Receiver<()>> {
        self.mining_queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}
