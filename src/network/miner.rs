use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::context::NodeContext;
use crate::network::message::{OpType, Package};
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Result of one mining round.
#[derive(Debug)]
pub enum MiningOutcome {
    Mined(Block),
    /// No pending transaction could be admitted.
    Idle,
    /// A peer block arrived while mining.
    Cancelled,
    /// The tip moved before the block could be appended.
    Stale,
}

/// Single background worker that drains the mempool into blocks.
pub struct MiningWorker;

impl MiningWorker {
    pub fn spawn(ctx: Arc<NodeContext>) -> Result<JoinHandle<()>> {
        let jobs = ctx.take_mining_queue().ok_or_else(|| {
            BlockchainError::Config("Mining worker already started".to_string())
        })?;
        let miner = ctx
            .miner_address()
            .ok_or_else(|| BlockchainError::Config("No miner address configured".to_string()))?
            .to_string();
        info!("Mining worker started, rewards go to {miner}");

        thread::Builder::new()
            .name("miner".to_string())
            .spawn(move || {
                while jobs.recv().is_ok() {
                    ctx.mining_cancel_flag().store(false, Ordering::SeqCst);
                    run_job(&ctx);
                }
            })
            .map_err(|e| BlockchainError::Io(format!("Failed to spawn mining worker: {e}")))
    }
}

fn run_job(ctx: &NodeContext) {
    while !ctx.mempool().is_empty() {
        if ctx.mining_cancel_flag().load(Ordering::SeqCst) {
            info!("Mining job cancelled by a new block");
            return;
        }
        match mine_round(ctx) {
            Ok(MiningOutcome::Mined(_)) | Ok(MiningOutcome::Stale) => continue,
            Ok(MiningOutcome::Idle) => return,
            Ok(MiningOutcome::Cancelled) => {
                info!("Mining round cancelled by a new block");
                return;
            }
            Err(e) => {
                error!("Mining round failed: {e}");
                return;
            }
        }
    }
}

/// Picks the transactions a round may include. Failing or already-spent
/// transactions are returned for eviction; ones that conflict with an
/// earlier admitted transaction are left for a later round.
fn admit_transactions(ctx: &NodeContext) -> Result<(Vec<Transaction>, Vec<String>)> {
    let mut admitted = vec![];
    let mut evicted = vec![];
    let mut claimed: HashSet<(Vec<u8>, usize)> = HashSet::new();

    for tx in ctx.mempool().get_all() {
        let txid = HEXLOWER.encode(tx.get_id());
        if tx.is_coinbase() {
            warn!("Dropping coinbase transaction {txid} from mempool");
            evicted.push(txid);
            continue;
        }
        match ctx.blockchain().verify_transaction(&tx) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Dropping transaction {txid}: verification failed");
                evicted.push(txid);
                continue;
            }
            Err(e) => {
                error!("Dropping transaction {txid}: {e}");
                evicted.push(txid);
                continue;
            }
        }

        let mut inputs = Vec::with_capacity(tx.get_vin().len());
        let mut unspent = true;
        for vin in tx.get_vin() {
            match vin.output_index() {
                Some(idx) if ctx.utxo_set().is_unspent(vin.get_txid(), idx)? => {
                    inputs.push((vin.get_txid().to_vec(), idx));
                }
                _ => unspent = false,
            }
        }
        if !unspent {
            warn!("Dropping transaction {txid}: spends an output that is not unspent");
            evicted.push(txid);
            continue;
        }
        if inputs.iter().any(|input| claimed.contains(input)) {
            info!("Deferring transaction {txid}: conflicts with this round");
            continue;
        }
        claimed.extend(inputs);
        admitted.push(tx);
    }
    Ok((admitted, evicted))
}

/// Runs one mining round over the current mempool.
pub fn mine_round(ctx: &NodeContext) -> Result<MiningOutcome> {
    let miner = ctx
        .miner_address()
        .ok_or_else(|| BlockchainError::Config("No miner address configured".to_string()))?;

    let (mut txs, evicted) = admit_transactions(ctx)?;
    ctx.mempool().remove_batch(evicted.iter().map(String::as_str));
    if txs.is_empty() {
        info!("No admissible transactions, waiting for new ones");
        return Ok(MiningOutcome::Idle);
    }
    let mined_ids: Vec<String> = txs.iter().map(|tx| HEXLOWER.encode(tx.get_id())).collect();

    txs.push(Transaction::new_coinbase_tx(miner, "")?);

    let block = match ctx
        .blockchain()
        .mine_block_cancellable(&txs, ctx.mining_cancel_flag())
    {
        Ok(Some(block)) => block,
        Ok(None) => return Ok(MiningOutcome::Cancelled),
        Err(BlockchainError::InvalidBlock(msg)) => {
            warn!("Discarding stale block: {msg}");
            return Ok(MiningOutcome::Stale);
        }
        Err(e) => return Err(e),
    };

    ctx.utxo_set().reindex()?;
    ctx.mempool().remove_batch(mined_ids.iter().map(String::as_str));
    info!(
        "New block {} mined at height {} with {} transactions",
        block.get_hash_hex(),
        block.get_height(),
        block.get_transactions().len()
    );

    let inv = Package::Inv {
        addr_from: ctx.node_address().to_string(),
        op_type: OpType::Block,
        items: vec![block.get_hash().to_vec()],
    };
    for node in ctx.known_nodes().get_nodes() {
        if node.get_addr() != ctx.node_address() {
            ctx.send_package(node.get_addr(), &inv);
        }
    }
    Ok(MiningOutcome::Mined(block))
}
