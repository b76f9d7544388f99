use crate::core::{Block, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::context::NodeContext;
use crate::network::message::{OpType, Package, MAX_FRAME_LEN, NODE_VERSION};
use crate::network::miner::MiningWorker;
use crate::network::transport::Transport;
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use std::io::Read;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Accept loop of one node. Every connection carries one message and is
/// handled on its own thread.
pub struct Server {
    ctx: Arc<NodeContext>,
    read_timeout: Duration,
}

impl Server {
    pub fn new(ctx: Arc<NodeContext>, read_timeout: Duration) -> Server {
        Server { ctx, read_timeout }
    }

    pub fn run(&self) -> Result<()> {
        let addr = self.ctx.node_address();
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        info!("Server listening on {addr}");

        if self.ctx.miner_address().is_some() {
            MiningWorker::spawn(Arc::clone(&self.ctx))?;
        }

        if let Some(seed) = self.ctx.known_nodes().first() {
            if seed.get_addr() != addr {
                send_version(&self.ctx, seed.get_addr())?;
            }
        }

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let peer_addr = match stream.peer_addr() {
                        Ok(peer_addr) => peer_addr,
                        Err(e) => {
                            error!("Failed to get peer address: {e}");
                            continue;
                        }
                    };
                    let ctx = Arc::clone(&self.ctx);
                    let read_timeout = self.read_timeout;
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(&ctx, stream, peer_addr, read_timeout) {
                            error!("Error handling connection from {peer_addr}: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }
        Ok(())
    }
}

fn handle_connection(
    ctx: &NodeContext,
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    read_timeout: Duration,
) -> Result<()> {
    stream
        .set_read_timeout(Some(read_timeout))
        .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;

    let mut frame = vec![];
    (&mut stream)
        .take(MAX_FRAME_LEN as u64)
        .read_to_end(&mut frame)
        .map_err(|e| BlockchainError::Network(format!("Failed to read from {peer_addr}: {e}")))?;
    let _ = stream.shutdown(Shutdown::Both);

    let pkg = match Package::from_frame(&frame) {
        Ok(pkg) => pkg,
        Err(e) => {
            warn!("Dropping message from {peer_addr}: {e}");
            return Ok(());
        }
    };
    info!("Received '{}' from {peer_addr}", pkg.command());
    process_message(ctx, pkg)
}

/// Applies one decoded message to the node state.
pub fn process_message(ctx: &NodeContext, pkg: Package) -> Result<()> {
    match pkg {
        Package::Version {
            addr_from,
            version: _,
            best_height,
        } => handle_version(ctx, &addr_from, best_height),
        Package::GetBlocks { addr_from } => handle_get_blocks(ctx, &addr_from),
        Package::Inv {
            addr_from,
            op_type,
            items,
        } => {
            handle_inv(ctx, &addr_from, op_type, &items);
            Ok(())
        }
        Package::GetData {
            addr_from,
            op_type,
            id,
        } => handle_get_data(ctx, &addr_from, op_type, &id),
        Package::Block { addr_from, block } => handle_block(ctx, &addr_from, &block),
        Package::Tx {
            addr_from,
            transaction,
        } => handle_tx(ctx, &addr_from, &transaction),
        Package::Addr { addr_list } => {
            handle_addr(ctx, &addr_list);
            Ok(())
        }
    }
}

fn handle_version(ctx: &NodeContext, addr_from: &str, best_height: i64) -> Result<()> {
    let local_best_height = ctx.best_height()?;
    info!("Version from {addr_from}: remote height {best_height}, local height {local_best_height}");

    if local_best_height < best_height {
        send_get_blocks(ctx, addr_from);
    } else if local_best_height > best_height {
        send_version(ctx, addr_from)?;
    }

    if ctx.known_nodes().add_node(addr_from) {
        info!("Registered new peer {addr_from}");
    }
    Ok(())
}

fn handle_get_blocks(ctx: &NodeContext, addr_from: &str) -> Result<()> {
    let blocks = ctx.blockchain().get_block_hashes()?;
    send_inv(ctx, addr_from, OpType::Block, blocks);
    Ok(())
}

fn handle_inv(ctx: &NodeContext, addr_from: &str, op_type: OpType, items: &[Vec<u8>]) {
    info!("Inventory from {addr_from}: {} {op_type:?} items", items.len());
    let Some((first, rest)) = items.split_first() else {
        return;
    };
    match op_type {
        OpType::Block => {
            ctx.blocks_in_transit().replace(rest);
            send_get_data(ctx, addr_from, OpType::Block, first);
        }
        OpType::Tx => {
            if !ctx.mempool().contains(&HEXLOWER.encode(first)) {
                send_get_data(ctx, addr_from, OpType::Tx, first);
            }
        }
    }
}

fn handle_get_data(ctx: &NodeContext, addr_from: &str, op_type: OpType, id: &[u8]) -> Result<()> {
    match op_type {
        OpType::Block => match ctx.blockchain().get_block(id)? {
            Some(block) => send_block(ctx, addr_from, &block)?,
            None => info!("Requested block {} not found", HEXLOWER.encode(id)),
        },
        OpType::Tx => match ctx.mempool().get(&HEXLOWER.encode(id)) {
            Some(tx) => {
                let pkg = Package::Tx {
                    addr_from: ctx.node_address().to_string(),
                    transaction: tx.serialize()?,
                };
                ctx.send_package(addr_from, &pkg);
            }
            None => info!("Requested transaction {} not in mempool", HEXLOWER.encode(id)),
        },
    }
    Ok(())
}

fn handle_block(ctx: &NodeContext, addr_from: &str, block_data: &[u8]) -> Result<()> {
    let block = Block::deserialize(block_data)
        .map_err(|e| BlockchainError::ProtocolDecode(format!("Failed to decode block: {e}")))?;

    if !ctx.blockchain().validate_block(&block) {
        warn!(
            "Dropping block {} from {addr_from}: proof-of-work is invalid",
            block.get_hash_hex()
        );
        return Ok(());
    }

    ctx.cancel_mining();
    if ctx.blockchain().add_block(&block)? {
        info!(
            "Added block {} at height {} from {addr_from}",
            block.get_hash_hex(),
            block.get_height()
        );
    } else {
        info!("Stored block {} from {addr_from}", block.get_hash_hex());
    }

    match ctx.blocks_in_transit().pop_front() {
        Some(next) => send_get_data(ctx, addr_from, OpType::Block, &next),
        None => ctx.utxo_set().reindex()?,
    }
    Ok(())
}

fn handle_tx(ctx: &NodeContext, addr_from: &str, tx_data: &[u8]) -> Result<()> {
    let tx = Transaction::deserialize(tx_data).map_err(|e| {
        BlockchainError::ProtocolDecode(format!("Failed to decode transaction: {e}"))
    })?;
    let txid = tx.get_id().to_vec();
    if ctx.mempool().add(tx) {
        info!("Added transaction {} to mempool", HEXLOWER.encode(&txid));
    }

    if ctx.is_hub() {
        for node in ctx.known_nodes().get_nodes() {
            let addr = node.get_addr();
            if addr != ctx.node_address() && addr != addr_from {
                send_inv(ctx, addr, OpType::Tx, vec![txid.clone()]);
            }
        }
    } else if ctx.mempool().len() >= 2 && ctx.miner_address().is_some() {
        ctx.request_mining();
    }
    Ok(())
}

fn handle_addr(ctx: &NodeContext, addr_list: &[String]) {
    for addr in addr_list {
        ctx.known_nodes().add_node(addr);
    }
    info!("There are {} known nodes now", ctx.known_nodes().len());
    for node in ctx.known_nodes().get_nodes() {
        if node.get_addr() != ctx.node_address() {
            send_get_blocks(ctx, node.get_addr());
        }
    }
}

pub fn send_version(ctx: &NodeContext, addr: &str) -> Result<()> {
    let pkg = Package::Version {
        addr_from: ctx.node_address().to_string(),
        version: NODE_VERSION,
        best_height: ctx.best_height()?,
    };
    ctx.send_package(addr, &pkg);
    Ok(())
}

fn send_get_blocks(ctx: &NodeContext, addr: &str) {
    let pkg = Package::GetBlocks {
        addr_from: ctx.node_address().to_string(),
    };
    ctx.send_package(addr, &pkg);
}

fn send_get_data(ctx: &NodeContext, addr: &str, op_type: OpType, id: &[u8]) {
    let pkg = Package::GetData {
        addr_from: ctx.node_address().to_string(),
        op_type,
        id: id.to_vec(),
    };
    ctx.send_package(addr, &pkg);
}

fn send_inv(ctx: &NodeContext, addr: &str, op_type: OpType, items: Vec<Vec<u8>>) {
    let pkg = Package::Inv {
        addr_from: ctx.node_address().to_string(),
        op_type,
        items,
    };
    ctx.send_package(addr, &pkg);
}

fn send_block(ctx: &NodeContext, addr: &str, block: &Block) -> Result<()> {
    let pkg = Package::Block {
        addr_from: ctx.node_address().to_string(),
        block: block.serialize()?,
    };
    ctx.send_package(addr, &pkg);
    Ok(())
}

/// Sends `tx` to `addr` outside of a running node, as the CLI does for an
/// unmined `send`.
pub fn send_tx(transport: &dyn Transport, addr_from: &str, addr: &str, tx: &Transaction) -> Result<()> {
    let pkg = Package::Tx {
        addr_from: addr_from.to_string(),
        transaction: tx.serialize()?,
    };
    info!("Sending transaction {} to {addr}", HEXLOWER.encode(tx.get_id()));
    transport.send(addr, &pkg.to_frame()?)
}
