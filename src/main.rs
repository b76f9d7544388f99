// Entry point for the minichain CLI
use clap::Parser;
use data_encoding::HEXLOWER;
use env_logger::Env;
use log::error;
use minichain::{
    address_to_pub_key_hash, convert_address, hash_pub_key, send_tx, validate_address, Block,
    Blockchain, BlockchainError, Command, Config, NodeContext, Opt, ProofOfWork, Result, Server,
    TcpTransport, Transaction, UTXOSet, Wallets,
};
use serde::Serialize;
use std::process;
use std::sync::Arc;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // Usage errors exit with 1; --help and --version are not errors.
    let opt = match Opt::try_parse() {
        Ok(opt) => opt,
        Err(e) => {
            let _ = e.print();
            process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    let config = match Config::load(opt.config.as_deref(), opt.node_id.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(&config, opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn check_address(address: &str) -> Result<()> {
    if !validate_address(address) {
        return Err(BlockchainError::InvalidAddress(address.to_string()));
    }
    Ok(())
}

/// Opens this node's chain and refuses to work on an empty one.
fn open_blockchain(config: &Config) -> Result<Blockchain> {
    let blockchain = Blockchain::new_blockchain_with_path(config.blocks_db_path())?;
    if blockchain.is_empty()? {
        return Err(BlockchainError::Database(
            "No existing blockchain found. Create one first.".to_string(),
        ));
    }
    Ok(blockchain)
}

fn run_command(config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Createblockchain { address } => {
            check_address(&address)?;
            let blockchain =
                Blockchain::create_blockchain_with_path(&address, config.blocks_db_path())?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(config.wallet_file())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            check_address(&address)?;
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let utxo_set = UTXOSet::new(open_blockchain(config)?);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(config.wallet_file())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            check_address(&from)?;
            check_address(&to)?;

            let wallets = Wallets::load(config.wallet_file())?;
            let wallet = wallets.get_wallet(&from).ok_or_else(|| {
                BlockchainError::Wallet(format!("No wallet for {from} in {}", wallets.path().display()))
            })?;

            let blockchain = open_blockchain(config)?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            if mine {
                // Mining locally pays the block reward back to the sender.
                let coinbase_tx = Transaction::new_coinbase_tx(&from, "")?;
                let block = blockchain.mine_block(&[transaction, coinbase_tx])?;
                utxo_set.update(&block)?;
            } else {
                let seed = config.seed_nodes.first().ok_or_else(|| {
                    BlockchainError::Config("No seed node configured".to_string())
                })?;
                let transport = TcpTransport::new(config.write_timeout());
                send_tx(&transport, &config.node_address(), seed, &transaction)?;
            }
            println!("Success!")
        }
        Command::Printchain { json } => {
            let blockchain = open_blockchain(config)?;
            let mut views = vec![];
            for block in blockchain.iterator()? {
                views.push(BlockView::new(&block?, blockchain.target_bits()));
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                for view in &views {
                    view.print();
                }
            }
        }
        Command::Reindexutxo => {
            let utxo_set = UTXOSet::new(open_blockchain(config)?);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { miner } => {
            if let Some(addr) = &miner {
                check_address(addr)?;
                println!("Mining is on. Address to receive rewards: {addr}");
            }
            // A node may start empty and sync its chain from the seed.
            let blockchain = Blockchain::new_blockchain_with_path(config.blocks_db_path())?;
            let ctx = NodeContext::new(
                &config.node_address(),
                miner,
                &config.seed_nodes,
                blockchain,
                Arc::new(TcpTransport::new(config.write_timeout())),
                config.mining_queue_capacity,
            );
            Server::new(Arc::new(ctx), config.read_timeout()).run()?
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct InputView {
    txid: String,
    vout: i64,
    from: String,
}

#[derive(Serialize)]
struct OutputView {
    value: u64,
    to: String,
}

#[derive(Serialize)]
struct TransactionView {
    txid: String,
    coinbase: bool,
    inputs: Vec<InputView>,
    outputs: Vec<OutputView>,
}

#[derive(Serialize)]
struct BlockView {
    height: usize,
    hash: String,
    prev_hash: String,
    timestamp: i64,
    nonce: i64,
    merkle_root: String,
    pow_valid: bool,
    transactions: Vec<TransactionView>,
}

impl BlockView {
    fn new(block: &Block, target_bits: u32) -> BlockView {
        let transactions = block
            .get_transactions()
            .iter()
            .map(|tx| TransactionView {
                txid: HEXLOWER.encode(tx.get_id()),
                coinbase: tx.is_coinbase(),
                inputs: if tx.is_coinbase() {
                    vec![]
                } else {
                    tx.get_vin()
                        .iter()
                        .map(|input| InputView {
                            txid: HEXLOWER.encode(input.get_txid()),
                            vout: input.get_vout(),
                            from: convert_address(&hash_pub_key(input.get_pub_key())),
                        })
                        .collect()
                },
                outputs: tx
                    .get_vout()
                    .iter()
                    .map(|output| OutputView {
                        value: output.get_value(),
                        to: convert_address(output.get_pub_key_hash()),
                    })
                    .collect(),
            })
            .collect();

        BlockView {
            height: block.get_height(),
            hash: block.get_hash_hex(),
            prev_hash: HEXLOWER.encode(block.get_pre_block_hash()),
            timestamp: block.get_timestamp(),
            nonce: block.get_nonce(),
            merkle_root: HEXLOWER.encode(&block.hash_transactions()),
            pow_valid: ProofOfWork::with_target_bits(block, target_bits).validate(),
            transactions,
        }
    }

    fn print(&self) {
        println!("============ Block {} ============", self.hash);
        println!("Height: {}", self.height);
        println!("Prev. block: {}", self.prev_hash);
        println!("Timestamp: {}", self.timestamp);
        println!("Merkle root: {}", self.merkle_root);
        println!("PoW: {}", self.pow_valid);
        for tx in &self.transactions {
            println!("- Transaction {}{}", tx.txid, if tx.coinbase { " (coinbase)" } else { "" });
            for input in &tx.inputs {
                println!(
                    "-- Input txid = {}, vout = {}, from = {}",
                    input.txid, input.vout, input.from
                )
            }
            for output in &tx.outputs {
                println!("-- Output value = {}, to = {}", output.value, output.to)
            }
        }
        println!()
    }
}
