//! Node protocol integration tests
//!
//! Handlers driven through `process_message` with a recording transport, and
//! one node served over real loopback TCP.

use minichain::core::{Blockchain, Transaction};
use minichain::network::{
    mine_round, process_message, MiningOutcome, NodeContext, OpType, Package, Server,
    TcpTransport, Transport, NODE_VERSION,
};
use minichain::storage::UTXOSet;
use minichain::wallet::Wallets;
use minichain::Result;
use std::io::{ErrorKind, Read};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

const TEST_TARGET_BITS: u32 = 8;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, Package)>>,
}

impl RecordingTransport {
    fn take(&self) -> Vec<(String, Package)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Transport for RecordingTransport {
    fn send(&self, addr: &str, frame: &[u8]) -> Result<()> {
        let package = Package::from_frame(frame)?;
        self.sent.lock().unwrap().push((addr.to_string(), package));
        Ok(())
    }
}

fn new_wallets(dir: &TempDir, count: usize) -> (Wallets, Vec<String>) {
    let mut wallets = Wallets::load(dir.path().join("wallet.dat")).unwrap();
    let addresses = (0..count).map(|_| wallets.create_wallet().unwrap()).collect();
    (wallets, addresses)
}

fn new_chain(dir: &TempDir, genesis_address: &str) -> Blockchain {
    Blockchain::create_blockchain_with_target_bits(
        genesis_address,
        dir.path().join("blocks"),
        TEST_TARGET_BITS,
    )
    .unwrap()
}

fn node(
    address: &str,
    miner: Option<String>,
    seeds: &[&str],
    blockchain: Blockchain,
    transport: Arc<dyn Transport>,
) -> Arc<NodeContext> {
    Arc::new(NodeContext::new(address, miner, seeds, blockchain, transport, 4))
}

#[test]
fn test_seed_answers_shorter_peer_with_version() {
    let dir = tempdir().unwrap();
    let (_wallets, addresses) = new_wallets(&dir, 1);
    let blockchain = new_chain(&dir, &addresses[0]);
    let coinbase = Transaction::new_coinbase_tx(&addresses[0], "").unwrap();
    blockchain.mine_block(&[coinbase]).unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let seed = node("localhost:3000", None, &["localhost:3000"], blockchain, transport.clone());

    process_message(
        &seed,
        Package::Version {
            addr_from: "localhost:3001".to_string(),
            version: NODE_VERSION,
            best_height: 0,
        },
    )
    .unwrap();

    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "localhost:3001");
    match &sent[0].1 {
        Package::Version { best_height, .. } => assert_eq!(*best_height, 1),
        other => panic!("expected version, got {other:?}"),
    }
    assert!(seed.known_nodes().node_is_known("localhost:3001"));
}

#[test]
fn test_two_pending_transactions_become_one_block() {
    let dir = tempdir().unwrap();
    let (wallets, addresses) = new_wallets(&dir, 3);
    let blockchain = new_chain(&dir, &addresses[0]);
    let coinbase = Transaction::new_coinbase_tx(&addresses[1], "").unwrap();
    blockchain.mine_block(&[coinbase]).unwrap();
    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    let first = Transaction::new_utxo_transaction(
        wallets.get_wallet(&addresses[0]).unwrap(),
        &addresses[2],
        5,
        &utxo_set,
    )
    .unwrap();
    let second = Transaction::new_utxo_transaction(
        wallets.get_wallet(&addresses[1]).unwrap(),
        &addresses[2],
        5,
        &utxo_set,
    )
    .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let miner = node(
        "localhost:3001",
        Some(addresses[2].clone()),
        &["localhost:3000"],
        blockchain.clone(),
        transport.clone(),
    );
    for tx in [&first, &second] {
        process_message(
            &miner,
            Package::Tx {
                addr_from: "localhost:3000".to_string(),
                transaction: tx.serialize().unwrap(),
            },
        )
        .unwrap();
    }
    assert_eq!(miner.mempool().len(), 2);

    let block = match mine_round(&miner).unwrap() {
        MiningOutcome::Mined(block) => block,
        other => panic!("expected a mined block, got {other:?}"),
    };
    assert_eq!(block.get_transactions().len(), 3);
    assert_eq!(
        block.get_transactions().iter().filter(|tx| tx.is_coinbase()).count(),
        1
    );
    assert!(miner.mempool().is_empty());
    assert_eq!(blockchain.get_best_height().unwrap(), Some(2));

    let sent = transport.take();
    assert!(sent.iter().any(|(addr, pkg)| addr == "localhost:3000"
        && matches!(pkg, Package::Inv { op_type: OpType::Block, .. })));
}

fn free_local_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

#[test]
fn test_version_exchange_over_tcp_survives_hostile_frame() {
    let dir = tempdir().unwrap();
    let (_wallets, addresses) = new_wallets(&dir, 1);
    let blockchain = new_chain(&dir, &addresses[0]);
    let coinbase = Transaction::new_coinbase_tx(&addresses[0], "").unwrap();
    blockchain.mine_block(&[coinbase]).unwrap();

    let seed_addr = free_local_address();
    let seed = node(
        &seed_addr,
        None,
        &[seed_addr.as_str()],
        blockchain,
        Arc::new(TcpTransport::new(Duration::from_secs(2))),
    );
    let server = Server::new(Arc::clone(&seed), Duration::from_secs(5));
    thread::spawn(move || server.run());

    let peer = TcpListener::bind("127.0.0.1:0").unwrap();
    peer.set_nonblocking(true).unwrap();
    let peer_addr = peer.local_addr().unwrap().to_string();
    let frame = Package::Version {
        addr_from: peer_addr.clone(),
        version: NODE_VERSION,
        best_height: 0,
    }
    .to_frame()
    .unwrap();

    // A block frame whose payload claims a 2^45 byte vector.
    let mut hostile = b"block\0\0\0\0\0\0\0".to_vec();
    hostile.extend_from_slice(&[1, b'x', 0xFD]);
    hostile.extend_from_slice(&(1u64 << 45).to_le_bytes());

    let client = TcpTransport::new(Duration::from_secs(2));
    let deadline = Instant::now() + Duration::from_secs(10);
    while client.send(&seed_addr, &hostile).is_err() {
        assert!(Instant::now() < deadline, "seed never started listening");
        thread::sleep(Duration::from_millis(20));
    }
    client.send(&seed_addr, &frame).unwrap();

    let mut stream = loop {
        match peer.accept() {
            Ok((stream, _)) => break stream,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                assert!(Instant::now() < deadline, "seed never replied");
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => panic!("accept failed: {e}"),
        }
    };
    stream.set_nonblocking(false).unwrap();
    let mut reply = vec![];
    stream.read_to_end(&mut reply).unwrap();

    match Package::from_frame(&reply).unwrap() {
        Package::Version {
            addr_from,
            best_height,
            ..
        } => {
            assert_eq!(addr_from, seed_addr);
            assert_eq!(best_height, 1);
        }
        other => panic!("expected version, got {other:?}"),
    }

    while !seed.known_nodes().node_is_known(&peer_addr) {
        assert!(Instant::now() < deadline, "peer was never registered");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_unreachable_peer_is_evicted_over_tcp() {
    let dir = tempdir().unwrap();
    let (_wallets, addresses) = new_wallets(&dir, 1);
    let blockchain = new_chain(&dir, &addresses[0]);
    let dead = free_local_address();

    let ctx = node(
        "127.0.0.1:1",
        None,
        &[dead.as_str()],
        blockchain,
        Arc::new(TcpTransport::new(Duration::from_millis(500))),
    );
    minichain::network::send_version(&ctx, &dead).unwrap();
    assert!(!ctx.known_nodes().node_is_known(&dead));
    assert!(ctx.known_nodes().is_empty());
}
