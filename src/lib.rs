//! # minichain
//!
//! A small proof-of-work ledger: UTXO transactions signed with ECDSA P-256,
//! blocks stored in sled, and a one-message-per-connection sync protocol.
//!
//! ## Layout
//! - `core/`: blocks, transactions, merkle root, proof-of-work, the chain
//! - `storage/`: UTXO index, memory pool, blocks in transit
//! - `network/`: wire frames, handlers, transport, mining worker
//! - `wallet/`: key pairs, Base58Check addresses, the wallet file
//! - `config/`: layered node settings
//! - `utils/`: hashing, signing, bincode helpers
//! - `cli/`: argument definitions for the binary
//!
//! A node's chain is append-only. Blocks received from peers are checked for
//! proof-of-work only; there is no fork resolution.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Block, Blockchain, BlockchainIterator, MerkleTree, PrevTransactions, ProofOfWork, TXInput,
    TXOutput, Transaction, SUBSIDY, TARGET_BITS,
};
pub use error::{BlockchainError, Result};
pub use network::{
    mine_round, process_message, send_tx, MiningOutcome, MiningWorker, Node, NodeContext, Nodes,
    OpType, Package, Server, TcpTransport, Transport,
};
pub use storage::{BlockInTransit, MemoryPool, UTXOSet};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
