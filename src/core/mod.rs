//! Core ledger functionality
//!
//! Blocks, transactions, the merkle commitment, proof-of-work, and the
//! sled-backed chain that ties them together.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator, UtxoMap};
pub use merkle::MerkleTree;
pub use proof_of_work::{ProofOfWork, TARGET_BITS};
pub use transaction::{PrevTransactions, TXInput, TXOutput, Transaction, SUBSIDY};
