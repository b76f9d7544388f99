//! Peer-to-peer synchronization
//!
//! One message per TCP connection, a shared [`NodeContext`] per node, and a
//! single mining worker fed through a bounded job queue.

pub mod context;
pub mod message;
pub mod miner;
pub mod node;
pub mod server;
pub mod transport;

pub use context::NodeContext;
pub use message::{OpType, Package, COMMAND_LENGTH, MAX_FRAME_LEN, NODE_VERSION};
pub use miner::{mine_round, MiningOutcome, MiningWorker};
pub use node::{Node, Nodes};
pub use server::{process_message, send_tx, send_version, Server};
pub use transport::{TcpTransport, Transport};
