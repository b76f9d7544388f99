//! Derived and in-memory state
//!
//! The UTXO index lives next to the blocks in sled; the memory pool and the
//! blocks-in-transit queue only exist for the lifetime of a node.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::{BlockInTransit, MemoryPool};
pub use utxo_set::UTXOSet;
