//! Test fixtures
//!
//! Low-difficulty chains, throwaway wallets, and a recording transport so
//! node handlers can be exercised without sockets.

pub mod test_utils;

pub use test_utils::*;
