//! Command-line interface
//!
//! Argument definitions for the `minichain` binary.

pub mod commands;

pub use commands::{Command, Opt};
