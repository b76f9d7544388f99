//! Configuration management
//!
//! Layered node settings: built-in defaults, an optional TOML file, the
//! `NODE_ID` environment variable, and command-line flags.

pub mod settings;

pub use settings::{Config, DEFAULT_CONFIG_FILE};
