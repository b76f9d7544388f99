use crate::error::{BlockchainError, Result};
use log::info;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "minichain.toml";
const NODE_ID_KEY: &str = "NODE_ID";

/// Node settings. Every field has a default, so a config file only needs
/// to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: String,
    pub data_dir: PathBuf,
    pub seed_nodes: Vec<String>,
    pub read_timeout_secs: u64,
    pub write_timeout_ms: u64,
    pub mining_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node_id: "3000".to_string(),
            data_dir: PathBuf::from("./data"),
            seed_nodes: vec!["localhost:3000".to_string()],
            read_timeout_secs: 60,
            write_timeout_ms: 5000,
            mining_queue_capacity: 4,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file, then `NODE_ID`, then `node_id_flag`.
    /// An explicit `config_path` must exist; `minichain.toml` in the working
    /// directory is only read when present.
    pub fn load(config_path: Option<&Path>, node_id_flag: Option<&str>) -> Result<Config> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };

        if let Ok(node_id) = env::var(NODE_ID_KEY) {
            if !node_id.is_empty() {
                config.node_id = node_id;
            }
        }
        if let Some(node_id) = node_id_flag {
            config.node_id = node_id.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Config> {
        Ok(toml::from_str(contents)?)
    }

    fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(BlockchainError::Config("node_id must not be empty".to_string()));
        }
        if self.seed_nodes.is_empty() {
            return Err(BlockchainError::Config(
                "at least one seed node is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn node_address(&self) -> String {
        format!("localhost:{}", self.node_id)
    }

    pub fn blocks_db_path(&self) -> PathBuf {
        self.data_dir.join(format!("blocks_{}", self.node_id))
    }

    pub fn wallet_file(&self) -> PathBuf {
        self.data_dir.join(format!("wallet_{}.dat", self.node_id))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
