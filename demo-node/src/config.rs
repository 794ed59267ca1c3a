//! `config.json` under the data directory, overridden by CLI flags
//! (spec.md §6 "Environment/config").
//!
//! Grounded on `labs/31-key-value-store`'s pattern of a small JSON config
//! file loaded next to the data it configures, generalized with `serde` and
//! merged against CLI overrides the way `labs/28-web-server-axum` layers
//! environment/config precedence.

use demo_node_types::constants;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The on-disk shape of `<datadir>/config.json`. Every field is optional so
/// a freshly created data directory can start from an empty `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub minter_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub nodes: Option<Vec<String>>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub target_bits: Option<u32>,
    #[serde(default)]
    pub min_tx: Option<usize>,
    #[serde(default)]
    pub bootstrap_url: Option<String>,
}

impl FileConfig {
    pub fn load(data_dir: &Path) -> std::io::Result<Self> {
        let path = data_dir.join("config.json");
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e),
        }
    }
}

/// Fully resolved configuration for one node process: `FileConfig` values
/// overridden by whatever CLI flags were actually supplied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub minter_address: Option<String>,
    pub host: String,
    pub port: u16,
    pub nodes: Vec<String>,
    pub auth_token: String,
    pub target_bits: u32,
    /// Overrides the miner's minimum-pending-transactions gate (§4.6 step
    /// 1); defaults to `MIN_TX_PER_BLOCK` when unset, the same as
    /// `MinerConfig::new`.
    pub min_tx: usize,
    /// A URL serving `{"nodes": [...], "genesis": "<hex>"}`, fetched once at
    /// startup when the local peer set is still empty. Generating that
    /// document is a collaborator's concern, not this node's.
    pub bootstrap_url: Option<String>,
}

impl ResolvedConfig {
    pub fn resolve(
        file: FileConfig,
        minter_override: Option<String>,
        port_override: Option<u16>,
    ) -> Self {
        ResolvedConfig {
            minter_address: minter_override.or(file.minter_address),
            host: file.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: port_override.or(file.port).unwrap_or(7000),
            nodes: file.nodes.unwrap_or_default(),
            auth_token: file.auth_token.unwrap_or_default(),
            target_bits: file.target_bits.unwrap_or(constants::DEFAULT_TARGET_BITS),
            min_tx: file.min_tx.unwrap_or(constants::MIN_TX_PER_BLOCK),
            bootstrap_url: file.bootstrap_url,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
