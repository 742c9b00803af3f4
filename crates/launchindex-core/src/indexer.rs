//! Indexer configuration and state types.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::retry::RetryConfig;
use crate::types::{normalize_address, ProtocolVersion};

/// Multicall3, deployed at the same address on every supported chain.
pub const DEFAULT_MULTICALL_ADDRESS: &str = "0xcA11bde05977b3631167028862bE2a173976CA11";

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "LAUNCHINDEX_";

/// One configured factory contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryConfig {
    pub version: ProtocolVersion,
    pub address: String,
    /// First block to scan for this factory. Must be non-zero.
    pub start_block: u64,
    /// Lowest start block for contracts this factory deploys. A child starts
    /// at `max(discovery block, child_start_block)`.
    #[serde(default)]
    pub child_start_block: Option<u64>,
}

impl FactoryConfig {
    /// Start block of a child discovered at `discovered_at`.
    pub fn child_start(&self, discovered_at: u64) -> u64 {
        discovered_at.max(self.child_start_block.unwrap_or(0))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Chain to index (e.g. `"base"`).
    pub chain: String,
    /// JSON-RPC endpoint.
    pub rpc_url: String,
    /// Store location (`sqlite://…` or `memory`).
    pub database_url: String,
    /// Number of blocks to wait before considering a block confirmed.
    pub confirmation_depth: u64,
    /// How many blocks to fetch per `eth_getLogs` call.
    pub batch_size: u64,
    /// Head polling interval in live mode (milliseconds).
    pub poll_interval_ms: u64,
    /// Backoff for RPC calls.
    pub retry: RetryConfig,
    /// Multicall3 contract used for batched reads.
    pub multicall_address: String,
    pub factories: Vec<FactoryConfig>,
    pub logging: LogConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain: "base".into(),
            rpc_url: String::new(),
            database_url: "sqlite://launchindex.db".into(),
            confirmation_depth: 12,
            batch_size: 1000,
            poll_interval_ms: 2000,
            retry: RetryConfig::default(),
            multicall_address: DEFAULT_MULTICALL_ADDRESS.into(),
            factories: vec![],
            logging: LogConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, IndexerError> {
        toml::from_str(s).map_err(|e| IndexerError::Config(format!("invalid config: {e}")))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Apply `LAUNCHINDEX_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), IndexerError> {
        let vars: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        self.apply_overrides(&vars)
    }

    /// Apply overrides from an explicit variable map (keys include the prefix).
    ///
    /// Recognized keys: `RPC_URL`, `DATABASE_URL`, `CONFIRMATION_DEPTH`, and
    /// per version `FACTORY_V{n}_ADDRESS`, `FACTORY_V{n}_START_BLOCK`,
    /// `CHILD_V{n}_START_BLOCK`.
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<(), IndexerError> {
        let get = |key: &str| vars.get(&format!("{ENV_PREFIX}{key}")).map(|v| v.trim().to_string());

        if let Some(v) = get("RPC_URL") {
            self.rpc_url = v;
        }
        if let Some(v) = get("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = get("CONFIRMATION_DEPTH") {
            self.confirmation_depth = parse_u64("CONFIRMATION_DEPTH", &v)?;
        }

        for version in [ProtocolVersion::V0, ProtocolVersion::V1] {
            let tag = version.as_str().to_ascii_uppercase();
            let address = get(&format!("FACTORY_{tag}_ADDRESS"));
            let start = get(&format!("FACTORY_{tag}_START_BLOCK"))
                .map(|v| parse_u64(&format!("FACTORY_{tag}_START_BLOCK"), &v))
                .transpose()?;
            let child_start = get(&format!("CHILD_{tag}_START_BLOCK"))
                .map(|v| parse_u64(&format!("CHILD_{tag}_START_BLOCK"), &v))
                .transpose()?;

            if address.is_none() && start.is_none() && child_start.is_none() {
                continue;
            }
            match self.factories.iter_mut().find(|f| f.version == version) {
                Some(f) => {
                    if let Some(a) = address {
                        f.address = a;
                    }
                    if let Some(s) = start {
                        f.start_block = s;
                    }
                    if child_start.is_some() {
                        f.child_start_block = child_start;
                    }
                }
                None => self.factories.push(FactoryConfig {
                    version,
                    address: address.unwrap_or_default(),
                    start_block: start.unwrap_or(0),
                    child_start_block: child_start,
                }),
            }
        }
        Ok(())
    }

    /// Check the configuration before anything touches the chain.
    ///
    /// Addresses are normalized to lowercase in place.
    pub fn validate(&mut self) -> Result<(), IndexerError> {
        if self.rpc_url.is_empty() {
            return Err(IndexerError::Config("rpc_url is required".into()));
        }
        if self.database_url.is_empty() {
            return Err(IndexerError::Config("database_url is required".into()));
        }
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch_size must be at least 1".into()));
        }
        if self.factories.is_empty() {
            return Err(IndexerError::Config("at least one factory must be configured".into()));
        }
        self.multicall_address = normalize_address(&self.multicall_address)
            .map_err(|_| IndexerError::Config(format!("invalid multicall_address {:?}", self.multicall_address)))?;

        let mut seen = Vec::with_capacity(self.factories.len());
        let mut versions = Vec::with_capacity(self.factories.len());
        for f in &mut self.factories {
            if versions.contains(&f.version) {
                return Err(IndexerError::Config(format!("more than one {} factory configured", f.version)));
            }
            versions.push(f.version);
            if f.address.is_empty() {
                return Err(IndexerError::Config(format!("factory {} has no address", f.version)));
            }
            f.address = normalize_address(&f.address).map_err(|_| {
                IndexerError::Config(format!("factory {} address {:?} is not an address", f.version, f.address))
            })?;
            if f.start_block == 0 {
                return Err(IndexerError::Config(format!(
                    "factory {} start_block must be set to its deployment block",
                    f.version
                )));
            }
            if seen.contains(&f.address) {
                return Err(IndexerError::Config(format!("factory {} configured twice", f.address)));
            }
            seen.push(f.address.clone());
        }
        Ok(())
    }

    pub fn factory(&self, version: ProtocolVersion) -> Option<&FactoryConfig> {
        self.factories.iter().find(|f| f.version == version)
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, IndexerError> {
    value
        .parse()
        .map_err(|_| IndexerError::Config(format!("{ENV_PREFIX}{key} must be a block number, got {value:?}")))
}

/// Runtime state of a subscription pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Syncing historical blocks up to the confirmed head.
    Backfilling,
    /// Following the confirmed head.
    Live,
    /// Suspended by an operator.
    Paused,
    /// Stopped on an unrecoverable error; other subscriptions keep running.
    Halted,
    /// Terminated.
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::Paused => write!(f, "paused"),
            Self::Halted => write!(f, "halted"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
