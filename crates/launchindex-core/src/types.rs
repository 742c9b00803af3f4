//! Shared types for the indexing pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// The zero address; a collectible `Transfer` from it is a mint.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Returns `true` if `s` is a `0x`-prefixed, 20-byte hex address.
pub fn is_address(s: &str) -> bool {
    s.len() == 42
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Validate an address and return its canonical (lowercase) form.
pub fn normalize_address(s: &str) -> Result<String, IndexerError> {
    let trimmed = s.trim();
    if !is_address(trimmed) {
        return Err(IndexerError::Other(format!("invalid address: {s:?}")));
    }
    Ok(trimmed.to_ascii_lowercase())
}

// ─── BlockSummary ─────────────────────────────────────────────────────────────

/// A minimal summary of a block, enough to timestamp events and verify checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

// ─── EventPosition ────────────────────────────────────────────────────────────

/// Position of a log in the chain. Ordering is (block number, log index).
///
/// The log index is block-global on EVM chains, so this ordering agrees with
/// (block number, transaction index, log index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    pub block_number: u64,
    pub log_index: u32,
}

impl EventPosition {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

impl fmt::Display for EventPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

// ─── Protocol / contract classification ───────────────────────────────────────

/// Event schema generation emitted by a factory and its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V0,
    V1,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V0 => "v0",
            Self::V1 => "v1",
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v0" => Ok(Self::V0),
            "v1" => Ok(Self::V1),
            other => Err(IndexerError::Other(format!("unknown protocol version: {other}"))),
        }
    }
}

/// Role of a subscribed contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    /// Statically configured factory; emits `NewToken`.
    Factory,
    /// Asset contract discovered through the factory.
    Token,
    /// Collectible (ERC-721) contract paired with a token.
    Conviction,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Factory => "factory",
            Self::Token => "token",
            Self::Conviction => "conviction",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractKind {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "factory" => Ok(Self::Factory),
            "token" => Ok(Self::Token),
            "conviction" => Ok(Self::Conviction),
            other => Err(IndexerError::Other(format!("unknown contract kind: {other}"))),
        }
    }
}

/// Token flavour as reported by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    Regular,
    TextEvolution,
    ImageEvolution,
}

impl TokenType {
    /// Map the on-chain `uint8` discriminant. Unknown values fall back to `Regular`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::TextEvolution,
            2 => Self::ImageEvolution,
            _ => Self::Regular,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "REGULAR",
            Self::TextEvolution => "TEXT_EVOLUTION",
            Self::ImageEvolution => "IMAGE_EVOLUTION",
        }
    }
}

impl FromStr for TokenType {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGULAR" => Ok(Self::Regular),
            "TEXT_EVOLUTION" => Ok(Self::TextEvolution),
            "IMAGE_EVOLUTION" => Ok(Self::ImageEvolution),
            other => Err(IndexerError::Other(format!("unknown token type: {other}"))),
        }
    }
}

/// Trading venue. The derived order is the only legal transition direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketType {
    BondingCurve,
    UniswapPool,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BondingCurve => "BONDING_CURVE",
            Self::UniswapPool => "UNISWAP_POOL",
        }
    }
}

impl FromStr for MarketType {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BONDING_CURVE" => Ok(Self::BondingCurve),
            "UNISWAP_POOL" => Ok(Self::UniswapPool),
            other => Err(IndexerError::Other(format!("unknown market type: {other}"))),
        }
    }
}

// ─── EventFilter ─────────────────────────────────────────────────────────────

/// Filter for which logs to fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only fetch logs from these contract addresses (empty = all addresses).
    pub addresses: Vec<String>,
    /// Only fetch logs with one of these topic[0] values (empty = all events).
    pub topic0_values: Vec<String>,
}

impl EventFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add a topic0 filter (event signature hash).
    pub fn topic0(mut self, topic: impl Into<String>) -> Self {
        self.topic0_values.push(topic.into());
        self
    }

    /// Returns `true` if `address` matches this filter.
    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Returns `true` if `topic0` matches this filter.
    pub fn matches_topic0(&self, topic0: &str) -> bool {
        self.topic0_values.is_empty()
            || self.topic0_values.iter().any(|t| t.eq_ignore_ascii_case(topic0))
    }
}

/// The current phase of a subscription pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexPhase {
    /// Catching up to the confirmed head.
    Backfill,
    /// Following the confirmed head.
    Live,
}

// ─── Tests ────────────────────────────────────────────────────────────────────
