//! Materialized entities.
//!
//! Amounts, prices and collectible ids are `uint256` on chain and are kept as
//! decimal strings. Addresses and hashes are lowercase `0x` hex.

use serde::{Deserialize, Serialize};

use crate::types::{EventPosition, MarketType, ProtocolVersion, TokenType};

/// One row per deployed asset contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub protocol_version: ProtocolVersion,
    pub token_type: TokenType,
    pub market_type: MarketType,
    pub pool_address: Option<String>,
    pub conviction_address: String,
    pub creator_address: String,
    pub creation_tx_hash: String,
    pub creation_block_number: u64,
    pub creation_block_timestamp: i64,
}

/// Append-only ledger entry for an ERC-20 `Transfer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub token_address: String,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub block_timestamp: i64,
    /// Unique within `tx_hash`; (`tx_hash`, `log_id`) is the primary key.
    pub log_id: String,
}

/// Links a collectible contract back to the token that spawned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConvictionMapping {
    pub token_address: String,
    pub conviction_address: String,
}

/// Snapshot read from the collectible contract when an instance is first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvictionMetadata {
    pub name: String,
    pub amount: String,
    pub price: String,
    pub timestamp: String,
    /// Only v1 collectibles expose an image.
    pub image_uri: Option<String>,
}

/// One row per collectible instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvictionNft {
    pub address: String,
    pub id: String,
    /// `None` when the mint was never observed (forward-reference fallback).
    pub minter: Option<String>,
    pub owner: String,
    pub token_address: String,
    /// `None` when the collectible contract refused the metadata read.
    pub metadata: Option<ConvictionMetadata>,
    /// Position of the event that last set `owner`; ownership only moves forward.
    pub owner_position: EventPosition,
}

/// A log the handlers could not make sense of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub address: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
    pub reason: String,
}

/// A token together with its transfer count over a trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopToken {
    #[serde(flatten)]
    pub token: Token,
    pub transfer_count: u64,
}
