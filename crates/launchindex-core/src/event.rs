//! Raw chain events as handed to protocol handlers.

use serde::{Deserialize, Serialize};

use crate::types::EventPosition;

/// Transaction metadata that accompanies every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMeta {
    /// Transaction hash.
    pub hash: String,
    /// Sender of the transaction. Populated for factory subscriptions only,
    /// where it becomes the token's creator.
    pub from: Option<String>,
    /// Index of the transaction within its block.
    pub index: u32,
    pub block_number: u64,
    pub block_hash: String,
    /// Unix timestamp (seconds) of the containing block.
    pub block_timestamp: i64,
}

/// A log emitted by a subscribed contract, not yet decoded.
///
/// Decoding is left to the handler for the subscription's protocol version,
/// so schema drift never leaks into the source adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Emitting contract (lowercase).
    pub address: String,
    /// Topics, `topics[0]` being the event signature hash.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed data (`0x…`).
    pub data: String,
    pub position: EventPosition,
    pub tx: TxMeta,
}

impl ChainEvent {
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }

    pub fn log_index(&self) -> u32 {
        self.position.log_index
    }

    pub fn block_number(&self) -> u64 {
        self.position.block_number
    }

    /// Identifier of this log, unique within its transaction.
    pub fn log_id(&self) -> String {
        self.position.log_index.to_string()
    }
}
