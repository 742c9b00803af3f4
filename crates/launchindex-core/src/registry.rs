//! Address registry: the set of contracts currently being ingested.
//!
//! Seeded with the configured factories, it grows whenever a factory event
//! reveals a child contract. Registration is idempotent because the discovery
//! event itself may be replayed (restart, reorg reprocessing).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{ContractKind, ProtocolVersion};

/// One subscribed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Contract address (lowercase).
    pub address: String,
    pub version: ProtocolVersion,
    pub kind: ContractKind,
    /// First block to ingest (inclusive).
    pub start_block: u64,
}

impl Subscription {
    pub fn new(
        address: impl Into<String>,
        version: ProtocolVersion,
        kind: ContractKind,
        start_block: u64,
    ) -> Self {
        Self {
            address: address.into().to_ascii_lowercase(),
            version,
            kind,
            start_block,
        }
    }
}

/// In-process view of the subscribed set.
///
/// The store holds the durable copy; the registry is rebuilt from it on start.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    entries: HashMap<String, Subscription>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Returns `false` (and changes nothing) if the
    /// address is already known.
    pub fn register(&mut self, sub: Subscription) -> bool {
        let key = sub.address.to_ascii_lowercase();
        if self.entries.contains_key(&key) {
            tracing::debug!(address = %key, "address already registered");
            return false;
        }
        tracing::info!(
            address = %key,
            version = %sub.version,
            kind = %sub.kind,
            start_block = sub.start_block,
            "registered subscription"
        );
        self.entries.insert(key, sub);
        true
    }

    pub fn get(&self, address: &str) -> Option<&Subscription> {
        self.entries.get(&address.to_ascii_lowercase())
    }

    /// Change where an address starts ingesting (used when re-pointing).
    pub fn set_start_block(&mut self, address: &str, start_block: u64) -> bool {
        match self.entries.get_mut(&address.to_ascii_lowercase()) {
            Some(sub) => {
                sub.start_block = start_block;
                true
            }
            None => false,
        }
    }

    /// All subscriptions, ordered by start block then address.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<_> = self.entries.values().cloned().collect();
        subs.sort_by(|a, b| {
            a.start_block
                .cmp(&b.start_block)
                .then_with(|| a.address.cmp(&b.address))
        });
        subs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
