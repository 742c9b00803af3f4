//! Checkpoints: the last durably applied position of each subscription.
//!
//! A checkpoint is written in the same store transaction as the mutations of
//! the event it covers, so on restart the pipeline resumes exactly after the
//! last committed event (or reprocesses it, which handlers tolerate).

use serde::{Deserialize, Serialize};

use crate::types::EventPosition;

/// A persisted checkpoint for one subscribed address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Subscribed contract address.
    pub address: String,
    /// Last block with applied events.
    pub block_number: u64,
    /// Hash of `block_number` when it was applied; empty when unknown.
    pub block_hash: String,
    /// Last applied log in `block_number`. `None` means the whole block is done.
    pub log_index: Option<u32>,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    /// Checkpoint just after a single applied event.
    pub fn at_event(address: impl Into<String>, position: EventPosition, block_hash: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            block_number: position.block_number,
            block_hash: block_hash.into(),
            log_index: Some(position.log_index),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Checkpoint marking every block up to and including `block_number` as done.
    pub fn through_block(address: impl Into<String>, block_number: u64, block_hash: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            block_number,
            block_hash: block_hash.into(),
            log_index: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Returns `true` if the event at `position` was already applied.
    pub fn covers(&self, position: EventPosition) -> bool {
        match self.log_index {
            Some(log_index) => position <= EventPosition::new(self.block_number, log_index),
            None => position.block_number <= self.block_number,
        }
    }

    /// First block that may still hold unapplied events.
    pub fn next_block(&self) -> u64 {
        match self.log_index {
            Some(_) => self.block_number,
            None => self.block_number + 1,
        }
    }
}
