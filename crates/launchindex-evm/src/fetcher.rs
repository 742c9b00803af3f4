//! EVM block and log fetcher.
//!
//! Uses JSON-RPC `eth_getBlockByNumber` and `eth_getLogs` with range batching
//! to fetch events during both backfill and live phases, and turns raw logs
//! into ordered [`ChainEvent`]s with block timestamps and, for factories, the
//! transaction sender.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use launchindex_core::error::IndexerError;
use launchindex_core::event::{ChainEvent, TxMeta};
use launchindex_core::registry::Subscription;
use launchindex_core::retry::RetryPolicy;
use launchindex_core::types::{BlockSummary, ContractKind, EventFilter, EventPosition};

/// Block headers fetched in parallel while stamping a range of logs.
const BLOCK_FETCH_CONCURRENCY: usize = 8;

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(rename = "data")]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "transactionIndex", default)]
    pub tx_index: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "removed")]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns the block number as u64.
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    /// Returns the log index as u32.
    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }

    pub fn tx_index_u32(&self) -> u32 {
        self.tx_index.as_deref().map(parse_hex_u64).unwrap_or(0) as u32
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    fn sort_key(&self) -> (u64, u32, u32) {
        (self.block_number_u64(), self.tx_index_u32(), self.log_index_u32())
    }
}

/// Trait for fetching EVM data from a JSON-RPC provider.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    async fn get_block_number(&self) -> Result<u64, IndexerError>;
    async fn get_block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError>;
    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        filter: &EventFilter,
    ) -> Result<Vec<RawLog>, IndexerError>;
    /// `from` of a transaction, `None` if the node does not know it.
    async fn get_transaction_sender(&self, tx_hash: &str) -> Result<Option<String>, IndexerError>;
    /// `eth_call` against `to` at `block`; returns the raw return data.
    async fn call(&self, to: &str, data: &[u8], block: u64) -> Result<Vec<u8>, IndexerError>;
}

/// EVM fetcher that wraps an `EvmRpcClient` and adds batching and retries.
pub struct EvmFetcher {
    client: Arc<dyn EvmRpcClient>,
    retry: RetryPolicy,
}

impl EvmFetcher {
    pub fn new(client: Arc<dyn EvmRpcClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Fetch the current chain head block number.
    pub async fn head_block_number(&self) -> Result<u64, IndexerError> {
        self.retry.run("eth_blockNumber", || self.client.get_block_number()).await
    }

    /// Fetch a block summary by number.
    pub async fn block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError> {
        self.retry
            .run("eth_getBlockByNumber", || self.client.get_block(number))
            .await
    }

    /// Fetch all logs in `[from, to]` matching the filter.
    /// Splits into chunks of at most `max_range` blocks.
    pub async fn logs(
        &self,
        from: u64,
        to: u64,
        filter: &EventFilter,
        max_range: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        if to < from {
            return Ok(vec![]);
        }
        let max_range = max_range.max(1);
        let target = filter.addresses.join(",");
        let mut all_logs = Vec::new();
        let mut start = from;
        while start <= to {
            let end = (start + max_range - 1).min(to);
            let chunk = self
                .retry
                .run(&target, || self.client.get_logs(start, end, filter))
                .await?;
            all_logs.extend(chunk);
            start = end + 1;
        }
        Ok(all_logs)
    }

    /// `eth_call` with retries.
    pub async fn call(&self, to: &str, data: &[u8], block: u64) -> Result<Vec<u8>, IndexerError> {
        self.retry.run(to, || self.client.call(to, data, block)).await
    }

    async fn sender(&self, tx_hash: &str) -> Result<Option<String>, IndexerError> {
        self.retry
            .run(tx_hash, || self.client.get_transaction_sender(tx_hash))
            .await
    }

    /// Events emitted by `sub` in `[from, to]`, in chain order.
    ///
    /// Logs flagged `removed` are dropped. Every event carries its block
    /// timestamp; factory events also carry the transaction sender.
    pub async fn events(
        &self,
        sub: &Subscription,
        from: u64,
        to: u64,
        topics: &[String],
        max_range: u64,
    ) -> Result<Vec<ChainEvent>, IndexerError> {
        let mut filter = EventFilter::address(sub.address.clone());
        filter.topic0_values = topics.to_vec();

        let mut logs: Vec<RawLog> = self
            .logs(from, to, &filter, max_range)
            .await?
            .into_iter()
            .filter(|l| {
                if l.is_removed() {
                    tracing::debug!(tx = %l.tx_hash, "skipping removed log");
                    return false;
                }
                filter.matches_address(&l.address)
                    && l.topics.first().map(|t| filter.matches_topic0(t)).unwrap_or(false)
            })
            .collect();
        logs.sort_by_key(RawLog::sort_key);

        let mut numbers: Vec<u64> = logs.iter().map(RawLog::block_number_u64).collect();
        numbers.dedup();
        let timestamps: HashMap<u64, i64> = stream::iter(numbers)
            .map(|number| async move {
                let block = self.block(number).await?.ok_or_else(|| {
                    IndexerError::transient(format!("block {number} not available"))
                })?;
                Ok::<_, IndexerError>((number, block.timestamp))
            })
            .buffered(BLOCK_FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        let mut senders: HashMap<String, Option<String>> = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let number = log.block_number_u64();
            let timestamp = timestamps.get(&number).copied().unwrap_or_default();
            let from = if sub.kind == ContractKind::Factory {
                match senders.get(&log.tx_hash) {
                    Some(s) => s.clone(),
                    None => {
                        let s = self.sender(&log.tx_hash).await?.map(|a| a.to_ascii_lowercase());
                        senders.insert(log.tx_hash.clone(), s.clone());
                        s
                    }
                }
            } else {
                None
            };
            events.push(ChainEvent {
                address: log.address.to_ascii_lowercase(),
                topics: log.topics.iter().map(|t| t.to_ascii_lowercase()).collect(),
                position: EventPosition::new(number, log.log_index_u32()),
                tx: TxMeta {
                    hash: log.tx_hash.to_ascii_lowercase(),
                    from,
                    index: log.tx_index_u32(),
                    block_number: number,
                    block_hash: log.block_hash.to_ascii_lowercase(),
                    block_timestamp: timestamp,
                },
                data: log.data,
            });
        }
        Ok(events)
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

/// Convert a `Value` JSON block response to `BlockSummary`.
pub fn block_from_json(v: &Value) -> Option<BlockSummary> {
    Some(BlockSummary {
        number: parse_hex_u64(v["number"].as_str()?),
        hash: v["hash"].as_str()?.to_ascii_lowercase(),
        parent_hash: v["parentHash"].as_str()?.to_ascii_lowercase(),
        timestamp: parse_hex_u64(v["timestamp"].as_str()?) as i64,
    })
}
