//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Classifies failures so the retrying fetcher knows what to retry:
//! transport errors, HTTP 429/5xx and node-side limits are transient;
//! reverts and malformed responses are not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use launchindex_core::error::IndexerError;
use launchindex_core::types::{BlockSummary, EventFilter};

use crate::fetcher::{block_from_json, EvmRpcClient, RawLog};

/// Errors at the transport / JSON-RPC layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl TransportError {
    /// Returns `true` if retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            // -32005: limit exceeded, -32603: internal error, -32000 is also
            // used for "header not found" right after a new head.
            Self::Rpc { code, message } => {
                matches!(code, -32005 | -32603)
                    || (*code == -32000 && !message.to_ascii_lowercase().contains("revert"))
            }
            Self::Deserialization(_) => false,
        }
    }
}

impl From<TransportError> for IndexerError {
    fn from(e: TransportError) -> Self {
        IndexerError::Rpc {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// HTTP JSON-RPC client for one endpoint.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Create with a 30 second request timeout.
    pub fn default_for(url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(url, Duration::from_secs(30))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Deserialization(e.to_string()))?;
        if let Some(err) = body.error {
            return Err(TransportError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

fn block_tag(number: u64) -> String {
    format!("0x{number:x}")
}

#[async_trait]
impl EvmRpcClient for HttpRpcClient {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        let v = self.request("eth_blockNumber", json!([])).await?;
        v.as_str()
            .map(crate::fetcher::parse_hex_u64)
            .ok_or_else(|| TransportError::Deserialization(format!("eth_blockNumber returned {v}")).into())
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockSummary>, IndexerError> {
        let v = self
            .request("eth_getBlockByNumber", json!([block_tag(number), false]))
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        block_from_json(&v)
            .map(Some)
            .ok_or_else(|| TransportError::Deserialization(format!("malformed block {number}")).into())
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        filter: &EventFilter,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let mut params = json!({
            "fromBlock": block_tag(from),
            "toBlock": block_tag(to),
        });
        if !filter.addresses.is_empty() {
            params["address"] = json!(filter.addresses);
        }
        if !filter.topic0_values.is_empty() {
            params["topics"] = json!([filter.topic0_values]);
        }
        let v = self.request("eth_getLogs", json!([params])).await?;
        serde_json::from_value(v).map_err(|e| TransportError::Deserialization(e.to_string()).into())
    }

    async fn get_transaction_sender(&self, tx_hash: &str) -> Result<Option<String>, IndexerError> {
        let v = self.request("eth_getTransactionByHash", json!([tx_hash])).await?;
        Ok(v["from"].as_str().map(str::to_ascii_lowercase))
    }

    async fn call(&self, to: &str, data: &[u8], block: u64) -> Result<Vec<u8>, IndexerError> {
        let v = self
            .request(
                "eth_call",
                json!([{ "to": to, "data": format!("0x{}", hex::encode(data)) }, block_tag(block)]),
            )
            .await?;
        let raw = v
            .as_str()
            .ok_or_else(|| TransportError::Deserialization(format!("eth_call returned {v}")))?;
        crate::abi::decode_hex(raw).map_err(|e| TransportError::Deserialization(e).into())
    }
}
