//! Contract reads through Multicall3.
//!
//! Token names and symbols are fetched in one `aggregate3` round trip with
//! `allowFailure = true`, so a token without `name()` still gets indexed.
//! Collectible metadata is a single `convictionDetails(id)` call whose return
//! shape depends on the protocol version.

use alloy_core::sol_types::SolCall;
use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;

use launchindex_core::entity::ConvictionMetadata;
use launchindex_core::error::IndexerError;
use launchindex_core::reconcile::MetadataSource;
use launchindex_core::types::ProtocolVersion;

use crate::abi::{common, multicall, parse_address, v0, v1};
use crate::fetcher::EvmFetcher;

/// Name and symbol of a token; `None` where the call failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenIdentity {
    pub name: Option<String>,
    pub symbol: Option<String>,
}

/// Reads contract state at a given block.
pub struct ChainReader {
    fetcher: Arc<EvmFetcher>,
    multicall_address: String,
}

impl ChainReader {
    pub fn new(fetcher: Arc<EvmFetcher>, multicall_address: impl Into<String>) -> Self {
        Self {
            fetcher,
            multicall_address: multicall_address.into(),
        }
    }

    /// `name()` and `symbol()` of `token`, batched.
    pub async fn token_identity(&self, token: &str, block: u64) -> Result<TokenIdentity, IndexerError> {
        let target = parse_address(token).map_err(IndexerError::Other)?;
        let calls = vec![
            multicall::Call3 {
                target,
                allowFailure: true,
                callData: Bytes::from(common::nameCall {}.abi_encode()),
            },
            multicall::Call3 {
                target,
                allowFailure: true,
                callData: Bytes::from(common::symbolCall {}.abi_encode()),
            },
        ];
        let payload = multicall::aggregate3Call { calls }.abi_encode();
        let raw = self.fetcher.call(&self.multicall_address, &payload, block).await?;
        let results = multicall::aggregate3Call::abi_decode_returns(&raw, true)
            .map_err(|e| IndexerError::permanent(format!("aggregate3 returned garbage: {e}")))?
            .returnData;

        let identity = TokenIdentity {
            name: decode_result::<common::nameCall>(&results, 0).map(|r| r._0),
            symbol: decode_result::<common::symbolCall>(&results, 1).map(|r| r._0),
        };
        if identity.name.is_none() || identity.symbol.is_none() {
            tracing::warn!(token = %token, block, "name/symbol read failed");
        }
        Ok(identity)
    }

    /// `convictionDetails(id)` decoded per protocol version.
    pub async fn conviction_details(
        &self,
        version: ProtocolVersion,
        address: &str,
        id: &str,
        block: u64,
    ) -> Result<ConvictionMetadata, IndexerError> {
        let token_id = U256::from_str(id)
            .map_err(|e| IndexerError::Other(format!("collectible id {id:?}: {e}")))?;
        let bad_return = |e: alloy_core::sol_types::Error| {
            IndexerError::permanent(format!("convictionDetails({id}) on {address}: {e}"))
        };
        match version {
            ProtocolVersion::V0 => {
                let data = v0::convictionDetailsCall { tokenId: token_id }.abi_encode();
                let raw = self.fetcher.call(address, &data, block).await?;
                let r = v0::convictionDetailsCall::abi_decode_returns(&raw, true).map_err(bad_return)?;
                Ok(ConvictionMetadata {
                    name: r.name,
                    amount: r.amount.to_string(),
                    price: r.price.to_string(),
                    timestamp: r.timestamp.to_string(),
                    image_uri: None,
                })
            }
            ProtocolVersion::V1 => {
                let data = v1::convictionDetailsCall { tokenId: token_id }.abi_encode();
                let raw = self.fetcher.call(address, &data, block).await?;
                let r = v1::convictionDetailsCall::abi_decode_returns(&raw, true).map_err(bad_return)?;
                Ok(ConvictionMetadata {
                    name: r.name,
                    amount: r.amount.to_string(),
                    price: r.price.to_string(),
                    timestamp: r.timestamp.to_string(),
                    image_uri: Some(r.imageURI),
                })
            }
        }
    }
}

fn decode_result<C: SolCall>(results: &[multicall::Call3Result], index: usize) -> Option<C::Return> {
    let r = results.get(index)?;
    if !r.success {
        return None;
    }
    C::abi_decode_returns(&r.returnData, true).ok()
}

/// [`MetadataSource`] bound to one protocol version.
pub struct VersionedMetadata {
    reader: Arc<ChainReader>,
    version: ProtocolVersion,
}

impl VersionedMetadata {
    pub fn new(reader: Arc<ChainReader>, version: ProtocolVersion) -> Self {
        Self { reader, version }
    }
}

#[async_trait]
impl MetadataSource for VersionedMetadata {
    async fn conviction_metadata(
        &self,
        address: &str,
        id: &str,
        block: u64,
    ) -> Result<ConvictionMetadata, IndexerError> {
        self.reader
            .conviction_details(self.version, address, id, block)
            .await
    }
}
