//! Collectible ownership reconciliation.
//!
//! Collectible `Transfer` events can reach the store before the mint that
//! created the instance (separate pipelines, or a subscription that started
//! after the mint). Every transfer therefore resolves to a single write that
//! either moves `owner` on an existing row or inserts a degraded row with
//! `minter = None` and freshly read metadata.

use async_trait::async_trait;

use crate::entity::{ConvictionMetadata, ConvictionNft};
use crate::error::IndexerError;
use crate::mutation::Mutation;
use crate::store::Store;
use crate::types::{EventPosition, ZERO_ADDRESS};

/// Reads collectible metadata from the chain.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Metadata of instance `id` of collectible contract `address`, as of `block`.
    async fn conviction_metadata(
        &self,
        address: &str,
        id: &str,
        block: u64,
    ) -> Result<ConvictionMetadata, IndexerError>;
}

/// A decoded ERC-721 `Transfer` on a collectible contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectibleTransfer {
    pub address: String,
    pub id: String,
    pub from: String,
    pub to: String,
    pub position: EventPosition,
}

impl CollectibleTransfer {
    pub fn is_mint(&self) -> bool {
        self.from == ZERO_ADDRESS
    }
}

/// Turn a collectible transfer into the mutation that reconciles it.
///
/// `force_fallback` skips the existence hint and always carries a fallback
/// row; the pipeline sets it when a bare update lost its row to a concurrent
/// writer.
pub async fn reconcile_transfer(
    transfer: &CollectibleTransfer,
    store: &dyn Store,
    metadata: &dyn MetadataSource,
    force_fallback: bool,
) -> Result<Vec<Mutation>, IndexerError> {
    let Some(mapping) = store.conviction_mapping(&transfer.address).await? else {
        tracing::warn!(
            conviction = %transfer.address,
            id = %transfer.id,
            position = %transfer.position,
            "no token mapping for collectible contract, skipping transfer"
        );
        return Ok(vec![]);
    };

    let exists = store.conviction_exists(&transfer.address, &transfer.id).await?;

    if transfer.is_mint() {
        if exists {
            tracing::debug!(conviction = %transfer.address, id = %transfer.id, "mint already recorded");
            return Ok(vec![]);
        }
        let meta = read_metadata(transfer, metadata).await?;
        return Ok(vec![Mutation::MintConviction(ConvictionNft {
            address: transfer.address.clone(),
            id: transfer.id.clone(),
            minter: Some(transfer.to.clone()),
            owner: transfer.to.clone(),
            token_address: mapping.token_address,
            metadata: meta,
            owner_position: transfer.position,
        })]);
    }

    if exists && !force_fallback {
        return Ok(vec![Mutation::TransferConviction {
            address: transfer.address.clone(),
            id: transfer.id.clone(),
            to: transfer.to.clone(),
            position: transfer.position,
            fallback: None,
        }]);
    }

    let meta = read_metadata(transfer, metadata).await?;
    tracing::warn!(
        conviction = %transfer.address,
        id = %transfer.id,
        owner = %transfer.to,
        "transfer before mint, inserting collectible without minter"
    );
    Ok(vec![Mutation::TransferConviction {
        address: transfer.address.clone(),
        id: transfer.id.clone(),
        to: transfer.to.clone(),
        position: transfer.position,
        fallback: Some(ConvictionNft {
            address: transfer.address.clone(),
            id: transfer.id.clone(),
            minter: None,
            owner: transfer.to.clone(),
            token_address: mapping.token_address,
            metadata: meta,
            owner_position: transfer.position,
        }),
    }])
}

/// Metadata at the transfer's block. A read the contract rejects leaves the
/// metadata empty so the ownership fact is still recorded; transient
/// failures propagate.
async fn read_metadata(
    transfer: &CollectibleTransfer,
    metadata: &dyn MetadataSource,
) -> Result<Option<ConvictionMetadata>, IndexerError> {
    match metadata
        .conviction_metadata(&transfer.address, &transfer.id, transfer.position.block_number)
        .await
    {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.is_rejected() => {
            tracing::warn!(
                conviction = %transfer.address,
                id = %transfer.id,
                position = %transfer.position,
                error = %e,
                "metadata read rejected, storing collectible without metadata"
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
