//! Protocol version handlers.
//!
//! Token and collectible contracts behave the same in v0 and v1; only the
//! factory payload and the collectible metadata call differ. The shared
//! pieces live here.

pub mod v0;
pub mod v1;

use launchindex_core::entity::{Token, TokenConvictionMapping, TokenTransfer};
use launchindex_core::error::IndexerError;
use launchindex_core::event::ChainEvent;
use launchindex_core::mutation::Mutation;
use launchindex_core::reconcile::{reconcile_transfer, CollectibleTransfer, MetadataSource};
use launchindex_core::registry::Subscription;
use launchindex_core::store::Store;
use launchindex_core::types::{ContractKind, ProtocolVersion};

use crate::abi::{address_hex, common, decode_event, topic0};

pub use v0::V0Handler;
pub use v1::V1Handler;

fn is<E: alloy_core::sol_types::SolEvent>(event: &ChainEvent) -> bool {
    event.topic0().map(|t| t == topic0::<E>()).unwrap_or(false)
}

/// topic0 values of token contract events.
pub(crate) fn token_topics() -> Vec<String> {
    vec![
        topic0::<common::Transfer>(),
        topic0::<common::HigherrrrrrMarketGraduated>(),
    ]
}

/// topic0 values of collectible contract events.
pub(crate) fn collectible_topics() -> Vec<String> {
    vec![topic0::<common::collectible::Transfer>()]
}

/// Mutations for a token contract event: transfers and graduation.
pub(crate) fn token_event(event: &ChainEvent) -> Result<Vec<Mutation>, IndexerError> {
    if is::<common::Transfer>(event) {
        let t: common::Transfer = decode_event(event)?;
        return Ok(vec![Mutation::InsertTransfer(TokenTransfer {
            token_address: event.address.clone(),
            from: address_hex(&t.from),
            to: address_hex(&t.to),
            amount: t.value.to_string(),
            tx_hash: event.tx.hash.clone(),
            block_number: event.block_number(),
            block_timestamp: event.tx.block_timestamp,
            log_id: event.log_id(),
        })]);
    }
    if is::<common::HigherrrrrrMarketGraduated>(event) {
        let g: common::HigherrrrrrMarketGraduated = decode_event(event)?;
        let token = address_hex(&g.tokenAddress);
        if token != event.address {
            tracing::warn!(
                emitter = %event.address,
                token = %token,
                "graduation event names another token"
            );
        }
        tracing::info!(token = %token, pool = %address_hex(&g.poolAddress), "token graduated");
        return Ok(vec![Mutation::Graduate {
            token,
            pool: address_hex(&g.poolAddress),
        }]);
    }
    tracing::trace!(address = %event.address, topic0 = ?event.topic0(), "ignoring token event");
    Ok(vec![])
}

/// Mutations for a collectible contract event.
pub(crate) async fn collectible_event(
    event: &ChainEvent,
    store: &dyn Store,
    metadata: &dyn MetadataSource,
    force_fallback: bool,
) -> Result<Vec<Mutation>, IndexerError> {
    if !is::<common::collectible::Transfer>(event) {
        tracing::trace!(address = %event.address, topic0 = ?event.topic0(), "ignoring collectible event");
        return Ok(vec![]);
    }
    let t: common::collectible::Transfer = decode_event(event)?;
    let transfer = CollectibleTransfer {
        address: event.address.clone(),
        id: t.tokenId.to_string(),
        from: address_hex(&t.from),
        to: address_hex(&t.to),
        position: event.position,
    };
    reconcile_transfer(&transfer, store, metadata, force_fallback).await
}

/// Everything a factory discovery produces: the token row, its collectible
/// mapping and both child subscriptions.
pub(crate) fn discovery(token: Token, version: ProtocolVersion, child_start: u64) -> Vec<Mutation> {
    let token_sub = Subscription::new(&token.address, version, ContractKind::Token, child_start);
    let conviction_sub = Subscription::new(
        &token.conviction_address,
        version,
        ContractKind::Conviction,
        child_start,
    );
    tracing::info!(
        token = %token.address,
        conviction = %token.conviction_address,
        version = %version,
        start_block = child_start,
        "discovered token"
    );
    let mapping = TokenConvictionMapping {
        token_address: token.address.clone(),
        conviction_address: token.conviction_address.clone(),
    };
    vec![
        Mutation::InsertToken(token),
        Mutation::InsertConvictionMapping(mapping),
        Mutation::Register(token_sub),
        Mutation::Register(conviction_sub),
    ]
}

/// Start block of a child found at `discovered_at`, honouring the floor.
pub(crate) fn child_start(floor: Option<u64>, discovered_at: u64) -> u64 {
    discovered_at.max(floor.unwrap_or(0))
}

/// Creator of a token: the sender of the factory transaction.
pub(crate) fn creator(event: &ChainEvent, handler: &str) -> Result<String, IndexerError> {
    event.tx.from.clone().ok_or_else(|| IndexerError::Handler {
        handler: handler.to_string(),
        reason: format!("sender of {} unknown", event.tx.hash),
    })
}
