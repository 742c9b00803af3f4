//! v0 protocol: the factory event only names the two child contracts, so the
//! token's name and symbol are read from chain at the discovery block.

use async_trait::async_trait;
use std::sync::Arc;

use launchindex_core::entity::Token;
use launchindex_core::error::IndexerError;
use launchindex_core::event::ChainEvent;
use launchindex_core::handler::ProtocolHandler;
use launchindex_core::mutation::Mutation;
use launchindex_core::registry::Subscription;
use launchindex_core::store::Store;
use launchindex_core::types::{ContractKind, MarketType, ProtocolVersion, TokenType};

use super::{child_start, collectible_event, collectible_topics, creator, discovery, is, token_event, token_topics};
use crate::abi::{address_hex, decode_event, topic0, v0};
use crate::reader::{ChainReader, VersionedMetadata};

pub struct V0Handler {
    reader: Arc<ChainReader>,
    metadata: VersionedMetadata,
    child_start_block: Option<u64>,
}

impl V0Handler {
    pub fn new(reader: Arc<ChainReader>, child_start_block: Option<u64>) -> Self {
        Self {
            metadata: VersionedMetadata::new(reader.clone(), ProtocolVersion::V0),
            reader,
            child_start_block,
        }
    }

    async fn new_token(&self, event: &ChainEvent) -> Result<Vec<Mutation>, IndexerError> {
        let ev: v0::NewToken = decode_event(event)?;
        let address = address_hex(&ev.token);
        let identity = self.reader.token_identity(&address, event.block_number()).await?;
        let token = Token {
            address,
            name: identity.name,
            symbol: identity.symbol,
            protocol_version: ProtocolVersion::V0,
            // Every v0 token evolves its text.
            token_type: TokenType::TextEvolution,
            market_type: MarketType::BondingCurve,
            pool_address: None,
            conviction_address: address_hex(&ev.conviction),
            creator_address: creator(event, "v0")?,
            creation_tx_hash: event.tx.hash.clone(),
            creation_block_number: event.block_number(),
            creation_block_timestamp: event.tx.block_timestamp,
        };
        let start = child_start(self.child_start_block, event.block_number());
        Ok(discovery(token, ProtocolVersion::V0, start))
    }
}

#[async_trait]
impl ProtocolHandler for V0Handler {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V0
    }

    fn topics(&self, kind: ContractKind) -> Vec<String> {
        match kind {
            ContractKind::Factory => vec![topic0::<v0::NewToken>()],
            ContractKind::Token => token_topics(),
            ContractKind::Conviction => collectible_topics(),
        }
    }

    async fn handle(
        &self,
        event: &ChainEvent,
        sub: &Subscription,
        store: &dyn Store,
    ) -> Result<Vec<Mutation>, IndexerError> {
        match sub.kind {
            ContractKind::Factory if is::<v0::NewToken>(event) => self.new_token(event).await,
            ContractKind::Factory => Ok(vec![]),
            ContractKind::Token => token_event(event),
            ContractKind::Conviction => collectible_event(event, store, &self.metadata, false).await,
        }
    }

    async fn handle_stale(
        &self,
        event: &ChainEvent,
        sub: &Subscription,
        store: &dyn Store,
    ) -> Result<Vec<Mutation>, IndexerError> {
        match sub.kind {
            ContractKind::Conviction => collectible_event(event, store, &self.metadata, true).await,
            _ => self.handle(event, sub, store).await,
        }
    }
}
