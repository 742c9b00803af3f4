//! Protocol handler trait + registry.
//!
//! One handler per protocol version turns raw events from that version's
//! contracts into [`Mutation`]s. Handlers may read the chain (v0 needs a
//! multicall for token names) but never write anything themselves; the
//! pipeline commits what they return.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::IndexerError;
use crate::event::ChainEvent;
use crate::mutation::Mutation;
use crate::registry::Subscription;
use crate::store::Store;
use crate::types::{ContractKind, ProtocolVersion};

/// Trait implemented once per protocol version.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// The schema version this handler decodes.
    fn version(&self) -> ProtocolVersion;

    /// topic0 values worth fetching for a contract of `kind`.
    fn topics(&self, kind: ContractKind) -> Vec<String>;

    /// Turn one event into mutations.
    ///
    /// Returns an empty set for events the handler deliberately ignores and
    /// [`IndexerError::Decode`] for payloads it cannot parse.
    async fn handle(
        &self,
        event: &ChainEvent,
        sub: &Subscription,
        store: &dyn Store,
    ) -> Result<Vec<Mutation>, IndexerError>;

    /// Called when a conditional write found its precondition gone; handlers
    /// that emit optimistic writes rebuild them with a fallback row.
    async fn handle_stale(
        &self,
        event: &ChainEvent,
        sub: &Subscription,
        store: &dyn Store,
    ) -> Result<Vec<Mutation>, IndexerError> {
        self.handle(event, sub, store).await
    }
}

/// Registry of protocol handlers keyed by version.
pub struct HandlerRegistry {
    handlers: HashMap<ProtocolVersion, Arc<dyn ProtocolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler; replaces any previous handler for the same version.
    pub fn register(&mut self, handler: Arc<dyn ProtocolHandler>) {
        self.handlers.insert(handler.version(), handler);
    }

    pub fn get(&self, version: ProtocolVersion) -> Option<&Arc<dyn ProtocolHandler>> {
        self.handlers.get(&version)
    }

    pub fn versions(&self) -> Vec<ProtocolVersion> {
        let mut v: Vec<_> = self.handlers.keys().copied().collect();
        v.sort();
        v
    }

    fn resolve(&self, sub: &Subscription) -> Result<&Arc<dyn ProtocolHandler>, IndexerError> {
        self.handlers.get(&sub.version).ok_or_else(|| IndexerError::Handler {
            handler: sub.version.to_string(),
            reason: format!("no handler registered for {}", sub.version),
        })
    }

    /// Dispatch an event to the handler of its subscription's version.
    pub async fn dispatch(
        &self,
        event: &ChainEvent,
        sub: &Subscription,
        store: &dyn Store,
    ) -> Result<Vec<Mutation>, IndexerError> {
        self.resolve(sub)?.handle(event, sub, store).await
    }

    /// Re-dispatch after a [`IndexerError::StaleRead`].
    pub async fn dispatch_stale(
        &self,
        event: &ChainEvent,
        sub: &Subscription,
        store: &dyn Store,
    ) -> Result<Vec<Mutation>, IndexerError> {
        self.resolve(sub)?.handle_stale(event, sub, store).await
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
