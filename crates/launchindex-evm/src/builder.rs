//! Fluent builder API for wiring an indexer.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use launchindex_core::types::ProtocolVersion;
//! use launchindex_evm::{HttpRpcClient, IndexerBuilder};
//! use launchindex_storage::InMemoryStore;
//!
//! # async fn demo() -> Result<(), launchindex_core::IndexerError> {
//! let client = Arc::new(HttpRpcClient::default_for("https://mainnet.base.org")?);
//! let (supervisor, handle) = IndexerBuilder::new()
//!     .rpc_url("https://mainnet.base.org")
//!     .confirmation_depth(12)
//!     .factory(ProtocolVersion::V1, "0x00000000000000000000000000000000000000f1", 17_000_000)
//!     .build(client, Arc::new(InMemoryStore::new()))?;
//! tokio::spawn(supervisor.run());
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use launchindex_core::error::IndexerError;
use launchindex_core::handler::HandlerRegistry;
use launchindex_core::indexer::{FactoryConfig, IndexerConfig};
use launchindex_core::retry::{RetryConfig, RetryPolicy};
use launchindex_core::store::Store;
use launchindex_core::types::ProtocolVersion;

use crate::fetcher::{EvmFetcher, EvmRpcClient};
use crate::handlers::{V0Handler, V1Handler};
use crate::pipeline::PipelineConfig;
use crate::reader::ChainReader;
use crate::supervisor::{Supervisor, SupervisorHandle};

/// Fluent builder for [`IndexerConfig`] and the [`Supervisor`] it drives.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Start from an already loaded configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self { config }
    }

    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    /// Set confirmation depth (blocks behind head before processing).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Set the number of blocks per `eth_getLogs` batch.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set live mode polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn multicall_address(mut self, address: impl Into<String>) -> Self {
        self.config.multicall_address = address.into();
        self
    }

    /// Add a factory to watch.
    pub fn factory(mut self, version: ProtocolVersion, address: impl Into<String>, start_block: u64) -> Self {
        self.config.factories.push(FactoryConfig {
            version,
            address: address.into(),
            start_block,
            child_start_block: None,
        });
        self
    }

    /// Floor for the start block of children of the `version` factory.
    pub fn child_start_block(mut self, version: ProtocolVersion, block: u64) -> Self {
        if let Some(f) = self.config.factories.iter_mut().find(|f| f.version == version) {
            f.child_start_block = Some(block);
        }
        self
    }

    /// Validate and return the configuration.
    pub fn build_config(mut self) -> Result<IndexerConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Validate and wire fetcher, handlers and supervisor.
    pub fn build(
        self,
        client: Arc<dyn EvmRpcClient>,
        store: Arc<dyn Store>,
    ) -> Result<(Supervisor, SupervisorHandle), IndexerError> {
        let config = self.build_config()?;
        let fetcher = Arc::new(EvmFetcher::new(client, RetryPolicy::new(config.retry.clone())));
        let handlers = Arc::new(handlers_for(&config, fetcher.clone()));
        Ok(Supervisor::new(
            config.factories.clone(),
            PipelineConfig::from(&config),
            fetcher,
            handlers,
            store,
        ))
    }
}

/// Both protocol handlers, each honouring its factory's child start floor.
pub fn handlers_for(config: &IndexerConfig, fetcher: Arc<EvmFetcher>) -> HandlerRegistry {
    let reader = Arc::new(ChainReader::new(fetcher, config.multicall_address.clone()));
    let floor = |v| config.factory(v).and_then(|f| f.child_start_block);
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(V0Handler::new(reader.clone(), floor(ProtocolVersion::V0))));
    registry.register(Arc::new(V1Handler::new(reader, floor(ProtocolVersion::V1))));
    registry
}
