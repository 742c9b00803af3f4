//! launchindex-evm: EVM source adapter, protocol handlers and the
//! per-subscription ingestion loop.

pub mod abi;
pub mod builder;
pub mod fetcher;
pub mod handlers;
pub mod http;
pub mod pipeline;
pub mod reader;
pub mod supervisor;

pub use builder::{handlers_for, IndexerBuilder};
pub use fetcher::{EvmFetcher, EvmRpcClient, RawLog};
pub use handlers::{V0Handler, V1Handler};
pub use http::{HttpRpcClient, TransportError};
pub use pipeline::{IndexerStats, PipelineConfig, StatsSnapshot, SubscriptionPipeline};
pub use reader::{ChainReader, TokenIdentity, VersionedMetadata};
pub use supervisor::{PipelineStatus, Supervisor, SupervisorCommand, SupervisorHandle};
