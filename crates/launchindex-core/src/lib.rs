//! launchindex-core: data model and ingestion contracts for the LaunchIndex
//! token-launch indexer.
//!
//! # Architecture
//!
//! ```text
//! Supervisor (owns AddressRegistry)
//!     └── one pipeline per Subscription
//!             ├── Cursor           (start block, checkpoint, confirmation depth)
//!             ├── HandlerRegistry  (v0 / v1 ProtocolHandler)
//!             │       └── reconcile_transfer (collectible forward references)
//!             └── Store::apply     (mutations + checkpoint, one transaction)
//! ```
//!
//! Nothing in this crate talks to a node or a database; the EVM adapter and
//! the storage backends live in `launchindex-evm` and `launchindex-storage`.

pub mod checkpoint;
pub mod cursor;
pub mod entity;
pub mod error;
pub mod event;
pub mod handler;
pub mod indexer;
pub mod mutation;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod store;
pub mod types;

pub use checkpoint::Checkpoint;
pub use cursor::Cursor;
pub use entity::{
    ConvictionMetadata, ConvictionNft, DeadLetter, Token, TokenConvictionMapping, TokenTransfer, TopToken,
};
pub use error::IndexerError;
pub use event::{ChainEvent, TxMeta};
pub use handler::{HandlerRegistry, ProtocolHandler};
pub use indexer::{FactoryConfig, IndexerConfig, IndexerState, LogConfig};
pub use mutation::{ApplyReport, CommitBatch, Mutation};
pub use reconcile::{reconcile_transfer, CollectibleTransfer, MetadataSource};
pub use registry::{AddressRegistry, Subscription};
pub use retry::{RetryConfig, RetryPolicy};
pub use store::{Store, TokenQueries};
pub use types::{
    BlockSummary, ContractKind, EventFilter, EventPosition, IndexPhase, MarketType, ProtocolVersion, TokenType,
};
