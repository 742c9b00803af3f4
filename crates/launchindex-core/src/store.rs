//! Store traits: the single synchronization point of the indexer.
//!
//! Pipelines for different subscriptions run concurrently; they never share
//! state except through a `Store`, whose `apply` is transactional.

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::entity::{ConvictionNft, DeadLetter, Token, TokenConvictionMapping, TokenTransfer, TopToken};
use crate::error::IndexerError;
use crate::mutation::{ApplyReport, CommitBatch};
use crate::registry::Subscription;

/// Default row cap for list queries.
pub const DEFAULT_QUERY_LIMIT: u32 = 2000;

/// Default trailing window for "top tokens", in seconds.
pub const DEFAULT_TOP_WINDOW_SECS: i64 = 12 * 60 * 60;

/// Write side plus the lookups handlers need while ingesting.
///
/// Implementations include `InMemoryStore` and `SqliteStore`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Apply every mutation of `batch` and save its checkpoint in one
    /// transaction. On error nothing is committed.
    async fn apply(&self, batch: CommitBatch) -> Result<ApplyReport, IndexerError>;

    /// Load the checkpoint of a subscribed address.
    async fn checkpoint(&self, address: &str) -> Result<Option<Checkpoint>, IndexerError>;

    /// All persisted subscriptions (configured factories and discovered children).
    async fn subscriptions(&self) -> Result<Vec<Subscription>, IndexerError>;

    /// Persist a subscription outside of an event (seeding configured factories).
    async fn ensure_subscription(&self, sub: &Subscription) -> Result<bool, IndexerError>;

    /// Move a subscription's start block and drop its checkpoint.
    async fn repoint(&self, address: &str, start_block: u64) -> Result<(), IndexerError>;

    /// Resolve the token that owns a collectible contract.
    async fn conviction_mapping(
        &self,
        conviction_address: &str,
    ) -> Result<Option<TokenConvictionMapping>, IndexerError>;

    /// Whether a collectible instance has a row.
    async fn conviction_exists(&self, address: &str, id: &str) -> Result<bool, IndexerError>;
}

/// Read-only queries served from committed state.
#[async_trait]
pub trait TokenQueries: Send + Sync {
    async fn token(&self, address: &str) -> Result<Option<Token>, IndexerError>;

    /// Most recently created tokens, newest first.
    async fn latest_tokens(&self, limit: u32) -> Result<Vec<Token>, IndexerError>;

    /// Tokens ranked by transfer count since `since_timestamp`, highest first.
    async fn top_tokens_by_transfers(
        &self,
        since_timestamp: i64,
        limit: u32,
    ) -> Result<Vec<TopToken>, IndexerError>;

    /// Transfers of one token, newest first.
    async fn transfers_by_token(
        &self,
        token_address: &str,
        limit: u32,
    ) -> Result<Vec<TokenTransfer>, IndexerError>;

    async fn convictions_by_token(&self, token_address: &str) -> Result<Vec<ConvictionNft>, IndexerError>;

    async fn convictions_by_owner(&self, owner: &str) -> Result<Vec<ConvictionNft>, IndexerError>;

    async fn conviction(&self, address: &str, id: &str) -> Result<Option<ConvictionNft>, IndexerError>;

    async fn dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>, IndexerError>;

    /// Checkpoints of every subscription, for status reporting.
    async fn checkpoints(&self) -> Result<Vec<Checkpoint>, IndexerError>;
}
