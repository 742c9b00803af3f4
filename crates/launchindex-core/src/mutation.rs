//! Store mutations: the uniform output of every protocol handler.
//!
//! Each variant documents its idempotence rule; every store backend must
//! honour these exactly so that replaying an event is always harmless.

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::entity::{ConvictionNft, DeadLetter, Token, TokenConvictionMapping, TokenTransfer};
use crate::registry::Subscription;
use crate::types::EventPosition;

/// A single write against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Insert; no-op if the address exists.
    InsertToken(Token),
    /// Insert; no-op if the collectible address (or the token) is already mapped.
    InsertConvictionMapping(TokenConvictionMapping),
    /// Persist a discovered subscription; no-op if the address is known.
    Register(Subscription),
    /// Insert keyed by (`tx_hash`, `log_id`); no-op on conflict.
    InsertTransfer(TokenTransfer),
    /// Move a token from the bonding curve to its pool. Applies only while
    /// the token is still on the bonding curve.
    Graduate { token: String, pool: String },
    /// Insert a collectible observed at its mint; no-op if the instance exists.
    MintConviction(ConvictionNft),
    /// Ownership change for a collectible instance.
    ///
    /// With a `fallback` row this is a single upsert: insert the degraded row
    /// if the instance is unknown, otherwise set `owner`. Without one it is a
    /// plain conditional update. Either way `owner` only moves when
    /// `position` is newer than the row's `owner_position`.
    TransferConviction {
        address: String,
        id: String,
        to: String,
        position: EventPosition,
        fallback: Option<ConvictionNft>,
    },
    /// Record a malformed event; no-op if already recorded.
    DeadLetter(DeadLetter),
}

impl Mutation {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsertToken(_) => "insert_token",
            Self::InsertConvictionMapping(_) => "insert_conviction_mapping",
            Self::Register(_) => "register",
            Self::InsertTransfer(_) => "insert_transfer",
            Self::Graduate { .. } => "graduate",
            Self::MintConviction(_) => "mint_conviction",
            Self::TransferConviction { .. } => "transfer_conviction",
            Self::DeadLetter(_) => "dead_letter",
        }
    }
}

/// Everything one source event produced, committed atomically together with
/// the checkpoint that moves past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitBatch {
    pub mutations: Vec<Mutation>,
    pub checkpoint: Checkpoint,
}

impl CommitBatch {
    pub fn new(mutations: Vec<Mutation>, checkpoint: Checkpoint) -> Self {
        Self {
            mutations,
            checkpoint,
        }
    }

    /// A batch that only advances the checkpoint.
    pub fn checkpoint_only(checkpoint: Checkpoint) -> Self {
        Self::new(vec![], checkpoint)
    }
}

/// What happened when a batch was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Mutations that changed state.
    pub applied: u32,
    /// Mutations that were idempotent no-ops.
    pub noops: u32,
    /// Degraded inserts for collectibles whose mint was never observed.
    pub forward_references: u32,
    /// Subscriptions that did not exist before this batch.
    pub registered: Vec<Subscription>,
}

impl ApplyReport {
    pub fn merge(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.noops += other.noops;
        self.forward_references += other.forward_references;
        self.registered.extend(other.registered);
    }
}
