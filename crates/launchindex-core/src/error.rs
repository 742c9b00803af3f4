//! Error types for the launchindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {message}")]
    Rpc { message: String, retryable: bool },

    #[error("Source unavailable for {target} after {attempts} attempts: {reason}")]
    SourceUnavailable {
        target: String,
        attempts: u32,
        reason: String,
    },

    #[error("Malformed event {tx_hash}#{log_index}: {reason}")]
    Decode {
        tx_hash: String,
        log_index: u32,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Stale read on {entity}: row vanished before the conditional write")]
    StaleRead { entity: String },

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Shorthand for a transient RPC failure (timeouts, rate limits, 5xx).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
            retryable: true,
        }
    }

    /// Shorthand for an RPC failure that retrying will not fix.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Rpc {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns `true` if the error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc { retryable: true, .. })
    }

    /// Returns `true` for payloads that should be dead-lettered and skipped.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// Returns `true` if the node answered definitively: a revert or a
    /// response that will never decode. Asking again gives the same answer.
    pub fn is_rejected(&self) -> bool {
        self.is_decode() || matches!(self, Self::Rpc { retryable: false, .. })
    }

    /// Returns `true` if the subscription that hit this error cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::Config(_) | Self::Storage(_) | Self::Aborted { .. }
        )
    }
}
