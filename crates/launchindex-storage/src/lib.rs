//! launchindex-storage: pluggable storage backends for LaunchIndex.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

use std::cmp::Ordering;
use std::sync::Arc;

use launchindex_core::error::IndexerError;
use launchindex_core::store::{Store, TokenQueries};

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
mod testutil;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Order decimal ids (collectible ids, log ids) numerically without parsing:
/// shorter strings first, then lexicographic.
pub fn id_order(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Both faces of one backend: the ingest side and the query side.
#[derive(Clone)]
pub struct StoreHandle {
    pub store: Arc<dyn Store>,
    pub queries: Arc<dyn TokenQueries>,
}

impl StoreHandle {
    pub fn new<S: Store + TokenQueries + 'static>(backend: S) -> Self {
        let shared = Arc::new(backend);
        Self {
            store: shared.clone(),
            queries: shared,
        }
    }
}

/// Open the backend named by `database_url`: `memory` or a `sqlite:` URL.
pub async fn open(database_url: &str) -> Result<StoreHandle, IndexerError> {
    if database_url == "memory" {
        return Ok(StoreHandle::new(InMemoryStore::new()));
    }
    #[cfg(feature = "sqlite")]
    if database_url.starts_with("sqlite:") {
        return Ok(StoreHandle::new(SqliteStore::open(database_url).await?));
    }
    Err(IndexerError::Config(format!(
        "unsupported database_url {database_url:?} (expected \"memory\" or \"sqlite://…\")"
    )))
}
