//! SQLite storage backend for LaunchIndex.
//!
//! Persists entities, subscriptions and checkpoints to a single SQLite file.
//! Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use launchindex_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("sqlite://launchindex.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::debug;

use launchindex_core::checkpoint::Checkpoint;
use launchindex_core::entity::{
    ConvictionMetadata, ConvictionNft, DeadLetter, Token, TokenConvictionMapping, TokenTransfer, TopToken,
};
use launchindex_core::error::IndexerError;
use launchindex_core::mutation::{ApplyReport, CommitBatch, Mutation};
use launchindex_core::registry::Subscription;
use launchindex_core::store::{Store, TokenQueries};
use launchindex_core::types::EventPosition;

fn db(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

fn parse<T: FromStr<Err = IndexerError>>(raw: &str) -> Result<T, IndexerError> {
    raw.parse()
        .map_err(|e: IndexerError| IndexerError::Storage(format!("corrupt row: {e}")))
}

const TOKEN_COLUMNS: &str = "address, name, symbol, protocol_version, token_type, market_type, pool_address,
     conviction_address, creator_address, creation_tx_hash, creation_block_number, creation_block_timestamp";

const NFT_COLUMNS: &str = "address, id, minter, owner, token_address, name, image_uri, amount, price,
     metadata_timestamp, owner_block, owner_log_index";

/// SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
    /// Serializes `apply` within the process; SQLite allows one writer anyway.
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database.
    ///
    /// `url` may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite://index.db"`).
    pub async fn open(url: &str) -> Result<Self, IndexerError> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite://{url}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(db)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(options)
            .await
            .map_err(db)?;

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        debug!(url = %url, "sqlite store ready");
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // Every connection to `:memory:` is a separate database, so pin one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(db)?;

        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db)?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS tokens (
                address                  TEXT    PRIMARY KEY,
                name                     TEXT,
                symbol                   TEXT,
                protocol_version         TEXT    NOT NULL,
                token_type               TEXT    NOT NULL,
                market_type              TEXT    NOT NULL,
                pool_address             TEXT,
                conviction_address       TEXT    NOT NULL,
                creator_address          TEXT    NOT NULL,
                creation_tx_hash         TEXT    NOT NULL,
                creation_block_number    INTEGER NOT NULL,
                creation_block_timestamp INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_tokens_block ON tokens (creation_block_number);",
            "CREATE TABLE IF NOT EXISTS token_transfers (
                tx_hash         TEXT    NOT NULL,
                log_id          TEXT    NOT NULL,
                token_address   TEXT    NOT NULL,
                from_address    TEXT    NOT NULL,
                to_address      TEXT    NOT NULL,
                amount          TEXT    NOT NULL,
                block_number    INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL,
                PRIMARY KEY (tx_hash, log_id)
            );",
            "CREATE INDEX IF NOT EXISTS idx_transfers_token_time
                ON token_transfers (token_address, block_timestamp);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_time ON token_transfers (block_timestamp);",
            "CREATE TABLE IF NOT EXISTS token_conviction_mappings (
                conviction_address TEXT PRIMARY KEY,
                token_address      TEXT NOT NULL UNIQUE
            );",
            "CREATE TABLE IF NOT EXISTS conviction_nfts (
                address            TEXT    NOT NULL,
                id                 TEXT    NOT NULL,
                minter             TEXT,
                owner              TEXT    NOT NULL,
                token_address      TEXT    NOT NULL,
                name               TEXT,
                image_uri          TEXT,
                amount             TEXT,
                price              TEXT,
                metadata_timestamp TEXT,
                owner_block        INTEGER NOT NULL,
                owner_log_index    INTEGER NOT NULL,
                PRIMARY KEY (address, id)
            );",
            "CREATE INDEX IF NOT EXISTS idx_nfts_owner ON conviction_nfts (owner);",
            "CREATE INDEX IF NOT EXISTS idx_nfts_token ON conviction_nfts (token_address);",
            "CREATE TABLE IF NOT EXISTS subscriptions (
                address     TEXT    PRIMARY KEY,
                version     TEXT    NOT NULL,
                kind        TEXT    NOT NULL,
                start_block INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS checkpoints (
                address      TEXT    PRIMARY KEY,
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                log_index    INTEGER,
                updated_at   INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS dead_letters (
                address      TEXT    NOT NULL,
                tx_hash      TEXT    NOT NULL,
                log_index    INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                reason       TEXT    NOT NULL,
                PRIMARY KEY (address, tx_hash, log_index)
            );",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(db)?;
        }
        Ok(())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn nft_exists(conn: &mut SqliteConnection, address: &str, id: &str) -> Result<bool, IndexerError> {
        let row = sqlx::query("SELECT 1 FROM conviction_nfts WHERE address = ? AND id = ?")
            .bind(address)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(db)?;
        Ok(row.is_some())
    }

    /// Apply one mutation; returns whether it changed state.
    async fn apply_mutation(
        conn: &mut SqliteConnection,
        mutation: Mutation,
        report: &mut ApplyReport,
    ) -> Result<bool, IndexerError> {
        let affected = match mutation {
            Mutation::InsertToken(t) => sqlx::query(&format!(
                "INSERT INTO tokens ({TOKEN_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(address) DO NOTHING"
            ))
            .bind(&t.address)
            .bind(&t.name)
            .bind(&t.symbol)
            .bind(t.protocol_version.as_str())
            .bind(t.token_type.as_str())
            .bind(t.market_type.as_str())
            .bind(&t.pool_address)
            .bind(&t.conviction_address)
            .bind(&t.creator_address)
            .bind(&t.creation_tx_hash)
            .bind(t.creation_block_number as i64)
            .bind(t.creation_block_timestamp)
            .execute(&mut *conn)
            .await
            .map_err(db)?
            .rows_affected(),

            Mutation::InsertConvictionMapping(m) => sqlx::query(
                "INSERT OR IGNORE INTO token_conviction_mappings (conviction_address, token_address)
                 VALUES (?, ?)",
            )
            .bind(&m.conviction_address)
            .bind(&m.token_address)
            .execute(&mut *conn)
            .await
            .map_err(db)?
            .rows_affected(),

            Mutation::Register(sub) => {
                let n = sqlx::query(
                    "INSERT OR IGNORE INTO subscriptions (address, version, kind, start_block)
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&sub.address)
                .bind(sub.version.as_str())
                .bind(sub.kind.as_str())
                .bind(sub.start_block as i64)
                .execute(&mut *conn)
                .await
                .map_err(db)?
                .rows_affected();
                if n > 0 {
                    report.registered.push(sub);
                }
                n
            }

            Mutation::InsertTransfer(t) => sqlx::query(
                "INSERT OR IGNORE INTO token_transfers
                 (tx_hash, log_id, token_address, from_address, to_address, amount, block_number, block_timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&t.tx_hash)
            .bind(&t.log_id)
            .bind(&t.token_address)
            .bind(&t.from)
            .bind(&t.to)
            .bind(&t.amount)
            .bind(t.block_number as i64)
            .bind(t.block_timestamp)
            .execute(&mut *conn)
            .await
            .map_err(db)?
            .rows_affected(),

            Mutation::Graduate { token, pool } => {
                let n = sqlx::query(
                    "UPDATE tokens SET market_type = 'UNISWAP_POOL', pool_address = ?
                     WHERE address = ? AND market_type = 'BONDING_CURVE'",
                )
                .bind(&pool)
                .bind(&token)
                .execute(&mut *conn)
                .await
                .map_err(db)?
                .rows_affected();
                if n == 0 {
                    let known = sqlx::query("SELECT 1 FROM tokens WHERE address = ?")
                        .bind(&token)
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(db)?;
                    if known.is_none() {
                        tracing::warn!(token = %token, "graduation for unknown token");
                    }
                }
                n
            }

            Mutation::MintConviction(nft) => sqlx::query(&format!(
                "INSERT OR IGNORE INTO conviction_nfts ({NFT_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&nft.address)
            .bind(&nft.id)
            .bind(&nft.minter)
            .bind(&nft.owner)
            .bind(&nft.token_address)
            .bind(nft.metadata.as_ref().map(|m| m.name.clone()))
            .bind(nft.metadata.as_ref().and_then(|m| m.image_uri.clone()))
            .bind(nft.metadata.as_ref().map(|m| m.amount.clone()))
            .bind(nft.metadata.as_ref().map(|m| m.price.clone()))
            .bind(nft.metadata.as_ref().map(|m| m.timestamp.clone()))
            .bind(nft.owner_position.block_number as i64)
            .bind(nft.owner_position.log_index as i64)
            .execute(&mut *conn)
            .await
            .map_err(db)?
            .rows_affected(),

            Mutation::TransferConviction {
                address,
                id,
                to,
                position,
                fallback: None,
            } => {
                let n = sqlx::query(
                    "UPDATE conviction_nfts SET owner = ?, owner_block = ?, owner_log_index = ?
                     WHERE address = ? AND id = ?
                       AND (owner_block < ? OR (owner_block = ? AND owner_log_index < ?))",
                )
                .bind(&to)
                .bind(position.block_number as i64)
                .bind(position.log_index as i64)
                .bind(&address)
                .bind(&id)
                .bind(position.block_number as i64)
                .bind(position.block_number as i64)
                .bind(position.log_index as i64)
                .execute(&mut *conn)
                .await
                .map_err(db)?
                .rows_affected();
                if n == 0 && !Self::nft_exists(conn, &address, &id).await? {
                    return Err(IndexerError::StaleRead {
                        entity: format!("conviction {address}#{id}"),
                    });
                }
                n
            }

            Mutation::TransferConviction {
                address,
                id,
                fallback: Some(nft),
                ..
            } => {
                let existed = Self::nft_exists(conn, &address, &id).await?;
                let n = sqlx::query(&format!(
                    "INSERT INTO conviction_nfts ({NFT_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(address, id) DO UPDATE SET
                        owner = excluded.owner,
                        owner_block = excluded.owner_block,
                        owner_log_index = excluded.owner_log_index
                     WHERE excluded.owner_block > conviction_nfts.owner_block
                        OR (excluded.owner_block = conviction_nfts.owner_block
                            AND excluded.owner_log_index > conviction_nfts.owner_log_index)"
                ))
                .bind(&nft.address)
                .bind(&nft.id)
                .bind(&nft.minter)
                .bind(&nft.owner)
                .bind(&nft.token_address)
                .bind(nft.metadata.as_ref().map(|m| m.name.clone()))
                .bind(nft.metadata.as_ref().and_then(|m| m.image_uri.clone()))
                .bind(nft.metadata.as_ref().map(|m| m.amount.clone()))
                .bind(nft.metadata.as_ref().map(|m| m.price.clone()))
                .bind(nft.metadata.as_ref().map(|m| m.timestamp.clone()))
                .bind(nft.owner_position.block_number as i64)
                .bind(nft.owner_position.log_index as i64)
                .execute(&mut *conn)
                .await
                .map_err(db)?
                .rows_affected();
                if n > 0 && !existed {
                    report.forward_references += 1;
                }
                n
            }

            Mutation::DeadLetter(dl) => sqlx::query(
                "INSERT OR IGNORE INTO dead_letters (address, tx_hash, log_index, block_number, reason)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&dl.address)
            .bind(&dl.tx_hash)
            .bind(dl.log_index as i64)
            .bind(dl.block_number as i64)
            .bind(&dl.reason)
            .execute(&mut *conn)
            .await
            .map_err(db)?
            .rows_affected(),
        };
        Ok(affected > 0)
    }

    async fn save_checkpoint(conn: &mut SqliteConnection, cp: &Checkpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO checkpoints (address, block_number, block_hash, log_index, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET
                block_number = excluded.block_number,
                block_hash = excluded.block_hash,
                log_index = excluded.log_index,
                updated_at = excluded.updated_at",
        )
        .bind(&cp.address)
        .bind(cp.block_number as i64)
        .bind(&cp.block_hash)
        .bind(cp.log_index.map(i64::from))
        .bind(cp.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(db)?;
        Ok(())
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn token_from_row(r: &SqliteRow) -> Result<Token, IndexerError> {
    Ok(Token {
        address: r.get("address"),
        name: r.get("name"),
        symbol: r.get("symbol"),
        protocol_version: parse(r.get::<&str, _>("protocol_version"))?,
        token_type: parse(r.get::<&str, _>("token_type"))?,
        market_type: parse(r.get::<&str, _>("market_type"))?,
        pool_address: r.get("pool_address"),
        conviction_address: r.get("conviction_address"),
        creator_address: r.get("creator_address"),
        creation_tx_hash: r.get("creation_tx_hash"),
        creation_block_number: r.get::<i64, _>("creation_block_number") as u64,
        creation_block_timestamp: r.get("creation_block_timestamp"),
    })
}

fn nft_from_row(r: &SqliteRow) -> ConvictionNft {
    ConvictionNft {
        address: r.get("address"),
        id: r.get("id"),
        minter: r.get("minter"),
        owner: r.get("owner"),
        token_address: r.get("token_address"),
        metadata: r.get::<Option<String>, _>("name").map(|name| ConvictionMetadata {
            name,
            amount: r.get::<Option<String>, _>("amount").unwrap_or_default(),
            price: r.get::<Option<String>, _>("price").unwrap_or_default(),
            timestamp: r.get::<Option<String>, _>("metadata_timestamp").unwrap_or_default(),
            image_uri: r.get("image_uri"),
        }),
        owner_position: EventPosition::new(
            r.get::<i64, _>("owner_block") as u64,
            r.get::<i64, _>("owner_log_index") as u32,
        ),
    }
}

fn checkpoint_from_row(r: &SqliteRow) -> Checkpoint {
    Checkpoint {
        address: r.get("address"),
        block_number: r.get::<i64, _>("block_number") as u64,
        block_hash: r.get("block_hash"),
        log_index: r.get::<Option<i64>, _>("log_index").map(|i| i as u32),
        updated_at: r.get("updated_at"),
    }
}

fn subscription_from_row(r: &SqliteRow) -> Result<Subscription, IndexerError> {
    Ok(Subscription {
        address: r.get("address"),
        version: parse(r.get::<&str, _>("version"))?,
        kind: parse(r.get::<&str, _>("kind"))?,
        start_block: r.get::<i64, _>("start_block") as u64,
    })
}

// ─── Store impl ──────────────────────────────────────────────────────────────

#[async_trait]
impl Store for SqliteStore {
    async fn apply(&self, batch: CommitBatch) -> Result<ApplyReport, IndexerError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut report = ApplyReport::default();
        for mutation in batch.mutations {
            // Dropping `tx` on error rolls everything back.
            if Self::apply_mutation(&mut tx, mutation, &mut report).await? {
                report.applied += 1;
            } else {
                report.noops += 1;
            }
        }
        Self::save_checkpoint(&mut tx, &batch.checkpoint).await?;
        tx.commit().await.map_err(db)?;

        debug!(
            address = %batch.checkpoint.address,
            block = batch.checkpoint.block_number,
            applied = report.applied,
            noops = report.noops,
            "batch committed"
        );
        Ok(report)
    }

    async fn checkpoint(&self, address: &str) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT address, block_number, block_hash, log_index, updated_at
             FROM checkpoints WHERE address = ?",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.as_ref().map(checkpoint_from_row))
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>, IndexerError> {
        let rows = sqlx::query(
            "SELECT address, version, kind, start_block FROM subscriptions
             ORDER BY start_block, address",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn ensure_subscription(&self, sub: &Subscription) -> Result<bool, IndexerError> {
        let n = sqlx::query(
            "INSERT OR IGNORE INTO subscriptions (address, version, kind, start_block)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&sub.address)
        .bind(sub.version.as_str())
        .bind(sub.kind.as_str())
        .bind(sub.start_block as i64)
        .execute(&self.pool)
        .await
        .map_err(db)?
        .rows_affected();
        Ok(n > 0)
    }

    async fn repoint(&self, address: &str, start_block: u64) -> Result<(), IndexerError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(db)?;
        let n = sqlx::query("UPDATE subscriptions SET start_block = ? WHERE address = ?")
            .bind(start_block as i64)
            .bind(address)
            .execute(&mut *tx)
            .await
            .map_err(db)?
            .rows_affected();
        if n == 0 {
            return Err(IndexerError::Other(format!("unknown subscription {address}")));
        }
        sqlx::query("DELETE FROM checkpoints WHERE address = ?")
            .bind(address)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn conviction_mapping(
        &self,
        conviction_address: &str,
    ) -> Result<Option<TokenConvictionMapping>, IndexerError> {
        let row = sqlx::query(
            "SELECT conviction_address, token_address FROM token_conviction_mappings
             WHERE conviction_address = ?",
        )
        .bind(conviction_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.map(|r| TokenConvictionMapping {
            conviction_address: r.get("conviction_address"),
            token_address: r.get("token_address"),
        }))
    }

    async fn conviction_exists(&self, address: &str, id: &str) -> Result<bool, IndexerError> {
        let mut conn = self.pool.acquire().await.map_err(db)?;
        Self::nft_exists(&mut conn, address, id).await
    }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[async_trait]
impl TokenQueries for SqliteStore {
    async fn token(&self, address: &str) -> Result<Option<Token>, IndexerError> {
        let row = sqlx::query(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE address = ?"))
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn latest_tokens(&self, limit: u32) -> Result<Vec<Token>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens
             ORDER BY creation_block_number DESC, address ASC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter().map(token_from_row).collect()
    }

    async fn top_tokens_by_transfers(
        &self,
        since_timestamp: i64,
        limit: u32,
    ) -> Result<Vec<TopToken>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {cols}, c.transfer_count
             FROM (SELECT token_address, COUNT(*) AS transfer_count
                   FROM token_transfers WHERE block_timestamp >= ?
                   GROUP BY token_address) c
             JOIN tokens t ON t.address = c.token_address
             ORDER BY c.transfer_count DESC, t.address ASC
             LIMIT ?",
            cols = TOKEN_COLUMNS
                .split(',')
                .map(|c| format!("t.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(since_timestamp)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.iter()
            .map(|r| {
                Ok(TopToken {
                    token: token_from_row(r)?,
                    transfer_count: r.get::<i64, _>("transfer_count") as u64,
                })
            })
            .collect()
    }

    async fn transfers_by_token(
        &self,
        token_address: &str,
        limit: u32,
    ) -> Result<Vec<TokenTransfer>, IndexerError> {
        let rows = sqlx::query(
            "SELECT tx_hash, log_id, token_address, from_address, to_address, amount, block_number, block_timestamp
             FROM token_transfers WHERE token_address = ?
             ORDER BY block_number DESC, length(log_id) DESC, log_id DESC
             LIMIT ?",
        )
        .bind(token_address)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(rows
            .iter()
            .map(|r| TokenTransfer {
                token_address: r.get("token_address"),
                from: r.get("from_address"),
                to: r.get("to_address"),
                amount: r.get("amount"),
                tx_hash: r.get("tx_hash"),
                block_number: r.get::<i64, _>("block_number") as u64,
                block_timestamp: r.get("block_timestamp"),
                log_id: r.get("log_id"),
            })
            .collect())
    }

    async fn convictions_by_token(&self, token_address: &str) -> Result<Vec<ConvictionNft>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {NFT_COLUMNS} FROM conviction_nfts WHERE token_address = ?
             ORDER BY length(id), id"
        ))
        .bind(token_address)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(rows.iter().map(nft_from_row).collect())
    }

    async fn convictions_by_owner(&self, owner: &str) -> Result<Vec<ConvictionNft>, IndexerError> {
        let rows = sqlx::query(&format!(
            "SELECT {NFT_COLUMNS} FROM conviction_nfts WHERE owner = ?
             ORDER BY address, length(id), id"
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(rows.iter().map(nft_from_row).collect())
    }

    async fn conviction(&self, address: &str, id: &str) -> Result<Option<ConvictionNft>, IndexerError> {
        let row = sqlx::query(&format!(
            "SELECT {NFT_COLUMNS} FROM conviction_nfts WHERE address = ? AND id = ?"
        ))
        .bind(address)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.as_ref().map(nft_from_row))
    }

    async fn dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>, IndexerError> {
        let rows = sqlx::query(
            "SELECT address, tx_hash, log_index, block_number, reason FROM dead_letters
             ORDER BY block_number DESC, log_index DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(rows
            .iter()
            .map(|r| DeadLetter {
                address: r.get("address"),
                tx_hash: r.get("tx_hash"),
                block_number: r.get::<i64, _>("block_number") as u64,
                log_index: r.get::<i64, _>("log_index") as u32,
                reason: r.get("reason"),
            })
            .collect())
    }

    async fn checkpoints(&self) -> Result<Vec<Checkpoint>, IndexerError> {
        let rows = sqlx::query(
            "SELECT address, block_number, block_hash, log_index, updated_at
             FROM checkpoints ORDER BY address",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(rows.iter().map(checkpoint_from_row).collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use launchindex_core::types::{MarketType, ProtocolVersion, TokenType};

    #[tokio::test]
    async fn token_roundtrip_and_idempotence() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut t = token(TOKEN_A, 10);
        t.name = None;
        t.token_type = TokenType::ImageEvolution;
        t.protocol_version = ProtocolVersion::V1;
        let batch = CommitBatch::new(vec![Mutation::InsertToken(t.clone())], checkpoint(FACTORY, 10));
        assert_eq!(store.apply(batch.clone()).await.unwrap().applied, 1);
        assert_eq!(store.apply(batch).await.unwrap().noops, 1);
        assert_eq!(store.token(TOKEN_A).await.unwrap(), Some(t));
    }

    #[tokio::test]
    async fn checkpoint_is_saved_with_batch() {
        let store = SqliteStore::in_memory().await.unwrap();
        let cp = Checkpoint::at_event(TOKEN_A, EventPosition::new(77, 3), "0xabc");
        store.apply(CommitBatch::checkpoint_only(cp.clone())).await.unwrap();
        let loaded = store.checkpoint(TOKEN_A).await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 77);
        assert_eq!(loaded.log_index, Some(3));
        assert_eq!(loaded.block_hash, "0xabc");

        let through = Checkpoint::through_block(TOKEN_A, 90, "0xdef");
        store.apply(CommitBatch::checkpoint_only(through)).await.unwrap();
        let loaded = store.checkpoint(TOKEN_A).await.unwrap().unwrap();
        assert_eq!((loaded.block_number, loaded.log_index), (90, None));
        assert_eq!(store.checkpoints().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_update_rolls_back_whole_batch() {
        let store = SqliteStore::in_memory().await.unwrap();
        let batch = CommitBatch::new(
            vec![
                Mutation::InsertTransfer(transfer(TOKEN_A, "0x01", "0", 1_000)),
                Mutation::TransferConviction {
                    address: CONVICTION_A.into(),
                    id: "7".into(),
                    to: BOB.into(),
                    position: EventPosition::new(12, 0),
                    fallback: None,
                },
            ],
            checkpoint(CONVICTION_A, 12),
        );
        let err = store.apply(batch).await.unwrap_err();
        assert!(matches!(err, IndexerError::StaleRead { .. }));
        assert!(store.transfers_by_token(TOKEN_A, 10).await.unwrap().is_empty());
        assert!(store.checkpoint(CONVICTION_A).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fallback_upsert_inserts_then_guards_owner() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut degraded = nft("7", BOB, EventPosition::new(30, 2));
        degraded.minter = None;
        let fallback_move = |to: &str, pos: EventPosition, fallback: ConvictionNft| Mutation::TransferConviction {
            address: CONVICTION_A.into(),
            id: "7".into(),
            to: to.into(),
            position: pos,
            fallback: Some(fallback),
        };

        let report = store
            .apply(CommitBatch::new(
                vec![fallback_move(BOB, EventPosition::new(30, 2), degraded.clone())],
                checkpoint(CONVICTION_A, 30),
            ))
            .await
            .unwrap();
        assert_eq!(report.forward_references, 1);

        // The late mint must not overwrite the newer owner.
        let report = store
            .apply(CommitBatch::new(
                vec![Mutation::MintConviction(nft("7", ALICE, EventPosition::new(20, 0)))],
                checkpoint(CONVICTION_A, 30),
            ))
            .await
            .unwrap();
        assert_eq!(report.noops, 1);

        let mut older = degraded.clone();
        older.owner = CAROL.into();
        older.owner_position = EventPosition::new(25, 0);
        let report = store
            .apply(CommitBatch::new(
                vec![fallback_move(CAROL, EventPosition::new(25, 0), older)],
                checkpoint(CONVICTION_A, 30),
            ))
            .await
            .unwrap();
        assert_eq!((report.noops, report.forward_references), (1, 0));

        let row = store.conviction(CONVICTION_A, "7").await.unwrap().unwrap();
        assert_eq!(row.owner, BOB);
        assert!(row.minter.is_none());
        assert_eq!(row.owner_position, EventPosition::new(30, 2));
        assert_eq!(store.convictions_by_owner(BOB).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn collectible_without_metadata_reads_back_empty() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut bare = nft("3", ALICE, EventPosition::new(12, 0));
        bare.metadata = None;
        store
            .apply(CommitBatch::new(
                vec![Mutation::MintConviction(bare), Mutation::MintConviction(nft("4", BOB, EventPosition::new(12, 1)))],
                checkpoint(CONVICTION_A, 12),
            ))
            .await
            .unwrap();

        let row = store.conviction(CONVICTION_A, "3").await.unwrap().unwrap();
        assert!(row.metadata.is_none());
        assert_eq!(row.minter.as_deref(), Some(ALICE));
        let row = store.conviction(CONVICTION_A, "4").await.unwrap().unwrap();
        assert_eq!(row.metadata, Some(metadata()));
    }

    #[tokio::test]
    async fn graduation_and_top_tokens() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .apply(CommitBatch::new(
                vec![
                    Mutation::InsertToken(token(TOKEN_A, 10)),
                    Mutation::InsertToken(token(TOKEN_B, 11)),
                    Mutation::InsertTransfer(transfer(TOKEN_A, "0x01", "0", 5_000)),
                    Mutation::InsertTransfer(transfer(TOKEN_A, "0x01", "1", 5_000)),
                    Mutation::InsertTransfer(transfer(TOKEN_B, "0x02", "0", 5_000)),
                    Mutation::InsertTransfer(transfer(TOKEN_B, "0x03", "0", 100)),
                ],
                checkpoint(FACTORY, 11),
            ))
            .await
            .unwrap();
        let graduate = |pool: &str| Mutation::Graduate {
            token: TOKEN_A.into(),
            pool: pool.into(),
        };
        store
            .apply(CommitBatch::new(vec![graduate(POOL), graduate(BOB)], checkpoint(TOKEN_A, 40)))
            .await
            .unwrap();
        let t = store.token(TOKEN_A).await.unwrap().unwrap();
        assert_eq!(t.market_type, MarketType::UniswapPool);
        assert_eq!(t.pool_address.as_deref(), Some(POOL));

        let top = store.top_tokens_by_transfers(1_000, 10).await.unwrap();
        let ranked: Vec<_> = top.iter().map(|t| (t.token.address.as_str(), t.transfer_count)).collect();
        assert_eq!(ranked, vec![(TOKEN_A, 2), (TOKEN_B, 1)]);

        let latest = store.latest_tokens(2000).await.unwrap();
        assert_eq!(latest[0].address, TOKEN_B);
    }

    #[tokio::test]
    async fn ids_sort_numerically() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mutations = ["10", "9", "100"]
            .iter()
            .map(|id| Mutation::MintConviction(nft(id, ALICE, EventPosition::new(5, 0))))
            .collect();
        store
            .apply(CommitBatch::new(mutations, checkpoint(CONVICTION_A, 5)))
            .await
            .unwrap();
        let ids: Vec<_> = store
            .convictions_by_token(TOKEN_A)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["9", "10", "100"]);
    }

    #[tokio::test]
    async fn register_reports_new_subscriptions_once() {
        let store = SqliteStore::in_memory().await.unwrap();
        let sub = subscription(TOKEN_A, 10);
        let batch = CommitBatch::new(vec![Mutation::Register(sub.clone())], checkpoint(FACTORY, 10));
        assert_eq!(store.apply(batch.clone()).await.unwrap().registered, vec![sub]);
        assert!(store.apply(batch).await.unwrap().registered.is_empty());

        store.repoint(TOKEN_A, 3).await.unwrap();
        assert_eq!(store.subscriptions().await.unwrap()[0].start_block, 3);
    }

    #[tokio::test]
    async fn out_of_order_replay_converges() {
        let in_order = SqliteStore::in_memory().await.unwrap();
        seed(&in_order).await;
        replay(&in_order, &history()).await;

        // Later half first, then everything in order.
        let shuffled = SqliteStore::in_memory().await.unwrap();
        seed(&shuffled).await;
        let steps = history();
        let (early, late) = steps.split_at(3);
        replay(&shuffled, late).await;
        replay(&shuffled, early).await;
        replay(&shuffled, &steps).await;

        assert_converged(&snapshot(&in_order).await, &snapshot(&shuffled).await);
    }
}
