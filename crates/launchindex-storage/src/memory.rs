//! In-memory storage backend.
//!
//! Holds every entity, subscription and checkpoint in RAM. Useful for tests
//! and short-lived indexers that don't need persistence.
//!
//! `apply` first checks that no mutation of the batch can fail, then writes
//! in place under the lock. The only fallible mutation is a bare collectible
//! transfer whose row is missing, so a batch either commits whole or is
//! rejected before anything changes.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use launchindex_core::checkpoint::Checkpoint;
use launchindex_core::entity::{ConvictionNft, DeadLetter, Token, TokenConvictionMapping, TokenTransfer, TopToken};
use launchindex_core::error::IndexerError;
use launchindex_core::mutation::{ApplyReport, CommitBatch, Mutation};
use launchindex_core::registry::Subscription;
use launchindex_core::store::{Store, TokenQueries};
use launchindex_core::types::MarketType;

use crate::id_order;

#[derive(Debug, Default)]
struct State {
    tokens: HashMap<String, Token>,
    /// Keyed by (tx hash, log id).
    transfers: HashMap<(String, String), TokenTransfer>,
    /// Keyed by collectible address.
    mappings: HashMap<String, TokenConvictionMapping>,
    /// Tokens that already have a collectible mapping.
    mapped_tokens: HashSet<String>,
    /// Keyed by (collectible address, instance id).
    convictions: HashMap<(String, String), ConvictionNft>,
    subscriptions: HashMap<String, Subscription>,
    checkpoints: HashMap<String, Checkpoint>,
    /// Keyed by (address, tx hash, log index).
    dead_letters: HashMap<(String, String, u32), DeadLetter>,
}

impl State {
    /// Reject a batch containing an ownership update for a row that neither
    /// exists nor is created earlier in the same batch.
    fn check(&self, mutations: &[Mutation]) -> Result<(), IndexerError> {
        let mut created: HashSet<(&str, &str)> = HashSet::new();
        for mutation in mutations {
            match mutation {
                Mutation::MintConviction(nft) => {
                    created.insert((nft.address.as_str(), nft.id.as_str()));
                }
                Mutation::TransferConviction {
                    address, id, fallback, ..
                } => {
                    let key = (address.as_str(), id.as_str());
                    if fallback.is_some() {
                        created.insert(key);
                    } else if !created.contains(&key)
                        && !self.convictions.contains_key(&(address.clone(), id.clone()))
                    {
                        return Err(IndexerError::StaleRead {
                            entity: format!("conviction {address}#{id}"),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, mutation: Mutation, report: &mut ApplyReport) {
        let changed = match mutation {
            Mutation::InsertToken(token) => {
                if self.tokens.contains_key(&token.address) {
                    false
                } else {
                    self.tokens.insert(token.address.clone(), token);
                    true
                }
            }
            Mutation::InsertConvictionMapping(mapping) => {
                if self.mapped_tokens.contains(&mapping.token_address)
                    || self.mappings.contains_key(&mapping.conviction_address)
                {
                    false
                } else {
                    self.mapped_tokens.insert(mapping.token_address.clone());
                    self.mappings.insert(mapping.conviction_address.clone(), mapping);
                    true
                }
            }
            Mutation::Register(sub) => {
                if self.subscriptions.contains_key(&sub.address) {
                    false
                } else {
                    self.subscriptions.insert(sub.address.clone(), sub.clone());
                    report.registered.push(sub);
                    true
                }
            }
            Mutation::InsertTransfer(transfer) => {
                let key = (transfer.tx_hash.clone(), transfer.log_id.clone());
                if self.transfers.contains_key(&key) {
                    false
                } else {
                    self.transfers.insert(key, transfer);
                    true
                }
            }
            Mutation::Graduate { token, pool } => match self.tokens.get_mut(&token) {
                Some(t) if t.market_type == MarketType::BondingCurve => {
                    t.market_type = MarketType::UniswapPool;
                    t.pool_address = Some(pool);
                    true
                }
                Some(_) => false,
                None => {
                    tracing::warn!(token = %token, "graduation for unknown token");
                    false
                }
            },
            Mutation::MintConviction(nft) => {
                let key = (nft.address.clone(), nft.id.clone());
                if self.convictions.contains_key(&key) {
                    false
                } else {
                    self.convictions.insert(key, nft);
                    true
                }
            }
            Mutation::TransferConviction {
                address,
                id,
                to,
                position,
                fallback,
            } => match self.convictions.get_mut(&(address.clone(), id.clone())) {
                Some(row) if position > row.owner_position => {
                    row.owner = to;
                    row.owner_position = position;
                    true
                }
                Some(_) => false,
                None => match fallback {
                    Some(nft) => {
                        self.convictions.insert((address, id), nft);
                        report.forward_references += 1;
                        true
                    }
                    // Rejected by `check` before anything was written.
                    None => false,
                },
            },
            Mutation::DeadLetter(dl) => {
                let key = (dl.address.clone(), dl.tx_hash.clone(), dl.log_index);
                if self.dead_letters.contains_key(&key) {
                    false
                } else {
                    self.dead_letters.insert(key, dl);
                    true
                }
            }
        };
        if changed {
            report.applied += 1;
        } else {
            report.noops += 1;
        }
    }
}

/// In-memory indexer store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, IndexerError> {
        self.state
            .lock()
            .map_err(|_| IndexerError::Storage("in-memory store lock poisoned".into()))
    }

    /// Total number of stored transfers.
    pub fn transfer_count(&self) -> Result<usize, IndexerError> {
        Ok(self.lock()?.transfers.len())
    }

    /// Total number of stored tokens.
    pub fn token_count(&self) -> Result<usize, IndexerError> {
        Ok(self.lock()?.tokens.len())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn apply(&self, batch: CommitBatch) -> Result<ApplyReport, IndexerError> {
        let mut state = self.lock()?;
        state.check(&batch.mutations)?;
        let mut report = ApplyReport::default();
        for mutation in batch.mutations {
            state.apply(mutation, &mut report);
        }
        state
            .checkpoints
            .insert(batch.checkpoint.address.clone(), batch.checkpoint);
        Ok(report)
    }

    async fn checkpoint(&self, address: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.lock()?.checkpoints.get(address).cloned())
    }

    async fn subscriptions(&self) -> Result<Vec<Subscription>, IndexerError> {
        let mut subs: Vec<_> = self.lock()?.subscriptions.values().cloned().collect();
        subs.sort_by(|a, b| a.start_block.cmp(&b.start_block).then_with(|| a.address.cmp(&b.address)));
        Ok(subs)
    }

    async fn ensure_subscription(&self, sub: &Subscription) -> Result<bool, IndexerError> {
        let mut state = self.lock()?;
        if state.subscriptions.contains_key(&sub.address) {
            return Ok(false);
        }
        state.subscriptions.insert(sub.address.clone(), sub.clone());
        Ok(true)
    }

    async fn repoint(&self, address: &str, start_block: u64) -> Result<(), IndexerError> {
        let mut state = self.lock()?;
        match state.subscriptions.get_mut(address) {
            Some(sub) => sub.start_block = start_block,
            None => return Err(IndexerError::Other(format!("unknown subscription {address}"))),
        }
        state.checkpoints.remove(address);
        Ok(())
    }

    async fn conviction_mapping(
        &self,
        conviction_address: &str,
    ) -> Result<Option<TokenConvictionMapping>, IndexerError> {
        Ok(self.lock()?.mappings.get(conviction_address).cloned())
    }

    async fn conviction_exists(&self, address: &str, id: &str) -> Result<bool, IndexerError> {
        Ok(self
            .lock()?
            .convictions
            .contains_key(&(address.to_string(), id.to_string())))
    }
}

#[async_trait]
impl TokenQueries for InMemoryStore {
    async fn token(&self, address: &str) -> Result<Option<Token>, IndexerError> {
        Ok(self.lock()?.tokens.get(address).cloned())
    }

    async fn latest_tokens(&self, limit: u32) -> Result<Vec<Token>, IndexerError> {
        let mut tokens: Vec<_> = self.lock()?.tokens.values().cloned().collect();
        tokens.sort_by(|a, b| {
            b.creation_block_number
                .cmp(&a.creation_block_number)
                .then_with(|| a.address.cmp(&b.address))
        });
        tokens.truncate(limit as usize);
        Ok(tokens)
    }

    async fn top_tokens_by_transfers(
        &self,
        since_timestamp: i64,
        limit: u32,
    ) -> Result<Vec<TopToken>, IndexerError> {
        let state = self.lock()?;
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for t in state.transfers.values() {
            if t.block_timestamp >= since_timestamp {
                *counts.entry(t.token_address.as_str()).or_default() += 1;
            }
        }
        let mut top: Vec<TopToken> = counts
            .into_iter()
            .filter_map(|(addr, transfer_count)| {
                state.tokens.get(addr).map(|token| TopToken {
                    token: token.clone(),
                    transfer_count,
                })
            })
            .collect();
        top.sort_by(|a, b| {
            b.transfer_count
                .cmp(&a.transfer_count)
                .then_with(|| a.token.address.cmp(&b.token.address))
        });
        top.truncate(limit as usize);
        Ok(top)
    }

    async fn transfers_by_token(
        &self,
        token_address: &str,
        limit: u32,
    ) -> Result<Vec<TokenTransfer>, IndexerError> {
        let mut transfers: Vec<_> = self
            .lock()?
            .transfers
            .values()
            .filter(|t| t.token_address == token_address)
            .cloned()
            .collect();
        transfers.sort_by(|a, b| {
            b.block_number
                .cmp(&a.block_number)
                .then_with(|| id_order(&b.log_id, &a.log_id))
        });
        transfers.truncate(limit as usize);
        Ok(transfers)
    }

    async fn convictions_by_token(&self, token_address: &str) -> Result<Vec<ConvictionNft>, IndexerError> {
        let mut nfts: Vec<_> = self
            .lock()?
            .convictions
            .values()
            .filter(|n| n.token_address == token_address)
            .cloned()
            .collect();
        nfts.sort_by(|a, b| id_order(&a.id, &b.id));
        Ok(nfts)
    }

    async fn convictions_by_owner(&self, owner: &str) -> Result<Vec<ConvictionNft>, IndexerError> {
        let mut nfts: Vec<_> = self
            .lock()?
            .convictions
            .values()
            .filter(|n| n.owner == owner)
            .cloned()
            .collect();
        nfts.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| id_order(&a.id, &b.id)));
        Ok(nfts)
    }

    async fn conviction(&self, address: &str, id: &str) -> Result<Option<ConvictionNft>, IndexerError> {
        Ok(self
            .lock()?
            .convictions
            .get(&(address.to_string(), id.to_string()))
            .cloned())
    }

    async fn dead_letters(&self, limit: u32) -> Result<Vec<DeadLetter>, IndexerError> {
        let mut dls: Vec<_> = self.lock()?.dead_letters.values().cloned().collect();
        dls.sort_by(|a, b| {
            b.block_number
                .cmp(&a.block_number)
                .then_with(|| b.log_index.cmp(&a.log_index))
        });
        dls.truncate(limit as usize);
        Ok(dls)
    }

    async fn checkpoints(&self) -> Result<Vec<Checkpoint>, IndexerError> {
        let mut cps: Vec<_> = self.lock()?.checkpoints.values().cloned().collect();
        cps.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(cps)
    }
}
