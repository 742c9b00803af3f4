//! Per-subscription ingestion loop.
//!
//! # Backfill
//! From the cursor's next block up to `head - confirmation_depth`, in ranges
//! of `batch_size` blocks. Each event is committed together with a checkpoint
//! at its own position; a range is closed by a checkpoint through its last
//! block.
//!
//! # Live
//! Once caught up, poll the head every `poll_interval_ms` and ingest newly
//! confirmed blocks the same way.
//!
//! # Resume
//! On start the stored checkpoint's block hash is compared with the chain.
//! A mismatch means the block was reorganized away after it was committed;
//! the cursor steps back `confirmation_depth` blocks and replays, which the
//! idempotent mutations make harmless.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use launchindex_core::checkpoint::Checkpoint;
use launchindex_core::cursor::Cursor;
use launchindex_core::entity::DeadLetter;
use launchindex_core::error::IndexerError;
use launchindex_core::event::ChainEvent;
use launchindex_core::handler::HandlerRegistry;
use launchindex_core::indexer::{IndexerConfig, IndexerState};
use launchindex_core::mutation::{ApplyReport, CommitBatch, Mutation};
use launchindex_core::registry::Subscription;
use launchindex_core::store::Store;

use crate::fetcher::EvmFetcher;

/// Loop tuning shared by every pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub confirmation_depth: u64,
    pub batch_size: u64,
    pub poll_interval: Duration,
}

impl From<&IndexerConfig> for PipelineConfig {
    fn from(config: &IndexerConfig) -> Self {
        Self {
            confirmation_depth: config.confirmation_depth,
            batch_size: config.batch_size.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Counters aggregated over every pipeline of a supervisor.
#[derive(Debug, Default)]
pub struct IndexerStats {
    events: AtomicU64,
    applied: AtomicU64,
    noops: AtomicU64,
    forward_references: AtomicU64,
    dead_letters: AtomicU64,
    discovered: AtomicU64,
    rewinds: AtomicU64,
}

/// Point-in-time copy of [`IndexerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events: u64,
    pub applied: u64,
    pub noops: u64,
    pub forward_references: u64,
    pub dead_letters: u64,
    pub discovered: u64,
    pub rewinds: u64,
}

impl IndexerStats {
    fn record(&self, report: &ApplyReport) {
        self.applied.fetch_add(report.applied as u64, Ordering::Relaxed);
        self.noops.fetch_add(report.noops as u64, Ordering::Relaxed);
        self.forward_references
            .fetch_add(report.forward_references as u64, Ordering::Relaxed);
        self.discovered
            .fetch_add(report.registered.len() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            noops: self.noops.load(Ordering::Relaxed),
            forward_references: self.forward_references.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
            discovered: self.discovered.load(Ordering::Relaxed),
            rewinds: self.rewinds.load(Ordering::Relaxed),
        }
    }
}

/// Everything a pipeline shares with its siblings.
#[derive(Clone)]
pub struct PipelineContext {
    pub fetcher: Arc<EvmFetcher>,
    pub handlers: Arc<HandlerRegistry>,
    pub store: Arc<dyn Store>,
    pub config: PipelineConfig,
    pub stats: Arc<IndexerStats>,
    /// Newly discovered subscriptions go back to the supervisor here.
    pub registrations: mpsc::UnboundedSender<Subscription>,
}

/// Operator controls of one pipeline, held by the supervisor.
pub struct PipelineControl {
    pub cancel: CancellationToken,
    pub paused: watch::Receiver<bool>,
    pub state: watch::Sender<IndexerState>,
}

/// Ingestion loop for a single subscribed contract.
pub struct SubscriptionPipeline {
    sub: Subscription,
    ctx: PipelineContext,
    control: PipelineControl,
}

impl SubscriptionPipeline {
    pub fn new(sub: Subscription, ctx: PipelineContext, control: PipelineControl) -> Self {
        Self { sub, ctx, control }
    }

    /// Run until cancelled or an unrecoverable error.
    ///
    /// Final state is `Stopped` on cancellation and `Halted` on error.
    pub async fn run(mut self) -> Result<(), IndexerError> {
        let result = self.run_inner().await;
        match &result {
            Ok(()) => self.set_state(IndexerState::Stopped),
            Err(e) => {
                tracing::error!(
                    address = %self.sub.address,
                    kind = %self.sub.kind,
                    error = %e,
                    "subscription halted"
                );
                self.set_state(IndexerState::Halted);
            }
        }
        result
    }

    async fn run_inner(&mut self) -> Result<(), IndexerError> {
        let topics = self
            .ctx
            .handlers
            .get(self.sub.version)
            .map(|h| h.topics(self.sub.kind))
            .ok_or_else(|| IndexerError::Config(format!("no handler for {}", self.sub.version)))?;

        let stored = self.ctx.store.checkpoint(&self.sub.address).await?;
        let mut cursor = Cursor::new(
            &self.sub.address,
            self.sub.start_block,
            self.ctx.config.confirmation_depth,
            stored,
        );
        self.verify_checkpoint(&mut cursor).await?;

        tracing::info!(
            address = %self.sub.address,
            version = %self.sub.version,
            kind = %self.sub.kind,
            from = cursor.next_block(),
            "starting subscription"
        );

        loop {
            if !self.wait_while_paused().await {
                return Ok(());
            }

            let head = self.ctx.fetcher.head_block_number().await?;
            let confirmed = cursor.confirmed_head(head);
            let from = cursor.next_block();

            if from > confirmed {
                self.set_state(IndexerState::Live);
                if !self.sleep(self.ctx.config.poll_interval).await {
                    return Ok(());
                }
                continue;
            }

            let to = (from + self.ctx.config.batch_size - 1).min(confirmed);
            self.set_state(if to < confirmed {
                IndexerState::Backfilling
            } else {
                IndexerState::Live
            });

            if !self.ingest_range(&mut cursor, from, to, &topics).await? {
                return Ok(());
            }
        }
    }

    /// Ingest `[from, to]`. Returns `false` if cancelled part-way.
    async fn ingest_range(
        &self,
        cursor: &mut Cursor,
        from: u64,
        to: u64,
        topics: &[String],
    ) -> Result<bool, IndexerError> {
        let events = self
            .ctx
            .fetcher
            .events(&self.sub, from, to, topics, self.ctx.config.batch_size)
            .await?;

        let mut ingested = 0usize;
        for event in &events {
            if self.control.cancel.is_cancelled() {
                return Ok(false);
            }
            if cursor.is_applied(event.position) {
                continue;
            }
            self.ingest_event(cursor, event).await?;
            ingested += 1;
        }

        let block = self
            .ctx
            .fetcher
            .block(to)
            .await?
            .ok_or_else(|| IndexerError::transient(format!("block {to} not available")))?;
        let checkpoint = cursor.checkpoint_through(to, &block.hash);
        self.ctx
            .store
            .apply(CommitBatch::checkpoint_only(checkpoint.clone()))
            .await?;
        cursor.commit(checkpoint);

        tracing::debug!(
            address = %self.sub.address,
            from,
            to,
            events = ingested,
            "range complete"
        );
        Ok(true)
    }

    async fn ingest_event(&self, cursor: &mut Cursor, event: &ChainEvent) -> Result<(), IndexerError> {
        self.ctx.stats.events.fetch_add(1, Ordering::Relaxed);
        let checkpoint = cursor.checkpoint_at(event.position, &event.tx.block_hash);

        let mutations = self.dispatch(event, false).await?;
        let report = match self
            .ctx
            .store
            .apply(CommitBatch::new(mutations, checkpoint.clone()))
            .await
        {
            Ok(report) => report,
            Err(IndexerError::StaleRead { entity }) => {
                tracing::debug!(
                    tx = %event.tx.hash,
                    log_index = event.log_index(),
                    entity = %entity,
                    "row vanished under a conditional write, rebuilding with fallback"
                );
                let mutations = self.dispatch(event, true).await?;
                self.ctx
                    .store
                    .apply(CommitBatch::new(mutations, checkpoint.clone()))
                    .await?
            }
            Err(e) => return Err(e),
        };
        cursor.commit(checkpoint);

        self.ctx.stats.record(&report);
        for sub in report.registered {
            if self.ctx.registrations.send(sub).is_err() {
                tracing::debug!("supervisor gone, dropping registration");
            }
        }
        Ok(())
    }

    /// Run the handler; payloads it cannot use become a dead letter.
    async fn dispatch(&self, event: &ChainEvent, stale: bool) -> Result<Vec<Mutation>, IndexerError> {
        let store = self.ctx.store.as_ref();
        let result = if stale {
            self.ctx.handlers.dispatch_stale(event, &self.sub, store).await
        } else {
            self.ctx.handlers.dispatch(event, &self.sub, store).await
        };
        match result {
            Ok(mutations) => Ok(mutations),
            Err(e) if is_dead_letter(&e) => {
                tracing::warn!(
                    address = %event.address,
                    tx = %event.tx.hash,
                    log_index = event.log_index(),
                    error = %e,
                    "dead-lettering event"
                );
                self.ctx.stats.dead_letters.fetch_add(1, Ordering::Relaxed);
                Ok(vec![Mutation::DeadLetter(DeadLetter {
                    address: event.address.clone(),
                    tx_hash: event.tx.hash.clone(),
                    block_number: event.block_number(),
                    log_index: event.log_index(),
                    reason: e.to_string(),
                })])
            }
            Err(e) => Err(e),
        }
    }

    async fn verify_checkpoint(&self, cursor: &mut Cursor) -> Result<(), IndexerError> {
        let Some(cp) = cursor.checkpoint().cloned() else {
            return Ok(());
        };
        if cp.block_hash.is_empty() {
            return Ok(());
        }
        let canonical = self.ctx.fetcher.block(cp.block_number).await?;
        match canonical {
            Some(block) if block.hash == cp.block_hash => {
                tracing::info!(
                    address = %self.sub.address,
                    block = cp.block_number,
                    hash = %cp.block_hash,
                    "resuming from checkpoint"
                );
                Ok(())
            }
            other => {
                let rewound: Checkpoint = cursor.rewind(self.ctx.config.confirmation_depth);
                tracing::warn!(
                    address = %self.sub.address,
                    block = cp.block_number,
                    stored = %cp.block_hash,
                    canonical = ?other.map(|b| b.hash),
                    rewind_to = rewound.block_number,
                    "checkpoint block is no longer canonical"
                );
                self.ctx.stats.rewinds.fetch_add(1, Ordering::Relaxed);
                self.ctx.store.apply(CommitBatch::checkpoint_only(rewound)).await?;
                Ok(())
            }
        }
    }

    /// Block while paused. Returns `false` if cancelled.
    async fn wait_while_paused(&mut self) -> bool {
        loop {
            if self.control.cancel.is_cancelled() {
                return false;
            }
            let paused = *self.control.paused.borrow();
            if !paused {
                return true;
            }
            self.set_state(IndexerState::Paused);
            tokio::select! {
                _ = self.control.cancel.cancelled() => return false,
                changed = self.control.paused.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }

    /// Sleep unless cancelled. Returns `false` if cancelled.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.control.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn set_state(&self, state: IndexerState) {
        self.control.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(address = %self.sub.address, from = %current, to = %state, "state change");
            *current = state;
            true
        });
    }
}

fn is_dead_letter(e: &IndexerError) -> bool {
    e.is_rejected()
}
