//! Supervisor: one pipeline per subscription.
//!
//! Seeds the configured factories, restores every persisted subscription and
//! spawns a [`SubscriptionPipeline`] for each. Discoveries reported by a
//! pipeline are registered and spawned as they arrive. A pipeline that halts
//! is logged and left down; the others keep running.

use std::collections::HashMap;
use std::sync::Arc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use launchindex_core::error::IndexerError;
use launchindex_core::handler::HandlerRegistry;
use launchindex_core::indexer::{FactoryConfig, IndexerState};
use launchindex_core::registry::{AddressRegistry, Subscription};
use launchindex_core::store::Store;
use launchindex_core::types::{ContractKind, ProtocolVersion};

use crate::fetcher::EvmFetcher;
use crate::pipeline::{
    IndexerStats, PipelineConfig, PipelineContext, PipelineControl, StatsSnapshot, SubscriptionPipeline,
};

/// State of one subscription as seen by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub address: String,
    pub version: ProtocolVersion,
    pub kind: ContractKind,
    pub start_block: u64,
    pub state: IndexerState,
}

/// Operator commands.
#[derive(Debug)]
pub enum SupervisorCommand {
    Pause(String),
    Resume(String),
    /// Restart a subscription from a new start block, dropping its checkpoint.
    Repoint {
        address: String,
        start_block: u64,
        reply: oneshot::Sender<Result<(), IndexerError>>,
    },
    Status(oneshot::Sender<Vec<PipelineStatus>>),
}

/// Cloneable handle for talking to a running [`Supervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<SupervisorCommand>,
    cancel: CancellationToken,
    stats: Arc<IndexerStats>,
}

impl SupervisorHandle {
    pub async fn pause(&self, address: &str) -> Result<(), IndexerError> {
        self.send(SupervisorCommand::Pause(address.to_ascii_lowercase())).await
    }

    pub async fn resume(&self, address: &str) -> Result<(), IndexerError> {
        self.send(SupervisorCommand::Resume(address.to_ascii_lowercase())).await
    }

    pub async fn repoint(&self, address: &str, start_block: u64) -> Result<(), IndexerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::Repoint {
            address: address.to_ascii_lowercase(),
            start_block,
            reply,
        })
        .await?;
        rx.await.map_err(|_| gone())?
    }

    pub async fn status(&self) -> Result<Vec<PipelineStatus>, IndexerError> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::Status(reply)).await?;
        rx.await.map_err(|_| gone())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop every pipeline. [`Supervisor::run`] returns once they have exited.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn send(&self, cmd: SupervisorCommand) -> Result<(), IndexerError> {
        self.commands.send(cmd).await.map_err(|_| gone())
    }
}

fn gone() -> IndexerError {
    IndexerError::Aborted {
        reason: "supervisor is not running".into(),
    }
}

/// Runtime controls of one running pipeline. The subscription itself lives
/// in the registry.
struct Slot {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    state: watch::Receiver<IndexerState>,
}

/// Owns the address registry and every running pipeline.
pub struct Supervisor {
    ctx: PipelineContext,
    factories: Vec<FactoryConfig>,
    registry: AddressRegistry,
    slots: HashMap<String, Slot>,
    tasks: JoinSet<(String, Result<(), IndexerError>)>,
    registrations: mpsc::UnboundedReceiver<Subscription>,
    commands: mpsc::Receiver<SupervisorCommand>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        factories: Vec<FactoryConfig>,
        config: PipelineConfig,
        fetcher: Arc<EvmFetcher>,
        handlers: Arc<HandlerRegistry>,
        store: Arc<dyn Store>,
    ) -> (Self, SupervisorHandle) {
        let (reg_tx, reg_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let stats = Arc::new(IndexerStats::default());
        let ctx = PipelineContext {
            fetcher,
            handlers,
            store,
            config,
            stats: stats.clone(),
            registrations: reg_tx,
        };
        let supervisor = Self {
            ctx,
            factories,
            registry: AddressRegistry::new(),
            slots: HashMap::new(),
            tasks: JoinSet::new(),
            registrations: reg_rx,
            commands: cmd_rx,
            cancel: cancel.clone(),
        };
        let handle = SupervisorHandle {
            commands: cmd_tx,
            cancel,
            stats,
        };
        (supervisor, handle)
    }

    /// Run until [`SupervisorHandle::shutdown`].
    pub async fn run(mut self) -> Result<(), IndexerError> {
        for factory in &self.factories {
            let sub = Subscription::new(
                &factory.address,
                factory.version,
                ContractKind::Factory,
                factory.start_block,
            );
            if self.ctx.store.ensure_subscription(&sub).await? {
                tracing::info!(address = %sub.address, version = %sub.version, "seeded factory");
            }
        }

        for sub in self.ctx.store.subscriptions().await? {
            self.adopt(sub);
        }
        tracing::info!(subscriptions = self.registry.len(), "supervisor started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(sub) = self.registrations.recv() => self.adopt(sub),
                Some(cmd) = self.commands.recv() => self.command(cmd).await,
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    match joined {
                        Ok((address, Ok(()))) => {
                            tracing::debug!(address = %address, "pipeline exited");
                        }
                        Ok((address, Err(e))) => {
                            tracing::error!(
                                address = %address,
                                error = %e,
                                "pipeline halted, other subscriptions continue"
                            );
                        }
                        Err(e) => tracing::error!(error = %e, "pipeline task panicked"),
                    }
                }
            }
        }

        tracing::info!(pipelines = self.tasks.len(), "shutting down");
        while let Some(joined) = self.tasks.join_next().await {
            if let Ok((address, Err(e))) = joined {
                tracing::warn!(address = %address, error = %e, "pipeline ended with error");
            }
        }
        let stats = self.ctx.stats.snapshot();
        tracing::info!(
            events = stats.events,
            applied = stats.applied,
            forward_references = stats.forward_references,
            dead_letters = stats.dead_letters,
            "supervisor stopped"
        );
        Ok(())
    }

    /// Register `sub` and start its pipeline, unless already known.
    fn adopt(&mut self, sub: Subscription) {
        if self.ctx.handlers.get(sub.version).is_none() {
            tracing::warn!(address = %sub.address, version = %sub.version, "no handler for version, skipping");
            return;
        }
        if !self.registry.register(sub.clone()) {
            return;
        }
        self.spawn(sub);
    }

    fn spawn(&mut self, sub: Subscription) {
        let cancel = self.cancel.child_token();
        let (paused_tx, paused_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(IndexerState::Idle);
        let pipeline = SubscriptionPipeline::new(
            sub.clone(),
            self.ctx.clone(),
            PipelineControl {
                cancel: cancel.clone(),
                paused: paused_rx,
                state: state_tx,
            },
        );
        let address = sub.address;
        self.tasks.spawn({
            let address = address.clone();
            async move { (address, pipeline.run().await) }
        });
        self.slots.insert(
            address,
            Slot {
                cancel,
                paused: paused_tx,
                state: state_rx,
            },
        );
    }

    async fn command(&mut self, cmd: SupervisorCommand) {
        match cmd {
            SupervisorCommand::Pause(address) => self.set_paused(&address, true),
            SupervisorCommand::Resume(address) => self.set_paused(&address, false),
            SupervisorCommand::Repoint {
                address,
                start_block,
                reply,
            } => {
                let result = self.repoint(&address, start_block).await;
                let _ = reply.send(result);
            }
            SupervisorCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn set_paused(&self, address: &str, paused: bool) {
        match self.slots.get(address) {
            Some(slot) => {
                slot.paused.send_replace(paused);
                tracing::info!(address = %address, paused, "pause state changed");
            }
            None => tracing::warn!(address = %address, "pause/resume for unknown subscription"),
        }
    }

    async fn repoint(&mut self, address: &str, start_block: u64) -> Result<(), IndexerError> {
        let (Some(sub), Some(slot)) = (self.registry.get(address).cloned(), self.slots.remove(address)) else {
            return Err(IndexerError::Other(format!("unknown subscription {address}")));
        };
        slot.cancel.cancel();
        let mut state = slot.state.clone();
        // Wait for the old loop to let go before its checkpoint is dropped.
        let _ = state
            .wait_for(|s| matches!(s, IndexerState::Stopped | IndexerState::Halted))
            .await;

        if let Err(e) = self.ctx.store.repoint(address, start_block).await {
            tracing::error!(
                address = %address,
                start_block,
                error = %e,
                "repoint failed, restarting from the stored checkpoint"
            );
            self.spawn(sub);
            return Err(e);
        }
        self.registry.set_start_block(address, start_block);
        let sub = Subscription { start_block, ..sub };
        tracing::info!(address = %address, start_block, "repointed subscription");
        self.spawn(sub);
        Ok(())
    }

    fn status(&self) -> Vec<PipelineStatus> {
        let mut out: Vec<PipelineStatus> = self
            .registry
            .subscriptions()
            .into_iter()
            .filter_map(|sub| {
                let state = *self.slots.get(&sub.address)?.state.borrow();
                Some(PipelineStatus {
                    address: sub.address,
                    version: sub.version,
                    kind: sub.kind,
                    start_block: sub.start_block,
                    state,
                })
            })
            .collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }
}
