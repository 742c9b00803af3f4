//! Subscription cursor: tracks where a pipeline is in the chain.

use crate::checkpoint::Checkpoint;
use crate::types::EventPosition;

/// A subscription's current position.
///
/// The cursor knows:
/// - Which position was last committed (its checkpoint)
/// - The subscription's start block (never ingest before it)
/// - The confirmation depth (how many blocks behind head count as final)
#[derive(Debug, Clone)]
pub struct Cursor {
    address: String,
    start_block: u64,
    confirmation_depth: u64,
    checkpoint: Option<Checkpoint>,
}

impl Cursor {
    pub fn new(
        address: impl Into<String>,
        start_block: u64,
        confirmation_depth: u64,
        checkpoint: Option<Checkpoint>,
    ) -> Self {
        Self {
            address: address.into(),
            start_block,
            confirmation_depth,
            checkpoint,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    /// The next block to fetch.
    pub fn next_block(&self) -> u64 {
        self.checkpoint
            .as_ref()
            .map(Checkpoint::next_block)
            .unwrap_or(self.start_block)
            .max(self.start_block)
    }

    /// Highest block considered final given the chain head.
    pub fn confirmed_head(&self, head_number: u64) -> u64 {
        head_number.saturating_sub(self.confirmation_depth)
    }

    /// Returns `true` if `head_number` is far enough ahead for `target` to be confirmed.
    pub fn is_confirmed(&self, target: u64, head_number: u64) -> bool {
        head_number.saturating_sub(target) >= self.confirmation_depth
    }

    /// Returns `true` if the event at `position` is already committed.
    pub fn is_applied(&self, position: EventPosition) -> bool {
        position.block_number < self.start_block
            || self
                .checkpoint
                .as_ref()
                .map(|cp| cp.covers(position))
                .unwrap_or(false)
    }

    /// Checkpoint to commit alongside the event at `position`.
    pub fn checkpoint_at(&self, position: EventPosition, block_hash: &str) -> Checkpoint {
        Checkpoint::at_event(&self.address, position, block_hash)
    }

    /// Checkpoint to commit once every block up to `block_number` is done.
    pub fn checkpoint_through(&self, block_number: u64, block_hash: &str) -> Checkpoint {
        Checkpoint::through_block(&self.address, block_number, block_hash)
    }

    /// Move the cursor after the store accepted `checkpoint`.
    pub fn commit(&mut self, checkpoint: Checkpoint) {
        self.checkpoint = Some(checkpoint);
    }

    /// Step back `blocks` blocks (reorg recovery); never before the start block.
    pub fn rewind(&mut self, blocks: u64) -> Checkpoint {
        let current = self
            .checkpoint
            .as_ref()
            .map(|cp| cp.block_number)
            .unwrap_or(self.start_block);
        let target = current.saturating_sub(blocks.max(1));
        let cp = if target < self.start_block {
            // Nothing before the start block was ever applied.
            Checkpoint::through_block(&self.address, self.start_block.saturating_sub(1), "")
        } else {
            Checkpoint::through_block(&self.address, target, "")
        };
        self.checkpoint = Some(cp.clone());
        cp
    }

    /// Forget progress and restart from a new start block.
    pub fn repoint(&mut self, start_block: u64) {
        self.start_block = start_block;
        self.checkpoint = None;
    }
}
