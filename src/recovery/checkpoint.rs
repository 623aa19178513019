//! Sharp checkpoints.
//!
//! A checkpoint flushes every dirty cached page and then records the set of
//! active transactions, so redo after a crash can start at the checkpoint
//! instead of at the beginning of the log.

use std::sync::Arc;

use log::info;

use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageResult;
use crate::storage::wal::WalManager;

pub struct CheckpointManager {
    pool: Arc<BufferPool>,
    wal: Arc<WalManager>,
}

impl CheckpointManager {
    pub fn new(pool: Arc<BufferPool>, wal: Arc<WalManager>) -> Self {
        Self { pool, wal }
    }

    /// Takes a checkpoint and returns the offset of its record.
    ///
    /// The pool section is held throughout, so no page can be dirtied and
    /// flushed between the flush and the record.
    pub fn checkpoint(&self) -> StorageResult<u64> {
        let mut pool = self.pool.lock();
        pool.flush_all_pages()?;

        let mut wal = self.wal.lock();
        let active = wal.active_transactions();
        let offset = wal.log_checkpoint(&active)?;
        info!(
            "Checkpoint at offset {} ({} active transactions)",
            offset,
            active.len()
        );
        Ok(offset)
    }
}
