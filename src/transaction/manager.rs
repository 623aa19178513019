//! Transaction handle tying the buffer pool, log and recovery together.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use super::id::TransactionId;
use super::state::TransactionState;
use crate::recovery::RecoveryManager;
use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::wal::WalManager;

/// A running transaction. Aborts itself on drop if still active.
///
/// `abort` may be called from any thread holding a reference, including
/// while another thread is blocked on a lock for this transaction; the
/// blocked request then fails with `Aborted`.
pub struct Transaction {
    id: TransactionId,
    pool: Arc<BufferPool>,
    wal: Arc<WalManager>,
    recovery: Arc<RecoveryManager>,
    state: Mutex<TransactionState>,
}

impl Transaction {
    /// Logs BEGIN for `id` and returns the active handle.
    pub fn start(
        id: TransactionId,
        pool: Arc<BufferPool>,
        wal: Arc<WalManager>,
        recovery: Arc<RecoveryManager>,
    ) -> StorageResult<Self> {
        wal.log_begin(id)?;
        debug!("{} started", id);
        Ok(Self {
            id,
            pool,
            wal,
            recovery,
            state: Mutex::new(TransactionState::Active),
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Flushes every page the transaction dirtied (each preceded by its
    /// UPDATE record), forces a COMMIT record, then releases all locks.
    pub fn commit(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        if !state.is_active() {
            return Err(StorageError::InvalidTransactionState {
                txn: self.id,
                state: *state,
            });
        }

        self.pool.flush_pages(self.id)?;
        self.wal.log_commit(self.id)?;
        *state = TransactionState::Committed;
        self.pool.transaction_complete(self.id, true)?;
        debug!("{} committed", self.id);
        Ok(())
    }

    /// Undoes the transaction's logged updates, forces an ABORT record and
    /// releases all locks. Does nothing if the transaction already finished.
    pub fn abort(&self) -> StorageResult<()> {
        // Purge first so a request blocked on another thread fails fast.
        self.pool.lock_manager().remove_from_waiting(self.id);

        let mut state = self.state.lock();
        if state.is_finished() {
            return Ok(());
        }

        self.recovery.rollback(self.id)?;
        self.wal.log_abort(self.id)?;
        *state = TransactionState::Aborted;
        self.pool.transaction_complete(self.id, false)?;
        debug!("{} aborted", self.id);
        Ok(())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state().is_active() {
            if let Err(e) = self.abort() {
                warn!("Failed to abort {} on drop: {}", self.id, e);
            }
        }
    }
}
