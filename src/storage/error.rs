//! Storage layer error types.

use thiserror::Error;

use crate::storage::page::{PageId, TableId};
use crate::transaction::{TransactionId, TransactionState};

/// Errors that can occur in the storage, locking and recovery layers.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Lock timeout: {txn} waited too long for {page}")]
    LockTimeout { txn: TransactionId, page: PageId },

    #[error("Transaction {0} was aborted while waiting for a lock")]
    Aborted(TransactionId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Consistency violation: {0} has already committed and cannot be rolled back")]
    CommittedRollback(TransactionId),

    #[error("Consistency violation: unknown log record type {tag} at offset {offset}")]
    UnknownRecordType { tag: i32, offset: u64 },

    #[error("Table not found: {0}")]
    TableNotFound(TableId),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Page is full: requires {required} bytes but only {available} available")]
    PageFull { required: usize, available: usize },

    #[error("Tuple not found: slot {slot} of {page} is empty or deleted")]
    TupleNotFound { page: PageId, slot: u16 },

    #[error("Tuple has not been stored yet and has no tuple id")]
    TupleNotPlaced,

    #[error("Invalid slot ID: {slot} (max: {max_slot})")]
    InvalidSlotId { slot: u16, max_slot: u16 },

    #[error("Transaction {txn} is {state}")]
    InvalidTransactionState {
        txn: TransactionId,
        state: TransactionState,
    },
}

impl StorageError {
    /// True when the error means the whole transaction must be aborted.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Aborted(_))
    }

    /// True for errors that signal on-disk or logic corruption.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            Self::ConsistencyViolation(_)
                | Self::CommittedRollback(_)
                | Self::UnknownRecordType { .. }
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
