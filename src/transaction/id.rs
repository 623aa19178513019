//! Transaction ID generation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Never issued by the generator; tags log records that belong to no
    /// transaction, such as checkpoints.
    pub const INVALID: TransactionId = TransactionId(0);

    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

/// A thread-safe transaction ID generator.
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    /// Creates a generator starting from 1.
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Creates a generator whose first id is `last + 1`. Used on restart so
    /// new ids never collide with ids already in the log.
    pub fn starting_after(last: u64) -> Self {
        Self {
            next_id: AtomicU64::new(last + 1),
        }
    }

    pub fn next(&self) -> TransactionId {
        TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The most recently issued id, or `INVALID` if none yet.
    pub fn current(&self) -> TransactionId {
        let id = self.next_id.load(Ordering::SeqCst);
        TransactionId::new(id.saturating_sub(1))
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
