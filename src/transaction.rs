//! Transaction support.
//!
//! Transactions follow strict two-phase locking: page locks are taken through
//! the buffer pool as pages are fetched and are all released together when
//! the transaction commits or aborts.

pub mod id;
pub mod manager;
pub mod state;

pub use id::{TransactionId, TransactionIdGenerator};
pub use manager::Transaction;
pub use state::TransactionState;
