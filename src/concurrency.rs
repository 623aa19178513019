//! Concurrency control: strict two-phase page locking.

pub mod lock;

pub use lock::{LockConfig, LockManager, LockMode, Permissions};
