//! Recovery and crash resilience.
//!
//! - Single-transaction rollback during normal operation
//! - Redo/undo crash recovery over the write-ahead log
//! - Checkpoints that bound how far back redo has to start

pub mod aries;
pub mod checkpoint;

pub use aries::{RecoveryManager, RecoveryStats};
pub use checkpoint::CheckpointManager;
