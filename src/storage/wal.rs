//! Write-ahead log.
//!
//! A single append-only file: an 8-byte header holding the offset of the last
//! checkpoint, followed by offset-chained records (see [`record`]). Appends
//! are buffered in memory and only reach the file on `force()` or before a
//! read.

pub mod manager;
pub mod record;

pub use manager::{WalConfig, WalGuard, WalManager};
pub use record::{LogRecord, LogRecordKind};
