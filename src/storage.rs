//! Storage layer for kestreldb.
//!
//! Key components:
//!
//! - **Page**: fixed-size (4KB) blocks of data, the unit of I/O, locking and
//!   logging
//! - **PageManager**: reads and writes pages of one file
//! - **BufferPool**: bounded LRU cache of pages, locked per transaction
//! - **WalManager**: the write-ahead log every page write is preceded by

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod wal;

pub use buffer::{BufferPool, BufferPoolGuard};
pub use disk::{PageManager, StorageFile, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::{HeapPage, Page, PageId, PageImage, PageRef, TableId};
pub use wal::{WalConfig, WalManager};
