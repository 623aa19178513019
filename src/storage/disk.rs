//! Disk-facing contracts: the page size and the storage file capability.

pub mod page_manager;

use crate::access::Tuple;
use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageResult;
use crate::storage::page::{PageId, PageImage, PageRef, TableId};
use crate::transaction::TransactionId;

pub use page_manager::PageManager;

/// Bytes per page, for every table and for log images.
pub const PAGE_SIZE: usize = 4096;

/// A table's backing file, as seen by the buffer pool and recovery.
pub trait StorageFile: Send + Sync {
    fn table_id(&self) -> TableId;

    /// Loads a page straight from disk, bypassing the cache.
    fn read_page(&self, page_id: PageId) -> StorageResult<PageRef>;

    /// Writes an image in place. Recovery calls this directly.
    fn write_page(&self, image: &PageImage) -> StorageResult<()>;

    fn num_pages(&self) -> StorageResult<u32>;

    /// Adds a tuple, fetching pages through `pool` on behalf of `txn`.
    /// Sets the tuple's record id and returns every page it mutated.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &mut Tuple,
    ) -> StorageResult<Vec<PageRef>>;

    /// Removes a tuple by its tuple id and returns every page it mutated.
    fn delete_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &Tuple,
    ) -> StorageResult<Vec<PageRef>>;

    /// Reads every live tuple through `pool` under shared locks.
    fn scan(&self, pool: &BufferPool, txn: TransactionId) -> StorageResult<Vec<Tuple>>;
}
