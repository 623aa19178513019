pub mod heap_page;
pub mod slotted_page;

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::PAGE_SIZE;
use crate::transaction::TransactionId;

/// Identifier of a table; each table is backed by one storage file.
pub type TableId = u32;

/// A page address: the owning table plus the page number inside its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({}:{})", self.table_id, self.page_no)
    }
}

/// An immutable snapshot of a page's bytes.
///
/// Images are the unit of page I/O: storage files write them, the WAL logs
/// them as before/after images, and recovery installs them.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    page_id: PageId,
    data: Box<[u8; PAGE_SIZE]>,
}

impl PageImage {
    pub fn new(page_id: PageId, data: Box<[u8; PAGE_SIZE]>) -> Self {
        Self { page_id, data }
    }

    /// An all-zero image, the content of a freshly allocated page.
    pub fn zeroed(page_id: PageId) -> Self {
        Self::new(page_id, Box::new([0u8; PAGE_SIZE]))
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn into_data(self) -> Box<[u8; PAGE_SIZE]> {
        self.data
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Dumping 4KB of bytes is never useful in a panic message.
        let used = self.data.iter().filter(|&&b| b != 0).count();
        f.debug_struct("PageImage")
            .field("page_id", &self.page_id)
            .field("non_zero_bytes", &used)
            .finish()
    }
}

/// The page capability the buffer pool and recovery work against.
pub trait Page: Send + Sync {
    fn page_id(&self) -> PageId;

    /// The transaction that last dirtied this page, if it is dirty.
    fn is_dirty(&self) -> Option<TransactionId>;

    fn mark_dirty(&mut self, dirty: bool, txn: TransactionId);

    /// Snapshot taken at the last `set_before_image`.
    fn before_image(&self) -> PageImage;

    /// Make the current bytes the new undo base.
    fn set_before_image(&mut self);

    fn data(&self) -> &[u8; PAGE_SIZE];

    fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE];

    /// Snapshot of the current bytes.
    fn image(&self) -> PageImage {
        PageImage::new(self.page_id(), Box::new(*self.data()))
    }
}

/// A cached page shared between the buffer pool and its callers.
pub type PageRef = Arc<RwLock<dyn Page>>;

pub use heap_page::HeapPage;
pub use slotted_page::SlottedPage;
