use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::access::tuple::{Tuple, TupleId};
use crate::concurrency::lock::Permissions;
use crate::storage::buffer::BufferPool;
use crate::storage::disk::{PageManager, StorageFile};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{slotted_page, HeapPage, PageId, PageImage, PageRef, SlottedPage, TableId};
use crate::storage::PAGE_SIZE;
use crate::transaction::TransactionId;

/// A table stored as an unordered collection of slotted pages in one file.
pub struct HeapFile {
    table_id: TableId,
    path: PathBuf,
    pages: Mutex<PageManager>,
}

impl HeapFile {
    /// File name of a table's heap file inside the data directory.
    pub fn file_name(table_id: TableId) -> String {
        format!("table_{}.dat", table_id)
    }

    /// Parses a table id back out of a heap file name.
    pub fn table_id_from_file_name(name: &str) -> Option<TableId> {
        name.strip_prefix("table_")?
            .strip_suffix(".dat")?
            .parse()
            .ok()
    }

    /// Opens (or creates) the heap file for `table_id` under `data_dir`.
    pub fn open(data_dir: &Path, table_id: TableId, sync_writes: bool) -> StorageResult<Self> {
        let path = data_dir.join(Self::file_name(table_id));
        let pages = PageManager::open(&path)?.with_sync_writes(sync_writes);
        Ok(Self {
            table_id,
            path,
            pages: Mutex::new(pages),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn allocate_page(&self) -> StorageResult<PageId> {
        let page_no = self.pages.lock().allocate_page()?;
        Ok(PageId::new(self.table_id, page_no))
    }

    fn insert_into(&self, page: &PageRef, page_id: PageId, tuple: &mut Tuple) -> StorageResult<()> {
        let mut guard = page.write();
        let slot = SlottedPage::open(guard.data_mut(), page_id).insert_tuple(&tuple.data)?;
        tuple.tuple_id = Some(TupleId::new(page_id, slot));
        Ok(())
    }
}

impl StorageFile for HeapFile {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn read_page(&self, page_id: PageId) -> StorageResult<PageRef> {
        let mut data = Box::new([0u8; PAGE_SIZE]);
        self.pages.lock().read_page(page_id, &mut data)?;
        Ok(HeapPage::new(page_id, data).into_ref())
    }

    fn write_page(&self, image: &PageImage) -> StorageResult<()> {
        self.pages.lock().write_page(image.page_id(), image.data())
    }

    fn num_pages(&self) -> StorageResult<u32> {
        self.pages.lock().num_pages()
    }

    /// Probes existing pages under shared locks, releasing every page that
    /// is full and upgrading the first one with room. Appends a fresh page
    /// when none has room. A tuple larger than an empty page is rejected
    /// before anything is locked or allocated.
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &mut Tuple,
    ) -> StorageResult<Vec<PageRef>> {
        let size = tuple.data.len();
        if let Some(err) = slotted_page::oversized(size) {
            return Err(err);
        }
        for page_no in 0..self.num_pages()? {
            let page_id = PageId::new(self.table_id, page_no);
            let held_before = pool.holds_lock(txn, page_id);
            let page = pool.get_page(txn, page_id, Permissions::ReadOnly)?;
            let has_room = SlottedPage::from_data(page.read().data()).has_room_for(size);
            if has_room {
                let page = pool.get_page(txn, page_id, Permissions::ReadWrite)?;
                self.insert_into(&page, page_id, tuple)?;
                return Ok(vec![page]);
            }
            if !held_before {
                pool.release_page(txn, page_id);
            }
        }

        let page_id = self.allocate_page()?;
        let page = pool.get_page(txn, page_id, Permissions::ReadWrite)?;
        self.insert_into(&page, page_id, tuple)?;
        Ok(vec![page])
    }

    fn delete_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &Tuple,
    ) -> StorageResult<Vec<PageRef>> {
        let tuple_id = tuple.tuple_id.ok_or(StorageError::TupleNotPlaced)?;
        if tuple_id.page_id.table_id != self.table_id {
            return Err(StorageError::TableNotFound(tuple_id.page_id.table_id));
        }
        let page = pool.get_page(txn, tuple_id.page_id, Permissions::ReadWrite)?;
        {
            let mut guard = page.write();
            SlottedPage::open(guard.data_mut(), tuple_id.page_id).delete_tuple(tuple_id.slot_id)?;
        }
        Ok(vec![page])
    }

    fn scan(&self, pool: &BufferPool, txn: TransactionId) -> StorageResult<Vec<Tuple>> {
        let mut tuples = Vec::new();
        for page_no in 0..self.num_pages()? {
            let page_id = PageId::new(self.table_id, page_no);
            let page = pool.get_page(txn, page_id, Permissions::ReadOnly)?;
            let guard = page.read();
            let layout = SlottedPage::from_data(guard.data());
            tuples.extend(
                layout
                    .tuples()
                    .into_iter()
                    .map(|(slot, data)| Tuple::with_id(TupleId::new(page_id, slot), data)),
            );
        }
        Ok(tuples)
    }
}
