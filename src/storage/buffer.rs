pub mod lru;
pub mod replacer;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::access::Tuple;
use crate::catalog::Catalog;
use crate::concurrency::lock::{LockManager, LockMode, Permissions};
use crate::storage::error::StorageResult;
use crate::storage::page::{PageId, PageRef, TableId};
use crate::storage::wal::WalManager;
use crate::transaction::TransactionId;
use lru::LruReplacer;
use replacer::Replacer;

/// Number of pages cached when no capacity is configured.
pub const DEFAULT_POOL_CAPACITY: usize = 50;

struct PoolState {
    pages: HashMap<PageId, PageRef>,
    replacer: Box<dyn Replacer>,
    /// Pages each live transaction has fetched.
    touched: HashMap<TransactionId, HashSet<PageId>>,
}

/// Bounded page cache with page-level locking and write-ahead flushing.
///
/// Locks are taken before the pool section, never inside it. A dirty page
/// only reaches its file after its UPDATE record has been forced to the log,
/// which is also what lets eviction steal uncommitted pages.
pub struct BufferPool {
    capacity: usize,
    lock_manager: Arc<LockManager>,
    catalog: Arc<Catalog>,
    wal: Arc<WalManager>,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(
        capacity: usize,
        lock_manager: Arc<LockManager>,
        catalog: Arc<Catalog>,
        wal: Arc<WalManager>,
    ) -> Self {
        Self::with_replacer(
            capacity,
            lock_manager,
            catalog,
            wal,
            Box::new(LruReplacer::new()),
        )
    }

    pub fn with_replacer(
        capacity: usize,
        lock_manager: Arc<LockManager>,
        catalog: Arc<Catalog>,
        wal: Arc<WalManager>,
        replacer: Box<dyn Replacer>,
    ) -> Self {
        Self {
            capacity: capacity.max(1),
            lock_manager,
            catalog,
            wal,
            state: Mutex::new(PoolState {
                pages: HashMap::with_capacity(capacity),
                replacer,
                touched: HashMap::new(),
            }),
        }
    }

    /// Takes the pool's exclusive section.
    pub fn lock(&self) -> BufferPoolGuard<'_> {
        BufferPoolGuard {
            pool: self,
            state: self.state.lock(),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Locks `page_id` for `txn` and returns the cached page, loading it
    /// (and evicting the least recently used page if full) on a miss.
    ///
    /// Blocks while the lock is unavailable; fails with `LockTimeout` or
    /// `Aborted` if it cannot be granted.
    pub fn get_page(
        &self,
        txn: TransactionId,
        page_id: PageId,
        permissions: Permissions,
    ) -> StorageResult<PageRef> {
        self.lock_manager
            .acquire_lock(page_id, txn, LockMode::from(permissions))?;

        let mut pool = self.lock();
        pool.state.touched.entry(txn).or_default().insert(page_id);
        if let Some(page) = pool.state.pages.get(&page_id).cloned() {
            pool.state.replacer.record_access(page_id);
            return Ok(page);
        }

        let file = self.catalog.storage_file_for(page_id.table_id)?;
        let page = file.read_page(page_id)?;
        pool.cache(page_id, page.clone())?;
        Ok(page)
    }

    /// Releases `txn`'s lock on a page it only inspected. Must not be used
    /// on a page the transaction has modified.
    pub fn release_page(&self, txn: TransactionId, page_id: PageId) {
        {
            let mut pool = self.lock();
            if let Some(pages) = pool.state.touched.get_mut(&txn) {
                pages.remove(&page_id);
            }
        }
        self.lock_manager.release_lock(page_id, txn);
    }

    pub fn holds_lock(&self, txn: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds_lock(txn, page_id)
    }

    pub fn insert_tuple(
        &self,
        txn: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> StorageResult<()> {
        let file = self.catalog.storage_file_for(table_id)?;
        let pages = file.insert_tuple(self, txn, tuple)?;
        self.lock().cache_dirty(txn, pages)
    }

    pub fn delete_tuple(
        &self,
        txn: TransactionId,
        table_id: TableId,
        tuple: &Tuple,
    ) -> StorageResult<()> {
        let file = self.catalog.storage_file_for(table_id)?;
        let pages = file.delete_tuple(self, txn, tuple)?;
        self.lock().cache_dirty(txn, pages)
    }

    pub fn flush_page(&self, page_id: PageId) -> StorageResult<()> {
        self.lock().flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> StorageResult<()> {
        self.lock().flush_all_pages()
    }

    /// Flushes every dirty page `txn` has touched.
    pub fn flush_pages(&self, txn: TransactionId) -> StorageResult<()> {
        self.lock().flush_pages(txn)
    }

    pub fn discard_page(&self, page_id: PageId) {
        self.lock().discard_page(page_id)
    }

    /// Ends `txn` in the pool.
    ///
    /// On commit its touched pages are flushed and their before images reset
    /// to the committed bytes; on abort they are dropped from the cache.
    /// Either way every lock it holds or waits for is released.
    pub fn transaction_complete(&self, txn: TransactionId, commit: bool) -> StorageResult<()> {
        let (touched, result) = {
            let mut pool = self.lock();
            let touched = pool.state.touched.remove(&txn).unwrap_or_default();
            let result = if commit {
                pool.finish_commit(&touched)
            } else {
                for &page_id in &touched {
                    pool.discard_page(page_id);
                }
                Ok(())
            };
            (touched, result)
        };

        self.lock_manager.remove_from_waiting(txn);
        for page_id in touched {
            self.lock_manager.release_lock(page_id, txn);
        }
        debug!(
            "{} completed ({})",
            txn,
            if commit { "commit" } else { "abort" }
        );
        result
    }

    pub fn len(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().pages.contains_key(&page_id)
    }

    /// Cached pages, least recently used first.
    pub fn cached_page_ids(&self) -> Vec<PageId> {
        self.state.lock().replacer.eviction_order()
    }

    pub fn pages_touched_by(&self, txn: TransactionId) -> HashSet<PageId> {
        self.state
            .lock()
            .touched
            .get(&txn)
            .cloned()
            .unwrap_or_default()
    }
}

/// Exclusive access to the page cache for the lifetime of the guard.
pub struct BufferPoolGuard<'a> {
    pool: &'a BufferPool,
    state: MutexGuard<'a, PoolState>,
}

impl BufferPoolGuard<'_> {
    /// Drops a page from the cache without writing it.
    pub fn discard_page(&mut self, page_id: PageId) {
        if self.state.pages.remove(&page_id).is_some() {
            self.state.replacer.remove(page_id);
        }
    }

    /// Drops every cached page `txn` has touched without writing it. The
    /// touched set itself is kept so completion still releases its locks.
    pub fn discard_pages_of(&mut self, txn: TransactionId) -> usize {
        let touched: Vec<PageId> = match self.state.touched.get(&txn) {
            Some(pages) => pages.iter().copied().collect(),
            None => return 0,
        };
        let mut dropped = 0;
        for page_id in touched {
            if self.state.pages.contains_key(&page_id) {
                self.discard_page(page_id);
                dropped += 1;
            }
        }
        dropped
    }

    pub fn flush_page(&mut self, page_id: PageId) -> StorageResult<()> {
        match self.state.pages.get(&page_id).cloned() {
            Some(page) => self.write_back(&page),
            None => Ok(()),
        }
    }

    pub fn flush_all_pages(&mut self) -> StorageResult<()> {
        let pages: Vec<PageRef> = self.state.pages.values().cloned().collect();
        for page in &pages {
            self.write_back(page)?;
        }
        Ok(())
    }

    pub fn flush_pages(&mut self, txn: TransactionId) -> StorageResult<()> {
        let touched = match self.state.touched.get(&txn) {
            Some(pages) => pages.iter().copied().collect::<Vec<_>>(),
            None => return Ok(()),
        };
        for page_id in touched {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.pages.is_empty()
    }

    fn finish_commit(&mut self, touched: &HashSet<PageId>) -> StorageResult<()> {
        for &page_id in touched {
            if let Some(page) = self.state.pages.get(&page_id).cloned() {
                self.write_back(&page)?;
                page.write().set_before_image();
            }
        }
        Ok(())
    }

    /// Marks `pages` dirty under `txn` and makes sure the cache holds them.
    fn cache_dirty(&mut self, txn: TransactionId, pages: Vec<PageRef>) -> StorageResult<()> {
        for page in pages {
            let page_id = {
                let mut guard = page.write();
                guard.mark_dirty(true, txn);
                guard.page_id()
            };
            self.state.touched.entry(txn).or_default().insert(page_id);
            match self.state.pages.get(&page_id) {
                Some(cached) if Arc::ptr_eq(cached, &page) => {
                    self.state.replacer.record_access(page_id);
                }
                Some(_) => {
                    self.state.pages.insert(page_id, page);
                    self.state.replacer.record_access(page_id);
                }
                None => self.cache(page_id, page)?,
            }
        }
        Ok(())
    }

    fn cache(&mut self, page_id: PageId, page: PageRef) -> StorageResult<()> {
        if self.state.pages.len() >= self.pool.capacity {
            self.evict_page()?;
        }
        self.state.pages.insert(page_id, page);
        self.state.replacer.record_access(page_id);
        Ok(())
    }

    fn evict_page(&mut self) -> StorageResult<()> {
        let Some(victim) = self.state.replacer.victim() else {
            return Ok(());
        };
        if let Some(page) = self.state.pages.get(&victim).cloned() {
            self.write_back(&page)?;
        }
        debug!("Evicting {}", victim);
        self.discard_page(victim);
        Ok(())
    }

    /// Logs, forces, then writes a dirty page. Clean pages are left alone.
    fn write_back(&mut self, page: &PageRef) -> StorageResult<()> {
        let mut page = page.write();
        let Some(txn) = page.is_dirty() else {
            return Ok(());
        };
        let page_id = page.page_id();
        let file = self.pool.catalog.storage_file_for(page_id.table_id)?;
        let after = page.image();
        {
            let mut wal = self.pool.wal.lock();
            wal.log_write(txn, page.before_image(), after.clone())?;
            wal.force()?;
        }
        file.write_page(&after)?;
        page.mark_dirty(false, txn);
        Ok(())
    }
}
