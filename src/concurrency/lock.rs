//! Page-granularity lock manager.
//!
//! Shared/exclusive locks with FIFO wait queues. A blocked request polls the
//! lock table at a fixed interval, re-checking under the table mutex and
//! sleeping outside it, and gives up once it has waited longer than the
//! configured timeout. There is no cycle detection: a deadlock resolves
//! itself when one of the participants times out and aborts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

/// The access a caller asks the buffer pool for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl From<Permissions> for LockMode {
    fn from(permissions: Permissions) -> Self {
        match permissions {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long a request may wait on one page before it fails.
    pub timeout: Duration,
    /// Sleep between re-checks of a blocked request.
    pub poll_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(1),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    txn: TransactionId,
    since: Instant,
}

#[derive(Debug, Default)]
struct LockEntry {
    holders: HashSet<TransactionId>,
    /// True when the (single) holder has the lock exclusively.
    exclusive: bool,
    queue: VecDeque<Waiter>,
}

impl LockEntry {
    /// `txn` already holds a lock at least as strong as `mode`.
    fn covers(&self, txn: TransactionId, mode: LockMode) -> bool {
        self.holders.contains(&txn) && (mode == LockMode::Shared || self.exclusive)
    }

    fn compatible(&self, txn: TransactionId, mode: LockMode) -> bool {
        if self.holders.is_empty() {
            return true;
        }
        if self.holders.len() == 1 && self.holders.contains(&txn) {
            return true;
        }
        mode == LockMode::Shared && !self.exclusive
    }

    fn grant(&mut self, txn: TransactionId, mode: LockMode) {
        self.holders.insert(txn);
        if mode == LockMode::Exclusive {
            self.exclusive = true;
        }
    }

    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.queue.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    entries: HashMap<PageId, LockEntry>,
    /// Pages each transaction is currently queued on.
    waiting: HashMap<TransactionId, HashSet<PageId>>,
}

impl LockTable {
    fn stop_waiting(&mut self, txn: TransactionId, page: PageId) {
        if let Some(pages) = self.waiting.get_mut(&txn) {
            pages.remove(&page);
            if pages.is_empty() {
                self.waiting.remove(&txn);
            }
        }
    }

    fn reclaim_if_idle(&mut self, page: PageId) {
        if self.entries.get(&page).map_or(false, LockEntry::is_idle) {
            self.entries.remove(&page);
        }
    }
}

enum Poll {
    Granted,
    Pending,
    TimedOut,
    Purged,
}

/// Lock table shared by every transaction.
pub struct LockManager {
    config: LockConfig,
    table: Mutex<LockTable>,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            table: Mutex::new(LockTable::default()),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Blocks until `txn` holds `page` in `mode`.
    ///
    /// Fails with `LockTimeout` once the request has been queued longer than
    /// the configured timeout, or with `Aborted` if the transaction was
    /// purged from the queue by [`remove_from_waiting`](Self::remove_from_waiting).
    /// Either way the request leaves no trace in the queue.
    pub fn acquire_lock(
        &self,
        page: PageId,
        txn: TransactionId,
        mode: LockMode,
    ) -> StorageResult<()> {
        {
            let mut guard = self.table.lock();
            let table = &mut *guard;
            let entry = table.entries.entry(page).or_default();
            if entry.covers(txn, mode) {
                return Ok(());
            }
            if !entry.queue.iter().any(|w| w.txn == txn) {
                entry.queue.push_back(Waiter {
                    txn,
                    since: Instant::now(),
                });
                table.waiting.entry(txn).or_default().insert(page);
            }
        }

        loop {
            match self.poll(page, txn, mode) {
                Poll::Granted => return Ok(()),
                Poll::Pending => thread::sleep(self.config.poll_interval),
                Poll::TimedOut => {
                    debug!("{} timed out waiting for {:?} lock on {}", txn, mode, page);
                    return Err(StorageError::LockTimeout { txn, page });
                }
                Poll::Purged => {
                    debug!("{} was removed from the wait queue of {}", txn, page);
                    return Err(StorageError::Aborted(txn));
                }
            }
        }
    }

    fn poll(&self, page: PageId, txn: TransactionId, mode: LockMode) -> Poll {
        let mut table = self.table.lock();
        let outcome = match table.entries.get_mut(&page) {
            None => Poll::Purged,
            Some(entry) => match entry.queue.iter().position(|w| w.txn == txn) {
                None => Poll::Purged,
                Some(0) if entry.compatible(txn, mode) => {
                    entry.queue.pop_front();
                    entry.grant(txn, mode);
                    Poll::Granted
                }
                Some(idx) => {
                    if entry.queue[idx].since.elapsed() >= self.config.timeout {
                        entry.queue.remove(idx);
                        Poll::TimedOut
                    } else {
                        Poll::Pending
                    }
                }
            },
        };

        match outcome {
            Poll::Granted | Poll::TimedOut => table.stop_waiting(txn, page),
            Poll::Purged | Poll::Pending => {}
        }
        if !matches!(outcome, Poll::Pending) {
            table.reclaim_if_idle(page);
        }
        outcome
    }

    /// Drops `txn` from `page`'s holders. The next queued waiter picks the
    /// lock up on its next poll.
    pub fn release_lock(&self, page: PageId, txn: TransactionId) {
        let mut table = self.table.lock();
        if let Some(entry) = table.entries.get_mut(&page) {
            if entry.holders.remove(&txn) && entry.holders.is_empty() {
                entry.exclusive = false;
            }
        }
        table.reclaim_if_idle(page);
    }

    /// Purges `txn` from every wait queue so its blocked request fails fast.
    /// Safe to call any number of times.
    pub fn remove_from_waiting(&self, txn: TransactionId) {
        let mut table = self.table.lock();
        let Some(pages) = table.waiting.remove(&txn) else {
            return;
        };
        for page in pages {
            if let Some(entry) = table.entries.get_mut(&page) {
                entry.queue.retain(|w| w.txn != txn);
            }
            table.reclaim_if_idle(page);
        }
    }

    /// Current holders of `page`, if anyone holds it.
    pub fn lock_held_by(&self, page: PageId) -> Option<HashSet<TransactionId>> {
        let table = self.table.lock();
        table
            .entries
            .get(&page)
            .filter(|entry| !entry.holders.is_empty())
            .map(|entry| entry.holders.clone())
    }

    pub fn holds_lock(&self, txn: TransactionId, page: PageId) -> bool {
        let table = self.table.lock();
        table
            .entries
            .get(&page)
            .map_or(false, |entry| entry.holders.contains(&txn))
    }

    /// The mode `page` is held in, if held.
    pub fn lock_mode(&self, page: PageId) -> Option<LockMode> {
        let table = self.table.lock();
        table
            .entries
            .get(&page)
            .filter(|entry| !entry.holders.is_empty())
            .map(|entry| {
                if entry.exclusive {
                    LockMode::Exclusive
                } else {
                    LockMode::Shared
                }
            })
    }

    /// Number of transactions queued on `page`.
    pub fn queue_len(&self, page: PageId) -> usize {
        let table = self.table.lock();
        table.entries.get(&page).map_or(0, |entry| entry.queue.len())
    }

    pub fn is_waiting(&self, txn: TransactionId) -> bool {
        self.table.lock().waiting.contains_key(&txn)
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}
