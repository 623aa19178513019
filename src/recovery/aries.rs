//! Rollback and crash recovery over the physical (page image) log.
//!
//! Recovery runs in two strictly sequential phases:
//! 1. Redo: scan forward from the last checkpoint (or the start of the log),
//!    reinstalling the after image of every UPDATE and CLR and tracking which
//!    transactions never finished.
//! 2. Undo: walk backward from the end of the log, reinstalling before images
//!    for every unfinished transaction and logging a CLR for each step, then
//!    append an ABORT per undone transaction.
//!
//! Both phases hold the buffer pool and log sections for their entire run.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::catalog::Catalog;
use crate::storage::buffer::{BufferPool, BufferPoolGuard};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageImage;
use crate::storage::wal::record::HEADER_SIZE;
use crate::storage::wal::{LogRecordKind, WalGuard, WalManager};
use crate::transaction::TransactionId;

/// Recovery statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records read by the redo pass.
    pub records_scanned: usize,
    /// UPDATE and CLR images reinstalled by redo.
    pub pages_redone: usize,
    /// UPDATE records undone, one CLR each.
    pub pages_undone: usize,
    /// Transactions found unfinished and rolled back.
    pub losers: Vec<TransactionId>,
}

pub struct RecoveryManager {
    pool: Arc<BufferPool>,
    wal: Arc<WalManager>,
    catalog: Arc<Catalog>,
}

impl RecoveryManager {
    pub fn new(pool: Arc<BufferPool>, wal: Arc<WalManager>) -> Self {
        let catalog = Arc::clone(pool.catalog());
        Self { pool, wal, catalog }
    }

    /// Undoes every logged update of `txn`, newest first, stopping at its
    /// BEGIN. Returns the number of updates undone.
    ///
    /// Every page `txn` touched is dropped from the cache before the pool
    /// section is released, so none of its unlogged changes can be written
    /// back once it is rolled back.
    ///
    /// Fails with `CommittedRollback` if the scan runs into `txn`'s COMMIT.
    /// Does not log the ABORT itself.
    pub fn rollback(&self, txn: TransactionId) -> StorageResult<usize> {
        let mut pool = self.pool.lock();
        let mut wal = self.wal.lock();
        let undone = self.undo(&mut pool, &mut wal, HashSet::from([txn]))?;
        pool.discard_pages_of(txn);
        debug!("Rolled back {} ({} updates)", txn, undone);
        Ok(undone)
    }

    /// Brings the data files to a state reflecting exactly the committed
    /// transactions in the log. Safe to run any number of times.
    pub fn recover(&self) -> StorageResult<RecoveryStats> {
        let mut pool = self.pool.lock();
        let mut wal = self.wal.lock();
        let mut stats = RecoveryStats::default();

        let start = wal.last_checkpoint().unwrap_or(HEADER_SIZE);
        let end = wal.end_offset();
        info!("Recovery: redo from offset {} to {}", start, end);

        let mut losers = HashSet::new();
        let mut offset = start;
        while offset < end {
            let record = wal.read_record_at(offset)?;
            offset = record.next_offset();
            stats.records_scanned += 1;
            match &record.kind {
                LogRecordKind::Checkpoint { active } => losers.extend(active.iter().copied()),
                LogRecordKind::Begin => {
                    losers.insert(record.txn);
                }
                LogRecordKind::Commit | LogRecordKind::Abort => {
                    losers.remove(&record.txn);
                }
                LogRecordKind::Update { after, .. } | LogRecordKind::Clr { after } => {
                    self.install(&mut pool, after)?;
                    stats.pages_redone += 1;
                }
            }
        }

        let mut losers: Vec<_> = losers.into_iter().collect();
        losers.sort();
        info!(
            "Recovery: redo reinstalled {} pages from {} records; {} losers",
            stats.pages_redone,
            stats.records_scanned,
            losers.len()
        );

        if !losers.is_empty() {
            stats.pages_undone =
                self.undo(&mut pool, &mut wal, losers.iter().copied().collect())?;
            for &txn in &losers {
                wal.log_abort(txn)?;
            }
            info!(
                "Recovery: undid {} updates of {:?}",
                stats.pages_undone,
                losers.iter().map(|t| t.value()).collect::<Vec<_>>()
            );
        }
        stats.losers = losers;
        Ok(stats)
    }

    /// Backward pass shared by rollback and recovery.
    fn undo(
        &self,
        pool: &mut BufferPoolGuard<'_>,
        wal: &mut WalGuard<'_>,
        mut remaining: HashSet<TransactionId>,
    ) -> StorageResult<usize> {
        let mut undone = 0;
        let mut end = wal.end_offset();
        while !remaining.is_empty() {
            let Some(record) = wal.record_before(end)? else {
                break;
            };
            end = record.offset;
            if !remaining.contains(&record.txn) {
                continue;
            }
            match &record.kind {
                LogRecordKind::Update { before, .. } => {
                    self.install(pool, before)?;
                    wal.log_clr(record.txn, before.clone())?;
                    undone += 1;
                }
                LogRecordKind::Begin => {
                    remaining.remove(&record.txn);
                }
                LogRecordKind::Commit => return Err(StorageError::CommittedRollback(record.txn)),
                LogRecordKind::Abort => {
                    warn!("{} already has an ABORT at offset {}", record.txn, record.offset);
                    remaining.remove(&record.txn);
                }
                LogRecordKind::Clr { .. } | LogRecordKind::Checkpoint { .. } => {}
            }
        }

        if !remaining.is_empty() {
            warn!("No BEGIN record found for {:?}", remaining);
        }
        wal.force()?;
        Ok(undone)
    }

    /// Writes `image` straight to its file and drops any cached copy.
    fn install(&self, pool: &mut BufferPoolGuard<'_>, image: &PageImage) -> StorageResult<()> {
        let page_id = image.page_id();
        let file = self.catalog.storage_file_for(page_id.table_id)?;
        file.write_page(image)?;
        pool.discard_page(page_id);
        Ok(())
    }
}
