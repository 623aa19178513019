//! WAL manager implementation.
//!
//! All log state sits behind one mutex. Callers that need to read and append
//! under a single exclusive section (recovery) take a [`WalGuard`] with
//! [`WalManager::lock`]; everything else uses the convenience methods, which
//! lock per call.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::PathBuf;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use super::record::{LogRecord, LogRecordKind, HEADER_SIZE, NO_CHECKPOINT};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageImage;
use crate::transaction::TransactionId;

/// WAL manager configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Path of the log file.
    pub path: PathBuf,
    /// Whether `force()` fsyncs after writing the buffer.
    pub sync_on_force: bool,
}

impl WalConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_sync_on_force(mut self, sync_on_force: bool) -> Self {
        self.sync_on_force = sync_on_force;
        self
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        WalConfig {
            path: PathBuf::from("wal.log"),
            sync_on_force: true,
        }
    }
}

struct WalState {
    /// Write handle.
    file: File,
    /// Independent handle for reads so seeks never disturb appends.
    reader: File,
    /// Encoded records not yet written to `file`.
    buffer: Vec<u8>,
    /// Bytes of the log that are in the file.
    flushed_end: u64,
    /// Logical end of the log, buffered bytes included.
    end: u64,
    last_checkpoint: Option<u64>,
    active: HashSet<TransactionId>,
    max_txn: u64,
    sync_on_force: bool,
}

impl WalState {
    fn track(&mut self, record: &LogRecord) {
        self.max_txn = self.max_txn.max(record.txn.value());
        match &record.kind {
            LogRecordKind::Begin => {
                self.active.insert(record.txn);
            }
            LogRecordKind::Commit | LogRecordKind::Abort => {
                self.active.remove(&record.txn);
            }
            LogRecordKind::Checkpoint { active } => {
                self.active.extend(active.iter().copied());
            }
            LogRecordKind::Update { .. } | LogRecordKind::Clr { .. } => {}
        }
    }

    fn flush_buffer(&mut self) -> StorageResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.flushed_end))?;
        self.file.write_all(&self.buffer)?;
        self.flushed_end = self.end;
        self.buffer.clear();
        Ok(())
    }
}

/// Append-only log file with backward traversal.
pub struct WalManager {
    config: WalConfig,
    state: Mutex<WalState>,
}

impl WalManager {
    /// Opens the log at `config.path`, creating it if needed.
    ///
    /// An existing log is scanned forward to rebuild the active transaction
    /// set. An incomplete record at the tail is a torn write from a crash and
    /// is cut off; any other undecodable record is a consistency violation.
    pub fn open(config: WalConfig) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&config.path)?;
        let reader = File::open(&config.path)?;

        let mut len = file.metadata()?.len();
        if len < HEADER_SIZE {
            if len > 0 {
                warn!("WAL header is incomplete ({} bytes), reinitializing", len);
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_i64::<BigEndian>(NO_CHECKPOINT)?;
            file.sync_all()?;
            len = HEADER_SIZE;
        }

        (&reader).seek(SeekFrom::Start(0))?;
        let header = (&reader).read_i64::<BigEndian>()?;
        let last_checkpoint = if header == NO_CHECKPOINT {
            None
        } else if header >= HEADER_SIZE as i64 && (header as u64) < len {
            Some(header as u64)
        } else {
            return Err(StorageError::ConsistencyViolation(format!(
                "WAL header points at offset {} outside a {} byte log",
                header, len
            )));
        };

        let mut state = WalState {
            file,
            reader,
            buffer: Vec::new(),
            flushed_end: HEADER_SIZE,
            end: HEADER_SIZE,
            last_checkpoint,
            active: HashSet::new(),
            max_txn: 0,
            sync_on_force: config.sync_on_force,
        };

        let mut offset = HEADER_SIZE;
        let mut seen = Vec::new();
        {
            let mut buffered = BufReader::new(&state.reader);
            buffered.seek(SeekFrom::Start(offset))?;
            while offset < len {
                match LogRecord::read_from(&mut buffered, offset) {
                    Ok(record) => {
                        offset = record.next_offset();
                        seen.push(record);
                    }
                    Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        warn!(
                            "Truncating torn WAL tail at offset {} ({} bytes dropped)",
                            offset,
                            len - offset
                        );
                        state.file.set_len(offset)?;
                        state.file.sync_all()?;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        for record in &seen {
            state.track(record);
        }
        state.flushed_end = offset;
        state.end = offset;

        debug!(
            "Opened WAL {:?}: end={}, active={}, max txn={}",
            config.path,
            offset,
            state.active.len(),
            state.max_txn
        );

        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Takes the log's exclusive section.
    pub fn lock(&self) -> WalGuard<'_> {
        WalGuard {
            state: self.state.lock(),
        }
    }

    pub fn log_begin(&self, txn: TransactionId) -> StorageResult<u64> {
        self.lock().log_begin(txn)
    }

    pub fn log_commit(&self, txn: TransactionId) -> StorageResult<u64> {
        self.lock().log_commit(txn)
    }

    pub fn log_abort(&self, txn: TransactionId) -> StorageResult<u64> {
        self.lock().log_abort(txn)
    }

    pub fn log_write(
        &self,
        txn: TransactionId,
        before: PageImage,
        after: PageImage,
    ) -> StorageResult<u64> {
        self.lock().log_write(txn, before, after)
    }

    pub fn log_clr(&self, txn: TransactionId, after: PageImage) -> StorageResult<u64> {
        self.lock().log_clr(txn, after)
    }

    pub fn log_checkpoint(&self, active: &[TransactionId]) -> StorageResult<u64> {
        self.lock().log_checkpoint(active)
    }

    pub fn force(&self) -> StorageResult<()> {
        self.lock().force()
    }

    /// Every record in log order.
    pub fn records(&self) -> StorageResult<Vec<LogRecord>> {
        self.lock().records()
    }

    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.lock().active_transactions()
    }

    pub fn max_transaction_id(&self) -> u64 {
        self.state.lock().max_txn
    }

    pub fn last_checkpoint(&self) -> Option<u64> {
        self.state.lock().last_checkpoint
    }

    pub fn end_offset(&self) -> u64 {
        self.state.lock().end
    }
}

/// Exclusive access to the log for the lifetime of the guard.
pub struct WalGuard<'a> {
    state: MutexGuard<'a, WalState>,
}

impl WalGuard<'_> {
    fn append(&mut self, txn: TransactionId, kind: LogRecordKind) -> StorageResult<u64> {
        let offset = self.state.end;
        let record = LogRecord::new(offset, txn, kind);
        record.write_to(&mut self.state.buffer)?;
        self.state.end = record.next_offset();
        self.state.track(&record);
        Ok(offset)
    }

    pub fn log_begin(&mut self, txn: TransactionId) -> StorageResult<u64> {
        self.append(txn, LogRecordKind::Begin)
    }

    /// Appends COMMIT and forces it.
    pub fn log_commit(&mut self, txn: TransactionId) -> StorageResult<u64> {
        let offset = self.append(txn, LogRecordKind::Commit)?;
        self.force()?;
        Ok(offset)
    }

    /// Appends ABORT and forces it.
    pub fn log_abort(&mut self, txn: TransactionId) -> StorageResult<u64> {
        let offset = self.append(txn, LogRecordKind::Abort)?;
        self.force()?;
        Ok(offset)
    }

    pub fn log_write(
        &mut self,
        txn: TransactionId,
        before: PageImage,
        after: PageImage,
    ) -> StorageResult<u64> {
        self.append(txn, LogRecordKind::Update { before, after })
    }

    pub fn log_clr(&mut self, txn: TransactionId, after: PageImage) -> StorageResult<u64> {
        self.append(txn, LogRecordKind::Clr { after })
    }

    /// Appends a checkpoint listing `active`, points the header at it and
    /// forces.
    pub fn log_checkpoint(&mut self, active: &[TransactionId]) -> StorageResult<u64> {
        let offset = self.append(
            TransactionId::INVALID,
            LogRecordKind::Checkpoint {
                active: active.to_vec(),
            },
        )?;
        self.state.flush_buffer()?;
        self.state.file.seek(SeekFrom::Start(0))?;
        self.state.file.write_i64::<BigEndian>(offset as i64)?;
        self.state.last_checkpoint = Some(offset);
        self.sync()?;
        debug!("Checkpoint at offset {} with {} active", offset, active.len());
        Ok(offset)
    }

    /// Writes buffered records to the file and makes them durable.
    pub fn force(&mut self) -> StorageResult<()> {
        self.state.flush_buffer()?;
        self.sync()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.sync_on_force {
            self.state.file.sync_data()?;
        }
        Ok(())
    }

    /// Decodes the record starting at `offset`.
    pub fn read_record_at(&mut self, offset: u64) -> StorageResult<LogRecord> {
        if offset < HEADER_SIZE || offset >= self.state.end {
            return Err(StorageError::ConsistencyViolation(format!(
                "no log record at offset {} (log ends at {})",
                offset, self.state.end
            )));
        }
        self.state.flush_buffer()?;
        let mut reader = &self.state.reader;
        reader.seek(SeekFrom::Start(offset))?;
        LogRecord::read_from(&mut BufReader::new(reader), offset)
    }

    /// The record that ends exactly at `end`, found through its trailer, or
    /// `None` when `end` is the start of the log.
    pub fn record_before(&mut self, end: u64) -> StorageResult<Option<LogRecord>> {
        if end <= HEADER_SIZE {
            return Ok(None);
        }
        if end > self.state.end {
            return Err(StorageError::ConsistencyViolation(format!(
                "offset {} is past the end of the log ({})",
                end, self.state.end
            )));
        }
        self.state.flush_buffer()?;
        let mut reader = &self.state.reader;
        reader.seek(SeekFrom::Start(end - 8))?;
        let start = reader.read_i64::<BigEndian>()?;
        if start < HEADER_SIZE as i64 || start as u64 >= end {
            return Err(StorageError::ConsistencyViolation(format!(
                "trailer before offset {} points at {}",
                end, start
            )));
        }

        let record = self.read_record_at(start as u64)?;
        if record.next_offset() != end {
            return Err(StorageError::ConsistencyViolation(format!(
                "record at {} ends at {}, expected {}",
                start,
                record.next_offset(),
                end
            )));
        }
        Ok(Some(record))
    }

    pub fn records(&mut self) -> StorageResult<Vec<LogRecord>> {
        let mut records = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < self.state.end {
            let record = self.read_record_at(offset)?;
            offset = record.next_offset();
            records.push(record);
        }
        Ok(records)
    }

    /// Transactions that have begun but not yet committed or aborted.
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        let mut active: Vec<_> = self.state.active.iter().copied().collect();
        active.sort();
        active
    }

    pub fn last_checkpoint(&self) -> Option<u64> {
        self.state.last_checkpoint
    }

    pub fn end_offset(&self) -> u64 {
        self.state.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageId;
    use crate::storage::PAGE_SIZE;
    use anyhow::Result;
    use tempfile::tempdir;

    fn image(fill: u8) -> PageImage {
        PageImage::new(PageId::new(1, 0), Box::new([fill; PAGE_SIZE]))
    }

    fn config(dir: &std::path::Path) -> WalConfig {
        WalConfig::new(dir.join("wal.log")).with_sync_on_force(false)
    }

    #[test]
    fn test_new_log_has_header_only() -> Result<()> {
        let dir = tempdir()?;
        let wal = WalManager::open(config(dir.path()))?;

        assert_eq!(wal.end_offset(), HEADER_SIZE);
        assert_eq!(wal.last_checkpoint(), None);
        assert!(wal.records()?.is_empty());
        assert_eq!(std::fs::metadata(dir.path().join("wal.log"))?.len(), HEADER_SIZE);
        Ok(())
    }

    #[test]
    fn test_append_and_read_back() -> Result<()> {
        let dir = tempdir()?;
        let wal = WalManager::open(config(dir.path()))?;
        let t1 = TransactionId::new(1);

        let begin = wal.log_begin(t1)?;
        let update = wal.log_write(t1, image(0), image(1))?;
        wal.log_commit(t1)?;

        assert_eq!(begin, HEADER_SIZE);
        let records = wal.records()?;
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].offset, update);
        assert!(matches!(records[2].kind, LogRecordKind::Commit));
        assert!(wal.active_transactions().is_empty());
        Ok(())
    }

    #[test]
    fn test_backward_walk_mirrors_forward_walk() -> Result<()> {
        let dir = tempdir()?;
        let wal = WalManager::open(config(dir.path()))?;
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);

        wal.log_begin(t1)?;
        wal.log_begin(t2)?;
        wal.log_write(t1, image(0), image(1))?;
        wal.log_clr(t2, image(2))?;
        wal.log_checkpoint(&[t1, t2])?;
        wal.log_abort(t2)?;

        let forward = wal.records()?;
        let mut backward = Vec::new();
        let mut guard = wal.lock();
        let mut end = guard.end_offset();
        while let Some(record) = guard.record_before(end)? {
            end = record.offset;
            backward.push(record);
        }
        backward.reverse();

        assert_eq!(forward, backward);
        Ok(())
    }

    #[test]
    fn test_reopen_rebuilds_state() -> Result<()> {
        let dir = tempdir()?;
        {
            let wal = WalManager::open(config(dir.path()))?;
            wal.log_begin(TransactionId::new(3))?;
            wal.log_begin(TransactionId::new(9))?;
            wal.log_commit(TransactionId::new(9))?;
            wal.log_checkpoint(&[TransactionId::new(3)])?;
        }

        let wal = WalManager::open(config(dir.path()))?;
        assert_eq!(wal.active_transactions(), vec![TransactionId::new(3)]);
        assert_eq!(wal.max_transaction_id(), 9);
        let checkpoint = wal.last_checkpoint().expect("checkpoint recorded");
        let record = wal.lock().read_record_at(checkpoint)?;
        assert_eq!(
            record.kind,
            LogRecordKind::Checkpoint {
                active: vec![TransactionId::new(3)]
            }
        );
        Ok(())
    }

    #[test]
    fn test_torn_tail_is_truncated() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("wal.log");
        let intact_end = {
            let wal = WalManager::open(config(dir.path()))?;
            wal.log_begin(TransactionId::new(1))?;
            let end = wal.end_offset();
            wal.log_write(TransactionId::new(1), image(0), image(1))?;
            wal.force()?;
            end
        };

        let full = std::fs::metadata(&path)?.len();
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(full - 100)?;

        let wal = WalManager::open(config(dir.path()))?;
        assert_eq!(wal.end_offset(), intact_end);
        assert_eq!(wal.records()?.len(), 1);
        assert_eq!(std::fs::metadata(&path)?.len(), intact_end);
        Ok(())
    }

    #[test]
    fn test_unflushed_records_are_readable() -> Result<()> {
        let dir = tempdir()?;
        let wal = WalManager::open(config(dir.path()))?;
        let offset = wal.log_begin(TransactionId::new(5))?;

        let record = wal.lock().read_record_at(offset)?;
        assert_eq!(record.txn, TransactionId::new(5));
        Ok(())
    }

    #[test]
    fn test_read_past_end_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let wal = WalManager::open(config(dir.path()))?;
        let err = wal.lock().read_record_at(HEADER_SIZE).unwrap_err();
        assert!(err.is_consistency_violation());
        Ok(())
    }
}
