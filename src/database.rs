use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::access::{HeapFile, Tuple};
use crate::catalog::Catalog;
use crate::concurrency::lock::{LockConfig, LockManager};
use crate::recovery::{CheckpointManager, RecoveryManager, RecoveryStats};
use crate::storage::buffer::{BufferPool, DEFAULT_POOL_CAPACITY};
use crate::storage::error::StorageResult;
use crate::storage::page::TableId;
use crate::storage::wal::{WalConfig, WalManager};
use crate::transaction::{Transaction, TransactionIdGenerator};

/// Name of the log file inside the data directory.
pub const WAL_FILE_NAME: &str = "wal.log";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub data_dir: PathBuf,
    /// Maximum number of cached pages.
    pub pool_capacity: usize,
    pub lock: LockConfig,
    /// fsync the log on force and data files on every page write.
    pub sync_on_force: bool,
    /// Run crash recovery while opening.
    pub recover_on_open: bool,
}

impl DatabaseConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_pool_capacity(mut self, pool_capacity: usize) -> Self {
        self.pool_capacity = pool_capacity;
        self
    }

    pub fn with_lock_config(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_sync_on_force(mut self, sync_on_force: bool) -> Self {
        self.sync_on_force = sync_on_force;
        self
    }

    pub fn with_recover_on_open(mut self, recover_on_open: bool) -> Self {
        self.recover_on_open = recover_on_open;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./kestreldb_data"),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            lock: LockConfig::default(),
            sync_on_force: true,
            recover_on_open: true,
        }
    }
}

/// High-level interface that wires every layer together.
pub struct Database {
    config: DatabaseConfig,
    catalog: Arc<Catalog>,
    lock_manager: Arc<LockManager>,
    wal: Arc<WalManager>,
    pool: Arc<BufferPool>,
    recovery: Arc<RecoveryManager>,
    checkpoints: CheckpointManager,
    txn_ids: TransactionIdGenerator,
    last_recovery: Option<RecoveryStats>,
}

impl Database {
    /// Opens the database in `config.data_dir`, creating the directory if
    /// needed, registering every table file found there and, unless
    /// disabled, running crash recovery before returning.
    pub fn open(config: DatabaseConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let wal = Arc::new(WalManager::open(
            WalConfig::new(config.data_dir.join(WAL_FILE_NAME))
                .with_sync_on_force(config.sync_on_force),
        )?);

        let catalog = Arc::new(Catalog::new());
        for table_id in Self::existing_tables(&config.data_dir)? {
            catalog.add_table(Arc::new(HeapFile::open(
                &config.data_dir,
                table_id,
                config.sync_on_force,
            )?));
        }

        let lock_manager = Arc::new(LockManager::new(config.lock.clone()));
        let pool = Arc::new(BufferPool::new(
            config.pool_capacity,
            lock_manager.clone(),
            catalog.clone(),
            wal.clone(),
        ));
        let recovery = Arc::new(RecoveryManager::new(pool.clone(), wal.clone()));
        let checkpoints = CheckpointManager::new(pool.clone(), wal.clone());
        let txn_ids = TransactionIdGenerator::starting_after(wal.max_transaction_id());

        let last_recovery = if config.recover_on_open {
            Some(recovery.recover()?)
        } else {
            None
        };

        info!(
            "Opened database at {:?} ({} tables)",
            config.data_dir,
            catalog.table_ids().len()
        );

        Ok(Self {
            config,
            catalog,
            lock_manager,
            wal,
            pool,
            recovery,
            checkpoints,
            txn_ids,
            last_recovery,
        })
    }

    fn existing_tables(data_dir: &Path) -> StorageResult<Vec<TableId>> {
        let mut tables = Vec::new();
        for entry in fs::read_dir(data_dir)? {
            let entry = entry?;
            if let Some(table_id) = entry
                .file_name()
                .to_str()
                .and_then(HeapFile::table_id_from_file_name)
            {
                tables.push(table_id);
            }
        }
        tables.sort_unstable();
        Ok(tables)
    }

    /// Creates the heap file for `table_id`. Does nothing if the table
    /// already exists.
    pub fn create_table(&self, table_id: TableId) -> StorageResult<()> {
        if self.catalog.contains(table_id) {
            return Ok(());
        }
        let file = HeapFile::open(&self.config.data_dir, table_id, self.config.sync_on_force)?;
        self.catalog.add_table(Arc::new(file));
        info!("Created table {}", table_id);
        Ok(())
    }

    /// Starts a transaction with a fresh id.
    pub fn begin(&self) -> StorageResult<Transaction> {
        Transaction::start(
            self.txn_ids.next(),
            self.pool.clone(),
            self.wal.clone(),
            self.recovery.clone(),
        )
    }

    pub fn insert_tuple(
        &self,
        txn: &Transaction,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> StorageResult<()> {
        self.pool.insert_tuple(txn.id(), table_id, tuple)
    }

    pub fn delete_tuple(
        &self,
        txn: &Transaction,
        table_id: TableId,
        tuple: &Tuple,
    ) -> StorageResult<()> {
        self.pool.delete_tuple(txn.id(), table_id, tuple)
    }

    /// Every live tuple of `table_id`, read under shared locks.
    pub fn scan(&self, txn: &Transaction, table_id: TableId) -> StorageResult<Vec<Tuple>> {
        self.catalog
            .storage_file_for(table_id)?
            .scan(&self.pool, txn.id())
    }

    pub fn checkpoint(&self) -> StorageResult<u64> {
        self.checkpoints.checkpoint()
    }

    pub fn recover(&self) -> StorageResult<RecoveryStats> {
        self.recovery.recover()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn wal(&self) -> &Arc<WalManager> {
        &self.wal
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn recovery_manager(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    /// Stats of the recovery run during `open`, if one ran.
    pub fn last_recovery(&self) -> Option<&RecoveryStats> {
        self.last_recovery.as_ref()
    }
}
