use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kestreldb::access::Tuple;
use kestreldb::concurrency::lock::{LockConfig, Permissions};
use kestreldb::storage::page::PageId;
use kestreldb::storage::wal::LogRecordKind;
use kestreldb::transaction::TransactionId;
use kestreldb::{Database, DatabaseConfig};
use tempfile::tempdir;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(dir: &Path) -> DatabaseConfig {
    DatabaseConfig::new(dir).with_sync_on_force(false)
}

fn rows(db: &Database, table: u32) -> Vec<Vec<u8>> {
    let reader = db.begin().unwrap();
    let mut rows: Vec<_> = db
        .scan(&reader, table)
        .unwrap()
        .into_iter()
        .map(|t| t.data)
        .collect();
    reader.commit().unwrap();
    rows.sort();
    rows
}

fn insert_committed(db: &Database, table: u32, data: &[u8]) {
    let txn = db.begin().unwrap();
    db.insert_tuple(&txn, table, &mut Tuple::new(data.to_vec()))
        .unwrap();
    txn.commit().unwrap();
}

#[test]
fn test_lru_eviction_through_database() {
    init_logger();
    let dir = tempdir().unwrap();
    {
        let db = Database::open(config(dir.path())).unwrap();
        db.create_table(1).unwrap();
        // Tuples this large fill a page each.
        for fill in 0..3u8 {
            insert_committed(&db, 1, &[fill; 3000]);
        }
    }

    let db = Database::open(config(dir.path()).with_pool_capacity(2)).unwrap();
    let pool = db.buffer_pool();
    let txn = db.begin().unwrap();
    let (a, b, c) = (PageId::new(1, 0), PageId::new(1, 1), PageId::new(1, 2));

    pool.get_page(txn.id(), a, Permissions::ReadOnly).unwrap();
    pool.get_page(txn.id(), b, Permissions::ReadOnly).unwrap();
    pool.get_page(txn.id(), c, Permissions::ReadOnly).unwrap();
    assert!(!pool.contains(a));
    assert_eq!(pool.cached_page_ids(), vec![b, c]);

    pool.get_page(txn.id(), a, Permissions::ReadOnly).unwrap();
    assert_eq!(pool.cached_page_ids(), vec![c, a]);
    txn.commit().unwrap();
}

#[test]
fn test_blocked_reader_wakes_when_writer_aborts() {
    init_logger();
    let dir = tempdir().unwrap();
    let timeout = Duration::from_secs(5);
    let db = Arc::new(
        Database::open(config(dir.path()).with_lock_config(LockConfig {
            timeout,
            poll_interval: Duration::from_millis(1),
        }))
        .unwrap(),
    );
    db.create_table(1).unwrap();

    let writer = db.begin().unwrap();
    db.insert_tuple(&writer, 1, &mut Tuple::new(b"uncommitted".to_vec()))
        .unwrap();

    let reader_db = db.clone();
    let reader = thread::spawn(move || {
        let txn = reader_db.begin().unwrap();
        let started = Instant::now();
        let seen = reader_db.scan(&txn, 1).unwrap();
        let waited = started.elapsed();
        txn.commit().unwrap();
        (seen, waited)
    });

    thread::sleep(Duration::from_millis(100));
    writer.abort().unwrap();

    let (seen, waited) = reader.join().unwrap();
    assert!(seen.is_empty());
    assert!(waited < timeout);
}

#[test]
fn test_abort_from_another_thread_fails_blocked_request() {
    init_logger();
    let dir = tempdir().unwrap();
    let db = Arc::new(
        Database::open(config(dir.path()).with_lock_config(LockConfig {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(1),
        }))
        .unwrap(),
    );
    db.create_table(1).unwrap();

    let holder = db.begin().unwrap();
    db.insert_tuple(&holder, 1, &mut Tuple::new(b"held".to_vec()))
        .unwrap();

    let waiter = Arc::new(db.begin().unwrap());
    let (thread_db, thread_txn) = (db.clone(), waiter.clone());
    let blocked = thread::spawn(move || thread_db.scan(&thread_txn, 1));

    thread::sleep(Duration::from_millis(100));
    waiter.abort().unwrap();

    let err = blocked.join().unwrap().unwrap_err();
    assert!(err.is_abort());
    assert!(!db.lock_manager().is_waiting(waiter.id()));
    holder.commit().unwrap();
}

#[test]
fn test_lock_timeout_leaves_holder_untouched() {
    init_logger();
    let dir = tempdir().unwrap();
    let db = Database::open(config(dir.path()).with_lock_config(LockConfig {
        timeout: Duration::from_millis(50),
        poll_interval: Duration::from_millis(1),
    }))
    .unwrap();
    db.create_table(1).unwrap();

    let holder = db.begin().unwrap();
    db.insert_tuple(&holder, 1, &mut Tuple::new(b"mine".to_vec()))
        .unwrap();

    let other = db.begin().unwrap();
    let err = db.scan(&other, 1).unwrap_err();
    assert!(err.is_abort());
    other.abort().unwrap();

    holder.commit().unwrap();
    assert_eq!(rows(&db, 1), vec![b"mine".to_vec()]);
}

#[test]
fn test_commit_survives_reopen() {
    init_logger();
    let dir = tempdir().unwrap();
    {
        let db = Database::open(config(dir.path())).unwrap();
        db.create_table(1).unwrap();
        insert_committed(&db, 1, b"durable");
    }

    let db = Database::open(config(dir.path())).unwrap();
    assert!(db.last_recovery().unwrap().losers.is_empty());
    assert_eq!(rows(&db, 1), vec![b"durable".to_vec()]);
}

#[test]
fn test_updates_precede_commit_in_log() {
    init_logger();
    let dir = tempdir().unwrap();
    let db = Database::open(config(dir.path())).unwrap();
    db.create_table(1).unwrap();

    let txn = db.begin().unwrap();
    let id = txn.id();
    db.insert_tuple(&txn, 1, &mut Tuple::new(b"logged".to_vec()))
        .unwrap();
    txn.commit().unwrap();

    let kinds: Vec<_> = db
        .wal()
        .records()
        .unwrap()
        .into_iter()
        .filter(|r| r.txn == id)
        .map(|r| r.kind)
        .collect();
    assert_eq!(kinds.len(), 3);
    assert!(matches!(kinds[0], LogRecordKind::Begin));
    match &kinds[1] {
        LogRecordKind::Update { before, after } => {
            assert_eq!(after.page_id(), PageId::new(1, 0));
            assert!(before.data().iter().all(|&b| b == 0));
            assert!(after.data().windows(6).any(|w| w == b"logged"));
        }
        other => panic!("expected UPDATE, got {:?}", other),
    }
    assert!(matches!(kinds[2], LogRecordKind::Commit));
}

#[test]
fn test_abort_restores_stolen_page() {
    init_logger();
    let dir = tempdir().unwrap();
    let db = Database::open(config(dir.path())).unwrap();
    db.create_table(1).unwrap();
    insert_committed(&db, 1, b"kept");

    let txn = db.begin().unwrap();
    db.insert_tuple(&txn, 1, &mut Tuple::new(b"rolled back".to_vec()))
        .unwrap();
    // Force the uncommitted page out to disk before aborting.
    db.buffer_pool().flush_pages(txn.id()).unwrap();
    txn.abort().unwrap();

    assert_eq!(rows(&db, 1), vec![b"kept".to_vec()]);

    let file = db.catalog().storage_file_for(1).unwrap();
    let page = file.read_page(PageId::new(1, 0)).unwrap();
    assert!(!page.read().data().windows(11).any(|w| w == b"rolled back"));
}

#[test]
fn test_crash_before_commit_is_rolled_back() {
    init_logger();
    let dir = tempdir().unwrap();
    let loser;
    {
        let db = Database::open(config(dir.path())).unwrap();
        db.create_table(1).unwrap();
        let txn = db.begin().unwrap();
        loser = txn.id();
        db.insert_tuple(&txn, 1, &mut Tuple::new(b"lost".to_vec()))
            .unwrap();
        db.buffer_pool().flush_pages(loser).unwrap();
        // Crash: the handle never commits or aborts.
        std::mem::forget(txn);
    }

    let db = Database::open(config(dir.path())).unwrap();
    let stats = db.last_recovery().unwrap();
    assert_eq!(stats.losers, vec![loser]);
    assert_eq!(stats.pages_undone, 1);
    assert!(rows(&db, 1).is_empty());

    let tail: Vec<_> = db
        .wal()
        .records()
        .unwrap()
        .into_iter()
        .filter(|r| r.txn == loser)
        .map(|r| r.kind)
        .collect();
    assert!(matches!(tail[tail.len() - 2], LogRecordKind::Clr { .. }));
    assert!(matches!(tail[tail.len() - 1], LogRecordKind::Abort));
}

#[test]
fn test_recovery_is_idempotent_across_reopens() {
    init_logger();
    let dir = tempdir().unwrap();
    {
        let db = Database::open(config(dir.path())).unwrap();
        db.create_table(1).unwrap();
        insert_committed(&db, 1, b"winner");
        let txn = db.begin().unwrap();
        db.insert_tuple(&txn, 1, &mut Tuple::new(b"loser".to_vec()))
            .unwrap();
        db.buffer_pool().flush_pages(txn.id()).unwrap();
        std::mem::forget(txn);
    }

    let log_len = {
        let db = Database::open(config(dir.path())).unwrap();
        assert_eq!(db.last_recovery().unwrap().losers.len(), 1);
        assert_eq!(rows(&db, 1), vec![b"winner".to_vec()]);
        db.wal().records().unwrap().len()
    };

    let db = Database::open(config(dir.path())).unwrap();
    assert!(db.last_recovery().unwrap().losers.is_empty());
    assert_eq!(rows(&db, 1), vec![b"winner".to_vec()]);
    // The second reopen only adds the reader's BEGIN and COMMIT.
    assert_eq!(db.wal().records().unwrap().len(), log_len + 2);

    let again = db.recover().unwrap();
    assert!(again.losers.is_empty());
    assert_eq!(rows(&db, 1), vec![b"winner".to_vec()]);
}

#[test]
fn test_loser_active_at_checkpoint_is_undone() {
    init_logger();
    let dir = tempdir().unwrap();
    let loser;
    {
        let db = Database::open(config(dir.path())).unwrap();
        db.create_table(1).unwrap();
        db.create_table(2).unwrap();

        let txn = db.begin().unwrap();
        loser = txn.id();
        db.insert_tuple(&txn, 1, &mut Tuple::new(b"before checkpoint".to_vec()))
            .unwrap();
        db.checkpoint().unwrap();
        insert_committed(&db, 2, b"after checkpoint");
        std::mem::forget(txn);
    }

    let db = Database::open(config(dir.path())).unwrap();
    let stats = db.last_recovery().unwrap();
    assert_eq!(stats.losers, vec![loser]);
    assert!(db.wal().last_checkpoint().is_some());
    assert!(rows(&db, 1).is_empty());
    assert_eq!(rows(&db, 2), vec![b"after checkpoint".to_vec()]);
}

#[test]
fn test_torn_log_tail_is_discarded() {
    init_logger();
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join(kestreldb::database::WAL_FILE_NAME);
    let intact_len = {
        let db = Database::open(config(dir.path())).unwrap();
        db.create_table(1).unwrap();
        insert_committed(&db, 1, b"intact");
        db.wal().end_offset()
    };

    {
        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        // A COMMIT tag with only half of its transaction id.
        file.write_all(&[0, 0, 0, 2, 0, 0, 0]).unwrap();
    }

    let db = Database::open(config(dir.path())).unwrap();
    assert_eq!(db.wal().end_offset(), intact_len);
    assert_eq!(rows(&db, 1), vec![b"intact".to_vec()]);
}

#[test]
fn test_transaction_ids_continue_after_restart() {
    init_logger();
    let dir = tempdir().unwrap();
    let last = {
        let db = Database::open(config(dir.path())).unwrap();
        db.create_table(1).unwrap();
        for i in 0..5u8 {
            insert_committed(&db, 1, &[i]);
        }
        db.wal().max_transaction_id()
    };

    let db = Database::open(config(dir.path())).unwrap();
    let txn = db.begin().unwrap();
    assert!(txn.id().value() > last);
    txn.commit().unwrap();
}

#[test]
fn test_dropped_transaction_aborts() {
    init_logger();
    let dir = tempdir().unwrap();
    let db = Database::open(config(dir.path())).unwrap();
    db.create_table(1).unwrap();

    let id = {
        let txn = db.begin().unwrap();
        db.insert_tuple(&txn, 1, &mut Tuple::new(b"dropped".to_vec()))
            .unwrap();
        txn.id()
    };

    assert!(db.buffer_pool().pages_touched_by(id).is_empty());
    assert!(!db.buffer_pool().holds_lock(id, PageId::new(1, 0)));
    assert!(rows(&db, 1).is_empty());
    let last = db.wal().records().unwrap().into_iter().rfind(|r| r.txn == id);
    assert!(matches!(last.map(|r| r.kind), Some(LogRecordKind::Abort)));
}

#[test]
fn test_eviction_between_rollback_and_completion_keeps_abort() {
    init_logger();
    let dir = tempdir().unwrap();
    let aborted = TransactionId::new(100);
    let reader = TransactionId::new(200);
    {
        let db = Database::open(config(dir.path()).with_pool_capacity(1)).unwrap();
        db.create_table(1).unwrap();
        db.create_table(2).unwrap();
        insert_committed(&db, 2, b"other table");

        let pool = db.buffer_pool();
        db.wal().log_begin(aborted).unwrap();
        pool.insert_tuple(aborted, 1, &mut Tuple::new(b"rolled back".to_vec()))
            .unwrap();

        // Abort in its separate steps, with another transaction's fetch
        // evicting in the middle.
        db.recovery_manager().rollback(aborted).unwrap();
        db.wal().log_abort(aborted).unwrap();
        pool.get_page(reader, PageId::new(2, 0), Permissions::ReadOnly)
            .unwrap();
        pool.transaction_complete(aborted, false).unwrap();
        pool.transaction_complete(reader, true).unwrap();

        let records = db.wal().records().unwrap();
        assert!(!records
            .iter()
            .any(|r| r.txn == aborted && matches!(r.kind, LogRecordKind::Update { .. })));
        assert!(matches!(
            records.iter().rfind(|r| r.txn == aborted).map(|r| &r.kind),
            Some(LogRecordKind::Abort)
        ));
        assert!(page_is_zeroed(&db, PageId::new(1, 0)));
    }

    let db = Database::open(config(dir.path())).unwrap();
    assert!(db.last_recovery().unwrap().losers.is_empty());
    assert!(page_is_zeroed(&db, PageId::new(1, 0)));
    assert!(rows(&db, 1).is_empty());
    assert_eq!(rows(&db, 2), vec![b"other table".to_vec()]);
}

fn page_is_zeroed(db: &Database, page_id: PageId) -> bool {
    let file = db.catalog().storage_file_for(page_id.table_id).unwrap();
    let page = file.read_page(page_id).unwrap();
    let zeroed = page.read().data().iter().all(|&b| b == 0);
    zeroed
}
