use minipg::storage::StorageEngine;
use minipg::{parse, Executor, StorageConfig};
use std::fs::OpenOptions;
use tempfile::tempdir;

fn exec(storage: &StorageEngine, sql: &str) -> minipg::ExecResult {
    let stmt = parse(sql).unwrap();
    Executor::new(storage).execute(&stmt).unwrap()
}

// Crash atomicity: a write
// truncated mid-entry is dropped cleanly on reopen, never partially visible.
#[test]
fn truncated_wal_entry_recovers_to_last_good_row() {
    let dir = tempdir().unwrap();
    let config = StorageConfig { data_dir: dir.into_path(), migrate_on_open: true, fsync: true };

    let storage = StorageEngine::open(&config).unwrap();
    exec(&storage, "CREATE TABLE s(id INTEGER PRIMARY KEY)");
    for i in 1..=7 {
        exec(&storage, &format!("INSERT INTO s VALUES ({i})"));
    }
    let wal_path = StorageEngine::table_wal_path(&config.data_dir, "s");
    let len_after_seven = std::fs::metadata(&wal_path).unwrap().len();

    for i in 8..=10 {
        exec(&storage, &format!("INSERT INTO s VALUES ({i})"));
    }
    storage.close().unwrap();
    drop(storage);

    // Simulate a crash mid-write of row 8's entry: keep only a few garbage
    // bytes of its header past the last entry that completed cleanly.
    let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
    file.set_len(len_after_seven + 3).unwrap();
    drop(file);

    let reopened = StorageEngine::open(&config).unwrap();
    let res = exec(&reopened, "SELECT id FROM s ORDER BY id");
    assert_eq!(res.rows.len(), 7);
    for (i, row) in res.rows.iter().enumerate() {
        assert_eq!(row[0].as_ref().and_then(minipg::core::Value::as_i64), Some(i as i64 + 1));
    }

    // Recovery truncates the file back to the last good entry boundary.
    let len_after_recovery = std::fs::metadata(&wal_path).unwrap().len();
    assert_eq!(len_after_recovery, len_after_seven);
}

// WAL replay determinism: closing and reopening reproduces identical heap
// and row-id assignment for any sequence of successful mutations.
#[test]
fn reopen_reproduces_identical_heap() {
    let dir = tempdir().unwrap();
    let config = StorageConfig { data_dir: dir.into_path(), migrate_on_open: true, fsync: true };

    let storage = StorageEngine::open(&config).unwrap();
    exec(&storage, "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)");
    exec(&storage, "INSERT INTO t VALUES (1,'a'),(2,'b'),(3,'c')");
    exec(&storage, "DELETE FROM t WHERE id = 2");
    exec(&storage, "UPDATE t SET name = 'z' WHERE id = 3");
    storage.close().unwrap();
    drop(storage);

    let reopened = StorageEngine::open(&config).unwrap();
    let res = exec(&reopened, "SELECT id, name FROM t ORDER BY id");
    assert_eq!(res.rows.len(), 2);
    assert_eq!(res.rows[0][0].as_ref().and_then(minipg::core::Value::as_i64), Some(1));
    assert_eq!(res.rows[1][1].as_ref().and_then(minipg::core::Value::as_str), Some("z"));
}
