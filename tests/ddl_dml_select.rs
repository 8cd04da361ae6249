use minipg::core::Value;
use minipg::{parse, Executor, StorageConfig, StorageEngine};
use tempfile::tempdir;

fn open() -> StorageEngine {
    let dir = tempdir().unwrap();
    let config = StorageConfig { data_dir: dir.into_path(), migrate_on_open: true, fsync: true };
    StorageEngine::open(&config).unwrap()
}

fn exec(storage: &StorageEngine, sql: &str) -> minipg::ExecResult {
    let stmt = parse(sql).unwrap();
    Executor::new(storage).execute(&stmt).unwrap()
}

fn exec_err(storage: &StorageEngine, sql: &str) -> minipg::DbError {
    let stmt = parse(sql).unwrap();
    Executor::new(storage).execute(&stmt).unwrap_err()
}

// CREATE TABLE / INSERT / PK-equality SELECT.
#[test]
fn pk_equality_lookup() {
    let storage = open();
    exec(&storage, "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)");
    let res = exec(&storage, "INSERT INTO t VALUES (1,'a'),(2,'b')");
    assert_eq!(res.tag, "INSERT 0 2");

    let res = exec(&storage, "SELECT name FROM t WHERE id = 2");
    assert_eq!(res.tag, "SELECT 1");
    assert_eq!(res.rows.len(), 1);
    assert_eq!(res.rows[0][0].as_ref().and_then(Value::as_str), Some("b"));
}

// Unique/PK violation leaves state unchanged.
#[test]
fn pk_violation_rejected_and_state_unchanged() {
    let storage = open();
    exec(&storage, "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)");
    exec(&storage, "INSERT INTO t VALUES (1,'a'),(2,'b')");

    let err = exec_err(&storage, "INSERT INTO t VALUES (1,'c')");
    assert_eq!(err.sqlstate(), "23505");

    let res = exec(&storage, "SELECT COUNT(*) FROM t");
    assert_eq!(res.rows[0][0].as_ref().and_then(Value::as_i64), Some(2));
}

#[test]
fn drop_column_tombstones_ordinal_without_renumbering() {
    let storage = open();
    exec(&storage, "CREATE TABLE t(id INTEGER PRIMARY KEY, a TEXT, b TEXT)");
    exec(&storage, "INSERT INTO t VALUES (1,'x','y')");
    exec(&storage, "ALTER TABLE t DROP COLUMN a");
    exec(&storage, "ALTER TABLE t ADD COLUMN c TEXT");
    exec(&storage, "INSERT INTO t (id, b, c) VALUES (2,'y2','z')");

    let res = exec(&storage, "SELECT id, b, c FROM t WHERE id = 1");
    assert!(res.rows[0][2].is_none());
}

#[test]
fn ddl_against_catalog_view_rejected() {
    let storage = open();
    let err = exec_err(&storage, "INSERT INTO pg_catalog.pg_type VALUES (1,'x')");
    assert_eq!(err.sqlstate(), "42809");
}
