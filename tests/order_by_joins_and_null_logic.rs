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

// NULLs sort last regardless of direction.
#[test]
fn order_by_desc_sorts_null_last() {
    let storage = open();
    exec(&storage, "CREATE TABLE s(v INTEGER)");
    exec(&storage, "INSERT INTO s VALUES (10),(5),(NULL),(20)");

    let res = exec(&storage, "SELECT * FROM s ORDER BY v DESC");
    let values: Vec<Option<i64>> =
        res.rows.iter().map(|r| r[0].as_ref().and_then(Value::as_i64)).collect();
    assert_eq!(values, vec![Some(20), Some(10), Some(5), None]);
}

// Inner join with an ON filter plus a post-join WHERE.
#[test]
fn join_on_equality_with_where_filter() {
    let storage = open();
    exec(&storage, "CREATE TABLE o(id INT PRIMARY KEY, cust TEXT)");
    exec(&storage, "CREATE TABLE i(id INT PRIMARY KEY, oid INT, prod TEXT)");
    exec(&storage, "INSERT INTO o VALUES (1,'alice'),(2,'bob')");
    exec(&storage, "INSERT INTO i VALUES (10,1,'w'),(11,1,'g'),(12,2,'w')");

    let res = exec(
        &storage,
        "SELECT o.cust, i.prod FROM o JOIN i ON o.id = i.oid WHERE i.prod = 'w' ORDER BY o.cust",
    );
    assert_eq!(res.rows.len(), 2);
    assert_eq!(res.rows[0][0].as_ref().and_then(Value::as_str), Some("alice"));
    assert_eq!(res.rows[1][0].as_ref().and_then(Value::as_str), Some("bob"));
}

// A NULL in an IN list excludes nothing extra, but poisons
// NOT IN entirely under three-valued logic.
#[test]
fn in_and_not_in_with_null_poisoning() {
    let storage = open();
    exec(&storage, "CREATE TABLE t(id INTEGER PRIMARY KEY, name TEXT)");
    exec(&storage, "INSERT INTO t VALUES (1,'a'),(2,'b')");

    let res = exec(&storage, "SELECT * FROM t WHERE id IN (1,2,NULL)");
    assert_eq!(res.rows.len(), 2);

    let res = exec(&storage, "SELECT * FROM t WHERE id NOT IN (3,NULL)");
    assert_eq!(res.rows.len(), 0);
}

#[test]
fn three_valued_and_never_admits_unknown_row() {
    let storage = open();
    exec(&storage, "CREATE TABLE t(a INTEGER, b INTEGER)");
    exec(&storage, "INSERT INTO t VALUES (1, NULL)");

    // (a = 1) AND (b = 1) is (true AND unknown) = unknown, never admitted.
    let res = exec(&storage, "SELECT * FROM t WHERE a = 1 AND b = 1");
    assert_eq!(res.rows.len(), 0);
}
