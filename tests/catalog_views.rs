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

#[test]
fn information_schema_tables_lists_created_tables() {
    let storage = open();
    exec(&storage, "CREATE TABLE widgets(id INTEGER PRIMARY KEY)");
    exec(&storage, "CREATE TABLE gadgets(id INTEGER PRIMARY KEY)");

    let res = exec(&storage, "SELECT table_name FROM information_schema.tables ORDER BY table_name");
    let names: Vec<&str> =
        res.rows.iter().map(|r| r[0].as_ref().and_then(Value::as_str).unwrap()).collect();
    assert_eq!(names, vec!["gadgets", "widgets"]);
}

#[test]
fn information_schema_columns_reflects_not_null() {
    let storage = open();
    exec(&storage, "CREATE TABLE widgets(id INTEGER PRIMARY KEY, label TEXT NOT NULL)");

    let res = exec(
        &storage,
        "SELECT column_name, is_nullable FROM information_schema.columns WHERE table_name = 'widgets' ORDER BY ordinal_position",
    );
    assert_eq!(res.rows.len(), 2);
    assert_eq!(res.rows[0][0].as_ref().and_then(Value::as_str), Some("id"));
    assert_eq!(res.rows[1][1].as_ref().and_then(Value::as_str), Some("NO"));
}

#[test]
fn pg_class_lists_one_row_per_table() {
    let storage = open();
    exec(&storage, "CREATE TABLE widgets(id INTEGER PRIMARY KEY)");

    let res = exec(&storage, "SELECT relname, relkind FROM pg_catalog.pg_class");
    assert_eq!(res.rows.len(), 1);
    assert_eq!(res.rows[0][0].as_ref().and_then(Value::as_str), Some("widgets"));
    assert_eq!(res.rows[0][1].as_ref().and_then(Value::as_str), Some("r"));
}
