use minipg::session::{Server, SessionConfig};
use minipg::storage::{StorageConfig, StorageEngine};
use minipg::Result;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn main() -> Result<()> {
    let storage_config = StorageConfig {
        data_dir: PathBuf::from(env_or("MINIPG_DATA_DIR", "./minipg-data")),
        migrate_on_open: true,
        fsync: true,
    };
    let storage = Arc::new(StorageEngine::open(&storage_config)?);

    let session_config = SessionConfig {
        expected_user: env_or("MINIPG_USER", "postgres"),
        expected_password: env_or("MINIPG_PASSWORD", "postgres"),
        statement_log: env_or("MINIPG_STATEMENT_LOG", "0") == "1",
    };
    let server = Server::new(Arc::clone(&storage), session_config);

    let bind_addr = env_or("MINIPG_BIND_ADDR", "127.0.0.1:5432");
    let shutdown = AtomicBool::new(false);
    server.run(&bind_addr, &shutdown)?;

    storage.close()
}
