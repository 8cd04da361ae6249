//! A lightweight relational database that speaks the PostgreSQL v3 wire
//! protocol: hand-written SQL lexer/parser, ordinal-indexed in-memory row
//! store backed by per-table write-ahead logs, and a thread-per-connection
//! wire session.

pub mod core;
pub mod executor;
pub mod parser;
pub mod session;
pub mod storage;

pub use core::{DataType, DbError, Result, Value};
pub use executor::result::{ColumnInfo, ExecResult};
pub use executor::Executor;
pub use parser::ast::Statement;
pub use parser::parse;
pub use session::{Server, SessionConfig};
pub use storage::{StorageConfig, StorageEngine};
