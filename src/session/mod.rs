//! Wire-protocol session: the PostgreSQL v3 simple-query flow,
//! hand-framed over a blocking `TcpStream`, one thread per connection.

pub mod metrics;
pub mod protocol;

use crate::core::{DataType, DbError, Result, Value};
use crate::executor::result::{ColumnInfo, ExecResult};
use crate::executor::Executor;
use crate::parser::parse;
use crate::session::metrics::SessionMetrics;
use crate::storage::StorageEngine;
use log::{debug, error, info, warn};
use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Collaborator-supplied configuration the session is opened with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub expected_user: String,
    pub expected_password: String,
    pub statement_log: bool,
}

const PARAMETER_STATUS: &[(&str, &str)] = &[
    ("server_version", "14.0"),
    ("server_encoding", "UTF8"),
    ("client_encoding", "UTF8"),
    ("DateStyle", "ISO, MDY"),
    ("standard_conforming_strings", "on"),
];

pub struct Server {
    storage: Arc<StorageEngine>,
    config: SessionConfig,
    metrics: Arc<SessionMetrics>,
}

impl Server {
    pub fn new(storage: Arc<StorageEngine>, config: SessionConfig) -> Self {
        Self { storage, config, metrics: Arc::new(SessionMetrics::default()) }
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    /// Accept connections on `bind_addr` until `shutdown` is set, then drain
    /// in-flight sessions for a bounded time before returning.
    pub fn run(&self, bind_addr: &str, shutdown: &AtomicBool) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        info!("listening on {bind_addr}");

        let active = Arc::new(AtomicUsize::new(0));
        while !shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let count = self.metrics.on_connection();
                    info!("accepted connection from {peer} (#{count})");
                    let storage = Arc::clone(&self.storage);
                    let config = self.config.clone();
                    let metrics = Arc::clone(&self.metrics);
                    let active = Arc::clone(&active);
                    active.fetch_add(1, Ordering::SeqCst);
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, &storage, &config, &metrics) {
                            error!("connection from {peer} ended with error: {e}");
                        }
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!("shutdown requested, draining active sessions");
        let deadline = Instant::now() + Duration::from_secs(5);
        while active.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        let remaining = active.load(Ordering::SeqCst);
        if remaining > 0 {
            warn!("{remaining} session(s) abandoned at shutdown");
        }
        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn write_and_flush(stream: &mut TcpStream, buf: &[u8]) -> Result<()> {
    stream.write_all(buf)?;
    stream.flush()?;
    Ok(())
}

fn fatal_error(stream: &mut TcpStream, err: &DbError) -> Result<()> {
    debug_assert!(err.is_fatal());
    let mut buf = Vec::new();
    protocol::append_error_response(&mut buf, "FATAL", err.sqlstate(), &err.to_string());
    write_and_flush(stream, &buf)
}

fn handle_connection(
    mut stream: TcpStream,
    storage: &StorageEngine,
    config: &SessionConfig,
    metrics: &SessionMetrics,
) -> Result<()> {
    stream.set_nodelay(true).ok();
    let mut reader = BufReader::new(stream.try_clone()?);

    let params = loop {
        match protocol::read_startup(&mut reader)? {
            protocol::StartupPacket::SslRequest => {
                stream.write_all(b"N")?;
                stream.flush()?;
            }
            protocol::StartupPacket::Startup(params) => break params,
        }
    };

    let user = params
        .get("user")
        .ok_or_else(|| DbError::Protocol("startup message missing \"user\" parameter".into()))?
        .clone();

    if user != config.expected_user {
        metrics.on_auth_failure();
        info!("rejected unknown user \"{user}\"");
        let err = DbError::UnknownUser(user);
        fatal_error(&mut stream, &err)?;
        return Ok(());
    }

    let mut buf = Vec::new();
    protocol::append_authentication_cleartext_password(&mut buf);
    write_and_flush(&mut stream, &buf)?;

    let (tag, payload) = protocol::read_frame(&mut reader)?;
    if tag != protocol::TAG_PASSWORD {
        return Err(DbError::Protocol(format!("expected PasswordMessage, got tag {tag:#x}")));
    }
    let password = protocol::read_cstr_payload(&payload)?;
    if !constant_time_eq(password.as_bytes(), config.expected_password.as_bytes()) {
        metrics.on_auth_failure();
        info!("authentication failed for user \"{user}\"");
        fatal_error(&mut stream, &DbError::AuthFailed)?;
        return Ok(());
    }

    info!("authenticated user \"{user}\"");

    let mut buf = Vec::new();
    protocol::append_authentication_ok(&mut buf);
    for (key, value) in PARAMETER_STATUS {
        protocol::append_parameter_status(&mut buf, key, value);
    }
    protocol::append_backend_key_data(&mut buf, std::process::id() as i32, 0);
    protocol::append_ready_for_query(&mut buf, b'I');
    write_and_flush(&mut stream, &buf)?;

    let mut last_trace: Option<String> = None;
    loop {
        let (tag, payload) = match protocol::read_frame(&mut reader) {
            Ok(v) => v,
            Err(DbError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };

        match tag {
            protocol::TAG_QUERY => {
                let raw = protocol::read_cstr_payload(&payload)?;
                let sql = raw.trim().trim_end_matches(';').trim();
                if config.statement_log {
                    debug!("query: {sql}");
                }

                let mut out = Vec::new();
                if sql.is_empty() {
                    protocol::append_empty_query_response(&mut out);
                } else if let Some(tag) = run_builtin(sql, &mut last_trace, &mut out) {
                    protocol::append_command_complete(&mut out, &tag);
                } else {
                    match run_statement(storage, sql) {
                        Ok(result) => {
                            metrics.on_query();
                            append_result(&mut out, &result);
                            last_trace = Some(sql.to_string());
                        }
                        Err(e) => {
                            metrics.on_query_failed();
                            protocol::append_error_response(&mut out, "ERROR", e.sqlstate(), &e.to_string());
                        }
                    }
                }
                protocol::append_ready_for_query(&mut out, b'I');
                write_and_flush(&mut stream, &out)?;
            }
            protocol::TAG_TERMINATE => return Ok(()),
            other => debug!("ignoring unsupported message type {:#x}", other),
        }
    }
}

fn run_statement(storage: &StorageEngine, sql: &str) -> Result<ExecResult> {
    let stmt = parse(sql)?;
    Executor::new(storage).execute(&stmt)
}

fn append_result(buf: &mut Vec<u8>, result: &ExecResult) {
    if let Some(columns) = &result.columns {
        protocol::append_row_description(buf, columns);
        for row in &result.rows {
            protocol::append_data_row(buf, row);
        }
    }
    protocol::append_command_complete(buf, &result.tag);
}

/// `SET` statements and `SHOW TRACE` are handled without going through the
/// parser. Returns the command tag on a match.
fn run_builtin(sql: &str, last_trace: &mut Option<String>, out: &mut Vec<u8>) -> Option<String> {
    let upper = sql.to_ascii_uppercase();
    if upper == "SHOW TRACE" {
        let columns = vec![ColumnInfo::for_type("trace", Some(DataType::Text))];
        protocol::append_row_description(out, &columns);
        let text = last_trace.clone().unwrap_or_default();
        protocol::append_data_row(out, &[Some(Value::Text(text))]);
        return Some("SHOW".to_string());
    }
    if upper.starts_with("SET") {
        return Some("SET".to_string());
    }
    None
}
