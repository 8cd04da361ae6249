//! Statement result shape: an optional column schema,
//! text-encoded rows, and a command tag.

use crate::core::{DataType, Value};

/// PostgreSQL type OIDs used by `RowDescription`.
pub const OID_INT8: i32 = 20;
pub const OID_TEXT: i32 = 25;
pub const OID_BOOL: i32 = 16;
pub const OID_FLOAT8: i32 = 701;
pub const OID_TIMESTAMPTZ: i32 = 1184;
pub const OID_UNKNOWN: i32 = 705;

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub type_oid: i32,
    pub type_size: i16,
}

impl ColumnInfo {
    pub fn for_type(name: impl Into<String>, data_type: Option<DataType>) -> Self {
        let (type_oid, type_size) = match data_type {
            None => (OID_UNKNOWN, -1),
            Some(DataType::Integer) => (OID_INT8, 8),
            Some(DataType::Float) => (OID_FLOAT8, 8),
            Some(DataType::Text) => (OID_TEXT, -1),
            Some(DataType::Boolean) => (OID_BOOL, 1),
            Some(DataType::Timestamp) => (OID_TIMESTAMPTZ, 8),
        };
        Self { name: name.into(), type_oid, type_size }
    }
}

/// A fully-evaluated statement result, ready for the wire session to
/// render as `RowDescription`/`DataRow`/`CommandComplete`.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub columns: Option<Vec<ColumnInfo>>,
    pub rows: Vec<Vec<Option<Value>>>,
    pub tag: String,
}

impl ExecResult {
    pub fn command_only(tag: impl Into<String>) -> Self {
        Self { columns: None, rows: Vec::new(), tag: tag.into() }
    }

    pub fn select(columns: Vec<ColumnInfo>, values: Vec<Vec<Value>>) -> Self {
        let n = values.len();
        let rows = values
            .into_iter()
            .map(|row| row.into_iter().map(|v| if v.is_null() { None } else { Some(v) }).collect())
            .collect();
        Self { columns: Some(columns), rows, tag: format!("SELECT {n}") }
    }
}

/// Text-encode a value per PG's simple-query text protocol.
pub fn encode_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(format_float_shortest(*f)),
        Value::Text(s) => Some(s.clone()),
        Value::Boolean(b) => Some(if *b { "t".to_string() } else { "f".to_string() }),
        Value::Timestamp(ts) => Some(format!("{}+00", ts.format("%Y-%m-%d %H:%M:%S"))),
    }
}

fn format_float_shortest(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
    }
    let mut s = format!("{f}");
    if !s.contains('.') && !s.contains('e') && !s.contains('E') {
        s.push_str(".0");
    }
    s
}
