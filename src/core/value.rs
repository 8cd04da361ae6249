use crate::core::{DbError, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;

/// A tagged runtime value. Equality/ordering between mismatched kinds other
/// than integer/float promotion is not defined here — callers needing SQL
/// comparison semantics go through [`Value::compare_three_valued`], not
/// `PartialOrd`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Three-valued comparison: NULL compared to anything (including
    /// another NULL) is "unordered", represented as `None`. Mixed
    /// integer/float compares by float promotion. Mismatched non-numeric
    /// kinds are a caller error, not NULL, so they surface as `Err`.
    pub fn compare_three_valued(&self, other: &Value) -> Result<Option<Ordering>> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(None),
            (Value::Integer(a), Value::Integer(b)) => Ok(Some(a.cmp(b))),
            (Value::Float(a), Value::Float(b)) => Ok(a.partial_cmp(b)),
            (Value::Integer(a), Value::Float(b)) => Ok((*a as f64).partial_cmp(b)),
            (Value::Float(a), Value::Integer(b)) => Ok(a.partial_cmp(&(*b as f64))),
            (Value::Text(a), Value::Text(b)) => Ok(Some(a.cmp(b))),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Some(a.cmp(b))),
            (Value::Timestamp(a), Value::Timestamp(b)) => Ok(Some(a.cmp(b))),
            _ => Err(DbError::InvalidTextInput(format!(
                "cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Ordering used by ORDER BY: NULL always sorts after non-NULL
    /// regardless of ASC/DESC (the direction flip happens at the call site,
    /// applied only to the non-NULL branch).
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            _ => self
                .compare_three_valued(other)
                .ok()
                .flatten()
                .unwrap_or(Ordering::Equal),
        }
    }

    /// Text form used both by `::text` casts and wire row encoding.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(format_float(*f)),
            Value::Text(s) => Some(s.clone()),
            Value::Boolean(b) => Some(if *b { "t".to_string() } else { "f".to_string() }),
            Value::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.6f+00").to_string()),
        }
    }
}

/// Shortest round-trip-ish decimal form, matching PG's text-protocol floats.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let mut s = format!("{f}");
    if !s.contains('.') && !s.contains('e') && !s.contains("inf") && !s.contains("NaN") {
        s.push_str(".0");
    }
    s
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(s) => write!(f, "{s}"),
            None => write!(f, "NULL"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
}

impl DataType {
    /// Parse a keyword/alias from the lexer's identifier text into a type,
    /// used by both column declarations and `::TYPE` casts.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" | "SMALLINT" => Some(Self::Integer),
            "FLOAT" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" | "REAL" | "NUMERIC" => {
                Some(Self::Float)
            }
            "TEXT" | "VARCHAR" | "CHAR" | "CHARACTER VARYING" | "STRING" => Some(Self::Text),
            "BOOLEAN" | "BOOL" => Some(Self::Boolean),
            "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => Some(Self::Timestamp),
            _ => None,
        }
    }

    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_) | Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Timestamp, Value::Timestamp(_)) => true,
            _ => false,
        }
    }

    /// Coerce a literal value (as produced by the parser) to this declared
    /// type. Used at plan time for INSERT values and for comparison operands.
    pub fn coerce(&self, value: Value) -> Result<Value> {
        if matches!(value, Value::Null) {
            return Ok(Value::Null);
        }
        match (self, &value) {
            (Self::Integer, Value::Integer(_)) => Ok(value),
            (Self::Float, Value::Float(_)) => Ok(value),
            (Self::Float, Value::Integer(i)) => Ok(Value::Float(*i as f64)),
            (Self::Text, Value::Text(_)) => Ok(value),
            (Self::Boolean, Value::Boolean(_)) => Ok(value),
            (Self::Timestamp, Value::Timestamp(_)) => Ok(value),
            (Self::Integer, Value::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| DbError::InvalidTextInput(format!("invalid integer: \"{s}\""))),
            (Self::Float, Value::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| DbError::InvalidTextInput(format!("invalid float: \"{s}\""))),
            (Self::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "yes" | "y" => Ok(Value::Boolean(true)),
                "f" | "false" | "0" | "no" | "n" => Ok(Value::Boolean(false)),
                _ => Err(DbError::InvalidTextInput(format!("invalid boolean: \"{s}\""))),
            },
            (Self::Timestamp, Value::Text(s)) => parse_timestamp(s)
                .ok_or_else(|| DbError::InvalidTextInput(format!("invalid timestamp: \"{s}\""))),
            (Self::Text, other) => Ok(Value::Text(other.to_text().unwrap_or_default())),
            _ => Err(DbError::InvalidTextInput(format!(
                "cannot coerce {} to {}",
                value.type_name(),
                self
            ))),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<Value> {
    let s = s.trim();
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Value::Timestamp(DateTime::from_naive_utc_and_offset(naive, Utc)));
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(Value::Timestamp(DateTime::from_naive_utc_and_offset(naive, Utc)));
    }
    None
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_unordered_against_anything() {
        assert_eq!(Value::Null.compare_three_valued(&Value::Integer(1)).unwrap(), None);
        assert_eq!(Value::Integer(1).compare_three_valued(&Value::Null).unwrap(), None);
        assert_eq!(Value::Null.compare_three_valued(&Value::Null).unwrap(), None);
    }

    #[test]
    fn int_float_promotion() {
        assert_eq!(
            Value::Integer(2).compare_three_valued(&Value::Float(2.5)).unwrap(),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn sort_cmp_always_puts_null_last() {
        assert_eq!(Value::Null.sort_cmp(&Value::Integer(1)), Ordering::Greater);
        assert_eq!(Value::Integer(1).sort_cmp(&Value::Null), Ordering::Less);
    }

    #[test]
    fn coerce_text_to_integer() {
        let v = DataType::Integer.coerce(Value::Text("42".into())).unwrap();
        assert!(matches!(v, Value::Integer(42)));
        assert!(DataType::Integer.coerce(Value::Text("abc".into())).is_err());
    }

    #[test]
    fn coerce_passes_null_through() {
        assert!(matches!(DataType::Integer.coerce(Value::Null).unwrap(), Value::Null));
    }
}
