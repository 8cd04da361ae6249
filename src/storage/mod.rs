pub mod btree;
pub mod catalog;
pub mod engine;
pub mod migration;
pub mod recovery;
pub mod table;
pub mod wal;

pub use engine::{NewColumn, StorageEngine};
pub use table::{ColumnDef, IndexDef, Row, TableDef};

use std::path::PathBuf;

/// Collaborator-supplied configuration the storage engine is opened with.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub migrate_on_open: bool,
    pub fsync: bool,
}

/// Percent-encode any byte outside `[A-Za-z0-9_-]` as `%XX`, used for
/// per-table WAL file names.
pub fn encode_table_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

pub fn decode_table_name(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let name = "weird table!name";
        let encoded = encode_table_name(name);
        assert_eq!(decode_table_name(&encoded), name);
    }

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(encode_table_name("orders"), "orders");
    }
}
