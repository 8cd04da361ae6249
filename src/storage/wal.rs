//! Bit-exact binary write-ahead log format: a 6-byte header (magic + version)
//! followed by a sequence of `[len][op][payload][crc32]` entries. One file
//! holds catalog (DDL) entries, one file per live table holds DML entries.

use crate::core::{DataType, DbError, Result, Value};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const MAGIC: [u8; 4] = *b"MWAL";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_LEN: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    CreateTable = 1,
    DropTable = 2,
    AddColumn = 3,
    DropColumn = 4,
    CreateIndex = 5,
    DropIndex = 6,
    Insert = 7,
    Delete = 8,
    Update = 9,
}

impl OpCode {
    fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            1 => Self::CreateTable,
            2 => Self::DropTable,
            3 => Self::AddColumn,
            4 => Self::DropColumn,
            5 => Self::CreateIndex,
            6 => Self::DropIndex,
            7 => Self::Insert,
            8 => Self::Delete,
            9 => Self::Update,
            _ => return None,
        })
    }

    pub fn is_ddl(self) -> bool {
        !matches!(self, Self::Insert | Self::Delete | Self::Update)
    }
}

/// One decoded column description as carried in `CreateTable`/`AddColumn`
/// WAL entries.
#[derive(Debug, Clone)]
pub struct WalColumn {
    pub ordinal: u32,
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub primary_key: bool,
}

/// One decoded WAL entry, op-tagged with its payload already parsed.
#[derive(Debug, Clone)]
pub enum WalEntry {
    CreateTable {
        table: String,
        columns: Vec<WalColumn>,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: WalColumn,
    },
    DropColumn {
        table: String,
        ordinal: u32,
    },
    CreateIndex {
        table: String,
        name: String,
        column_ordinal: u32,
        unique: bool,
    },
    DropIndex {
        table: String,
        name: String,
    },
    Insert {
        table: String,
        row_id: u64,
        values: Vec<(u32, Value)>,
    },
    Delete {
        table: String,
        row_id: u64,
    },
    Update {
        table: String,
        row_id: u64,
        values: Vec<(u32, Value)>,
    },
}

impl WalEntry {
    pub fn table_name(&self) -> &str {
        match self {
            WalEntry::CreateTable { table, .. }
            | WalEntry::DropTable { table }
            | WalEntry::AddColumn { table, .. }
            | WalEntry::DropColumn { table, .. }
            | WalEntry::CreateIndex { table, .. }
            | WalEntry::DropIndex { table, .. }
            | WalEntry::Insert { table, .. }
            | WalEntry::Delete { table, .. }
            | WalEntry::Update { table, .. } => table,
        }
    }

    pub fn op_code(&self) -> OpCode {
        match self {
            WalEntry::CreateTable { .. } => OpCode::CreateTable,
            WalEntry::DropTable { .. } => OpCode::DropTable,
            WalEntry::AddColumn { .. } => OpCode::AddColumn,
            WalEntry::DropColumn { .. } => OpCode::DropColumn,
            WalEntry::CreateIndex { .. } => OpCode::CreateIndex,
            WalEntry::DropIndex { .. } => OpCode::DropIndex,
            WalEntry::Insert { .. } => OpCode::Insert,
            WalEntry::Delete { .. } => OpCode::Delete,
            WalEntry::Update { .. } => OpCode::Update,
        }
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        match self {
            WalEntry::CreateTable { table, columns } => {
                put_str(buf, table);
                buf.extend_from_slice(&(columns.len() as u32).to_be_bytes());
                for c in columns {
                    put_column(buf, c);
                }
            }
            WalEntry::DropTable { table } => put_str(buf, table),
            WalEntry::AddColumn { table, column } => {
                put_str(buf, table);
                put_column(buf, column);
            }
            WalEntry::DropColumn { table, ordinal } => {
                put_str(buf, table);
                buf.extend_from_slice(&ordinal.to_be_bytes());
            }
            WalEntry::CreateIndex { table, name, column_ordinal, unique } => {
                put_str(buf, table);
                put_str(buf, name);
                buf.extend_from_slice(&column_ordinal.to_be_bytes());
                buf.push(if *unique { 1 } else { 0 });
            }
            WalEntry::DropIndex { table, name } => {
                put_str(buf, table);
                put_str(buf, name);
            }
            WalEntry::Insert { table, row_id, values } | WalEntry::Update { table, row_id, values } => {
                put_str(buf, table);
                buf.extend_from_slice(&row_id.to_be_bytes());
                buf.extend_from_slice(&(values.len() as u32).to_be_bytes());
                for (ord, v) in values {
                    buf.extend_from_slice(&ord.to_be_bytes());
                    put_value(buf, v);
                }
            }
            WalEntry::Delete { table, row_id } => {
                put_str(buf, table);
                buf.extend_from_slice(&row_id.to_be_bytes());
            }
        }
    }

    fn decode(op: OpCode, payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        Ok(match op {
            OpCode::CreateTable => {
                let table = r.str()?;
                let n = r.u32()?;
                let mut columns = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    columns.push(r.column()?);
                }
                WalEntry::CreateTable { table, columns }
            }
            OpCode::DropTable => WalEntry::DropTable { table: r.str()? },
            OpCode::AddColumn => {
                let table = r.str()?;
                let column = r.column()?;
                WalEntry::AddColumn { table, column }
            }
            OpCode::DropColumn => {
                let table = r.str()?;
                let ordinal = r.u32()?;
                WalEntry::DropColumn { table, ordinal }
            }
            OpCode::CreateIndex => {
                let table = r.str()?;
                let name = r.str()?;
                let column_ordinal = r.u32()?;
                let unique = r.u8()? != 0;
                WalEntry::CreateIndex { table, name, column_ordinal, unique }
            }
            OpCode::DropIndex => {
                let table = r.str()?;
                let name = r.str()?;
                WalEntry::DropIndex { table, name }
            }
            OpCode::Insert | OpCode::Update => {
                let table = r.str()?;
                let row_id = r.u64()?;
                let n = r.u32()?;
                let mut values = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let ord = r.u32()?;
                    let val = r.value()?;
                    values.push((ord, val));
                }
                if op == OpCode::Insert {
                    WalEntry::Insert { table, row_id, values }
                } else {
                    WalEntry::Update { table, row_id, values }
                }
            }
            OpCode::Delete => {
                let table = r.str()?;
                let row_id = r.u64()?;
                WalEntry::Delete { table, row_id }
            }
        })
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn put_column(buf: &mut Vec<u8>, c: &WalColumn) {
    buf.extend_from_slice(&c.ordinal.to_be_bytes());
    put_str(buf, &c.name);
    buf.push(type_tag(c.data_type));
    buf.push(if c.not_null { 1 } else { 0 });
    buf.push(if c.primary_key { 1 } else { 0 });
}

fn type_tag(t: DataType) -> u8 {
    match t {
        DataType::Integer => 0,
        DataType::Float => 1,
        DataType::Text => 2,
        DataType::Boolean => 3,
        DataType::Timestamp => 4,
    }
}

fn type_from_tag(b: u8) -> Result<DataType> {
    Ok(match b {
        0 => DataType::Integer,
        1 => DataType::Float,
        2 => DataType::Text,
        3 => DataType::Boolean,
        4 => DataType::Timestamp,
        other => return Err(DbError::Protocol(format!("bad type tag {other}"))),
    })
}

pub fn put_value(buf: &mut Vec<u8>, v: &Value) {
    match v {
        Value::Null => buf.push(0x00),
        Value::Integer(i) => {
            buf.push(0x01);
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Value::Text(s) => {
            buf.push(0x02);
            let bytes = s.as_bytes();
            buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            buf.extend_from_slice(bytes);
        }
        Value::Boolean(b) => {
            buf.push(0x03);
            buf.push(if *b { 1 } else { 0 });
        }
        Value::Float(f) => {
            buf.push(0x04);
            buf.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Timestamp(ts) => {
            buf.push(0x05);
            let micros = ts.timestamp_micros();
            buf.extend_from_slice(&micros.to_be_bytes());
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(DbError::Protocol("truncated WAL entry".into()));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn str(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn column(&mut self) -> Result<WalColumn> {
        let ordinal = self.u32()?;
        let name = self.str()?;
        let data_type = type_from_tag(self.u8()?)?;
        let not_null = self.u8()? != 0;
        let primary_key = self.u8()? != 0;
        Ok(WalColumn { ordinal, name, data_type, not_null, primary_key })
    }

    fn value(&mut self) -> Result<Value> {
        let tag = self.u8()?;
        Ok(match tag {
            0x00 => Value::Null,
            0x01 => Value::Integer(i64::from_be_bytes(self.take(8)?.try_into().unwrap())),
            0x02 => {
                let len = u16::from_be_bytes(self.take(2)?.try_into().unwrap()) as usize;
                Value::Text(String::from_utf8(self.take(len)?.to_vec())?)
            }
            0x03 => Value::Boolean(self.u8()? != 0),
            0x04 => Value::Float(f64::from_bits(u64::from_be_bytes(
                self.take(8)?.try_into().unwrap(),
            ))),
            0x05 => {
                let micros = i64::from_be_bytes(self.take(8)?.try_into().unwrap());
                let dt = DateTime::<Utc>::from_timestamp_micros(micros)
                    .ok_or_else(|| DbError::Protocol("bad timestamp".into()))?;
                Value::Timestamp(dt)
            }
            other => return Err(DbError::Protocol(format!("bad value tag {other}"))),
        })
    }
}

/// A single WAL file handle: append, fsync, and truncate-on-recovery.
pub struct WalFile {
    file: File,
    fsync: bool,
}

impl WalFile {
    /// Open (creating with a fresh header if absent) the file at `path`.
    pub fn open(path: &Path, fsync: bool) -> Result<Self> {
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        if !existed {
            let mut header = Vec::with_capacity(HEADER_LEN as usize);
            header.extend_from_slice(&MAGIC);
            header.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
            file.write_all(&header)?;
            if fsync {
                file.sync_all()?;
            }
        }
        Ok(Self { file, fsync })
    }

    /// Validate the header, returning its format version.
    pub fn read_header(path: &Path) -> Result<u16> {
        let mut file = File::open(path)?;
        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if header[0..4] != MAGIC {
            return Err(DbError::Protocol(format!(
                "{}: bad WAL magic",
                path.display()
            )));
        }
        Ok(u16::from_be_bytes([header[4], header[5]]))
    }

    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        let mut payload = Vec::new();
        entry.encode_payload(&mut payload);

        let mut body = Vec::with_capacity(1 + payload.len());
        body.push(entry.op_code() as u8);
        body.extend_from_slice(&payload);

        let crc = crc32fast::hash(&body);

        let total_len = (body.len() + 4) as u32;
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&total_len.to_be_bytes())?;
        self.file.write_all(&body)?;
        self.file.write_all(&crc.to_be_bytes())?;
        if self.fsync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    pub fn into_inner(self) -> File {
        self.file
    }

    /// Force any buffered writes to disk regardless of the per-write fsync
    /// setting, used on orderly shutdown.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Replay result: the entries that validated, and the byte offset of the
/// first bad (truncated or CRC-mismatched) entry, if any, so the caller can
/// truncate the file there before appending further entries.
pub struct ReplayResult {
    pub entries: Vec<WalEntry>,
    pub valid_len: u64,
}

/// Read and decode every well-formed entry starting right after the header.
/// Stops cleanly (without erroring) at EOF-on-boundary, a short read, or a
/// CRC mismatch.
pub fn replay(path: &Path) -> Result<ReplayResult> {
    let mut file = File::open(path)?;
    let mut full = Vec::new();
    file.read_to_end(&mut full)?;

    if full.len() < HEADER_LEN as usize || full[0..4] != MAGIC {
        return Err(DbError::Protocol(format!("{}: bad WAL magic", path.display())));
    }

    let mut pos = HEADER_LEN as usize;
    let mut entries = Vec::new();

    loop {
        if pos == full.len() {
            break; // clean EOF at entry boundary
        }
        if pos + 4 > full.len() {
            break; // truncated length prefix
        }
        let total_len = u32::from_be_bytes(full[pos..pos + 4].try_into().unwrap()) as usize;
        let entry_start = pos + 4;
        if total_len < 5 || entry_start + total_len > full.len() {
            break; // truncated body or trailing CRC
        }
        let body_end = entry_start + total_len - 4;
        let body = &full[entry_start..body_end];
        let crc_bytes = &full[body_end..entry_start + total_len];
        let expected_crc = u32::from_be_bytes(crc_bytes.try_into().unwrap());
        let actual_crc = crc32fast::hash(body);
        if actual_crc != expected_crc {
            break; // CRC mismatch
        }
        let op = match OpCode::from_u8(body[0]) {
            Some(op) => op,
            None => break,
        };
        let entry = match WalEntry::decode(op, &body[1..]) {
            Ok(e) => e,
            Err(_) => break,
        };
        entries.push(entry);
        pos = entry_start + total_len;
    }

    Ok(ReplayResult { entries, valid_len: pos as u64 })
}

/// Truncate the file to `valid_len`, discarding any trailing garbage left by
/// a crash mid-write, so subsequent appends land right after the last good
/// entry.
pub fn truncate_to(path: &Path, valid_len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(valid_len)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_insert_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.wal");
        let mut wal = WalFile::open(&path, true).unwrap();
        let entry = WalEntry::Insert {
            table: "t".into(),
            row_id: 1,
            values: vec![(0, Value::Integer(42)), (1, Value::Text("hi".into()))],
        };
        wal.append(&entry).unwrap();
        drop(wal);

        let replayed = replay(&path).unwrap();
        assert_eq!(replayed.entries.len(), 1);
        match &replayed.entries[0] {
            WalEntry::Insert { table, row_id, values } => {
                assert_eq!(table, "t");
                assert_eq!(*row_id, 1);
                assert_eq!(values.len(), 2);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn stops_cleanly_at_truncated_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.wal");
        let mut wal = WalFile::open(&path, true).unwrap();
        wal.append(&WalEntry::Delete { table: "t".into(), row_id: 1 }).unwrap();
        drop(wal);

        // corrupt: append a truncated length prefix claiming more bytes than exist
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&100u32.to_be_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }

        let replayed = replay(&path).unwrap();
        assert_eq!(replayed.entries.len(), 1);
        truncate_to(&path, replayed.valid_len).unwrap();
        let refiled = std::fs::metadata(&path).unwrap();
        assert_eq!(refiled.len(), replayed.valid_len);
    }

    #[test]
    fn detects_crc_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.wal");
        let mut wal = WalFile::open(&path, true).unwrap();
        wal.append(&WalEntry::Delete { table: "t".into(), row_id: 7 }).unwrap();
        drop(wal);

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let replayed = replay(&path).unwrap();
        assert!(replayed.entries.is_empty());
        assert_eq!(replayed.valid_len, HEADER_LEN);
    }
}
