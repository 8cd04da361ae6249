//! In-memory table shapes: column/table definitions, ordinal-indexed rows,
//! and the heap + index + WAL bundle a catalog entry points at.

use crate::core::{DataType, Value};
use crate::storage::btree::BTreeIndex;
use crate::storage::wal::WalFile;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub ordinal: u32,
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub column_ordinal: u32,
    pub unique: bool,
}

/// A table's schema: live columns in creation order (dropped columns are
/// removed from this list, never renumbered), the next
/// ordinal to assign, and its index definitions.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub next_ordinal: u32,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: String, columns: Vec<ColumnDef>) -> Self {
        let next_ordinal = columns.iter().map(|c| c.ordinal + 1).max().unwrap_or(0);
        Self { name, columns, next_ordinal, indexes: Vec::new() }
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_by_ordinal(&self, ordinal: u32) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.ordinal == ordinal)
    }

    pub fn primary_key_ordinal(&self) -> Option<u32> {
        self.columns.iter().find(|c| c.primary_key).map(|c| c.ordinal)
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name.eq_ignore_ascii_case(name))
    }
}

/// A row keyed by ordinal rather than position, so ADD/DROP COLUMN never
/// rewrites existing rows.
#[derive(Debug, Clone, Default)]
pub struct Row {
    values: Vec<Option<Value>>,
}

impl Row {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn set(&mut self, ordinal: u32, value: Value) {
        let idx = ordinal as usize;
        if self.values.len() <= idx {
            self.values.resize(idx + 1, None);
        }
        self.values[idx] = Some(value);
    }

    pub fn get(&self, ordinal: u32) -> Value {
        self.values
            .get(ordinal as usize)
            .and_then(|v| v.clone())
            .unwrap_or(Value::Null)
    }

    pub fn from_pairs(pairs: Vec<(u32, Value)>) -> Self {
        let mut row = Self::new();
        for (ord, v) in pairs {
            row.set(ord, v);
        }
        row
    }

    pub fn live_pairs<'a>(&'a self, def: &'a TableDef) -> Vec<(u32, Value)> {
        def.columns.iter().map(|c| (c.ordinal, self.get(c.ordinal))).collect()
    }
}

/// One table's live state: definition, heap, indexes, its append-only WAL,
/// and the race-safe drop flag.
pub struct TableState {
    pub def: TableDef,
    pub heap: HashMap<u64, Row>,
    pub indexes: HashMap<String, BTreeIndex>,
    pub next_row_id: u64,
    pub dropped: bool,
    pub wal: WalFile,
}

impl TableState {
    pub fn new(def: TableDef, wal: WalFile) -> Self {
        let mut indexes = HashMap::new();
        if let Some(pk_ord) = def.primary_key_ordinal() {
            indexes.insert("__pk".to_string(), BTreeIndex::new(true));
            let _ = pk_ord;
        }
        Self { def, heap: HashMap::new(), indexes, next_row_id: 1, dropped: false, wal }
    }

    pub fn pk_index(&self) -> Option<&BTreeIndex> {
        self.indexes.get("__pk")
    }

    pub fn pk_index_mut(&mut self) -> Option<&mut BTreeIndex> {
        self.indexes.get_mut("__pk")
    }
}
