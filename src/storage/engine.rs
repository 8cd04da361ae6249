//! The storage engine capability object. Consumed by the executor
//! through plain method calls — no trait is needed since there is exactly
//! one implementation (a trait boundary would be added the moment a
//! second implementation, e.g. a test mock, is needed).

use crate::core::{DataType, DbError, Result, Value};
use crate::storage::btree::BTreeIndex;
use crate::storage::catalog::Catalog;
use crate::storage::recovery;
use crate::storage::table::{ColumnDef, IndexDef, Row, TableDef, TableState};
use crate::storage::wal::{WalColumn, WalEntry, WalFile};
use crate::storage::{encode_table_name, StorageConfig};
use log::info;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

/// Input shape for a new column before a table-scoped ordinal is assigned.
#[derive(Debug, Clone)]
pub struct NewColumn {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub primary_key: bool,
}

pub struct StorageEngine {
    data_dir: PathBuf,
    fsync: bool,
    catalog: Catalog,
    catalog_wal: Mutex<WalFile>,
}

impl StorageEngine {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        fs::create_dir_all(config.data_dir.join("tables"))?;

        if config.data_dir.join("wal.dat").exists()
            && !config.data_dir.join("catalog.wal").exists()
        {
            if !config.migrate_on_open {
                return Err(DbError::Internal(
                    "legacy single-file WAL detected; open with migrate_on_open=true".into(),
                ));
            }
            info!("migrating legacy single-file WAL layout at {}", config.data_dir.display());
            crate::storage::migration::migrate_legacy_layout(config)?;
        }

        let catalog_path = config.data_dir.join("catalog.wal");
        let (catalog, catalog_wal) = recovery::recover(&catalog_path, config)?;
        info!("recovered {} table(s) from {}", catalog.tables.read()?.len(), config.data_dir.display());

        Ok(Self {
            data_dir: config.data_dir.clone(),
            fsync: config.fsync,
            catalog,
            catalog_wal: Mutex::new(catalog_wal),
        })
    }

    pub fn table_wal_path(data_dir: &std::path::Path, table: &str) -> PathBuf {
        data_dir.join("tables").join(format!("{}.wal", encode_table_name(table)))
    }

    fn append_catalog(&self, entry: &WalEntry) -> Result<()> {
        self.catalog_wal.lock()?.append(entry)
    }

    pub fn create_table(&self, name: &str, columns: Vec<NewColumn>) -> Result<()> {
        let lname = name.to_ascii_lowercase();

        {
            let mut names = std::collections::HashSet::new();
            let mut pk_count = 0;
            for c in &columns {
                if !names.insert(c.name.to_ascii_lowercase()) {
                    return Err(DbError::InvalidParam(format!(
                        "column \"{}\" specified more than once",
                        c.name
                    )));
                }
                if c.primary_key {
                    pk_count += 1;
                }
            }
            if pk_count > 1 {
                return Err(DbError::InvalidParam("multiple primary keys are not allowed".into()));
            }
        }

        let mut write_guard = self.catalog.tables.write()?;
        if write_guard.contains_key(&lname) {
            return Err(DbError::TableExists(name.to_string()));
        }

        let col_defs: Vec<ColumnDef> = columns
            .into_iter()
            .enumerate()
            .map(|(i, c)| ColumnDef {
                ordinal: i as u32,
                name: c.name,
                data_type: c.data_type,
                not_null: c.not_null,
                primary_key: c.primary_key,
            })
            .collect();

        let wal_columns: Vec<WalColumn> = col_defs
            .iter()
            .map(|c| WalColumn {
                ordinal: c.ordinal,
                name: c.name.clone(),
                data_type: c.data_type,
                not_null: c.not_null,
                primary_key: c.primary_key,
            })
            .collect();

        self.append_catalog(&WalEntry::CreateTable { table: lname.clone(), columns: wal_columns })?;

        let def = TableDef::new(lname.clone(), col_defs);
        let wal_path = Self::table_wal_path(&self.data_dir, &lname);
        let wal = WalFile::open(&wal_path, self.fsync)?;
        let state = TableState::new(def, wal);

        write_guard.insert(lname, Arc::new(RwLock::new(state)));
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        let lname = name.to_ascii_lowercase();
        let mut write_guard = self.catalog.tables.write()?;
        let handle = write_guard
            .get(&lname)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))?;

        self.append_catalog(&WalEntry::DropTable { table: lname.clone() })?;

        {
            let mut state = handle.write()?;
            state.dropped = true;
        }
        write_guard.remove(&lname);

        let wal_path = Self::table_wal_path(&self.data_dir, &lname);
        let _ = fs::remove_file(wal_path);
        Ok(())
    }

    pub fn add_column(&self, table: &str, col: NewColumn) -> Result<()> {
        let handle = self.catalog.get(table)?;
        let mut state = handle.write()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        if state.def.find_column(&col.name).is_some() {
            return Err(DbError::DuplicateColumn(col.name, table.to_string()));
        }
        if col.not_null {
            return Err(DbError::InvalidOperation(
                col.name,
                "cannot add a NOT NULL column without a default".into(),
            ));
        }
        let ordinal = state.def.next_ordinal;
        state.def.next_ordinal += 1;
        let def = ColumnDef {
            ordinal,
            name: col.name.clone(),
            data_type: col.data_type,
            not_null: col.not_null,
            primary_key: false,
        };
        self.append_catalog(&WalEntry::AddColumn {
            table: table.to_ascii_lowercase(),
            column: WalColumn {
                ordinal,
                name: def.name.clone(),
                data_type: def.data_type,
                not_null: def.not_null,
                primary_key: def.primary_key,
            },
        })?;
        state.def.columns.push(def);
        Ok(())
    }

    pub fn drop_column(&self, table: &str, col_name: &str) -> Result<()> {
        let handle = self.catalog.get(table)?;
        let mut state = handle.write()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        let col = state
            .def
            .find_column(col_name)
            .cloned()
            .ok_or_else(|| DbError::ColumnNotFound(col_name.to_string()))?;
        if col.primary_key {
            return Err(DbError::InvalidOperation(
                col_name.to_string(),
                "cannot drop the primary key column".into(),
            ));
        }
        if state.def.columns.len() == 1 {
            return Err(DbError::InvalidOperation(
                col_name.to_string(),
                "cannot drop the only column".into(),
            ));
        }
        self.append_catalog(&WalEntry::DropColumn {
            table: table.to_ascii_lowercase(),
            ordinal: col.ordinal,
        })?;
        state.def.columns.retain(|c| c.ordinal != col.ordinal);
        Ok(())
    }

    /// Pre-validate and apply a batch of inserts.
    pub fn insert(
        &self,
        table: &str,
        columns_or_none: Option<Vec<String>>,
        rows: Vec<Vec<Value>>,
    ) -> Result<usize> {
        let handle = self.catalog.get(table)?;
        let mut state = handle.write()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }

        let live_columns = state.def.columns.clone();
        let ordinals: Vec<u32> = match &columns_or_none {
            Some(names) => {
                let mut ords = Vec::with_capacity(names.len());
                for n in names {
                    let c = live_columns
                        .iter()
                        .find(|c| c.name.eq_ignore_ascii_case(n))
                        .ok_or_else(|| DbError::ColumnNotFound(n.clone()))?;
                    ords.push(c.ordinal);
                }
                ords
            }
            None => live_columns.iter().map(|c| c.ordinal).collect(),
        };

        if rows.iter().any(|r| r.len() != ordinals.len()) {
            return Err(DbError::InvalidParam(format!(
                "INSERT has {} target columns but a row with a different number of values",
                ordinals.len()
            )));
        }

        let mut prepared: Vec<Vec<(u32, Value)>> = Vec::with_capacity(rows.len());
        let mut scratch_pk: std::collections::HashSet<PkKey> = std::collections::HashSet::new();
        let pk_ordinal = state.def.primary_key_ordinal();

        for row in rows {
            let mut pairs = Vec::with_capacity(row.len());
            for (ord, raw) in ordinals.iter().zip(row.into_iter()) {
                let col = live_columns.iter().find(|c| c.ordinal == *ord).unwrap();
                let coerced = col.data_type.coerce(raw)?;
                if coerced.is_null() && col.not_null {
                    return Err(DbError::NotNullViolation(col.name.clone()));
                }
                pairs.push((*ord, coerced));
            }

            if let Some(pk_ord) = pk_ordinal {
                let v = pairs.iter().find(|(o, _)| *o == pk_ord).map(|(_, v)| v.clone()).unwrap_or(Value::Null);
                if !v.is_null() {
                    let key = PkKey::from(&v);
                    if !scratch_pk.insert(key) {
                        return Err(DbError::UniqueViolation(format!("{}_pkey", table)));
                    }
                    if state.pk_index().unwrap().get(&v).is_some() {
                        return Err(DbError::UniqueViolation(format!("{}_pkey", table)));
                    }
                }
            }

            for idx_def in &state.def.indexes {
                if !idx_def.unique {
                    continue;
                }
                let v = pairs
                    .iter()
                    .find(|(o, _)| *o == idx_def.column_ordinal)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Null);
                if !v.is_null() && state.indexes[&idx_def.name].get(&v).is_some() {
                    return Err(DbError::UniqueViolation(idx_def.name.clone()));
                }
            }

            prepared.push(pairs);
        }

        let n = prepared.len();
        for pairs in prepared {
            let row_id = state.next_row_id;
            state.next_row_id += 1;

            state.wal.append(&WalEntry::Insert {
                table: table.to_ascii_lowercase(),
                row_id,
                values: pairs.clone(),
            })?;

            apply_to_indexes(&mut state, &pairs, row_id, IndexOp::Put);
            let row = Row::from_pairs(pairs);
            state.heap.insert(row_id, row);
        }

        Ok(n)
    }

    /// `update(table, sets, filter)`: `compute` maps an existing row to the
    /// set of `(ordinal, new_value)` assignments for rows the filter keeps,
    /// or `None` to skip. Filtering itself happens in the executor, which
    /// drives `compute` against each heap row under the table write lock.
    pub fn update_with<F>(&self, table: &str, mut compute: F) -> Result<usize>
    where
        F: FnMut(u64, &Row) -> Result<Option<Vec<(u32, Value)>>>,
    {
        let handle = self.catalog.get(table)?;
        let mut state = handle.write()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }

        let row_ids: Vec<u64> = state.heap.keys().copied().collect();
        let mut changes: Vec<(u64, Vec<(u32, Value)>)> = Vec::new();
        for row_id in row_ids {
            let row = state.heap.get(&row_id).unwrap().clone();
            if let Some(new_values) = compute(row_id, &row)? {
                changes.push((row_id, new_values));
            }
        }

        // Pre-validate uniqueness across the batch + existing indexes,
        // treating each row's own current entry as already removed.
        let mut scratch_pk: std::collections::HashSet<PkKey> = std::collections::HashSet::new();
        let pk_ordinal = state.def.primary_key_ordinal();
        for (row_id, new_values) in &changes {
            if let Some(pk_ord) = pk_ordinal {
                let new_v = new_values.iter().find(|(o, _)| *o == pk_ord).map(|(_, v)| v.clone());
                if let Some(new_v) = new_v {
                    if new_v.is_null() {
                        continue;
                    }
                    let key = PkKey::from(&new_v);
                    if !scratch_pk.insert(key) {
                        return Err(DbError::UniqueViolation(format!("{}_pkey", table)));
                    }
                    if let Some(existing_row_id) = state.pk_index().unwrap().get(&new_v) {
                        if existing_row_id != *row_id {
                            return Err(DbError::UniqueViolation(format!("{}_pkey", table)));
                        }
                    }
                }
            }
        }

        for (row_id, new_values) in &changes {
            state.wal.append(&WalEntry::Update {
                table: table.to_ascii_lowercase(),
                row_id: *row_id,
                values: new_values.clone(),
            })?;
        }

        let n = changes.len();
        for (row_id, new_values) in changes {
            let old_row = state.heap.get(&row_id).unwrap().clone();
            let old_pairs = old_row.live_pairs(&state.def);
            apply_to_indexes(&mut state, &old_pairs, row_id, IndexOp::Delete);

            let mut row = old_row;
            for (ord, v) in &new_values {
                row.set(*ord, v.clone());
            }
            let new_pairs = row.live_pairs(&state.def);
            apply_to_indexes(&mut state, &new_pairs, row_id, IndexOp::Put);
            state.heap.insert(row_id, row);
        }
        Ok(n)
    }

    pub fn delete_with<F>(&self, table: &str, mut keep: F) -> Result<usize>
    where
        F: FnMut(&Row) -> Result<bool>,
    {
        let handle = self.catalog.get(table)?;
        let mut state = handle.write()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }

        let mut to_delete = Vec::new();
        for (row_id, row) in state.heap.iter() {
            if keep(row)? {
                to_delete.push(*row_id);
            }
        }

        for row_id in &to_delete {
            state.wal.append(&WalEntry::Delete {
                table: table.to_ascii_lowercase(),
                row_id: *row_id,
            })?;
        }

        let n = to_delete.len();
        for row_id in to_delete {
            if let Some(row) = state.heap.remove(&row_id) {
                let pairs = row.live_pairs(&state.def);
                apply_to_indexes(&mut state, &pairs, row_id, IndexOp::Delete);
            }
        }
        Ok(n)
    }

    /// Copy every live row into a snapshot vector while holding the read
    /// lock only for the copy.
    pub fn scan(&self, table: &str) -> Result<(TableDef, Vec<(u64, Row)>)> {
        let handle = self.catalog.get(table)?;
        let state = handle.read()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        let snapshot: Vec<(u64, Row)> = state.heap.iter().map(|(id, r)| (*id, r.clone())).collect();
        Ok((state.def.clone(), snapshot))
    }

    pub fn table_def(&self, table: &str) -> Result<TableDef> {
        let handle = self.catalog.get(table)?;
        let state = handle.read()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        Ok(state.def.clone())
    }

    pub fn lookup_by_pk(&self, table: &str, value: &Value) -> Result<Option<(u64, Row)>> {
        let handle = self.catalog.get(table)?;
        let state = handle.read()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        let Some(idx) = state.pk_index() else {
            return Ok(None);
        };
        Ok(idx.get(value).map(|id| (id, state.heap.get(&id).unwrap().clone())))
    }

    pub fn lookup_by_index(&self, table: &str, index_name: &str, value: &Value) -> Result<Vec<(u64, Row)>> {
        let handle = self.catalog.get(table)?;
        let state = handle.read()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        let idx = state
            .indexes
            .get(index_name)
            .ok_or_else(|| DbError::IndexNotFound(index_name.to_string()))?;
        Ok(idx
            .get_all(value)
            .into_iter()
            .map(|id| (id, state.heap.get(&id).unwrap().clone()))
            .collect())
    }

    pub fn create_index(&self, table: &str, name: &str, column: &str, unique: bool) -> Result<()> {
        let handle = self.catalog.get(table)?;
        let mut state = handle.write()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        if state.def.find_index(name).is_some() {
            return Err(DbError::InvalidParam(format!("index \"{name}\" already exists")));
        }
        let col = state
            .def
            .find_column(column)
            .cloned()
            .ok_or_else(|| DbError::ColumnNotFound(column.to_string()))?;

        let mut index = BTreeIndex::new(unique);
        for (row_id, row) in state.heap.iter() {
            let v = row.get(col.ordinal);
            if v.is_null() {
                continue;
            }
            if index.put(v, *row_id).is_err() {
                return Err(DbError::UniqueViolation(name.to_string()));
            }
        }

        self.append_catalog(&WalEntry::CreateIndex {
            table: table.to_ascii_lowercase(),
            name: name.to_string(),
            column_ordinal: col.ordinal,
            unique,
        })?;

        state.indexes.insert(name.to_string(), index);
        state.def.indexes.push(IndexDef { name: name.to_string(), column_ordinal: col.ordinal, unique });
        Ok(())
    }

    pub fn drop_index(&self, table: &str, name: &str) -> Result<()> {
        let handle = self.catalog.get(table)?;
        let mut state = handle.write()?;
        if state.dropped {
            return Err(DbError::TableNotFound(table.to_string()));
        }
        if state.def.find_index(name).is_none() {
            return Err(DbError::IndexNotFound(name.to_string()));
        }
        self.append_catalog(&WalEntry::DropIndex {
            table: table.to_ascii_lowercase(),
            name: name.to_string(),
        })?;
        state.indexes.remove(name);
        state.def.indexes.retain(|i| i.name != name);
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        self.catalog.contains(name)
    }

    pub fn list_tables(&self) -> Result<Vec<TableDef>> {
        let guard = self.catalog.tables.read()?;
        let mut defs = Vec::with_capacity(guard.len());
        for handle in guard.values() {
            defs.push(handle.read()?.def.clone());
        }
        Ok(defs)
    }

    /// Flush every WAL handle to disk. Called on orderly shutdown so a
    /// data directory opened with `fsync: false` still leaves a durable
    /// tail behind.
    pub fn close(&self) -> Result<()> {
        self.catalog_wal.lock()?.sync()?;
        let guard = self.catalog.tables.read()?;
        for handle in guard.values() {
            handle.write()?.wal.sync()?;
        }
        Ok(())
    }
}

#[derive(Hash, PartialEq, Eq)]
enum PkKey {
    Int(i64),
    FloatBits(u64),
    Text(String),
    Bool(bool),
}

impl From<&Value> for PkKey {
    fn from(v: &Value) -> Self {
        match v {
            Value::Integer(i) => PkKey::Int(*i),
            Value::Float(f) => PkKey::FloatBits(f.to_bits()),
            Value::Text(s) => PkKey::Text(s.clone()),
            Value::Boolean(b) => PkKey::Bool(*b),
            Value::Timestamp(ts) => PkKey::Int(ts.timestamp_micros()),
            Value::Null => PkKey::Bool(false),
        }
    }
}

enum IndexOp {
    Put,
    Delete,
}

fn apply_to_indexes(state: &mut TableState, pairs: &[(u32, Value)], row_id: u64, op: IndexOp) {
    let pk_ordinal = state.def.primary_key_ordinal();
    let secondary: Vec<IndexDef> = state.def.indexes.clone();

    if let Some(pk_ord) = pk_ordinal {
        if let Some((_, v)) = pairs.iter().find(|(o, _)| *o == pk_ord) {
            match op {
                IndexOp::Put => {
                    let _ = state.pk_index_mut().unwrap().put(v.clone(), row_id);
                }
                IndexOp::Delete => state.pk_index_mut().unwrap().delete(v, row_id),
            }
        }
    }

    for idx_def in &secondary {
        if let Some((_, v)) = pairs.iter().find(|(o, _)| *o == idx_def.column_ordinal) {
            let index = state.indexes.get_mut(&idx_def.name).unwrap();
            match op {
                IndexOp::Put => {
                    let _ = index.put(v.clone(), row_id);
                }
                IndexOp::Delete => index.delete(v, row_id),
            }
        }
    }
}

// Re-exported so callers constructing prepared inserts don't reach into
// storage::btree for just the error type.
pub use crate::storage::btree::PutError as IndexPutError;
