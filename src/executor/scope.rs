//! A join scope: an ordered list of participating tables, each contributing
//! a contiguous slice of ordinals into one merged row vector.

use crate::core::{DataType, DbError, Result};
use crate::storage::TableDef;

pub struct Participant {
    pub alias: String,
    pub table_name: String,
    pub def: TableDef,
    pub offset: usize,
}

pub struct Scope {
    pub participants: Vec<Participant>,
    pub width: usize,
}

pub struct ResolvedColumn {
    pub index: usize,
    pub data_type: DataType,
}

impl Scope {
    pub fn single(alias: String, table_name: String, def: TableDef) -> Self {
        let width = def.columns.len();
        Self { participants: vec![Participant { alias, table_name, def, offset: 0 }], width }
    }

    pub fn push(&mut self, alias: String, table_name: String, def: TableDef) {
        let offset = self.width;
        self.width += def.columns.len();
        self.participants.push(Participant { alias, table_name, def, offset });
    }

    /// Resolve an unqualified column name, requiring it to be unambiguous
    /// across every participant.
    pub fn resolve_unqualified(&self, name: &str) -> Result<ResolvedColumn> {
        let mut found = None;
        for p in &self.participants {
            if let Some(col) = p.def.find_column(name) {
                if found.is_some() {
                    return Err(DbError::ColumnNotFound(format!(
                        "column reference \"{name}\" is ambiguous"
                    )));
                }
                found = Some(ResolvedColumn { index: p.offset + col.ordinal_index(p), data_type: col.data_type });
            }
        }
        found.ok_or_else(|| DbError::ColumnNotFound(name.to_string()))
    }

    /// Resolve `qualifier.name`, matching the qualifier against an alias
    /// first and the original table name second.
    pub fn resolve_qualified(&self, qualifier: &str, name: &str) -> Result<ResolvedColumn> {
        for p in &self.participants {
            if p.alias.eq_ignore_ascii_case(qualifier) || p.table_name.eq_ignore_ascii_case(qualifier) {
                let col = p
                    .def
                    .find_column(name)
                    .ok_or_else(|| DbError::ColumnNotFound(name.to_string()))?;
                return Ok(ResolvedColumn { index: p.offset + col.ordinal_index(p), data_type: col.data_type });
            }
        }
        Err(DbError::TableNotFound(qualifier.to_string()))
    }
}

/// Helper trait so `resolve_*` can map a column's table-scoped ordinal to
/// its position within the participant's own slice of live columns — the
/// two can differ once columns have been dropped.
trait OrdinalIndex {
    fn ordinal_index(&self, participant: &Participant) -> usize;
}

impl OrdinalIndex for crate::storage::ColumnDef {
    fn ordinal_index(&self, participant: &Participant) -> usize {
        participant
            .def
            .columns
            .iter()
            .position(|c| c.ordinal == self.ordinal)
            .expect("column belongs to its own participant's def")
    }
}
