//! The process-wide table registry. A single reader-writer
//! lock guards the name→table map; each table additionally has its own
//! reader-writer lock (`TableState` is wrapped in `Arc<RwLock<_>>`) so that
//! DML only needs the catalog lock long enough to look up the handle.

use crate::storage::table::TableState;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub struct Catalog {
    pub tables: RwLock<HashMap<String, Arc<RwLock<TableState>>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self { tables: RwLock::new(HashMap::new()) }
    }

    pub fn get(&self, name: &str) -> crate::core::Result<Arc<RwLock<TableState>>> {
        let guard = self.tables.read()?;
        guard
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| crate::core::DbError::TableNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> crate::core::Result<bool> {
        Ok(self.tables.read()?.contains_key(&name.to_ascii_lowercase()))
    }

    pub fn list_names(&self) -> crate::core::Result<Vec<String>> {
        Ok(self.tables.read()?.keys().cloned().collect())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
