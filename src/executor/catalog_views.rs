//! Virtual read-only catalog tables: a fixed
//! registry of PostgreSQL-shaped system views, each backed by a row
//! generator that reads the live catalog at query time.

use crate::core::{DataType, Value};
use crate::storage::{StorageEngine, TableDef};

pub struct VirtualColumn {
    pub name: &'static str,
    pub data_type: DataType,
}

pub struct VirtualTable {
    pub name: &'static str,
    pub schema: &'static str,
    pub columns: &'static [VirtualColumn],
}

pub const PG_TYPE: VirtualTable = VirtualTable {
    name: "pg_type",
    schema: "pg_catalog",
    columns: &[
        VirtualColumn { name: "oid", data_type: DataType::Integer },
        VirtualColumn { name: "typname", data_type: DataType::Text },
    ],
};

pub const PG_DATABASE: VirtualTable = VirtualTable {
    name: "pg_database",
    schema: "pg_catalog",
    columns: &[
        VirtualColumn { name: "oid", data_type: DataType::Integer },
        VirtualColumn { name: "datname", data_type: DataType::Text },
    ],
};

pub const PG_NAMESPACE: VirtualTable = VirtualTable {
    name: "pg_namespace",
    schema: "pg_catalog",
    columns: &[
        VirtualColumn { name: "oid", data_type: DataType::Integer },
        VirtualColumn { name: "nspname", data_type: DataType::Text },
    ],
};

pub const PG_CLASS: VirtualTable = VirtualTable {
    name: "pg_class",
    schema: "pg_catalog",
    columns: &[
        VirtualColumn { name: "oid", data_type: DataType::Integer },
        VirtualColumn { name: "relname", data_type: DataType::Text },
        VirtualColumn { name: "relnamespace", data_type: DataType::Integer },
        VirtualColumn { name: "relkind", data_type: DataType::Text },
    ],
};

pub const INFORMATION_SCHEMA_TABLES: VirtualTable = VirtualTable {
    name: "tables",
    schema: "information_schema",
    columns: &[
        VirtualColumn { name: "table_catalog", data_type: DataType::Text },
        VirtualColumn { name: "table_schema", data_type: DataType::Text },
        VirtualColumn { name: "table_name", data_type: DataType::Text },
        VirtualColumn { name: "table_type", data_type: DataType::Text },
    ],
};

pub const INFORMATION_SCHEMA_COLUMNS: VirtualTable = VirtualTable {
    name: "columns",
    schema: "information_schema",
    columns: &[
        VirtualColumn { name: "table_name", data_type: DataType::Text },
        VirtualColumn { name: "column_name", data_type: DataType::Text },
        VirtualColumn { name: "ordinal_position", data_type: DataType::Integer },
        VirtualColumn { name: "data_type", data_type: DataType::Text },
        VirtualColumn { name: "is_nullable", data_type: DataType::Text },
    ],
};

pub const INFORMATION_SCHEMA_TABLE_CONSTRAINTS: VirtualTable = VirtualTable {
    name: "table_constraints",
    schema: "information_schema",
    columns: &[
        VirtualColumn { name: "constraint_name", data_type: DataType::Text },
        VirtualColumn { name: "table_name", data_type: DataType::Text },
        VirtualColumn { name: "constraint_type", data_type: DataType::Text },
    ],
};

pub const INFORMATION_SCHEMA_KEY_COLUMN_USAGE: VirtualTable = VirtualTable {
    name: "key_column_usage",
    schema: "information_schema",
    columns: &[
        VirtualColumn { name: "constraint_name", data_type: DataType::Text },
        VirtualColumn { name: "table_name", data_type: DataType::Text },
        VirtualColumn { name: "column_name", data_type: DataType::Text },
    ],
};

pub const ALL_VIRTUAL_TABLES: &[VirtualTable] = &[
    PG_TYPE,
    PG_DATABASE,
    PG_NAMESPACE,
    PG_CLASS,
    INFORMATION_SCHEMA_TABLES,
    INFORMATION_SCHEMA_COLUMNS,
    INFORMATION_SCHEMA_TABLE_CONSTRAINTS,
    INFORMATION_SCHEMA_KEY_COLUMN_USAGE,
];

/// Look up a virtual table by name. Unqualified names try `pg_catalog`
/// first, matching PostgreSQL's default search_path.
pub fn lookup(name: &str) -> Option<&'static VirtualTable> {
    let (schema, bare) = match name.split_once('.') {
        Some((s, b)) => (Some(s), b),
        None => (None, name),
    };
    ALL_VIRTUAL_TABLES.iter().find(|t| {
        t.name.eq_ignore_ascii_case(bare)
            && schema.map(|s| s.eq_ignore_ascii_case(t.schema)).unwrap_or(true)
    })
}

fn type_name(dt: DataType) -> &'static str {
    match dt {
        DataType::Integer => "int8",
        DataType::Float => "float8",
        DataType::Text => "text",
        DataType::Boolean => "bool",
        DataType::Timestamp => "timestamptz",
    }
}

/// Generate the rows for `table` at query time from the live catalog.
pub fn generate_rows(table: &VirtualTable, storage: &StorageEngine) -> crate::core::Result<Vec<Vec<Value>>> {
    let defs = storage.list_tables()?;
    Ok(match (table.schema, table.name) {
        ("pg_catalog", "pg_type") => {
            [DataType::Integer, DataType::Float, DataType::Text, DataType::Boolean, DataType::Timestamp]
                .into_iter()
                .enumerate()
                .map(|(i, dt)| vec![Value::Integer(i as i64 + 1), Value::Text(type_name(dt).to_string())])
                .collect()
        }
        ("pg_catalog", "pg_database") => vec![vec![Value::Integer(1), Value::Text("minipg".to_string())]],
        ("pg_catalog", "pg_namespace") => vec![
            vec![Value::Integer(1), Value::Text("pg_catalog".to_string())],
            vec![Value::Integer(2), Value::Text("public".to_string())],
        ],
        ("pg_catalog", "pg_class") => defs
            .iter()
            .enumerate()
            .map(|(i, d)| {
                vec![
                    Value::Integer(i as i64 + 1),
                    Value::Text(d.name.clone()),
                    Value::Integer(2),
                    Value::Text("r".to_string()),
                ]
            })
            .collect(),
        ("information_schema", "tables") => defs
            .iter()
            .map(|d| {
                vec![
                    Value::Text("minipg".to_string()),
                    Value::Text("public".to_string()),
                    Value::Text(d.name.clone()),
                    Value::Text("BASE TABLE".to_string()),
                ]
            })
            .collect(),
        ("information_schema", "columns") => defs
            .iter()
            .flat_map(|d| {
                d.columns.iter().map(move |c| {
                    vec![
                        Value::Text(d.name.clone()),
                        Value::Text(c.name.clone()),
                        Value::Integer(c.ordinal as i64 + 1),
                        Value::Text(type_name(c.data_type).to_string()),
                        Value::Text(if c.not_null { "NO".to_string() } else { "YES".to_string() }),
                    ]
                })
            })
            .collect(),
        ("information_schema", "table_constraints") => defs
            .iter()
            .filter_map(|d| {
                d.primary_key_ordinal().map(|_| {
                    vec![
                        Value::Text(format!("{}_pkey", d.name)),
                        Value::Text(d.name.clone()),
                        Value::Text("PRIMARY KEY".to_string()),
                    ]
                })
            })
            .collect(),
        ("information_schema", "key_column_usage") => defs
            .iter()
            .filter_map(|d: &TableDef| {
                let ord = d.primary_key_ordinal()?;
                let col = d.column_by_ordinal(ord)?;
                Some(vec![
                    Value::Text(format!("{}_pkey", d.name)),
                    Value::Text(d.name.clone()),
                    Value::Text(col.name.clone()),
                ])
            })
            .collect(),
        _ => Vec::new(),
    })
}
