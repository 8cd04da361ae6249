//! Statement dispatch and execution. The executor owns no state of its
//! own — it borrows a [`StorageEngine`] for the duration of one statement.

pub mod catalog_views;
pub mod expr;
pub mod functions;
pub mod join;
pub mod result;
pub mod scope;

use crate::core::{DataType, DbError, Result, Value};
use crate::executor::expr::{compile, CompiledExpr};
use crate::executor::functions::{is_aggregate, Accumulator};
use crate::executor::join::{nested_loop, JoinInput};
use crate::executor::result::{ColumnInfo, ExecResult};
use crate::executor::scope::Scope;
use crate::parser::ast::*;
use crate::storage::{ColumnDef as StorageColumn, NewColumn, Row, StorageEngine, TableDef};
use log::info;
use std::cmp::Ordering;

pub struct Executor<'a> {
    storage: &'a StorageEngine,
}

impl<'a> Executor<'a> {
    pub fn new(storage: &'a StorageEngine) -> Self {
        Self { storage }
    }

    pub fn execute(&self, stmt: &Statement) -> Result<ExecResult> {
        match stmt {
            Statement::Begin => Ok(ExecResult::command_only("BEGIN")),
            Statement::Commit => Ok(ExecResult::command_only("COMMIT")),
            Statement::Rollback => Ok(ExecResult::command_only("ROLLBACK")),
            Statement::CreateTable(s) => self.create_table(s),
            Statement::DropTable(s) => self.drop_table(s),
            Statement::AlterTable(s) => self.alter_table(s),
            Statement::CreateIndex(s) => self.create_index(s),
            Statement::DropIndex(s) => self.drop_index(s),
            Statement::Insert(s) => self.insert(s),
            Statement::Update(s) => self.update(s),
            Statement::Delete(s) => self.delete(s),
            Statement::Query(s) => self.query(s),
        }
    }

    fn guard_not_virtual(&self, table_name: &str, op: &str) -> Result<()> {
        if catalog_views::lookup(table_name).is_some() {
            return Err(DbError::WrongObjectType(op.to_string()));
        }
        Ok(())
    }

    fn create_table(&self, s: &CreateTableStmt) -> Result<ExecResult> {
        self.guard_not_virtual(&s.table_name, "create")?;
        let columns = s
            .columns
            .iter()
            .map(|c| NewColumn {
                name: c.name.clone(),
                data_type: c.data_type,
                not_null: c.not_null,
                primary_key: c.primary_key,
            })
            .collect();
        self.storage.create_table(&s.table_name, columns)?;
        info!("created table \"{}\"", s.table_name);
        Ok(ExecResult::command_only("CREATE TABLE"))
    }

    fn drop_table(&self, s: &DropTableStmt) -> Result<ExecResult> {
        self.guard_not_virtual(&s.table_name, "drop")?;
        self.storage.drop_table(&s.table_name)?;
        info!("dropped table \"{}\"", s.table_name);
        Ok(ExecResult::command_only("DROP TABLE"))
    }

    fn alter_table(&self, s: &AlterTableStmt) -> Result<ExecResult> {
        self.guard_not_virtual(&s.table_name, "alter")?;
        match &s.operation {
            AlterTableOperation::AddColumn(c) => {
                self.storage.add_column(
                    &s.table_name,
                    NewColumn {
                        name: c.name.clone(),
                        data_type: c.data_type,
                        not_null: c.not_null,
                        primary_key: c.primary_key,
                    },
                )?;
            }
            AlterTableOperation::DropColumn(name) => {
                self.storage.drop_column(&s.table_name, name)?;
            }
        }
        info!("altered table \"{}\"", s.table_name);
        Ok(ExecResult::command_only("ALTER TABLE"))
    }

    fn create_index(&self, s: &CreateIndexStmt) -> Result<ExecResult> {
        self.guard_not_virtual(&s.table_name, "create index on")?;
        self.storage.create_index(&s.table_name, &s.index_name, &s.column, s.unique)?;
        info!("created index \"{}\" on \"{}\"", s.index_name, s.table_name);
        Ok(ExecResult::command_only("CREATE INDEX"))
    }

    fn drop_index(&self, s: &DropIndexStmt) -> Result<ExecResult> {
        // The index name alone doesn't name its table; scan every table's
        // definition for a matching index, mirroring how the catalog itself
        // has no separate index->table map.
        let mut target: Option<String> = None;
        for def in self.storage.list_tables()? {
            if def.find_index(&s.index_name).is_some() {
                target = Some(def.name);
                break;
            }
        }
        let table = target.ok_or_else(|| DbError::IndexNotFound(s.index_name.clone()))?;
        self.storage.drop_index(&table, &s.index_name)?;
        info!("dropped index \"{}\" on \"{}\"", s.index_name, table);
        Ok(ExecResult::command_only("DROP INDEX"))
    }

    fn insert(&self, s: &InsertStmt) -> Result<ExecResult> {
        self.guard_not_virtual(&s.table_name, "insert into")?;
        let empty_scope = Scope { participants: Vec::new(), width: 0 };
        let mut rows = Vec::with_capacity(s.values.len());
        for value_row in &s.values {
            let mut evaluated = Vec::with_capacity(value_row.len());
            for expr in value_row {
                let compiled = compile(expr, &empty_scope)?;
                evaluated.push(compiled(&[])?);
            }
            rows.push(evaluated);
        }
        let n = self.storage.insert(&s.table_name, s.columns.clone(), rows)?;
        Ok(ExecResult::command_only(format!("INSERT 0 {n}")))
    }

    fn update(&self, s: &UpdateStmt) -> Result<ExecResult> {
        self.guard_not_virtual(&s.table_name, "update")?;
        let def = self.storage.table_def(&s.table_name)?;
        let scope = Scope::single(s.table_name.clone(), s.table_name.clone(), def.clone());

        let compiled_selection =
            s.selection.as_ref().map(|e| compile(e, &scope)).transpose()?;

        let mut compiled_assignments = Vec::with_capacity(s.assignments.len());
        for a in &s.assignments {
            let col = def
                .find_column(&a.column)
                .cloned()
                .ok_or_else(|| DbError::ColumnNotFound(a.column.clone()))?;
            compiled_assignments.push((col, compile(&a.value, &scope)?));
        }

        let n = self.storage.update_with(&s.table_name, |_row_id, row| {
            let merged = row.live_pairs(&def).into_iter().map(|(_, v)| v).collect::<Vec<_>>();
            if let Some(pred) = &compiled_selection {
                if !matches!(pred(&merged)?, Value::Boolean(true)) {
                    return Ok(None);
                }
            }
            let mut assignments = Vec::with_capacity(compiled_assignments.len());
            for (col, compiled) in &compiled_assignments {
                let raw = compiled(&merged)?;
                let coerced = col.data_type.coerce(raw)?;
                if coerced.is_null() && col.not_null {
                    return Err(DbError::NotNullViolation(col.name.clone()));
                }
                assignments.push((col.ordinal, coerced));
            }
            Ok(Some(assignments))
        })?;
        Ok(ExecResult::command_only(format!("UPDATE {n}")))
    }

    fn delete(&self, s: &DeleteStmt) -> Result<ExecResult> {
        self.guard_not_virtual(&s.table_name, "delete from")?;
        let def = self.storage.table_def(&s.table_name)?;
        let scope = Scope::single(s.table_name.clone(), s.table_name.clone(), def.clone());
        let compiled_selection =
            s.selection.as_ref().map(|e| compile(e, &scope)).transpose()?;

        let n = self.storage.delete_with(&s.table_name, |row| {
            let Some(pred) = &compiled_selection else {
                return Ok(true);
            };
            let merged = row.live_pairs(&def).into_iter().map(|(_, v)| v).collect::<Vec<_>>();
            Ok(matches!(pred(&merged)?, Value::Boolean(true)))
        })?;
        Ok(ExecResult::command_only(format!("DELETE {n}")))
    }

    fn query(&self, q: &QueryStmt) -> Result<ExecResult> {
        if q.from.is_empty() {
            return self.static_select(q);
        }

        let is_join = q.from.len() > 1 || !q.from[0].joins.is_empty();
        if is_join {
            return self.join_select(q);
        }

        self.single_table_select(q, &q.from[0].relation)
    }

    fn static_select(&self, q: &QueryStmt) -> Result<ExecResult> {
        let scope = Scope { participants: Vec::new(), width: 0 };
        let (columns, values) = self.project(&q.projection, &scope, &[Vec::new()])?;
        Ok(ExecResult::select(columns, values))
    }

    fn single_table_select(&self, q: &QueryStmt, table: &TableFactor) -> Result<ExecResult> {
        let alias = table.alias.clone().unwrap_or_else(|| table.name.clone());

        if let Some(vt) = catalog_views::lookup(&table.name) {
            let def = virtual_table_def(vt);
            let values = catalog_views::generate_rows(vt, self.storage)?;
            let scope = Scope::single(alias, table.name.clone(), def);
            return self.finish_select(q, &scope, values);
        }

        let def = self.storage.table_def(&table.name)?;

        if table.indexed_by.is_some() && is_join_query(q) {
            return Err(DbError::FeatureNotSupported("INDEXED BY in a join".into()));
        }

        // Access-path selection: PK equality first, then a named index
        // lookup, then a full scan — all three ultimately filtered by the
        // full WHERE predicate so the optimization can never change results.
        if let Some(pk_ord) = def.primary_key_ordinal() {
            if let Some(selection) = &q.selection {
                if let Some(literal) = find_equality_literal(selection, &def, pk_ord)? {
                    let found = self.storage.lookup_by_pk(&table.name, &literal)?;
                    let values: Vec<Vec<Value>> = found
                        .into_iter()
                        .map(|(_, row)| row.live_pairs(&def).into_iter().map(|(_, v)| v).collect())
                        .collect();
                    let scope = Scope::single(alias, table.name.clone(), def);
                    return self.finish_select(q, &scope, values);
                }
            }
        }

        if let Some(index_name) = &table.indexed_by {
            let idx_def = def
                .find_index(index_name)
                .cloned()
                .ok_or_else(|| DbError::IndexNotFound(index_name.clone()))?;
            if let Some(selection) = &q.selection {
                if let Some(literal) = find_equality_literal(selection, &def, idx_def.column_ordinal)? {
                    let found = self.storage.lookup_by_index(&table.name, index_name, &literal)?;
                    let values: Vec<Vec<Value>> = found
                        .into_iter()
                        .map(|(_, row)| row.live_pairs(&def).into_iter().map(|(_, v)| v).collect())
                        .collect();
                    let scope = Scope::single(alias, table.name.clone(), def);
                    return self.finish_select(q, &scope, values);
                }
            }
        }

        let (_, snapshot) = self.storage.scan(&table.name)?;
        let values: Vec<Vec<Value>> = snapshot
            .into_iter()
            .map(|(_, row)| row.live_pairs(&def).into_iter().map(|(_, v)| v).collect())
            .collect();
        let scope = Scope::single(alias, table.name.clone(), def);
        self.finish_select(q, &scope, values)
    }

    fn join_select(&self, q: &QueryStmt) -> Result<ExecResult> {
        let first = &q.from[0];
        if first.relation.indexed_by.is_some() || first.joins.iter().any(|j| j.relation.indexed_by.is_some()) {
            return Err(DbError::FeatureNotSupported("INDEXED BY in a join".into()));
        }

        let mut scope = self.table_scope(&first.relation)?;
        let mut inputs = vec![self.join_input(&first.relation, &scope)?];
        let mut on_filters: Vec<Option<CompiledExpr>> = Vec::new();

        for join in &first.joins {
            let def = self.table_def_for(&join.relation)?;
            let alias = join.relation.alias.clone().unwrap_or_else(|| join.relation.name.clone());
            scope.push(alias, join.relation.name.clone(), def);
            let compiled_on = join.on.as_ref().map(|e| compile(e, &scope)).transpose()?;
            inputs.push(self.join_input(&join.relation, &scope)?);
            on_filters.push(compiled_on);
        }

        for extra in &q.from[1..] {
            if !extra.joins.is_empty() || extra.relation.indexed_by.is_some() {
                return Err(DbError::FeatureNotSupported("INDEXED BY in a join".into()));
            }
            let def = self.table_def_for(&extra.relation)?;
            let alias = extra.relation.alias.clone().unwrap_or_else(|| extra.relation.name.clone());
            scope.push(alias, extra.relation.name.clone(), def);
            inputs.push(self.join_input(&extra.relation, &scope)?);
            on_filters.push(None);
        }

        let mut values = Vec::new();
        nested_loop(&inputs, &on_filters, &mut |merged| {
            values.push(merged.to_vec());
            Ok(())
        })?;

        self.finish_select(q, &scope, values)
    }

    fn table_def_for(&self, table: &TableFactor) -> Result<TableDef> {
        if let Some(vt) = catalog_views::lookup(&table.name) {
            return Ok(virtual_table_def(vt));
        }
        self.storage.table_def(&table.name)
    }

    fn table_scope(&self, table: &TableFactor) -> Result<Scope> {
        let def = self.table_def_for(table)?;
        let alias = table.alias.clone().unwrap_or_else(|| table.name.clone());
        Ok(Scope::single(alias, table.name.clone(), def))
    }

    fn join_input(&self, table: &TableFactor, _scope: &Scope) -> Result<JoinInput> {
        let (def, rows) = if let Some(vt) = catalog_views::lookup(&table.name) {
            let def = virtual_table_def(vt);
            let values = catalog_views::generate_rows(vt, self.storage)?;
            let rows = values
                .into_iter()
                .map(|vals| Row::from_pairs(vals.into_iter().enumerate().map(|(i, v)| (i as u32, v)).collect()))
                .collect();
            (def, rows)
        } else {
            let (def, snapshot) = self.storage.scan(&table.name)?;
            (def, snapshot.into_iter().map(|(_, r)| r).collect())
        };
        let live_ordinals = def.columns.iter().map(|c| c.ordinal).collect();
        Ok(JoinInput { rows, live_ordinals })
    }

    /// Applies WHERE (when the caller hasn't already filtered), aggregation
    /// or projection, ORDER BY, and LIMIT/OFFSET over an already-gathered
    /// row set.
    fn finish_select(&self, q: &QueryStmt, scope: &Scope, mut rows: Vec<Vec<Value>>) -> Result<ExecResult> {
        // A PK/index lookup only narrows candidates by one conjunct, so the
        // full predicate is always re-applied here for correctness.
        if let Some(selection) = &q.selection {
            let compiled = compile(selection, scope)?;
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if matches!(compiled(&row)?, Value::Boolean(true)) {
                    kept.push(row);
                }
            }
            rows = kept;
        }

        let any_agg = q.projection.iter().any(is_top_level_aggregate);
        let all_agg = !q.projection.is_empty() && q.projection.iter().all(is_top_level_aggregate);

        if any_agg && !all_agg {
            return Err(DbError::GroupingError);
        }

        if all_agg {
            if !q.order_by.is_empty() {
                return Err(DbError::FeatureNotSupported("ORDER BY with aggregate functions".into()));
            }
            return self.aggregate_select(q, scope, rows);
        }

        if !q.order_by.is_empty() {
            let keys: Vec<(CompiledExpr, bool)> = q
                .order_by
                .iter()
                .map(|o| Ok((compile(&o.expr, scope)?, o.descending)))
                .collect::<Result<_>>()?;
            let mut decorated: Vec<(Vec<Value>, Vec<Value>)> = Vec::with_capacity(rows.len());
            for row in &rows {
                let mut key = Vec::with_capacity(keys.len());
                for (k, _) in &keys {
                    key.push(k(row)?);
                }
                decorated.push((key, row.clone()));
            }
            decorated.sort_by(|a, b| {
                for (i, (_, desc)) in keys.iter().enumerate() {
                    let ord = a.0[i].sort_cmp(&b.0[i]);
                    let ord = if *desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            rows = decorated.into_iter().map(|(_, r)| r).collect();
        }

        let (columns, values) = self.project(&q.projection, scope, &rows)?;

        let start = q.offset.unwrap_or(0);
        if start < 0 {
            return Err(DbError::NegativeLimitOrOffset("OFFSET"));
        }
        let mut iter: Vec<Vec<Value>> = values.into_iter().skip(start as usize).collect();
        if let Some(limit) = q.limit {
            if limit < 0 {
                return Err(DbError::NegativeLimitOrOffset("LIMIT"));
            }
            iter.truncate(limit as usize);
        }

        Ok(ExecResult::select(columns, iter))
    }

    fn aggregate_select(&self, q: &QueryStmt, scope: &Scope, rows: Vec<Vec<Value>>) -> Result<ExecResult> {
        let mut accs = Vec::with_capacity(q.projection.len());
        let mut names = Vec::with_capacity(q.projection.len());
        for item in &q.projection {
            let SelectItem::Expr { expr: Expr::Function { name, args }, alias } = item else {
                return Err(DbError::GroupingError);
            };
            let col_name = alias.clone().unwrap_or_else(|| name.clone());
            names.push(col_name);
            if name == "COUNT" {
                accs.push((Accumulator::new(name, false)?, None));
                continue;
            }
            if args.len() != 1 {
                return Err(DbError::UndefinedFunction(format!("{name}/{}", args.len())));
            }
            let compiled = compile(&args[0], scope)?;
            let float_hint = matches!(static_type_hint(&args[0], scope), Some(DataType::Float));
            accs.push((Accumulator::new(name, float_hint)?, Some(compiled)));
        }

        for row in &rows {
            for (acc, compiled) in &mut accs {
                match compiled {
                    Some(c) => acc.accumulate(&c(row)?)?,
                    None => acc.accumulate(&Value::Integer(1))?,
                }
            }
        }

        let values: Vec<Value> = accs.into_iter().map(|(acc, _)| acc.finish()).collect();
        let columns = names
            .into_iter()
            .zip(&values)
            .map(|(name, v)| ColumnInfo::for_type(name, Some(value_data_type(v))))
            .collect();
        Ok(ExecResult::select(columns, vec![values]))
    }

    fn project(
        &self,
        projection: &[SelectItem],
        scope: &Scope,
        rows: &[Vec<Value>],
    ) -> Result<(Vec<ColumnInfo>, Vec<Vec<Value>>)> {
        let mut exprs: Vec<(CompiledExpr, String, Option<DataType>)> = Vec::new();
        for item in projection {
            match item {
                SelectItem::Wildcard => {
                    for p in &scope.participants {
                        for (i, c) in p.def.columns.iter().enumerate() {
                            let idx = p.offset + i;
                            exprs.push((
                                std::sync::Arc::new(move |row: &[Value]| Ok(row[idx].clone())),
                                c.name.clone(),
                                Some(c.data_type),
                            ));
                        }
                    }
                }
                SelectItem::Expr { expr, alias } => {
                    let name = alias.clone().unwrap_or_else(|| display_name(expr));
                    let ty = static_type_hint(expr, scope);
                    let compiled = compile(expr, scope)?;
                    exprs.push((compiled, name, ty));
                }
            }
        }
        let columns = exprs
            .iter()
            .map(|(_, name, ty)| ColumnInfo::for_type(name.clone(), *ty))
            .collect();
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let mut projected = Vec::with_capacity(exprs.len());
            for (compiled, _, _) in &exprs {
                projected.push(compiled(row)?);
            }
            values.push(projected);
        }
        Ok((columns, values))
    }
}

fn is_top_level_aggregate(item: &SelectItem) -> bool {
    matches!(item, SelectItem::Expr { expr: Expr::Function { name, .. }, .. } if is_aggregate(name))
}

fn is_join_query(q: &QueryStmt) -> bool {
    q.from.len() > 1 || q.from.iter().any(|t| !t.joins.is_empty())
}

fn value_data_type(v: &Value) -> DataType {
    match v {
        Value::Integer(_) => DataType::Integer,
        Value::Float(_) => DataType::Float,
        Value::Text(_) => DataType::Text,
        Value::Boolean(_) => DataType::Boolean,
        Value::Timestamp(_) => DataType::Timestamp,
        Value::Null => DataType::Text,
    }
}

fn static_type_hint(expr: &Expr, scope: &Scope) -> Option<DataType> {
    match expr {
        Expr::Column(name) => scope.resolve_unqualified(name).ok().map(|r| r.data_type),
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
            scope.resolve_qualified(&parts[0], &parts[1]).ok().map(|r| r.data_type)
        }
        Expr::Literal(v) => Some(value_data_type(v)),
        Expr::Cast { target, .. } => Some(*target),
        _ => None,
    }
}

fn display_name(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => name.clone(),
        Expr::CompoundIdentifier(parts) => parts.last().cloned().unwrap_or_default(),
        other => other.to_string(),
    }
}

/// Find a top-level (or AND-conjoined) `column = literal` / `literal =
/// column` equality against `ordinal`, returning the literal coerced to the
/// column's type. Only flattens through AND — an exact top-level
/// equality form.
fn find_equality_literal(expr: &Expr, def: &TableDef, ordinal: u32) -> Result<Option<Value>> {
    match expr {
        Expr::BinaryOp { left, op: BinaryOp::Eq, right } => {
            let col = def.column_by_ordinal(ordinal).unwrap();
            if let (Some(name), Expr::Literal(v)) = (column_name(left), right.as_ref()) {
                if name.eq_ignore_ascii_case(&col.name) {
                    return Ok(Some(col.data_type.coerce(v.clone())?));
                }
            }
            if let (Expr::Literal(v), Some(name)) = (left.as_ref(), column_name(right)) {
                if name.eq_ignore_ascii_case(&col.name) {
                    return Ok(Some(col.data_type.coerce(v.clone())?));
                }
            }
            Ok(None)
        }
        Expr::BinaryOp { left, op: BinaryOp::And, right } => {
            if let Some(v) = find_equality_literal(left, def, ordinal)? {
                return Ok(Some(v));
            }
            find_equality_literal(right, def, ordinal)
        }
        _ => Ok(None),
    }
}

fn column_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Column(name) => Some(name),
        Expr::CompoundIdentifier(parts) => parts.last().map(|s| s.as_str()),
        _ => None,
    }
}

fn virtual_table_def(vt: &catalog_views::VirtualTable) -> TableDef {
    let columns: Vec<StorageColumn> = vt
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| StorageColumn {
            ordinal: i as u32,
            name: c.name.to_string(),
            data_type: c.data_type,
            not_null: false,
            primary_key: false,
        })
        .collect();
    TableDef::new(format!("{}.{}", vt.schema, vt.name), columns)
}

