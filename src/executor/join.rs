//! Nested-loop join execution. ON filters are applied at the
//! innermost loop level rather than as soon as each table joins — the
//! simpler of the two options the design leaves open.

use crate::core::{Result, Value};
use crate::executor::expr::CompiledExpr;
use crate::storage::Row;

/// One participant's live rows, already snapshotted under its own read lock.
pub struct JoinInput {
    pub rows: Vec<Row>,
    pub live_ordinals: Vec<u32>,
}

/// Recursively enumerate the cartesian product of `inputs`, building a
/// merged positional row for each combination, applying every `on_filters[i]`
/// only once the innermost (last) table is reached, and feeding survivors to
/// `emit`.
pub fn nested_loop(
    inputs: &[JoinInput],
    on_filters: &[Option<CompiledExpr>],
    emit: &mut dyn FnMut(&[Value]) -> Result<()>,
) -> Result<()> {
    let mut merged = Vec::new();
    recurse(inputs, on_filters, 0, &mut merged, emit)
}

fn recurse(
    inputs: &[JoinInput],
    on_filters: &[Option<CompiledExpr>],
    depth: usize,
    merged: &mut Vec<Value>,
    emit: &mut dyn FnMut(&[Value]) -> Result<()>,
) -> Result<()> {
    if depth == inputs.len() {
        for filter in on_filters.iter().flatten() {
            if !matches!(filter(merged)?, Value::Boolean(true)) {
                return Ok(());
            }
        }
        return emit(merged);
    }

    let input = &inputs[depth];
    let base_len = merged.len();
    for row in &input.rows {
        for ord in &input.live_ordinals {
            merged.push(row.get(*ord));
        }
        recurse(inputs, on_filters, depth + 1, merged, emit)?;
        merged.truncate(base_len);
    }
    Ok(())
}
