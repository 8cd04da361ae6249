//! Expression compilation into per-row closures. Resolution of column names to merged-row ordinals,
//! literal coercion, and LIKE pattern compilation happen once, at compile
//! time; the returned closure only touches the row vector.

use crate::core::{DataType, DbError, Result, Value};
use crate::executor::scope::Scope;
use crate::executor::functions;
use crate::parser::ast::{BinaryOp, Expr, UnaryOp};
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::sync::Arc;

pub type CompiledExpr = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

pub fn compile(expr: &Expr, scope: &Scope) -> Result<CompiledExpr> {
    match expr {
        Expr::Literal(v) => {
            let v = v.clone();
            Ok(Arc::new(move |_row| Ok(v.clone())))
        }
        Expr::Column(name) => {
            let resolved = scope.resolve_unqualified(name)?;
            let idx = resolved.index;
            Ok(Arc::new(move |row| Ok(row[idx].clone())))
        }
        Expr::CompoundIdentifier(parts) => {
            if parts.len() != 2 {
                return Err(DbError::ParseError("expected table.column reference".into()));
            }
            let resolved = scope.resolve_qualified(&parts[0], &parts[1])?;
            let idx = resolved.index;
            Ok(Arc::new(move |row| Ok(row[idx].clone())))
        }
        Expr::UnaryOp { op, expr } => compile_unary(*op, expr, scope),
        Expr::BinaryOp { left, op, right } => compile_binary(left, *op, right, scope),
        Expr::Not { expr } => {
            let inner = compile(expr, scope)?;
            Ok(Arc::new(move |row| match inner(row)? {
                Value::Null => Ok(Value::Null),
                Value::Boolean(b) => Ok(Value::Boolean(!b)),
                other => Err(DbError::InvalidTextInput(format!(
                    "NOT expects a boolean operand, found {}",
                    other.type_name()
                ))),
            }))
        }
        Expr::IsNull { expr, negated } => {
            let inner = compile(expr, scope)?;
            let negated = *negated;
            Ok(Arc::new(move |row| {
                let is_null = inner(row)?.is_null();
                Ok(Value::Boolean(is_null != negated))
            }))
        }
        Expr::In { expr, list, negated } => compile_in(expr, list, *negated, scope),
        Expr::Like { expr, pattern, negated, case_insensitive, escape } => {
            compile_like(expr, pattern, *negated, *case_insensitive, *escape, scope)
        }
        Expr::Cast { expr, target } => {
            let inner = compile(expr, scope)?;
            let target = *target;
            Ok(Arc::new(move |row| target.coerce(inner(row)?)))
        }
        Expr::Function { name, args } => {
            if functions::is_aggregate(name) {
                return Err(DbError::GroupingError);
            }
            let compiled_args: Vec<CompiledExpr> =
                args.iter().map(|a| compile(a, scope)).collect::<Result<_>>()?;
            let name = name.clone();
            Ok(Arc::new(move |row| {
                let mut values = Vec::with_capacity(compiled_args.len());
                for a in &compiled_args {
                    values.push(a(row)?);
                }
                functions::call_scalar(&name, &values)
            }))
        }
    }
}

fn compile_unary(op: UnaryOp, expr: &Expr, scope: &Scope) -> Result<CompiledExpr> {
    let inner = compile(expr, scope)?;
    Ok(match op {
        UnaryOp::Plus => inner,
        UnaryOp::Minus => Arc::new(move |row| match inner(row)? {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(DbError::InvalidTextInput(format!(
                "unary minus expects a numeric operand, found {}",
                other.type_name()
            ))),
        }),
        UnaryOp::Not => Arc::new(move |row| match inner(row)? {
            Value::Null => Ok(Value::Null),
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            other => Err(DbError::InvalidTextInput(format!(
                "NOT expects a boolean operand, found {}",
                other.type_name()
            ))),
        }),
    })
}

/// Infer the concrete `DataType` a compiled sub-expression always produces,
/// when it's knowable at compile time (a bare column reference). Used to
/// coerce a literal sibling operand once instead of on every row.
fn static_type(expr: &Expr, scope: &Scope) -> Option<DataType> {
    match expr {
        Expr::Column(name) => scope.resolve_unqualified(name).ok().map(|r| r.data_type),
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
            scope.resolve_qualified(&parts[0], &parts[1]).ok().map(|r| r.data_type)
        }
        Expr::Cast { target, .. } => Some(*target),
        _ => None,
    }
}

fn compile_binary(left: &Expr, op: BinaryOp, right: &Expr, scope: &Scope) -> Result<CompiledExpr> {
    // Literal-to-column-type coercion at compile time:
    // `WHERE id = '42'` turns the literal into the column's
    // declared type once, not per row.
    let left_ty = static_type(left, scope);
    let right_ty = static_type(right, scope);

    let left_expr = coerce_literal_if_needed(left, right_ty)?;
    let right_expr = coerce_literal_if_needed(right, left_ty)?;

    let l = compile(&left_expr, scope)?;
    let r = compile(&right_expr, scope)?;

    Ok(match op {
        BinaryOp::And => Arc::new(move |row| Ok(eval_and(l(row)?, r(row)?))),
        BinaryOp::Or => Arc::new(move |row| Ok(eval_or(l(row)?, r(row)?))),
        BinaryOp::Eq => cmp_closure(l, r, |o| o == Ordering::Equal),
        BinaryOp::NotEq => cmp_closure(l, r, |o| o != Ordering::Equal),
        BinaryOp::Lt => cmp_closure(l, r, |o| o == Ordering::Less),
        BinaryOp::LtEq => cmp_closure(l, r, |o| o != Ordering::Greater),
        BinaryOp::Gt => cmp_closure(l, r, |o| o == Ordering::Greater),
        BinaryOp::GtEq => cmp_closure(l, r, |o| o != Ordering::Less),
        BinaryOp::Add => arith_closure(l, r, "+", |a, b| a + b, |a, b| a + b),
        BinaryOp::Subtract => arith_closure(l, r, "-", |a, b| a - b, |a, b| a - b),
        BinaryOp::Multiply => arith_closure(l, r, "*", |a, b| a * b, |a, b| a * b),
        BinaryOp::Divide => Arc::new(move |row| {
            let (lv, rv) = (l(row)?, r(row)?);
            if lv.is_null() || rv.is_null() {
                return Ok(Value::Null);
            }
            match (lv, rv) {
                (Value::Integer(_), Value::Integer(0)) => Err(DbError::DivisionByZero),
                (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a / b)),
                (a, b) => {
                    let (af, bf) = (as_f64(&a)?, as_f64(&b)?);
                    if bf == 0.0 {
                        return Err(DbError::DivisionByZero);
                    }
                    Ok(Value::Float(af / bf))
                }
            }
        }),
        BinaryOp::Modulo => Arc::new(move |row| {
            let (lv, rv) = (l(row)?, r(row)?);
            if lv.is_null() || rv.is_null() {
                return Ok(Value::Null);
            }
            match (lv, rv) {
                (Value::Integer(_), Value::Integer(0)) => Err(DbError::DivisionByZero),
                (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a % b)),
                (a, b) => {
                    let (af, bf) = (as_f64(&a)?, as_f64(&b)?);
                    if bf == 0.0 {
                        return Err(DbError::DivisionByZero);
                    }
                    Ok(Value::Float(af % bf))
                }
            }
        }),
        BinaryOp::Concat => Arc::new(move |row| {
            let (lv, rv) = (l(row)?, r(row)?);
            if lv.is_null() || rv.is_null() {
                return Ok(Value::Null);
            }
            let (Some(ls), Some(rs)) = (lv.to_text(), rv.to_text()) else {
                return Err(DbError::InvalidTextInput("|| requires text-coercible operands".into()));
            };
            Ok(Value::Text(format!("{ls}{rs}")))
        }),
    })
}

fn coerce_literal_if_needed(expr: &Expr, other_ty: Option<DataType>) -> Result<Expr> {
    if let (Expr::Literal(v), Some(ty)) = (expr, other_ty) {
        if !v.is_null() {
            let coerced = ty.coerce(v.clone())?;
            return Ok(Expr::Literal(coerced));
        }
    }
    Ok(expr.clone())
}

fn as_f64(v: &Value) -> Result<f64> {
    match v {
        Value::Integer(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(DbError::InvalidTextInput(format!(
            "expected a numeric operand, found {}",
            other.type_name()
        ))),
    }
}

fn arith_closure(
    l: CompiledExpr,
    r: CompiledExpr,
    _sym: &'static str,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> CompiledExpr {
    Arc::new(move |row| {
        let (lv, rv) = (l(row)?, r(row)?);
        if lv.is_null() || rv.is_null() {
            return Ok(Value::Null);
        }
        match (lv, rv) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(int_op(a, b))),
            (a, b) => Ok(Value::Float(float_op(as_f64(&a)?, as_f64(&b)?))),
        }
    })
}

fn cmp_closure(l: CompiledExpr, r: CompiledExpr, keep: fn(Ordering) -> bool) -> CompiledExpr {
    Arc::new(move |row| {
        let (lv, rv) = (l(row)?, r(row)?);
        match lv.compare_three_valued(&rv)? {
            None => Ok(Value::Null),
            Some(ord) => Ok(Value::Boolean(keep(ord))),
        }
    })
}

/// Option<bool> view of a three-valued boolean: `None` is SQL NULL/unknown.
fn as_tristate(v: Value) -> Result<Option<bool>> {
    match v {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(b)),
        other => Err(DbError::InvalidTextInput(format!(
            "expected a boolean operand, found {}",
            other.type_name()
        ))),
    }
}

fn eval_and(l: Value, r: Value) -> Value {
    let (lb, rb) = match (as_tristate(l), as_tristate(r)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return Value::Null,
    };
    match (lb, rb) {
        (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
        (Some(true), Some(true)) => Value::Boolean(true),
        _ => Value::Null,
    }
}

fn eval_or(l: Value, r: Value) -> Value {
    let (lb, rb) = match (as_tristate(l), as_tristate(r)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return Value::Null,
    };
    match (lb, rb) {
        (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
        (Some(false), Some(false)) => Value::Boolean(false),
        _ => Value::Null,
    }
}

/// `expr IN (list)`: NULL-poisoned per the SQL standard — unknown if the
/// probe is NULL or no match is found but some candidate was NULL.
fn compile_in(expr: &Expr, list: &[Expr], negated: bool, scope: &Scope) -> Result<CompiledExpr> {
    let probe_ty = static_type(expr, scope);
    let probe = compile(expr, scope)?;
    let mut compiled_list = Vec::with_capacity(list.len());
    for item in list {
        let coerced = coerce_literal_if_needed(item, probe_ty)?;
        compiled_list.push(compile(&coerced, scope)?);
    }
    Ok(Arc::new(move |row| {
        let probe_v = probe(row)?;
        if probe_v.is_null() {
            return Ok(Value::Null);
        }
        let mut saw_null = false;
        let mut matched = false;
        for item in &compiled_list {
            let v = item(row)?;
            if v.is_null() {
                saw_null = true;
                continue;
            }
            if probe_v.compare_three_valued(&v)? == Some(Ordering::Equal) {
                matched = true;
                break;
            }
        }
        let result = if matched {
            Some(true)
        } else if saw_null {
            None
        } else {
            Some(false)
        };
        Ok(match result {
            None => Value::Null,
            Some(b) => Value::Boolean(b != negated),
        })
    }))
}

fn like_to_regex(pattern: &str, escape: Option<char>, case_insensitive: bool) -> Result<regex::Regex> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            if let Some(next) = chars.next() {
                out.push_str(&regex::escape(&next.to_string()));
            }
            continue;
        }
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    RegexBuilder::new(&out)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| DbError::InvalidTextInput(format!("bad LIKE pattern: {e}")))
}

fn compile_like(
    expr: &Expr,
    pattern: &Expr,
    negated: bool,
    case_insensitive: bool,
    escape: Option<char>,
    scope: &Scope,
) -> Result<CompiledExpr> {
    let value_expr = compile(expr, scope)?;

    if let Expr::Literal(Value::Text(pat)) = pattern {
        let re = like_to_regex(pat, escape, case_insensitive)?;
        return Ok(Arc::new(move |row| match value_expr(row)? {
            Value::Null => Ok(Value::Null),
            Value::Text(s) => Ok(Value::Boolean(re.is_match(&s) != negated)),
            other => Err(DbError::InvalidTextInput(format!(
                "LIKE expects a text operand, found {}",
                other.type_name()
            ))),
        }));
    }

    let pattern_expr = compile(pattern, scope)?;
    Ok(Arc::new(move |row| {
        let lhs = value_expr(row)?;
        let pat = pattern_expr(row)?;
        if lhs.is_null() || pat.is_null() {
            return Ok(Value::Null);
        }
        let (Value::Text(s), Value::Text(p)) = (lhs, pat) else {
            return Err(DbError::InvalidTextInput("LIKE expects text operands".into()));
        };
        let re = like_to_regex(&p, escape, case_insensitive)?;
        Ok(Value::Boolean(re.is_match(&s) != negated))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::storage::{ColumnDef, TableDef};

    fn scope_with_int_col(name: &str) -> Scope {
        let def = TableDef::new(
            "t".into(),
            vec![ColumnDef { ordinal: 0, name: name.into(), data_type: DataType::Integer, not_null: false, primary_key: false }],
        );
        Scope::single("t".into(), "t".into(), def)
    }

    #[test]
    fn coerces_string_literal_to_int_column_at_compile_time() {
        let scope = scope_with_int_col("id");
        let expr = Expr::BinaryOp {
            left: Box::new(Expr::Column("id".into())),
            op: BinaryOp::Eq,
            right: Box::new(Expr::Literal(Value::Text("42".into()))),
        };
        let compiled = compile(&expr, &scope).unwrap();
        assert_eq!(compiled(&[Value::Integer(42)]).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn three_valued_and() {
        assert_eq!(eval_and(Value::Boolean(false), Value::Null), Value::Boolean(false));
        assert_eq!(eval_and(Value::Boolean(true), Value::Null), Value::Null);
    }

    #[test]
    fn three_valued_or() {
        assert_eq!(eval_or(Value::Boolean(true), Value::Null), Value::Boolean(true));
        assert_eq!(eval_or(Value::Boolean(false), Value::Null), Value::Null);
    }

    #[test]
    fn like_percent_and_underscore() {
        let re = like_to_regex("a%b_", None, false).unwrap();
        assert!(re.is_match("axxxbc"));
        assert!(!re.is_match("axxxb"));
    }

    #[test]
    fn like_escape_disables_metachar() {
        let re = like_to_regex("50\\%", Some('\\'), false).unwrap();
        assert!(re.is_match("50%"));
        assert!(!re.is_match("50x"));
    }
}
