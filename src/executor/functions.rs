//! Scalar and aggregate function registries.

use crate::core::{DbError, Result, Value};
use chrono::Utc;

pub const AGGREGATE_NAMES: &[&str] = &["COUNT", "SUM", "AVG", "MIN", "MAX"];

pub fn is_aggregate(name: &str) -> bool {
    AGGREGATE_NAMES.contains(&name)
}

/// Dispatch a scalar (non-aggregate) function call by its upper-cased name.
pub fn call_scalar(name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "LENGTH" | "CHARACTER_LENGTH" | "CHAR_LENGTH" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Null => Ok(Value::Null),
                Value::Text(s) => Ok(Value::Integer(s.chars().count() as i64)),
                other => Err(DbError::UndefinedFunction(format!(
                    "{name}({})",
                    other.type_name()
                ))),
            }
        }
        "OCTET_LENGTH" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Null => Ok(Value::Null),
                Value::Text(s) => Ok(Value::Integer(s.len() as i64)),
                other => Err(DbError::UndefinedFunction(format!(
                    "{name}({})",
                    other.type_name()
                ))),
            }
        }
        "CONCAT" => {
            let mut out = String::new();
            for a in args {
                if let Some(text) = a.to_text() {
                    out.push_str(&text);
                }
            }
            Ok(Value::Text(out))
        }
        "NOW" => {
            arity(name, args, 0)?;
            Ok(Value::Timestamp(Utc::now()))
        }
        "VERSION" => {
            arity(name, args, 0)?;
            Ok(Value::Text("minipg 0.1.0".to_string()))
        }
        "ABS" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Null => Ok(Value::Null),
                Value::Integer(i) => Ok(Value::Integer(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => type_err(name, other),
            }
        }
        "ROUND" => {
            if args.len() != 1 && args.len() != 2 {
                return Err(arity_err(name, args.len()));
            }
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            let digits = match args.get(1) {
                Some(Value::Integer(d)) => *d as i32,
                Some(Value::Null) | None => 0,
                Some(other) => return type_err(name, other),
            };
            let f = as_f64(name, &args[0])?;
            let factor = 10f64.powi(digits);
            let rounded = (f * factor).round() / factor;
            match &args[0] {
                Value::Integer(_) if digits <= 0 => Ok(Value::Integer(rounded as i64)),
                _ => Ok(Value::Float(rounded)),
            }
        }
        "CEIL" | "CEILING" => {
            arity(name, args, 1)?;
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Float(as_f64(name, &args[0])?.ceil()))
        }
        "FLOOR" => {
            arity(name, args, 1)?;
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Float(as_f64(name, &args[0])?.floor()))
        }
        "POWER" | "POW" => {
            arity(name, args, 2)?;
            if args[0].is_null() || args[1].is_null() {
                return Ok(Value::Null);
            }
            let base = as_f64(name, &args[0])?;
            let exp = as_f64(name, &args[1])?;
            Ok(Value::Float(base.powf(exp)))
        }
        "SQRT" => {
            arity(name, args, 1)?;
            if args[0].is_null() {
                return Ok(Value::Null);
            }
            let f = as_f64(name, &args[0])?;
            if f < 0.0 {
                return Err(DbError::InvalidArgumentForMath("sqrt of a negative number".into()));
            }
            Ok(Value::Float(f.sqrt()))
        }
        "MOD" => {
            arity(name, args, 2)?;
            if args[0].is_null() || args[1].is_null() {
                return Ok(Value::Null);
            }
            match (&args[0], &args[1]) {
                (Value::Integer(_), Value::Integer(0)) => Err(DbError::DivisionByZero),
                (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a % b)),
                _ => {
                    let a = as_f64(name, &args[0])?;
                    let b = as_f64(name, &args[1])?;
                    if b == 0.0 {
                        return Err(DbError::DivisionByZero);
                    }
                    Ok(Value::Float(a % b))
                }
            }
        }
        _ => Err(DbError::UndefinedFunction(name.to_string())),
    }
}

fn as_f64(name: &str, v: &Value) -> Result<f64> {
    match v {
        Value::Integer(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => {
            type_err(name, other)?;
            unreachable!()
        }
    }
}

fn type_err(name: &str, v: &Value) -> Result<Value> {
    Err(DbError::InvalidArgumentForMath(format!("{name} does not accept {}", v.type_name())))
}

fn arity_err(name: &str, got: usize) -> DbError {
    DbError::UndefinedFunction(format!("{name}/{got}"))
}

fn arity(name: &str, args: &[Value], want: usize) -> Result<()> {
    if args.len() != want {
        return Err(arity_err(name, args.len()));
    }
    Ok(())
}

/// Running state for one aggregate projection over a scan.
#[derive(Debug, Clone)]
pub enum Accumulator {
    Count(i64),
    SumInt(Option<i64>),
    SumFloat(Option<f64>),
    Avg { sum: f64, count: i64, saw_any: bool },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    pub fn new(func: &str, arg_is_float_hint: bool) -> Result<Self> {
        Ok(match func {
            "COUNT" => Accumulator::Count(0),
            "SUM" => {
                if arg_is_float_hint {
                    Accumulator::SumFloat(None)
                } else {
                    Accumulator::SumInt(None)
                }
            }
            "AVG" => Accumulator::Avg { sum: 0.0, count: 0, saw_any: false },
            "MIN" => Accumulator::Min(None),
            "MAX" => Accumulator::Max(None),
            other => return Err(DbError::UndefinedFunction(other.to_string())),
        })
    }

    pub fn accumulate(&mut self, value: &Value) -> Result<()> {
        match self {
            Accumulator::Count(n) => {
                if !value.is_null() {
                    *n += 1;
                }
            }
            Accumulator::SumInt(acc) => match value {
                Value::Null => {}
                Value::Integer(i) => *acc = Some(acc.unwrap_or(0) + i),
                Value::Float(f) => {
                    // a float value showed up under an integer accumulator;
                    // widen by re-deriving from the existing sum.
                    let base = acc.unwrap_or(0) as f64;
                    *self = Accumulator::SumFloat(Some(base + f));
                }
                other => return Err(DbError::UndefinedFunction(format!("SUM({})", other.type_name()))),
            },
            Accumulator::SumFloat(acc) => match value {
                Value::Null => {}
                Value::Integer(i) => *acc = Some(acc.unwrap_or(0.0) + *i as f64),
                Value::Float(f) => *acc = Some(acc.unwrap_or(0.0) + f),
                other => return Err(DbError::UndefinedFunction(format!("SUM({})", other.type_name()))),
            },
            Accumulator::Avg { sum, count, saw_any } => match value {
                Value::Null => {}
                Value::Integer(i) => {
                    *sum += *i as f64;
                    *count += 1;
                    *saw_any = true;
                }
                Value::Float(f) => {
                    *sum += f;
                    *count += 1;
                    *saw_any = true;
                }
                other => return Err(DbError::UndefinedFunction(format!("AVG({})", other.type_name()))),
            },
            Accumulator::Min(acc) => {
                if value.is_null() {
                    return Ok(());
                }
                let keep = match acc {
                    None => true,
                    Some(cur) => matches!(
                        value.compare_three_valued(cur)?,
                        Some(std::cmp::Ordering::Less)
                    ),
                };
                if keep {
                    *acc = Some(value.clone());
                }
            }
            Accumulator::Max(acc) => {
                if value.is_null() {
                    return Ok(());
                }
                let keep = match acc {
                    None => true,
                    Some(cur) => matches!(
                        value.compare_three_valued(cur)?,
                        Some(std::cmp::Ordering::Greater)
                    ),
                };
                if keep {
                    *acc = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Integer(n),
            Accumulator::SumInt(acc) => acc.map(Value::Integer).unwrap_or(Value::Null),
            Accumulator::SumFloat(acc) => acc.map(Value::Float).unwrap_or(Value::Null),
            Accumulator::Avg { sum, count, saw_any } => {
                if !saw_any || count == 0 {
                    Value::Null
                } else {
                    Value::Float(sum / count as f64)
                }
            }
            Accumulator::Min(acc) => acc.unwrap_or(Value::Null),
            Accumulator::Max(acc) => acc.unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_counts_codepoints() {
        let v = call_scalar("LENGTH", &[Value::Text("héllo".into())]).unwrap();
        assert_eq!(v, Value::Integer(5));
    }

    #[test]
    fn concat_skips_nulls() {
        let v = call_scalar(
            "CONCAT",
            &[Value::Text("a".into()), Value::Null, Value::Text("b".into())],
        )
        .unwrap();
        assert_eq!(v, Value::Text("ab".into()));
    }

    #[test]
    fn sqrt_rejects_negative() {
        assert!(call_scalar("SQRT", &[Value::Integer(-1)]).is_err());
    }

    #[test]
    fn mod_rejects_zero_divisor() {
        assert!(call_scalar("MOD", &[Value::Integer(5), Value::Integer(0)]).is_err());
    }

    #[test]
    fn avg_ignores_nulls_in_the_average() {
        let mut acc = Accumulator::new("AVG", false).unwrap();
        acc.accumulate(&Value::Integer(10)).unwrap();
        acc.accumulate(&Value::Null).unwrap();
        acc.accumulate(&Value::Integer(20)).unwrap();
        assert_eq!(acc.finish(), Value::Float(15.0));
    }
}
