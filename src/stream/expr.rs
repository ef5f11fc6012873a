//! Expression evaluation against a stream environment.

use crate::document::{FieldBuffer, Value, ValueKind};
use crate::encoding::key::decode_value;
use crate::error::VellumError;
use crate::sql::ast::{BinaryOp, Expr, UnaryOp};
use crate::stream::Environment;
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
}

/// The constant function registry, built once at initialization.
pub static FUNCTIONS: Lazy<HashMap<&'static str, FunctionKind>> = Lazy::new(|| {
    let mut map = HashMap::new();
    map.insert("pk", FunctionKind::Scalar);
    map.insert("count", FunctionKind::Aggregate);
    map.insert("min", FunctionKind::Aggregate);
    map.insert("max", FunctionKind::Aggregate);
    map.insert("sum", FunctionKind::Aggregate);
    map.insert("avg", FunctionKind::Aggregate);
    map
});

pub fn function_kind(name: &str) -> Option<FunctionKind> {
    FUNCTIONS.get(name).copied()
}

/// True when the expression tree contains an aggregate call.
pub fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { name, .. } => {
            matches!(function_kind(name), Some(FunctionKind::Aggregate))
        }
        Expr::Unary(_, inner) => contains_aggregate(inner),
        Expr::Binary(_, a, b) => contains_aggregate(a) || contains_aggregate(b),
        Expr::In { expr, list, .. } => {
            contains_aggregate(expr) || list.iter().any(contains_aggregate)
        }
        Expr::Between { expr, low, high } => {
            contains_aggregate(expr) || contains_aggregate(low) || contains_aggregate(high)
        }
        Expr::Is { expr, other, .. } => contains_aggregate(expr) || contains_aggregate(other),
        Expr::Cast { expr, .. } => contains_aggregate(expr),
        Expr::DocumentLiteral(pairs) => pairs.iter().any(|(_, e)| contains_aggregate(e)),
        Expr::ArrayLiteral(items) => items.iter().any(contains_aggregate),
        _ => false,
    }
}

pub fn eval_expr(expr: &Expr, env: &Environment) -> Result<Value, VellumError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::DocumentLiteral(pairs) => {
            let mut buf = FieldBuffer::new();
            for (field, e) in pairs {
                buf.add(field, eval_expr(e, env)?);
            }
            Ok(Value::Document(buf))
        }
        Expr::ArrayLiteral(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, env)?);
            }
            Ok(Value::Array(out))
        }
        // A path that does not resolve evaluates to NULL rather than
        // halting the pipeline on the first document missing the field.
        Expr::Path(path) => env.resolve_path(path),
        Expr::PositionalParam(index) => env
            .params
            .positional
            .get(*index)
            .cloned()
            .ok_or_else(|| {
                VellumError::ParameterMismatch(format!(
                    "statement references parameter {} but only {} were bound",
                    index + 1,
                    env.params.positional.len()
                ))
            }),
        Expr::NamedParam(name) => env.params.named.get(name.as_str()).cloned().ok_or_else(|| {
            VellumError::ParameterMismatch(format!("named parameter '${name}' is not bound"))
        }),
        Expr::Unary(UnaryOp::Not, inner) => {
            let v = eval_expr(inner, env)?;
            Ok(Value::Bool(!v.is_truthy()))
        }
        Expr::Unary(UnaryOp::Neg, inner) => match eval_expr(inner, env)? {
            Value::Null => Ok(Value::Null),
            Value::Integer(i) => i
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| VellumError::Validation("integer overflow".into())),
            Value::Double(d) => Ok(Value::Double(-d)),
            other => Err(VellumError::TypeMismatch {
                expected: "a number".into(),
                actual: other.kind().to_string(),
            }),
        },
        Expr::Binary(BinaryOp::And, left, right) => {
            // Short-circuit: stop at the first false.
            if !eval_expr(left, env)?.is_truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_expr(right, env)?.is_truthy()))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if eval_expr(left, env)?.is_truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_expr(right, env)?.is_truthy()))
        }
        Expr::Binary(BinaryOp::Like, left, right) => {
            let value = eval_expr(left, env)?;
            let pattern = eval_expr(right, env)?;
            Ok(Value::Bool(match (&value, &pattern) {
                (Value::Text(v), Value::Text(p)) => like_match(v, p),
                _ => false,
            }))
        }
        Expr::Binary(op, left, right) if op.is_comparison() => {
            let lhs = eval_expr(left, env)?;
            let rhs = eval_expr(right, env)?;
            let ord = lhs.sql_cmp(&rhs);
            let result = match op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::Neq => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Ge => ord != Ordering::Less,
                _ => unreachable!("guarded by is_comparison"),
            };
            Ok(Value::Bool(result))
        }
        Expr::Binary(op, left, right) => {
            let lhs = eval_expr(left, env)?;
            let rhs = eval_expr(right, env)?;
            eval_arithmetic(*op, lhs, rhs)
        }
        Expr::In {
            expr,
            list,
            negated,
        } => {
            let value = eval_expr(expr, env)?;
            let mut found = false;
            for item in list {
                if eval_expr(item, env)?.sql_cmp(&value) == Ordering::Equal {
                    found = true;
                    break;
                }
            }
            Ok(Value::Bool(found != *negated))
        }
        Expr::Between { expr, low, high } => {
            let value = eval_expr(expr, env)?;
            let low = eval_expr(low, env)?;
            let high = eval_expr(high, env)?;
            Ok(Value::Bool(
                value.sql_cmp(&low) != Ordering::Less
                    && value.sql_cmp(&high) != Ordering::Greater,
            ))
        }
        Expr::Is {
            expr,
            other,
            negated,
        } => {
            let lhs = eval_expr(expr, env)?;
            let rhs = eval_expr(other, env)?;
            Ok(Value::Bool((lhs.sql_cmp(&rhs) == Ordering::Equal) != *negated))
        }
        Expr::Cast { expr, to } => eval_expr(expr, env)?.convert_to(*to),
        Expr::FunctionCall { name, args, .. } => match function_kind(name) {
            Some(FunctionKind::Scalar) => eval_pk(name, args, env),
            Some(FunctionKind::Aggregate) => {
                // Aggregates are accumulated by the grouping operator and
                // published into the environment's scalar scope under the
                // call's rendered text.
                Ok(env
                    .scalars
                    .get(&expr.to_string())
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            None => Err(VellumError::UnknownFunction(name.clone())),
        },
    }
}

fn eval_pk(name: &str, args: &[Expr], env: &Environment) -> Result<Value, VellumError> {
    debug_assert_eq!(name, "pk");
    if !args.is_empty() {
        return Err(VellumError::Validation("pk() takes no arguments".into()));
    }
    match &env.key {
        Some(key) => decode_value(key),
        None => Ok(Value::Null),
    }
}

fn eval_arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, VellumError> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    let type_error = |v: &Value| VellumError::TypeMismatch {
        expected: "a number".into(),
        actual: v.kind().to_string(),
    };
    match (&lhs, &rhs) {
        (Value::Integer(a), Value::Integer(b)) => {
            let overflow = || VellumError::Validation("integer overflow".into());
            match op {
                BinaryOp::Add => a.checked_add(*b).map(Value::Integer).ok_or_else(overflow),
                BinaryOp::Sub => a.checked_sub(*b).map(Value::Integer).ok_or_else(overflow),
                BinaryOp::Mul => a.checked_mul(*b).map(Value::Integer).ok_or_else(overflow),
                BinaryOp::Div => {
                    if *b == 0 {
                        Err(VellumError::Validation("division by zero".into()))
                    } else {
                        a.checked_div(*b).map(Value::Integer).ok_or_else(overflow)
                    }
                }
                BinaryOp::Mod => {
                    if *b == 0 {
                        Err(VellumError::Validation("division by zero".into()))
                    } else {
                        a.checked_rem(*b).map(Value::Integer).ok_or_else(overflow)
                    }
                }
                _ => unreachable!("arithmetic operator expected"),
            }
        }
        (Value::Integer(_) | Value::Double(_), Value::Integer(_) | Value::Double(_)) => {
            let a = match lhs.convert_to(ValueKind::Double)? {
                Value::Double(d) => d,
                _ => unreachable!(),
            };
            let b = match rhs.convert_to(ValueKind::Double)? {
                Value::Double(d) => d,
                _ => unreachable!(),
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => {
                    if b == 0.0 {
                        return Err(VellumError::Validation("division by zero".into()));
                    }
                    a / b
                }
                BinaryOp::Mod => {
                    if b == 0.0 {
                        return Err(VellumError::Validation("division by zero".into()));
                    }
                    a % b
                }
                _ => unreachable!("arithmetic operator expected"),
            };
            Ok(Value::Double(result))
        }
        (Value::Integer(_) | Value::Double(_), other) => Err(type_error(other)),
        (other, _) => Err(type_error(other)),
    }
}

/// Adds two values with the same promotion rules as the `+` operator;
/// used by the SUM accumulator.
pub fn eval_add(lhs: Value, rhs: Value) -> Result<Value, VellumError> {
    eval_arithmetic(BinaryOp::Add, lhs, rhs)
}

/// SQL LIKE with `%` (any run) and `_` (any one character).
pub fn like_match(value: &str, pattern: &str) -> bool {
    let text: Vec<char> = value.chars().collect();
    let pat: Vec<char> = pattern.chars().collect();
    let mut ti = 0usize;
    let mut pi = 0usize;
    let mut star_pi: Option<usize> = None;
    let mut star_ti = 0usize;

    while ti < text.len() {
        if pi < pat.len() && (pat[pi] == '_' || pat[pi] == text[ti]) {
            ti += 1;
            pi += 1;
            continue;
        }
        if pi < pat.len() && pat[pi] == '%' {
            star_pi = Some(pi);
            pi += 1;
            star_ti = ti;
            continue;
        }
        if let Some(saved_pi) = star_pi {
            pi = saved_pi + 1;
            star_ti += 1;
            ti = star_ti;
            continue;
        }
        return false;
    }

    while pi < pat.len() && pat[pi] == '%' {
        pi += 1;
    }
    pi == pat.len()
}
