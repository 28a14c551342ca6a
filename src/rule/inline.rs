//! Inline expressions: `ds${0..1}.t_order${0..1}` for data nodes and
//! `t_order${order_id % 2}` for sharding algorithms.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DbError, DbResult};
use crate::sql::statement::{BinaryOp, SqlExpr};
use crate::sql::{DatabaseType, SqlParser};
use crate::value::Value;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(?:->)?\{([^}]*)\}").unwrap());

static RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(-?\d+)\s*\.\.\s*(-?\d+)\s*$").unwrap());

/// Expand every `${...}` segment and return the cartesian product, in order.
///
/// A segment is either a range `a..b` (inclusive) or a list `['x', 'y']` / `[1, 2]`.
/// Top-level commas separate independent expressions:
/// `ds0.t_order0, ds1.t_order${0..1}`.
pub fn expand(expression: &str) -> DbResult<Vec<String>> {
    let mut result = Vec::new();
    for part in split_top_level(expression) {
        let part = part.trim();
        if !part.is_empty() {
            result.extend(expand_one(part)?);
        }
    }
    Ok(result)
}

fn split_top_level(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in expression.char_indices() {
        match ch {
            '{' | '[' => depth += 1,
            '}' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expression[start..]);
    parts
}

fn expand_one(expression: &str) -> DbResult<Vec<String>> {
    let mut results = vec![String::new()];
    let mut cursor = 0;

    for captures in PLACEHOLDER.captures_iter(expression) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let literal = &expression[cursor..whole.start()];
        let values = segment_values(inner.as_str())?;

        let mut next = Vec::with_capacity(results.len() * values.len());
        for prefix in &results {
            for value in &values {
                next.push(format!("{}{}{}", prefix, literal, value));
            }
        }
        results = next;
        cursor = whole.end();
    }

    let tail = &expression[cursor..];
    Ok(results.into_iter().map(|r| format!("{}{}", r, tail)).collect())
}

fn segment_values(segment: &str) -> DbResult<Vec<String>> {
    if let Some(caps) = RANGE.captures(segment) {
        let parse = |i: usize| -> DbResult<i64> {
            caps.get(i)
                .map(|m| m.as_str())
                .unwrap_or_default()
                .parse()
                .map_err(|_| DbError::Config(format!("Invalid range in inline expression: {}", segment)))
        };
        let (low, high) = (parse(1)?, parse(2)?);
        if low > high {
            return Err(DbError::Config(format!(
                "Inline range {}..{} is empty",
                low, high
            )));
        }
        return Ok((low..=high).map(|v| v.to_string()).collect());
    }

    let trimmed = segment.trim();
    if let Some(list) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return Ok(list
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .filter(|item| !item.is_empty())
            .collect());
    }

    Err(DbError::Config(format!(
        "Unsupported inline segment: ${{{}}}",
        segment
    )))
}

/// Evaluate a sharding expression such as `ds${user_id % 2}` for one value.
pub fn evaluate(expression: &str, column: &str, value: &Value) -> DbResult<String> {
    let mut result = String::new();
    let mut cursor = 0;

    for captures in PLACEHOLDER.captures_iter(expression) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        result.push_str(&expression[cursor..whole.start()]);

        let expr = SqlParser::new(inner.as_str(), DatabaseType::MySQL)?.parse_expression()?;
        result.push_str(&eval(&expr, column, value)?.to_string());

        cursor = whole.end();
    }

    result.push_str(&expression[cursor..]);
    Ok(result)
}

fn eval(expr: &SqlExpr, column: &str, value: &Value) -> DbResult<Value> {
    match expr {
        SqlExpr::Column { name, .. } if name.eq_ignore_ascii_case(column) => Ok(value.clone()),
        SqlExpr::Column { name, .. } => Err(DbError::Routing(format!(
            "Unknown variable '{}' in sharding expression, expected '{}'",
            name, column
        ))),
        SqlExpr::Integer(n) => Ok(Value::Integer(*n)),
        SqlExpr::Float(n) => Ok(Value::Float(*n)),
        SqlExpr::String(s) => Ok(Value::Text(s.clone())),
        SqlExpr::Negate(inner) => match eval(inner, column, value)? {
            Value::Integer(n) => Ok(Value::Integer(-n)),
            Value::Float(n) => Ok(Value::Float(-n)),
            other => Err(DbError::Routing(format!("Cannot negate {}", other.type_name()))),
        },
        SqlExpr::Function { name, args } if args.len() == 1 => {
            let arg = eval(&args[0], column, value)?;
            match name.to_lowercase().as_str() {
                "abs" => match arg {
                    Value::Integer(n) => Ok(Value::Integer(n.abs())),
                    Value::Float(n) => Ok(Value::Float(n.abs())),
                    other => Err(DbError::Routing(format!("abs() of {}", other.type_name()))),
                },
                "hash" => Ok(Value::Integer(
                    (seahash::hash(arg.to_string().as_bytes()) & i64::MAX as u64) as i64,
                )),
                other => Err(DbError::Routing(format!(
                    "Unsupported function '{}' in sharding expression",
                    other
                ))),
            }
        }
        SqlExpr::BinaryOp { left, op, right } => {
            let l = eval(left, column, value)?;
            let r = eval(right, column, value)?;
            arithmetic(&l, *op, &r)
        }
        other => Err(DbError::Routing(format!(
            "Unsupported sharding expression: {:?}",
            other
        ))),
    }
}

fn arithmetic(left: &Value, op: BinaryOp, right: &Value) -> DbResult<Value> {
    if let (Value::Integer(a), Value::Integer(b)) = (left, right) {
        let (a, b) = (*a, *b);
        return match op {
            BinaryOp::Plus => Ok(Value::Integer(a.wrapping_add(b))),
            BinaryOp::Minus => Ok(Value::Integer(a.wrapping_sub(b))),
            BinaryOp::Multiply => Ok(Value::Integer(a.wrapping_mul(b))),
            BinaryOp::Divide if b != 0 => Ok(Value::Integer(a.div_euclid(b))),
            BinaryOp::Modulo if b != 0 => Ok(Value::Integer(a.rem_euclid(b))),
            BinaryOp::Divide | BinaryOp::Modulo => {
                Err(DbError::Routing("Division by zero in sharding expression".to_string()))
            }
            _ => Err(DbError::Routing(format!("Unsupported operator {:?}", op))),
        };
    }

    if op == BinaryOp::Plus {
        if let (Value::Text(_), _) | (_, Value::Text(_)) = (left, right) {
            return Ok(Value::Text(format!("{}{}", left, right)));
        }
    }

    // Text that holds a number (e.g. a VARCHAR key) shards like the number.
    match (left.as_i64(), right.as_i64()) {
        (Some(a), Some(b)) if !matches!(left, Value::Float(_)) && !matches!(right, Value::Float(_)) => {
            arithmetic(&Value::Integer(a), op, &Value::Integer(b))
        }
        _ => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Err(DbError::Routing(format!(
                    "Cannot apply {:?} to {} and {}",
                    op,
                    left.type_name(),
                    right.type_name()
                )));
            };
            match op {
                BinaryOp::Plus => Ok(Value::Float(a + b)),
                BinaryOp::Minus => Ok(Value::Float(a - b)),
                BinaryOp::Multiply => Ok(Value::Float(a * b)),
                BinaryOp::Divide => Ok(Value::Float(a / b)),
                BinaryOp::Modulo => Ok(Value::Float(a % b)),
                _ => Err(DbError::Routing(format!("Unsupported operator {:?}", op))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_range_product() {
        assert_eq!(
            expand("ds${0..1}.t_order${0..1}").unwrap(),
            vec!["ds0.t_order0", "ds0.t_order1", "ds1.t_order0", "ds1.t_order1"]
        );
    }

    #[test]
    fn test_expand_list_and_plain() {
        assert_eq!(
            expand("ds_${['a', 'b']}.t_user, ds_c.t_user").unwrap(),
            vec!["ds_a.t_user", "ds_b.t_user", "ds_c.t_user"]
        );
        assert_eq!(expand("ds0.t_order").unwrap(), vec!["ds0.t_order"]);
    }

    #[test]
    fn test_expand_groovy_style() {
        assert_eq!(expand("t_$->{0..2}").unwrap(), vec!["t_0", "t_1", "t_2"]);
    }

    #[test]
    fn test_evaluate_modulo() {
        assert_eq!(evaluate("ds${user_id % 2}", "user_id", &Value::Integer(7)).unwrap(), "ds1");
        assert_eq!(
            evaluate("t_order_${order_id % 4}", "order_id", &Value::from("10")).unwrap(),
            "t_order_2"
        );
    }

    #[test]
    fn test_evaluate_negative_stays_in_range() {
        assert_eq!(evaluate("ds${id % 2}", "id", &Value::Integer(-3)).unwrap(), "ds1");
    }

    #[test]
    fn test_evaluate_unknown_variable() {
        assert!(evaluate("ds${other % 2}", "user_id", &Value::Integer(1)).is_err());
    }
}
