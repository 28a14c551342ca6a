//! Cell values flowing through parameters, result rows and the BASE journal.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Boolean(b) => Some(i64::from(*b)),
            Value::Null => None,
            Value::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    /// Total order used by sharding ranges and merge comparators.
    ///
    /// Numbers compare numerically across integer/float, text lexicographically;
    /// null sorts before everything. Incomparable types fall back to type rank.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
        }
    }

    /// Deterministic byte encoding for hashing group keys.
    pub(crate) fn encode_key(&self, key: &mut Vec<u8>) {
        match self {
            Value::Null => key.push(0),
            Value::Boolean(b) => {
                key.push(1);
                key.push(u8::from(*b));
            }
            Value::Integer(v) => {
                key.push(2);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Value::Float(v) => {
                // integral floats share the integer encoding so 3 and 3.0 group together
                if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                    key.push(2);
                    key.extend_from_slice(&(*v as i64).to_be_bytes());
                } else {
                    key.push(3);
                    key.extend_from_slice(&v.to_be_bytes());
                }
            }
            Value::Text(s) => {
                key.push(4);
                key.extend_from_slice(&(s.len() as u32).to_be_bytes());
                key.extend_from_slice(s.as_bytes());
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_comparison_crosses_types() {
        assert_eq!(Value::Integer(3).compare(&Value::Float(3.5)), Ordering::Less);
        assert_eq!(Value::Float(2.0).compare(&Value::Integer(2)), Ordering::Equal);
        assert_eq!(Value::Null.compare(&Value::Integer(-10)), Ordering::Less);
    }

    #[test]
    fn test_integral_float_shares_group_key() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        Value::Integer(7).encode_key(&mut a);
        Value::Float(7.0).encode_key(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::Float(1.5).as_i64(), None);
        assert_eq!(Value::Null.as_i64(), None);
    }

    #[test]
    fn test_untagged_json() {
        let values = vec![Value::Integer(1), Value::from("a"), Value::Null];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, "[1,\"a\",null]");
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }
}
