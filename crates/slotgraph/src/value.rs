//! Slot values.
//!
//! Values are opaque to the engine: definitions, inverse definitions and
//! action handlers interpret them. Aggregates are `Arc`-wrapped so cloning
//! a memoized value out of the arena is O(1).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Value held by a slot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// No value. Also the sentinel handed to definitions for an
    /// unresolvable dependency.
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(Arc<str>),
    /// Ordered values; array-valued slots and vectors use this.
    List(Arc<Vec<Value>>),
    Object(Arc<BTreeMap<String, Value>>),
}

pub(crate) static EMPTY: Value = Value::Empty;

impl Value {
    pub fn int(v: i64) -> Self {
        Value::Int(v)
    }

    pub fn float(v: f64) -> Self {
        Value::Float(v)
    }

    pub fn bool(v: bool) -> Self {
        Value::Bool(v)
    }

    pub fn text(v: impl Into<String>) -> Self {
        Value::Text(v.into().into())
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    /// Numeric vector, e.g. `Value::vector([3.0, 4.0])`.
    pub fn vector(components: impl IntoIterator<Item = f64>) -> Self {
        Value::list(components.into_iter().map(Value::Float))
    }

    pub fn object(fields: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        Value::Object(Arc::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(v) => Some(v.as_ref()),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object()?.get(key)
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.as_list()?.get(index)
    }

    /// Components of a numeric vector, `None` if any component is not a number.
    pub fn as_vector(&self) -> Option<Vec<f64>> {
        self.as_list()?.iter().map(Value::as_f64).collect()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "_"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "\"{s}\""),
            Value::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::text(v)
    }
}

/// Built-in operations used by sample definitions and tests.
///
/// Arithmetic is element-wise on lists, so `head - tail` works for vectors.
/// Mismatched shapes yield `Value::Empty`.
pub mod ops {
    use super::*;

    fn numeric(a: &Value, b: &Value, int_op: fn(i64, i64) -> Option<i64>, float_op: fn(f64, f64) -> f64) -> Value {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => int_op(*x, *y).map(Value::Int).unwrap_or(Value::Empty),
            (Value::List(xs), Value::List(ys)) => {
                if xs.len() != ys.len() {
                    return Value::Empty;
                }
                let items: Vec<Value> = xs
                    .iter()
                    .zip(ys.iter())
                    .map(|(x, y)| numeric(x, y, int_op, float_op))
                    .collect();
                if items.iter().any(Value::is_empty) {
                    Value::Empty
                } else {
                    Value::List(Arc::new(items))
                }
            }
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Value::Float(float_op(x, y)),
                _ => Value::Empty,
            },
        }
    }

    pub fn add(a: &Value, b: &Value) -> Value {
        numeric(a, b, i64::checked_add, |x, y| x + y)
    }

    pub fn sub(a: &Value, b: &Value) -> Value {
        numeric(a, b, i64::checked_sub, |x, y| x - y)
    }

    pub fn mul(a: &Value, b: &Value) -> Value {
        numeric(a, b, i64::checked_mul, |x, y| x * y)
    }

    /// Multiply every component of `v` by `factor`.
    pub fn scale(v: &Value, factor: f64) -> Value {
        match v {
            Value::List(items) => {
                let scaled: Vec<Value> = items.iter().map(|item| scale(item, factor)).collect();
                Value::List(Arc::new(scaled))
            }
            other => match other.as_f64() {
                Some(x) => Value::Float(x * factor),
                None => Value::Empty,
            },
        }
    }

    /// Sum of a list of numbers. Integers stay integers.
    pub fn sum(list: &Value) -> Value {
        match list {
            Value::List(items) => items.iter().fold(Value::Int(0), |acc, item| add(&acc, item)),
            _ => Value::Empty,
        }
    }

    pub fn not(v: &Value) -> Value {
        match v {
            Value::Bool(b) => Value::Bool(!b),
            _ => Value::Empty,
        }
    }

    /// `a >= b` for numbers.
    pub fn at_least(a: &Value, b: &Value) -> Value {
        match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Value::Bool(x >= y),
            _ => Value::Empty,
        }
    }

    pub fn len(list: &Value) -> Value {
        match list {
            Value::List(items) => Value::Int(items.len() as i64),
            _ => Value::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_and_accessors() {
        assert_eq!(Value::int(42).as_int(), Some(42));
        assert_eq!(Value::bool(true).as_bool(), Some(true));
        assert_eq!(Value::text("hello").as_text(), Some("hello"));
        assert_eq!(Value::float(2.0).as_int(), Some(2));
        assert!(Value::default().is_empty());
    }

    #[test]
    fn vector_arithmetic_is_elementwise() {
        let head = Value::vector([3.0, 4.0]);
        let tail = Value::vector([1.0, 1.0]);
        assert_eq!(ops::sub(&head, &tail), Value::vector([2.0, 3.0]));
        assert_eq!(ops::add(&tail, &Value::vector([5.0, 5.0])), Value::vector([6.0, 6.0]));
        assert_eq!(ops::add(&head, &Value::vector([1.0])), Value::Empty);
    }

    #[test]
    fn sum_keeps_integers() {
        let list = Value::list([Value::int(1), Value::int(2), Value::int(3)]);
        assert_eq!(ops::sum(&list), Value::int(6));
        let mixed = Value::list([Value::int(1), Value::float(0.5)]);
        assert_eq!(ops::sum(&mixed), Value::float(1.5));
    }

    #[test]
    fn object_lookup() {
        let obj = Value::object([("a", Value::int(1)), ("b", Value::int(2))]);
        assert_eq!(obj.get("a"), Some(&Value::int(1)));
        assert_eq!(obj.get("c"), None);
    }

    #[test]
    fn display_formats_vectors() {
        assert_eq!(Value::vector([5.0, 5.0]).to_string(), "(5, 5)");
    }
}
