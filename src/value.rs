//! Runtime value model for template contexts
//!
//! Values are what context variables, loop items, and filter inputs are made
//! of. Attribute-style access on a value is an explicit capability probe:
//! map key lookup, then zero-argument invocation of callables, then integer
//! indexing into sequences. Anything that does not resolve yields
//! [`Value::None`], which renders as the empty string.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A context value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent or null; renders as ""
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A zero-argument host function, invoked during path resolution
    Callable(Callable),
}

/// A zero-argument callable supplied by the embedding application.
#[derive(Clone)]
pub struct Callable(Arc<dyn Fn() -> Value + Send + Sync>);

impl Callable {
    pub fn new(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn invoke(&self) -> Value {
        (self.0)()
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callable(..)")
    }
}

impl Value {
    /// Truthiness, used by `if` conditions and the `and` operator.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Callable(_) => true,
        }
    }

    /// Element count for sequences, mappings, and strings (in chars).
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.chars().count()),
            Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Parse a bare literal: integer, float, boolean, or none/null.
    ///
    /// Quoted strings are recognised by the expression lexer, not here.
    pub fn parse_literal(raw: &str) -> Option<Value> {
        match raw {
            "true" | "True" => return Some(Value::Bool(true)),
            "false" | "False" => return Some(Value::Bool(false)),
            "none" | "None" | "null" => return Some(Value::None),
            _ => {}
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Some(Value::Int(n));
        }
        if let Ok(n) = raw.parse::<f64>() {
            return Some(Value::Float(n));
        }
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Value::Callable(_) => f.write_str("<callable>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<Callable> for Value {
    fn from(c: Callable) -> Self {
        Value::Callable(c)
    }
}

impl From<toml::Value> for Value {
    fn from(v: toml::Value) -> Self {
        match v {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(n) => Value::Int(n),
            toml::Value::Float(n) => Value::Float(n),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(d) => Value::String(d.to_string()),
            toml::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            toml::Value::Table(table) => Value::Map(
                table
                    .into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Ordering comparison; `None` for incompatible types (conditions treat
/// that as false rather than raising).
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::List(x), Value::List(y)) => compare_lists(x, y),
        (Value::None, Value::None) => Some(Ordering::Equal),
        _ => None,
    }
}

fn compare_lists(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b) {
        match compare(x, y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(a.len().cmp(&b.len()))
}

/// Membership test for the `in` operator: is `item` contained in
/// `container`? List element, substring, or map key.
pub fn contains(container: &Value, item: &Value) -> bool {
    match container {
        Value::List(items) => items.iter().any(|v| v == item),
        Value::String(s) => match item {
            Value::String(sub) => s.contains(sub.as_str()),
            _ => false,
        },
        Value::Map(map) => match item {
            Value::String(key) => map.contains_key(key),
            _ => false,
        },
        _ => false,
    }
}

/// Arithmetic operators usable inside conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    /// Both `/` and `//` floor-divide. Behavioural compatibility with the
    /// original engine; documented, not a bug.
    FloorDiv,
}

/// Apply an arithmetic operator; `None` on type mismatch, overflow, or
/// division by zero (conditions treat that as false).
pub fn arith(op: ArithOp, a: &Value, b: &Value) -> Option<Value> {
    match op {
        ArithOp::Add => match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.checked_add(*y).map(Value::Int),
            (Value::String(x), Value::String(y)) => {
                Some(Value::String(format!("{}{}", x, y)))
            }
            (Value::List(x), Value::List(y)) => {
                Some(Value::List(x.iter().chain(y).cloned().collect()))
            }
            _ => float_op(a, b, |x, y| x + y),
        },
        ArithOp::Sub => match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.checked_sub(*y).map(Value::Int),
            _ => float_op(a, b, |x, y| x - y),
        },
        ArithOp::Mul => match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.checked_mul(*y).map(Value::Int),
            _ => float_op(a, b, |x, y| x * y),
        },
        ArithOp::FloorDiv => match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.checked_div_euclid(*y).map(Value::Int),
            _ => match (as_float(a)?, as_float(b)?) {
                (_, y) if y == 0.0 => None,
                (x, y) => Some(Value::Float((x / y).floor())),
            },
        },
    }
}

fn float_op(a: &Value, b: &Value, op: impl Fn(f64, f64) -> f64) -> Option<Value> {
    Some(Value::Float(op(as_float(a)?, as_float(b)?)))
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(n) => Some(*n),
        _ => None,
    }
}
