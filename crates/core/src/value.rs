use std::any::Any;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A value stored under one symbol name in a block's record file.
///
/// Scalars, flat numeric arrays and nested lists cover what scientific
/// scripts usually emit. Streamed symbols load back as a `List` of rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    List(Vec<Value>),
}

impl Value {
    /// Estimated encoded size in bytes, used to size streaming buffers.
    pub fn size_hint(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 8,
            Value::Text(s) => s.len().max(1),
            Value::Ints(v) => 8 * v.len().max(1),
            Value::Floats(v) => 8 * v.len().max(1),
            Value::List(v) => v.iter().map(Value::size_hint).sum::<usize>().max(1),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Value::Floats(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    /// Number of rows for list-like values, 1 for scalars, 0 for `Null`.
    pub fn len(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Ints(v) => v.len(),
            Value::Floats(v) => v.len(),
            Value::List(v) => v.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Ints(v) => write!(f, "{v:?}"),
            Value::Floats(v) => write!(f, "{v:?}"),
            Value::List(v) => {
                write!(f, "[")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
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

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Ints(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Floats(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// Ordered mapping of symbol name to value produced by one block call
/// (or by one step of a streaming block).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Records {
    entries: IndexMap<String, Value>,
}

impl Records {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Index<&str> for Records {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        &self.entries[name]
    }
}

impl IntoIterator for Records {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Records {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut records = Records::new();
        for (k, v) in iter {
            records.insert(k, v);
        }
        records
    }
}

/// A keyword argument bound into a block instance.
///
/// `Opaque` arguments reach the function untouched but have no on-disk
/// representation, so they never appear in the stored `args` group.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Arg {
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Arg::Opaque(Arc::new(value))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            Arg::Opaque(_) => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Arg::Opaque(any) => any.downcast_ref::<T>(),
            Arg::Value(_) => None,
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Arg::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

macro_rules! arg_from_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Arg {
                fn from(v: $t) -> Self {
                    Arg::Value(v.into())
                }
            }
        )*
    };
}

arg_from_value!(Value, bool, i32, i64, usize, f64, &str, String, Vec<i64>, Vec<f64>, Vec<Value>);

/// Ordered keyword arguments of a block instance.
pub type Args = IndexMap<String, Arg>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_keep_insertion_order() {
        let r = Records::new().with("z", 1).with("a", 2.5).with("m", "text");
        let names: Vec<&str> = r.names().collect();
        assert_eq!(names, vec!["z", "a", "m"]);
        assert_eq!(r["a"], Value::Float(2.5));
    }

    #[test]
    fn size_hint_scales_with_array_length() {
        assert_eq!(Value::Float(1.0).size_hint(), 8);
        assert_eq!(Value::Floats(vec![0.0; 100]).size_hint(), 800);
        assert_eq!(Value::Text("abcd".into()).size_hint(), 4);
    }

    #[test]
    fn numeric_accessors_widen_ints() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(3.5).as_i64(), None);
    }

    #[test]
    fn opaque_args_have_no_value() {
        let arg = Arg::opaque(vec![1u8, 2, 3]);
        assert!(arg.as_value().is_none());
        assert_eq!(arg.downcast_ref::<Vec<u8>>(), Some(&vec![1u8, 2, 3]));

        let arg: Arg = 4.into();
        assert_eq!(arg.as_value(), Some(&Value::Int(4)));
    }
}
