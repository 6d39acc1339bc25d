//! Dynamic values crossing dispatch boundaries
//!
//! Everything that travels between a protocol front end and a device member is a
//! [`Value`]: stream command arguments, control-plane parameters and results.
//! Devices keep typed fields; the conversion happens at the registry boundary
//! through `From<T> for Value` and [`FromValue`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;

/// A dynamically typed value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// No value; a stream command returning this writes no reply
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String
    Str(String),
    /// List of values
    List(Vec<Value>),
    /// String-keyed map
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the variant, used in conversion errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value can be encoded as JSON without loss
    ///
    /// NaN and infinities have no JSON representation, neither on their own nor
    /// nested in a collection.
    pub fn is_wire_safe(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            Value::List(items) => items.iter().all(Value::is_wire_safe),
            Value::Map(map) => map.values().all(Value::is_wire_safe),
            _ => true,
        }
    }

    /// Numeric view of the value (ints widen to floats)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view of the value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String view of the value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Extract a typed value
    pub fn into_typed<T: FromValue>(self) -> Result<T, DeviceError> {
        T::from_value(self)
    }

    fn mismatch(&self, expected: &'static str) -> DeviceError {
        DeviceError::Conversion {
            expected,
            found: format!("{} {}", self.type_name(), self),
        }
    }
}

/// Default wire representation used by the stream protocol
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            // Debug formatting keeps a fractional digit ("2.0") and round-trips
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Map(map) => {
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}={}", key, value)?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(v as i64)
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(v as f64),
        }
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::from(v as u64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(v: BTreeMap<String, T>) -> Self {
        Value::Map(v.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Typed extraction from a [`Value`]
///
/// Integers widen to floats, floats never narrow to integers.
pub trait FromValue: Sized {
    /// Convert, failing with [`DeviceError::Conversion`] on a type mismatch
    fn from_value(value: Value) -> Result<Self, DeviceError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, DeviceError> {
        Ok(value)
    }
}

macro_rules! impl_from_value_int {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, DeviceError> {
                    match value {
                        Value::Int(i) => <$t>::try_from(i).map_err(|_| DeviceError::Conversion {
                            expected: stringify!($t),
                            found: format!("int {} out of range", i),
                        }),
                        other => Err(other.mismatch(stringify!($t))),
                    }
                }
            }
        )*
    };
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, DeviceError> {
        value.as_f64().ok_or_else(|| value.mismatch("float"))
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, DeviceError> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, DeviceError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(other.mismatch("bool")),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, DeviceError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, DeviceError> {
        match value {
            Value::List(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(other.mismatch("list")),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, DeviceError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        assert_eq!(Value::Int(-42).to_string(), "-42");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(0.25).to_string(), "0.25");
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::from("ok").to_string(), "ok");
        assert_eq!(Value::from(vec![1, 2, 3]).to_string(), "1,2,3");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn test_int_widens_to_float() {
        assert_eq!(f64::from_value(Value::Int(3)).unwrap(), 3.0);
        assert!(i64::from_value(Value::Float(3.0)).is_err());
    }

    #[test]
    fn test_narrowing_out_of_range() {
        let err = u8::from_value(Value::Int(300)).unwrap_err();
        assert!(matches!(err, DeviceError::Conversion { expected: "u8", .. }));
    }

    #[test]
    fn test_wire_safety() {
        assert!(Value::Float(1.5).is_wire_safe());
        assert!(!Value::Float(f64::NAN).is_wire_safe());
        assert!(!Value::from(vec![1.0, f64::INFINITY]).is_wire_safe());
    }

    #[test]
    fn test_json_untagged() {
        let value: Value = serde_json::from_str(r#"[1, 2.5, "x", true, null]"#).unwrap();
        assert_eq!(
            value,
            Value::List(vec![
                Value::Int(1),
                Value::Float(2.5),
                Value::from("x"),
                Value::Bool(true),
                Value::Null,
            ])
        );
    }

    #[test]
    fn test_option_and_vec() {
        let v: Option<Vec<u16>> = Value::from(vec![1u16, 2]).into_typed().unwrap();
        assert_eq!(v, Some(vec![1, 2]));
        let none: Option<i32> = Value::Null.into_typed().unwrap();
        assert_eq!(none, None);
    }
}
