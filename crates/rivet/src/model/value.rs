//! Values and typed extraction

use crate::model::class::PrimitiveKind;
use crate::model::object::{ArrayData, ObjectData, ObjectRef};
use rustc_hash::FxHashMap;

/// A slot value: a primitive, null, or an object reference
#[derive(Debug, Clone)]
pub enum Value {
    /// Null reference
    Null,
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `char` (UTF-16 code unit)
    Char(u16),
    /// `short`
    Short(i16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// Object reference
    Object(ObjectRef),
}

impl Value {
    /// A fresh string object
    pub fn string(s: impl Into<String>) -> Self {
        Value::Object(ObjectRef::string(s))
    }

    /// Whether this is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Referenced object, if any
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Primitive kind of a primitive value
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            Value::Boolean(_) => Some(PrimitiveKind::Boolean),
            Value::Byte(_) => Some(PrimitiveKind::Byte),
            Value::Char(_) => Some(PrimitiveKind::Char),
            Value::Short(_) => Some(PrimitiveKind::Short),
            Value::Int(_) => Some(PrimitiveKind::Int),
            Value::Long(_) => Some(PrimitiveKind::Long),
            Value::Float(_) => Some(PrimitiveKind::Float),
            Value::Double(_) => Some(PrimitiveKind::Double),
            Value::Null | Value::Object(_) => None,
        }
    }

    /// Type name for diagnostics
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Object(o) => o.class().name(),
            other => other
                .primitive_kind()
                .map(|k| k.name().to_string())
                .unwrap_or_default(),
        }
    }

    /// String contents if this references a string
    pub fn as_str_value(&self) -> Option<String> {
        self.as_object().and_then(ObjectRef::as_string)
    }

    /// Structural equality that also requires identical sharing
    ///
    /// Objects reachable from `self` and `other` must pair up one to one:
    /// two references to the same object on one side must map to two
    /// references to the same object on the other. Classes are compared by
    /// name. Floats compare by bit pattern.
    pub fn graph_eq(&self, other: &Value) -> bool {
        let mut forward: FxHashMap<usize, usize> = FxHashMap::default();
        let mut backward: FxHashMap<usize, usize> = FxHashMap::default();
        let mut pending: Vec<(Value, Value)> = vec![(self.clone(), other.clone())];

        while let Some((a, b)) = pending.pop() {
            let (a, b) = match (a, b) {
                (Value::Object(a), Value::Object(b)) => (a, b),
                (a, b) => {
                    if !scalar_eq(&a, &b) {
                        return false;
                    }
                    continue;
                }
            };
            let (ia, ib) = (a.identity(), b.identity());
            match (forward.get(&ia), backward.get(&ib)) {
                (Some(&mapped), _) if mapped != ib => return false,
                (_, Some(&mapped)) if mapped != ia => return false,
                (Some(_), Some(_)) => continue,
                _ => {
                    forward.insert(ia, ib);
                    backward.insert(ib, ia);
                }
            }
            if a.class().name() != b.class().name() {
                return false;
            }
            let da = a.data().clone();
            let db = b.data().clone();
            match (da, db) {
                (ObjectData::String(x), ObjectData::String(y)) if x == y => {}
                (
                    ObjectData::Enum { name: x, .. },
                    ObjectData::Enum { name: y, .. },
                ) if x == y => {}
                (ObjectData::Instance(x), ObjectData::Instance(y)) => {
                    if x.len() != y.len() || x.iter().zip(&y).any(|(l, r)| l.len() != r.len()) {
                        return false;
                    }
                    pending.extend(x.into_iter().flatten().zip(y.into_iter().flatten()));
                }
                (ObjectData::Array(ArrayData::Object(x)), ObjectData::Array(ArrayData::Object(y))) => {
                    if x.len() != y.len() {
                        return false;
                    }
                    pending.extend(x.into_iter().zip(y));
                }
                (ObjectData::Array(x), ObjectData::Array(y)) => {
                    if !primitive_array_eq(&x, &y) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

fn primitive_array_eq(a: &ArrayData, b: &ArrayData) -> bool {
    match (a, b) {
        (ArrayData::Float(x), ArrayData::Float(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| l.to_bits() == r.to_bits())
        }
        (ArrayData::Double(x), ArrayData::Double(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| l.to_bits() == r.to_bits())
        }
        _ => a == b,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Short(a), Value::Short(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Boolean,
    i8 => Byte,
    u16 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    ObjectRef => Object,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Types that can be extracted from a decoded [`Value`]
pub trait FromValue: Sized {
    /// Name reported in type mismatches
    fn type_name() -> String;

    /// Convert, handing the value back on mismatch
    fn from_value(value: Value) -> Result<Self, Value>;
}

impl FromValue for Value {
    fn type_name() -> String {
        "value".to_string()
    }

    fn from_value(value: Value) -> Result<Self, Value> {
        Ok(value)
    }
}

macro_rules! from_value_primitive {
    ($($ty:ty => $variant:ident, $name:literal),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn type_name() -> String {
                    $name.to_string()
                }

                fn from_value(value: Value) -> Result<Self, Value> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

from_value_primitive! {
    bool => Boolean, "boolean",
    i8 => Byte, "byte",
    u16 => Char, "char",
    i16 => Short, "short",
    i32 => Int, "int",
    i64 => Long, "long",
    f32 => Float, "float",
    f64 => Double, "double",
}

impl FromValue for ObjectRef {
    fn type_name() -> String {
        "object".to_string()
    }

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Object(o) => Ok(o),
            other => Err(other),
        }
    }
}

impl FromValue for String {
    fn type_name() -> String {
        "String".to_string()
    }

    fn from_value(value: Value) -> Result<Self, Value> {
        match value.as_str_value() {
            Some(s) => Ok(s),
            None => Err(value),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn type_name() -> String {
        format!("{} or null", T::type_name())
    }

    fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
