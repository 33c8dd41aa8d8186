//! Identity-bearing objects

use crate::error::MarshalError;
use crate::model::class::{Class, ClassKind, FieldType, PrimitiveKind};
use crate::model::value::Value;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::Arc;

/// Array storage, one variant per element kind
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// `boolean[]`
    Boolean(Vec<bool>),
    /// `byte[]`
    Byte(Vec<i8>),
    /// `char[]`
    Char(Vec<u16>),
    /// `short[]`
    Short(Vec<i16>),
    /// `int[]`
    Int(Vec<i32>),
    /// `long[]`
    Long(Vec<i64>),
    /// `float[]`
    Float(Vec<f32>),
    /// `double[]`
    Double(Vec<f64>),
    /// Array of references
    Object(Vec<Value>),
}

impl ArrayData {
    /// Empty storage for the given element kind (`None` for references)
    pub fn empty(kind: Option<PrimitiveKind>, capacity: usize) -> Self {
        match kind {
            Some(PrimitiveKind::Boolean) => ArrayData::Boolean(Vec::with_capacity(capacity)),
            Some(PrimitiveKind::Byte) => ArrayData::Byte(Vec::with_capacity(capacity)),
            Some(PrimitiveKind::Char) => ArrayData::Char(Vec::with_capacity(capacity)),
            Some(PrimitiveKind::Short) => ArrayData::Short(Vec::with_capacity(capacity)),
            Some(PrimitiveKind::Int) => ArrayData::Int(Vec::with_capacity(capacity)),
            Some(PrimitiveKind::Long) => ArrayData::Long(Vec::with_capacity(capacity)),
            Some(PrimitiveKind::Float) => ArrayData::Float(Vec::with_capacity(capacity)),
            Some(PrimitiveKind::Double) => ArrayData::Double(Vec::with_capacity(capacity)),
            None => ArrayData::Object(Vec::with_capacity(capacity)),
        }
    }

    /// Element kind; `None` for reference arrays
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            ArrayData::Boolean(_) => Some(PrimitiveKind::Boolean),
            ArrayData::Byte(_) => Some(PrimitiveKind::Byte),
            ArrayData::Char(_) => Some(PrimitiveKind::Char),
            ArrayData::Short(_) => Some(PrimitiveKind::Short),
            ArrayData::Int(_) => Some(PrimitiveKind::Int),
            ArrayData::Long(_) => Some(PrimitiveKind::Long),
            ArrayData::Float(_) => Some(PrimitiveKind::Float),
            ArrayData::Double(_) => Some(PrimitiveKind::Double),
            ArrayData::Object(_) => None,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Boolean(v) => v.len(),
            ArrayData::Byte(v) => v.len(),
            ArrayData::Char(v) => v.len(),
            ArrayData::Short(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Long(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Double(v) => v.len(),
            ArrayData::Object(v) => v.len(),
        }
    }

    /// Whether the array has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index` as a value
    pub fn get(&self, index: usize) -> Option<Value> {
        match self {
            ArrayData::Boolean(v) => v.get(index).map(|&x| Value::Boolean(x)),
            ArrayData::Byte(v) => v.get(index).map(|&x| Value::Byte(x)),
            ArrayData::Char(v) => v.get(index).map(|&x| Value::Char(x)),
            ArrayData::Short(v) => v.get(index).map(|&x| Value::Short(x)),
            ArrayData::Int(v) => v.get(index).map(|&x| Value::Int(x)),
            ArrayData::Long(v) => v.get(index).map(|&x| Value::Long(x)),
            ArrayData::Float(v) => v.get(index).map(|&x| Value::Float(x)),
            ArrayData::Double(v) => v.get(index).map(|&x| Value::Double(x)),
            ArrayData::Object(v) => v.get(index).cloned(),
        }
    }
}

/// Contents of an object
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectData {
    /// String contents
    String(String),
    /// Field values, one vector per hierarchy level from the root down,
    /// aligned with that level's declared fields
    Instance(Vec<Vec<Value>>),
    /// Array elements
    Array(ArrayData),
    /// Enum constant
    Enum {
        /// Constant name
        name: String,
        /// Declaration position
        ordinal: usize,
    },
}

struct ObjectCell {
    class: Class,
    data: RwLock<ObjectData>,
}

impl Drop for ObjectCell {
    // Unlinks uniquely owned children onto a worklist so that dropping a
    // long chain does not recurse once per link.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_children(self.data.get_mut(), &mut pending);
        while let Some(child) = pending.pop() {
            if let Ok(mut cell) = Arc::try_unwrap(child.0) {
                take_children(cell.data.get_mut(), &mut pending);
            }
        }
    }
}

fn take_children(data: &mut ObjectData, pending: &mut Vec<ObjectRef>) {
    let mut collect = |values: Vec<Value>| {
        pending.extend(values.into_iter().filter_map(|value| match value {
            Value::Object(object) => Some(object),
            _ => None,
        }));
    };
    match data {
        ObjectData::Instance(levels) => std::mem::take(levels).into_iter().for_each(&mut collect),
        ObjectData::Array(ArrayData::Object(values)) => collect(std::mem::take(values)),
        _ => {}
    }
}

/// Shared handle to an object; equality is identity
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectCell>);

impl ObjectRef {
    fn from_parts(class: Class, data: ObjectData) -> Self {
        ObjectRef(Arc::new(ObjectCell {
            class,
            data: RwLock::new(data),
        }))
    }

    /// New string object
    pub fn string(value: impl Into<String>) -> Self {
        Self::from_parts(Class::String, ObjectData::String(value.into()))
    }

    /// New instance of a user class with every field at its default
    pub fn new_instance(class: &Class) -> Result<Self, MarshalError> {
        let Some(def) = class.as_defined() else {
            return Err(MarshalError::invalid_class(class.name(), "not an instantiable class"));
        };
        if def.kind == ClassKind::Enum {
            return Err(MarshalError::invalid_class(
                class.name(),
                "enum instances are fixed constants",
            ));
        }
        let levels = class
            .hierarchy()
            .iter()
            .map(|level| level.fields.iter().map(|f| f.field_type.default_value()).collect())
            .collect();
        Ok(Self::from_parts(class.clone(), ObjectData::Instance(levels)))
    }

    pub(crate) fn enum_constant(class: &Class, name: String, ordinal: usize) -> Self {
        Self::from_parts(class.clone(), ObjectData::Enum { name, ordinal })
    }

    /// New array of `component` backed by `data`
    pub fn array(component: Class, data: ArrayData) -> Result<Self, MarshalError> {
        let matches = match (&component, data.primitive_kind()) {
            (Class::Primitive(expected), Some(actual)) => *expected == actual,
            (Class::Primitive(_), None) | (_, Some(_)) => false,
            (_, None) => true,
        };
        if !matches {
            return Err(MarshalError::TypeMismatch {
                expected: format!("{component}[] storage"),
                actual: match data.primitive_kind() {
                    Some(kind) => format!("{}[] storage", kind.name()),
                    None => "reference storage".to_string(),
                },
            });
        }
        Ok(Self::from_parts(Class::array_of(component), ObjectData::Array(data)))
    }

    /// New reference array
    pub fn object_array(component: Class, values: Vec<Value>) -> Result<Self, MarshalError> {
        Self::array(component, ArrayData::Object(values))
    }

    /// Runtime class
    pub fn class(&self) -> &Class {
        &self.0.class
    }

    /// Identity key, stable while any handle is alive
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Whether both handles refer to the same object
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Lock the contents for reading
    pub fn data(&self) -> RwLockReadGuard<'_, ObjectData> {
        self.0.data.read()
    }

    /// Lock the contents for writing
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, ObjectData> {
        self.0.data.write()
    }

    /// String contents, if this is a string
    pub fn as_string(&self) -> Option<String> {
        match &*self.data() {
            ObjectData::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Enum constant name
    pub fn enum_name(&self) -> Option<String> {
        match &*self.data() {
            ObjectData::Enum { name, .. } => Some(name.clone()),
            _ => None,
        }
    }

    /// Enum constant ordinal
    pub fn enum_ordinal(&self) -> Option<usize> {
        match &*self.data() {
            ObjectData::Enum { ordinal, .. } => Some(*ordinal),
            _ => None,
        }
    }

    /// Array length
    pub fn array_len(&self) -> Option<usize> {
        match &*self.data() {
            ObjectData::Array(a) => Some(a.len()),
            _ => None,
        }
    }

    /// Array element
    pub fn array_get(&self, index: usize) -> Option<Value> {
        match &*self.data() {
            ObjectData::Array(a) => a.get(index),
            _ => None,
        }
    }

    /// Replace an element of a reference array
    pub fn array_set(&self, index: usize, value: Value) -> Result<(), MarshalError> {
        match &mut *self.data_mut() {
            ObjectData::Array(ArrayData::Object(values)) => match values.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(MarshalError::Hook(format!(
                    "index {index} out of bounds for length {}",
                    values.len()
                ))),
            },
            _ => Err(MarshalError::TypeMismatch {
                expected: "reference array".to_string(),
                actual: self.class().name(),
            }),
        }
    }

    /// Pad a reference array with nulls up to `len` elements
    pub(crate) fn array_extend_to(&self, len: usize) {
        if let ObjectData::Array(ArrayData::Object(values)) = &mut *self.data_mut() {
            if values.len() < len {
                values.resize(len, Value::Null);
            }
        }
    }

    /// Locate a field by name, searching from the most derived level up
    fn locate(&self, name: &str) -> Option<(usize, usize, FieldType)> {
        let hierarchy = self.class().hierarchy();
        hierarchy.iter().enumerate().rev().find_map(|(level, def)| {
            def.field_index(name)
                .map(|slot| (level, slot, def.fields[slot].field_type))
        })
    }

    /// Field value by name; the most derived declaration wins
    pub fn get_field(&self, name: &str) -> Option<Value> {
        let (level, slot, _) = self.locate(name)?;
        self.level_value(level, slot)
    }

    /// Set a field by name, checking primitive types
    pub fn set_field(&self, name: &str, value: impl Into<Value>) -> Result<(), MarshalError> {
        let value = value.into();
        let Some((level, slot, field_type)) = self.locate(name) else {
            return Err(MarshalError::invalid_class(
                self.class().name(),
                format!("no field `{name}`"),
            ));
        };
        if let FieldType::Primitive(kind) = field_type {
            if value.primitive_kind() != Some(kind) {
                return Err(MarshalError::TypeMismatch {
                    expected: kind.name().to_string(),
                    actual: value.type_name(),
                });
            }
        }
        self.set_level_value(level, slot, value);
        Ok(())
    }

    /// Field value at a hierarchy level (0 is the root class)
    pub fn level_value(&self, level: usize, slot: usize) -> Option<Value> {
        match &*self.data() {
            ObjectData::Instance(levels) => levels.get(level)?.get(slot).cloned(),
            _ => None,
        }
    }

    pub(crate) fn set_level_value(&self, level: usize, slot: usize, value: Value) {
        if let ObjectData::Instance(levels) = &mut *self.data_mut() {
            if let Some(target) = levels.get_mut(level).and_then(|l| l.get_mut(slot)) {
                *target = value;
            }
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl std::hash::Hash for ObjectRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never recurse: graphs may be cyclic
        match self.0.data.try_read().as_deref() {
            Some(ObjectData::String(s)) => write!(f, "{s:?}"),
            Some(ObjectData::Enum { name, .. }) => write!(f, "{}.{}", self.class(), name),
            _ => write!(f, "{}@{:x}", self.class(), self.identity()),
        }
    }
}
