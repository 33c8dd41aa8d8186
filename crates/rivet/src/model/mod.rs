//! Host object model: classes, loaders, objects and values

pub mod class;
pub mod loader;
pub mod object;
pub mod value;

pub use class::{
    Class, ClassBuilder, ClassDef, ClassHooks, ClassKind, Declared, FieldDef, FieldDescriptor,
    FieldType, ObjectHook, PrimitiveKind, ReadHook, ReplaceHook, Visibility, WriteHook,
};
pub use loader::{ClassLoader, LoaderId};
pub use object::{ArrayData, ObjectData, ObjectRef};
pub use value::{FromValue, Value};
