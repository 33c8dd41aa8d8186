//! Class definitions
//!
//! Rust has no runtime reflection, so every class the engine handles is
//! described explicitly: its fields, its serialization style and the hooks
//! it offers. A [`Class`] is a cheap handle; defined classes compare by
//! identity, everything else structurally.

use crate::error::MarshalError;
use crate::marshal::{ObjectInput, ObjectOutput};
use crate::model::loader::LoaderId;
use crate::model::object::ObjectRef;
use crate::model::value::Value;
use parking_lot::RwLock;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Primitive value kinds
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// `bool`
    Boolean,
    /// `i8`
    Byte,
    /// UTF-16 code unit
    Char,
    /// `i16`
    Short,
    /// `i32`
    Int,
    /// `i64`
    Long,
    /// `f32`
    Float,
    /// `f64`
    Double,
}

impl PrimitiveKind {
    /// Every kind, in wire order
    pub const ALL: [PrimitiveKind; 8] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Byte,
        PrimitiveKind::Char,
        PrimitiveKind::Short,
        PrimitiveKind::Int,
        PrimitiveKind::Long,
        PrimitiveKind::Float,
        PrimitiveKind::Double,
    ];

    /// One-letter type code used in field descriptors
    pub fn type_code(self) -> u8 {
        match self {
            PrimitiveKind::Boolean => b'Z',
            PrimitiveKind::Byte => b'B',
            PrimitiveKind::Char => b'C',
            PrimitiveKind::Short => b'S',
            PrimitiveKind::Int => b'I',
            PrimitiveKind::Long => b'J',
            PrimitiveKind::Float => b'F',
            PrimitiveKind::Double => b'D',
        }
    }

    /// Inverse of [`type_code`](Self::type_code)
    pub fn from_type_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_code() == code)
    }

    /// Position in [`ALL`](Self::ALL)
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Kind at `ordinal`
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    /// Lower-case type name
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
        }
    }

    /// Zero value of this kind
    pub fn default_value(self) -> Value {
        match self {
            PrimitiveKind::Boolean => Value::Boolean(false),
            PrimitiveKind::Byte => Value::Byte(0),
            PrimitiveKind::Char => Value::Char(0),
            PrimitiveKind::Short => Value::Short(0),
            PrimitiveKind::Int => Value::Int(0),
            PrimitiveKind::Long => Value::Long(0),
            PrimitiveKind::Float => Value::Float(0.0),
            PrimitiveKind::Double => Value::Double(0.0),
        }
    }
}

/// Declared type of a field
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Primitive slot
    Primitive(PrimitiveKind),
    /// Reference slot
    Object,
}

impl FieldType {
    /// Type code: the primitive code or `L`
    pub fn type_code(self) -> u8 {
        match self {
            FieldType::Primitive(kind) => kind.type_code(),
            FieldType::Object => b'L',
        }
    }

    /// Inverse of [`type_code`](Self::type_code)
    pub fn from_type_code(code: u8) -> Option<Self> {
        if code == b'L' {
            return Some(FieldType::Object);
        }
        PrimitiveKind::from_type_code(code).map(FieldType::Primitive)
    }

    /// Initial value of a field of this type
    pub fn default_value(self) -> Value {
        match self {
            FieldType::Primitive(kind) => kind.default_value(),
            FieldType::Object => Value::Null,
        }
    }

    /// Type name for diagnostics
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Primitive(kind) => kind.name(),
            FieldType::Object => "object",
        }
    }
}

/// A field as declared by a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Declared type
    pub field_type: FieldType,
    /// Excluded from default serialization
    pub transient: bool,
    /// Class-level field; never serialized
    pub is_static: bool,
    /// Written and read as an unshared reference
    pub unshared: bool,
}

impl FieldDef {
    /// Instance field of the given type
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            transient: false,
            is_static: false,
            unshared: false,
        }
    }

    /// Primitive instance field
    pub fn primitive(name: impl Into<String>, kind: PrimitiveKind) -> Self {
        Self::new(name, FieldType::Primitive(kind))
    }

    /// Reference instance field
    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Object)
    }

    /// Mark transient
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Mark static
    pub fn static_field(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Mark unshared
    pub fn unshared(mut self) -> Self {
        self.unshared = true;
        self
    }
}

/// Entry of an explicit serial field list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Wire type
    pub field_type: FieldType,
    /// Written and read as an unshared reference
    pub unshared: bool,
}

impl FieldDescriptor {
    /// Shared field descriptor
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            unshared: false,
        }
    }
}

/// How instances of a class are serialized
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ClassKind {
    /// No serialization support
    Plain,
    /// Field-by-field, optionally with custom hooks
    Serializable,
    /// Fully custom through external write/read hooks
    Externalizable,
    /// Fixed set of named constants
    Enum,
}

/// Access level of a declared hook or constructor
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Declaring class only
    Private,
    /// Same package, same loader
    Package,
    /// Subclasses
    Protected,
    /// Everyone
    Public,
}

/// Custom write hook, also used for external writes
pub type WriteHook =
    Arc<dyn Fn(&ObjectRef, &mut dyn ObjectOutput) -> Result<(), MarshalError> + Send + Sync>;
/// Custom read hook, also used for external reads and stream constructors
pub type ReadHook =
    Arc<dyn Fn(&ObjectRef, &mut dyn ObjectInput) -> Result<(), MarshalError> + Send + Sync>;
/// Hook over a single object: no-data reads and constructors
pub type ObjectHook = Arc<dyn Fn(&ObjectRef) -> Result<(), MarshalError> + Send + Sync>;
/// Write-time substitution or read-time resolution
pub type ReplaceHook = Arc<dyn Fn(&ObjectRef) -> Result<Value, MarshalError> + Send + Sync>;

/// A hook together with its declared visibility
#[derive(Clone)]
pub struct Declared<H> {
    /// The hook
    pub hook: H,
    /// Declared access level
    pub visibility: Visibility,
}

impl<H> fmt::Debug for Declared<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Declared({:?})", self.visibility)
    }
}

/// Hooks declared directly on one class
#[derive(Clone, Default)]
pub struct ClassHooks {
    pub(crate) write_object: Option<Declared<WriteHook>>,
    pub(crate) read_object: Option<Declared<ReadHook>>,
    pub(crate) read_object_no_data: Option<Declared<ObjectHook>>,
    pub(crate) write_replace: Option<Declared<ReplaceHook>>,
    pub(crate) read_resolve: Option<Declared<ReplaceHook>>,
    pub(crate) write_external: Option<WriteHook>,
    pub(crate) read_external: Option<ReadHook>,
    pub(crate) constructor: Option<Declared<ObjectHook>>,
    pub(crate) stream_constructor: Option<ReadHook>,
}

impl fmt::Debug for ClassHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassHooks")
            .field("write_object", &self.write_object)
            .field("read_object", &self.read_object)
            .field("read_object_no_data", &self.read_object_no_data)
            .field("write_replace", &self.write_replace)
            .field("read_resolve", &self.read_resolve)
            .field("external", &self.write_external.is_some())
            .field("constructor", &self.constructor)
            .field("stream_constructor", &self.stream_constructor.is_some())
            .finish()
    }
}

/// Definition of a user class, owned by a class loader
pub struct ClassDef {
    pub(crate) name: String,
    pub(crate) loader: LoaderId,
    pub(crate) kind: ClassKind,
    pub(crate) superclass: Option<Class>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) serial_fields: Option<Vec<FieldDescriptor>>,
    pub(crate) version: Option<i64>,
    pub(crate) hooks: ClassHooks,
    /// Populated right after definition; emptied when the loader goes away
    pub(crate) enum_constants: RwLock<Vec<ObjectRef>>,
}

impl ClassDef {
    /// Fully qualified name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Defining loader
    pub fn loader(&self) -> LoaderId {
        self.loader
    }

    /// Serialization style
    pub fn kind(&self) -> ClassKind {
        self.kind
    }

    /// Direct superclass
    pub fn superclass(&self) -> Option<&Class> {
        self.superclass.as_ref()
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Explicit serial field list, if declared
    pub fn serial_fields(&self) -> Option<&[FieldDescriptor]> {
        self.serial_fields.as_deref()
    }

    /// Explicitly declared version id
    pub fn declared_version(&self) -> Option<i64> {
        self.version
    }

    /// Hooks declared directly on this class
    pub fn hooks(&self) -> &ClassHooks {
        &self.hooks
    }

    /// Index of a declared field
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Package part of the name (empty for the default package)
    pub fn package(&self) -> &str {
        self.name.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
    }

    /// Enum constant by name
    pub fn enum_constant(&self, name: &str) -> Option<ObjectRef> {
        self.enum_constants
            .read()
            .iter()
            .find(|c| c.enum_name().as_deref() == Some(name))
            .cloned()
    }

    /// All enum constants in ordinal order
    pub fn enum_constants(&self) -> Vec<ObjectRef> {
        self.enum_constants.read().clone()
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("loader", &self.loader)
            .field("kind", &self.kind)
            .field("superclass", &self.superclass.as_ref().map(Class::name))
            .field("fields", &self.fields)
            .finish()
    }
}

/// Handle to a class
#[derive(Clone)]
pub enum Class {
    /// A primitive type
    Primitive(PrimitiveKind),
    /// The built-in string class
    String,
    /// An array type; `element` is never itself an array
    Array {
        /// Innermost element type
        element: Arc<Class>,
        /// Number of dimensions, at least one
        dimensions: u8,
    },
    /// A user class
    Defined(Arc<ClassDef>),
}

impl Class {
    /// Name used for the built-in string class
    pub const STRING_NAME: &'static str = "String";

    /// Array of `component`, flattening nested arrays
    pub fn array_of(component: Class) -> Class {
        match component {
            Class::Array {
                element,
                dimensions,
            } => Class::Array {
                element,
                dimensions: dimensions.saturating_add(1),
            },
            other => Class::Array {
                element: Arc::new(other),
                dimensions: 1,
            },
        }
    }

    /// Array of `element` with the given dimension count
    pub fn array_with_dimensions(element: Class, dimensions: u8) -> Class {
        let mut class = element;
        for _ in 0..dimensions.max(1) {
            class = Class::array_of(class);
        }
        class
    }

    /// Component type of an array class
    pub fn component_type(&self) -> Option<Class> {
        match self {
            Class::Array {
                element,
                dimensions,
            } => Some(if *dimensions > 1 {
                Class::Array {
                    element: element.clone(),
                    dimensions: dimensions - 1,
                }
            } else {
                (**element).clone()
            }),
            _ => None,
        }
    }

    /// Display name
    pub fn name(&self) -> String {
        match self {
            Class::Primitive(kind) => kind.name().to_string(),
            Class::String => Self::STRING_NAME.to_string(),
            Class::Array {
                element,
                dimensions,
            } => {
                let mut name = element.name();
                for _ in 0..*dimensions {
                    name.push_str("[]");
                }
                name
            }
            Class::Defined(def) => def.name.clone(),
        }
    }

    /// Whether this is an array class
    pub fn is_array(&self) -> bool {
        matches!(self, Class::Array { .. })
    }

    /// Whether this is a primitive class
    pub fn is_primitive(&self) -> bool {
        matches!(self, Class::Primitive(_))
    }

    /// Definition of a user class
    pub fn as_defined(&self) -> Option<&Arc<ClassDef>> {
        match self {
            Class::Defined(def) => Some(def),
            _ => None,
        }
    }

    /// Serialization style of a user class
    pub fn kind(&self) -> Option<ClassKind> {
        self.as_defined().map(|def| def.kind)
    }

    /// Defining loader of a user class
    pub fn loader(&self) -> Option<LoaderId> {
        self.as_defined().map(|def| def.loader)
    }

    /// Direct superclass of a user class
    pub fn superclass(&self) -> Option<Class> {
        self.as_defined().and_then(|def| def.superclass.clone())
    }

    /// Whether `self` is `other` or one of its subclasses
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut current = Some(self.clone());
        while let Some(class) = current {
            if &class == other {
                return true;
            }
            current = class.superclass();
        }
        false
    }

    /// Definitions from the root ancestor down to this class
    pub fn hierarchy(&self) -> Vec<Arc<ClassDef>> {
        let mut chain = Vec::new();
        let mut current = self.as_defined().cloned();
        while let Some(def) = current {
            current = def.superclass.as_ref().and_then(|s| s.as_defined().cloned());
            chain.push(def);
        }
        chain.reverse();
        chain
    }

    /// Filter candidate describing this class
    pub fn candidate(&self) -> rivet_filter::Candidate<'_> {
        match self {
            Class::Primitive(kind) => rivet_filter::Candidate::primitive(kind.name()),
            Class::String => rivet_filter::Candidate::named(Self::STRING_NAME),
            Class::Defined(def) => rivet_filter::Candidate::named(&def.name),
            Class::Array {
                element,
                dimensions,
            } => element.candidate().with_dimensions(*dimensions),
        }
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Class::Primitive(a), Class::Primitive(b)) => a == b,
            (Class::String, Class::String) => true,
            (
                Class::Array {
                    element: a,
                    dimensions: da,
                },
                Class::Array {
                    element: b,
                    dimensions: db,
                },
            ) => da == db && a == b,
            (Class::Defined(a), Class::Defined(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Class {}

impl Hash for Class {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Class::Primitive(kind) => kind.hash(state),
            Class::String => {}
            Class::Array {
                element,
                dimensions,
            } => {
                element.hash(state);
                dimensions.hash(state);
            }
            Class::Defined(def) => (Arc::as_ptr(def) as usize).hash(state),
        }
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class({})", self.name())
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Builder for a user class; finish with [`ClassLoader::define`](crate::ClassLoader::define)
pub struct ClassBuilder {
    pub(crate) name: String,
    pub(crate) kind: ClassKind,
    pub(crate) superclass: Option<Class>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) serial_fields: Option<Vec<FieldDescriptor>>,
    pub(crate) version: Option<i64>,
    pub(crate) hooks: ClassHooks,
    pub(crate) enum_constants: Vec<String>,
}

impl ClassBuilder {
    /// Start a class of the given kind
    pub fn new(name: impl Into<String>, kind: ClassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            superclass: None,
            fields: Vec::new(),
            serial_fields: None,
            version: None,
            hooks: ClassHooks::default(),
            enum_constants: Vec::new(),
        }
    }

    /// Shorthand for a serializable class
    pub fn serializable(name: impl Into<String>) -> Self {
        Self::new(name, ClassKind::Serializable)
    }

    /// Enum class with the given constants
    pub fn enumeration<I, S>(name: impl Into<String>, constants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut builder = Self::new(name, ClassKind::Enum);
        builder.enum_constants = constants.into_iter().map(Into::into).collect();
        builder
    }

    /// Set the superclass
    pub fn extends(mut self, superclass: &Class) -> Self {
        self.superclass = Some(superclass.clone());
        self
    }

    /// Declare a field
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare an explicit serial field list
    pub fn serial_fields(mut self, fields: Vec<FieldDescriptor>) -> Self {
        self.serial_fields = Some(fields);
        self
    }

    /// Declare the version id
    pub fn version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Custom write hook for this class's fields
    pub fn write_object<F>(mut self, visibility: Visibility, hook: F) -> Self
    where
        F: Fn(&ObjectRef, &mut dyn ObjectOutput) -> Result<(), MarshalError> + Send + Sync + 'static,
    {
        self.hooks.write_object = Some(Declared {
            hook: Arc::new(hook),
            visibility,
        });
        self
    }

    /// Custom read hook for this class's fields
    pub fn read_object<F>(mut self, visibility: Visibility, hook: F) -> Self
    where
        F: Fn(&ObjectRef, &mut dyn ObjectInput) -> Result<(), MarshalError> + Send + Sync + 'static,
    {
        self.hooks.read_object = Some(Declared {
            hook: Arc::new(hook),
            visibility,
        });
        self
    }

    /// Hook run when the stream carries no data for this class
    pub fn read_object_no_data<F>(mut self, visibility: Visibility, hook: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<(), MarshalError> + Send + Sync + 'static,
    {
        self.hooks.read_object_no_data = Some(Declared {
            hook: Arc::new(hook),
            visibility,
        });
        self
    }

    /// Write-time substitution
    pub fn write_replace<F>(mut self, visibility: Visibility, hook: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<Value, MarshalError> + Send + Sync + 'static,
    {
        self.hooks.write_replace = Some(Declared {
            hook: Arc::new(hook),
            visibility,
        });
        self
    }

    /// Read-time resolution
    pub fn read_resolve<F>(mut self, visibility: Visibility, hook: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<Value, MarshalError> + Send + Sync + 'static,
    {
        self.hooks.read_resolve = Some(Declared {
            hook: Arc::new(hook),
            visibility,
        });
        self
    }

    /// External write and read hooks
    pub fn external<W, R>(mut self, write: W, read: R) -> Self
    where
        W: Fn(&ObjectRef, &mut dyn ObjectOutput) -> Result<(), MarshalError> + Send + Sync + 'static,
        R: Fn(&ObjectRef, &mut dyn ObjectInput) -> Result<(), MarshalError> + Send + Sync + 'static,
    {
        self.hooks.write_external = Some(Arc::new(write));
        self.hooks.read_external = Some(Arc::new(read));
        self
    }

    /// Zero-argument constructor, run on a freshly allocated instance
    pub fn constructor<F>(mut self, visibility: Visibility, hook: F) -> Self
    where
        F: Fn(&ObjectRef) -> Result<(), MarshalError> + Send + Sync + 'static,
    {
        self.hooks.constructor = Some(Declared {
            hook: Arc::new(hook),
            visibility,
        });
        self
    }

    /// Constructor that initializes an instance straight from the stream
    pub fn stream_constructor<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ObjectRef, &mut dyn ObjectInput) -> Result<(), MarshalError> + Send + Sync + 'static,
    {
        self.hooks.stream_constructor = Some(Arc::new(hook));
        self
    }
}
