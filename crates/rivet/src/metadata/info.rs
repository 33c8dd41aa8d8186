//! Per-class serialization metadata
//!
//! A [`SerializableClassInfo`] is computed once per class and answers every
//! question the marshaller asks on the slow path: which fields go on the
//! wire and in what order, which hooks apply, how to create an instance,
//! and which version id to announce.

use crate::error::MarshalError;
use crate::model::{
    Class, ClassDef, ClassKind, Declared, FieldType, LoaderId, ObjectHook, ObjectRef, ReadHook,
    ReplaceHook, Visibility, WriteHook,
};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Weak};

/// A field as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialField {
    /// Field name
    pub name: String,
    /// Wire type
    pub field_type: FieldType,
    /// Read and written as an unshared reference
    pub unshared: bool,
    /// Index into the declaring class's fields; `None` when the explicit
    /// serial list names a field the class does not declare with that type
    pub slot: Option<usize>,
}

/// How a fresh instance is obtained while unmarshalling
#[derive(Clone)]
pub enum Instantiation {
    /// Every ancestor is serializable; allocate with defaults
    Implicit,
    /// Run the no-arg constructor of the first non-serializable ancestor
    AncestorConstructor {
        /// Name of that ancestor
        ancestor: String,
        /// Its constructor
        constructor: ObjectHook,
    },
    /// Externalizable class with an accessible no-arg constructor
    NoArg(ObjectHook),
    /// Externalizable class built straight from the stream
    StreamConstructor(ReadHook),
    /// The class cannot be instantiated by this engine
    Unavailable(String),
}

impl fmt::Debug for Instantiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instantiation::Implicit => f.write_str("Implicit"),
            Instantiation::AncestorConstructor { ancestor, .. } => {
                write!(f, "AncestorConstructor({ancestor})")
            }
            Instantiation::NoArg(_) => f.write_str("NoArg"),
            Instantiation::StreamConstructor(_) => f.write_str("StreamConstructor"),
            Instantiation::Unavailable(reason) => write!(f, "Unavailable({reason})"),
        }
    }
}

/// Serialization metadata of one class
pub struct SerializableClassInfo {
    class: Weak<ClassDef>,
    name: String,
    loader: LoaderId,
    kind: ClassKind,
    fields: Vec<SerialField>,
    version: i64,
    write_object: Option<WriteHook>,
    read_object: Option<ReadHook>,
    read_object_no_data: Option<ObjectHook>,
    write_replace: Option<ReplaceHook>,
    read_resolve: Option<ReplaceHook>,
    write_external: Option<WriteHook>,
    read_external: Option<ReadHook>,
    instantiation: Instantiation,
}

impl SerializableClassInfo {
    /// Compute the metadata of a user class
    pub fn compute(def: &Arc<ClassDef>) -> Self {
        let fields = discover_fields(def);
        let hooks = def.hooks();
        let write_object = private_hook(def, &hooks.write_object, "write_object");
        let read_object = private_hook(def, &hooks.read_object, "read_object");
        let read_object_no_data =
            private_hook(def, &hooks.read_object_no_data, "read_object_no_data");
        let write_replace = inheritable_hook(def, |d| d.hooks().write_replace.clone());
        let read_resolve = inheritable_hook(def, |d| d.hooks().read_resolve.clone());
        let instantiation = plan_instantiation(def);

        let version = def.declared_version().unwrap_or_else(|| {
            default_version(def, &fields, write_object.is_some(), read_object.is_some())
        });

        Self {
            class: Arc::downgrade(def),
            name: def.name().to_string(),
            loader: def.loader(),
            kind: def.kind(),
            fields,
            version,
            write_object,
            read_object,
            read_object_no_data,
            write_replace,
            read_resolve,
            write_external: hooks.write_external.clone(),
            read_external: hooks.read_external.clone(),
            instantiation,
        }
    }

    /// The described class, unless it has been unloaded
    pub fn class(&self) -> Result<Class, MarshalError> {
        self.class
            .upgrade()
            .map(Class::Defined)
            .ok_or_else(|| MarshalError::ClassUnloaded(self.name.clone()))
    }

    /// Whether this entry was computed for exactly `def`
    pub fn describes(&self, def: &Arc<ClassDef>) -> bool {
        self.class.upgrade().is_some_and(|live| Arc::ptr_eq(&live, def))
    }

    /// Class name
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

    /// Wire fields sorted by name
    pub fn fields(&self) -> &[SerialField] {
        &self.fields
    }

    /// Effective version id
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Whether a custom write hook applies
    pub fn has_custom_write_hook(&self) -> bool {
        self.write_object.is_some()
    }

    /// Whether a custom read hook applies
    pub fn has_custom_read_hook(&self) -> bool {
        self.read_object.is_some()
    }

    /// Custom write hook
    pub fn write_hook(&self) -> Option<&WriteHook> {
        self.write_object.as_ref()
    }

    /// Custom read hook
    pub fn read_hook(&self) -> Option<&ReadHook> {
        self.read_object.as_ref()
    }

    /// Hook for levels the stream carries no data for
    pub fn read_no_data_hook(&self) -> Option<&ObjectHook> {
        self.read_object_no_data.as_ref()
    }

    /// Write-time substitution, possibly inherited
    pub fn write_replace_hook(&self) -> Option<&ReplaceHook> {
        self.write_replace.as_ref()
    }

    /// Read-time resolution, possibly inherited
    pub fn read_resolve_hook(&self) -> Option<&ReplaceHook> {
        self.read_resolve.as_ref()
    }

    /// External write hook
    pub fn write_external_hook(&self) -> Option<&WriteHook> {
        self.write_external.as_ref()
    }

    /// External read hook
    pub fn read_external_hook(&self) -> Option<&ReadHook> {
        self.read_external.as_ref()
    }

    /// Instantiation plan
    pub fn instantiation(&self) -> &Instantiation {
        &self.instantiation
    }

    /// Allocate an instance following the plan
    ///
    /// A stream constructor is not run here; the caller needs the stream.
    pub fn instantiate(&self) -> Result<ObjectRef, MarshalError> {
        let class = self.class()?;
        match &self.instantiation {
            Instantiation::Unavailable(reason) => {
                Err(MarshalError::invalid_class(&self.name, reason.clone()))
            }
            Instantiation::Implicit | Instantiation::StreamConstructor(_) => {
                ObjectRef::new_instance(&class)
            }
            Instantiation::AncestorConstructor { constructor, .. }
            | Instantiation::NoArg(constructor) => {
                let object = ObjectRef::new_instance(&class)?;
                constructor(&object)?;
                Ok(object)
            }
        }
    }
}

impl fmt::Debug for SerializableClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializableClassInfo")
            .field("name", &self.name)
            .field("loader", &self.loader)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .field("version", &self.version)
            .field("write_object", &self.write_object.is_some())
            .field("read_object", &self.read_object.is_some())
            .field("instantiation", &self.instantiation)
            .finish()
    }
}

fn discover_fields(def: &ClassDef) -> Vec<SerialField> {
    let mut fields: Vec<SerialField> = match def.serial_fields() {
        Some(explicit) => explicit
            .iter()
            .map(|d| SerialField {
                name: d.name.clone(),
                field_type: d.field_type,
                unshared: d.unshared,
                slot: def
                    .field_index(&d.name)
                    .filter(|&i| def.fields()[i].field_type == d.field_type),
            })
            .collect(),
        None => def
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.transient && !f.is_static)
            .map(|(i, f)| SerialField {
                name: f.name.clone(),
                field_type: f.field_type,
                unshared: f.unshared,
                slot: Some(i),
            })
            .collect(),
    };
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    fields
}

/// Write/read hooks only count when declared privately on the class itself
fn private_hook<H: Clone>(def: &ClassDef, declared: &Option<Declared<H>>, what: &str) -> Option<H> {
    match declared {
        Some(d) if d.visibility == Visibility::Private => Some(d.hook.clone()),
        Some(d) => {
            log::trace!(
                "ignoring {:?} {} hook on {}: must be private",
                d.visibility,
                what,
                def.name()
            );
            None
        }
        None => None,
    }
}

/// Substitution hooks are inherited unless private or out of package reach
fn inheritable_hook<H, F>(def: &Arc<ClassDef>, select: F) -> Option<H>
where
    F: Fn(&ClassDef) -> Option<Declared<H>>,
{
    let mut current = Some(def.clone());
    while let Some(level) = current {
        if let Some(declared) = select(&level) {
            if Arc::ptr_eq(&level, def) {
                return Some(declared.hook);
            }
            let reachable = match declared.visibility {
                Visibility::Public | Visibility::Protected => true,
                Visibility::Package => {
                    level.package() == def.package() && level.loader() == def.loader()
                }
                Visibility::Private => false,
            };
            // the nearest declaration shadows everything above it
            return reachable.then_some(declared.hook);
        }
        current = level.superclass().and_then(|s| s.as_defined().cloned());
    }
    None
}

fn plan_instantiation(def: &Arc<ClassDef>) -> Instantiation {
    match def.kind() {
        ClassKind::Plain => Instantiation::Unavailable("class is not serializable".to_string()),
        ClassKind::Enum => Instantiation::Implicit,
        ClassKind::Externalizable => {
            let hooks = def.hooks();
            if hooks.write_external.is_none() {
                return Instantiation::Unavailable(
                    "externalizable class declares no external write hook".to_string(),
                );
            }
            match (&hooks.constructor, &hooks.read_external, &hooks.stream_constructor) {
                (Some(ctor), Some(_), _) if ctor.visibility == Visibility::Public => {
                    Instantiation::NoArg(ctor.hook.clone())
                }
                (_, _, Some(stream)) => Instantiation::StreamConstructor(stream.clone()),
                _ => Instantiation::Unavailable(
                    "externalizable class has neither a public no-arg constructor nor a stream constructor"
                        .to_string(),
                ),
            }
        }
        ClassKind::Serializable => {
            let mut ancestor = def.superclass().and_then(|s| s.as_defined().cloned());
            while let Some(level) = ancestor {
                if level.kind() != ClassKind::Serializable {
                    return match &level.hooks().constructor {
                        Some(ctor) if accessible_constructor(ctor.visibility, &level, def) => {
                            Instantiation::AncestorConstructor {
                                ancestor: level.name().to_string(),
                                constructor: ctor.hook.clone(),
                            }
                        }
                        _ => Instantiation::Unavailable(format!(
                            "first non-serializable superclass `{}` has no accessible no-arg constructor",
                            level.name()
                        )),
                    };
                }
                ancestor = level.superclass().and_then(|s| s.as_defined().cloned());
            }
            Instantiation::Implicit
        }
    }
}

fn accessible_constructor(visibility: Visibility, owner: &ClassDef, from: &ClassDef) -> bool {
    match visibility {
        Visibility::Public | Visibility::Protected => true,
        Visibility::Package => owner.package() == from.package() && owner.loader() == from.loader(),
        Visibility::Private => false,
    }
}

/// SHA-256 over the class shape, truncated to eight bytes
fn default_version(def: &ClassDef, fields: &[SerialField], write_hook: bool, read_hook: bool) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(def.name().as_bytes());
    hasher.update([match def.kind() {
        ClassKind::Plain => 0u8,
        ClassKind::Serializable => 1,
        ClassKind::Externalizable => 2,
        ClassKind::Enum => 3,
    }]);
    for field in fields {
        hasher.update([field.field_type.type_code(), field.unshared as u8]);
        hasher.update(field.name.as_bytes());
        hasher.update([0]);
    }
    hasher.update([write_hook as u8, read_hook as u8]);
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassBuilder, ClassLoader, FieldDef, FieldDescriptor, PrimitiveKind};

    fn info(class: &Class) -> SerializableClassInfo {
        SerializableClassInfo::compute(class.as_defined().unwrap())
    }

    #[test]
    fn test_fields_sorted_and_filtered() {
        let loader = ClassLoader::new("t");
        let class = loader
            .define(
                ClassBuilder::serializable("a.Rec")
                    .field(FieldDef::primitive("zeta", PrimitiveKind::Int))
                    .field(FieldDef::object("alpha"))
                    .field(FieldDef::object("cache").transient())
                    .field(FieldDef::primitive("COUNT", PrimitiveKind::Int).static_field()),
            )
            .unwrap();
        let names: Vec<_> = info(&class).fields().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_explicit_field_list_wins() {
        let loader = ClassLoader::new("t");
        let class = loader
            .define(
                ClassBuilder::serializable("a.Rec")
                    .field(FieldDef::primitive("b", PrimitiveKind::Int))
                    .field(FieldDef::primitive("a", PrimitiveKind::Int))
                    .serial_fields(vec![
                        FieldDescriptor::new("b", FieldType::Primitive(PrimitiveKind::Int)),
                        FieldDescriptor::new("ghost", FieldType::Object),
                    ]),
            )
            .unwrap();
        let fields = info(&class).fields().to_vec();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "b");
        assert_eq!(fields[0].slot, Some(0));
        assert_eq!(fields[1].name, "ghost");
        assert_eq!(fields[1].slot, None);
    }

    #[test]
    fn test_hook_visibility_rules() {
        let loader = ClassLoader::new("t");
        let base = loader
            .define(
                ClassBuilder::serializable("a.Base")
                    .write_object(Visibility::Private, |_, _| Ok(()))
                    .write_replace(Visibility::Protected, |o| Ok(crate::Value::Object(o.clone())))
                    .read_resolve(Visibility::Private, |o| Ok(crate::Value::Object(o.clone()))),
            )
            .unwrap();
        let derived = loader
            .define(
                ClassBuilder::serializable("a.Derived")
                    .extends(&base)
                    .read_object(Visibility::Public, |_, _| Ok(())),
            )
            .unwrap();

        let base_info = info(&base);
        assert!(base_info.has_custom_write_hook());
        assert!(base_info.read_resolve_hook().is_some());

        let derived_info = info(&derived);
        assert!(!derived_info.has_custom_write_hook());
        assert!(!derived_info.has_custom_read_hook());
        assert!(derived_info.write_replace_hook().is_some());
        assert!(derived_info.read_resolve_hook().is_none());
    }

    #[test]
    fn test_package_private_hook_needs_same_package() {
        let loader = ClassLoader::new("t");
        let base = loader
            .define(
                ClassBuilder::serializable("a.Base")
                    .write_replace(Visibility::Package, |o| Ok(crate::Value::Object(o.clone()))),
            )
            .unwrap();
        let same = loader
            .define(ClassBuilder::serializable("a.Same").extends(&base))
            .unwrap();
        let other = loader
            .define(ClassBuilder::serializable("b.Other").extends(&base))
            .unwrap();
        assert!(info(&same).write_replace_hook().is_some());
        assert!(info(&other).write_replace_hook().is_none());
    }

    #[test]
    fn test_instantiation_plans() {
        let loader = ClassLoader::new("t");
        let plain_no_ctor = loader.define(ClassBuilder::new("a.Raw", ClassKind::Plain)).unwrap();
        let bad = loader
            .define(ClassBuilder::serializable("a.Bad").extends(&plain_no_ctor))
            .unwrap();
        let bad_info = info(&bad);
        assert!(matches!(bad_info.instantiation(), Instantiation::Unavailable(_)));
        let err = bad_info.instantiate().unwrap_err();
        assert!(err.to_string().contains("a.Raw"));

        let plain = loader
            .define(
                ClassBuilder::new("a.Holder", ClassKind::Plain)
                    .field(FieldDef::primitive("init", PrimitiveKind::Boolean))
                    .constructor(Visibility::Public, |o| o.set_field("init", true)),
            )
            .unwrap();
        let good = loader
            .define(ClassBuilder::serializable("a.Good").extends(&plain))
            .unwrap();
        let object = info(&good).instantiate().unwrap();
        assert_eq!(object.get_field("init"), Some(crate::Value::Boolean(true)));

        let ext = loader
            .define(
                ClassBuilder::new("a.Ext", ClassKind::Externalizable)
                    .external(|_, _| Ok(()), |_, _| Ok(()))
                    .constructor(Visibility::Private, |_| Ok(())),
            )
            .unwrap();
        assert!(matches!(info(&ext).instantiation(), Instantiation::Unavailable(_)));
    }

    #[test]
    fn test_version_is_stable_and_overridable() {
        let loader_a = ClassLoader::new("a");
        let loader_b = ClassLoader::new("b");
        let shape = |name: &str| {
            ClassBuilder::serializable(name).field(FieldDef::primitive("x", PrimitiveKind::Int))
        };
        let a = loader_a.define(shape("p.Point")).unwrap();
        let b = loader_b.define(shape("p.Point")).unwrap();
        assert_eq!(info(&a).version(), info(&b).version());

        let c = loader_b.define(shape("p.Other")).unwrap();
        assert_ne!(info(&a).version(), info(&c).version());

        let d = loader_b.define(shape("p.Fixed").version(42)).unwrap();
        assert_eq!(info(&d).version(), 42);
    }

    #[test]
    fn test_unloaded_class_is_reported() {
        let loader = ClassLoader::new("gone");
        let class = loader.define(ClassBuilder::serializable("a.Temp")).unwrap();
        let meta = info(&class);
        drop(class);
        drop(loader);
        assert!(matches!(meta.class(), Err(MarshalError::ClassUnloaded(name)) if name == "a.Temp"));
    }
}
