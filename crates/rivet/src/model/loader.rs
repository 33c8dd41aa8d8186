//! Class loaders
//!
//! A loader is a named namespace of class definitions. Its [`LoaderId`] is
//! the opaque token the metadata registry keys entries by, so releasing a
//! loader's metadata never needs the loader itself.

use crate::error::MarshalError;
use crate::model::class::{Class, ClassBuilder, ClassDef, ClassKind};
use crate::model::object::ObjectRef;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque loader identity token
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(u64);

impl LoaderId {
    fn next() -> Self {
        LoaderId(NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw token value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loader#{}", self.0)
    }
}

struct LoaderInner {
    id: LoaderId,
    name: String,
    parent: Option<ClassLoader>,
    classes: RwLock<FxHashMap<String, Class>>,
}

impl Drop for LoaderInner {
    fn drop(&mut self) {
        // enum constants point back at their class
        for class in self.classes.get_mut().values() {
            if let Some(def) = class.as_defined() {
                def.enum_constants.write().clear();
            }
        }
    }
}

/// Named class namespace with parent-first lookup
#[derive(Clone)]
pub struct ClassLoader {
    inner: Arc<LoaderInner>,
}

impl ClassLoader {
    /// Root loader
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Loader delegating to `parent` first
    pub fn with_parent(name: impl Into<String>, parent: &ClassLoader) -> Self {
        Self::build(name.into(), Some(parent.clone()))
    }

    fn build(name: String, parent: Option<ClassLoader>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                id: LoaderId::next(),
                name,
                parent,
                classes: RwLock::new(FxHashMap::default()),
            }),
        }
    }

    /// Identity token
    pub fn id(&self) -> LoaderId {
        self.inner.id
    }

    /// Loader name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Parent loader
    pub fn parent(&self) -> Option<&ClassLoader> {
        self.inner.parent.as_ref()
    }

    /// Define a class in this loader
    pub fn define(&self, builder: ClassBuilder) -> Result<Class, MarshalError> {
        let ClassBuilder {
            name,
            kind,
            superclass,
            fields,
            serial_fields,
            version,
            hooks,
            enum_constants,
        } = builder;

        if name.is_empty() || name.starts_with('.') || name.ends_with('.') || name.contains("..") {
            return Err(MarshalError::invalid_class(name, "malformed class name"));
        }
        if let Some(parent) = &superclass {
            match parent.kind() {
                Some(ClassKind::Enum) => {
                    return Err(MarshalError::invalid_class(name, "cannot extend an enum"));
                }
                Some(_) => {}
                None => {
                    return Err(MarshalError::invalid_class(
                        name,
                        format!("superclass `{parent}` is not a user class"),
                    ));
                }
            }
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(MarshalError::invalid_class(
                    name,
                    format!("duplicate field `{}`", field.name),
                ));
            }
        }
        if kind != ClassKind::Enum && !enum_constants.is_empty() {
            return Err(MarshalError::invalid_class(name, "only enums declare constants"));
        }

        let mut classes = self.inner.classes.write();
        if classes.contains_key(&name) {
            return Err(MarshalError::invalid_class(name, "already defined in this loader"));
        }

        let def = Arc::new(ClassDef {
            name: name.clone(),
            loader: self.inner.id,
            kind,
            superclass,
            fields,
            serial_fields,
            version,
            hooks,
            enum_constants: RwLock::new(Vec::new()),
        });
        let class = Class::Defined(def.clone());
        if kind == ClassKind::Enum {
            let constants: Vec<ObjectRef> = enum_constants
                .into_iter()
                .enumerate()
                .map(|(ordinal, constant)| ObjectRef::enum_constant(&class, constant, ordinal))
                .collect();
            *def.enum_constants.write() = constants;
        }
        log::trace!("defined class {} in {}", name, self.inner.id);
        classes.insert(name, class.clone());
        Ok(class)
    }

    /// Find a class, asking the parent chain first
    pub fn load(&self, name: &str) -> Option<Class> {
        if let Some(parent) = &self.inner.parent {
            if let Some(class) = parent.load(name) {
                return Some(class);
            }
        }
        self.find_local(name)
    }

    /// Find a class defined by this loader only
    pub fn find_local(&self, name: &str) -> Option<Class> {
        self.inner.classes.read().get(name).cloned()
    }

    /// Number of classes defined by this loader
    pub fn class_count(&self) -> usize {
        self.inner.classes.read().len()
    }
}

impl fmt::Debug for ClassLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassLoader")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("classes", &self.class_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::class::{FieldDef, PrimitiveKind};

    #[test]
    fn test_parent_first_lookup() {
        let parent = ClassLoader::new("app");
        let child = ClassLoader::with_parent("plugin", &parent);
        let shared = parent.define(ClassBuilder::serializable("com.acme.Shared")).unwrap();
        child.define(ClassBuilder::serializable("com.acme.Plugin")).unwrap();

        assert_eq!(child.load("com.acme.Shared"), Some(shared));
        assert!(parent.load("com.acme.Plugin").is_none());
        assert_ne!(parent.id(), child.id());
    }

    #[test]
    fn test_duplicate_definitions_rejected() {
        let loader = ClassLoader::new("app");
        loader.define(ClassBuilder::serializable("a.B")).unwrap();
        let err = loader.define(ClassBuilder::serializable("a.B")).unwrap_err();
        assert!(matches!(err, MarshalError::InvalidClass { .. }));

        let err = loader
            .define(
                ClassBuilder::serializable("a.C")
                    .field(FieldDef::primitive("x", PrimitiveKind::Int))
                    .field(FieldDef::object("x")),
            )
            .unwrap_err();
        assert!(err.to_string().contains("duplicate field"));
    }

    #[test]
    fn test_enum_constants_are_created() {
        let loader = ClassLoader::new("app");
        let color = loader
            .define(ClassBuilder::enumeration("a.Color", ["RED", "GREEN"]))
            .unwrap();
        let def = color.as_defined().unwrap();
        let green = def.enum_constant("GREEN").unwrap();
        assert_eq!(green.enum_ordinal(), Some(1));
        assert_eq!(green.class(), &color);
        assert!(def.enum_constant("BLUE").is_none());
    }
}
