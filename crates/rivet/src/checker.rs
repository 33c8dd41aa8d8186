//! Which classes may travel on the default path

use crate::model::{Class, ClassKind};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Decides whether instances of a class may be marshalled without an
/// externalizer
pub trait SerializabilityChecker: Send + Sync {
    /// Whether `class` may be written
    fn is_serializable(&self, class: &Class) -> bool;
}

/// Accepts strings, arrays and every serializable, externalizable or enum
/// class
#[derive(Debug, Copy, Clone, Default)]
pub struct DefaultSerializabilityChecker;

impl SerializabilityChecker for DefaultSerializabilityChecker {
    fn is_serializable(&self, class: &Class) -> bool {
        match class {
            Class::String | Class::Array { .. } => true,
            Class::Primitive(_) => false,
            Class::Defined(def) => def.kind() != ClassKind::Plain,
        }
    }
}

static DEFAULT_CHECKER: Lazy<Arc<dyn SerializabilityChecker>> =
    Lazy::new(|| Arc::new(DefaultSerializabilityChecker));

/// Shared instance of [`DefaultSerializabilityChecker`]
pub fn default_checker() -> Arc<dyn SerializabilityChecker> {
    DEFAULT_CHECKER.clone()
}
