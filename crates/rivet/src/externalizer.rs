//! Externalizers: caller-supplied wire formats for whole classes

use crate::error::MarshalResult;
use crate::marshal::{ObjectInput, ObjectOutput};
use crate::model::{Class, ObjectRef};
use crate::pair::Pair;
use std::fmt;
use std::sync::Arc;

/// Fully controls the representation of the instances it is chosen for
///
/// Both methods run in block-data mode. Objects written through the output
/// are shared with the rest of the graph as usual.
pub trait Externalizer: Send + Sync {
    /// Write `object`
    fn write_external(&self, object: &ObjectRef, output: &mut dyn ObjectOutput) -> MarshalResult<()>;

    /// Build an instance of `class` from what `write_external` wrote
    ///
    /// The instance's handle is already reserved, so the data being read
    /// cannot refer back to the object under construction.
    fn create_external(&self, class: &Class, input: &mut dyn ObjectInput) -> MarshalResult<ObjectRef>;
}

/// Chooses an externalizer per class
pub trait ClassExternalizerFactory: Send + Sync {
    /// Externalizer for `class`, if it should be externalized
    fn externalizer_for(&self, class: &Class) -> Option<Arc<dyn Externalizer>>;
}

/// Predicate selecting the classes an externalizer applies to
pub type ClassPredicate = Arc<dyn Fn(&Class) -> bool + Send + Sync>;

/// Ordered (predicate, externalizer) pairs; the first match applies
#[derive(Clone, Default)]
pub struct ExternalizerList {
    entries: Vec<Pair<ClassPredicate, Arc<dyn Externalizer>>>,
}

impl ExternalizerList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry matched by predicate
    pub fn with<P>(mut self, predicate: P, externalizer: Arc<dyn Externalizer>) -> Self
    where
        P: Fn(&Class) -> bool + Send + Sync + 'static,
    {
        self.entries.push(Pair::new(Arc::new(predicate), externalizer));
        self
    }

    /// Append an entry for exactly `class`
    pub fn with_class(self, class: &Class, externalizer: Arc<dyn Externalizer>) -> Self {
        let class = class.clone();
        self.with(move |candidate| *candidate == class, externalizer)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ClassExternalizerFactory for ExternalizerList {
    fn externalizer_for(&self, class: &Class) -> Option<Arc<dyn Externalizer>> {
        self.entries
            .iter()
            .find(|entry| (entry.a)(class))
            .map(|entry| entry.b.clone())
    }
}

impl fmt::Debug for ExternalizerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalizerList")
            .field("entries", &self.entries.len())
            .finish()
    }
}
