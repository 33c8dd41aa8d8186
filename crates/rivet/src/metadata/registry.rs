//! Process-wide class metadata registry

use crate::error::MarshalError;
use crate::metadata::info::SerializableClassInfo;
use crate::model::{Class, LoaderId};
use dashmap::DashMap;
use std::sync::Arc;

type Key = (LoaderId, String);

/// Concurrent cache of [`SerializableClassInfo`] keyed by loader and class name
///
/// One registry is created by the embedding application and handed to every
/// [`MarshallerFactory`](crate::MarshallerFactory) that should share it.
/// Entries hold the class weakly; a lookup that finds a dead or different
/// class recomputes the entry in place.
pub struct ClassInfoRegistry {
    entries: DashMap<Key, Arc<SerializableClassInfo>>,
}

impl ClassInfoRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Metadata for a user class, computed on first use
    pub fn lookup(&self, class: &Class) -> Result<Arc<SerializableClassInfo>, MarshalError> {
        let Some(def) = class.as_defined() else {
            return Err(MarshalError::invalid_class(
                class.name(),
                "only user classes carry serialization metadata",
            ));
        };
        let key = (def.loader(), def.name().to_string());
        if let Some(entry) = self.entries.get(&key) {
            if entry.describes(def) {
                return Ok(entry.value().clone());
            }
        }

        let info = Arc::new(SerializableClassInfo::compute(def));
        log::trace!("computed metadata for {} in {}", def.name(), def.loader());
        // a concurrent lookup may have raced us; keep whichever describes this class
        let entry = self
            .entries
            .entry(key)
            .and_modify(|existing| {
                if !existing.describes(def) {
                    *existing = info.clone();
                }
            })
            .or_insert_with(|| info.clone());
        Ok(entry.value().clone())
    }

    /// Cached entry without recomputation
    pub fn get(&self, loader: LoaderId, name: &str) -> Option<Arc<SerializableClassInfo>> {
        self.entries
            .get(&(loader, name.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Evict every entry of `loader`; returns the number evicted
    pub fn release(&self, loader: LoaderId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(owner, _), _| *owner != loader);
        let evicted = before.saturating_sub(self.entries.len());
        log::debug!("released {} metadata entries of {}", evicted, loader);
        evicted
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for ClassInfoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ClassInfoRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassInfoRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassBuilder, ClassLoader, PrimitiveKind};
    use std::thread;

    #[test]
    fn test_lookup_is_memoized() {
        let registry = ClassInfoRegistry::new();
        let loader = ClassLoader::new("app");
        let class = loader.define(ClassBuilder::serializable("a.B")).unwrap();
        let first = registry.lookup(&class).unwrap();
        let second = registry.lookup(&class).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_evicts_only_that_loader() {
        let registry = ClassInfoRegistry::new();
        let a = ClassLoader::new("a");
        let b = ClassLoader::new("b");
        let ca = a.define(ClassBuilder::serializable("x.Y")).unwrap();
        let cb = b.define(ClassBuilder::serializable("x.Y")).unwrap();
        registry.lookup(&ca).unwrap();
        registry.lookup(&cb).unwrap();
        assert_eq!(registry.release(a.id()), 1);
        assert!(registry.get(a.id(), "x.Y").is_none());
        assert!(registry.get(b.id(), "x.Y").is_some());
    }

    #[test]
    fn test_dead_entry_surfaces_unloaded() {
        let registry = ClassInfoRegistry::new();
        let loader = ClassLoader::new("a");
        let id = loader.id();
        let class = loader.define(ClassBuilder::serializable("x.Gone")).unwrap();
        registry.lookup(&class).unwrap();
        drop(class);
        drop(loader);

        let stale = registry.get(id, "x.Gone").unwrap();
        assert!(matches!(stale.class(), Err(MarshalError::ClassUnloaded(_))));
    }

    #[test]
    fn test_builtin_classes_have_no_metadata() {
        let registry = ClassInfoRegistry::new();
        assert!(registry.lookup(&Class::String).is_err());
        assert!(registry.lookup(&Class::Primitive(PrimitiveKind::Int)).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_lookups_and_release() {
        let registry = Arc::new(ClassInfoRegistry::new());
        let loader = ClassLoader::new("shared");
        let classes: Vec<Class> = (0..16)
            .map(|i| {
                loader
                    .define(ClassBuilder::serializable(format!("c.K{i}")))
                    .unwrap()
            })
            .collect();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let registry = registry.clone();
                let classes = classes.clone();
                let id = loader.id();
                thread::spawn(move || {
                    for round in 0..50 {
                        for class in &classes {
                            let info = registry.lookup(class).unwrap();
                            assert_eq!(info.name(), class.name());
                        }
                        if t == 0 && round % 10 == 0 {
                            registry.release(id);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.len() <= 16);
    }
}
