//! Session reference caches
//!
//! Handles are dense integers starting at zero. The writer maps identities
//! to handles with [`ReferenceCache::internalize`]; the reader only appends
//! in stream order and looks handles up. Both sides clear in lock-step, so a
//! handle is never reused until its counter has been reset.

use crate::model::{Class, ObjectRef};
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Back-reference handle
pub type Handle = u32;

/// Identity key of a cached value
pub trait Identity {
    /// Key type; equal keys mean the same identity
    type Key: Eq + Hash;

    /// Identity key of `self`
    fn identity_key(&self) -> Self::Key;
}

impl Identity for ObjectRef {
    type Key = usize;

    fn identity_key(&self) -> usize {
        self.identity()
    }
}

impl Identity for Class {
    type Key = Class;

    fn identity_key(&self) -> Class {
        self.clone()
    }
}

impl<T> Identity for Arc<T> {
    type Key = usize;

    fn identity_key(&self) -> usize {
        Arc::as_ptr(self) as *const () as usize
    }
}

/// Why a handle lookup failed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheMiss {
    /// No such handle was ever assigned
    NotFound,
    /// Assigned, but the value is still being constructed
    Pending,
    /// Assigned to an unshared value, which may not be referenced again
    Unshared,
}

enum Slot<T> {
    Filled(T),
    Pending,
    Unshared,
}

/// Handle table for one kind of value
pub struct ReferenceCache<T> {
    typed_keys: Option<Box<dyn KeyIndex<T>>>,
    slots: Vec<Slot<T>>,
}

/// Key index kept separately so readers need no [`Identity`] bound
trait KeyIndex<T>: Send {
    fn get(&self, value: &T) -> Option<Handle>;
    fn insert(&mut self, value: &T, handle: Handle);
    fn clear(&mut self);
}

struct TypedKeys<T: Identity> {
    map: FxHashMap<T::Key, Handle>,
}

impl<T> KeyIndex<T> for TypedKeys<T>
where
    T: Identity,
    T::Key: Send,
{
    fn get(&self, value: &T) -> Option<Handle> {
        self.map.get(&value.identity_key()).copied()
    }

    fn insert(&mut self, value: &T, handle: Handle) {
        self.map.insert(value.identity_key(), handle);
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}

impl<T> ReferenceCache<T> {
    /// Empty cache sized for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            typed_keys: None,
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Handle the next new entry will receive
    pub fn next_handle(&self) -> Handle {
        self.slots.len() as Handle
    }

    /// Number of assigned handles
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no handle has been assigned
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append a value without indexing its identity
    pub fn push(&mut self, value: T) -> Handle {
        let handle = self.next_handle();
        self.slots.push(Slot::Filled(value));
        handle
    }

    /// Assign a handle whose value is not known yet
    pub fn reserve(&mut self) -> Handle {
        let handle = self.next_handle();
        self.slots.push(Slot::Pending);
        handle
    }

    /// Assign a handle that can never be looked up
    pub fn reserve_unshared(&mut self) -> Handle {
        let handle = self.next_handle();
        self.slots.push(Slot::Unshared);
        handle
    }

    /// Provide the value of a reserved handle
    pub fn fill(&mut self, handle: Handle, value: T) {
        if let Some(slot) = self.slots.get_mut(handle as usize) {
            if matches!(slot, Slot::Pending) {
                *slot = Slot::Filled(value);
            }
        }
    }

    /// Swap the value behind a handle, e.g. after read-time resolution
    pub fn replace(&mut self, handle: Handle, value: T) {
        if let Some(slot) = self.slots.get_mut(handle as usize) {
            if !matches!(slot, Slot::Unshared) {
                *slot = Slot::Filled(value);
            }
        }
    }

    /// Value behind a handle
    pub fn lookup(&self, handle: Handle) -> Result<&T, CacheMiss> {
        match self.slots.get(handle as usize) {
            Some(Slot::Filled(value)) => Ok(value),
            Some(Slot::Pending) => Err(CacheMiss::Pending),
            Some(Slot::Unshared) => Err(CacheMiss::Unshared),
            None => Err(CacheMiss::NotFound),
        }
    }

    /// Forget everything and restart numbering at zero
    pub fn clear(&mut self) {
        if let Some(index) = self.typed_keys.as_mut() {
            index.clear();
        }
        self.slots.clear();
    }
}

impl<T> ReferenceCache<T>
where
    T: Identity + Clone + 'static,
    T::Key: Send,
{
    /// Handle of `value`, assigning a new one on first sight
    ///
    /// Returns `(handle, true)` when the handle is new.
    pub fn internalize(&mut self, value: &T) -> (Handle, bool) {
        if let Some(handle) = self.find(value) {
            return (handle, false);
        }
        let handle = self.push(value.clone());
        self.index().insert(value, handle);
        (handle, true)
    }

    /// Existing handle of `value`
    pub fn find(&self, value: &T) -> Option<Handle> {
        self.typed_keys.as_ref().and_then(|index| index.get(value))
    }

    fn index(&mut self) -> &mut Box<dyn KeyIndex<T>> {
        self.typed_keys.get_or_insert_with(|| {
            Box::new(TypedKeys::<T> {
                map: FxHashMap::default(),
            })
        })
    }
}

impl<T> Default for ReferenceCache<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T> std::fmt::Debug for ReferenceCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("handles", &self.slots.len())
            .finish()
    }
}

/// Class and instance caches of one session
#[derive(Debug)]
pub struct SessionCaches<C, I> {
    /// Class descriptor handles
    pub classes: ReferenceCache<C>,
    /// Object handles
    pub instances: ReferenceCache<I>,
}

impl<C, I> SessionCaches<C, I> {
    /// Caches sized by the configured hints
    pub fn new(class_count: usize, instance_count: usize) -> Self {
        Self {
            classes: ReferenceCache::with_capacity(class_count),
            instances: ReferenceCache::with_capacity(instance_count),
        }
    }

    /// Reset the instance cache only
    pub fn clear_instances(&mut self) {
        self.instances.clear();
    }

    /// Reset both caches; instances refer to class descriptors
    pub fn clear_all(&mut self) {
        self.classes.clear();
        self.clear_instances();
    }
}
