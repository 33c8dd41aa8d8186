//! Session-wide object substitution

use crate::error::MarshalResult;
use crate::model::{ObjectRef, Value};
use std::fmt;
use std::sync::Arc;

/// Replaces objects on the way out and resolves them on the way in
pub trait ObjectResolver: Send + Sync {
    /// Value to write in place of `original`
    fn write_replace(&self, original: &ObjectRef) -> MarshalResult<Value> {
        Ok(Value::Object(original.clone()))
    }

    /// Value to hand out in place of a freshly read one
    fn read_resolve(&self, replacement: Value) -> MarshalResult<Value> {
        Ok(replacement)
    }
}

/// Resolver that never substitutes anything
#[derive(Debug, Copy, Clone, Default)]
pub struct IdentityResolver;

impl ObjectResolver for IdentityResolver {}

/// Resolvers composed in order on write and in reverse on read
#[derive(Clone, Default)]
pub struct ChainingObjectResolver {
    resolvers: Vec<Arc<dyn ObjectResolver>>,
}

impl ChainingObjectResolver {
    /// Chain over `resolvers`
    pub fn new(resolvers: Vec<Arc<dyn ObjectResolver>>) -> Self {
        Self { resolvers }
    }
}

impl ObjectResolver for ChainingObjectResolver {
    fn write_replace(&self, original: &ObjectRef) -> MarshalResult<Value> {
        let mut current = Value::Object(original.clone());
        for resolver in &self.resolvers {
            current = match &current {
                Value::Object(object) => resolver.write_replace(object)?,
                _ => break,
            };
        }
        Ok(current)
    }

    fn read_resolve(&self, replacement: Value) -> MarshalResult<Value> {
        self.resolvers
            .iter()
            .rev()
            .try_fold(replacement, |value, resolver| resolver.read_resolve(value))
    }
}

impl fmt::Debug for ChainingObjectResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainingObjectResolver")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ObjectResolver for Recording {
        fn write_replace(&self, original: &ObjectRef) -> MarshalResult<Value> {
            self.log.lock().push(format!("w:{}", self.tag));
            let text = original.as_string().unwrap_or_default();
            Ok(Value::string(format!("{text}{}", self.tag)))
        }

        fn read_resolve(&self, replacement: Value) -> MarshalResult<Value> {
            self.log.lock().push(format!("r:{}", self.tag));
            Ok(replacement)
        }
    }

    #[test]
    fn test_write_in_order_read_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ChainingObjectResolver::new(vec![
            Arc::new(Recording { tag: "a", log: log.clone() }),
            Arc::new(Recording { tag: "b", log: log.clone() }),
        ]);
        let out = chain.write_replace(&ObjectRef::string("x")).unwrap();
        assert_eq!(out.as_str_value().as_deref(), Some("xab"));
        chain.read_resolve(Value::Null).unwrap();
        assert_eq!(*log.lock(), vec!["w:a", "w:b", "r:b", "r:a"]);
    }

    #[test]
    fn test_identity_resolver_passes_through() {
        let object = ObjectRef::string("same");
        let out = IdentityResolver.write_replace(&object).unwrap();
        assert_eq!(out, Value::Object(object));
    }
}
