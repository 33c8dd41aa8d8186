//! Object tables: short tags for well-known instances

use crate::error::{MarshalError, MarshalResult};
use crate::marshal::{ObjectInput, ObjectOutput};
use crate::model::{ObjectRef, Value};
use std::fmt;
use std::sync::Arc;

/// Writes the payload that identifies one object to its table
pub trait ObjectWriter: Send + Sync {
    /// Emit the payload; must be exactly what [`ObjectTable::read_object`] consumes
    fn write_object(&self, output: &mut dyn ObjectOutput, object: &ObjectRef) -> MarshalResult<()>;
}

/// A registry of objects encoded as a short tag
pub trait ObjectTable: Send + Sync {
    /// Writer for `object`, or `None` for the generic path
    fn writer_for(&self, object: &ObjectRef) -> Option<Arc<dyn ObjectWriter>>;

    /// Read one payload back into a value
    fn read_object(&self, input: &mut dyn ObjectInput) -> MarshalResult<Value>;
}

struct PositionWriter(u8);

impl ObjectWriter for PositionWriter {
    fn write_object(&self, output: &mut dyn ObjectOutput, _object: &ObjectRef) -> MarshalResult<()> {
        output.write_u8(self.0)
    }
}

/// Table over a fixed list of instances, matched by identity
#[derive(Clone)]
pub struct StaticObjectTable {
    objects: Vec<ObjectRef>,
    writers: Vec<Arc<dyn ObjectWriter>>,
}

impl StaticObjectTable {
    /// Table over `objects`; at most 256 are addressable
    pub fn new(objects: Vec<ObjectRef>) -> MarshalResult<Self> {
        if objects.len() > 256 {
            return Err(MarshalError::TableOverflow {
                count: objects.len(),
            });
        }
        let writers = (0..objects.len())
            .map(|i| Arc::new(PositionWriter(i as u8)) as Arc<dyn ObjectWriter>)
            .collect();
        Ok(Self { objects, writers })
    }

    /// Registered objects in tag order
    pub fn objects(&self) -> &[ObjectRef] {
        &self.objects
    }
}

impl ObjectTable for StaticObjectTable {
    fn writer_for(&self, object: &ObjectRef) -> Option<Arc<dyn ObjectWriter>> {
        let index = self.objects.iter().position(|o| o.ptr_eq(object))?;
        self.writers.get(index).cloned()
    }

    fn read_object(&self, input: &mut dyn ObjectInput) -> MarshalResult<Value> {
        let index = input.read_u8()?;
        self.objects
            .get(index as usize)
            .cloned()
            .map(Value::Object)
            .ok_or_else(|| MarshalError::corrupt(format!("object table has no entry {index}")))
    }
}

impl fmt::Debug for StaticObjectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticObjectTable")
            .field("objects", &self.objects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::testing::{ScriptInput, ScriptOutput};

    #[test]
    fn test_matches_identity_only() {
        let known = ObjectRef::string("singleton");
        let table = StaticObjectTable::new(vec![ObjectRef::string("other"), known.clone()]).unwrap();
        assert!(table.writer_for(&ObjectRef::string("singleton")).is_none());

        let writer = table.writer_for(&known).unwrap();
        let mut out = ScriptOutput::default();
        writer.write_object(&mut out, &known).unwrap();
        assert_eq!(out.bytes, vec![1]);

        let mut input = ScriptInput::new(out.bytes);
        let read = table.read_object(&mut input).unwrap();
        assert_eq!(read, Value::Object(known));
    }
}
