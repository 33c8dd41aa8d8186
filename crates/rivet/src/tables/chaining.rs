//! Chaining combinators over up to 256 delegate tables
//!
//! Every chained payload starts with the index byte of the delegate that
//! produced it. Writers search delegates in ascending index order; readers
//! dispatch straight on the index byte.

use crate::error::{MarshalError, MarshalResult};
use crate::marshal::{ObjectInput, ObjectOutput};
use crate::model::{Class, ObjectRef, Value};
use crate::tables::class_table::{ClassTable, ClassWriter};
use crate::tables::object_table::{ObjectTable, ObjectWriter};
use std::fmt;
use std::sync::Arc;

const MAX_DELEGATES: usize = 256;

fn check_count(count: usize) -> MarshalResult<()> {
    if count > MAX_DELEGATES {
        return Err(MarshalError::TableOverflow { count });
    }
    Ok(())
}

struct IndexedClassWriter {
    index: u8,
    inner: Arc<dyn ClassWriter>,
}

impl ClassWriter for IndexedClassWriter {
    fn write_class(&self, output: &mut dyn ObjectOutput, class: &Class) -> MarshalResult<()> {
        output.write_u8(self.index)?;
        self.inner.write_class(output, class)
    }
}

/// Class table dispatching to sparse delegates behind one index byte
#[derive(Clone)]
pub struct ChainingClassTable {
    delegates: Vec<Option<Arc<dyn ClassTable>>>,
}

impl ChainingClassTable {
    /// Chain over `delegates`; absent entries are allowed
    pub fn new(delegates: Vec<Option<Arc<dyn ClassTable>>>) -> MarshalResult<Self> {
        check_count(delegates.len())?;
        Ok(Self { delegates })
    }

    /// Chain over a dense list of delegates
    pub fn from_tables(tables: Vec<Arc<dyn ClassTable>>) -> MarshalResult<Self> {
        Self::new(tables.into_iter().map(Some).collect())
    }

    /// Number of delegate positions, absent ones included
    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    /// Whether the chain has no positions
    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }
}

impl ClassTable for ChainingClassTable {
    fn writer_for(&self, class: &Class) -> Option<Arc<dyn ClassWriter>> {
        self.delegates.iter().enumerate().find_map(|(index, delegate)| {
            let writer = delegate.as_ref()?.writer_for(class)?;
            Some(Arc::new(IndexedClassWriter {
                index: index as u8,
                inner: writer,
            }) as Arc<dyn ClassWriter>)
        })
    }

    fn read_class(&self, input: &mut dyn ObjectInput) -> MarshalResult<Class> {
        let index = input.read_u8()?;
        match self.delegates.get(index as usize) {
            Some(Some(delegate)) => delegate.read_class(input),
            _ => Err(MarshalError::corrupt(format!(
                "no class table delegate at index {index}"
            ))),
        }
    }
}

impl fmt::Debug for ChainingClassTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = self.delegates.iter().filter(|d| d.is_some()).count();
        f.debug_struct("ChainingClassTable")
            .field("positions", &self.delegates.len())
            .field("present", &present)
            .finish()
    }
}

struct IndexedObjectWriter {
    index: u8,
    inner: Arc<dyn ObjectWriter>,
}

impl ObjectWriter for IndexedObjectWriter {
    fn write_object(&self, output: &mut dyn ObjectOutput, object: &ObjectRef) -> MarshalResult<()> {
        output.write_u8(self.index)?;
        self.inner.write_object(output, object)
    }
}

/// Object table dispatching to sparse delegates behind one index byte
#[derive(Clone)]
pub struct ChainingObjectTable {
    delegates: Vec<Option<Arc<dyn ObjectTable>>>,
}

impl ChainingObjectTable {
    /// Chain over `delegates`; absent entries are allowed
    pub fn new(delegates: Vec<Option<Arc<dyn ObjectTable>>>) -> MarshalResult<Self> {
        check_count(delegates.len())?;
        Ok(Self { delegates })
    }

    /// Chain over a dense list of delegates
    pub fn from_tables(tables: Vec<Arc<dyn ObjectTable>>) -> MarshalResult<Self> {
        Self::new(tables.into_iter().map(Some).collect())
    }

    /// Number of delegate positions, absent ones included
    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    /// Whether the chain has no positions
    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }
}

impl ObjectTable for ChainingObjectTable {
    fn writer_for(&self, object: &ObjectRef) -> Option<Arc<dyn ObjectWriter>> {
        self.delegates.iter().enumerate().find_map(|(index, delegate)| {
            let writer = delegate.as_ref()?.writer_for(object)?;
            Some(Arc::new(IndexedObjectWriter {
                index: index as u8,
                inner: writer,
            }) as Arc<dyn ObjectWriter>)
        })
    }

    fn read_object(&self, input: &mut dyn ObjectInput) -> MarshalResult<Value> {
        let index = input.read_u8()?;
        match self.delegates.get(index as usize) {
            Some(Some(delegate)) => delegate.read_object(input),
            _ => Err(MarshalError::corrupt(format!(
                "no object table delegate at index {index}"
            ))),
        }
    }
}

impl fmt::Debug for ChainingObjectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = self.delegates.iter().filter(|d| d.is_some()).count();
        f.debug_struct("ChainingObjectTable")
            .field("positions", &self.delegates.len())
            .field("present", &present)
            .finish()
    }
}
