//! Class tables: short tags for well-known classes

use crate::error::{MarshalError, MarshalResult};
use crate::marshal::{ObjectInput, ObjectOutput};
use crate::model::Class;
use std::fmt;
use std::sync::Arc;

/// Writes the payload that identifies one class to its table
pub trait ClassWriter: Send + Sync {
    /// Emit the payload; must be exactly what [`ClassTable::read_class`] consumes
    fn write_class(&self, output: &mut dyn ObjectOutput, class: &Class) -> MarshalResult<()>;
}

/// A registry of classes encoded without a full descriptor
pub trait ClassTable: Send + Sync {
    /// Writer for `class`, or `None` to fall back to a descriptor
    fn writer_for(&self, class: &Class) -> Option<Arc<dyn ClassWriter>>;

    /// Read one payload back into a class
    fn read_class(&self, input: &mut dyn ObjectInput) -> MarshalResult<Class>;
}

struct PositionWriter(u8);

impl ClassWriter for PositionWriter {
    fn write_class(&self, output: &mut dyn ObjectOutput, _class: &Class) -> MarshalResult<()> {
        output.write_u8(self.0)
    }
}

/// Table over a fixed list of classes, tagged by list position
#[derive(Clone)]
pub struct StaticClassTable {
    classes: Vec<Class>,
    writers: Vec<Arc<dyn ClassWriter>>,
}

impl StaticClassTable {
    /// Table over `classes`; at most 256 are addressable
    pub fn new(classes: Vec<Class>) -> MarshalResult<Self> {
        if classes.len() > 256 {
            return Err(MarshalError::TableOverflow {
                count: classes.len(),
            });
        }
        let writers = (0..classes.len())
            .map(|i| Arc::new(PositionWriter(i as u8)) as Arc<dyn ClassWriter>)
            .collect();
        Ok(Self { classes, writers })
    }

    /// Registered classes in tag order
    pub fn classes(&self) -> &[Class] {
        &self.classes
    }
}

impl ClassTable for StaticClassTable {
    fn writer_for(&self, class: &Class) -> Option<Arc<dyn ClassWriter>> {
        let index = self.classes.iter().position(|c| c == class)?;
        self.writers.get(index).cloned()
    }

    fn read_class(&self, input: &mut dyn ObjectInput) -> MarshalResult<Class> {
        let index = input.read_u8()?;
        self.classes
            .get(index as usize)
            .cloned()
            .ok_or_else(|| MarshalError::corrupt(format!("class table has no entry {index}")))
    }
}

impl fmt::Debug for StaticClassTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticClassTable")
            .field("classes", &self.classes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrimitiveKind;
    use crate::tables::testing::{ScriptInput, ScriptOutput};

    #[test]
    fn test_static_table_tags_by_position() {
        let table = StaticClassTable::new(vec![
            Class::String,
            Class::Primitive(PrimitiveKind::Long),
        ])
        .unwrap();
        let long = Class::Primitive(PrimitiveKind::Long);
        let writer = table.writer_for(&long).unwrap();
        let mut out = ScriptOutput::default();
        writer.write_class(&mut out, &long).unwrap();
        assert_eq!(out.bytes, vec![1]);

        let mut input = ScriptInput::new(out.bytes);
        assert_eq!(table.read_class(&mut input).unwrap(), long);
        assert!(table.writer_for(&Class::Primitive(PrimitiveKind::Int)).is_none());
    }

    #[test]
    fn test_static_table_limits() {
        let classes = vec![Class::String; 257];
        assert!(matches!(
            StaticClassTable::new(classes),
            Err(MarshalError::TableOverflow { count: 257 })
        ));

        let table = StaticClassTable::new(vec![Class::String]).unwrap();
        let mut input = ScriptInput::new(vec![4]);
        assert!(matches!(
            table.read_class(&mut input),
            Err(MarshalError::StreamCorruption(_))
        ));
    }
}
