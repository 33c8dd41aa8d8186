//! Marshalling sessions and the stream views handed to user code

pub(crate) mod block;
pub mod marshaller;
pub mod traits;
pub mod unmarshaller;

pub use marshaller::Marshaller;
pub use traits::{cast, ObjectInput, ObjectOutput};
pub use unmarshaller::Unmarshaller;

use crate::error::MarshalResult;
use crate::metadata::{ClassInfoRegistry, SerializableClassInfo};
use crate::model::{Class, ClassKind};
use std::sync::Arc;

/// One serializable level of an instance
#[derive(Clone)]
pub(crate) struct Level {
    pub(crate) info: Arc<SerializableClassInfo>,
    /// Position in the class hierarchy, root first
    pub(crate) index: usize,
}

/// The contiguous run of serializable classes ending at `class`, root first
///
/// Serialization stops at the first non-serializable ancestor; everything
/// above it is rebuilt by that ancestor's constructor.
pub(crate) fn serializable_levels(
    registry: &ClassInfoRegistry,
    class: &Class,
) -> MarshalResult<Vec<Level>> {
    let hierarchy = class.hierarchy();
    let mut levels = Vec::new();
    for (index, def) in hierarchy.iter().enumerate().rev() {
        if def.kind() != ClassKind::Serializable {
            break;
        }
        let info = registry.lookup(&Class::Defined(def.clone()))?;
        levels.push(Level { info, index });
    }
    levels.reverse();
    Ok(levels)
}
