//! Rivet object-graph marshalling
//!
//! Rivet turns a graph of host objects into a compact byte stream and back,
//! preserving object identity, shared references and cycles.
//!
//! - **Model**: classes, loaders, objects and values (`model` module)
//! - **Metadata**: per-class serialization facts, computed once (`metadata` module)
//! - **Sessions**: the marshaller and unmarshaller (`marshal` module)
//! - **Seams**: class/object tables, resolvers, externalizers and filters
//!
//! # Example
//!
//! ```rust,ignore
//! use rivet::{ClassBuilder, ClassLoader, ClassInfoRegistry, FieldDef, LoaderClassResolver,
//!             MarshallerFactory, MarshallingConfiguration, ObjectRef, PrimitiveKind, Value};
//! use std::sync::Arc;
//!
//! let loader = ClassLoader::new("app");
//! let point = loader.define(
//!     ClassBuilder::serializable("geo.Point")
//!         .field(FieldDef::primitive("x", PrimitiveKind::Int))
//!         .field(FieldDef::primitive("y", PrimitiveKind::Int)),
//! )?;
//! let p = ObjectRef::new_instance(&point)?;
//! p.set_field("x", 3)?;
//!
//! let factory = MarshallerFactory::new(Arc::new(ClassInfoRegistry::new()));
//! let config = MarshallingConfiguration::new()
//!     .with_class_resolver(Arc::new(LoaderClassResolver::new(loader)));
//! let bytes = factory.marshal_to_vec(&config, &Value::Object(p))?;
//! let copy = factory.unmarshal_from_slice(&config, &bytes)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod checker;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod externalizer;
pub mod factory;
pub mod marshal;
pub mod metadata;
pub mod model;
pub mod pair;
pub mod protocol;
pub mod tables;

// ============================================================================
// Re-exports
// ============================================================================

pub use checker::{default_checker, DefaultSerializabilityChecker, SerializabilityChecker};
pub use config::{ConfigDefaults, FilterSetting, MarshallingConfiguration};
pub use diagnostics::{ErrorContext, ExceptionListener, LoggingExceptionListener};
pub use error::{MarshalError, MarshalResult};
pub use externalizer::{ClassExternalizerFactory, Externalizer, ExternalizerList};
pub use factory::MarshallerFactory;
pub use marshal::{cast, Marshaller, ObjectInput, ObjectOutput, Unmarshaller};
pub use metadata::{ClassInfoRegistry, Instantiation, SerialField, SerializableClassInfo};
pub use model::{
    ArrayData, Class, ClassBuilder, ClassKind, ClassLoader, FieldDef, FieldDescriptor, FieldType,
    FromValue, ObjectRef, PrimitiveKind, Value, Visibility,
};
pub use pair::Pair;
pub use tables::{
    ChainingClassTable, ChainingObjectResolver, ChainingObjectTable, ClassNameTransformer,
    ClassResolver, ClassTable, ClassWriter, IdentityResolver, LoaderClassResolver,
    NameTransformingResolver, ObjectResolver, ObjectTable, ObjectWriter, PackageRemapper,
    StaticClassTable, StaticObjectTable,
};

pub use rivet_filter::{SimpleFilter, UndecidedPolicy, UnmarshallingFilter};
pub use rivet_io::{StaticStreamHeader, StreamHeader};
