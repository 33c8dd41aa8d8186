//! Substitution tables and resolvers
//!
//! Tables let a small set of well-known classes or objects travel as a
//! short tag. Resolvers rename classes and substitute objects around the
//! generic path.

pub mod chaining;
pub mod class_table;
pub mod object_resolver;
pub mod object_table;
pub mod resolver;

pub use chaining::{ChainingClassTable, ChainingObjectTable};
pub use class_table::{ClassTable, ClassWriter, StaticClassTable};
pub use object_resolver::{ChainingObjectResolver, IdentityResolver, ObjectResolver};
pub use object_table::{ObjectTable, ObjectWriter, StaticObjectTable};
pub use resolver::{
    ClassNameTransformer, ClassResolver, LoaderClassResolver, NameTransformingResolver,
    PackageRemapper,
};
