//! Reflective class metadata and its shared cache

pub mod info;
pub mod registry;

pub use info::{Instantiation, SerialField, SerializableClassInfo};
pub use registry::ClassInfoRegistry;
