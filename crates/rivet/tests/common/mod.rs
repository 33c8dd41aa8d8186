//! Shared fixtures for the integration tests
#![allow(dead_code)]

use rivet::{
    Class, ClassBuilder, ClassInfoRegistry, ClassLoader, FieldDef, LoaderClassResolver,
    MarshalResult, MarshallerFactory, MarshallingConfiguration, ObjectInput, ObjectOutput,
    ObjectRef, PrimitiveKind, Value,
};
use rivet_io::{ByteArrayInput, SharedByteOutput};
use std::sync::Arc;

pub fn factory() -> MarshallerFactory {
    MarshallerFactory::new(Arc::new(ClassInfoRegistry::new()))
}

/// Configuration resolving classes through `loader`
pub fn config(loader: &ClassLoader) -> MarshallingConfiguration {
    MarshallingConfiguration::new().with_class_resolver(Arc::new(LoaderClassResolver::new(loader.clone())))
}

/// `graph.Node { value: int, next: Object }`
pub fn node_class(loader: &ClassLoader) -> Class {
    loader
        .define(
            ClassBuilder::serializable("graph.Node")
                .field(FieldDef::primitive("value", PrimitiveKind::Int))
                .field(FieldDef::object("next")),
        )
        .unwrap()
}

/// `graph.Pair { left: Object, right: Object }`
pub fn pair_class(loader: &ClassLoader) -> Class {
    loader
        .define(
            ClassBuilder::serializable("graph.Pair")
                .field(FieldDef::object("left"))
                .field(FieldDef::object("right")),
        )
        .unwrap()
}

pub fn node(class: &Class, value: i32, next: Value) -> ObjectRef {
    let object = ObjectRef::new_instance(class).unwrap();
    object.set_field("value", value).unwrap();
    object.set_field("next", next).unwrap();
    object
}

/// Write `values` as consecutive top-level objects
pub fn write_all(
    factory: &MarshallerFactory,
    config: &MarshallingConfiguration,
    values: &[Value],
) -> MarshalResult<Vec<u8>> {
    let sink = SharedByteOutput::new();
    let mut marshaller = factory.create_marshaller(config)?;
    marshaller.start(Box::new(sink.clone()))?;
    for value in values {
        marshaller.write_object(value)?;
    }
    marshaller.finish()?;
    Ok(sink.take())
}

/// Read `count` consecutive top-level objects
pub fn read_all(
    factory: &MarshallerFactory,
    config: &MarshallingConfiguration,
    bytes: &[u8],
    count: usize,
) -> MarshalResult<Vec<Value>> {
    let mut unmarshaller = factory.create_unmarshaller(config)?;
    unmarshaller.start(Box::new(ByteArrayInput::new(bytes.to_vec())))?;
    let values = (0..count)
        .map(|_| unmarshaller.read_object())
        .collect::<MarshalResult<Vec<_>>>()?;
    unmarshaller.finish()?;
    Ok(values)
}

pub fn round_trip(
    factory: &MarshallerFactory,
    config: &MarshallingConfiguration,
    value: &Value,
) -> MarshalResult<Value> {
    let bytes = factory.marshal_to_vec(config, value)?;
    factory.unmarshal_from_slice(config, &bytes)
}

pub fn object(value: &Value) -> ObjectRef {
    value.as_object().cloned().expect("object value")
}

pub fn field(object: &ObjectRef, name: &str) -> Value {
    object.get_field(name).expect("field present")
}

