//! End-to-end graphs: identity, sharing, cycles and the wire layout

mod common;

use common::*;
use rivet::protocol::{
    ID_ARRAY_SMALL, ID_CLEAR_INSTANCE_CACHE, ID_REPEAT_OBJECT_NEAR, ID_STRING_CLASS,
    ID_STRING_SMALL, ID_UNSHARED,
};
use rivet::{
    ArrayData, Class, ClassBuilder, ClassLoader, FieldDef, MarshalError, ObjectInput,
    ObjectOutput, ObjectRef, PrimitiveKind, StaticStreamHeader, Value,
};
use rivet_io::{ByteArrayInput, LimitedByteInput, LimitedByteOutput, SharedByteOutput};
use std::sync::Arc;

#[test]
fn test_shared_child_keeps_identity() {
    let loader = ClassLoader::new("app");
    let pair = pair_class(&loader);
    let node = node_class(&loader);
    let child = common::node(&node, 7, Value::Null);
    let root = ObjectRef::new_instance(&pair).unwrap();
    root.set_field("left", child.clone()).unwrap();
    root.set_field("right", child).unwrap();

    let factory = factory();
    let copy = round_trip(&factory, &config(&loader), &Value::Object(root.clone())).unwrap();
    assert!(copy.graph_eq(&Value::Object(root)));

    let copy = object(&copy);
    let left = object(&field(&copy, "left"));
    let right = object(&field(&copy, "right"));
    assert!(left.ptr_eq(&right));
    assert_eq!(field(&left, "value"), Value::Int(7));
}

#[test]
fn test_cycle_closes_on_the_new_objects() {
    let loader = ClassLoader::new("app");
    let node = node_class(&loader);
    let a = common::node(&node, 1, Value::Null);
    let b = common::node(&node, 2, Value::Object(a.clone()));
    a.set_field("next", b.clone()).unwrap();

    let factory = factory();
    let copy = object(&round_trip(&factory, &config(&loader), &Value::Object(a.clone())).unwrap());
    assert!(!copy.ptr_eq(&a));
    let second = object(&field(&copy, "next"));
    let back = object(&field(&second, "next"));
    assert!(back.ptr_eq(&copy));
    assert_eq!(field(&second, "value"), Value::Int(2));
}

#[test]
fn test_self_reference() {
    let loader = ClassLoader::new("app");
    let node = node_class(&loader);
    let a = common::node(&node, 9, Value::Null);
    a.set_field("next", a.clone()).unwrap();

    let copy = object(&round_trip(&factory(), &config(&loader), &Value::Object(a)).unwrap());
    assert!(object(&field(&copy, "next")).ptr_eq(&copy));
}

#[test]
fn test_repeated_string_is_a_near_back_reference() {
    let text = ObjectRef::string("hi");
    let array = ObjectRef::object_array(
        Class::String,
        vec![Value::Object(text.clone()), Value::Object(text)],
    )
    .unwrap();

    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    let bytes = factory.marshal_to_vec(&config, &Value::Object(array)).unwrap();
    assert_eq!(
        bytes,
        vec![
            1,
            ID_ARRAY_SMALL,
            2,
            ID_STRING_CLASS,
            ID_STRING_SMALL,
            2,
            b'h',
            b'i',
            ID_REPEAT_OBJECT_NEAR,
            1,
        ]
    );

    let copy = object(&factory.unmarshal_from_slice(&config, &bytes).unwrap());
    let first = object(&copy.array_get(0).unwrap());
    let second = object(&copy.array_get(1).unwrap());
    assert!(first.ptr_eq(&second));
    assert_eq!(first.as_string().as_deref(), Some("hi"));
}

#[test]
fn test_distant_back_reference_widens() {
    let shared = ObjectRef::string("shared");
    let mut values = vec![Value::Object(shared.clone())];
    values.extend((0..300).map(|i| Value::string(format!("s{i}"))));
    values.push(Value::Object(shared));
    let array = ObjectRef::object_array(Class::String, values).unwrap();

    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    let copy = object(&round_trip(&factory, &config, &Value::Object(array)).unwrap());
    let first = object(&copy.array_get(0).unwrap());
    let last = object(&copy.array_get(301).unwrap());
    assert!(first.ptr_eq(&last));
    assert_eq!(copy.array_get(150).unwrap().as_str_value().as_deref(), Some("s149"));
}

#[test]
fn test_unshared_field_gets_its_own_copy() {
    let loader = ClassLoader::new("app");
    let node = node_class(&loader);
    let holder = loader
        .define(
            ClassBuilder::serializable("graph.Holder")
                .field(FieldDef::object("a"))
                .field(FieldDef::object("b").unshared()),
        )
        .unwrap();
    let target = common::node(&node, 3, Value::Null);
    let root = ObjectRef::new_instance(&holder).unwrap();
    root.set_field("a", target.clone()).unwrap();
    root.set_field("b", target).unwrap();

    let copy = object(&round_trip(&factory(), &config(&loader), &Value::Object(root)).unwrap());
    let a = object(&field(&copy, "a"));
    let b = object(&field(&copy, "b"));
    assert!(!a.ptr_eq(&b));
    assert_eq!(field(&a, "value"), field(&b, "value"));
}

#[test]
fn test_top_level_unshared_is_never_reused() {
    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    let text = Value::string("once");
    let sink = SharedByteOutput::new();
    let mut marshaller = factory.create_marshaller(&config).unwrap();
    marshaller.start(Box::new(sink.clone())).unwrap();
    marshaller.write_object_unshared(&text).unwrap();
    marshaller.write_object(&text).unwrap();
    marshaller.finish().unwrap();
    let bytes = sink.take();
    assert_eq!(bytes[1], ID_UNSHARED);

    let mut unmarshaller = factory.create_unmarshaller(&config).unwrap();
    unmarshaller.start(Box::new(ByteArrayInput::new(bytes))).unwrap();
    let first = unmarshaller.read_object_unshared().unwrap();
    let second = unmarshaller.read_object().unwrap();
    assert_eq!(first.as_str_value(), second.as_str_value());
    assert!(!object(&first).ptr_eq(&object(&second)));
}

#[test]
fn test_back_reference_to_unshared_object_is_corrupt() {
    let bytes = vec![1, ID_UNSHARED, ID_STRING_SMALL, 1, b'x', ID_REPEAT_OBJECT_NEAR, 1];
    let factory = factory();
    let mut unmarshaller = factory
        .create_unmarshaller(&rivet::MarshallingConfiguration::new())
        .unwrap();
    unmarshaller.start(Box::new(ByteArrayInput::new(bytes))).unwrap();
    assert_eq!(unmarshaller.read_object().unwrap().as_str_value().as_deref(), Some("x"));
    assert!(matches!(
        unmarshaller.read_object(),
        Err(MarshalError::StreamCorruption(_))
    ));
}

#[test]
fn test_primitive_and_nested_arrays() {
    let ints = ObjectRef::array(
        Class::Primitive(PrimitiveKind::Int),
        ArrayData::Int(vec![1, -2, i32::MAX]),
    )
    .unwrap();
    let doubles = ObjectRef::array(
        Class::Primitive(PrimitiveKind::Double),
        ArrayData::Double(vec![0.5, f64::NAN]),
    )
    .unwrap();
    let flags = ObjectRef::array(
        Class::Primitive(PrimitiveKind::Boolean),
        ArrayData::Boolean(vec![true, false, true]),
    )
    .unwrap();
    let int_array = Class::array_of(Class::Primitive(PrimitiveKind::Int));
    let grid = ObjectRef::object_array(
        int_array.clone(),
        vec![Value::Object(ints.clone()), Value::Null, Value::Object(ints)],
    )
    .unwrap();

    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    for value in [grid, doubles, flags].map(Value::Object) {
        let copy = round_trip(&factory, &config, &value).unwrap();
        assert!(copy.graph_eq(&value), "{}", value.type_name());
    }

    let sparse = Value::Object(ObjectRef::object_array(int_array, vec![Value::Null]).unwrap());
    let grid_copy = object(&round_trip(&factory, &config, &sparse).unwrap());
    assert_eq!(grid_copy.class().name(), "int[][]");
    assert_eq!(grid_copy.array_get(0), Some(Value::Null));
}

#[test]
fn test_enum_constants_resolve_to_the_local_singletons() {
    let loader = ClassLoader::new("app");
    let color = loader
        .define(ClassBuilder::enumeration("paint.Color", ["RED", "GREEN", "BLUE"]))
        .unwrap();
    let def = color.as_defined().unwrap().clone();
    let green = def.enum_constant("GREEN").unwrap();

    let copy = round_trip(&factory(), &config(&loader), &Value::Object(green.clone())).unwrap();
    assert!(object(&copy).ptr_eq(&green));
    assert_eq!(object(&copy).enum_ordinal(), Some(1));
}

#[test]
fn test_unknown_enum_constant_is_invalid() {
    let writer_loader = ClassLoader::new("writer");
    let color = writer_loader
        .define(ClassBuilder::enumeration("paint.Color", ["RED", "MAUVE"]))
        .unwrap();
    let mauve = color.as_defined().unwrap().enum_constant("MAUVE").unwrap();
    let reader_loader = ClassLoader::new("reader");
    reader_loader
        .define(ClassBuilder::enumeration("paint.Color", ["RED"]))
        .unwrap();

    let factory = factory();
    let bytes = factory
        .marshal_to_vec(&config(&writer_loader), &Value::Object(mauve))
        .unwrap();
    let err = factory
        .unmarshal_from_slice(&config(&reader_loader), &bytes)
        .unwrap_err();
    assert!(matches!(err, MarshalError::InvalidClass { .. }), "{err}");
}

#[test]
fn test_primitives_interleave_with_objects() {
    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    let sink = SharedByteOutput::new();
    let mut marshaller = factory.create_marshaller(&config).unwrap();
    marshaller.start(Box::new(sink.clone())).unwrap();
    marshaller.write_i32(5).unwrap();
    marshaller.write_object(&Value::string("between")).unwrap();
    marshaller.write_utf("tail").unwrap();
    marshaller.write_object(&Value::Long(-1)).unwrap();
    marshaller.write_object(&Value::Null).unwrap();
    marshaller.finish().unwrap();

    let mut unmarshaller = factory.create_unmarshaller(&config).unwrap();
    unmarshaller.start(Box::new(ByteArrayInput::new(sink.take()))).unwrap();
    assert_eq!(unmarshaller.read_i32().unwrap(), 5);
    assert_eq!(unmarshaller.read_object_as::<String>().unwrap(), "between");
    assert_eq!(unmarshaller.read_utf().unwrap(), "tail");
    assert_eq!(unmarshaller.read_object_as::<i64>().unwrap(), -1);
    assert!(unmarshaller.read_object().unwrap().is_null());
    unmarshaller.finish().unwrap();
}

#[test]
fn test_typed_read_reports_mismatch() {
    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    let bytes = factory.marshal_to_vec(&config, &Value::string("text")).unwrap();
    let mut unmarshaller = factory.create_unmarshaller(&config).unwrap();
    unmarshaller.start(Box::new(ByteArrayInput::new(bytes))).unwrap();
    match unmarshaller.read_object_as::<i32>() {
        Err(MarshalError::TypeMismatch { expected, .. }) => assert_eq!(expected, "int"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_instance_cache_clear_breaks_sharing() {
    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    let text = Value::string("again");
    let sink = SharedByteOutput::new();
    let mut marshaller = factory.create_marshaller(&config).unwrap();
    marshaller.start(Box::new(sink.clone())).unwrap();
    marshaller.write_object(&text).unwrap();
    marshaller.clear_instance_cache().unwrap();
    marshaller.write_object(&text).unwrap();
    marshaller.write_object(&text).unwrap();
    marshaller.finish().unwrap();
    let bytes = sink.take();
    assert!(bytes.contains(&ID_CLEAR_INSTANCE_CACHE));

    let values = read_all(&factory, &config, &bytes, 3).unwrap();
    assert!(!object(&values[0]).ptr_eq(&object(&values[1])));
    assert!(object(&values[1]).ptr_eq(&object(&values[2])));
}

#[test]
fn test_class_cache_clear_rewrites_descriptors() {
    let loader = ClassLoader::new("app");
    let node = node_class(&loader);
    let factory = factory();
    let config = config(&loader);

    let sink = SharedByteOutput::new();
    let mut marshaller = factory.create_marshaller(&config).unwrap();
    marshaller.start(Box::new(sink.clone())).unwrap();
    marshaller.write_object(&Value::Object(common::node(&node, 1, Value::Null))).unwrap();
    let after_first = marshaller.bytes_written();
    marshaller.clear_class_cache().unwrap();
    marshaller.write_object(&Value::Object(common::node(&node, 2, Value::Null))).unwrap();
    marshaller.finish().unwrap();
    let bytes = sink.take();
    // the second copy repeats the full descriptor plus the clear marker
    assert_eq!(bytes.len() as u64, after_first * 2);

    let values = read_all(&factory, &config, &bytes, 2).unwrap();
    assert_eq!(field(&object(&values[1]), "value"), Value::Int(2));
}

#[test]
fn test_header_mismatch_is_corrupt() {
    let factory = factory();
    let writer = rivet::MarshallingConfiguration::new()
        .with_stream_header(Arc::new(StaticStreamHeader::new(*b"RVT")));
    let reader = rivet::MarshallingConfiguration::new()
        .with_stream_header(Arc::new(StaticStreamHeader::new(*b"RVX")));
    let bytes = factory.marshal_to_vec(&writer, &Value::Int(1)).unwrap();
    assert_eq!(&bytes[..4], b"RVT\x01");
    assert_eq!(factory.unmarshal_from_slice(&writer, &bytes).unwrap(), Value::Int(1));
    assert!(matches!(
        factory.unmarshal_from_slice(&reader, &bytes),
        Err(MarshalError::StreamCorruption(_))
    ));
}

#[test]
fn test_unsupported_version_is_corrupt() {
    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    for version in [0u8, 2, 0xff] {
        let mut unmarshaller = factory.create_unmarshaller(&config).unwrap();
        let result = unmarshaller.start(Box::new(ByteArrayInput::new(vec![version, 0x01])));
        assert!(matches!(result, Err(MarshalError::StreamCorruption(_))), "version {version}");
    }
}

#[test]
fn test_unknown_tag_is_corrupt() {
    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    let err = factory.unmarshal_from_slice(&config, &[1, 0x7f]).unwrap_err();
    assert!(matches!(err, MarshalError::StreamCorruption(_)), "{err}");
    assert!(err.is_fatal());
}

#[test]
fn test_truncated_stream_ends_early() {
    let loader = ClassLoader::new("app");
    let node = node_class(&loader);
    let factory = factory();
    let config = config(&loader);
    let bytes = factory
        .marshal_to_vec(&config, &Value::Object(common::node(&node, 4, Value::Null)))
        .unwrap();
    for cut in [1, bytes.len() / 2, bytes.len() - 1] {
        let err = factory.unmarshal_from_slice(&config, &bytes[..cut]).unwrap_err();
        assert!(matches!(err, MarshalError::EndOfStream), "cut at {cut}: {err}");
    }
}

#[test]
fn test_limited_sink_reports_resource_limit() {
    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    let sink = SharedByteOutput::new();
    let mut marshaller = factory.create_marshaller(&config).unwrap();
    marshaller
        .start(Box::new(LimitedByteOutput::new(sink.clone(), 16)))
        .unwrap();
    let result = marshaller
        .write_object(&Value::string("x".repeat(64)))
        .and_then(|_| marshaller.finish());
    match result {
        Err(MarshalError::ResourceLimitExceeded { limit, transferred }) => {
            assert_eq!(limit, 16);
            assert!(transferred <= 16);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(sink.len() <= 16);
}

#[test]
fn test_limited_source_ends_the_stream() {
    let factory = factory();
    let config = rivet::MarshallingConfiguration::new();
    let bytes = factory.marshal_to_vec(&config, &Value::string("abcdef")).unwrap();
    let mut unmarshaller = factory.create_unmarshaller(&config).unwrap();
    unmarshaller
        .start(Box::new(LimitedByteInput::new(ByteArrayInput::new(bytes), 4)))
        .unwrap();
    assert!(matches!(unmarshaller.read_object(), Err(MarshalError::EndOfStream)));
}

#[test]
fn test_plain_class_is_not_serializable() {
    let loader = ClassLoader::new("app");
    let plain = loader
        .define(ClassBuilder::new("app.Socket", rivet::ClassKind::Plain))
        .unwrap();
    let factory = factory();
    let err = factory
        .marshal_to_vec(
            &config(&loader),
            &Value::Object(ObjectRef::new_instance(&plain).unwrap()),
        )
        .unwrap_err();
    assert!(matches!(err, MarshalError::NotSerializable(name) if name == "app.Socket"));
}

#[test]
fn test_very_deep_chain_decodes_and_drops() {
    const DEPTH: i32 = 100_000;
    let loader = ClassLoader::new("app");
    let class = node_class(&loader);
    let factory = factory();
    let config = config(&loader);

    let chain = (0..DEPTH).fold(Value::Null, |next, i| Value::Object(node(&class, i, next)));
    let bytes = factory.marshal_to_vec(&config, &chain).unwrap();
    drop(chain);

    let copy = factory.unmarshal_from_slice(&config, &bytes).unwrap();
    let mut length = 0;
    let mut cursor = copy.clone();
    while let Value::Object(link) = cursor {
        assert_eq!(field(&link, "value"), Value::Int(DEPTH - 1 - length));
        cursor = field(&link, "next");
        length += 1;
    }
    assert_eq!(length, DEPTH);
    drop(copy);
}
