//! Predefined tables, name remapping, resolvers, admission filters and
//! configuration loading

mod common;

use common::*;
use parking_lot::Mutex;
use rivet::protocol::{ID_PREDEFINED_CLASS, ID_PREDEFINED_OBJECT};
use rivet::{
    ChainingClassTable, ChainingObjectResolver, ChainingObjectTable, ClassBuilder, ClassLoader,
    ClassResolver, ClassTable, ConfigDefaults, ErrorContext, ExceptionListener, FieldDef,
    LoaderClassResolver, MarshalError, MarshalResult, MarshallingConfiguration,
    NameTransformingResolver, ObjectRef, ObjectResolver, ObjectTable, PackageRemapper,
    PrimitiveKind, SimpleFilter, StaticClassTable, StaticObjectTable, UndecidedPolicy,
    UnmarshallingFilter, Value,
};
use rivet_filter::{FilterInfo, FilterStatus, FnFilter};
use std::io::Write;
use std::sync::Arc;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[test]
fn test_class_table_replaces_descriptor() {
    let loader = ClassLoader::new("app");
    let node = node_class(&loader);
    let table: Arc<dyn ClassTable> = Arc::new(StaticClassTable::new(vec![node.clone()]).unwrap());
    // no resolver: the table alone must identify the class
    let config = MarshallingConfiguration {
        class_table: Some(table),
        ..Default::default()
    };

    let factory = factory();
    let value = Value::Object(common::node(&node, 5, Value::Null));
    let bytes = factory.marshal_to_vec(&config, &value).unwrap();
    assert!(contains(&bytes, &[ID_PREDEFINED_CLASS, 0]));
    assert!(!contains(&bytes, b"graph.Node"));
    assert!(factory.unmarshal_from_slice(&config, &bytes).unwrap().graph_eq(&value));
}

#[test]
fn test_chained_class_table_prefixes_delegate_index() {
    let loader = ClassLoader::new("app");
    let node = node_class(&loader);
    let pair = pair_class(&loader);
    let first: Arc<dyn ClassTable> = Arc::new(StaticClassTable::new(vec![pair]).unwrap());
    let second: Arc<dyn ClassTable> = Arc::new(StaticClassTable::new(vec![node.clone()]).unwrap());
    let chain = ChainingClassTable::new(vec![None, Some(first), Some(second)]).unwrap();
    let config = MarshallingConfiguration {
        class_table: Some(Arc::new(chain)),
        ..Default::default()
    };

    let factory = factory();
    let value = Value::Object(common::node(&node, 1, Value::Null));
    let bytes = factory.marshal_to_vec(&config, &value).unwrap();
    assert!(contains(&bytes, &[ID_PREDEFINED_CLASS, 2, 0]));
    assert!(factory.unmarshal_from_slice(&config, &bytes).unwrap().graph_eq(&value));
}

#[test]
fn test_object_table_returns_the_registered_instances() {
    let loader = ClassLoader::new("app");
    let pair = pair_class(&loader);
    let sentinel = ObjectRef::string("<eof>");
    let other = ObjectRef::string("<none>");
    let inner: Arc<dyn ObjectTable> = Arc::new(StaticObjectTable::new(vec![sentinel.clone()]).unwrap());
    let chain = ChainingObjectTable::new(vec![
        Some(Arc::new(StaticObjectTable::new(vec![other]).unwrap()) as Arc<dyn ObjectTable>),
        Some(inner),
    ])
    .unwrap();
    let mut config = config(&loader);
    config.object_table = Some(Arc::new(chain));

    let root = ObjectRef::new_instance(&pair).unwrap();
    root.set_field("left", sentinel.clone()).unwrap();
    root.set_field("right", sentinel.clone()).unwrap();

    let factory = factory();
    let bytes = factory.marshal_to_vec(&config, &Value::Object(root)).unwrap();
    assert!(contains(&bytes, &[ID_PREDEFINED_OBJECT, 1, 0]));
    assert!(!contains(&bytes, b"<eof>"));

    let copy = object(&factory.unmarshal_from_slice(&config, &bytes).unwrap());
    assert!(object(&field(&copy, "left")).ptr_eq(&sentinel));
    assert!(object(&field(&copy, "right")).ptr_eq(&sentinel));
}

#[test]
fn test_package_remapping_renames_on_the_wire() {
    let local = ClassLoader::new("local");
    let widget = local
        .define(
            ClassBuilder::serializable("com.acme.Widget")
                .version(3)
                .field(FieldDef::primitive("size", PrimitiveKind::Short)),
        )
        .unwrap();
    let remote = ClassLoader::new("remote");
    remote
        .define(
            ClassBuilder::serializable("net.shop.Widget")
                .version(3)
                .field(FieldDef::primitive("size", PrimitiveKind::Short)),
        )
        .unwrap();

    let writer = MarshallingConfiguration::new().with_class_resolver(Arc::new(
        NameTransformingResolver::new(
            Arc::new(LoaderClassResolver::new(local)),
            Arc::new(PackageRemapper::new().map("com.acme", "org.wire")),
        ),
    ));
    let reader = MarshallingConfiguration::new().with_class_resolver(Arc::new(
        NameTransformingResolver::new(
            Arc::new(LoaderClassResolver::new(remote)),
            Arc::new(PackageRemapper::new().map("net.shop", "org.wire")),
        ),
    ));

    let w = ObjectRef::new_instance(&widget).unwrap();
    w.set_field("size", 12i16).unwrap();
    let factory = factory();
    let bytes = factory.marshal_to_vec(&writer, &Value::Object(w)).unwrap();
    assert!(contains(&bytes, b"org.wire.Widget"));
    assert!(!contains(&bytes, b"com.acme"));

    let copy = object(&factory.unmarshal_from_slice(&reader, &bytes).unwrap());
    assert_eq!(copy.class().name(), "net.shop.Widget");
    assert_eq!(field(&copy, "size"), Value::Short(12));
}

#[test]
fn test_unresolvable_class_is_reported() {
    let loader = ClassLoader::new("app");
    let node = node_class(&loader);
    let factory = factory();
    let bytes = factory
        .marshal_to_vec(&config(&loader), &Value::Object(common::node(&node, 0, Value::Null)))
        .unwrap();

    let empty = ClassLoader::new("empty");
    match factory.unmarshal_from_slice(&config(&empty), &bytes) {
        Err(MarshalError::ClassResolution { name, .. }) => assert_eq!(name, "graph.Node"),
        other => panic!("unexpected {other:?}"),
    }
    // no resolver at all
    assert!(factory
        .unmarshal_from_slice(&MarshallingConfiguration::new(), &bytes)
        .is_err());
}

/// Upper-cases strings on the way out
struct Shout;

impl ObjectResolver for Shout {
    fn write_replace(&self, original: &ObjectRef) -> MarshalResult<Value> {
        Ok(match original.as_string() {
            Some(text) => Value::string(text.to_uppercase()),
            None => Value::Object(original.clone()),
        })
    }
}

/// Tags strings on the way in
struct Mark(&'static str);

impl ObjectResolver for Mark {
    fn read_resolve(&self, replacement: Value) -> MarshalResult<Value> {
        Ok(match replacement.as_str_value() {
            Some(text) => Value::string(format!("{text}{}", self.0)),
            None => replacement,
        })
    }
}

#[test]
fn test_object_resolvers_substitute_both_ways() {
    let loader = ClassLoader::new("app");
    let pair = pair_class(&loader);
    let text = ObjectRef::string("quiet");
    let root = ObjectRef::new_instance(&pair).unwrap();
    root.set_field("left", text.clone()).unwrap();
    root.set_field("right", text).unwrap();

    let mut config = config(&loader);
    config.object_resolver = Some(Arc::new(ChainingObjectResolver::new(vec![
        Arc::new(Shout),
        Arc::new(Mark("!")),
    ])));
    config.object_pre_resolver = Some(Arc::new(Mark("?")));

    let copy = object(&round_trip(&factory(), &config, &Value::Object(root)).unwrap());
    let left = object(&field(&copy, "left"));
    assert_eq!(left.as_string().as_deref(), Some("QUIET!?"));
    assert!(left.ptr_eq(&object(&field(&copy, "right"))));
}

fn chain(loader: &ClassLoader, length: i32) -> Value {
    let class = loader.load("graph.Node").unwrap_or_else(|| node_class(loader));
    (0..length).fold(Value::Null, |next, i| Value::Object(common::node(&class, i, next)))
}

fn filtered(loader: &ClassLoader, filter: Arc<dyn UnmarshallingFilter>, policy: UndecidedPolicy) -> MarshallingConfiguration {
    config(loader).with_filter(filter, policy)
}

#[test]
fn test_depth_ceiling() {
    let loader = ClassLoader::new("app");
    let value = chain(&loader, 4);
    let factory = factory();
    let bytes = factory.marshal_to_vec(&config(&loader), &value).unwrap();

    let shallow = filtered(&loader, Arc::new(SimpleFilter::parse("maxdepth=3").unwrap()), UndecidedPolicy::Accept);
    assert!(matches!(
        factory.unmarshal_from_slice(&shallow, &bytes),
        Err(MarshalError::FilterRejection { .. })
    ));
    let deep = filtered(&loader, Arc::new(SimpleFilter::parse("maxdepth=4").unwrap()), UndecidedPolicy::Accept);
    assert!(factory.unmarshal_from_slice(&deep, &bytes).unwrap().graph_eq(&value));
}

#[test]
fn test_array_length_checked_before_allocation() {
    let ints = ObjectRef::array(
        rivet::Class::Primitive(PrimitiveKind::Int),
        rivet::ArrayData::Int(vec![1, 2, 3]),
    )
    .unwrap();
    let factory = factory();
    let plain = MarshallingConfiguration::new();
    let bytes = factory.marshal_to_vec(&plain, &Value::Object(ints)).unwrap();

    let strict = plain
        .clone()
        .with_filter(Arc::new(SimpleFilter::parse("maxarray=2").unwrap()), UndecidedPolicy::Accept);
    match factory.unmarshal_from_slice(&strict, &bytes) {
        Err(MarshalError::FilterRejection { subject, .. }) => assert_eq!(subject, "int[]"),
        other => panic!("unexpected {other:?}"),
    }
    let roomy = plain.with_filter(Arc::new(SimpleFilter::parse("maxarray=3").unwrap()), UndecidedPolicy::Reject);
    assert!(factory.unmarshal_from_slice(&roomy, &bytes).is_ok());
}

#[test]
fn test_class_patterns_and_undecided_policy() {
    let loader = ClassLoader::new("app");
    let pair = pair_class(&loader);
    let root = ObjectRef::new_instance(&pair).unwrap();
    root.set_field("left", Value::string("s")).unwrap();
    root.set_field("right", chain(&loader, 1)).unwrap();

    let factory = factory();
    let bytes = factory.marshal_to_vec(&config(&loader), &Value::Object(root)).unwrap();
    let run = |spec: &str, policy| {
        let filter = Arc::new(SimpleFilter::parse(spec).unwrap());
        factory.unmarshal_from_slice(&filtered(&loader, filter, policy), &bytes)
    };

    assert!(run("graph.*", UndecidedPolicy::Reject).is_ok());
    assert!(run("", UndecidedPolicy::Accept).is_ok());
    assert!(matches!(
        run("", UndecidedPolicy::Reject),
        Err(MarshalError::FilterRejection { .. })
    ));
    match run("graph.*;!graph.Node", UndecidedPolicy::Accept) {
        Err(MarshalError::FilterRejection { subject, .. }) => assert_eq!(subject, "graph.Node"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_reference_ceiling_counts_back_references() {
    let text = ObjectRef::string("r");
    let array = ObjectRef::object_array(
        rivet::Class::String,
        (0..5).map(|_| Value::Object(text.clone())).collect(),
    )
    .unwrap();
    let factory = factory();
    let plain = MarshallingConfiguration::new();
    let bytes = factory.marshal_to_vec(&plain, &Value::Object(array)).unwrap();

    let capped = plain
        .clone()
        .with_filter(Arc::new(SimpleFilter::parse("maxrefs=4").unwrap()), UndecidedPolicy::Accept);
    assert!(matches!(
        factory.unmarshal_from_slice(&capped, &bytes),
        Err(MarshalError::FilterRejection { .. })
    ));
    let enough = plain.with_filter(Arc::new(SimpleFilter::parse("maxrefs=6").unwrap()), UndecidedPolicy::Accept);
    assert!(factory.unmarshal_from_slice(&enough, &bytes).is_ok());
}

#[test]
fn test_filter_faults_and_panics_fail_closed() {
    let factory = factory();
    let plain = MarshallingConfiguration::new();
    let bytes = factory.marshal_to_vec(&plain, &Value::string("x")).unwrap();

    let faulty = FnFilter::new(|_: &FilterInfo<'_>| -> Result<FilterStatus, rivet_filter::FilterFault> {
        Err("filter backend offline".into())
    });
    let config = plain
        .clone()
        .with_filter(Arc::new(faulty), UndecidedPolicy::Accept);
    match factory.unmarshal_from_slice(&config, &bytes) {
        Err(MarshalError::FilterRejection { reason, .. }) => assert!(reason.contains("offline")),
        other => panic!("unexpected {other:?}"),
    }

    let panicky = FnFilter::new(|_: &FilterInfo<'_>| -> Result<FilterStatus, rivet_filter::FilterFault> {
        panic!("filter bug")
    });
    let config = plain.with_filter(Arc::new(panicky), UndecidedPolicy::Accept);
    assert!(matches!(
        factory.unmarshal_from_slice(&config, &bytes),
        Err(MarshalError::FilterRejection { .. })
    ));
}

#[derive(Default)]
struct Recorder {
    written: Mutex<Vec<ErrorContext>>,
    read: Mutex<Vec<ErrorContext>>,
}

impl ExceptionListener for Recorder {
    fn marshalling_error(&self, _error: &MarshalError, context: &ErrorContext) {
        self.written.lock().push(context.clone());
    }

    fn unmarshalling_error(&self, _error: &MarshalError, context: &ErrorContext) {
        self.read.lock().push(context.clone());
    }
}

#[test]
fn test_listener_sees_each_level_of_a_failure() {
    let loader = ClassLoader::new("app");
    let pair = pair_class(&loader);
    let socket = loader
        .define(ClassBuilder::new("net.Socket", rivet::ClassKind::Plain))
        .unwrap();
    let root = ObjectRef::new_instance(&pair).unwrap();
    let inner = ObjectRef::new_instance(&pair).unwrap();
    inner.set_field("right", ObjectRef::new_instance(&socket).unwrap()).unwrap();
    root.set_field("left", inner).unwrap();

    let recorder = Arc::new(Recorder::default());
    let mut config = config(&loader);
    config.exception_listener = Some(recorder.clone());

    let err = factory().marshal_to_vec(&config, &Value::Object(root)).unwrap_err();
    assert!(matches!(err, MarshalError::NotSerializable(_)));
    let written = recorder.written.lock();
    let fields: Vec<_> = written.iter().map(|c| c.field.as_deref()).collect();
    assert_eq!(fields, vec![Some("right"), Some("left")]);
    assert!(written.iter().all(|c| c.class.as_deref() == Some("graph.Pair")));
    assert_eq!(written[0].to_string(), "graph.Pair.right");
}

#[test]
fn test_defaults_from_files() {
    let mut toml_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(toml_file, "buffer_size = 64\ninstance_count = 16").unwrap();
    let mut json_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    writeln!(json_file, "{{\"buffer_size\": 32, \"class_count\": 4}}").unwrap();

    let from_toml = ConfigDefaults::from_file(toml_file.path()).unwrap();
    assert_eq!(from_toml.buffer_size, 64);
    assert_eq!(from_toml.instance_count, 16);
    let from_json = ConfigDefaults::from_file(json_file.path()).unwrap();
    assert_eq!(from_json.buffer_size, 32);
    assert_eq!(from_json.class_count, 4);

    // tiny buffers still produce identical streams
    let loader = ClassLoader::new("app");
    let value = chain(&loader, 3);
    let small = factory().with_defaults(from_json).unwrap();
    let bytes = small.marshal_to_vec(&config(&loader), &value).unwrap();
    assert_eq!(bytes, factory().marshal_to_vec(&config(&loader), &value).unwrap());
    assert!(small.unmarshal_from_slice(&config(&loader), &bytes).unwrap().graph_eq(&value));

    let mut broken = tempfile::NamedTempFile::new().unwrap();
    writeln!(broken, "buffer_size = \"large\"").unwrap();
    assert!(matches!(
        ConfigDefaults::from_file(broken.path()),
        Err(MarshalError::InvalidConfiguration(_))
    ));
}

/// Counts every class it is asked for
struct CountingResolver {
    inner: LoaderClassResolver,
    requests: Mutex<Vec<String>>,
}

impl ClassResolver for CountingResolver {
    fn resolve_class(
        &self,
        input: &mut dyn rivet::ObjectInput,
        name: &str,
        version: i64,
    ) -> MarshalResult<rivet::Class> {
        self.requests.lock().push(name.to_string());
        self.inner.resolve_class(input, name, version)
    }
}

#[test]
fn test_rejected_class_never_reaches_the_resolver() {
    let loader = ClassLoader::new("app");
    let value = chain(&loader, 2);
    let factory = factory();
    let bytes = factory.marshal_to_vec(&config(&loader), &value).unwrap();

    let resolver = Arc::new(CountingResolver {
        inner: LoaderClassResolver::new(loader.clone()),
        requests: Mutex::new(Vec::new()),
    });
    let config = MarshallingConfiguration::new()
        .with_class_resolver(resolver.clone())
        .with_filter(Arc::new(SimpleFilter::parse("!graph.Node").unwrap()), UndecidedPolicy::Accept);
    match factory.unmarshal_from_slice(&config, &bytes) {
        Err(MarshalError::FilterRejection { subject, .. }) => assert_eq!(subject, "graph.Node"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(resolver.requests.lock().is_empty());

    // the same resolver is consulted once the class is admitted
    let open = MarshallingConfiguration::new().with_class_resolver(resolver.clone());
    assert!(factory.unmarshal_from_slice(&open, &bytes).unwrap().graph_eq(&value));
    assert_eq!(*resolver.requests.lock(), vec!["graph.Node".to_string()]);
}
