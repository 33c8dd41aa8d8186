use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rivet::{
    ClassBuilder, ClassInfoRegistry, ClassLoader, FieldDef, LoaderClassResolver, MarshallerFactory,
    MarshallingConfiguration, ObjectRef, PrimitiveKind, Value,
};
use std::sync::Arc;

fn setup() -> (MarshallerFactory, MarshallingConfiguration, ClassLoader) {
    let loader = ClassLoader::new("bench");
    loader
        .define(
            ClassBuilder::serializable("bench.Node")
                .field(FieldDef::primitive("id", PrimitiveKind::Long))
                .field(FieldDef::primitive("weight", PrimitiveKind::Double))
                .field(FieldDef::object("label"))
                .field(FieldDef::object("next")),
        )
        .unwrap();
    let factory = MarshallerFactory::new(Arc::new(ClassInfoRegistry::new()));
    let config = MarshallingConfiguration::new()
        .with_class_resolver(Arc::new(LoaderClassResolver::new(loader.clone())));
    (factory, config, loader)
}

/// Linked list of `len` nodes; every fourth label is shared
fn list(loader: &ClassLoader, len: usize) -> Value {
    let class = loader.load("bench.Node").unwrap();
    let shared = Value::string("shared-label");
    (0..len).fold(Value::Null, |next, i| {
        let node = ObjectRef::new_instance(&class).unwrap();
        node.set_field("id", i as i64).unwrap();
        node.set_field("weight", i as f64 * 0.5).unwrap();
        let label = if i % 4 == 0 {
            shared.clone()
        } else {
            Value::string(format!("node-{i}"))
        };
        node.set_field("label", label).unwrap();
        node.set_field("next", next).unwrap();
        Value::Object(node)
    })
}

fn bench_marshal_list(c: &mut Criterion) {
    let (factory, config, loader) = setup();
    let mut group = c.benchmark_group("marshal_list");
    for len in [16usize, 1024] {
        let value = list(&loader, len);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &value, |b, value| {
            b.iter(|| factory.marshal_to_vec(&config, black_box(value)).unwrap());
        });
    }
    group.finish();
}

fn bench_unmarshal_list(c: &mut Criterion) {
    let (factory, config, loader) = setup();
    let mut group = c.benchmark_group("unmarshal_list");
    for len in [16usize, 1024] {
        let bytes = factory.marshal_to_vec(&config, &list(&loader, len)).unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &bytes, |b, bytes| {
            b.iter(|| factory.unmarshal_from_slice(&config, black_box(bytes)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_marshal_list, bench_unmarshal_list);
criterion_main!(benches);
