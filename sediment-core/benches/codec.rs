use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sediment_core::{
    from_microdata, hash_object, to_microdata, ObjectValue, Recipe, RecipeRegistry, Rule, Value,
    ValueType,
};

fn registry() -> RecipeRegistry {
    let registry = RecipeRegistry::new();
    registry
        .register(Recipe::new(
            "Profile",
            vec![
                Rule::new("email", ValueType::string()).id(),
                Rule::new("name", ValueType::string()),
                Rule::new("age", ValueType::Integer),
                Rule::new("tags", ValueType::bag_of(ValueType::string())),
                Rule::new("history", ValueType::array_of(ValueType::Integer)),
                Rule::new(
                    "scores",
                    ValueType::map_of(ValueType::string(), ValueType::Number),
                ),
                Rule::new("meta", ValueType::Stringifiable),
            ],
        ))
        .expect("register");
    registry
}

fn profile() -> ObjectValue {
    ObjectValue::new("Profile")
        .with("email", Value::String("bench@example.com".into()))
        .with("name", Value::String("Benchmark Profile".into()))
        .with("age", Value::Integer(42))
        .with(
            "tags",
            Value::Bag((0..32).map(|i| Value::String(format!("tag-{i:02}"))).collect()),
        )
        .with(
            "history",
            Value::Array((0..64).map(Value::Integer).collect()),
        )
        .with(
            "scores",
            Value::Map(
                (0..16)
                    .map(|i| {
                        (
                            Value::String(format!("k{i:02}")),
                            Value::Number(i as f64 / 3.0),
                        )
                    })
                    .collect(),
            ),
        )
        .with(
            "meta",
            Value::Stringifiable(serde_json::json!({
                "source": "bench",
                "flags": [true, false, null],
                "nested": {"depth": 2}
            })),
        )
}

fn bench_serialize_and_hash(c: &mut Criterion) {
    let registry = registry();
    let obj = profile();

    c.bench_function("serialize_profile", |b| {
        b.iter(|| to_microdata(black_box(&registry), black_box(&obj)))
    });

    c.bench_function("hash_profile", |b| {
        b.iter(|| hash_object(black_box(&registry), black_box(&obj)))
    });

    let md = to_microdata(&registry, &obj).expect("serialize");
    c.bench_function("parse_profile", |b| {
        b.iter(|| from_microdata(black_box(&registry), black_box(&md)))
    });
}

criterion_group!(benches, bench_serialize_and_hash);
criterion_main!(benches);
