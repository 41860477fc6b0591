use criterion::{Criterion, black_box, criterion_group, criterion_main};
use federa::row::Value;

const QUERIES: &[&str] = &[
    "SELECT s.id,s.name FROM ds.t s WHERE s.id = 1 ORDER BY s.id ASC LIMIT 10",
    "SELECT a.x AS x,b.y AS y FROM a.t1 a LEFT JOIN b.t2 b ON (a.id = b.id) WHERE a.active = true",
    "SELECT s.u,COUNT(DISTINCT s.v) AS c FROM ds.t s GROUP BY s.u ORDER BY c DESC LIMIT 50",
];

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");

    for (i, sql) in QUERIES.iter().enumerate() {
        group.bench_function(format!("parse_{i}"), |b| {
            b.iter(|| {
                black_box(federa::parser::parse(black_box(sql)).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_value_json_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_json");

    let values = vec![
        Value::Int(42),
        Value::Float(3.14159),
        Value::Str("a moderately sized string value".to_string()),
        Value::Bool(true),
        Value::Null,
    ];

    group.bench_function("to_json", |b| {
        b.iter(|| {
            for v in &values {
                black_box(v.to_json());
            }
        });
    });

    let json_values: Vec<serde_json::Value> = values.iter().map(Value::to_json).collect();
    group.bench_function("from_json", |b| {
        b.iter(|| {
            for v in &json_values {
                black_box(Value::from_json(v));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_value_json_round_trip);
criterion_main!(benches);
