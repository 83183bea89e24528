use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use geoview::{
    DesignDocument, Interval, QueryArgs, Row, StoredRow, StoredValue, compile, expand_dups,
    query_boxes, split_bbox_if_flipped, validate_args,
};
use serde_json::{Map, Value, json};

fn world() -> [Interval; 2] {
    [Interval::new(-180.0, 180.0), Interval::new(-90.0, 90.0)]
}

fn benchmark_bbox_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("bbox_split");

    let cases = [
        ("plain", [Interval::new(-10.0, 10.0), Interval::new(-5.0, 5.0)]),
        ("flipped_x", [Interval::new(170.0, -170.0), Interval::new(-5.0, 5.0)]),
        ("flipped_both", [Interval::new(170.0, -170.0), Interval::new(80.0, -80.0)]),
    ];
    for (name, bbox) in cases {
        group.bench_with_input(BenchmarkId::new("split", name), &bbox, |b, bbox| {
            b.iter(|| split_bbox_if_flipped(black_box(*bbox), black_box(world())))
        });
    }

    group.bench_function("validate_and_boxes", |b| {
        b.iter(|| {
            let args = QueryArgs::default()
                .with_bbox(vec![Interval::new(170.0, -170.0), Interval::new(-5.0, 5.0)])
                .with_bounds(world().to_vec());
            let args = validate_args(black_box(args)).unwrap();
            query_boxes(&args)
        })
    });

    group.finish();
}

fn benchmark_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("design_compile");

    for views in [1usize, 10, 100] {
        let mut spatial = Map::new();
        for i in 0..views {
            spatial.insert(
                format!("view_{}", i),
                Value::String(format!("function(doc) {{ emit(doc.g{}, null); }}", i % 7)),
            );
        }
        let ddoc = DesignDocument::new("_design/bench", json!({ "spatial": spatial }));

        group.bench_with_input(BenchmarkId::new("compile", views), &ddoc, |b, ddoc| {
            b.iter(|| compile(black_box("bench"), ddoc).unwrap())
        });
    }

    group.finish();
}

fn benchmark_expand_dups(c: &mut Criterion) {
    let key = vec![Interval::new(0.0, 1.0), Interval::new(0.0, 1.0)];
    let rows: Vec<StoredRow> = (0..1000)
        .map(|i| StoredRow {
            key: key.clone(),
            doc_id: format!("doc:{}", i),
            geometry: None,
            value: if i % 10 == 0 {
                StoredValue::Dups(vec![json!(i), json!(i + 1), json!(i + 2)])
            } else {
                StoredValue::Single(json!(i))
            },
        })
        .collect();

    c.bench_function("expand_dups_1000", |b| {
        b.iter(|| {
            let expanded: Vec<Row> = expand_dups(black_box(rows.clone()));
            expanded.len()
        })
    });
}

criterion_group!(
    benches,
    benchmark_bbox_split,
    benchmark_compile,
    benchmark_expand_dups
);
criterion_main!(benches);
