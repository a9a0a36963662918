//! Criterion benchmarks for the jqcore evaluator.
//!
//! Programs are compiled once outside the timed loop, so timings cover
//! evaluation only: environment setup, lazy streams and value building.
//!
//! Run:
//!   cargo bench
//!   cargo bench -- simple_path        # one group
//!   cargo bench -- realistic_workload # one group

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use jqcore::{compile, Json, Options, Program};

// ── Data builders ─────────────────────────────────────────────────────────────

/// Flat array of numbers: [0, 1, ..., n-1].
fn numeric_array(n: usize) -> Json {
    Json::array((0..n).map(Json::from).collect())
}

/// 100 product objects: {id, name, category, price, inStock, tags}.
fn products_100() -> Json {
    let categories = ["Electronics", "Books", "Garden", "Toys"];
    let products: Vec<Json> = (0..100_usize)
        .map(|i| {
            let mut m = IndexMap::new();
            m.insert("id".to_string(), Json::from(i));
            m.insert("name".to_string(), Json::string(format!("Product {i}")));
            m.insert("category".to_string(), Json::from(categories[i % categories.len()]));
            m.insert("price".to_string(), Json::from(10.0 + i as f64 * 2.5));
            m.insert("inStock".to_string(), Json::Bool(i % 2 == 0));
            m.insert(
                "tags".to_string(),
                Json::array(vec![Json::from("sale"), Json::string(format!("tag{}", i % 7))]),
            );
            Json::object(m)
        })
        .collect();
    let mut root = IndexMap::new();
    root.insert("products".to_string(), Json::array(products));
    Json::object(root)
}

// ── Helper: evaluate a compiled program on data ───────────────────────────────

#[inline]
fn eval(program: &Program, data: &Json) -> Vec<Json> {
    program.evaluate(data.clone(), &Options::default()).unwrap().outputs
}

// ── Bench groups ──────────────────────────────────────────────────────────────

fn bench_simple_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("simple_path");
    group.sample_size(300);

    for (name, text, data) in [
        ("field", ".name", r#"{"name":"Alice","age":30}"#),
        ("deep_path_5", ".a.b.c.d.e", r#"{"a":{"b":{"c":{"d":{"e":42}}}}}"#),
        ("arithmetic", ".price * .quantity", r#"{"price":10.5,"quantity":3}"#),
        ("optional_missing", ".a?.b?", r#"{"b":1}"#),
    ] {
        let program = compile(text).unwrap();
        let data = Json::from_json_str(data).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(eval(black_box(&program), black_box(&data))))
        });
    }

    group.finish();
}

fn bench_array_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_operations");

    for n in [100_usize, 1000, 10000] {
        let data = numeric_array(n);
        for (name, text) in [
            ("add", "add"),
            ("map", "map(. * 2)"),
            ("select", "[.[] | select(. % 2 == 0)]"),
            ("sort_by", "sort_by(-.)"),
        ] {
            let program = compile(text).unwrap();
            group.bench_with_input(BenchmarkId::new(name, n), &data, |b, data| {
                b.iter(|| black_box(eval(black_box(&program), black_box(data))))
            });
        }
    }

    group.finish();
}

fn bench_path_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_updates");
    let data = products_100();

    for (name, text) in [
        ("update_all_prices", ".products[].price |= . * 1.1"),
        ("delete_out_of_stock", "del(.products[] | select(.inStock | not))"),
        ("paths", "[paths] | length"),
        ("to_entries", ".products[0] | with_entries(.value |= tostring)"),
    ] {
        let program = compile(text).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(eval(black_box(&program), black_box(&data))))
        });
    }

    group.finish();
}

fn bench_string_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("string_operations");
    let data = products_100();

    for (name, text) in [
        ("interpolation", r#"[.products[] | "\(.name) costs \(.price)"]"#),
        ("join", "[.products[].name] | join(\", \")"),
        ("gsub", r#"[.products[].name | gsub("Product"; "Item")]"#),
        ("csv", "[.products[] | [.id, .name, .price] | @csv]"),
    ] {
        let program = compile(text).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(eval(black_box(&program), black_box(&data))))
        });
    }

    group.finish();
}

fn bench_realistic_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("realistic_workload");
    let data = products_100();

    for (name, text) in [
        (
            "group_and_total",
            "[.products | group_by(.category)[] | {category: .[0].category, total: (map(.price) | add)}]",
        ),
        (
            "in_stock_summary",
            "[.products[] | select(.inStock) | {name, price}] | sort_by(.price) | reverse | .[:5]",
        ),
        (
            "reduce_index",
            "reduce .products[] as $p ({}; .[$p.category] += [$p.id])",
        ),
        ("limit_first", "[limit(3; .products[] | select(.price > 100))]"),
    ] {
        let program = compile(text).unwrap();
        group.bench_function(name, |b| {
            b.iter(|| black_box(eval(black_box(&program), black_box(&data))))
        });
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    let text = "def total: map(.price) | add; .products | group_by(.category) | map({(.[0].category): total}) | add";
    group.bench_function("group_program", |b| b.iter(|| black_box(compile(black_box(text)).unwrap())));
    group.finish();
}

criterion_group!(
    benches,
    bench_simple_paths,
    bench_array_operations,
    bench_path_updates,
    bench_string_operations,
    bench_realistic_workload,
    bench_compile,
);
criterion_main!(benches);
