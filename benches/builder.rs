//! Statement Building Benchmarks
//!
//! Measures the pure SQL construction paths:
//! - CREATE TABLE from column definitions
//! - INSERT from ordered column values
//! - DELETE from a comma-joined id list

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quarry::engine::Dialect;
use quarry::schema::ColumnDescriptor;
use quarry::sql::{parse_id_list, SqlBuilder};
use quarry::ColumnValues;

fn bench_create_table(c: &mut Criterion) {
    let builder = SqlBuilder::new(Dialect::MySql);
    let columns: Vec<ColumnDescriptor> = (0..32)
        .map(|i| ColumnDescriptor::new(format!("column_{i}"), "VARCHAR").with_length("255"))
        .chain(std::iter::once(
            ColumnDescriptor::new("id", "INT").with_length("11").primary_key().auto_increment(),
        ))
        .collect();

    c.bench_function("build_create_table_33_columns", |b| {
        b.iter(|| builder.build_create_table(black_box("products"), black_box(&columns)));
    });
}

fn bench_insert(c: &mut Criterion) {
    let builder = SqlBuilder::new(Dialect::Sqlite);
    let data = (0..16).fold(ColumnValues::new(), |values, i| {
        values.with(format!("column_{i}"), format!("value {i}"))
    });

    c.bench_function("build_insert_16_values", |b| {
        b.iter(|| builder.build_insert(black_box("products"), black_box(&data)));
    });
}

fn bench_delete(c: &mut Criterion) {
    let builder = SqlBuilder::new(Dialect::MySql);
    let ids = (1..=500).map(|i| i.to_string()).collect::<Vec<_>>().join(",");

    c.bench_function("build_delete_500_ids", |b| {
        b.iter(|| {
            let parsed = parse_id_list(black_box(&ids)).expect("valid ids");
            builder.build_delete("products", "id", &parsed)
        });
    });
}

criterion_group!(benches, bench_create_table, bench_insert, bench_delete);
criterion_main!(benches);
