//! Page Fetch Benchmarks
//!
//! Fetches windows of a 10,000-row SQLite table through the full operation path
//! (open, describe, count, select, marshal, close).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quarry::engine::sqlite::SqliteConnector;
use quarry::orchestrator::{CrudOrchestrator, FetchPageRequest, Settings};
use quarry::Credentials;

fn bench_fetch_page(c: &mut Criterion) {
    let data_dir = std::env::temp_dir().join("quarry_bench_pagination");
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).expect("Failed to create data dir");

    {
        use rusqlite::Connection;
        let conn = Connection::open(data_dir.join("bench.db")).expect("Failed to create database");
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, balance DECIMAL(10,2));
             BEGIN;",
        )
        .expect("Failed to create table");
        for i in 1..=10_000 {
            conn.execute(
                "INSERT INTO users (name, balance) VALUES (?1, ?2)",
                rusqlite::params![format!("User {i}"), f64::from(i) / 4.0],
            )
            .expect("Failed to insert");
        }
        conn.execute_batch("COMMIT").expect("Failed to commit");
    }

    let orchestrator = CrudOrchestrator::new(SqliteConnector::new(&data_dir), Settings::default());
    let credentials = Credentials::new("", "");
    let runtime = tokio::runtime::Runtime::new().expect("Failed to start runtime");

    for page in [1, 100] {
        let request = FetchPageRequest {
            db_name: "bench".into(),
            table_name: "users".into(),
            page,
            limit: Some(50),
        };
        c.bench_function(&format!("sqlite_fetch_page_{page}"), |b| {
            b.iter(|| {
                let result = runtime.block_on(orchestrator.fetch_page(&credentials, black_box(&request)));
                assert!(result.is_ok());
                result
            });
        });
    }

    let _ = std::fs::remove_dir_all(&data_dir);
}

criterion_group!(benches, bench_fetch_page);
criterion_main!(benches);
