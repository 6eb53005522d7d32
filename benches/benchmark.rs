use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};

use discoverx::catalog::{CatalogEnumerator, TableColumns, TableFilter, TableRef};
use discoverx::engine::{Dialect, QueryEngine};
use discoverx::filter::NameFilter;
use discoverx::interface::CancelToken;
use discoverx::rules::RuleRegistry;
use discoverx::scan::{ScanExecutor, ScanPlanner};
use discoverx::sqlite::{PersistenceMode, SqliteEngine};

fn tables(n: usize) -> Vec<TableColumns> {
    (0..n)
        .map(|i| {
            let table = TableRef::new("lake", "sales", &format!("table_{i}"));
            let columns = ["id", "contact", "address", "created"]
                .iter()
                .zip(["bigint", "string", "string", "timestamp"])
                .map(|(name, data_type)| table.column(name, data_type))
                .collect();
            TableColumns { table, columns }
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let registry = RuleRegistry::new();
    let rules = registry.list_rules(&NameFilter::default());

    let values: Vec<String> = (0..1000)
        .map(|i| match i % 3 {
            0 => format!("user{i}@example.com"),
            1 => format!("10.0.{}.{}", i / 256, i % 256),
            _ => format!("host{i}.example.org"),
        })
        .collect();
    c.bench_function("match 1k values against every rule", |b| {
        b.iter(|| {
            let mut matched = 0;
            for value in &values {
                for rule in &rules {
                    matched += rule.is_match(black_box(value)) as usize;
                }
            }
            matched
        })
    });

    let planner = ScanPlanner::new(Dialect::Spark);
    for n in [10, 1000] {
        let catalog = tables(n);
        c.bench_function(&format!("plan {n} tables"), |b| {
            b.iter(|| planner.plan(black_box(&catalog), &rules, Some(10_000)))
        });
    }

    let lake = SqliteEngine::open(&PersistenceMode::InMemory).expect("in memory lake");
    lake.execute_batch(
        "
        create table contacts (id integer, contact text, address text);
        with recursive n(i) as (select 1 union all select i + 1 from n where i < 10000)
        insert into contacts select i, 'user' || i || '@example.com', '10.0.' || (i % 250) || '.1' from n;
        ",
    )
    .expect("fixture");
    let catalog = CatalogEnumerator::new(&lake).enumerate(&TableFilter::default()).collect_all().0;
    for sample_size in [Some(1_000), None] {
        let plan = ScanPlanner::new(lake.dialect()).plan(&catalog, &rules, sample_size);
        let label = sample_size.map_or("all".to_string(), |n| n.to_string());
        c.bench_function(&format!("scan 10k rows, sample {label}"), |b| {
            b.iter(|| ScanExecutor::new(&lake).execute(&plan, false, &CancelToken::new()))
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
