use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use repograph_core::{Mapper, Relationship};
use repograph_infra::{MemoryRepository, Repository, RepositoryExt, SqliteRepository};
use std::path::Path;

repograph_core::entity! {
    struct Book {
        id: i64,
        title: String,
        summary: String,
    }
}

repograph_core::entity! {
    struct MultipleComposingEntity {
        id: i64,
        name: String,
        #[serde(default)]
        books: Vec<Book>,
    }
}

fn book(id: i64) -> Book {
    Book {
        id,
        title: format!("Book {id}"),
        summary: "A book about books".to_string(),
    }
}

fn mapper() -> Mapper {
    Mapper::new(vec![
        Relationship::multiple_composition::<MultipleComposingEntity, Book>().unwrap(),
    ])
}

fn sqlite() -> SqliteRepository {
    let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("migrations");
    let mut repo = SqliteRepository::in_memory(mapper()).unwrap();
    repo.apply_migrations(&migrations).unwrap();
    repo
}

fn backends() -> Vec<(&'static str, Box<dyn Repository>)> {
    vec![
        ("memory", Box::new(MemoryRepository::in_memory(mapper()))),
        ("sqlite", Box::new(sqlite())),
    ]
}

fn bench_add_and_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_and_commit");

    for batch_size in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        for (name, mut repo) in backends() {
            let mut next_id = 0;
            group.bench_with_input(BenchmarkId::new(name, batch_size), batch_size, |b, &size| {
                b.iter(|| {
                    for _ in 0..size {
                        repo.add(&book(next_id)).unwrap();
                        next_id += 1;
                    }
                    repo.commit().unwrap();
                });
            });
        }
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for (name, mut repo) in backends() {
        repo.add_all(&(0..100).map(book).collect::<Vec<_>>()).unwrap();
        repo.commit().unwrap();

        group.bench_function(BenchmarkId::new("plain", name), |b| {
            b.iter(|| black_box(repo.get::<Book>(black_box(42)).unwrap()));
        });
    }

    group.finish();
}

fn bench_composed_graphs(c: &mut Criterion) {
    let mut group = c.benchmark_group("composed_graphs");

    for books in [1, 10, 50].iter() {
        for (name, mut repo) in backends() {
            let entity = MultipleComposingEntity {
                id: 1,
                name: "shelf".to_string(),
                books: (0..*books).map(book).collect(),
            };
            repo.add(&entity).unwrap();
            repo.commit().unwrap();

            group.bench_with_input(BenchmarkId::new(name, books), books, |b, _| {
                b.iter(|| black_box(repo.get::<MultipleComposingEntity>(1).unwrap()));
            });
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_add_and_commit,
    bench_get,
    bench_composed_graphs
);
criterion_main!(benches);
