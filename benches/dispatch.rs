use cinderkv::config::config_in;
use cinderkv::{DataStore, Dispatcher, DispatcherConfig, PersistenceManager};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tempfile::tempdir;

fn bench_set_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.bench_function("set_get_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let cfg = config_in(dir.path());
                let persistence = PersistenceManager::new(cfg);
                persistence.start().unwrap();
                std::mem::forget(dir);
                (Dispatcher::new(DispatcherConfig::default()), DataStore::new(), persistence)
            },
            |(dispatcher, mut store, persistence)| {
                for i in 0..1000u32 {
                    let key = format!("k{i}");
                    let value = format!("v{i}");
                    dispatcher.dispatch(&mut store, &persistence, "SET", &[key.clone(), value]);
                    dispatcher.dispatch(&mut store, &persistence, "GET", &[key]);
                }
                black_box(store.len())
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_set_get);
criterion_main!(benches);
