use criterion::{Criterion, criterion_group, criterion_main};
use grpc_connpool::{ChannelPool, Pool, PoolConfiguration};
use std::hint::black_box;
use std::thread;

fn pool(max_cap: usize) -> ChannelPool<u64> {
    ChannelPool::new(
        PoolConfiguration::new()
            .with_initial_cap(max_cap)
            .with_max_idle(max_cap)
            .with_max_cap(max_cap)
            .with_create(|| Ok(0))
            .with_destroy(|_| Ok(())),
    )
    .unwrap()
}

fn bench_get_put(c: &mut Criterion) {
    let pool = pool(16);
    c.bench_function("get_put_idle", |b| {
        b.iter(|| {
            let conn = pool.get().unwrap();
            pool.put(black_box(conn)).unwrap();
        })
    });

    c.bench_function("get_put_guarded", |b| {
        b.iter(|| {
            let conn = pool.get_guarded().unwrap();
            black_box(*conn);
        })
    });
}

fn bench_contended(c: &mut Criterion) {
    let pool = pool(4);
    c.bench_function("get_put_8_threads_cap_4", |b| {
        b.iter(|| {
            thread::scope(|scope| {
                for _ in 0..8 {
                    scope.spawn(|| {
                        for _ in 0..100 {
                            let conn = pool.get().unwrap();
                            pool.put(conn).unwrap();
                        }
                    });
                }
            });
        })
    });
}

criterion_group!(benches, bench_get_put, bench_contended);
criterion_main!(benches);
