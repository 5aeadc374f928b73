use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mill_stream::{
    buffer::BufferPool,
    continuation::{CallbackTable, ContinuationTable},
    EventLoop, Value,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

fn bench_pipe_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipe_roundtrip");

    for size in [64usize, 4096, 65536] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let event_loop = EventLoop::default();
            let streams = event_loop.streams();
            let (left, right) = event_loop.pipe_pair(false).unwrap();

            let received = Arc::new(AtomicUsize::new(0));
            let counter = received.clone();
            streams
                .read_start(
                    &right,
                    Box::new(move |args| {
                        if let [Value::Nil, Value::Bytes(data)] = args.as_slice() {
                            counter.fetch_add(data.len(), Ordering::Relaxed);
                        }
                    }),
                )
                .unwrap();

            let payload = vec![0xabu8; size];
            b.iter(|| {
                let target = received.load(Ordering::Relaxed) + size;
                streams.write(&left, &payload, None).unwrap();
                while received.load(Ordering::Relaxed) < target {
                    event_loop.run_once(Some(Duration::from_millis(1))).unwrap();
                }
                black_box(received.load(Ordering::Relaxed));
            });
        });
    }
    group.finish();
}

fn bench_continuation_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("continuation_table");
    let table = CallbackTable::new();

    group.bench_function("register_invoke_release", |b| {
        b.iter(|| {
            let callback = table.register(Box::new(|args| {
                black_box(args);
            }));
            table.invoke(callback, vec![Value::Nil]).unwrap();
            black_box(table.release(callback));
        });
    });
    group.finish();
}

fn bench_buffer_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool");

    group.bench_function("pooled_acquire", |b| {
        let pool = BufferPool::new(16);
        b.iter(|| {
            let buf = pool.acquire(black_box(65536));
            black_box(buf.len());
        });
    });

    group.bench_function("direct_alloc", |b| {
        b.iter(|| {
            let buf = vec![0u8; black_box(65536)];
            black_box(buf.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_pipe_roundtrip,
    bench_continuation_table,
    bench_buffer_pool
);
criterion_main!(benches);
