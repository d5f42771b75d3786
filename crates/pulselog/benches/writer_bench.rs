//! Writer hot-path benchmarks
//!
//! Measures the per-frame cost of the logging operations a real-time audio
//! callback would issue. A drainer thread keeps the ring from pinning the
//! producer against stale bytes, mirroring the intended deployment.
//!
//! Run with: cargo bench --bench writer_bench

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use pulselog::{ByteFifo, LogArg, Reader, Writer};

fn bench_primitive_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitive_frames");
    group.throughput(Throughput::Elements(1));

    let fifo = Arc::new(ByteFifo::new(1 << 20));
    let writer = Writer::new(Arc::clone(&fifo));
    let reader = Reader::new(Arc::clone(&fifo));

    group.bench_function("log_integer", |b| {
        let mut x = 0i32;
        b.iter(|| {
            writer.log_integer(black_box(x));
            x = x.wrapping_add(1);
        });
        let _ = reader.snapshot();
    });

    group.bench_function("log_string_16b", |b| {
        b.iter(|| writer.log(black_box("xrun recovered!!")));
        let _ = reader.snapshot();
    });

    group.bench_function("log_hist_ts", |b| {
        b.iter(|| writer.log_hist_ts(black_box(0xFEED)));
        let _ = reader.snapshot();
    });

    group.finish();
}

fn bench_format_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_records");
    group.throughput(Throughput::Elements(1));

    let fifo = Arc::new(ByteFifo::new(1 << 20));
    let writer = Writer::new(Arc::clone(&fifo));
    let reader = Reader::new(Arc::clone(&fifo));

    group.bench_function("two_args", |b| {
        b.iter(|| {
            writer.log_format(
                black_box("frames=%d load=%f"),
                0xDEAD_0001,
                &[LogArg::Int(256), LogArg::Float(0.37)],
            );
        });
        let _ = reader.snapshot();
    });

    group.bench_function("disabled_no_op", |b| {
        let disabled = Writer::disabled();
        b.iter(|| {
            disabled.log_format(
                black_box("frames=%d"),
                0xDEAD_0002,
                &[LogArg::Int(1)],
            );
        });
    });

    group.finish();
}

criterion_group!(benches, bench_primitive_frames, bench_format_records);
criterion_main!(benches);
