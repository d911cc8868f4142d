//! Timing wheel benchmarks.
//!
//! Measures scheduling, cancellation and tick throughput for wheels of
//! different geometries.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tempo_timer::{TimingWheel, TimingWheelConfig};

/// Wheel geometries to compare: (wheel_size, levels).
const GEOMETRIES: &[(usize, usize)] = &[(64, 4), (256, 4), (512, 3)];

fn wheel(wheel_size: usize, levels: usize) -> TimingWheel {
    let config = TimingWheelConfig::new(wheel_size, levels).with_max_timers(1_000_000);
    TimingWheel::new(config).expect("valid bench config")
}

/// Schedules timers spread across all levels, then ticks until they all fire.
fn bench_schedule_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_and_drain");
    let timers: u64 = 10_000;
    group.throughput(Throughput::Elements(timers));

    for &(size, levels) in GEOMETRIES {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{size}x{levels}")),
            &(size, levels),
            |b, &(size, levels)| {
                b.iter(|| {
                    let mut wheel = wheel(size, levels);
                    for i in 0..timers {
                        wheel
                            .schedule(format!("t{i}"), (i * 7) % 5_000, None)
                            .expect("schedule");
                    }
                    let mut fired = 0;
                    while wheel.pending_count() > 0 {
                        fired += wheel.tick().len();
                    }
                    black_box(fired)
                });
            },
        );
    }
    group.finish();
}

/// Schedules then cancels every timer.
fn bench_schedule_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_cancel");
    let timers: u64 = 10_000;
    group.throughput(Throughput::Elements(timers));

    group.bench_function("256x4", |b| {
        let ids: Vec<String> = (0..timers).map(|i| format!("t{i}")).collect();
        b.iter(|| {
            let mut wheel = wheel(256, 4);
            for (i, id) in ids.iter().enumerate() {
                wheel
                    .schedule(id.as_str(), i as u64 * 13, None)
                    .expect("schedule");
            }
            for id in &ids {
                black_box(wheel.cancel(id));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_schedule_and_drain, bench_schedule_cancel);
criterion_main!(benches);
