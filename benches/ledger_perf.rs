mod fixtures;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use chama::amortization;
use chama::model::InterestType;
use chama::penalty;
use chama::waterfall;

use fixtures::{LARGE, MEDIUM, SMALL, build_simulation, day, seeded_group};

// ── Group 1: allocate — the payment waterfall in isolation ──────────────────

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");
    let count = 100_000u64;
    group.throughput(Throughput::Elements(count));
    group.bench_function("mixed_payments", |b| {
        b.iter(|| {
            for i in 0..count {
                std::hint::black_box(waterfall::allocate(i % 25_000, (i * 7) % 3_000, 10_000));
            }
        })
    });
    group.finish();
}

// ── Group 2: schedule — amortization table length scaling ───────────────────

fn bench_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");
    for method in [InterestType::FlatRate, InterestType::ReducingBalance] {
        for &months in &[6u32, 12, 24] {
            group.bench_with_input(
                BenchmarkId::new(method.as_str(), months),
                &months,
                |b, &n| b.iter(|| amortization::schedule(1_000_000, 2.5, n, method)),
            );
        }
    }
    group.finish();
}

// ── Group 3: penalty_check — member count scaling ───────────────────────────

fn bench_penalty_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("penalty_check");
    for &members in &[10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, &n| {
            b.iter_batched(
                || seeded_group(n),
                |(store, g)| penalty::run_penalty_check(&store, g.id, day(2025, 1, 11)),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 4: full_run — end-to-end simulation ───────────────────────────────

fn bench_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_run");
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        if name == "large" {
            group.sample_size(10);
        }
        group.throughput(Throughput::Elements(scenario.members as u64 * scenario.months as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter_batched(|| build_simulation(scenario, 42), |mut sim| sim.run(), BatchSize::LargeInput)
        });
    }
    group.finish();
}

criterion_group!(benches, bench_allocate, bench_schedule, bench_penalty_check, bench_full_run);
criterion_main!(benches);
