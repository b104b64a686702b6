/*!
 * Admission and Dispatch Benchmarks
 *
 * Response-time analysis cost against task-set size, and one simulated
 * period of a loaded reserve set
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mixed_trust_kernel::scheduler::Simulation;
use mixed_trust_kernel::{admit_in, ReserveSpec, TaskParams};

fn task_set(size: usize) -> Vec<TaskParams> {
    (0..size)
        .map(|id| {
            let period_ns = 1_000_000 * (id as u64 + 1);
            TaskParams {
                id,
                period_ns,
                exec_ns: period_ns / (4 * size as u64),
                nominal_exec_ns: period_ns / (8 * size as u64),
                criticality: (id % 3) as u32 + 1,
            }
        })
        .collect()
}

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");

    for size in [4usize, 16, 64] {
        let set = task_set(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &set, |b, set| {
            b.iter(|| {
                for candidate in set {
                    black_box(admit_in(black_box(set), candidate));
                }
            });
        });
    }

    group.finish();
}

fn bench_simulated_period(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulated_period");

    for size in [4usize, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut sim = Simulation::new().unwrap();
                for i in 0..size {
                    let pid = i as i32 + 1;
                    sim.spawn_task(pid);
                    let spec = ReserveSpec::new(1_000_000 * (i as u64 + 1), 20_000, 1);
                    let rid = sim.call(|core| core.create_reserve(&spec)).unwrap();
                    sim.call(|core| core.attach_reserve(rid, pid)).unwrap();
                }
                black_box(sim.run_until(4_000_000).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_admission, bench_simulated_period);
criterion_main!(benches);
