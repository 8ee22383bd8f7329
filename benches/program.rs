//! Criterion benchmarks for interpreted vs compiled evaluation.
//!
//! Run with:
//!   cargo bench
//!
//! Results are saved to target/criterion/

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gatenet::prelude::*;

/// Input -> memory (self-connected, gated) -> output, with a gate ensemble
/// as wide as the memory.
fn make_graph(width: usize, seed: u64) -> Graph {
    let mut c = Circuit::new(CircuitConfig::default().with_seed(seed));
    let input = c.add_ensemble(4);
    let gates = c.add_ensemble(width);
    let memory = c.add_ensemble(width);
    let output = c.add_ensemble(2);

    c.project_ensemble(input, gates, None, None).unwrap();
    c.project_ensemble(input, memory, None, None).unwrap();
    let recur = c.project_ensemble(memory, memory, None, None).unwrap();
    c.project_ensemble(memory, output, None, None).unwrap();
    c.gate_ensemble(gates, recur, GateKind::OneToOne).unwrap();

    Graph::new(c, Layers::new(input, vec![gates, memory], output)).unwrap()
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("step");
    let x = [1.0, 0.0, 0.5, -0.5];
    let t = [0.25, 0.75];

    for width in [8, 32, 128].iter() {
        group.throughput(Throughput::Elements(*width as u64));

        group.bench_with_input(BenchmarkId::new("interpreted", width), width, |b, &width| {
            let mut graph = make_graph(width, 42);
            graph.set_optimize(false);
            b.iter(|| {
                let y = graph.activate(black_box(&x)).unwrap();
                graph.propagate(0.1, &t).unwrap();
                black_box(y)
            });
        });

        group.bench_with_input(BenchmarkId::new("compiled", width), width, |b, &width| {
            let mut graph = make_graph(width, 42);
            graph.compile();
            b.iter(|| {
                let y = graph.activate(black_box(&x)).unwrap();
                graph.propagate(0.1, &t).unwrap();
                black_box(y)
            });
        });
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for width in [32, 128].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, &width| {
            let mut graph = make_graph(width, 7);
            b.iter(|| {
                graph.compile();
                black_box(graph.program().map(|p| p.memory().len()))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_step, bench_compile);
criterion_main!(benches);
