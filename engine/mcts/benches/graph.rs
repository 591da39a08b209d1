//! Search-graph benchmarks for performance profiling.
//!
//! Run with: `cargo bench -p mcts-graph`
//!
//! These benchmarks measure:
//! - Child realisation (inline and dynamic storage)
//! - The visit protocol (claim, finalize) along a descent
//! - Transposition-table churn with maintenance

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use engine_board::{Move, MoveList};
use mcts_graph::{LowNode, NNEval, NodeTree};

/// A low node with `n` synthetic edges carrying distinct priors.
fn evaluated_low(n: usize) -> LowNode {
    let moves: MoveList = (0..n)
        .map(|i| {
            let from = (i % 64) as u8;
            let to = ((i * 7 + 1) % 64) as u8;
            Move::new(
                engine_board::Square::from_index(from),
                engine_board::Square::from_index(to),
                engine_board::Promotion::None,
            )
        })
        .collect();
    let mut eval = NNEval::uniform(&moves);
    for (i, edge) in eval.edges.iter_mut().enumerate() {
        edge.set_p((n - i) as f32 / (n * (n + 1) / 2) as f32);
    }
    let mut low = LowNode::new();
    low.set_nn_eval(&eval);
    low
}

fn bench_child_realisation(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_child_realisation");

    for num_edges in [2usize, 8, 32, 128] {
        group.throughput(Throughput::Elements(num_edges as u64));
        group.bench_with_input(
            BenchmarkId::new("insert_all", num_edges),
            &num_edges,
            |b, &num_edges| {
                b.iter(|| {
                    let low = evaluated_low(num_edges);
                    for index in 0..num_edges as u16 {
                        black_box(low.insert_child_at(index));
                    }
                    low
                });
            },
        );
    }

    group.finish();
}

fn bench_visit_protocol(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_visit_protocol");
    let visits = 1000u32;
    group.throughput(Throughput::Elements(visits as u64));

    group.bench_function("claim_finalize_round", |b| {
        let low = evaluated_low(32);
        let child = low.insert_child_at(0);
        b.iter(|| {
            for i in 0..visits {
                assert!(child.try_start_score_update());
                low.increment_n_in_flight(1);
                let v = (i % 7) as f32 / 7.0 - 0.5;
                child.finalize_score_update(v, 0.1, 20.0, 1);
                low.finalize_score_update(-v, 0.1, 21.0, 1);
            }
            black_box(child.get_n())
        });
    });

    group.bench_function("visited_walk", |b| {
        let low = evaluated_low(64);
        for index in 0..16u16 {
            let child = low.insert_child_at(index);
            child.increment_n_in_flight(1);
            child.finalize_score_update(0.0, 0.0, 1.0, 1);
        }
        b.iter(|| black_box(low.visited_children().count()));
    });

    group.finish();
}

fn bench_tt_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_tt_churn");
    let entries = 4096u64;
    group.throughput(Throughput::Elements(entries));

    group.bench_function("create_then_evict", |b| {
        let moves: MoveList = [Move::from_uci("e2e4").unwrap()].into_iter().collect();
        b.iter(|| {
            let mut tree = NodeTree::new();
            for hash in 0..entries {
                let (low, created) = tree.tt_get_or_create(hash);
                if created {
                    low.set_nn_eval(&NNEval::uniform(&moves));
                }
            }
            // Nothing references the entries, so maintenance drops it all.
            tree.tt_maintenance();
            black_box(tree.tt_len())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_child_realisation, bench_visit_protocol, bench_tt_churn);
criterion_main!(benches);
