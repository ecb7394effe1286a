use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use voxgate::decoder::extract::{ExtractOptions, ResultExtractor};
use voxgate::engine::lattice::{Lattice, LatticeArc, LatticeBuilder, LatticeWeight, ScoreScale};
use voxgate::engine::symbols::SymbolTable;

/// Alternatives per word slot.
const WIDTH: u32 = 4;

/// A confusion-network lattice: `slots` positions, `WIDTH` competing words each.
fn sausage(slots: usize) -> Lattice {
    let mut builder = LatticeBuilder::new();
    let mut state = builder.add_state();
    for slot in 0..slots {
        let next = builder.add_state();
        for alt in 0..WIDTH {
            let word = 1 + (slot as u32 * WIDTH + alt) % 1000;
            let weight = LatticeWeight::new(0.1 * alt as f32, 1.0 + 0.25 * alt as f32);
            builder.add_arc(state, LatticeArc::new(word, weight, 30, next));
        }
        state = next;
    }
    builder.set_final(state, LatticeWeight::default());
    builder.build().unwrap_or_else(|e| panic!("invalid bench lattice: {}", e))
}

fn symbols() -> SymbolTable {
    let words: Vec<String> = (0..=1000).map(|i| format!("w{}", i)).collect();
    SymbolTable::from_pairs(words.iter().enumerate().map(|(i, w)| (w.as_str(), i as u32)))
}

fn bench_search(c: &mut Criterion) {
    let scale = ScoreScale { lm: 10.0, acoustic: 1.0 };
    let mut group = c.benchmark_group("lattice");

    for slots in [10usize, 50, 200] {
        let lattice = sausage(slots);
        group.bench_with_input(BenchmarkId::new("shortest_path", slots), &lattice, |b, l| {
            b.iter(|| black_box(l.shortest_path(scale)))
        });
        group.bench_with_input(BenchmarkId::new("n_best_10", slots), &lattice, |b, l| {
            b.iter(|| black_box(l.n_best(10, scale)))
        });
        group.bench_with_input(BenchmarkId::new("posteriors", slots), &lattice, |b, l| {
            b.iter(|| black_box(l.posteriors(scale)))
        });
    }
    group.finish();
}

fn bench_extraction(c: &mut Criterion) {
    let symbols = symbols();
    let extractor = ResultExtractor::new(
        &symbols,
        ExtractOptions {
            scale: ScoreScale { lm: 10.0, acoustic: 1.0 },
            word_alignment: true,
            confidence_floor: None,
            frame_shift_secs: 0.01,
        },
    );
    let lattice = sausage(50);

    c.bench_function("final_results_single_best", |b| {
        b.iter(|| black_box(extractor.final_results(&lattice, 1)))
    });
    c.bench_function("final_results_nbest_10", |b| {
        b.iter(|| black_box(extractor.final_results(&lattice, 10)))
    });
}

criterion_group!(benches, bench_search, bench_extraction);
criterion_main!(benches);
