// ========================================================================================
//
//                 Standardize fit and replay benchmark
//
// ========================================================================================
//
// Measures fitting a mixed-model formula with continuous, grouped, factor and
// polynomial terms, and replaying the fitted transforms on a fresh table of
// the same size.
//
// ========================================================================================

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use standardize::{Column, PredictOptions, StandardizeOptions, Table, standardize};

// --- Benchmark Tuning Parameters ---

/// Row counts to benchmark.
const ROW_COUNTS: [usize; 3] = [1_000, 10_000, 100_000];
/// Number of distinct subjects in the grouping column.
const NUM_SUBJECTS: usize = 40;

const FORMULA: &str =
    "rt ~ log(freq) * vowel + scale_by(dur ~ subj) + poly(age, 3) + (1 + log(freq) | subj)";

fn simulate_table(rows: usize, seed: u64) -> Table {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 50.0).unwrap();
    let vowels = ["a", "e", "i", "o", "u"];

    let mut rt = Vec::with_capacity(rows);
    let mut freq = Vec::with_capacity(rows);
    let mut dur = Vec::with_capacity(rows);
    let mut age = Vec::with_capacity(rows);
    let mut vowel = Vec::with_capacity(rows);
    let mut subj = Vec::with_capacity(rows);
    for _ in 0..rows {
        let f: f64 = rng.gen_range(1.0..500.0);
        let subject = rng.gen_range(0..NUM_SUBJECTS);
        freq.push(f);
        dur.push(rng.gen_range(80.0..300.0) + subject as f64 * 3.0);
        age.push(rng.gen_range(18.0..80.0));
        vowel.push(Some(vowels[rng.gen_range(0..vowels.len())].to_string()));
        subj.push(Some(format!("s{subject:02}")));
        rt.push(700.0 - 25.0 * f.ln() + noise.sample(&mut rng));
    }

    Table::from_columns(vec![
        ("rt", Column::numeric(rt)),
        ("freq", Column::numeric(freq)),
        ("dur", Column::numeric(dur)),
        ("age", Column::numeric(age)),
        ("vowel", Column::Text(vowel)),
        ("subj", Column::Text(subj)),
    ])
    .unwrap()
}

fn benchmark_standardize(c: &mut Criterion) {
    let options = StandardizeOptions::default().with_scale(0.5);

    let mut group = c.benchmark_group("standardize");
    for &rows in ROW_COUNTS.iter() {
        let training = simulate_table(rows, 0x5EED + rows as u64);
        let fresh = simulate_table(rows, 0xF00D + rows as u64);
        let model = standardize(FORMULA, &training, &options).unwrap();
        group.throughput(Throughput::Elements(rows as u64));

        group.bench_with_input(BenchmarkId::new("fit", rows), &training, |b, data| {
            b.iter(|| {
                let model = standardize(black_box(FORMULA), black_box(data), &options).unwrap();
                black_box(model);
            });
        });

        group.bench_with_input(BenchmarkId::new("predict", rows), &fresh, |b, data| {
            b.iter(|| {
                let out = model.predict(black_box(data), PredictOptions::all()).unwrap();
                black_box(out);
            });
        });
    }
    group.finish();
}

criterion_group!(standardize_benchmark, benchmark_standardize);
criterion_main!(standardize_benchmark);
