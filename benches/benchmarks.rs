use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::{Duration, Instant};
use uq_ensemble::{CovarianceMatrix, DiagnosticsSink, DrawRequest, Ensemble, NamedMatrix, RandomDrawEngine, SamplingContext};

#[derive(Clone, Copy, Debug)]
enum CovarianceShape {
    Diagonal,
    /// Exponential correlation with the given length scale (in variable index units).
    Correlated(f64),
}

struct RawBenchDataPoint {
    scenario_name: String,
    num_reals: usize,
    num_vars: usize,
    grouped: bool,
    iteration_idx: u64,
    time_sec: f64,
}

fn var_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("P{:05}", i)).collect()
}

fn build_covariance(names: &[String], shape: CovarianceShape) -> CovarianceMatrix {
    let n = names.len();
    match shape {
        CovarianceShape::Diagonal => {
            CovarianceMatrix::from_variances(names.to_vec(), ndarray::Array1::from_elem(n, 2.0)).unwrap()
        }
        CovarianceShape::Correlated(length) => {
            let dense = Array2::from_shape_fn((n, n), |(i, j)| {
                let d = (i as f64 - j as f64).abs();
                2.0 * (-d / length).exp()
            });
            let matrix = NamedMatrix::from_dense(names.to_vec(), names.to_vec(), &dense).unwrap();
            CovarianceMatrix::from_named_matrix(matrix).unwrap()
        }
    }
}

/// Consecutive groups of `size` names.
fn chunked_groups(names: &[String], size: usize) -> Vec<(String, Vec<String>)> {
    names
        .chunks(size)
        .enumerate()
        .map(|(g, chunk)| (format!("G{}", g), chunk.to_vec()))
        .collect()
}

fn time_one_draw(
    engine: &RandomDrawEngine,
    num_reals: usize,
    cov: &CovarianceMatrix,
    names: &[String],
    groups: &[(String, Vec<String>)],
    seed: u64,
) -> f64 {
    let center: HashMap<String, f64> = names.iter().map(|n| (n.clone(), 1.0)).collect();
    let request = DrawRequest {
        num_reals,
        covariance: cov,
        center: &center,
        var_names: names,
        draw_names: names,
        groups,
    };
    let mut ctx = SamplingContext::new(seed);
    let mut sink = DiagnosticsSink::new(0, std::env::temp_dir());
    let start = Instant::now();
    let drawn = engine.draw(&request, &mut ctx, &mut sink).unwrap();
    let elapsed = start.elapsed().as_secs_f64();
    std::hint::black_box(drawn);
    elapsed
}

fn write_raw_data_to_tsv(data: &[RawBenchDataPoint], path: &str) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "scenario\tnum_reals\tnum_vars\tgrouped\titeration\ttime_sec")?;
    for p in data {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{:.6}",
            p.scenario_name, p.num_reals, p.num_vars, p.grouped, p.iteration_idx, p.time_sec
        )?;
    }
    writer.flush()
}

fn draw_benchmarks(c: &mut Criterion) {
    let mut all_raw_data = Vec::<RawBenchDataPoint>::new();
    let engine = RandomDrawEngine::default();

    let scenarios = vec![
        ("Diag-Small", 100, 50, CovarianceShape::Diagonal, None),
        ("Diag-Wide", 500, 5000, CovarianceShape::Diagonal, None),
        ("Full-Small", 100, 50, CovarianceShape::Correlated(5.0), None),
        ("Full-Medium", 300, 400, CovarianceShape::Correlated(20.0), None),
        ("Grouped-Medium", 300, 400, CovarianceShape::Correlated(20.0), Some(50)),
        ("Grouped-Wide", 300, 2000, CovarianceShape::Correlated(20.0), Some(100)),
    ];

    for (name, num_reals, num_vars, shape, group_size) in scenarios {
        let names = var_names(num_vars);
        let cov = build_covariance(&names, shape);
        let groups = group_size.map(|s| chunked_groups(&names, s)).unwrap_or_default();

        let mut group = c.benchmark_group(format!("draw/{}", name));
        group.sample_size(if num_vars >= 2000 { 10 } else { 30 });
        group.throughput(Throughput::Elements((num_reals * num_vars) as u64));
        let id = BenchmarkId::new("draw", format!("{}_r{}_v{}", name, num_reals, num_vars));
        group.bench_with_input(id, &cov, |b, cov| {
            b.iter_custom(|iters| {
                let mut total = Duration::new(0, 0);
                for i in 0..iters {
                    let t = time_one_draw(&engine, num_reals, cov, &names, &groups, 1234 + i);
                    total += Duration::from_secs_f64(t);
                    all_raw_data.push(RawBenchDataPoint {
                        scenario_name: name.to_string(),
                        num_reals,
                        num_vars,
                        grouped: !groups.is_empty(),
                        iteration_idx: i,
                        time_sec: t,
                    });
                }
                total
            });
        });
        group.finish();
    }

    if let Err(e) = write_raw_data_to_tsv(&all_raw_data, "benchmark_raw_results.tsv") {
        eprintln!("Failed to write raw benchmark data to TSV: {}", e);
    }
}

fn io_benchmarks(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let names = var_names(1000);
    let reals: Vec<String> = (0..200).map(|i| i.to_string()).collect();
    let values = Array2::from_shape_fn((200, 1000), |(i, j)| (i * 1000 + j) as f64 * 1e-3);
    let ensemble = Ensemble::from_array(reals, names, values).unwrap();

    let mut group = c.benchmark_group("ensemble_io");
    group.sample_size(20);
    group.throughput(Throughput::Elements(200 * 1000));
    let binary = dir.path().join("bench.jcb");
    group.bench_function("to_binary", |b| b.iter(|| ensemble.to_binary(&binary).unwrap()));
    group.bench_function("from_binary", |b| b.iter(|| Ensemble::from_binary(&binary, false).unwrap()));
    let csv = dir.path().join("bench.csv");
    group.bench_function("to_csv", |b| b.iter(|| ensemble.to_csv(&csv).unwrap()));
    group.bench_function("from_csv", |b| b.iter(|| Ensemble::from_csv(&csv).unwrap()));
    group.finish();
}

criterion_group!(benches, draw_benchmarks, io_benchmarks);
criterion_main!(benches);
