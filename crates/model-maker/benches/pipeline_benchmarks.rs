//! Benchmarks for the surface stages and whole runs.
//!
//! Run with: cargo bench -p model-maker
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p model-maker -- --save-baseline main
//! 2. After changes: cargo bench -p model-maker -- --baseline main

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use model_maker::isosurface::{extract_label, extract_labels};
use model_maker::{
    DecimateParams, ModelMaker, ModelMakerParams, NoOpProgressReporter, NormalsParams, ScalarType,
    ScalarVolume, SceneTarget, SmoothParams, build_strips, compute_normals, decimate_mesh,
    smooth_mesh,
};
use nalgebra::Matrix4;

// =============================================================================
// Test Volume Generation
// =============================================================================

/// A ball of label 1 filling most of an `n`³ volume.
fn create_ball(n: usize) -> ScalarVolume {
    let center = (n as f64 - 1.0) / 2.0;
    let radius = n as f64 * 0.4;
    ScalarVolume::from_fn([n, n, n], ScalarType::U8, Matrix4::identity(), |i, j, k| {
        let d = ((i as f64 - center).powi(2) + (j as f64 - center).powi(2) + (k as f64 - center).powi(2)).sqrt();
        if d <= radius { 1 } else { 0 }
    })
    .expect("ball volume")
}

/// The ball split in two labels along i, so the halves share a boundary.
fn create_split_ball(n: usize) -> ScalarVolume {
    let ball = create_ball(n);
    ScalarVolume::from_fn([n, n, n], ScalarType::U8, Matrix4::identity(), |i, j, k| {
        match ball.value(i, j, k) {
            0 => 0,
            _ if i < n / 2 => 1,
            _ => 2,
        }
    })
    .expect("split ball volume")
}

// =============================================================================
// Stage Benchmarks
// =============================================================================

fn bench_isosurface(c: &mut Criterion) {
    let mut group = c.benchmark_group("Isosurface");

    for n in [16, 32, 48] {
        let volume = create_ball(n);
        group.throughput(Throughput::Elements(volume.voxel_count() as u64));
        group.bench_with_input(BenchmarkId::new("single_label", n), &volume, |b, volume| {
            b.iter(|| extract_label(black_box(volume), 1))
        });
    }

    let split = create_split_ball(32);
    group.bench_function("two_labels_joint", |b| {
        b.iter(|| extract_labels(black_box(&split), &[1, 2]))
    });

    group.finish();
}

fn bench_decimation(c: &mut Criterion) {
    let mut group = c.benchmark_group("Decimation");
    group.sample_size(20); // Decimation is slower, reduce samples

    for n in [16, 32] {
        let mesh = extract_label(&create_ball(n), 1);
        group.throughput(Throughput::Elements(mesh.faces.len() as u64));
        for reduction in [0.25, 0.75] {
            let params = DecimateParams::with_target_reduction(reduction);
            group.bench_with_input(
                BenchmarkId::new(format!("reduce_{}pct", (reduction * 100.0) as u32), n),
                &mesh,
                |b, mesh| b.iter(|| decimate_mesh(black_box(mesh), black_box(&params))),
            );
        }
    }

    group.finish();
}

fn bench_smoothing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Smoothing");

    let mesh = extract_label(&create_ball(32), 1);
    group.throughput(Throughput::Elements(mesh.vertices.len() as u64));

    for (name, params) in [
        ("sinc_10", SmoothParams::sinc(10)),
        ("sinc_30", SmoothParams::sinc(30)),
        ("laplacian_10", SmoothParams::laplacian(10)),
    ] {
        group.bench_with_input(BenchmarkId::new(name, 32), &mesh, |b, mesh| {
            b.iter(|| smooth_mesh(black_box(mesh), black_box(&params)))
        });
    }

    let joint = extract_labels(&create_split_ball(32), &[1, 2]);
    let params = SmoothParams::joint(10);
    group.bench_function("joint_10", |b| {
        b.iter(|| smooth_mesh(black_box(&joint), black_box(&params)))
    });

    group.finish();
}

fn bench_normals_and_strips(c: &mut Criterion) {
    let mut group = c.benchmark_group("Finishing");

    let mesh = smooth_mesh(&extract_label(&create_ball(32), 1), &SmoothParams::sinc(10));
    group.throughput(Throughput::Elements(mesh.faces.len() as u64));

    let params = NormalsParams::default();
    group.bench_function("point_normals_split", |b| {
        b.iter(|| compute_normals(black_box(&mesh), black_box(&params)))
    });

    let normals = compute_normals(&mesh, &params);
    group.bench_function("strips", |b| {
        b.iter(|| build_strips(black_box(&normals.mesh), None))
    });

    group.finish();
}

// =============================================================================
// Whole Runs
// =============================================================================

fn bench_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("Run");
    group.sample_size(10);

    let temp_dir = std::env::temp_dir().join("model_maker_bench");
    let target = SceneTarget::parse(temp_dir.join("bench.mrml").to_str().unwrap_or("bench.mrml"));

    for (name, joint) in [("per_label", false), ("joint", true)] {
        let params = ModelMakerParams {
            generate_all: true,
            joint_smoothing: joint,
            skip_unnamed: false,
            ..Default::default()
        };
        let maker = ModelMaker::new(params).expect("valid params");
        let volume = create_split_ball(24);
        group.bench_function(name, |b| {
            b.iter(|| {
                maker
                    .run_volume(black_box(volume.clone()), &target, &NoOpProgressReporter)
                    .expect("run")
            })
        });
    }

    group.finish();
    let _ = std::fs::remove_dir_all(&temp_dir);
}

// =============================================================================
// Criterion Setup
// =============================================================================

criterion_group!(
    benches,
    bench_isosurface,
    bench_decimation,
    bench_smoothing,
    bench_normals_and_strips,
    bench_runs,
);

criterion_main!(benches);
