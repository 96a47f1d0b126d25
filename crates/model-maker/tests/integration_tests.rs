//! End-to-end tests for model-maker.
//!
//! These run the whole pipeline, from a label volume on disk to model files
//! and the scene that lists them.

use std::path::Path;

use model_maker::scene::NodeKind;
use model_maker::{
    FilterType, LabelColorTable, ModelError, ModelMaker, ModelMakerParams, NoOpProgressReporter,
    RecordingProgressReporter, RunReport, ScalarType, ScalarVolume, Scene, SceneTarget,
    SkipReason, SurfaceMesh,
};
use nalgebra::{Matrix4, Vector4};
use tempfile::tempdir;

/// Labels 1, 2 and 5 as separate blocks along i, with background around
/// them. Labels 3 and 4 are absent.
fn three_blocks(ijk_to_ras: Matrix4<f64>) -> ScalarVolume {
    ScalarVolume::from_fn([16, 8, 8], ScalarType::I16, ijk_to_ras, |i, j, k| {
        if !(2..=5).contains(&j) || !(2..=5).contains(&k) {
            return 0;
        }
        match i {
            1..=3 => 1,
            5..=7 => 2,
            9..=11 => 5,
            _ => 0,
        }
    })
    .unwrap()
}

fn run_in(dir: &Path, volume: ScalarVolume, params: ModelMakerParams) -> RunReport {
    let target = SceneTarget::parse(dir.join("scene.mrml").to_str().unwrap());
    ModelMaker::new(params)
        .unwrap()
        .run_volume(volume, &target, &NoOpProgressReporter)
        .unwrap()
}

fn load_model(report: &RunReport, label: i32) -> SurfaceMesh {
    let artifact = report.made.iter().find(|m| m.label == label).unwrap();
    SurfaceMesh::load(&artifact.path).unwrap()
}

// =============================================================================
// Label selection scenarios
// =============================================================================

#[test]
fn test_generate_all_visits_observed_labels() {
    let dir = tempdir().unwrap();
    let params = ModelMakerParams {
        generate_all: true,
        skip_unnamed: false,
        ..Default::default()
    };
    let report = run_in(dir.path(), three_blocks(Matrix4::identity()), params);

    // Background is never made; absent labels in the range are skipped.
    assert_eq!(report.made_labels(), vec![1, 2, 5]);
    assert_eq!(report.skipped_labels(), vec![3, 4]);
    assert!(report.skipped.iter().all(|s| s.reason == SkipReason::NoVoxels));
    assert_eq!(report.total_steps, 4 + 3 * 9);
    assert_eq!(report.steps, report.total_steps);

    for label in [1, 2, 5] {
        let name = format!("Model_{}", label);
        assert!(dir.path().join(format!("{}.vtk", name)).exists());
    }
}

#[test]
fn test_explicit_label_without_voxels_is_skipped() {
    let dir = tempdir().unwrap();
    let params = ModelMakerParams {
        labels: vec![1, 2, 4],
        skip_unnamed: false,
        ..Default::default()
    };
    let report = run_in(dir.path(), three_blocks(Matrix4::identity()), params);
    assert_eq!(report.made_labels(), vec![1, 2]);
    assert_eq!(report.skipped_labels(), vec![4]);
    assert_eq!(report.skipped[0].reason, SkipReason::NoVoxels);
    // Skipped explicit labels still use up their share of the budget.
    assert_eq!(report.steps, report.total_steps);
}

#[test]
fn test_single_explicit_label_is_a_single_run() {
    let dir = tempdir().unwrap();
    let params = ModelMakerParams {
        labels: vec![5],
        name: "Kidney".into(),
        ..Default::default()
    };
    let report = run_in(dir.path(), three_blocks(Matrix4::identity()), params);
    assert_eq!(report.made_labels(), vec![5]);
    assert_eq!(report.made[0].name, "Kidney");
    assert_eq!(report.total_steps, 1 + 9);
    assert!(dir.path().join("Kidney.vtk").exists());
}

#[test]
fn test_one_label_range_matches_explicit_label() {
    let explicit_dir = tempdir().unwrap();
    let range_dir = tempdir().unwrap();
    let explicit = run_in(
        explicit_dir.path(),
        three_blocks(Matrix4::identity()),
        ModelMakerParams {
            labels: vec![2],
            ..Default::default()
        },
    );
    let range = run_in(
        range_dir.path(),
        three_blocks(Matrix4::identity()),
        ModelMakerParams {
            start_label: 2,
            end_label: 2,
            ..Default::default()
        },
    );

    assert_eq!(range.made_labels(), vec![2]);
    assert_eq!(range.total_steps, explicit.total_steps);
    assert_eq!(range.made[0].name, explicit.made[0].name);

    let a = load_model(&explicit, 2);
    let b = load_model(&range, 2);
    assert_eq!(a.faces, b.faces);
    for (va, vb) in a.vertices.iter().zip(&b.vertices) {
        assert_eq!(va.position, vb.position);
    }
}

#[test]
fn test_no_selection_is_an_error() {
    let dir = tempdir().unwrap();
    let target = SceneTarget::parse(dir.path().join("scene.mrml").to_str().unwrap());
    let err = ModelMaker::new(ModelMakerParams::default())
        .unwrap()
        .run_volume(three_blocks(Matrix4::identity()), &target, &NoOpProgressReporter)
        .unwrap_err();
    assert!(matches!(err, ModelError::NoLabels { .. }));
}

// =============================================================================
// Smoothing and orientation scenarios
// =============================================================================

#[test]
fn test_single_sinc_iteration_runs_as_two() {
    let one_dir = tempdir().unwrap();
    let two_dir = tempdir().unwrap();
    let params = |smooth| ModelMakerParams {
        labels: vec![1],
        smooth,
        filter_type: FilterType::Sinc,
        ..Default::default()
    };
    let one = run_in(one_dir.path(), three_blocks(Matrix4::identity()), params(1));
    let two = run_in(two_dir.path(), three_blocks(Matrix4::identity()), params(2));

    let a = load_model(&one, 1);
    let b = load_model(&two, 1);
    assert_eq!(a.faces, b.faces);
    for (va, vb) in a.vertices.iter().zip(&b.vertices) {
        assert_eq!(va.position, vb.position);
    }
}

#[test]
fn test_mirrored_volume_keeps_outward_winding() {
    let straight_dir = tempdir().unwrap();
    let mirrored_dir = tempdir().unwrap();
    let params = || ModelMakerParams {
        generate_all: true,
        skip_unnamed: false,
        ..Default::default()
    };
    let mirror = Matrix4::from_diagonal(&Vector4::new(1.0, -1.0, 1.0, 1.0));
    let straight = run_in(straight_dir.path(), three_blocks(Matrix4::identity()), params());
    let mirrored = run_in(mirrored_dir.path(), three_blocks(mirror), params());

    assert_eq!(straight.made_labels(), mirrored.made_labels());
    for label in straight.made_labels() {
        let a = load_model(&straight, label);
        let b = load_model(&mirrored, label);
        // The mirror flips handedness, so the faces were reversed to keep
        // them pointing out of the structure.
        assert!(a.signed_volume() > 0.0, "label {}", label);
        assert!(b.signed_volume() > 0.0, "label {}", label);
        approx::assert_relative_eq!(a.signed_volume(), b.signed_volume(), max_relative = 1e-6);
    }
}

#[test]
fn test_laplacian_and_joint_runs() {
    let dir = tempdir().unwrap();
    let params = ModelMakerParams {
        generate_all: true,
        joint_smoothing: true,
        skip_unnamed: false,
        filter_type: FilterType::Laplacian,
        ..Default::default()
    };
    let report = run_in(dir.path(), three_blocks(Matrix4::identity()), params);
    assert_eq!(report.made_labels(), vec![1, 2, 5]);
    assert_eq!(report.total_steps, 4 + 3 * 7);
    for label in [1, 2, 5] {
        let mesh = load_model(&report, label);
        assert!(mesh.face_count() > 0);
        assert!(mesh.validate().is_ok());
    }
}

// =============================================================================
// Files on disk
// =============================================================================

#[test]
fn test_run_from_nrrd_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("seg.nrrd");
    three_blocks(Matrix4::identity()).save(&input).unwrap();

    let params = ModelMakerParams {
        labels: vec![1, 2],
        skip_unnamed: false,
        scene: Some(dir.path().join("out/seg.mrml").to_str().unwrap().to_string()),
        ..Default::default()
    };
    let recorder = RecordingProgressReporter::new();
    let report = ModelMaker::new(params).unwrap().run(&input, &recorder).unwrap();

    assert_eq!(report.made_labels(), vec![1, 2]);
    assert!(dir.path().join("out/Model_1.vtk").exists());
    assert!(dir.path().join("out/Model_2.vtk").exists());

    let scene = Scene::load(&report.scene).unwrap();
    assert_eq!(scene.nodes_of_kind(NodeKind::Model).count(), 2);
    assert_eq!(scene.nodes_of_kind(NodeKind::Storage).count(), 2);

    let events = recorder.events();
    assert!(events.iter().any(|e| e.2 == "Marching Cubes Model_1"));
    assert!(events.iter().any(|e| e.2 == "Write Model_2"));
    let fractions: Vec<u64> = events.iter().map(|e| e.0).collect();
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_missing_input_file() {
    let dir = tempdir().unwrap();
    let params = ModelMakerParams {
        labels: vec![1],
        scene: Some(dir.path().join("out.mrml").to_str().unwrap().to_string()),
        ..Default::default()
    };
    let err = ModelMaker::new(params)
        .unwrap()
        .run(&dir.path().join("absent.nrrd"), &NoOpProgressReporter)
        .unwrap_err();
    assert!(matches!(err, ModelError::IoRead { .. }));
    assert!(err.kind().is_fatal());
}

#[test]
fn test_color_table_names_and_colors() {
    let dir = tempdir().unwrap();
    let mut colors = LabelColorTable::new();
    colors.insert(0, "background", [0.0, 0.0, 0.0, 0.0]);
    colors.insert(1, "liver", [1.0, 1.0, 0.0, 1.0]);
    colors.insert(2, "left kidney", [0.0, 0.0, 1.0, 1.0]);
    colors.insert(5, "spleen", [0.0, 1.0, 0.0, 1.0]);
    let table_path = dir.path().join("colors.txt");
    colors.save(&table_path).unwrap();
    assert_eq!(LabelColorTable::load(&table_path).unwrap(), colors);

    let params = ModelMakerParams {
        generate_all: true,
        name: "Abdomen".into(),
        color_table: Some(table_path),
        ..Default::default()
    };
    let report = run_in(dir.path(), three_blocks(Matrix4::identity()), params);
    let names: Vec<&str> = report.made.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Abdomen_1_liver", "Abdomen_2_left_kidney", "Abdomen_5_spleen"]
    );
    assert_eq!(report.made[1].color, [0.0, 0.0, 1.0]);

    let scene = Scene::load(&report.scene).unwrap();
    let display = scene
        .nodes_of_kind(NodeKind::Display)
        .find(|n| n.get("color") == Some("0 0 1"));
    assert!(display.is_some());
}

#[test]
fn test_models_added_to_existing_scene_hierarchy() {
    let dir = tempdir().unwrap();
    let first = run_in(
        dir.path(),
        three_blocks(Matrix4::identity()),
        ModelMakerParams {
            labels: vec![1],
            name: "First".into(),
            ..Default::default()
        },
    );
    let scene = Scene::load(&first.scene).unwrap();
    let root_id = scene
        .nodes_of_kind(NodeKind::Hierarchy)
        .next()
        .unwrap()
        .id()
        .to_string();

    let target = SceneTarget::parse(&format!("{}#{}", first.scene.display(), root_id));
    let second = ModelMaker::new(ModelMakerParams {
        labels: vec![2],
        name: "Second".into(),
        ..Default::default()
    })
    .unwrap()
    .run_volume(three_blocks(Matrix4::identity()), &target, &NoOpProgressReporter)
    .unwrap();

    let scene = Scene::load(&second.scene).unwrap();
    assert_eq!(scene.nodes_of_kind(NodeKind::Model).count(), 2);
    assert!(scene.first_node_by_name("First").is_some());
    assert!(scene.first_node_by_name("Second").is_some());
}
