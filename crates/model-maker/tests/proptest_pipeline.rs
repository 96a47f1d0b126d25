//! Property-based tests for label selection, step budgets, color tables and
//! the surface stages.
//!
//! Run with: cargo test -p model-maker -- proptest

use std::path::Path;

use model_maker::histogram::LabelHistogram;
use model_maker::isosurface::extract_label;
use model_maker::{
    DecimateParams, LabelColorTable, LabelSelector, ModelMaker, ModelMakerParams, NoOpProgressReporter,
    ScalarType, ScalarVolume, SceneTarget, SelectionMode, StepBudget, decimate_mesh,
};
use nalgebra::Matrix4;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

/// A small volume of random labels in `0..max_label`.
fn arb_volume(max_label: i32) -> impl Strategy<Value = ScalarVolume> {
    prop::collection::vec(0..max_label, 4 * 4 * 4).prop_map(|values| {
        ScalarVolume::new([4, 4, 4], values, ScalarType::U8, Matrix4::identity()).unwrap()
    })
}

/// Color table names that survive the text encoding.
fn arb_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]([a-zA-Z0-9 _]{0,10}[a-zA-Z0-9_])?"
}

fn arb_color_table() -> impl Strategy<Value = LabelColorTable> {
    prop::collection::btree_map(0..500i32, (arb_name(), prop::array::uniform4(any::<u8>())), 0..20)
        .prop_map(|entries| {
            let mut table = LabelColorTable::new();
            for (label, (name, rgba)) in entries {
                table.insert(label, name, rgba.map(|c| c as f64 / 255.0));
            }
            table
        })
}

/// An ellipsoid label in a 20³ volume.
fn ellipsoid(radii: [f64; 3]) -> ScalarVolume {
    ScalarVolume::from_fn([20, 20, 20], ScalarType::U8, Matrix4::identity(), |i, j, k| {
        let d = [i, j, k]
            .iter()
            .zip(radii)
            .map(|(&c, r)| ((c as f64 - 9.5) / r).powi(2))
            .sum::<f64>();
        if d <= 1.0 { 1 } else { 0 }
    })
    .unwrap()
}

// =============================================================================
// Label selection
// =============================================================================

proptest! {
    /// Explicit labels come back sorted without duplicates.
    #[test]
    fn proptest_explicit_selection_sorted(labels in prop::collection::vec(0..100i32, 1..20)) {
        let set = LabelSelector::select(&labels, -1, -1, false).unwrap();
        prop_assert_eq!(set.mode, SelectionMode::Explicit);
        prop_assert!(set.labels.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(labels.iter().all(|l| set.labels.contains(l)));
        prop_assert_eq!(set.multiple, set.labels.len() > 1);
        prop_assert_eq!(set.labels_min, set.labels[0]);
        prop_assert_eq!(set.labels_max, *set.labels.last().unwrap());
    }

    /// A valid range selects every label from start to end.
    #[test]
    fn proptest_range_selection(start in 0..50i32, len in 0..20i32) {
        let end = start + len;
        let set = LabelSelector::select(&[], start, end, false).unwrap();
        prop_assert_eq!(set.mode, SelectionMode::Range);
        prop_assert_eq!(set.labels, (start..=end).collect::<Vec<_>>());
        prop_assert_eq!(set.multiple, end > start);
    }

    /// A reversed range is not a selection.
    #[test]
    fn proptest_reversed_range_rejected(start in 1..50i32, gap in 1..20i32) {
        prop_assert!(LabelSelector::select(&[], start, start - gap, false).is_err());
    }

    /// Resolving `All` keeps only the labels present in the volume, and
    /// never the background.
    #[test]
    fn proptest_all_mode_counts_present_labels(volume in arb_volume(6)) {
        let histogram = LabelHistogram::build(&volume, 255);
        let mut set = LabelSelector::select(&[], -1, -1, true).unwrap();
        match set.resolve_all(&histogram) {
            Ok(present) => {
                prop_assert!(!set.labels.contains(&0));
                let expected = set.labels.iter().filter(|&&l| volume.count_label(l) > 0).count();
                prop_assert_eq!(present, expected);
                prop_assert!(present > 0);
            }
            Err(_) => prop_assert!(volume.data().iter().all(|&v| v == 0)),
        }
    }
}

// =============================================================================
// Step budgets
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The total is the singleton steps plus a fixed share per label.
    #[test]
    fn proptest_budget_total(
        labels in 0..50usize,
        multiple in any::<bool>(),
        joint in any::<bool>(),
        save in any::<bool>(),
    ) {
        let budget = StepBudget::new(labels, multiple, joint, save);
        prop_assert_eq!(budget.total(), budget.singleton + labels as u64 * budget.per_label());
        prop_assert!(budget.per_label() >= StepBudget::JOINT_REPEATED_STEPS);
        prop_assert!(budget.per_label() <= StepBudget::REPEATED_STEPS + 3);
        prop_assert_eq!(budget.with_labels(labels + 1).total(), budget.total() + budget.per_label());
    }

    /// A finished run takes exactly the steps it budgeted, whatever labels
    /// are requested.
    #[test]
    fn proptest_run_uses_whole_budget(
        labels in prop::collection::vec(1..5i32, 1..4),
        joint in any::<bool>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let volume = ScalarVolume::from_fn([10, 6, 6], ScalarType::U8, Matrix4::identity(), |i, j, k| {
            let inner = (1..=4).contains(&j) && (1..=4).contains(&k);
            match i {
                1..=3 if inner => 1,
                5..=8 if inner => 3,
                _ => 0,
            }
        })
        .unwrap();
        let params = ModelMakerParams {
            labels,
            joint_smoothing: joint,
            skip_unnamed: false,
            smooth: 2,
            ..Default::default()
        };
        let target = SceneTarget::parse(dir.path().join("s.mrml").to_str().unwrap());
        let report = ModelMaker::new(params)
            .unwrap()
            .run_volume(volume, &target, &NoOpProgressReporter)
            .unwrap();
        prop_assert_eq!(report.steps, report.total_steps);
        for made in &report.made {
            prop_assert!(made.label == 1 || made.label == 3);
        }
    }
}

// =============================================================================
// Color tables
// =============================================================================

proptest! {
    /// The text form keeps every name and 8-bit color.
    #[test]
    fn proptest_color_table_text_round_trip(table in arb_color_table()) {
        let parsed = LabelColorTable::parse_text(&table.to_text(), Path::new("colors.txt")).unwrap();
        prop_assert_eq!(parsed, table);
    }

    #[test]
    fn proptest_color_table_csv_round_trip(table in arb_color_table()) {
        let parsed = LabelColorTable::parse_csv(&table.to_csv(), Path::new("colors.csv")).unwrap();
        prop_assert_eq!(parsed, table);
    }
}

// =============================================================================
// Decimation
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Asking for more reduction never leaves more triangles.
    #[test]
    fn proptest_decimation_monotonic(
        rx in 4.0..8.0f64,
        ry in 4.0..8.0f64,
        rz in 4.0..8.0f64,
        low in 0.0..0.45f64,
        extra in 0.05..0.5f64,
    ) {
        let mesh = extract_label(&ellipsoid([rx, ry, rz]), 1);
        prop_assume!(!mesh.is_empty());
        let light = decimate_mesh(&mesh, &DecimateParams::with_target_reduction(low));
        let heavy = decimate_mesh(&mesh, &DecimateParams::with_target_reduction(low + extra));
        prop_assert!(heavy.final_triangles <= light.final_triangles);
        prop_assert!(light.final_triangles <= mesh.face_count());
        prop_assert!(heavy.mesh.validate().is_ok());
    }
}
