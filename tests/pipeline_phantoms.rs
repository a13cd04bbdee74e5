//! End-to-end pipeline runs over synthetic thorax phantoms.

mod common;

use common::*;
use tep_core::contrast::ContrastQuality;
use tep_core::pipeline::TepEngine;
use tep_core::scoring::FindingClass;
use tep_core::volume::vidx;

#[test]
fn test_annular_clot_yields_definite_finding() {
    init_tracing();
    let engine = TepEngine::new(phantom_config());
    let vol = annular_clot_phantom();
    let analysis = engine.run(&vol).unwrap();

    assert!(analysis.contrast.has_adequate_contrast);
    assert_eq!(analysis.contrast.quality, ContrastQuality::Optimal);
    assert!(!analysis.requires_manual_review);

    assert_eq!(analysis.findings.len(), 1);
    let f = &analysis.findings[0];
    assert_eq!(f.classification, FindingClass::Definite);

    // The anchor sits on clot-density material inside the clot slab,
    // never on the enhancing (saturated) center.
    let [x, y, z] = f.anchor;
    assert_eq!(vol.data[vidx(x, y, z, DIMS.0, DIMS.1)], HU_CLOT);
    assert!(CLOT_Z.contains(&z));

    // Ring volume, give or take bridge closing.
    assert!(f.num_voxels >= 40, "num_voxels = {}", f.num_voxels);
    assert!(f.num_voxels <= 600, "num_voxels = {}", f.num_voxels);
    assert!(f.channels.density > 0.0);

    assert!(analysis.burden.qanadli_score > 0.0);
    assert!(analysis.burden.obstruction_ratio > 0.0);
    assert!(analysis.burden.main_pa_involved);
    assert!(analysis.burden.uncertainty > 0.0);

    // Pseudocolor bands: thrombus at the anchor, contrast blood on the
    // artery axis.
    let anchor_idx = vidx(x, y, z, DIMS.0, DIMS.1);
    assert_eq!(analysis.density_bands[anchor_idx], 3);
    let axis_idx = vidx(AXIS.0, AXIS.1, 8, DIMS.0, DIMS.1);
    assert_eq!(analysis.density_bands[axis_idx], 4);

    // Mask outputs share the input frame and nest as expected.
    assert_eq!(analysis.domain_mask.len(), vol.len());
    for (idx, &v) in analysis.vessel_mask.iter().enumerate() {
        if v > 0 {
            assert!(analysis.domain_mask[idx] > 0, "vessel voxel outside domain");
        }
    }
    assert!(analysis.score_map[anchor_idx] >= 3.0);
    let radii = analysis.radius_map.as_ref().unwrap();
    assert!(radii.iter().any(|&r| r > 0.0));
}

#[test]
fn test_finding_voxels_avoid_air_and_saturation() {
    let engine = TepEngine::new(phantom_config());
    let vol = annular_clot_phantom();
    let analysis = engine.run(&vol).unwrap();

    let f = &analysis.findings[0];
    for &idx in &f.indices {
        assert!(vol.data[idx] > -500.0, "finding voxel in air: {}", vol.data[idx]);
    }
    let [x, y, z] = f.anchor;
    let anchor_hu = vol.data[vidx(x, y, z, DIMS.0, DIMS.1)];
    assert!(anchor_hu >= 30.0 && anchor_hu <= 100.0);

    // The saturated lumen shows up in the voxel rejection tallies.
    let saturated = analysis
        .voxel_filters
        .iter()
        .find(|t| t.filter == "saturation")
        .unwrap();
    assert!(saturated.rejected > 0);

    // Label map overlays exactly the member voxels of rank one.
    let labelled = analysis.label_map.iter().filter(|&&v| v == 1).count();
    assert_eq!(labelled, f.num_voxels);
}

#[test]
fn test_patent_artery_yields_no_findings() {
    let engine = TepEngine::new(phantom_config());
    let vol = patent_phantom();
    let analysis = engine.run(&vol).unwrap();

    assert!(analysis.findings.is_empty());
    assert_eq!(analysis.burden.qanadli_score, 0.0);
    assert_eq!(analysis.burden.obstruction_ratio, 0.0);
    assert_eq!(analysis.contrast.quality, ContrastQuality::Optimal);
    assert!(analysis.tree_components_kept >= 1);

    // A patent tree reads as resting hemodynamics.
    let hemo = &analysis.burden.hemodynamics;
    assert_eq!(hemo.mpap_mmhg, 14.0);
    assert_eq!(hemo.rv_strain, 0.0);
}

#[test]
fn test_unenhanced_scan_runs_clean() {
    let engine = TepEngine::new(phantom_config());
    let vol = no_contrast_phantom();
    let analysis = engine.run(&vol).unwrap();

    assert!(!analysis.contrast.has_adequate_contrast);
    assert_eq!(analysis.contrast.quality, ContrastQuality::Inadequate);
    assert!(analysis.findings.is_empty());
    assert_eq!(analysis.burden.total_volume_cm3, 0.0);
    assert_eq!(analysis.tree_components_kept, 0);
}

#[test]
fn test_occlusion_fragments_tree_and_flags_plug() {
    init_tracing();
    let engine = TepEngine::new(phantom_config());
    let vol = occluded_phantom();
    let analysis = engine.run(&vol).unwrap();

    // The plug severs the enhancing lumen into two kept fragments.
    assert!(analysis.tree_components_kept >= 2);

    assert!(!analysis.findings.is_empty());
    let f = &analysis.findings[0];
    assert_eq!(f.classification, FindingClass::Definite);
    let [x, y, z] = f.anchor;
    assert_eq!(vol.data[vidx(x, y, z, DIMS.0, DIMS.1)], HU_CLOT);
    assert!(OCCLUSION_Z.contains(&z));

    // All clot sits in the right hemithorax.
    assert!(analysis.burden.right_volume_cm3 > 0.0);
    assert_eq!(analysis.burden.left_volume_cm3, 0.0);

    // The solid plug encloses no air, so the bronchus check must not
    // swallow it even with parenchyma nearby. A substantial share of the
    // plug has to survive into the top finding.
    assert!(f.num_voxels >= 50, "num_voxels = {}", f.num_voxels);

    // Obstruction drives the descriptive hemodynamic proxies upward.
    let hemo = &analysis.burden.hemodynamics;
    assert!(hemo.mpap_mmhg > 14.0);
    assert!(hemo.resistance_index > 1.0);
}

#[test]
fn test_broken_worker_falls_back_to_skeleton() {
    let mut cfg = phantom_config();
    cfg.gate.worker_command = Some("/nonexistent/topology-worker".to_string());
    let engine = TepEngine::new(cfg);
    let vol = annular_clot_phantom();
    let analysis = engine.run(&vol).unwrap();

    assert!(analysis.topology_fallback);
    assert_eq!(analysis.findings.len(), 1);
}

#[test]
fn test_skeleton_fallback_is_the_default() {
    let engine = TepEngine::new(phantom_config());
    let analysis = engine.run(&annular_clot_phantom()).unwrap();
    assert!(analysis.topology_fallback);
    assert!(analysis.burden.uncertainty > 0.0);
}

#[test]
fn test_full_run_is_deterministic() {
    let engine = TepEngine::new(phantom_config());
    let vol = annular_clot_phantom();
    let a = engine.run(&vol).unwrap();
    let b = engine.run(&vol).unwrap();
    let ja = serde_json::to_string(&a).unwrap();
    let jb = serde_json::to_string(&b).unwrap();
    assert_eq!(ja, jb);
    assert_eq!(a.label_map, b.label_map);
}
