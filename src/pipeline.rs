//! End-to-end detection pipeline.
//!
//! [`TepEngine`] owns one frozen [`EngineConfig`] and exposes a single
//! [`TepEngine::run`] over a validated [`Volume`]. Stages run in a fixed
//! order: anatomical container, contrast verification and strategy
//! selection, vessel segmentation, cropped geometry, centerline
//! topology, voxel scoring, finding extraction and burden
//! quantification. Every adaptive decision taken along the way is
//! surfaced as a flag or tally on the [`Analysis`] rather than a
//! hidden branch, and identical input always yields an identical
//! result.
//!
//! Expensive geometry never runs at scan scale: all derivative fields
//! are computed inside the vessel bounding box (plus margin) and the
//! results mapped back afterwards.

use serde::Serialize;
use tracing::info;

use crate::config::EngineConfig;
use crate::contrast::{select_strategy, verify_contrast, ContrastReport};
use crate::domain::build_domain_mask;
use crate::error::EngineError;
use crate::geometry::coherence::compute_flow_coherence;
use crate::geometry::fractal::{hemithorax_fractal, FractalReport};
use crate::geometry::hessian::analyze_tensor_field;
use crate::geometry::texture::{local_anisotropy, local_kurtosis};
use crate::morphology::{dilate_iter, Connectivity};
use crate::quantify::{
    density_band_map, finding_label_map, quantify_burden, rank_findings, ClotBurden,
};
use crate::scoring::{extract_findings, score_voxels, FilterTally, Finding, ScoringInputs};
use crate::topology::{resolve_topology, LumenGate, TopologyRequest, TruncatedBranch};
use crate::vessels::segment_vessels;
use crate::volume::{vidx, BoundingBox, Volume};

/// Full result of one pipeline run. Anchors, indices and the label map
/// are all in the input volume's frame.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    /// Accepted findings, ordered by descending rescue value.
    pub findings: Vec<Finding>,
    pub burden: ClotBurden,
    pub contrast: ContrastReport,
    /// Safety erosion collapsed the container, or no lung was found.
    pub requires_manual_review: bool,
    pub z_crop_applied: bool,
    pub diaphragm_slice: Option<usize>,
    pub tree_components_total: usize,
    pub tree_components_kept: usize,
    /// Centerlines came from the built-in skeleton, not the worker.
    pub topology_fallback: bool,
    pub truncated_branches: Vec<TruncatedBranch>,
    pub branch_points: usize,
    pub fractal: FractalReport,
    pub voxel_filters: Vec<FilterTally>,
    pub cluster_filters: Vec<FilterTally>,
    /// Overlay labels, one value per finding in rank order.
    #[serde(skip)]
    pub label_map: Vec<u8>,
    /// Pseudocolor density bands for diagnostic overlay.
    #[serde(skip)]
    pub density_bands: Vec<u8>,
    /// Anatomical container, input frame.
    #[serde(skip)]
    pub domain_mask: Vec<u8>,
    /// Segmented vessel tree, input frame.
    #[serde(skip)]
    pub vessel_mask: Vec<u8>,
    /// Per-voxel evidence score, input frame, zero outside the crop.
    #[serde(skip)]
    pub score_map: Vec<f64>,
    /// Centerline radii in mm at centerline voxels, present when a
    /// topology was resolved.
    #[serde(skip)]
    pub radius_map: Option<Vec<f64>>,
}

/// The detection engine. Construct once, run many volumes.
pub struct TepEngine {
    config: EngineConfig,
}

impl Default for TepEngine {
    fn default() -> Self {
        TepEngine::new(EngineConfig::default())
    }
}

impl TepEngine {
    pub fn new(config: EngineConfig) -> Self {
        TepEngine { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, vol: &Volume) -> Result<Analysis, EngineError> {
        let cfg = &self.config;
        let (nx, ny, nz) = vol.dims;
        info!(dims = ?vol.dims, spacing = ?vol.spacing, "pipeline start");

        // Stage 1: anatomical container.
        let domain = build_domain_mask(vol, &cfg.domain);

        // Stage 2: contrast verification, sampled where the arteries
        // can actually be: the container reached into the hilum.
        let sample_region = if domain.final_voxels > 0 {
            dilate_iter(
                &domain.mask,
                nx,
                ny,
                nz,
                cfg.vessels.lung_dilate_iters,
                Connectivity::Six,
            )
        } else {
            vec![1u8; vol.len()]
        };
        let sampled: Vec<f64> = vol
            .data
            .iter()
            .zip(sample_region.iter())
            .filter(|(_, &m)| m > 0)
            .map(|(&v, _)| v)
            .collect();
        let contrast = verify_contrast(&sampled, &cfg.vessels);
        let strategy = select_strategy(&contrast, &cfg.vessels, &cfg.scoring);

        // Stage 3: vessel tree.
        let tree = segment_vessels(vol, &domain, &strategy, &cfg.vessels);
        let candidates: Vec<u8> = tree
            .mask
            .iter()
            .zip(tree.shadow.iter())
            .map(|(&m, &s)| if m > 0 || s > 0 { 1 } else { 0 })
            .collect();

        let bbox = match BoundingBox::of_mask(&candidates, nx, ny, nz) {
            Some(bb) => bb.expanded(cfg.geometry.bbox_margin, nx, ny, nz),
            None => {
                info!("no vascular candidates; returning empty analysis");
                return Ok(self.empty_analysis(vol, &domain, &tree, contrast));
            }
        };
        let (bnx, bny, bnz) = bbox.dims();
        info!(bbox = ?bbox, "geometry frame cropped");

        // Stage 4: geometry inside the crop.
        let hu_c = bbox.crop_f64(&vol.data, nx, ny);
        let vessel_c = bbox.crop_u8(&tree.mask, nx, ny);
        let candidates_c = bbox.crop_u8(&candidates, nx, ny);
        let bone_c: Vec<u8> = hu_c
            .iter()
            .map(|&v| if v >= cfg.domain.bone_min_hu { 1 } else { 0 })
            .collect();

        let tensors = analyze_tensor_field(&hu_c, bnx, bny, bnz, &cfg.geometry);
        let coherence = compute_flow_coherence(
            &hu_c,
            bnx,
            bny,
            bnz,
            &bone_c,
            &tensors.bright_tube,
            vol.spacing,
            &cfg.geometry,
        );
        let kurtosis = local_kurtosis(&hu_c, bnx, bny, bnz, &cfg.geometry);
        let anisotropy = local_anisotropy(&hu_c, bnx, bny, bnz, &cfg.geometry);

        // Stage 5: centerline topology and the lumen gate.
        let request = TopologyRequest {
            mask: &vessel_c,
            dims: (bnx, bny, bnz),
            spacing: vol.spacing,
        };
        let (topology, topology_fallback) = resolve_topology(&request, &cfg.gate)?;
        let gate = LumenGate::build(&topology, (bnx, bny, bnz), vol.spacing, &cfg.gate);
        let branch_points = topology.branch_point_count((bnx, bny, bnz));

        // Stage 6: scoring and finding extraction.
        let inputs = ScoringInputs {
            hu: &hu_c,
            candidates: &candidates_c,
            vessel_mask: &vessel_c,
            bone_mask: &bone_c,
            tensors: &tensors,
            coherence: &coherence,
            kurtosis: &kurtosis,
            anisotropy: &anisotropy,
            gate: gate.as_ref(),
            dims: (bnx, bny, bnz),
            spacing: vol.spacing,
        };
        let field = score_voxels(&inputs, &strategy, &cfg.scoring);
        let (mut findings, cluster_filters) =
            extract_findings(&inputs, &field, &cfg.scoring, &cfg.geometry);

        // Back to the input frame.
        let to_full = |idx: usize| {
            let k = idx / (bnx * bny);
            let rem = idx % (bnx * bny);
            vidx(bbox.x0 + rem % bnx, bbox.y0 + rem / bnx, bbox.z0 + k, nx, ny)
        };
        for f in &mut findings {
            f.anchor = [
                f.anchor[0] + bbox.x0,
                f.anchor[1] + bbox.y0,
                f.anchor[2] + bbox.z0,
            ];
            for idx in &mut f.indices {
                *idx = to_full(*idx);
            }
        }
        rank_findings(&mut findings);

        let truncated_branches: Vec<TruncatedBranch> = topology
            .truncated_branches
            .iter()
            .map(|t| TruncatedBranch {
                voxel: [
                    t.voxel[0] + bbox.x0,
                    t.voxel[1] + bbox.y0,
                    t.voxel[2] + bbox.z0,
                ],
                branch_id: t.branch_id,
            })
            .collect();

        // Stage 7: burden and scan-level annotations.
        let burden = quantify_burden(
            &findings,
            &tree.mask,
            vol.dims,
            vol.spacing,
            &contrast,
            topology_fallback,
            tree.kept_components,
            &cfg.scoring,
        );
        let fractal = hemithorax_fractal(&tree.mask, nx, ny, nz, vol.spacing, &cfg.geometry);
        let label_map = finding_label_map(&findings, vol.dims);
        let density_bands = density_band_map(&vol.data, &cfg.vessels, &cfg.scoring);

        let mut score_map = vec![0.0f64; vol.len()];
        for (idx, &s) in field.score.iter().enumerate() {
            if s > 0.0 {
                score_map[to_full(idx)] = s;
            }
        }
        let radius_map = if topology.is_empty() {
            None
        } else {
            let mut radii = vec![0.0f64; vol.len()];
            for (&idx, &r) in topology.centerline_points.iter().zip(topology.radii_mm.iter()) {
                radii[to_full(idx)] = r;
            }
            Some(radii)
        };

        info!(
            findings = findings.len(),
            qanadli = burden.qanadli_score,
            topology_fallback,
            "pipeline complete"
        );
        Ok(Analysis {
            findings,
            burden,
            contrast,
            requires_manual_review: domain.requires_manual_review,
            z_crop_applied: domain.z_crop_applied,
            diaphragm_slice: domain.diaphragm_slice,
            tree_components_total: tree.total_components,
            tree_components_kept: tree.kept_components,
            topology_fallback,
            truncated_branches,
            branch_points,
            fractal,
            voxel_filters: field.voxel_filters,
            cluster_filters,
            label_map,
            density_bands,
            domain_mask: domain.mask,
            vessel_mask: tree.mask,
            score_map,
            radius_map,
        })
    }

    /// Result for a scan with no detectable vascular tree: structurally
    /// complete, everything empty, nothing errored.
    fn empty_analysis(
        &self,
        vol: &Volume,
        domain: &crate::domain::DomainMask,
        tree: &crate::vessels::VesselTree,
        contrast: ContrastReport,
    ) -> Analysis {
        let burden = quantify_burden(
            &[],
            &tree.mask,
            vol.dims,
            vol.spacing,
            &contrast,
            false,
            tree.kept_components,
            &self.config.scoring,
        );
        let (nx, ny, nz) = vol.dims;
        Analysis {
            findings: Vec::new(),
            burden,
            contrast,
            requires_manual_review: domain.requires_manual_review,
            z_crop_applied: domain.z_crop_applied,
            diaphragm_slice: domain.diaphragm_slice,
            tree_components_total: tree.total_components,
            tree_components_kept: tree.kept_components,
            topology_fallback: false,
            truncated_branches: Vec::new(),
            branch_points: 0,
            fractal: hemithorax_fractal(
                &tree.mask,
                nx,
                ny,
                nz,
                vol.spacing,
                &self.config.geometry,
            ),
            voxel_filters: Vec::new(),
            cluster_filters: Vec::new(),
            label_map: vec![0u8; vol.len()],
            density_bands: density_band_map(&vol.data, &self.config.vessels, &self.config.scoring),
            domain_mask: domain.mask.clone(),
            vessel_mask: tree.mask.clone(),
            score_map: vec![0.0; vol.len()],
            radius_map: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn air_volume(n: usize) -> Volume {
        Volume::new(vec![-1000.0; n * n * n], (n, n, n), (1.0, 1.0, 1.0)).unwrap()
    }

    #[test]
    fn test_air_scan_yields_empty_analysis_without_error() {
        let engine = TepEngine::default();
        let vol = air_volume(16);
        let analysis = engine.run(&vol).unwrap();

        assert!(analysis.findings.is_empty());
        assert!(!analysis.contrast.has_adequate_contrast);
        assert_eq!(analysis.burden.total_volume_cm3, 0.0);
        assert_eq!(analysis.burden.qanadli_score, 0.0);
        assert!(analysis.label_map.iter().all(|&v| v == 0));

        // Mask and map outputs are frame-sized even with nothing found.
        assert_eq!(analysis.domain_mask.len(), vol.len());
        assert_eq!(analysis.vessel_mask.len(), vol.len());
        assert_eq!(analysis.score_map.len(), vol.len());
        assert!(analysis.score_map.iter().all(|&s| s == 0.0));
        assert!(analysis.radius_map.is_none());
    }

    #[test]
    fn test_water_scan_yields_empty_analysis() {
        // Uniform soft tissue: no lung seed, flagged for review, no
        // vessels, no findings.
        let n = 16;
        let engine = TepEngine::default();
        let vol = Volume::new(vec![40.0; n * n * n], (n, n, n), (1.0, 1.0, 1.0)).unwrap();
        let analysis = engine.run(&vol).unwrap();

        assert!(analysis.findings.is_empty());
        assert!(analysis.requires_manual_review);
    }

    #[test]
    fn test_engine_config_is_frozen() {
        let mut cfg = EngineConfig::default();
        cfg.scoring.definite_threshold = 9.0;
        let engine = TepEngine::new(cfg);
        assert_eq!(engine.config().scoring.definite_threshold, 9.0);
        // Mutating the original after construction has no effect.
        assert_eq!(engine.config().scoring.saturation_hu, 220.0);
    }

    #[test]
    fn test_empty_runs_are_deterministic() {
        let engine = TepEngine::default();
        let vol = air_volume(12);
        let a = engine.run(&vol).unwrap();
        let b = engine.run(&vol).unwrap();
        let ja = serde_json::to_string(&a).unwrap();
        let jb = serde_json::to_string(&b).unwrap();
        assert_eq!(ja, jb);
    }
}
