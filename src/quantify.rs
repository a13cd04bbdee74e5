//! Clot burden quantification.
//!
//! Turns the accepted findings into scan-level numbers: total and
//! per-hemithorax clot volume, the obstruction ratio against the
//! segmented tree, a Qanadli-style severity index, and a composite
//! measurement uncertainty reflecting how degraded the inputs were.

use serde::Serialize;
use tracing::info;

use crate::config::{ScoringParams, VesselParams};
use crate::contrast::{ContrastQuality, ContrastReport};
use crate::morphology::mask_volume;
use crate::scoring::Finding;

/// Scan-level burden summary.
#[derive(Debug, Clone, Serialize)]
pub struct ClotBurden {
    pub total_volume_cm3: f64,
    /// Split at the x midline.
    pub left_volume_cm3: f64,
    pub right_volume_cm3: f64,
    /// Clot volume inside the central mediastinal block (middle thirds
    /// of x and z), where the main pulmonary arteries run.
    pub central_volume_cm3: f64,
    pub main_pa_involved: bool,
    /// Clot voxels over segmented-tree voxels.
    pub obstruction_ratio: f64,
    /// `min(obstruction_ratio * qanadli_max, qanadli_max)`.
    pub qanadli_score: f64,
    /// One-sigma relative uncertainty on the volumes.
    pub uncertainty: f64,
    pub hemodynamics: HemodynamicProxies,
}

/// Descriptive hemodynamic proxies derived from aggregate obstruction.
/// Rough triage numbers, not predictions.
#[derive(Debug, Clone, Serialize)]
pub struct HemodynamicProxies {
    /// Mean pulmonary arterial pressure estimate in mmHg. Linear in the
    /// obstruction ratio from a 14 mmHg resting baseline.
    pub mpap_mmhg: f64,
    /// Vascular resistance relative to the patent tree. Grows
    /// hyperbolically as the effective cross-section closes.
    pub resistance_index: f64,
    /// Right-ventricular strain surrogate in [0, 1], ramping once the
    /// pressure proxy exceeds the 20 mmHg hypertension threshold.
    pub rv_strain: f64,
}

pub fn hemodynamic_proxies(obstruction_ratio: f64) -> HemodynamicProxies {
    let obstruction = obstruction_ratio.clamp(0.0, 1.0);
    let mpap_mmhg = 14.0 + 30.0 * obstruction;
    let resistance_index = 1.0 / (1.0 - obstruction).max(0.05);
    let rv_strain = ((mpap_mmhg - 20.0) / 20.0).clamp(0.0, 1.0);
    HemodynamicProxies {
        mpap_mmhg,
        resistance_index,
        rv_strain,
    }
}

/// Composite relative uncertainty. Three independent error terms are
/// combined in quadrature: contrast quality, centerline provenance, and
/// tree fragmentation.
pub fn measurement_uncertainty(
    contrast: &ContrastReport,
    topology_fallback: bool,
    tree_fragments: usize,
) -> f64 {
    let eps_contrast = match contrast.quality {
        ContrastQuality::Optimal => 0.05,
        ContrastQuality::Good => 0.08,
        ContrastQuality::Suboptimal => 0.15,
        ContrastQuality::Inadequate => 0.25,
    };
    let eps_topology = if topology_fallback { 0.15 } else { 0.05 };
    let eps_fragmentation =
        (0.05 * tree_fragments.saturating_sub(1) as f64).min(0.20);
    (eps_contrast * eps_contrast
        + eps_topology * eps_topology
        + eps_fragmentation * eps_fragmentation)
        .sqrt()
}

/// Aggregate the findings against the vessel tree.
#[allow(clippy::too_many_arguments)]
pub fn quantify_burden(
    findings: &[Finding],
    vessel_mask: &[u8],
    dims: (usize, usize, usize),
    spacing: (f64, f64, f64),
    contrast: &ContrastReport,
    topology_fallback: bool,
    tree_fragments: usize,
    params: &ScoringParams,
) -> ClotBurden {
    let (nx, ny, nz) = dims;
    let voxel_mm3 = spacing.0 * spacing.1 * spacing.2;
    let mid_x = nx / 2;
    let (cx0, cx1) = (nx / 3, 2 * nx / 3);
    let (cz0, cz1) = (nz / 3, 2 * nz / 3);

    let mut total = 0usize;
    let mut left = 0usize;
    let mut central = 0usize;
    for f in findings {
        for &idx in &f.indices {
            let k = idx / (nx * ny);
            let i = idx % (nx * ny) % nx;
            total += 1;
            if i < mid_x {
                left += 1;
            }
            if (cx0..cx1).contains(&i) && (cz0..cz1).contains(&k) {
                central += 1;
            }
        }
    }
    let right = total - left;

    let tree_voxels = mask_volume(vessel_mask);
    let obstruction_ratio = if tree_voxels > 0 {
        total as f64 / tree_voxels as f64
    } else {
        0.0
    };
    let qanadli_score = (obstruction_ratio * params.qanadli_max).min(params.qanadli_max);

    let mm3_to_cm3 = 1e-3;
    let burden = ClotBurden {
        total_volume_cm3: total as f64 * voxel_mm3 * mm3_to_cm3,
        left_volume_cm3: left as f64 * voxel_mm3 * mm3_to_cm3,
        right_volume_cm3: right as f64 * voxel_mm3 * mm3_to_cm3,
        central_volume_cm3: central as f64 * voxel_mm3 * mm3_to_cm3,
        main_pa_involved: central > 0,
        obstruction_ratio,
        qanadli_score,
        uncertainty: measurement_uncertainty(contrast, topology_fallback, tree_fragments),
        hemodynamics: hemodynamic_proxies(obstruction_ratio),
    };
    info!(
        total_cm3 = burden.total_volume_cm3,
        qanadli = burden.qanadli_score,
        "clot burden quantified"
    );
    burden
}

/// Clinical priority of a finding: bulk weighted by its peak evidence.
pub fn rescue_value(finding: &Finding) -> f64 {
    finding.volume_mm3 * finding.peak_score
}

/// Sort findings by descending rescue value, anchor as the tiebreak.
pub fn rank_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        rescue_value(b)
            .partial_cmp(&rescue_value(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.anchor.cmp(&b.anchor))
    });
}

/// Label map for overlay rendering: background 0, then one label per
/// finding in rank order. Labels saturate at 255.
pub fn finding_label_map(findings: &[Finding], dims: (usize, usize, usize)) -> Vec<u8> {
    let (nx, ny, nz) = dims;
    let mut map = vec![0u8; nx * ny * nz];
    for (rank, f) in findings.iter().enumerate() {
        let label = (rank + 1).min(255) as u8;
        for &idx in &f.indices {
            map[idx] = label;
        }
    }
    map
}

/// Pseudocolor density bands for overlay rendering: 1 air/lung, 2 soft
/// tissue, 3 thrombus-range, 4 contrast blood, 5 bone-range, 0 for the
/// gaps between bands.
pub fn density_band_map(
    hu: &[f64],
    vessels: &VesselParams,
    scoring: &ScoringParams,
) -> Vec<u8> {
    hu.iter()
        .map(|&v| {
            if (-1000.0..=-400.0).contains(&v) {
                1
            } else if (-100.0..30.0).contains(&v) {
                2
            } else if v >= scoring.thrombus_min_hu && v <= scoring.thrombus_max_hu {
                3
            } else if v >= vessels.contrast_min_hu && v <= vessels.contrast_max_hu {
                4
            } else if v > vessels.contrast_max_hu {
                5
            } else {
                0
            }
        })
        .collect()
}
