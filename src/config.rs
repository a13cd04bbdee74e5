//! Engine configuration.
//!
//! Every threshold, weight and iteration count used by the pipeline lives
//! here in one immutable struct, grouped per stage. `Default` carries the
//! reference parameterization; callers may deserialize an override from
//! JSON and pass it to [`crate::pipeline::TepEngine::new`]. Nothing in
//! the pipeline mutates the configuration after construction.

use serde::{Deserialize, Serialize};

/// Top-level configuration passed through the whole pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub domain: DomainMaskParams,
    pub vessels: VesselParams,
    pub geometry: GeometryParams,
    pub gate: GateParams,
    pub scoring: ScoringParams,
}

/// Domain-mask construction (anatomical container).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainMaskParams {
    /// Air/lung seed window in HU.
    pub air_seed_min_hu: f64,
    pub air_seed_max_hu: f64,
    /// Minimum voxel count for seed fragments.
    pub seed_min_object: usize,
    /// Physical closing radius (mm) used to derive the adaptive
    /// iteration count `max(closing_min_iters, radius / spacing_x)`.
    pub closing_radius_mm: f64,
    pub closing_min_iters: usize,
    /// Scale applied on top of the adaptive count.
    pub closing_scale: f64,
    /// Soft-tissue window monitored while expanding toward the diaphragm.
    pub soft_tissue_min_hu: f64,
    pub soft_tissue_max_hu: f64,
    /// Slab soft-tissue ratio at which axial expansion stops.
    pub diaphragm_stop_ratio: f64,
    /// A slice is anatomically active when its lung area is at least
    /// this fraction of the maximum slice area...
    pub z_crop_area_fraction: f64,
    /// ...or at least this many voxels.
    pub z_crop_min_voxels: usize,
    /// Margin kept beyond the active range, in slices.
    pub z_crop_margin_slices: usize,
    /// Dilation toward the hilum, iterations.
    pub hilar_dilate_iters: usize,
    /// Bone threshold (HU) and exclusion dilation (mm).
    pub bone_min_hu: f64,
    pub bone_dilate_mm: f64,
    /// Safety erosion from the body surface and from bone (mm), with the
    /// derived iteration count clamped to this range.
    pub surface_erosion_mm: f64,
    pub erosion_iters_min: usize,
    pub erosion_iters_max: usize,
    /// Extra erosion iterations applied along the bone corridor.
    pub bone_buffer_extra_iters: usize,
    /// If final/pre-erosion volume falls below this ratio, the run is
    /// flagged for manual review.
    pub collapse_review_ratio: f64,
}

impl Default for DomainMaskParams {
    fn default() -> Self {
        DomainMaskParams {
            air_seed_min_hu: -950.0,
            air_seed_max_hu: -400.0,
            seed_min_object: 1000,
            closing_radius_mm: 10.0,
            closing_min_iters: 15,
            closing_scale: 1.5,
            soft_tissue_min_hu: 0.0,
            soft_tissue_max_hu: 80.0,
            diaphragm_stop_ratio: 0.55,
            z_crop_area_fraction: 0.05,
            z_crop_min_voxels: 500,
            z_crop_margin_slices: 15,
            hilar_dilate_iters: 10,
            bone_min_hu: 700.0,
            bone_dilate_mm: 2.0,
            surface_erosion_mm: 3.0,
            erosion_iters_min: 3,
            erosion_iters_max: 15,
            bone_buffer_extra_iters: 5,
            collapse_review_ratio: 0.20,
        }
    }
}

/// Vascular segmentation and contrast-quality tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VesselParams {
    /// Arterial contrast window in HU.
    pub contrast_min_hu: f64,
    pub contrast_max_hu: f64,
    /// Floor the adaptive threshold may drop to under suboptimal contrast.
    pub contrast_floor_hu: f64,
    /// Contrast-quality tier cuts on mean arterial HU.
    pub optimal_mean_hu: f64,
    pub good_mean_hu: f64,
    pub suboptimal_mean_hu: f64,
    /// Lung dilation (iterations) reaching into the hilum before the
    /// contrast window is intersected with it.
    pub lung_dilate_iters: usize,
    /// Connected-component retention: keep up to this many fragments...
    pub keep_components: usize,
    /// ...each at least this large.
    pub component_min_voxels: usize,
    /// Small-object floor applied before labelling.
    pub small_object_min: usize,
    /// Occlusion-shadow dilation, iterations.
    pub shadow_dilate_iters: usize,
}

impl Default for VesselParams {
    fn default() -> Self {
        VesselParams {
            contrast_min_hu: 150.0,
            contrast_max_hu: 500.0,
            contrast_floor_hu: 100.0,
            optimal_mean_hu: 250.0,
            good_mean_hu: 200.0,
            suboptimal_mean_hu: 150.0,
            lung_dilate_iters: 10,
            keep_components: 10,
            component_min_voxels: 50,
            small_object_min: 100,
            shadow_dilate_iters: 6,
        }
    }
}

/// Geometry-engine parameters (all evaluated inside the vessel bounding
/// box).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryParams {
    /// Bounding-box expansion around the vessel tree, voxels.
    pub bbox_margin: usize,
    /// Hessian smoothing scales (mm-agnostic sigmas in voxels).
    pub hessian_scales: Vec<f64>,
    /// Frangi sensitivity parameters.
    pub frangi_alpha: f64,
    pub frangi_beta: f64,
    pub frangi_c: f64,
    /// Plate filter: Ra below this with bright polarity and S above
    /// `plate_min_structureness` flags rib cortex.
    pub plate_max_ra: f64,
    pub plate_min_structureness: f64,
    /// Structure-tensor smoothing sigma for the coherence field.
    pub coherence_sigma: f64,
    /// Coherence below this is snapped to zero (noise floor).
    pub coherence_noise_floor: f64,
    /// Minimum cluster size for coherence speckle removal.
    pub coherence_speckle_min: usize,
    /// Bone exclusion radius around the coherence field, mm.
    pub coherence_bone_margin_mm: f64,
    /// Coherence forced onto bright tubes (patent lumen).
    pub coherence_bright_tube: f64,
    /// Local-statistics window (cube side, voxels) for kurtosis and
    /// anisotropy.
    pub texture_window: usize,
    /// Kurtosis values clipped to +/- this bound.
    pub kurtosis_clip: f64,
    /// Box-counting box edge lengths, voxels.
    pub fractal_box_sizes: Vec<usize>,
    /// Rugosity: curvature-variance threshold above which a wall patch
    /// counts as deformed.
    pub rugosity_variance_threshold: f64,
    /// Air-core bronchus test: 10th-percentile HU below this inside the
    /// dilated component means airway, not vessel.
    pub bronchus_air_hu: f64,
}

impl Default for GeometryParams {
    fn default() -> Self {
        GeometryParams {
            bbox_margin: 8,
            hessian_scales: vec![0.8, 1.6],
            frangi_alpha: 0.5,
            frangi_beta: 0.5,
            frangi_c: 50.0,
            plate_max_ra: 0.35,
            plate_min_structureness: 40.0,
            coherence_sigma: 2.0,
            coherence_noise_floor: 0.1,
            coherence_speckle_min: 5,
            coherence_bone_margin_mm: 5.0,
            coherence_bright_tube: 0.95,
            texture_window: 5,
            kurtosis_clip: 10.0,
            fractal_box_sizes: vec![2, 3, 4, 6, 8, 12, 16],
            rugosity_variance_threshold: 0.5,
            bronchus_air_hu: -150.0,
        }
    }
}

/// Lumen-gate tolerances and topology-worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateParams {
    /// Gate rule: inside iff `dist <= radius * radius_factor + slack_mm`.
    pub radius_factor: f64,
    pub slack_mm: f64,
    /// External worker command (argv[0]); `None` forces the skeleton
    /// fallback.
    pub worker_command: Option<String>,
    /// Extra leading arguments for the worker command.
    pub worker_args: Vec<String>,
    /// Worker wall-clock timeout, seconds.
    pub worker_timeout_secs: u64,
    /// Truncated-branch probe radius (mm) and mask-continuation floor.
    pub truncation_probe_mm: f64,
    pub truncation_min_voxels: usize,
}

impl Default for GateParams {
    fn default() -> Self {
        GateParams {
            radius_factor: 1.2,
            slack_mm: 1.5,
            worker_command: None,
            worker_args: Vec::new(),
            worker_timeout_secs: 120,
            truncation_probe_mm: 10.0,
            truncation_min_voxels: 50,
        }
    }
}

/// Voxel scoring, rejection filters and finding classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    /// Thrombus density window in HU.
    pub thrombus_min_hu: f64,
    pub thrombus_max_hu: f64,
    /// Weight of the density channel; a degraded-contrast strategy may
    /// substitute `density_weight_degraded`.
    pub density_weight: f64,
    pub density_weight_degraded: f64,
    /// Tubular-geometry boost (dark or bright Hessian tube).
    pub tubular_weight: f64,
    /// Kurtosis channel: threshold and weight.
    pub kurtosis_threshold: f64,
    pub kurtosis_weight: f64,
    /// Anisotropy channel: FAC below threshold scores.
    pub anisotropy_threshold: f64,
    pub anisotropy_weight: f64,
    /// Flow channel: coherence in (0, threshold) scores.
    pub coherence_threshold: f64,
    pub coherence_weight: f64,
    /// Contrast-saturation inhibitor: HU above this hard-zeroes a voxel.
    pub saturation_hu: f64,
    /// Classification thresholds on the component peak score.
    pub definite_threshold: f64,
    pub suspicious_threshold: f64,
    /// Candidate components below this voxel count are dropped.
    pub min_finding_voxels: usize,
    /// Morphological bridge closing candidate voxels, iterations.
    pub bridge_close_iters: usize,
    /// Laplacian bone-edge validation.
    pub laplacian_threshold: f64,
    pub laplacian_border_fraction: f64,
    pub bone_adjacency_fraction: f64,
    /// Elongated-cluster (chest-wall streak) filter.
    pub elongation_eccentricity: f64,
    pub elongation_aspect: f64,
    pub elongation_solidity: f64,
    /// Qanadli scale ceiling.
    pub qanadli_max: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        ScoringParams {
            thrombus_min_hu: 30.0,
            thrombus_max_hu: 100.0,
            density_weight: 3.0,
            density_weight_degraded: 1.0,
            tubular_weight: 1.0,
            kurtosis_threshold: 1.2,
            kurtosis_weight: 1.0,
            anisotropy_threshold: 0.2,
            anisotropy_weight: 1.0,
            coherence_threshold: 0.4,
            coherence_weight: 2.0,
            saturation_hu: 220.0,
            definite_threshold: 3.0,
            suspicious_threshold: 2.0,
            min_finding_voxels: 15,
            bridge_close_iters: 3,
            laplacian_threshold: 500.0,
            laplacian_border_fraction: 0.30,
            bone_adjacency_fraction: 0.20,
            elongation_eccentricity: 0.85,
            elongation_aspect: 4.0,
            elongation_solidity: 0.7,
            qanadli_max: 40.0,
        }
    }
}
