//! Voxel evidence accumulation and finding extraction.
//!
//! Scoring runs in two stages. The voxel stage walks the candidate
//! region (vessel tree plus occlusion shadow) applying an ordered list
//! of hard rejection filters, then sums weighted evidence channels for
//! the survivors. The component stage thresholds the score field,
//! bridges fragmented clusters, and subjects each cluster to a second
//! ordered filter list before classifying what remains.
//!
//! Filter order is part of the contract: a voxel or cluster is charged
//! to the first filter that rejects it, so the per-filter tallies in
//! the run summary stay comparable across scans.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{GeometryParams, ScoringParams};
use crate::contrast::SegmentationStrategy;
use crate::geometry::filters::{eigenvalues_3x3_symmetric, laplacian_3d};
use crate::geometry::hessian::TensorField;
use crate::geometry::rugosity::analyze_component_surface;
use crate::morphology::{close_iter, dilate_iter, label_components, Connectivity};
use crate::topology::LumenGate;
use crate::volume::vidx;

const CH_DENSITY: u8 = 1;
const CH_TUBULAR: u8 = 1 << 1;
const CH_KURTOSIS: u8 = 1 << 2;
const CH_ANISOTROPY: u8 = 1 << 3;
const CH_COHERENCE: u8 = 1 << 4;

/// Everything the scorer reads, all in the same (cropped) frame.
pub struct ScoringInputs<'a> {
    /// Hounsfield values.
    pub hu: &'a [f64],
    /// Candidate region: vessel tree union occlusion shadow.
    pub candidates: &'a [u8],
    /// Segmented vessel tree alone.
    pub vessel_mask: &'a [u8],
    pub bone_mask: &'a [u8],
    pub tensors: &'a TensorField,
    pub coherence: &'a [f64],
    pub kurtosis: &'a [f64],
    pub anisotropy: &'a [f64],
    /// `None` when no centerline topology is available; the gate filter
    /// then passes everything.
    pub gate: Option<&'a LumenGate>,
    pub dims: (usize, usize, usize),
    pub spacing: (f64, f64, f64),
}

/// How many voxels or clusters a named filter rejected.
#[derive(Debug, Clone, Serialize)]
pub struct FilterTally {
    pub filter: &'static str,
    pub rejected: usize,
}

/// Per-voxel score field with channel provenance.
pub struct ScoreField {
    pub score: Vec<f64>,
    /// Channel bitmask per voxel, for the per-finding breakdown.
    channels: Vec<u8>,
    pub voxel_filters: Vec<FilterTally>,
}

/// Summed channel contributions over one finding.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelBreakdown {
    pub density: f64,
    pub tubular: f64,
    pub kurtosis: f64,
    pub anisotropy: f64,
    pub coherence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FindingClass {
    Definite,
    Suspicious,
}

/// One detected clot candidate.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    /// Voxel with the maximum score (lowest index on ties).
    pub anchor: [usize; 3],
    pub peak_score: f64,
    pub mean_score: f64,
    pub num_voxels: usize,
    pub volume_mm3: f64,
    pub mean_hu: f64,
    pub classification: FindingClass,
    pub channels: ChannelBreakdown,
    /// Vessel-wall deformation at the cluster surface.
    pub wall_deformed: bool,
    /// Flat voxel indices of the member voxels.
    #[serde(skip)]
    pub indices: Vec<usize>,
}

/// Voxel stage. Rejection filters run in order (saturation, plate,
/// lumen gate); a rejected voxel scores zero regardless of channels.
pub fn score_voxels(
    inputs: &ScoringInputs<'_>,
    strategy: &SegmentationStrategy,
    params: &ScoringParams,
) -> ScoreField {
    let n = inputs.hu.len();
    let mut score = vec![0.0f64; n];
    let mut channels = vec![0u8; n];
    let mut saturated = 0usize;
    let mut plated = 0usize;
    let mut gated = 0usize;

    for idx in 0..n {
        if inputs.candidates[idx] == 0 {
            continue;
        }
        let hu = inputs.hu[idx];

        if hu > params.saturation_hu {
            saturated += 1;
            continue;
        }
        if inputs.tensors.plate[idx] > 0 {
            plated += 1;
            continue;
        }
        if let Some(gate) = inputs.gate {
            if !gate.inside(idx) {
                gated += 1;
                continue;
            }
        }

        let mut s = 0.0;
        let mut ch = 0u8;
        if hu >= params.thrombus_min_hu && hu <= params.thrombus_max_hu {
            s += strategy.density_weight;
            ch |= CH_DENSITY;
        }
        if inputs.tensors.dark_tube[idx] > 0 || inputs.tensors.bright_tube[idx] > 0 {
            s += params.tubular_weight;
            ch |= CH_TUBULAR;
        }
        if inputs.kurtosis[idx] > params.kurtosis_threshold {
            s += params.kurtosis_weight;
            ch |= CH_KURTOSIS;
        }
        if inputs.anisotropy[idx] < params.anisotropy_threshold {
            s += params.anisotropy_weight;
            ch |= CH_ANISOTROPY;
        }
        if inputs.coherence[idx] > 0.0 && inputs.coherence[idx] < params.coherence_threshold {
            s += params.coherence_weight;
            ch |= CH_COHERENCE;
        }
        score[idx] = s;
        channels[idx] = ch;
    }

    debug!(saturated, plated, gated, "voxel rejection tallies");
    ScoreField {
        score,
        channels,
        voxel_filters: vec![
            FilterTally {
                filter: "saturation",
                rejected: saturated,
            },
            FilterTally {
                filter: "plate",
                rejected: plated,
            },
            FilterTally {
                filter: "lumen_gate",
                rejected: gated,
            },
        ],
    }
}

/// Component stage. Clusters the thresholded score field, runs the
/// ordered cluster filters (size, streak, bone edge, air core,
/// detachment) and classifies the survivors.
pub fn extract_findings(
    inputs: &ScoringInputs<'_>,
    field: &ScoreField,
    params: &ScoringParams,
    geom: &GeometryParams,
) -> (Vec<Finding>, Vec<FilterTally>) {
    let (nx, ny, nz) = inputs.dims;
    let n = nx * ny * nz;

    let mut seed: Vec<u8> = field
        .score
        .iter()
        .map(|&s| if s >= params.suspicious_threshold { 1 } else { 0 })
        .collect();
    // Bridge fragments of one clot split by partial-volume voxels, then
    // clip back to the anatomical candidate region.
    seed = close_iter(&seed, nx, ny, nz, params.bridge_close_iters, Connectivity::Six);
    for idx in 0..n {
        if inputs.candidates[idx] == 0 {
            seed[idx] = 0;
        }
    }

    let (labels, count) = label_components(&seed, nx, ny, nz, Connectivity::TwentySix);
    let vessel_reach = dilate_iter(inputs.vessel_mask, nx, ny, nz, 1, Connectivity::TwentySix);
    let laplacian = laplacian_3d(inputs.hu, nx, ny, nz);
    let voxel_mm3 = inputs.spacing.0 * inputs.spacing.1 * inputs.spacing.2;

    let mut too_small = 0usize;
    let mut streaks = 0usize;
    let mut bone_edges = 0usize;
    let mut air_cores = 0usize;
    let mut detached = 0usize;
    let mut below_threshold = 0usize;

    let mut component = vec![0u8; n];
    let mut findings = Vec::new();

    for label in 1..=count as u32 {
        let indices: Vec<usize> = (0..n).filter(|&i| labels[i] == label).collect();

        if indices.len() < params.min_finding_voxels {
            too_small += 1;
            continue;
        }
        if is_elongated_streak(&indices, nx, ny, params) {
            streaks += 1;
            continue;
        }
        if is_bone_edge(&indices, &labels, label, &laplacian, inputs, params) {
            bone_edges += 1;
            continue;
        }

        for &idx in &indices {
            component[idx] = 1;
        }
        let rugosity = analyze_component_surface(
            &component,
            inputs.hu,
            nx,
            ny,
            nz,
            inputs.spacing,
            geom,
        );
        for &idx in &indices {
            component[idx] = 0;
        }
        if rugosity.is_bronchus {
            air_cores += 1;
            continue;
        }

        if !indices.iter().any(|&idx| vessel_reach[idx] > 0) {
            detached += 1;
            continue;
        }

        let mut peak = f64::NEG_INFINITY;
        let mut anchor_idx = indices[0];
        let mut sum = 0.0;
        let mut hu_sum = 0.0;
        let mut breakdown = ChannelBreakdown::default();
        for &idx in &indices {
            let s = field.score[idx];
            sum += s;
            hu_sum += inputs.hu[idx];
            if s > peak {
                peak = s;
                anchor_idx = idx;
            }
            let ch = field.channels[idx];
            if ch & CH_DENSITY != 0 {
                breakdown.density += 1.0;
            }
            if ch & CH_TUBULAR != 0 {
                breakdown.tubular += 1.0;
            }
            if ch & CH_KURTOSIS != 0 {
                breakdown.kurtosis += 1.0;
            }
            if ch & CH_ANISOTROPY != 0 {
                breakdown.anisotropy += 1.0;
            }
            if ch & CH_COHERENCE != 0 {
                breakdown.coherence += 1.0;
            }
        }

        let classification = if peak >= params.definite_threshold {
            FindingClass::Definite
        } else if peak >= params.suspicious_threshold {
            FindingClass::Suspicious
        } else {
            // Bridged clusters can consist entirely of filler voxels.
            below_threshold += 1;
            continue;
        };

        let k = anchor_idx / (nx * ny);
        let rem = anchor_idx % (nx * ny);
        findings.push(Finding {
            anchor: [rem % nx, rem / nx, k],
            peak_score: peak,
            mean_score: sum / indices.len() as f64,
            num_voxels: indices.len(),
            volume_mm3: indices.len() as f64 * voxel_mm3,
            mean_hu: hu_sum / indices.len() as f64,
            classification,
            channels: breakdown,
            wall_deformed: rugosity.wall_deformed,
            indices,
        });
    }

    findings.sort_by(|a, b| {
        b.peak_score
            .partial_cmp(&a.peak_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.anchor.cmp(&b.anchor))
    });

    info!(
        clusters = count,
        findings = findings.len(),
        too_small,
        streaks,
        bone_edges,
        air_cores,
        detached,
        "finding extraction complete"
    );

    let tallies = vec![
        FilterTally {
            filter: "min_size",
            rejected: too_small,
        },
        FilterTally {
            filter: "elongated_streak",
            rejected: streaks,
        },
        FilterTally {
            filter: "bone_edge",
            rejected: bone_edges,
        },
        FilterTally {
            filter: "air_core",
            rejected: air_cores,
        },
        FilterTally {
            filter: "detached",
            rejected: detached,
        },
        FilterTally {
            filter: "below_threshold",
            rejected: below_threshold,
        },
    ];
    (findings, tallies)
}

/// Chest-wall streak test on the voxel coordinate cloud: eccentric,
/// high-aspect and sparse in its bounding box at the same time.
fn is_elongated_streak(
    indices: &[usize],
    nx: usize,
    ny: usize,
    params: &ScoringParams,
) -> bool {
    let m = indices.len() as f64;
    let mut cx = 0.0;
    let mut cy = 0.0;
    let mut cz = 0.0;
    let coords: Vec<(f64, f64, f64)> = indices
        .iter()
        .map(|&idx| {
            let k = idx / (nx * ny);
            let rem = idx % (nx * ny);
            (
                (rem % nx) as f64,
                (rem / nx) as f64,
                k as f64,
            )
        })
        .collect();
    for &(x, y, z) in &coords {
        cx += x;
        cy += y;
        cz += z;
    }
    cx /= m;
    cy /= m;
    cz /= m;

    let (mut sxx, mut syy, mut szz, mut sxy, mut sxz, mut syz) =
        (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    let (mut x0, mut x1) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut y0, mut y1) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut z0, mut z1) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y, z) in &coords {
        let (dx, dy, dz) = (x - cx, y - cy, z - cz);
        sxx += dx * dx;
        syy += dy * dy;
        szz += dz * dz;
        sxy += dx * dy;
        sxz += dx * dz;
        syz += dy * dz;
        x0 = x0.min(x);
        x1 = x1.max(x);
        y0 = y0.min(y);
        y1 = y1.max(y);
        z0 = z0.min(z);
        z1 = z1.max(z);
    }
    let (e1, e2, e3) = eigenvalues_3x3_symmetric(
        sxx / m,
        syy / m,
        szz / m,
        sxy / m,
        sxz / m,
        syz / m,
    );
    let mut ev = [e1.max(0.0), e2.max(0.0), e3.max(0.0)];
    ev.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let l1 = ev[0];
    let l2 = ev[1].max(1e-6);
    let l3 = ev[2];
    if l1 <= 1e-6 {
        return false;
    }

    let eccentricity = (1.0 - l3 / l1).sqrt();
    let aspect = (l1 / l2).sqrt();
    let bbox = ((x1 - x0 + 1.0) * (y1 - y0 + 1.0) * (z1 - z0 + 1.0)).max(1.0);
    let solidity = m / bbox;

    eccentricity > params.elongation_eccentricity
        && aspect > params.elongation_aspect
        && solidity < params.elongation_solidity
}

/// Bone-edge test: a large share of the cluster border sits on a strong
/// Laplacian edge while the cluster hugs cortical bone.
fn is_bone_edge(
    indices: &[usize],
    labels: &[u32],
    label: u32,
    laplacian: &[f64],
    inputs: &ScoringInputs<'_>,
    params: &ScoringParams,
) -> bool {
    let (nx, ny, nz) = inputs.dims;
    let mut border = 0usize;
    let mut edgy = 0usize;
    let mut near_bone = 0usize;

    for &idx in indices {
        let k = idx / (nx * ny);
        let rem = idx % (nx * ny);
        let j = rem / nx;
        let i = rem % nx;

        let mut on_border = false;
        let mut touches_bone = false;
        for (dx, dy, dz) in [
            (-1i32, 0i32, 0i32),
            (1, 0, 0),
            (0, -1, 0),
            (0, 1, 0),
            (0, 0, -1),
            (0, 0, 1),
        ] {
            let ni = i as i32 + dx;
            let nj = j as i32 + dy;
            let nk = k as i32 + dz;
            if ni < 0 || ni >= nx as i32 || nj < 0 || nj >= ny as i32 || nk < 0 || nk >= nz as i32
            {
                on_border = true;
                continue;
            }
            let nidx = vidx(ni as usize, nj as usize, nk as usize, nx, ny);
            if labels[nidx] != label {
                on_border = true;
            }
            if inputs.bone_mask[nidx] > 0 {
                touches_bone = true;
            }
        }
        if on_border {
            border += 1;
            if laplacian[idx].abs() > params.laplacian_threshold {
                edgy += 1;
            }
            if touches_bone {
                near_bone += 1;
            }
        }
    }

    if border == 0 {
        return false;
    }
    let edge_fraction = edgy as f64 / border as f64;
    let bone_fraction = near_bone as f64 / border as f64;
    edge_fraction > params.laplacian_border_fraction
        && bone_fraction > params.bone_adjacency_fraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateParams;
    use crate::contrast::ContrastQuality;
    use crate::topology::TopologySummary;

    struct Fixture {
        hu: Vec<f64>,
        candidates: Vec<u8>,
        vessel_mask: Vec<u8>,
        bone_mask: Vec<u8>,
        tensors: TensorField,
        coherence: Vec<f64>,
        kurtosis: Vec<f64>,
        anisotropy: Vec<f64>,
        dims: (usize, usize, usize),
    }

    impl Fixture {
        fn new(n: usize) -> Fixture {
            let total = n * n * n;
            Fixture {
                hu: vec![0.0; total],
                candidates: vec![1u8; total],
                vessel_mask: vec![1u8; total],
                bone_mask: vec![0u8; total],
                tensors: TensorField {
                    vesselness: vec![0.0; total],
                    scale: vec![0.0; total],
                    bright_tube: vec![0u8; total],
                    dark_tube: vec![0u8; total],
                    plate: vec![0u8; total],
                },
                coherence: vec![1.0; total],
                // High anisotropy everywhere so the channel stays quiet
                // unless a test lowers it.
                kurtosis: vec![0.0; total],
                anisotropy: vec![1.0; total],
                dims: (n, n, n),
            }
        }

        fn inputs(&self) -> ScoringInputs<'_> {
            ScoringInputs {
                hu: &self.hu,
                candidates: &self.candidates,
                vessel_mask: &self.vessel_mask,
                bone_mask: &self.bone_mask,
                tensors: &self.tensors,
                coherence: &self.coherence,
                kurtosis: &self.kurtosis,
                anisotropy: &self.anisotropy,
                gate: None,
                dims: self.dims,
                spacing: (1.0, 1.0, 1.0),
            }
        }
    }

    fn full_strategy() -> SegmentationStrategy {
        SegmentationStrategy {
            quality: ContrastQuality::Optimal,
            threshold_hu: 150.0,
            keep_components: 10,
            density_weight: 3.0,
        }
    }

    #[test]
    fn test_density_and_tubular_channels_add() {
        let n = 8;
        let mut fx = Fixture::new(n);
        let idx = vidx(4, 4, 4, n, n);
        fx.hu[idx] = 60.0;
        fx.tensors.dark_tube[idx] = 1;

        let field = score_voxels(&fx.inputs(), &full_strategy(), &ScoringParams::default());
        assert!((field.score[idx] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_bright_tube_counts_as_tubular_evidence() {
        // On weakly enhanced scans the residual lumen reads as a bright
        // tube; either polarity earns the channel.
        let n = 8;
        let mut fx = Fixture::new(n);
        let idx = vidx(4, 4, 4, n, n);
        fx.hu[idx] = 60.0;
        fx.tensors.bright_tube[idx] = 1;

        let field = score_voxels(&fx.inputs(), &full_strategy(), &ScoringParams::default());
        assert!((field.score[idx] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_degraded_density_weight_lowers_score() {
        let n = 8;
        let mut fx = Fixture::new(n);
        let idx = vidx(4, 4, 4, n, n);
        fx.hu[idx] = 60.0;

        let mut strategy = full_strategy();
        strategy.density_weight = 1.0;
        let field = score_voxels(&fx.inputs(), &strategy, &ScoringParams::default());
        assert!((field.score[idx] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_saturation_overrides_every_channel() {
        let n = 8;
        let mut fx = Fixture::new(n);
        let idx = vidx(4, 4, 4, n, n);
        fx.hu[idx] = 300.0;
        fx.tensors.dark_tube[idx] = 1;
        fx.kurtosis[idx] = 5.0;
        fx.anisotropy[idx] = 0.1;
        fx.coherence[idx] = 0.2;

        let field = score_voxels(&fx.inputs(), &full_strategy(), &ScoringParams::default());
        assert_eq!(field.score[idx], 0.0);
        let saturated = field
            .voxel_filters
            .iter()
            .find(|t| t.filter == "saturation")
            .unwrap();
        assert_eq!(saturated.rejected, 1);
    }

    #[test]
    fn test_plate_voxel_rejected() {
        let n = 8;
        let mut fx = Fixture::new(n);
        let idx = vidx(4, 4, 4, n, n);
        fx.hu[idx] = 60.0;
        fx.tensors.plate[idx] = 1;

        let field = score_voxels(&fx.inputs(), &full_strategy(), &ScoringParams::default());
        assert_eq!(field.score[idx], 0.0);
    }

    #[test]
    fn test_gate_rejects_extraluminal_voxel() {
        let n = 12;
        let mut fx = Fixture::new(n);
        // Centerline along one edge, probe voxel in the far corner.
        let summary = TopologySummary {
            centerline_points: (0..n).map(|k| vidx(1, 1, k, n, n)).collect(),
            radii_mm: vec![1.0; n],
            n_surface_cells: 0,
            truncated_branches: Vec::new(),
        };
        let gate = LumenGate::build(
            &summary,
            (n, n, n),
            (1.0, 1.0, 1.0),
            &GateParams::default(),
        )
        .unwrap();

        let near = vidx(1, 1, 6, n, n);
        let far = vidx(10, 10, 6, n, n);
        fx.hu[near] = 60.0;
        fx.hu[far] = 60.0;

        let mut inputs = fx.inputs();
        inputs.gate = Some(&gate);
        let field = score_voxels(&inputs, &full_strategy(), &ScoringParams::default());
        assert!(field.score[near] > 0.0);
        assert_eq!(field.score[far], 0.0);
    }

    fn paint_blob(fx: &mut Fixture, lo: usize, hi: usize, hu: f64) -> Vec<usize> {
        let (nx, ny, _) = fx.dims;
        let mut painted = Vec::new();
        for k in lo..=hi {
            for j in lo..=hi {
                for i in lo..=hi {
                    let idx = vidx(i, j, k, nx, ny);
                    fx.hu[idx] = hu;
                    fx.tensors.dark_tube[idx] = 1;
                    painted.push(idx);
                }
            }
        }
        painted
    }

    #[test]
    fn test_blob_becomes_definite_finding() {
        let n = 16;
        let mut fx = Fixture::new(n);
        let painted = paint_blob(&mut fx, 5, 9, 60.0);

        let params = ScoringParams::default();
        let inputs = fx.inputs();
        let field = score_voxels(&inputs, &full_strategy(), &params);
        let (findings, _) =
            extract_findings(&inputs, &field, &params, &GeometryParams::default());

        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.classification, FindingClass::Definite);
        assert!((f.peak_score - 4.0).abs() < 1e-9);
        assert!(f.num_voxels >= painted.len());
        // Anchor sits inside the painted block.
        assert!(f.anchor.iter().all(|&c| (5..=9).contains(&c)));
        assert!(f.channels.density >= painted.len() as f64);
    }

    #[test]
    fn test_anchor_is_score_maximum() {
        let n = 16;
        let mut fx = Fixture::new(n);
        paint_blob(&mut fx, 5, 9, 60.0);
        // One voxel gains the kurtosis channel on top.
        let hot = vidx(7, 8, 6, n, n);
        fx.kurtosis[hot] = 5.0;

        let params = ScoringParams::default();
        let inputs = fx.inputs();
        let field = score_voxels(&inputs, &full_strategy(), &params);
        let (findings, _) =
            extract_findings(&inputs, &field, &params, &GeometryParams::default());

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].anchor, [7, 8, 6]);
        assert!((findings[0].peak_score - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_cluster_dropped() {
        let n = 16;
        let mut fx = Fixture::new(n);
        // 2x2x2 block, below the 15-voxel floor. Disable bridging so the
        // closing pass cannot inflate it past the floor.
        paint_blob(&mut fx, 5, 6, 60.0);

        let params = ScoringParams {
            bridge_close_iters: 0,
            ..ScoringParams::default()
        };
        let inputs = fx.inputs();
        let field = score_voxels(&inputs, &full_strategy(), &params);
        let (findings, tallies) =
            extract_findings(&inputs, &field, &params, &GeometryParams::default());

        assert!(findings.is_empty());
        let t = tallies.iter().find(|t| t.filter == "min_size").unwrap();
        assert_eq!(t.rejected, 1);
    }

    #[test]
    fn test_air_core_cluster_rejected() {
        let n = 16;
        let mut fx = Fixture::new(n);
        // Ring of soft tissue around an air core: a bronchus wall.
        let c = 8i32;
        for k in 4..12usize {
            for j in 0..n {
                for i in 0..n {
                    let r2 = (i as i32 - c).pow(2) + (j as i32 - c).pow(2);
                    let idx = vidx(i, j, k, n, n);
                    if r2 <= 4 {
                        fx.hu[idx] = -800.0;
                    } else if r2 <= 16 {
                        fx.hu[idx] = 60.0;
                        fx.tensors.dark_tube[idx] = 1;
                    }
                }
            }
        }

        let params = ScoringParams::default();
        let inputs = fx.inputs();
        let field = score_voxels(&inputs, &full_strategy(), &params);
        let (findings, tallies) =
            extract_findings(&inputs, &field, &params, &GeometryParams::default());

        assert!(findings.is_empty());
        let t = tallies.iter().find(|t| t.filter == "air_core").unwrap();
        assert_eq!(t.rejected, 1);
    }

    #[test]
    fn test_diagonal_streak_rejected() {
        let n = 32;
        let mut fx = Fixture::new(n);
        // One-voxel-thick diagonal line in the x-y plane.
        for t in 4..28usize {
            let idx = vidx(t, t, 10, n, n);
            fx.hu[idx] = 60.0;
            fx.tensors.dark_tube[idx] = 1;
        }

        let params = ScoringParams {
            bridge_close_iters: 0,
            ..ScoringParams::default()
        };
        let inputs = fx.inputs();
        let field = score_voxels(&inputs, &full_strategy(), &params);
        let (findings, tallies) =
            extract_findings(&inputs, &field, &params, &GeometryParams::default());

        assert!(findings.is_empty());
        let t = tallies
            .iter()
            .find(|t| t.filter == "elongated_streak")
            .unwrap();
        assert_eq!(t.rejected, 1);
    }

    #[test]
    fn test_detached_cluster_rejected() {
        let n = 16;
        let mut fx = Fixture::new(n);
        paint_blob(&mut fx, 5, 9, 60.0);
        // No vessel anywhere near the cluster.
        fx.vessel_mask = vec![0u8; n * n * n];
        fx.vessel_mask[vidx(0, 0, 0, n, n)] = 1;

        let params = ScoringParams::default();
        let inputs = fx.inputs();
        let field = score_voxels(&inputs, &full_strategy(), &params);
        let (findings, tallies) =
            extract_findings(&inputs, &field, &params, &GeometryParams::default());

        assert!(findings.is_empty());
        let t = tallies.iter().find(|t| t.filter == "detached").unwrap();
        assert_eq!(t.rejected, 1);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let n = 16;
        let mut fx = Fixture::new(n);
        paint_blob(&mut fx, 5, 9, 60.0);

        let params = ScoringParams::default();
        let inputs = fx.inputs();
        let f1 = score_voxels(&inputs, &full_strategy(), &params);
        let f2 = score_voxels(&inputs, &full_strategy(), &params);
        assert_eq!(f1.score, f2.score);

        let (a, _) = extract_findings(&inputs, &f1, &params, &GeometryParams::default());
        let (b, _) = extract_findings(&inputs, &f2, &params, &GeometryParams::default());
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].anchor, b[0].anchor);
        assert_eq!(a[0].num_voxels, b[0].num_voxels);
    }
}
