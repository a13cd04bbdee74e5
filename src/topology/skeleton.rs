//! Built-in centerline fallback.
//!
//! Approximates the medial axis as the ridge of the Euclidean distance
//! transform: a mask voxel whose distance to the background is not
//! exceeded by any 26-neighbor (up to half a voxel of tolerance) sits on
//! the center of its local cross-section. The distance value doubles as
//! the inscribed-sphere radius. Coarser than a surface-based centerline
//! but produced from the mask alone, with no external process.

use tracing::debug;

use crate::config::GateParams;
use crate::error::EngineError;
use crate::morphology::{
    edt_ridge, label_components, neighbor_offsets, surface_voxels, Connectivity,
};
use crate::topology::{TopologyPort, TopologyRequest, TopologySummary, TruncatedBranch};
use crate::volume::vidx;

pub struct SkeletonExtractor {
    params: GateParams,
}

impl SkeletonExtractor {
    pub fn new(params: GateParams) -> Self {
        SkeletonExtractor { params }
    }
}

impl TopologyPort for SkeletonExtractor {
    fn extract(&self, request: &TopologyRequest<'_>) -> Result<TopologySummary, EngineError> {
        let (nx, ny, nz) = request.dims;
        if request.mask.len() != nx * ny * nz {
            return Err(EngineError::ShapeMismatch {
                len: request.mask.len(),
                nx,
                ny,
                nz,
            });
        }

        let (skeleton, edt) = edt_ridge(request.mask, nx, ny, nz, request.spacing);
        let mut centerline_points = Vec::new();
        let mut radii_mm = Vec::new();
        for (idx, &s) in skeleton.iter().enumerate() {
            if s > 0 {
                centerline_points.push(idx);
                radii_mm.push(edt[idx]);
            }
        }

        let truncated_branches = detect_truncated(
            &skeleton,
            request.mask,
            nx,
            ny,
            nz,
            request.spacing,
            &self.params,
        );
        let n_surface_cells = surface_voxels(request.mask, nx, ny, nz).len();

        debug!(
            points = centerline_points.len(),
            truncated = truncated_branches.len(),
            "skeleton centerline extracted"
        );

        Ok(TopologySummary {
            centerline_points,
            radii_mm,
            n_surface_cells,
            truncated_branches,
        })
    }
}

/// Skeleton terminals where the mask keeps going. A terminal is a
/// skeleton voxel with at most one skeleton neighbor; it counts as
/// truncated when the mask holds more than the configured floor of
/// voxels inside the probe box around it.
fn detect_truncated(
    skeleton: &[u8],
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    spacing: (f64, f64, f64),
    params: &GateParams,
) -> Vec<TruncatedBranch> {
    let offsets = neighbor_offsets(Connectivity::TwentySix);
    let (labels, _) = label_components(skeleton, nx, ny, nz, Connectivity::TwentySix);
    let (sx, sy, sz) = spacing;
    let probe_vox = (params.truncation_probe_mm / sx.min(sy).min(sz)).floor() as i64;

    let mut truncated = Vec::new();
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = vidx(i, j, k, nx, ny);
                if skeleton[idx] == 0 {
                    continue;
                }
                let mut degree = 0;
                for &(dx, dy, dz) in &offsets {
                    let ni = i as i32 + dx;
                    let nj = j as i32 + dy;
                    let nk = k as i32 + dz;
                    if ni < 0
                        || ni >= nx as i32
                        || nj < 0
                        || nj >= ny as i32
                        || nk < 0
                        || nk >= nz as i32
                    {
                        continue;
                    }
                    if skeleton[vidx(ni as usize, nj as usize, nk as usize, nx, ny)] > 0 {
                        degree += 1;
                    }
                }
                if degree > 1 {
                    continue;
                }

                let x0 = (i as i64 - probe_vox).max(0) as usize;
                let x1 = ((i as i64 + probe_vox) as usize).min(nx - 1);
                let y0 = (j as i64 - probe_vox).max(0) as usize;
                let y1 = ((j as i64 + probe_vox) as usize).min(ny - 1);
                let z0 = (k as i64 - probe_vox).max(0) as usize;
                let z1 = ((k as i64 + probe_vox) as usize).min(nz - 1);
                let mut continuation = 0usize;
                for pk in z0..=z1 {
                    for pj in y0..=y1 {
                        for pi in x0..=x1 {
                            if mask[vidx(pi, pj, pk, nx, ny)] > 0 {
                                continuation += 1;
                            }
                        }
                    }
                }
                if continuation > params.truncation_min_voxels {
                    truncated.push(TruncatedBranch {
                        voxel: [i, j, k],
                        branch_id: labels[idx] as usize,
                    });
                }
            }
        }
    }
    truncated
}
