//! Centerline topology of the vessel tree.
//!
//! Extraction is a port with two adapters. [`worker::WorkerAdapter`]
//! shells out to an external centerline process (marching cubes plus
//! VMTK-style centerlines with inscribed-sphere radii) over a NIfTI
//! handoff. [`skeleton::SkeletonExtractor`] is the built-in fallback,
//! a medial-axis approximation from the Euclidean distance transform.
//! Both produce the same [`TopologySummary`], so the rest of the
//! pipeline never knows which one ran.
//!
//! The summary feeds the [`LumenGate`]: a voxel is inside the lumen of
//! the tree iff its distance to the nearest centerline point is within
//! `radius * radius_factor + slack_mm` of that point's radius.

pub mod skeleton;
pub mod worker;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::GateParams;
use crate::error::EngineError;
use crate::morphology::nearest_feature_transform;

/// Input to a topology extraction: binary vessel mask in its own frame.
pub struct TopologyRequest<'a> {
    pub mask: &'a [u8],
    pub dims: (usize, usize, usize),
    /// Voxel pitch in mm.
    pub spacing: (f64, f64, f64),
}

/// Centerline terminal where the mask keeps going. The silent-occlusion
/// pattern: a clot stops the contrast column and the centerline with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncatedBranch {
    /// Terminal voxel (x, y, z).
    #[serde(rename = "voxel_coord")]
    pub voxel: [usize; 3],
    pub branch_id: usize,
}

/// Extraction result shared by both adapters.
#[derive(Debug, Clone)]
pub struct TopologySummary {
    /// Flat voxel indices of centerline points.
    pub centerline_points: Vec<usize>,
    /// Inscribed-sphere radius (mm) per centerline point, parallel to
    /// `centerline_points`.
    pub radii_mm: Vec<f64>,
    pub n_surface_cells: usize,
    pub truncated_branches: Vec<TruncatedBranch>,
}

impl TopologySummary {
    pub fn is_empty(&self) -> bool {
        self.centerline_points.is_empty()
    }

    /// Centerline voxels with three or more centerline neighbors, a
    /// proxy for the number of vascular bifurcations captured.
    pub fn branch_point_count(&self, dims: (usize, usize, usize)) -> usize {
        let (nx, ny, nz) = dims;
        let mut on_line = vec![false; nx * ny * nz];
        for &idx in &self.centerline_points {
            if idx < on_line.len() {
                on_line[idx] = true;
            }
        }
        let offsets = crate::morphology::neighbor_offsets(crate::morphology::Connectivity::TwentySix);
        self.centerline_points
            .iter()
            .filter(|&&idx| {
                let k = idx / (nx * ny);
                let rem = idx % (nx * ny);
                let j = rem / nx;
                let i = rem % nx;
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
                    if on_line[crate::volume::vidx(ni as usize, nj as usize, nk as usize, nx, ny)]
                    {
                        degree += 1;
                    }
                }
                degree >= 3
            })
            .count()
    }
}

/// Anything that can turn a vessel mask into a centerline summary.
pub trait TopologyPort {
    fn extract(&self, request: &TopologyRequest<'_>) -> Result<TopologySummary, EngineError>;
}

/// Run the configured adapter, falling back to the skeleton extractor
/// when no worker is configured or the worker fails. The second return
/// value reports whether the fallback ran.
pub fn resolve_topology(
    request: &TopologyRequest<'_>,
    params: &GateParams,
) -> Result<(TopologySummary, bool), EngineError> {
    if let Some(command) = &params.worker_command {
        let adapter = worker::WorkerAdapter::new(
            command.clone(),
            params.worker_args.clone(),
            params.worker_timeout_secs,
        );
        match adapter.extract(request) {
            Ok(summary) => return Ok((summary, false)),
            Err(e) => {
                warn!(error = %e, "topology worker failed, using skeleton fallback");
            }
        }
    }
    let fallback = skeleton::SkeletonExtractor::new(params.clone());
    let summary = fallback.extract(request)?;
    Ok((summary, true))
}

/// Per-voxel lumen membership derived from a centerline summary.
pub struct LumenGate {
    dist_mm: Vec<f64>,
    radius_at_nearest: Vec<f64>,
    radius_factor: f64,
    slack_mm: f64,
}

impl LumenGate {
    /// Propagates each voxel's nearest centerline point and that point's
    /// radius across the frame. Returns `None` when the summary has no
    /// centerline points.
    pub fn build(
        summary: &TopologySummary,
        dims: (usize, usize, usize),
        spacing: (f64, f64, f64),
        params: &GateParams,
    ) -> Option<LumenGate> {
        if summary.is_empty() {
            return None;
        }
        let (nx, ny, nz) = dims;
        let (dist_mm, nearest) =
            nearest_feature_transform(&summary.centerline_points, nx, ny, nz, spacing);
        let radius_at_nearest = nearest
            .iter()
            .map(|&fi| {
                if (fi as usize) < summary.radii_mm.len() {
                    summary.radii_mm[fi as usize]
                } else {
                    0.0
                }
            })
            .collect();
        Some(LumenGate {
            dist_mm,
            radius_at_nearest,
            radius_factor: params.radius_factor,
            slack_mm: params.slack_mm,
        })
    }

    /// Whether a voxel lies within the gated lumen.
    pub fn inside(&self, idx: usize) -> bool {
        self.dist_mm[idx] <= self.radius_at_nearest[idx] * self.radius_factor + self.slack_mm
    }

    /// Distance (mm) to the nearest centerline point.
    pub fn distance_mm(&self, idx: usize) -> f64 {
        self.dist_mm[idx]
    }

    /// Radius (mm) of the nearest centerline point.
    pub fn radius_mm(&self, idx: usize) -> f64 {
        self.radius_at_nearest[idx]
    }
}
