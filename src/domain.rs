//! Domain mask builder: the anatomically-constrained search container.
//!
//! Grows a lung/air seed into a solid thoracic container, stops axial
//! expansion at the diaphragm via a soft-tissue-ratio heuristic, crops
//! the long axis to the anatomically active range, then carves out bone
//! and a safety corridor near the body surface. Anatomical oddities
//! degrade into flags; only malformed input errors out (upstream, in
//! [`crate::volume::Volume::new`]).

use tracing::{debug, info, warn};

use crate::config::DomainMaskParams;
use crate::morphology::{
    close_iter, dilate_iter, dilate_mask, erode_iter, fill_holes_2d, mask_volume,
    remove_small_objects, Connectivity,
};
use crate::volume::Volume;
#[cfg(test)]
use crate::volume::vidx;

/// Search container plus provenance of the adaptive decisions taken
/// while building it.
#[derive(Debug, Clone)]
pub struct DomainMask {
    pub mask: Vec<u8>,
    /// Retained slice range along z after cropping (inclusive).
    pub z_range: (usize, usize),
    pub z_crop_applied: bool,
    /// Soft-tissue ratio observed at the slice where expansion stopped,
    /// when a diaphragm boundary was found.
    pub diaphragm_stop_ratio: Option<f64>,
    pub diaphragm_slice: Option<usize>,
    /// Set when the safety erosion collapsed the container below the
    /// configured ratio of its pre-erosion volume.
    pub requires_manual_review: bool,
    pub pre_erosion_voxels: usize,
    pub final_voxels: usize,
}

/// Build the domain mask for a volume.
pub fn build_domain_mask(vol: &Volume, params: &DomainMaskParams) -> DomainMask {
    let (nx, ny, nz) = vol.dims;
    let (sx, _, _) = vol.spacing;

    // 1. Lung/air seed.
    let mut seed: Vec<u8> = vol
        .data
        .iter()
        .map(|&v| {
            if v >= params.air_seed_min_hu && v <= params.air_seed_max_hu {
                1
            } else {
                0
            }
        })
        .collect();
    seed = remove_small_objects(&seed, nx, ny, nz, params.seed_min_object, Connectivity::Six);
    seed = fill_holes_2d(&seed, nx, ny, nz);
    debug!(seed_voxels = mask_volume(&seed), "lung seed segmented");

    if mask_volume(&seed) == 0 {
        warn!("no lung-density voxels found; empty domain flagged for review");
        return DomainMask {
            mask: seed,
            z_range: (0, nz.saturating_sub(1)),
            z_crop_applied: false,
            diaphragm_stop_ratio: None,
            diaphragm_slice: None,
            requires_manual_review: true,
            pre_erosion_voxels: 0,
            final_voxels: 0,
        };
    }

    // 2. Solid container, resolution-adaptive closing.
    let base_iters = (params.closing_radius_mm / sx).ceil() as usize;
    let close = ((base_iters.max(params.closing_min_iters)) as f64 * params.closing_scale)
        .round() as usize;
    let mut container = close_iter(&seed, nx, ny, nz, close, Connectivity::Six);
    container = fill_holes_2d(&container, nx, ny, nz);
    debug!(iterations = close, "container closed");

    // 3. Diaphragm stop: walking inferior from the lung z centroid, the
    // container slab turns predominantly soft-tissue once the dome of
    // the diaphragm is crossed.
    let (diaphragm_slice, diaphragm_stop_ratio) =
        detect_diaphragm(&vol.data, &container, nx, ny, nz, params);
    if let Some(zs) = diaphragm_slice {
        for k in 0..zs {
            for s in 0..nx * ny {
                container[k * nx * ny + s] = 0;
            }
        }
        info!(
            slice = zs,
            ratio = diaphragm_stop_ratio.unwrap_or(0.0),
            "diaphragm boundary applied"
        );
    }

    // 4. Axial crop to the anatomically active range.
    let max_area = (0..nz)
        .map(|k| slice_area(&container, nx, ny, k))
        .max()
        .unwrap_or(0);
    let active: Vec<usize> = (0..nz)
        .filter(|&k| {
            let area = slice_area(&container, nx, ny, k);
            area as f64 >= max_area as f64 * params.z_crop_area_fraction
                || area >= params.z_crop_min_voxels
        })
        .collect();
    let (mut z0, mut z1) = (0, nz - 1);
    let mut z_crop_applied = false;
    if let (Some(&first), Some(&last)) = (active.first(), active.last()) {
        z0 = first.saturating_sub(params.z_crop_margin_slices);
        z1 = (last + params.z_crop_margin_slices).min(nz - 1);
        if z0 > 0 || z1 < nz - 1 {
            z_crop_applied = true;
            for k in (0..z0).chain(z1 + 1..nz) {
                for s in 0..nx * ny {
                    container[k * nx * ny + s] = 0;
                }
            }
            info!(z0, z1, "axial crop applied");
        }
    }

    // 5. Reach into the hilum, where the central arteries leave the
    // parenchyma.
    container = dilate_iter(
        &container,
        nx,
        ny,
        nz,
        params.hilar_dilate_iters,
        Connectivity::Six,
    );

    // 6. Bone exclusion with a safety margin.
    let bone: Vec<u8> = vol
        .data
        .iter()
        .map(|&v| if v >= params.bone_min_hu { 1 } else { 0 })
        .collect();
    let min_spacing = vol.spacing.0.min(vol.spacing.1).min(vol.spacing.2);
    let bone_radius = ((params.bone_dilate_mm / min_spacing).ceil() as i32).max(1);
    let bone_dilated = dilate_mask(&bone, nx, ny, nz, bone_radius);
    for (c, &b) in container.iter_mut().zip(bone_dilated.iter()) {
        if b > 0 {
            *c = 0;
        }
    }

    let pre_erosion_voxels = mask_volume(&container);

    // 7. Anti-artifact corridor: erode from the body surface, and wider
    // again around bone.
    let surf_iters = ((params.surface_erosion_mm / sx).round() as usize)
        .clamp(params.erosion_iters_min, params.erosion_iters_max);
    let mut eroded = erode_iter(&container, nx, ny, nz, surf_iters, Connectivity::Six);
    let bone_buffer = dilate_mask(
        &bone,
        nx,
        ny,
        nz,
        bone_radius + params.bone_buffer_extra_iters as i32,
    );
    for (c, &b) in eroded.iter_mut().zip(bone_buffer.iter()) {
        if b > 0 {
            *c = 0;
        }
    }

    // Raw air never belongs to the container (sub-seed densities are
    // outside-body air or trachea lumen).
    for (c, &v) in eroded.iter_mut().zip(vol.data.iter()) {
        if v < params.air_seed_min_hu {
            *c = 0;
        }
    }

    // 8. Collapse sanity check.
    let final_voxels = mask_volume(&eroded);
    let collapse_ratio = if pre_erosion_voxels > 0 {
        final_voxels as f64 / pre_erosion_voxels as f64
    } else {
        0.0
    };
    let requires_manual_review = collapse_ratio < params.collapse_review_ratio;
    if requires_manual_review {
        warn!(
            collapse_ratio,
            "domain mask collapsed below review threshold"
        );
    }
    info!(
        pre_erosion_voxels,
        final_voxels, surf_iters, "domain mask complete"
    );

    DomainMask {
        mask: eroded,
        z_range: (z0, z1),
        z_crop_applied,
        diaphragm_stop_ratio,
        diaphragm_slice,
        requires_manual_review,
        pre_erosion_voxels,
        final_voxels,
    }
}

fn slice_area(mask: &[u8], nx: usize, ny: usize, k: usize) -> usize {
    let base = k * nx * ny;
    mask[base..base + nx * ny].iter().filter(|&&v| v > 0).count()
}

/// Walk inferior from the lung z centroid; the first slice whose
/// container content is predominantly soft tissue marks the diaphragm.
fn detect_diaphragm(
    data: &[f64],
    container: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    params: &DomainMaskParams,
) -> (Option<usize>, Option<f64>) {
    // z centroid of the container.
    let mut zsum = 0usize;
    let mut count = 0usize;
    for k in 0..nz {
        let area = slice_area(container, nx, ny, k);
        zsum += k * area;
        count += area;
    }
    if count == 0 {
        return (None, None);
    }
    let z_center = zsum / count;

    for k in (0..z_center).rev() {
        let base = k * nx * ny;
        let mut inside = 0usize;
        let mut soft = 0usize;
        for s in 0..nx * ny {
            if container[base + s] > 0 {
                inside += 1;
                let v = data[base + s];
                if v >= params.soft_tissue_min_hu && v <= params.soft_tissue_max_hu {
                    soft += 1;
                }
            }
        }
        if inside == 0 {
            continue;
        }
        let ratio = soft as f64 / inside as f64;
        if ratio >= params.diaphragm_stop_ratio {
            return (Some(k), Some(ratio));
        }
    }
    (None, None)
}
