//! Pulmonary-artery tree segmentation.
//!
//! The contrast window is intersected with the search container dilated
//! toward the hilum, opened to shed speckle, then reduced to the largest
//! N connected fragments. Keeping several fragments instead of the
//! single largest one matters clinically: a saddle embolus can sever the
//! contrast column and leave true arterial territory as disconnected
//! islands downstream of the occlusion. The retained tree is finally
//! dilated into an "occlusion shadow" so the candidate search reaches
//! past a fully blocked lumen.

use tracing::{debug, info};

use crate::config::VesselParams;
use crate::contrast::SegmentationStrategy;
use crate::domain::DomainMask;
use crate::morphology::{
    component_sizes, dilate_iter, erode_iter, label_components, mask_volume, remove_small_objects,
    Connectivity,
};
use crate::volume::Volume;

/// Segmented arterial tree plus its search shadow.
#[derive(Debug, Clone)]
pub struct VesselTree {
    /// Arterial lumen mask; invariant: subset of the domain mask.
    pub mask: Vec<u8>,
    /// Mask dilated by the shadow margin; the candidate search region is
    /// `mask` united with this.
    pub shadow: Vec<u8>,
    /// Components found before retention.
    pub total_components: usize,
    /// Components kept.
    pub kept_components: usize,
    /// Centroid of the retained tree in voxel coordinates, if any.
    pub center: Option<(usize, usize, usize)>,
}

/// Segment the arterial tree inside the domain.
pub fn segment_vessels(
    vol: &Volume,
    domain: &DomainMask,
    strategy: &SegmentationStrategy,
    params: &VesselParams,
) -> VesselTree {
    let (nx, ny, nz) = vol.dims;

    // Reach from the parenchymal container into the hilum, where the
    // central arteries run.
    let reach = dilate_iter(
        &domain.mask,
        nx,
        ny,
        nz,
        params.lung_dilate_iters,
        Connectivity::Six,
    );

    let mut pa: Vec<u8> = vol
        .data
        .iter()
        .zip(reach.iter())
        .map(|(&v, &r)| {
            if r > 0 && v >= strategy.threshold_hu && v <= params.contrast_max_hu {
                1
            } else {
                0
            }
        })
        .collect();

    // Opening sheds speckle without shaving true branch calibre.
    pa = erode_iter(&pa, nx, ny, nz, 1, Connectivity::Six);
    pa = dilate_iter(&pa, nx, ny, nz, 1, Connectivity::Six);
    pa = remove_small_objects(&pa, nx, ny, nz, params.small_object_min, Connectivity::Six);

    // Multi-component retention.
    let (labels, total_components) = label_components(&pa, nx, ny, nz, Connectivity::TwentySix);
    let sizes = component_sizes(&labels, total_components);
    let mut order: Vec<(usize, usize)> = (1..=total_components)
        .map(|l| (l, sizes[l]))
        .collect();
    // Largest first; label order breaks ties so reruns are identical.
    order.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut keep = vec![false; total_components + 1];
    let mut kept_components = 0usize;
    for &(l, size) in order.iter().take(strategy.keep_components) {
        if size > params.component_min_voxels {
            keep[l] = true;
            kept_components += 1;
        }
    }
    debug!(total_components, kept_components, "component retention");

    let mut mask: Vec<u8> = labels
        .iter()
        .map(|&l| if l > 0 && keep[l as usize] { 1 } else { 0 })
        .collect();

    // Lumen stays inside the search container.
    for (m, &d) in mask.iter_mut().zip(domain.mask.iter()) {
        if d == 0 {
            *m = 0;
        }
    }

    let shadow = dilate_iter(
        &mask,
        nx,
        ny,
        nz,
        params.shadow_dilate_iters,
        Connectivity::Six,
    );

    let center = centroid(&mask, nx, ny);
    info!(
        vessel_voxels = mask_volume(&mask),
        kept_components, "arterial tree segmented"
    );

    VesselTree {
        mask,
        shadow,
        total_components,
        kept_components,
        center,
    }
}

fn centroid(mask: &[u8], nx: usize, ny: usize) -> Option<(usize, usize, usize)> {
    let (mut si, mut sj, mut sk, mut n) = (0usize, 0usize, 0usize, 0usize);
    for (idx, &m) in mask.iter().enumerate() {
        if m > 0 {
            let k = idx / (nx * ny);
            let rem = idx % (nx * ny);
            si += rem % nx;
            sj += rem / nx;
            sk += k;
            n += 1;
        }
    }
    if n == 0 {
        None
    } else {
        Some((si / n, sj / n, sk / n))
    }
}
