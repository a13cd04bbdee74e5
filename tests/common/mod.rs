//! Shared phantom builders for the end-to-end pipeline tests.
//!
//! Each phantom is a small synthetic thorax: air background, a
//! soft-tissue body, two lung fields, and in the right lung a
//! bronchovascular bundle carrying one contrast-filled artery. Clots
//! are painted into the artery as either a mural annular ring or a
//! full occlusion plug. Iteration-heavy parameters are scaled down so
//! clinical-scale morphology does not wipe the small volumes out.

#![allow(dead_code)]

use tep_core::config::{DomainMaskParams, EngineConfig, VesselParams};
use tep_core::volume::{vidx, Volume};

/// Phantom frame, (nx, ny, nz).
pub const DIMS: (usize, usize, usize) = (40, 40, 32);
/// Artery axis in the right lung, (x, y).
pub const AXIS: (usize, usize) = (28, 20);
/// Contrast lumen radius, voxels.
pub const LUMEN_R: f64 = 3.0;
/// Soft sheath around the artery, voxels.
pub const CUFF_R: f64 = 5.0;
/// Slices carrying the mural annular clot.
pub const CLOT_Z: std::ops::Range<usize> = 14..18;
/// Slices carrying the total occlusion plug.
pub const OCCLUSION_Z: std::ops::Range<usize> = 14..21;

pub const HU_AIR: f64 = -1000.0;
pub const HU_BODY: f64 = 40.0;
pub const HU_LUNG: f64 = -800.0;
pub const HU_CUFF: f64 = -50.0;
pub const HU_CONTRAST: f64 = 300.0;
pub const HU_CLOT: f64 = 60.0;

/// Route pipeline tracing through the test harness. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Configuration with iteration counts scaled to the phantom frame.
pub fn phantom_config() -> EngineConfig {
    EngineConfig {
        domain: DomainMaskParams {
            seed_min_object: 50,
            closing_radius_mm: 2.0,
            closing_min_iters: 2,
            closing_scale: 1.0,
            z_crop_min_voxels: 20,
            z_crop_margin_slices: 2,
            hilar_dilate_iters: 2,
            surface_erosion_mm: 1.0,
            erosion_iters_min: 1,
            erosion_iters_max: 2,
            bone_buffer_extra_iters: 1,
            ..DomainMaskParams::default()
        },
        vessels: VesselParams {
            lung_dilate_iters: 3,
            component_min_voxels: 20,
            small_object_min: 20,
            shadow_dilate_iters: 4,
            ..VesselParams::default()
        },
        ..EngineConfig::default()
    }
}

/// Squared in-plane distance from the artery axis.
pub fn radial2(i: usize, j: usize) -> f64 {
    let dx = i as f64 - AXIS.0 as f64;
    let dy = j as f64 - AXIS.1 as f64;
    dx * dx + dy * dy
}

/// Thorax with one patent contrast-filled artery.
pub fn patent_phantom() -> Volume {
    build_phantom(HU_CONTRAST, None, None)
}

/// Enhanced artery carrying a mural annular clot with a patent center.
pub fn annular_clot_phantom() -> Volume {
    build_phantom(HU_CONTRAST, Some(CLOT_Z), None)
}

/// Artery severed by a full-lumen clot plug.
pub fn occluded_phantom() -> Volume {
    build_phantom(HU_CONTRAST, None, Some(OCCLUSION_Z))
}

/// Non-enhanced scan: the artery carries blood-density material only.
pub fn no_contrast_phantom() -> Volume {
    build_phantom(HU_BODY, None, None)
}

fn build_phantom(
    lumen_hu: f64,
    ring_z: Option<std::ops::Range<usize>>,
    plug_z: Option<std::ops::Range<usize>>,
) -> Volume {
    let (nx, ny, nz) = DIMS;
    let mut data = vec![HU_AIR; nx * ny * nz];

    // Body.
    for k in 2..nz - 2 {
        for j in 2..ny - 2 {
            for i in 2..nx - 2 {
                data[vidx(i, j, k, nx, ny)] = HU_BODY;
            }
        }
    }
    // Two lung fields.
    for k in 4..nz - 4 {
        for j in 6..ny - 6 {
            for i in 5..17 {
                data[vidx(i, j, k, nx, ny)] = HU_LUNG;
            }
            for i in 21..36 {
                data[vidx(i, j, k, nx, ny)] = HU_LUNG;
            }
        }
    }
    // Bronchovascular bundle in the right lung, running the full z
    // extent so the artery leaves the frame instead of ending in soft
    // tissue: sheath, then lumen.
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let r2 = radial2(i, j);
                let idx = vidx(i, j, k, nx, ny);
                if r2 <= CUFF_R * CUFF_R {
                    data[idx] = HU_CUFF;
                }
                if r2 <= LUMEN_R * LUMEN_R {
                    data[idx] = lumen_hu;
                }
            }
        }
    }
    // Mural ring: clot against the wall, center still enhancing.
    if let Some(zr) = ring_z {
        for k in zr {
            for j in 0..ny {
                for i in 0..nx {
                    let r2 = radial2(i, j);
                    if r2 > 1.5 * 1.5 && r2 <= LUMEN_R * LUMEN_R {
                        data[vidx(i, j, k, nx, ny)] = HU_CLOT;
                    }
                }
            }
        }
    }
    // Full plug: clot across the whole cross-section.
    if let Some(zr) = plug_z {
        for k in zr {
            for j in 0..ny {
                for i in 0..nx {
                    if radial2(i, j) <= LUMEN_R * LUMEN_R {
                        data[vidx(i, j, k, nx, ny)] = HU_CLOT;
                    }
                }
            }
        }
    }

    Volume::new(data, DIMS, (1.0, 1.0, 1.0)).unwrap()
}
