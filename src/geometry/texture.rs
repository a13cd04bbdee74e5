//! Local texture statistics: excess-kurtosis and gradient-anisotropy
//! maps.
//!
//! Fresh thrombus is textured where flowing contrast is homogeneous, so
//! a high local kurtosis marks heavy-tailed density neighborhoods. The
//! anisotropy coefficient comes from the structure tensor of normalized
//! gradient directions; organized laminar contrast yields high
//! anisotropy, while disorganized clot interior collapses toward zero.

use crate::config::GeometryParams;
use crate::geometry::filters::{eigenvalues_3x3_symmetric, gradient_3d};
use crate::volume::vidx;

/// Separable uniform (box) filter over a cubic window.
fn box_filter(data: &[f64], nx: usize, ny: usize, nz: usize, window: usize) -> Vec<f64> {
    let r = (window / 2) as isize;
    let mut pass = data.to_vec();

    for axis in 0..3 {
        let mut out = vec![0.0f64; data.len()];
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let mut sum = 0.0;
                    let mut count = 0.0;
                    for o in -r..=r {
                        let (ci, cj, ck) = match axis {
                            0 => (i as isize + o, j as isize, k as isize),
                            1 => (i as isize, j as isize + o, k as isize),
                            _ => (i as isize, j as isize, k as isize + o),
                        };
                        if ci < 0
                            || ci >= nx as isize
                            || cj < 0
                            || cj >= ny as isize
                            || ck < 0
                            || ck >= nz as isize
                        {
                            continue;
                        }
                        sum += pass[vidx(ci as usize, cj as usize, ck as usize, nx, ny)];
                        count += 1.0;
                    }
                    out[vidx(i, j, k, nx, ny)] = sum / count;
                }
            }
        }
        pass = out;
    }

    pass
}

/// Local excess kurtosis over a cubic window, clipped to the configured
/// bound. Uniform neighborhoods yield 0.
pub fn local_kurtosis(
    data: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    params: &GeometryParams,
) -> Vec<f64> {
    let w = params.texture_window.max(3);
    let mean = box_filter(data, nx, ny, nz, w);

    let n_total = nx * ny * nz;
    let mut sq = vec![0.0f64; n_total];
    for i in 0..n_total {
        let d = data[i] - mean[i];
        sq[i] = d * d;
    }
    let var = box_filter(&sq, nx, ny, nz, w);

    let mut quad = vec![0.0f64; n_total];
    for i in 0..n_total {
        let d = data[i] - mean[i];
        quad[i] = d * d * d * d;
    }
    let m4 = box_filter(&quad, nx, ny, nz, w);

    let clip = params.kurtosis_clip;
    let mut mk = vec![0.0f64; n_total];
    for i in 0..n_total {
        if var[i] > 1e-6 {
            let k = m4[i] / (var[i] * var[i]) - 3.0;
            mk[i] = if k.is_finite() { k.clamp(-clip, clip) } else { 0.0 };
        }
    }
    mk
}

/// Fractional-anisotropy-like coefficient of the normalized-gradient
/// structure tensor over a cubic window. Range [0, 1].
pub fn local_anisotropy(
    data: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    params: &GeometryParams,
) -> Vec<f64> {
    let n_total = nx * ny * nz;
    let w = params.texture_window.max(3);

    let gx = gradient_3d(data, nx, ny, nz, 'x');
    let gy = gradient_3d(data, nx, ny, nz, 'y');
    let gz = gradient_3d(data, nx, ny, nz, 'z');

    // Direction-only tensor: each voxel contributes its unit gradient.
    let mut jxx = vec![0.0f64; n_total];
    let mut jyy = vec![0.0f64; n_total];
    let mut jzz = vec![0.0f64; n_total];
    let mut jxy = vec![0.0f64; n_total];
    let mut jxz = vec![0.0f64; n_total];
    let mut jyz = vec![0.0f64; n_total];
    for i in 0..n_total {
        let norm = (gx[i] * gx[i] + gy[i] * gy[i] + gz[i] * gz[i]).sqrt();
        if norm > 1e-9 {
            let (ux, uy, uz) = (gx[i] / norm, gy[i] / norm, gz[i] / norm);
            jxx[i] = ux * ux;
            jyy[i] = uy * uy;
            jzz[i] = uz * uz;
            jxy[i] = ux * uy;
            jxz[i] = ux * uz;
            jyz[i] = uy * uz;
        }
    }
    let jxx = box_filter(&jxx, nx, ny, nz, w);
    let jyy = box_filter(&jyy, nx, ny, nz, w);
    let jzz = box_filter(&jzz, nx, ny, nz, w);
    let jxy = box_filter(&jxy, nx, ny, nz, w);
    let jxz = box_filter(&jxz, nx, ny, nz, w);
    let jyz = box_filter(&jyz, nx, ny, nz, w);

    let mut fac = vec![0.0f64; n_total];
    for i in 0..n_total {
        let (l1, l2, l3) =
            eigenvalues_3x3_symmetric(jxx[i], jyy[i], jzz[i], jxy[i], jxz[i], jyz[i]);
        let sum_sq = l1 * l1 + l2 * l2 + l3 * l3;
        if sum_sq < 1e-12 {
            continue;
        }
        let mean = (l1 + l2 + l3) / 3.0;
        let dev =
            (l1 - mean) * (l1 - mean) + (l2 - mean) * (l2 - mean) + (l3 - mean) * (l3 - mean);
        let fa = (1.5 * dev / sum_sq).sqrt();
        fac[i] = if fa.is_finite() { fa.clamp(0.0, 1.0) } else { 0.0 };
    }
    fac
}
