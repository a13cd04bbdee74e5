//! Structure-tensor flow coherence.
//!
//! The local gradient structure tensor is smoothed and eigen-decomposed;
//! the coherence index CI = ((u1 - u3) / (u1 + u3 + eps))^2 is high
//! where density gradients point consistently (laminar contrast flow)
//! and collapses where flow is disrupted at an obstruction. Patent
//! bright-tube lumen is forced to high coherence so that healthy vessels
//! can never accumulate flow-disruption evidence, and the field is
//! blanked near bone where trabecular texture mimics turbulence.

use crate::config::GeometryParams;
use crate::geometry::filters::{eigenvalues_3x3_symmetric, gaussian_smooth_3d, gradient_3d};
use crate::morphology::{dilate_iter, label_components, component_sizes, Connectivity};

/// Compute the coherence index field over a (boxed) volume.
///
/// `bone_mask` and `bright_tube` share the box frame; both may be empty
/// masks when the corresponding exclusion is not wanted.
pub fn compute_flow_coherence(
    data: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    bone_mask: &[u8],
    bright_tube: &[u8],
    spacing: (f64, f64, f64),
    params: &GeometryParams,
) -> Vec<f64> {
    let n_total = nx * ny * nz;

    let gx = gradient_3d(data, nx, ny, nz, 'x');
    let gy = gradient_3d(data, nx, ny, nz, 'y');
    let gz = gradient_3d(data, nx, ny, nz, 'z');

    // Outer-product components, then tensor smoothing.
    let mut jxx = vec![0.0f64; n_total];
    let mut jyy = vec![0.0f64; n_total];
    let mut jzz = vec![0.0f64; n_total];
    let mut jxy = vec![0.0f64; n_total];
    let mut jxz = vec![0.0f64; n_total];
    let mut jyz = vec![0.0f64; n_total];
    for i in 0..n_total {
        jxx[i] = gx[i] * gx[i];
        jyy[i] = gy[i] * gy[i];
        jzz[i] = gz[i] * gz[i];
        jxy[i] = gx[i] * gy[i];
        jxz[i] = gx[i] * gz[i];
        jyz[i] = gy[i] * gz[i];
    }
    let sigma = params.coherence_sigma;
    let jxx = gaussian_smooth_3d(&jxx, nx, ny, nz, sigma);
    let jyy = gaussian_smooth_3d(&jyy, nx, ny, nz, sigma);
    let jzz = gaussian_smooth_3d(&jzz, nx, ny, nz, sigma);
    let jxy = gaussian_smooth_3d(&jxy, nx, ny, nz, sigma);
    let jxz = gaussian_smooth_3d(&jxz, nx, ny, nz, sigma);
    let jyz = gaussian_smooth_3d(&jyz, nx, ny, nz, sigma);

    let mut ci = vec![0.0f64; n_total];
    for i in 0..n_total {
        let (e1, e2, e3) =
            eigenvalues_3x3_symmetric(jxx[i], jyy[i], jzz[i], jxy[i], jxz[i], jyz[i]);
        // Ascending from the solver; mu1 is the dominant energy.
        let (mu3, _, mu1) = (e1, e2, e3);
        let denom = mu1 + mu3 + 1e-5;
        let v = ((mu1 - mu3) / denom).powi(2);
        ci[i] = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    }

    // Noise floor.
    for v in ci.iter_mut() {
        if *v < params.coherence_noise_floor {
            *v = 0.0;
        }
    }

    // Speckle removal: tiny islands of nonzero coherence are noise.
    if params.coherence_speckle_min > 1 {
        let nonzero: Vec<u8> = ci.iter().map(|&v| (v > 0.0) as u8).collect();
        let (labels, count) = label_components(&nonzero, nx, ny, nz, Connectivity::TwentySix);
        let sizes = component_sizes(&labels, count);
        for i in 0..n_total {
            let l = labels[i] as usize;
            if l > 0 && sizes[l] < params.coherence_speckle_min {
                ci[i] = 0.0;
            }
        }
    }

    // Bone margin: blank the field near ossific texture.
    let min_spacing = spacing.0.min(spacing.1).min(spacing.2);
    let margin_iters = (params.coherence_bone_margin_mm / min_spacing).ceil() as usize;
    if margin_iters > 0 && bone_mask.len() == n_total && bone_mask.iter().any(|&v| v > 0) {
        let near_bone = dilate_iter(bone_mask, nx, ny, nz, margin_iters, Connectivity::Six);
        for i in 0..n_total {
            if near_bone[i] > 0 {
                ci[i] = 0.0;
            }
        }
    }

    // Patent lumen is laminar by construction.
    if bright_tube.len() == n_total {
        for i in 0..n_total {
            if bright_tube[i] > 0 && ci[i] < params.coherence_bright_tube {
                ci[i] = params.coherence_bright_tube;
            }
        }
    }

    ci
}
