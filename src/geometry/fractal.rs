//! Box-counting fractal dimension of the vascular tree.
//!
//! A healthy arterial tree branches self-similarly down to the scanner
//! resolution; a proximal obstruction prunes the distal tree and lowers
//! the measured dimension on that side. The dimension is taken over the
//! medial skeleton rather than the full mask, so it responds to
//! branching complexity instead of vessel caliber. The per-hemithorax
//! asymmetry is a confidence annotation for the scorer, never a
//! standalone detector.

use serde::Serialize;
use tracing::debug;

use crate::config::GeometryParams;
use crate::morphology::edt_ridge;
use crate::volume::vidx;

/// Per-hemithorax dimensions and their asymmetry.
#[derive(Debug, Clone, Serialize)]
pub struct FractalReport {
    pub left_df: f64,
    pub right_df: f64,
    /// |left - right| / max(left, right), 0 when either side is empty.
    pub asymmetry: f64,
}

/// Box-counting dimension of a binary mask. Counts occupied boxes at
/// each edge length and fits the log-log slope by least squares.
/// Returns 0 for masks too sparse to fit.
pub fn box_counting_dimension(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    box_sizes: &[usize],
) -> f64 {
    let mut xs = Vec::new();
    let mut ys = Vec::new();

    for &s in box_sizes {
        if s == 0 || s > nx.max(ny).max(nz) {
            continue;
        }
        let bx = nx.div_ceil(s);
        let by = ny.div_ceil(s);
        let bz = nz.div_ceil(s);
        let mut occupied = vec![false; bx * by * bz];
        let mut count = 0usize;
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    if mask[vidx(i, j, k, nx, ny)] > 0 {
                        let b = (i / s) + (j / s) * bx + (k / s) * bx * by;
                        if !occupied[b] {
                            occupied[b] = true;
                            count += 1;
                        }
                    }
                }
            }
        }
        if count > 0 {
            xs.push((1.0 / s as f64).ln());
            ys.push((count as f64).ln());
        }
    }

    if xs.len() < 2 {
        return 0.0;
    }

    // Least-squares slope of ln(count) against ln(1/s).
    let n = xs.len() as f64;
    let sx: f64 = xs.iter().sum();
    let sy: f64 = ys.iter().sum();
    let sxx: f64 = xs.iter().map(|x| x * x).sum();
    let sxy: f64 = xs.iter().zip(ys.iter()).map(|(x, y)| x * y).sum();
    let denom = n * sxx - sx * sx;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    let slope = (n * sxy - sx * sy) / denom;
    slope.max(0.0)
}

/// Dimensions per hemithorax, split at the x midline. The mask is
/// skeletonized first so caliber drops out of the measure.
pub fn hemithorax_fractal(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    spacing: (f64, f64, f64),
    params: &GeometryParams,
) -> FractalReport {
    let (skeleton, _) = edt_ridge(mask, nx, ny, nz, spacing);
    let mid = nx / 2;
    let mut left = vec![0u8; mask.len()];
    let mut right = vec![0u8; mask.len()];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = vidx(i, j, k, nx, ny);
                if skeleton[idx] > 0 {
                    if i < mid {
                        left[idx] = 1;
                    } else {
                        right[idx] = 1;
                    }
                }
            }
        }
    }

    let left_df = box_counting_dimension(&left, nx, ny, nz, &params.fractal_box_sizes);
    let right_df = box_counting_dimension(&right, nx, ny, nz, &params.fractal_box_sizes);
    let asymmetry = if left_df > 0.0 && right_df > 0.0 {
        (left_df - right_df).abs() / left_df.max(right_df)
    } else {
        0.0
    };
    debug!(left_df, right_df, asymmetry, "fractal dimensions");

    FractalReport {
        left_df,
        right_df,
        asymmetry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZES: &[usize] = &[2, 3, 4, 6, 8];

    #[test]
    fn test_empty_mask_is_zero() {
        let n = 16;
        let mask = vec![0u8; n * n * n];
        assert_eq!(box_counting_dimension(&mask, n, n, n, SIZES), 0.0);
    }

    #[test]
    fn test_line_dimension_near_one() {
        let n = 48;
        let mut mask = vec![0u8; n * n * n];
        for k in 0..n {
            mask[vidx(n / 2, n / 2, k, n, n)] = 1;
        }
        let df = box_counting_dimension(&mask, n, n, n, SIZES);
        assert!((df - 1.0).abs() < 0.15, "line Df {}", df);
    }

    #[test]
    fn test_solid_block_dimension_near_three() {
        let n = 48;
        let mask = vec![1u8; n * n * n];
        let df = box_counting_dimension(&mask, n, n, n, SIZES);
        assert!(df > 2.5, "block Df {}", df);
    }

    #[test]
    fn test_plane_between_line_and_block() {
        let n = 48;
        let mut mask = vec![0u8; n * n * n];
        for k in 0..n {
            for i in 0..n {
                mask[vidx(i, n / 2, k, n, n)] = 1;
            }
        }
        let df = box_counting_dimension(&mask, n, n, n, SIZES);
        assert!(df > 1.5 && df < 2.5, "plane Df {}", df);
    }

    #[test]
    fn test_pruned_hemithorax_is_asymmetric() {
        let n = 48;
        let mut mask = vec![0u8; n * n * n];
        // Right side: dense branching stand-in (plane). Left side: one
        // pruned line.
        for k in 0..n {
            for i in (n / 2)..n {
                mask[vidx(i, n / 2, k, n, n)] = 1;
            }
            mask[vidx(4, n / 2, k, n, n)] = 1;
        }
        let report = hemithorax_fractal(&mask, n, n, n, (1.0, 1.0, 1.0), &GeometryParams::default());
        assert!(report.right_df > report.left_df);
        assert!(report.asymmetry > 0.2, "asymmetry {}", report.asymmetry);
    }

    #[test]
    fn test_caliber_does_not_drive_asymmetry() {
        // A fat trunk and a thin trunk share one centerline each, so the
        // skeletonized dimensions must come out close.
        let n = 32;
        let mut mask = vec![0u8; n * n * n];
        for k in 0..n {
            for j in 0..n {
                for i in 0..n {
                    let thick = ((i as f64 - 8.0).powi(2) + (j as f64 - 16.0).powi(2)).sqrt();
                    let thin = ((i as f64 - 24.0).powi(2) + (j as f64 - 16.0).powi(2)).sqrt();
                    if thick <= 4.0 || thin <= 1.0 {
                        mask[vidx(i, j, k, n, n)] = 1;
                    }
                }
            }
        }
        let report = hemithorax_fractal(&mask, n, n, n, (1.0, 1.0, 1.0), &GeometryParams::default());
        assert!(report.left_df > 0.0);
        assert!(report.right_df > 0.0);
        assert!(report.asymmetry < 0.2, "asymmetry {}", report.asymmetry);
    }

    #[test]
    fn test_symmetric_tree_low_asymmetry() {
        let n = 32;
        let mut mask = vec![0u8; n * n * n];
        for k in 0..n {
            mask[vidx(8, n / 2, k, n, n)] = 1;
            mask[vidx(n - 8, n / 2, k, n, n)] = 1;
        }
        let report = hemithorax_fractal(&mask, n, n, n, (1.0, 1.0, 1.0), &GeometryParams::default());
        assert!(report.asymmetry < 0.05, "asymmetry {}", report.asymmetry);
    }
}
