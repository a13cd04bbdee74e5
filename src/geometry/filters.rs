//! Shared numerical kernels for the geometry descriptors: separable
//! Gaussian smoothing with replicate padding, central-difference
//! gradients, a discrete Laplacian, and eigenvalues of symmetric 3x3
//! matrices via Householder tridiagonalization plus implicit QL.

use crate::volume::vidx;

/// 3D Gaussian smoothing using separable 1D convolutions.
pub fn gaussian_smooth_3d(data: &[f64], nx: usize, ny: usize, nz: usize, sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return data.to_vec();
    }

    let kernel_radius = (3.0 * sigma).ceil() as usize;
    let kernel_size = 2 * kernel_radius + 1;
    let mut kernel = vec![0.0f64; kernel_size];

    let mut sum = 0.0;
    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f64 - kernel_radius as f64;
        *k = (-x * x / (2.0 * sigma * sigma)).exp();
        sum += *k;
    }
    for k in kernel.iter_mut() {
        *k /= sum;
    }

    let sx = convolve_1d_direction(data, nx, ny, nz, &kernel, 'x');
    let sxy = convolve_1d_direction(&sx, nx, ny, nz, &kernel, 'y');
    convolve_1d_direction(&sxy, nx, ny, nz, &kernel, 'z')
}

/// 1D convolution along one axis with replicate padding.
pub fn convolve_1d_direction(
    data: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    kernel: &[f64],
    direction: char,
) -> Vec<f64> {
    let mut result = vec![0.0f64; nx * ny * nz];
    let kernel_radius = (kernel.len() - 1) / 2;

    let clamp_x = |x: isize| -> usize { x.max(0).min(nx as isize - 1) as usize };
    let clamp_y = |y: isize| -> usize { y.max(0).min(ny as isize - 1) as usize };
    let clamp_z = |z: isize| -> usize { z.max(0).min(nz as isize - 1) as usize };

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let mut sum = 0.0;
                for (ki, &kv) in kernel.iter().enumerate() {
                    let offset = ki as isize - kernel_radius as isize;
                    let sample = match direction {
                        'x' => vidx(clamp_x(i as isize + offset), j, k, nx, ny),
                        'y' => vidx(i, clamp_y(j as isize + offset), k, nx, ny),
                        'z' => vidx(i, j, clamp_z(k as isize + offset), nx, ny),
                        _ => panic!("Invalid convolution direction"),
                    };
                    sum += data[sample] * kv;
                }
                result[vidx(i, j, k, nx, ny)] = sum;
            }
        }
    }

    result
}

/// Central-difference gradient along one axis (forward/backward at the
/// edges).
pub fn gradient_3d(data: &[f64], nx: usize, ny: usize, nz: usize, direction: char) -> Vec<f64> {
    let mut grad = vec![0.0f64; nx * ny * nz];

    match direction {
        'x' => {
            for k in 0..nz {
                for j in 0..ny {
                    if nx > 1 {
                        grad[vidx(0, j, k, nx, ny)] =
                            data[vidx(1, j, k, nx, ny)] - data[vidx(0, j, k, nx, ny)];
                        grad[vidx(nx - 1, j, k, nx, ny)] =
                            data[vidx(nx - 1, j, k, nx, ny)] - data[vidx(nx - 2, j, k, nx, ny)];
                    }
                    for i in 1..nx.saturating_sub(1) {
                        grad[vidx(i, j, k, nx, ny)] = (data[vidx(i + 1, j, k, nx, ny)]
                            - data[vidx(i - 1, j, k, nx, ny)])
                            / 2.0;
                    }
                }
            }
        }
        'y' => {
            for k in 0..nz {
                for i in 0..nx {
                    if ny > 1 {
                        grad[vidx(i, 0, k, nx, ny)] =
                            data[vidx(i, 1, k, nx, ny)] - data[vidx(i, 0, k, nx, ny)];
                        grad[vidx(i, ny - 1, k, nx, ny)] =
                            data[vidx(i, ny - 1, k, nx, ny)] - data[vidx(i, ny - 2, k, nx, ny)];
                    }
                    for j in 1..ny.saturating_sub(1) {
                        grad[vidx(i, j, k, nx, ny)] = (data[vidx(i, j + 1, k, nx, ny)]
                            - data[vidx(i, j - 1, k, nx, ny)])
                            / 2.0;
                    }
                }
            }
        }
        'z' => {
            for j in 0..ny {
                for i in 0..nx {
                    if nz > 1 {
                        grad[vidx(i, j, 0, nx, ny)] =
                            data[vidx(i, j, 1, nx, ny)] - data[vidx(i, j, 0, nx, ny)];
                        grad[vidx(i, j, nz - 1, nx, ny)] =
                            data[vidx(i, j, nz - 1, nx, ny)] - data[vidx(i, j, nz - 2, nx, ny)];
                    }
                    for k in 1..nz.saturating_sub(1) {
                        grad[vidx(i, j, k, nx, ny)] = (data[vidx(i, j, k + 1, nx, ny)]
                            - data[vidx(i, j, k - 1, nx, ny)])
                            / 2.0;
                    }
                }
            }
        }
        _ => panic!("Invalid gradient direction"),
    }

    grad
}

/// Discrete 6-neighbor Laplacian; boundary voxels replicate the edge
/// value.
pub fn laplacian_3d(data: &[f64], nx: usize, ny: usize, nz: usize) -> Vec<f64> {
    let mut lap = vec![0.0f64; nx * ny * nz];
    let at = |i: isize, j: isize, k: isize| {
        let ci = i.max(0).min(nx as isize - 1) as usize;
        let cj = j.max(0).min(ny as isize - 1) as usize;
        let ck = k.max(0).min(nz as isize - 1) as usize;
        data[vidx(ci, cj, ck, nx, ny)]
    };
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let (ii, jj, kk) = (i as isize, j as isize, k as isize);
                let center = data[vidx(i, j, k, nx, ny)];
                lap[vidx(i, j, k, nx, ny)] = at(ii - 1, jj, kk)
                    + at(ii + 1, jj, kk)
                    + at(ii, jj - 1, kk)
                    + at(ii, jj + 1, kk)
                    + at(ii, jj, kk - 1)
                    + at(ii, jj, kk + 1)
                    - 6.0 * center;
            }
        }
    }
    lap
}

/// Eigenvalues of a 3x3 symmetric matrix via Householder reduction plus
/// QL iteration. More numerically stable than the analytical Cardano
/// formula.
///
/// Matrix layout:
/// ```text
/// | a  d  e |
/// | d  b  f |
/// | e  f  c |
/// ```
///
/// Returns eigenvalues in ascending order.
pub fn eigenvalues_3x3_symmetric(
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
) -> (f64, f64, f64) {
    let mut v = [[0.0f64; 3]; 3];
    v[0][0] = a;
    v[0][1] = d;
    v[0][2] = e;
    v[1][0] = d;
    v[1][1] = b;
    v[1][2] = f;
    v[2][0] = e;
    v[2][1] = f;
    v[2][2] = c;

    let mut eigenvalues = [0.0f64; 3];
    let mut e_vec = [0.0f64; 3];

    tred2(&mut v, &mut eigenvalues, &mut e_vec);
    tql2(&mut v, &mut eigenvalues, &mut e_vec);

    (eigenvalues[0], eigenvalues[1], eigenvalues[2])
}

/// Sort three values by absolute value: |l1| <= |l2| <= |l3|.
pub fn sort_by_abs(a: f64, b: f64, c: f64) -> (f64, f64, f64) {
    let mut vals = [(a.abs(), a), (b.abs(), b), (c.abs(), c)];
    vals.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));
    (vals[0].1, vals[1].1, vals[2].1)
}

/// Symmetric Householder reduction to tridiagonal form.
///
/// Derived from the Algol procedures tred2 by Bowdler, Martin, Reinsch,
/// and Wilkinson, Handbook for Auto. Comp., Vol.ii-Linear Algebra, and
/// the corresponding EISPACK subroutine.
fn tred2(v: &mut [[f64; 3]; 3], d: &mut [f64; 3], e: &mut [f64; 3]) {
    const N: usize = 3;

    for j in 0..N {
        d[j] = v[N - 1][j];
    }

    for i in (1..N).rev() {
        let mut scale = 0.0;
        let mut h = 0.0;

        for k in 0..i {
            scale += d[k].abs();
        }

        if scale == 0.0 {
            e[i] = d[i - 1];
            for j in 0..i {
                d[j] = v[i - 1][j];
                v[i][j] = 0.0;
                v[j][i] = 0.0;
            }
        } else {
            for k in 0..i {
                d[k] /= scale;
                h += d[k] * d[k];
            }

            let f = d[i - 1];
            let mut g = h.sqrt();
            if f > 0.0 {
                g = -g;
            }
            e[i] = scale * g;
            h -= f * g;
            d[i - 1] = f - g;

            for j in 0..i {
                e[j] = 0.0;
            }

            for j in 0..i {
                let f = d[j];
                v[j][i] = f;
                let mut g = e[j] + v[j][j] * f;
                for k in (j + 1)..i {
                    g += v[k][j] * d[k];
                    e[k] += v[k][j] * f;
                }
                e[j] = g;
            }

            let mut f = 0.0;
            for j in 0..i {
                e[j] /= h;
                f += e[j] * d[j];
            }

            let hh = f / (h + h);
            for j in 0..i {
                e[j] -= hh * d[j];
            }

            for j in 0..i {
                let f = d[j];
                let g = e[j];
                for k in j..i {
                    v[k][j] -= f * e[k] + g * d[k];
                }
                d[j] = v[i - 1][j];
                v[i][j] = 0.0;
            }
        }
        d[i] = h;
    }

    for i in 0..(N - 1) {
        v[N - 1][i] = v[i][i];
        v[i][i] = 1.0;
        let h = d[i + 1];
        if h != 0.0 {
            for k in 0..=i {
                d[k] = v[k][i + 1] / h;
            }
            for j in 0..=i {
                let mut g = 0.0;
                for k in 0..=i {
                    g += v[k][i + 1] * v[k][j];
                }
                for k in 0..=i {
                    v[k][j] -= g * d[k];
                }
            }
        }
        for k in 0..=i {
            v[k][i + 1] = 0.0;
        }
    }

    for j in 0..N {
        d[j] = v[N - 1][j];
        v[N - 1][j] = 0.0;
    }
    v[N - 1][N - 1] = 1.0;
    e[0] = 0.0;
}

/// Symmetric tridiagonal QL algorithm.
///
/// Derived from the Algol procedures tql2 by Bowdler, Martin, Reinsch,
/// and Wilkinson, Handbook for Auto. Comp., Vol.ii-Linear Algebra, and
/// the corresponding EISPACK subroutine.
fn tql2(v: &mut [[f64; 3]; 3], d: &mut [f64; 3], e: &mut [f64; 3]) {
    const N: usize = 3;

    for i in 1..N {
        e[i - 1] = e[i];
    }
    e[N - 1] = 0.0;

    let mut f: f64 = 0.0;
    let mut tst1: f64 = 0.0;
    let eps: f64 = 2.0f64.powi(-52);

    for l in 0..N {
        tst1 = tst1.max(d[l].abs() + e[l].abs());
        let mut m = l;
        while m < N {
            if e[m].abs() <= eps * tst1 {
                break;
            }
            m += 1;
        }

        if m > l {
            loop {
                let g = d[l];
                let mut p = (d[l + 1] - g) / (2.0 * e[l]);
                let mut r = hypot(p, 1.0);
                if p < 0.0 {
                    r = -r;
                }
                d[l] = e[l] / (p + r);
                d[l + 1] = e[l] * (p + r);
                let dl1 = d[l + 1];
                let h = g - d[l];
                for i in (l + 2)..N {
                    d[i] -= h;
                }
                f += h;

                p = d[m];
                let mut c = 1.0;
                let mut c2 = c;
                let mut c3 = c;
                let el1 = e[l + 1];
                let mut s = 0.0;
                let mut s2 = 0.0;

                for i in (l..m).rev() {
                    c3 = c2;
                    c2 = c;
                    s2 = s;
                    let g = c * e[i];
                    let h = c * p;
                    r = hypot(p, e[i]);
                    e[i + 1] = s * r;
                    s = e[i] / r;
                    c = p / r;
                    p = c * d[i] - s * g;
                    d[i + 1] = h + s * (c * g + s * d[i]);

                    for k in 0..N {
                        let vh = v[k][i + 1];
                        v[k][i + 1] = s * v[k][i] + c * vh;
                        v[k][i] = c * v[k][i] - s * vh;
                    }
                }
                p = -s * s2 * c3 * el1 * e[l] / dl1;
                e[l] = s * p;
                d[l] = c * p;

                if e[l].abs() <= eps * tst1 {
                    break;
                }
            }
        }
        d[l] += f;
        e[l] = 0.0;
    }

    for i in 0..(N - 1) {
        let mut k = i;
        let mut p = d[i];
        for j in (i + 1)..N {
            if d[j] < p {
                k = j;
                p = d[j];
            }
        }
        if k != i {
            d[k] = d[i];
            d[i] = p;
            for j in 0..N {
                v[j].swap(i, k);
            }
        }
    }
}

#[inline]
fn hypot(x: f64, y: f64) -> f64 {
    (x * x + y * y).sqrt()
}
