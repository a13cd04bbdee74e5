//! Binary-mask morphology for 3D volumes.
//!
//! All operations work on flat `Vec<u8>` masks in Fortran order and are
//! deterministic. Erosion/dilation come in two flavors: a spherical
//! structuring element of a given voxel radius, and iterated unit-radius
//! passes (the resolution-adaptive pieces of the pipeline derive an
//! iteration count from mm and voxel spacing).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::volume::vidx;

/// Neighborhood connectivity for labelling and unit-radius passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Faces only (6 neighbors).
    Six,
    /// Faces, edges and corners (26 neighbors).
    TwentySix,
}

pub(crate) fn neighbor_offsets(conn: Connectivity) -> Vec<(i32, i32, i32)> {
    let mut offsets = Vec::new();
    for dz in -1i32..=1 {
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                if dx == 0 && dy == 0 && dz == 0 {
                    continue;
                }
                let manhattan = dx.abs() + dy.abs() + dz.abs();
                match conn {
                    Connectivity::Six if manhattan != 1 => continue,
                    _ => offsets.push((dx, dy, dz)),
                }
            }
        }
    }
    offsets
}

/// Dilate a binary mask with a spherical structuring element.
pub fn dilate_mask(mask: &[u8], nx: usize, ny: usize, nz: usize, radius: i32) -> Vec<u8> {
    let mut dilated = vec![0u8; nx * ny * nz];

    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                if mask[vidx(i, j, k, nx, ny)] == 0 {
                    continue;
                }
                for dz in -radius..=radius {
                    for dy in -radius..=radius {
                        for dx in -radius..=radius {
                            if dx * dx + dy * dy + dz * dz > radius * radius {
                                continue;
                            }
                            let ni = i as i32 + dx;
                            let nj = j as i32 + dy;
                            let nk = k as i32 + dz;
                            if ni >= 0
                                && ni < nx as i32
                                && nj >= 0
                                && nj < ny as i32
                                && nk >= 0
                                && nk < nz as i32
                            {
                                dilated[vidx(ni as usize, nj as usize, nk as usize, nx, ny)] = 1;
                            }
                        }
                    }
                }
            }
        }
    }

    dilated
}

/// Iterated unit-radius dilation. One pass adds the chosen neighborhood
/// of every set voxel; `iters` passes approximate a ball of that many
/// voxels.
pub fn dilate_iter(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    iters: usize,
    conn: Connectivity,
) -> Vec<u8> {
    let offsets = neighbor_offsets(conn);
    let mut current = mask.to_vec();
    // Frontier-based passes: only voxels set in the previous round can
    // grow the mask further.
    let mut frontier: Vec<usize> = current
        .iter()
        .enumerate()
        .filter(|(_, &v)| v > 0)
        .map(|(i, _)| i)
        .collect();

    for _ in 0..iters {
        let mut next_frontier = Vec::new();
        for &idx in &frontier {
            let k = idx / (nx * ny);
            let rem = idx % (nx * ny);
            let j = rem / nx;
            let i = rem % nx;
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
                let nidx = vidx(ni as usize, nj as usize, nk as usize, nx, ny);
                if current[nidx] == 0 {
                    current[nidx] = 1;
                    next_frontier.push(nidx);
                }
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    current
}

/// Iterated unit-radius erosion (dual of [`dilate_iter`]; the volume
/// border counts as background).
pub fn erode_iter(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    iters: usize,
    conn: Connectivity,
) -> Vec<u8> {
    let mut inverted: Vec<u8> = mask.iter().map(|&v| if v > 0 { 0 } else { 1 }).collect();
    // Seed the border so erosion eats inward from the volume edge too.
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                if i == 0 || i == nx - 1 || j == 0 || j == ny - 1 || k == 0 || k == nz - 1 {
                    inverted[vidx(i, j, k, nx, ny)] = 1;
                }
            }
        }
    }
    let grown = dilate_iter(&inverted, nx, ny, nz, iters, conn);
    mask.iter()
        .zip(grown.iter())
        .map(|(&m, &g)| if m > 0 && g == 0 { 1 } else { 0 })
        .collect()
}

/// Closing: dilation then erosion, both iterated.
pub fn close_iter(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    iters: usize,
    conn: Connectivity,
) -> Vec<u8> {
    let dilated = dilate_iter(mask, nx, ny, nz, iters, conn);
    erode_iter(&dilated, nx, ny, nz, iters, conn)
}

/// Fill enclosed holes slice by slice along z. A hole is background not
/// reachable from the slice border.
pub fn fill_holes_2d(mask: &[u8], nx: usize, ny: usize, nz: usize) -> Vec<u8> {
    let mut filled = mask.to_vec();
    let slice_len = nx * ny;
    let mut outside = vec![false; slice_len];
    let mut stack = Vec::new();

    for k in 0..nz {
        let base = k * slice_len;
        outside.iter_mut().for_each(|v| *v = false);
        stack.clear();

        for i in 0..nx {
            for &j in &[0usize, ny - 1] {
                let s = i + j * nx;
                if mask[base + s] == 0 && !outside[s] {
                    outside[s] = true;
                    stack.push(s);
                }
            }
        }
        for j in 0..ny {
            for &i in &[0usize, nx - 1] {
                let s = i + j * nx;
                if mask[base + s] == 0 && !outside[s] {
                    outside[s] = true;
                    stack.push(s);
                }
            }
        }

        while let Some(s) = stack.pop() {
            let i = s % nx;
            let j = s / nx;
            for (di, dj) in [(-1i32, 0i32), (1, 0), (0, -1), (0, 1)] {
                let ni = i as i32 + di;
                let nj = j as i32 + dj;
                if ni < 0 || ni >= nx as i32 || nj < 0 || nj >= ny as i32 {
                    continue;
                }
                let ns = ni as usize + nj as usize * nx;
                if mask[base + ns] == 0 && !outside[ns] {
                    outside[ns] = true;
                    stack.push(ns);
                }
            }
        }

        for s in 0..slice_len {
            if mask[base + s] == 0 && !outside[s] {
                filled[base + s] = 1;
            }
        }
    }

    filled
}

/// Label connected components. Returns (labels, component count); labels
/// are 1-based, 0 is background.
pub fn label_components(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    conn: Connectivity,
) -> (Vec<u32>, usize) {
    let offsets = neighbor_offsets(conn);
    let mut labels = vec![0u32; mask.len()];
    let mut next_label = 0u32;
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if mask[start] == 0 || labels[start] != 0 {
            continue;
        }
        next_label += 1;
        labels[start] = next_label;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            let k = idx / (nx * ny);
            let rem = idx % (nx * ny);
            let j = rem / nx;
            let i = rem % nx;
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
                let nidx = vidx(ni as usize, nj as usize, nk as usize, nx, ny);
                if mask[nidx] > 0 && labels[nidx] == 0 {
                    labels[nidx] = next_label;
                    stack.push(nidx);
                }
            }
        }
    }

    (labels, next_label as usize)
}

/// Voxel count per label (index 0 unused).
pub fn component_sizes(labels: &[u32], count: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; count + 1];
    for &l in labels {
        sizes[l as usize] += 1;
    }
    sizes
}

/// Drop components smaller than `min_size`.
pub fn remove_small_objects(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    min_size: usize,
    conn: Connectivity,
) -> Vec<u8> {
    let (labels, count) = label_components(mask, nx, ny, nz, conn);
    let sizes = component_sizes(&labels, count);
    labels
        .iter()
        .map(|&l| {
            if l > 0 && sizes[l as usize] >= min_size {
                1
            } else {
                0
            }
        })
        .collect()
}

const BIG: f64 = 1e20;

/// One pass of the Felzenszwalb-Huttenlocher lower envelope along a line
/// with sample pitch `s` (mm). `f` holds squared distances in, squared
/// distances out.
fn dt_line(f: &[f64], s: f64, out: &mut [f64]) {
    let n = f.len();
    if n == 1 {
        out[0] = f[0];
        return;
    }
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let mut k = 0usize;
    z[0] = -BIG;
    z[1] = BIG;

    let x = |q: usize| q as f64 * s;
    for q in 1..n {
        let mut sep =
            ((f[q] + x(q) * x(q)) - (f[v[k]] + x(v[k]) * x(v[k]))) / (2.0 * x(q) - 2.0 * x(v[k]));
        while sep <= z[k] {
            k -= 1;
            sep = ((f[q] + x(q) * x(q)) - (f[v[k]] + x(v[k]) * x(v[k])))
                / (2.0 * x(q) - 2.0 * x(v[k]));
        }
        k += 1;
        v[k] = q;
        z[k] = sep;
        z[k + 1] = BIG;
    }

    k = 0;
    for q in 0..n {
        while z[k + 1] < x(q) {
            k += 1;
        }
        let d = x(q) - x(v[k]);
        out[q] = d * d + f[v[k]];
    }
}

/// Exact Euclidean distance transform: for every foreground voxel, the
/// distance in mm to the nearest background voxel. Anisotropic spacing is
/// honored per axis. Background voxels get 0.
pub fn distance_transform_edt(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    spacing: (f64, f64, f64),
) -> Vec<f64> {
    let mut sq: Vec<f64> = mask
        .iter()
        .map(|&v| if v > 0 { BIG } else { 0.0 })
        .collect();

    // x lines
    let mut line = vec![0.0f64; nx.max(ny).max(nz)];
    let mut out_line = vec![0.0f64; nx.max(ny).max(nz)];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                line[i] = sq[vidx(i, j, k, nx, ny)];
            }
            dt_line(&line[..nx], spacing.0, &mut out_line[..nx]);
            for i in 0..nx {
                sq[vidx(i, j, k, nx, ny)] = out_line[i];
            }
        }
    }
    // y lines
    for k in 0..nz {
        for i in 0..nx {
            for j in 0..ny {
                line[j] = sq[vidx(i, j, k, nx, ny)];
            }
            dt_line(&line[..ny], spacing.1, &mut out_line[..ny]);
            for j in 0..ny {
                sq[vidx(i, j, k, nx, ny)] = out_line[j];
            }
        }
    }
    // z lines
    for j in 0..ny {
        for i in 0..nx {
            for k in 0..nz {
                line[k] = sq[vidx(i, j, k, nx, ny)];
            }
            dt_line(&line[..nz], spacing.2, &mut out_line[..nz]);
            for k in 0..nz {
                sq[vidx(i, j, k, nx, ny)] = out_line[k];
            }
        }
    }

    sq.iter().map(|&d| d.min(BIG).sqrt()).collect()
}

/// Medial-axis approximation as the ridge of the Euclidean distance
/// transform: a mask voxel stays when no 26-neighbor inside the mask
/// exceeds its distance by more than half a voxel. Returns the ridge
/// mask together with the distance field, whose value on a ridge voxel
/// is the inscribed-sphere radius in mm.
pub fn edt_ridge(
    mask: &[u8],
    nx: usize,
    ny: usize,
    nz: usize,
    spacing: (f64, f64, f64),
) -> (Vec<u8>, Vec<f64>) {
    let edt = distance_transform_edt(mask, nx, ny, nz, spacing);
    let (sx, sy, sz) = spacing;
    let tol = 0.5 * sx.min(sy).min(sz);
    let offsets = neighbor_offsets(Connectivity::TwentySix);

    let mut ridge = vec![0u8; nx * ny * nz];
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let idx = vidx(i, j, k, nx, ny);
                if mask[idx] == 0 {
                    continue;
                }
                let mut is_ridge = true;
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
                    let nidx = vidx(ni as usize, nj as usize, nk as usize, nx, ny);
                    if mask[nidx] > 0 && edt[nidx] > edt[idx] + tol {
                        is_ridge = false;
                        break;
                    }
                }
                if is_ridge {
                    ridge[idx] = 1;
                }
            }
        }
    }
    (ridge, edt)
}

/// Multi-source geodesic-style nearest-feature transform. For each voxel
/// returns (chamfer distance in mm to the nearest feature voxel, index of
/// that feature in `features`). Dijkstra over the 26-neighborhood with
/// anisotropic step costs; ties resolve to the lowest feature index, so
/// the result is deterministic.
pub fn nearest_feature_transform(
    features: &[usize],
    nx: usize,
    ny: usize,
    nz: usize,
    spacing: (f64, f64, f64),
) -> (Vec<f64>, Vec<u32>) {
    let n = nx * ny * nz;
    let mut dist = vec![f64::INFINITY; n];
    let mut nearest = vec![u32::MAX; n];
    let mut heap: BinaryHeap<Reverse<(u64, usize, u32)>> = BinaryHeap::new();

    // Distances keyed as integer nanometers for a total order in the heap.
    let key = |d: f64| (d * 1e6) as u64;

    for (fi, &idx) in features.iter().enumerate() {
        if dist[idx] > 0.0 {
            dist[idx] = 0.0;
            nearest[idx] = fi as u32;
            heap.push(Reverse((0, idx, fi as u32)));
        }
    }

    let offsets = neighbor_offsets(Connectivity::TwentySix);
    let step: Vec<f64> = offsets
        .iter()
        .map(|&(dx, dy, dz)| {
            let ex = dx as f64 * spacing.0;
            let ey = dy as f64 * spacing.1;
            let ez = dz as f64 * spacing.2;
            (ex * ex + ey * ey + ez * ez).sqrt()
        })
        .collect();

    while let Some(Reverse((dkey, idx, src))) = heap.pop() {
        if dkey > key(dist[idx]) || src != nearest[idx] {
            continue;
        }
        let k = idx / (nx * ny);
        let rem = idx % (nx * ny);
        let j = rem / nx;
        let i = rem % nx;
        for (oi, &(dx, dy, dz)) in offsets.iter().enumerate() {
            let ni = i as i32 + dx;
            let nj = j as i32 + dy;
            let nk = k as i32 + dz;
            if ni < 0 || ni >= nx as i32 || nj < 0 || nj >= ny as i32 || nk < 0 || nk >= nz as i32
            {
                continue;
            }
            let nidx = vidx(ni as usize, nj as usize, nk as usize, nx, ny);
            let nd = dist[idx] + step[oi];
            if nd < dist[nidx] || (nd == dist[nidx] && src < nearest[nidx]) {
                dist[nidx] = nd;
                nearest[nidx] = src;
                heap.push(Reverse((key(nd), nidx, src)));
            }
        }
    }

    (dist, nearest)
}

/// Surface voxels: members of the mask whose unit erosion removed them.
pub fn surface_voxels(mask: &[u8], nx: usize, ny: usize, nz: usize) -> Vec<usize> {
    let eroded = erode_iter(mask, nx, ny, nz, 1, Connectivity::Six);
    mask.iter()
        .zip(eroded.iter())
        .enumerate()
        .filter(|(_, (&m, &e))| m != 0 && e == 0)
        .map(|(i, _)| i)
        .collect()
}

/// Number of set voxels.
#[inline]
pub fn mask_volume(mask: &[u8]) -> usize {
    mask.iter().filter(|&&v| v > 0).count()
}
