//! Vessel-wall rugosity and the air-core airway test.
//!
//! A healthy lumen has low-variance curvature along its length; a mural
//! thrombus bulges the wall and produces a localized curvature anomaly.
//! The descriptor triangulates the component's surface voxels and
//! measures the variance of the discrete mean curvature over interior
//! vertices.
//!
//! The air-core test separates bronchi from vessels: an airway is a tube
//! of air, so even when only its wall was segmented the enclosed
//! interior sits near -1000 HU, while a thrombosed artery is solid soft
//! tissue. A low percentile of the HU distribution over the air the
//! component wraps around is a robust discriminator. Only enclosed air
//! counts; parenchyma next to a solid plug must not trip the test.
//!
//! Meyer, M., Desbrun, M., Schroeder, P., Barr, A.H. (2003).
//! Discrete differential-geometry operators for triangulated 2-manifolds.

use delaunator::{triangulate, Point};
use std::f64::consts::PI;

use crate::config::GeometryParams;
use crate::morphology::{dilate_iter, fill_holes_2d, surface_voxels, Connectivity};
#[cfg(test)]
use crate::volume::vidx;

/// Surface analysis of one candidate component.
#[derive(Debug, Clone)]
pub struct RugosityReport {
    /// Variance of mean curvature over interior surface vertices.
    pub curvature_variance: f64,
    /// Variance above the configured threshold.
    pub wall_deformed: bool,
    /// Air-core test verdict.
    pub is_bronchus: bool,
    pub bronchus_confidence: f64,
    /// Surface vertices analyzed.
    pub surface_points: usize,
}

#[derive(Debug, Clone, Copy)]
struct Point3 {
    x: f64,
    y: f64,
    z: f64,
}

impl Point3 {
    fn sub(&self, o: &Point3) -> Point3 {
        Point3 {
            x: self.x - o.x,
            y: self.y - o.y,
            z: self.z - o.z,
        }
    }
    fn add(&self, o: &Point3) -> Point3 {
        Point3 {
            x: self.x + o.x,
            y: self.y + o.y,
            z: self.z + o.z,
        }
    }
    fn scale(&self, s: f64) -> Point3 {
        Point3 {
            x: self.x * s,
            y: self.y * s,
            z: self.z * s,
        }
    }
    fn dot(&self, o: &Point3) -> f64 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }
    fn cross(&self, o: &Point3) -> Point3 {
        Point3 {
            x: self.y * o.z - self.z * o.y,
            y: self.z * o.x - self.x * o.z,
            z: self.x * o.y - self.y * o.x,
        }
    }
    fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }
    fn normalize(&self) -> Point3 {
        let n = self.norm();
        if n > 1e-12 {
            self.scale(1.0 / n)
        } else {
            *self
        }
    }
}

/// Analyze a single connected component.
pub fn analyze_component_surface(
    component: &[u8],
    data: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    spacing: (f64, f64, f64),
    params: &GeometryParams,
) -> RugosityReport {
    let (is_bronchus, bronchus_confidence) =
        air_core_test(component, data, nx, ny, nz, params.bronchus_air_hu);

    let surface = surface_voxels(component, nx, ny, nz);
    if surface.len() < 8 {
        return RugosityReport {
            curvature_variance: 0.0,
            wall_deformed: false,
            is_bronchus,
            bronchus_confidence,
            surface_points: surface.len(),
        };
    }

    // Physical-space surface points, projected onto the two most spread
    // axes for the planar triangulation.
    let points: Vec<Point3> = surface
        .iter()
        .map(|&idx| {
            let k = idx / (nx * ny);
            let rem = idx % (nx * ny);
            Point3 {
                x: (rem % nx) as f64 * spacing.0,
                y: (rem / nx) as f64 * spacing.1,
                z: k as f64 * spacing.2,
            }
        })
        .collect();

    let curvatures = mean_curvature_per_vertex(&points);
    let interior: Vec<f64> = curvatures.into_iter().flatten().collect();
    if interior.len() < 4 {
        return RugosityReport {
            curvature_variance: 0.0,
            wall_deformed: false,
            is_bronchus,
            bronchus_confidence,
            surface_points: surface.len(),
        };
    }

    let mean = interior.iter().sum::<f64>() / interior.len() as f64;
    let variance =
        interior.iter().map(|c| (c - mean) * (c - mean)).sum::<f64>() / interior.len() as f64;

    RugosityReport {
        curvature_variance: variance,
        wall_deformed: variance > params.rugosity_variance_threshold,
        is_bronchus,
        bronchus_confidence,
        surface_points: surface.len(),
    }
}

/// 10th-percentile HU over the component's enclosed interior against the
/// airway air threshold. The interior is the slicewise fill of the
/// one-step dilation minus the dilation itself, so only air the wall
/// wraps around is sampled.
fn air_core_test(
    component: &[u8],
    data: &[f64],
    nx: usize,
    ny: usize,
    nz: usize,
    air_hu: f64,
) -> (bool, f64) {
    let dilated = dilate_iter(component, nx, ny, nz, 1, Connectivity::Six);
    let filled = fill_holes_2d(&dilated, nx, ny, nz);
    let mut values: Vec<f64> = filled
        .iter()
        .zip(dilated.iter())
        .zip(data.iter())
        .filter(|((&f, &d), _)| f > 0 && d == 0)
        .map(|(_, &v)| v)
        .collect();
    if values.len() < 10 {
        return (false, 0.0);
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p10 = values[values.len() / 10];
    if p10 < air_hu {
        (true, 0.95)
    } else {
        (false, 0.0)
    }
}

/// Discrete mean curvature per vertex after a 2D Delaunay triangulation
/// on the two axes with the widest spread (z treated as the height
/// field). Hull vertices return `None`; their curvature is unreliable.
fn mean_curvature_per_vertex(points: &[Point3]) -> Vec<Option<f64>> {
    let n_points = points.len();
    let mut result = vec![None; n_points];
    if n_points < 3 {
        return result;
    }

    // Spread per axis decides the projection plane.
    let spread = |f: fn(&Point3) -> f64| {
        let min = points.iter().map(f).fold(f64::INFINITY, f64::min);
        let max = points.iter().map(f).fold(f64::NEG_INFINITY, f64::max);
        max - min
    };
    let sx = spread(|p| p.x);
    let sy = spread(|p| p.y);
    let sz = spread(|p| p.z);

    // Remap so the two widest axes become the triangulation plane.
    let remapped: Vec<Point3> = points
        .iter()
        .map(|p| {
            if sz >= sx.min(sy) {
                if sx <= sy && sx <= sz {
                    // x is narrowest: plane (y, z), height x
                    Point3 {
                        x: p.y,
                        y: p.z,
                        z: p.x,
                    }
                } else if sy <= sx && sy <= sz {
                    Point3 {
                        x: p.x,
                        y: p.z,
                        z: p.y,
                    }
                } else {
                    *p
                }
            } else {
                *p
            }
        })
        .collect();

    let coords: Vec<Point> = remapped.iter().map(|p| Point { x: p.x, y: p.y }).collect();
    let tri = triangulate(&coords);
    if tri.triangles.is_empty() {
        return result;
    }

    let mut boundary = vec![false; n_points];
    for &idx in &tri.hull {
        boundary[idx] = true;
    }

    let mut area_mixed = vec![0.0f64; n_points];
    let mut mean_curv_vec = vec![
        Point3 {
            x: 0.0,
            y: 0.0,
            z: 0.0
        };
        n_points
    ];
    let mut normal_vec = mean_curv_vec.clone();

    for t in tri.triangles.chunks(3) {
        let (v0, v1, v2) = (t[0], t[1], t[2]);
        let p0 = &remapped[v0];
        let p1 = &remapped[v1];
        let p2 = &remapped[v2];

        let e01 = p1.sub(p0);
        let e12 = p2.sub(p1);
        let e20 = p0.sub(p2);

        let l01 = e01.norm();
        let l12 = e12.norm();
        let l20 = e20.norm();
        if l01 < 1e-10 || l12 < 1e-10 || l20 < 1e-10 {
            continue;
        }

        let cross = e01.cross(&e12.scale(-1.0));
        let area = 0.5 * cross.norm();
        if area < 1e-10 {
            continue;
        }
        let face_normal = cross.normalize();

        let cos_a0 = e01.normalize().dot(&e20.scale(-1.0).normalize());
        let cos_a1 = e01.scale(-1.0).normalize().dot(&e12.normalize());
        let cos_a2 = e12.scale(-1.0).normalize().dot(&e20.normalize());

        let a0 = cos_a0.clamp(-1.0, 1.0).acos();
        let a1 = cos_a1.clamp(-1.0, 1.0).acos();
        let a2 = cos_a2.clamp(-1.0, 1.0).acos();

        let cot_a0 = cos_a0 / (1.0 - cos_a0 * cos_a0).sqrt().max(1e-10);
        let cot_a1 = cos_a1 / (1.0 - cos_a1 * cos_a1).sqrt().max(1e-10);
        let cot_a2 = cos_a2 / (1.0 - cos_a2 * cos_a2).sqrt().max(1e-10);

        let obtuse_0 = a0 > PI / 2.0;
        let obtuse_1 = a1 > PI / 2.0;
        let obtuse_2 = a2 > PI / 2.0;

        if obtuse_0 {
            area_mixed[v0] += area / 2.0;
        } else if obtuse_1 || obtuse_2 {
            area_mixed[v0] += area / 4.0;
        } else {
            area_mixed[v0] += (l20 * l20 * cot_a1 + l01 * l01 * cot_a2) / 8.0;
        }
        if obtuse_1 {
            area_mixed[v1] += area / 2.0;
        } else if obtuse_0 || obtuse_2 {
            area_mixed[v1] += area / 4.0;
        } else {
            area_mixed[v1] += (l01 * l01 * cot_a2 + l12 * l12 * cot_a0) / 8.0;
        }
        if obtuse_2 {
            area_mixed[v2] += area / 2.0;
        } else if obtuse_0 || obtuse_1 {
            area_mixed[v2] += area / 4.0;
        } else {
            area_mixed[v2] += (l12 * l12 * cot_a0 + l20 * l20 * cot_a1) / 8.0;
        }

        mean_curv_vec[v0] = mean_curv_vec[v0].add(&e01.scale(cot_a2).add(&e20.scale(-cot_a1)));
        mean_curv_vec[v1] = mean_curv_vec[v1].add(&e12.scale(cot_a0).add(&e01.scale(-cot_a2)));
        mean_curv_vec[v2] = mean_curv_vec[v2].add(&e20.scale(cot_a1).add(&e12.scale(-cot_a0)));

        normal_vec[v0] = normal_vec[v0].add(&face_normal);
        normal_vec[v1] = normal_vec[v1].add(&face_normal);
        normal_vec[v2] = normal_vec[v2].add(&face_normal);
    }

    for i in 0..n_points {
        if boundary[i] || area_mixed[i] <= 1e-10 {
            continue;
        }
        let mc_vec = mean_curv_vec[i].scale(0.25 / area_mixed[i]);
        let mag = mc_vec.norm();
        let sign = if mc_vec.dot(&normal_vec[i].normalize()) < 0.0 {
            -1.0
        } else {
            1.0
        };
        result[i] = Some(sign * mag);
    }

    result
}
