//! CT volume container and the bounding-box frame used to confine the
//! per-voxel tensor math to the arterial subregion.
//!
//! Storage convention for every field and mask in this crate: flat slice
//! in Fortran order, `index = i + j*nx + k*nx*ny`, with axis 0 = x
//! (left-right), axis 1 = y (anterior-posterior) and axis 2 = z (the
//! principal, inferior-superior axis). Anchor coordinates in reports use
//! the same (x, y, z) order.

use crate::error::EngineError;

/// A calibrated CT volume in Hounsfield units. Immutable once built;
/// all masks and maps produced from it share its shape and spacing.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Density values in HU, Fortran order.
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz).
    pub dims: (usize, usize, usize),
    /// Voxel spacing in mm (sx, sy, sz), anisotropic permitted.
    pub spacing: (f64, f64, f64),
}

impl Volume {
    /// Build a volume, validating the input contract. A 2D slice stack
    /// (nz omitted via `dims.2 == 0` with a matching buffer) is promoted
    /// to a single-slice 3D volume.
    pub fn new(
        data: Vec<f64>,
        dims: (usize, usize, usize),
        spacing: (f64, f64, f64),
    ) -> Result<Self, EngineError> {
        let (nx, ny, mut nz) = dims;
        // A 2D slice arrives with nz unset; promote it to one z slice.
        if nz == 0 && nx * ny == data.len() && !data.is_empty() {
            nz = 1;
        }
        if nx == 0 || ny == 0 || nz == 0 || data.is_empty() {
            return Err(EngineError::EmptyVolume(nx, ny, nz));
        }
        if data.len() != nx * ny * nz {
            return Err(EngineError::ShapeMismatch {
                len: data.len(),
                nx,
                ny,
                nz,
            });
        }
        let (sx, sy, sz) = spacing;
        if !(sx.is_finite() && sy.is_finite() && sz.is_finite())
            || sx <= 0.0
            || sy <= 0.0
            || sz <= 0.0
        {
            return Err(EngineError::InvalidSpacing(sx, sy, sz));
        }
        Ok(Volume {
            data,
            dims: (nx, ny, nz),
            spacing,
        })
    }

    /// Linear index for voxel (i, j, k).
    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        let (nx, ny, _) = self.dims;
        i + j * nx + k * nx * ny
    }

    /// Total number of voxels.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Volume of one voxel in mm^3.
    #[inline]
    pub fn voxel_volume_mm3(&self) -> f64 {
        self.spacing.0 * self.spacing.1 * self.spacing.2
    }
}

/// Convert (i, j, k) to a linear index for free-standing fields.
#[inline]
pub fn vidx(i: usize, j: usize, k: usize, nx: usize, ny: usize) -> usize {
    i + j * nx + k * nx * ny
}

/// Inclusive voxel bounding box. Computed from a mask and expanded by a
/// margin, it is the frame inside which all Hessian / structure-tensor /
/// texture math runs. Derivative fields are never allocated at full
/// chest extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x0: usize,
    pub x1: usize,
    pub y0: usize,
    pub y1: usize,
    pub z0: usize,
    pub z1: usize,
}

impl BoundingBox {
    /// Tight box around the non-zero voxels of `mask`, or `None` when the
    /// mask is empty.
    pub fn of_mask(mask: &[u8], nx: usize, ny: usize, nz: usize) -> Option<Self> {
        let mut bb = BoundingBox {
            x0: nx,
            x1: 0,
            y0: ny,
            y1: 0,
            z0: nz,
            z1: 0,
        };
        let mut any = false;
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    if mask[vidx(i, j, k, nx, ny)] > 0 {
                        any = true;
                        bb.x0 = bb.x0.min(i);
                        bb.x1 = bb.x1.max(i);
                        bb.y0 = bb.y0.min(j);
                        bb.y1 = bb.y1.max(j);
                        bb.z0 = bb.z0.min(k);
                        bb.z1 = bb.z1.max(k);
                    }
                }
            }
        }
        if any {
            Some(bb)
        } else {
            None
        }
    }

    /// Expand by `margin` voxels on every face, clamped to the volume.
    pub fn expanded(&self, margin: usize, nx: usize, ny: usize, nz: usize) -> Self {
        BoundingBox {
            x0: self.x0.saturating_sub(margin),
            x1: (self.x1 + margin).min(nx - 1),
            y0: self.y0.saturating_sub(margin),
            y1: (self.y1 + margin).min(ny - 1),
            z0: self.z0.saturating_sub(margin),
            z1: (self.z1 + margin).min(nz - 1),
        }
    }

    /// Box dimensions (nx, ny, nz).
    #[inline]
    pub fn dims(&self) -> (usize, usize, usize) {
        (
            self.x1 - self.x0 + 1,
            self.y1 - self.y0 + 1,
            self.z1 - self.z0 + 1,
        )
    }

    #[inline]
    pub fn num_voxels(&self) -> usize {
        let (bx, by, bz) = self.dims();
        bx * by * bz
    }

    /// Copy the boxed subregion of a full-frame scalar field.
    pub fn crop_f64(&self, full: &[f64], nx: usize, ny: usize) -> Vec<f64> {
        let (bx, by, bz) = self.dims();
        let mut out = vec![0.0; bx * by * bz];
        for k in 0..bz {
            for j in 0..by {
                for i in 0..bx {
                    out[vidx(i, j, k, bx, by)] =
                        full[vidx(self.x0 + i, self.y0 + j, self.z0 + k, nx, ny)];
                }
            }
        }
        out
    }

    /// Copy the boxed subregion of a full-frame mask.
    pub fn crop_u8(&self, full: &[u8], nx: usize, ny: usize) -> Vec<u8> {
        let (bx, by, bz) = self.dims();
        let mut out = vec![0u8; bx * by * bz];
        for k in 0..bz {
            for j in 0..by {
                for i in 0..bx {
                    out[vidx(i, j, k, bx, by)] =
                        full[vidx(self.x0 + i, self.y0 + j, self.z0 + k, nx, ny)];
                }
            }
        }
        out
    }

    /// Write a boxed scalar field back into a full-frame field.
    pub fn paste_f64(&self, boxed: &[f64], full: &mut [f64], nx: usize, ny: usize) {
        let (bx, by, bz) = self.dims();
        for k in 0..bz {
            for j in 0..by {
                for i in 0..bx {
                    full[vidx(self.x0 + i, self.y0 + j, self.z0 + k, nx, ny)] =
                        boxed[vidx(i, j, k, bx, by)];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_validates_shape() {
        assert!(Volume::new(vec![0.0; 8], (2, 2, 2), (1.0, 1.0, 1.0)).is_ok());
        assert!(matches!(
            Volume::new(vec![0.0; 7], (2, 2, 2), (1.0, 1.0, 1.0)),
            Err(EngineError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            Volume::new(vec![], (0, 0, 0), (1.0, 1.0, 1.0)),
            Err(EngineError::EmptyVolume(..))
        ));
    }

    #[test]
    fn test_volume_rejects_bad_spacing() {
        for spacing in [
            (0.0, 1.0, 1.0),
            (1.0, -0.5, 1.0),
            (1.0, 1.0, f64::NAN),
            (f64::INFINITY, 1.0, 1.0),
        ] {
            assert!(matches!(
                Volume::new(vec![0.0; 8], (2, 2, 2), spacing),
                Err(EngineError::InvalidSpacing(..))
            ));
        }
    }

    #[test]
    fn test_volume_promotes_2d_stack() {
        let v = Volume::new(vec![1.0; 16], (4, 4, 0), (1.0, 1.0, 1.0)).unwrap();
        assert_eq!(v.dims, (4, 4, 1));
    }

    #[test]
    fn test_index_is_fortran_order() {
        let v = Volume::new(vec![0.0; 24], (2, 3, 4), (1.0, 1.0, 1.0)).unwrap();
        assert_eq!(v.index(0, 0, 0), 0);
        assert_eq!(v.index(1, 0, 0), 1);
        assert_eq!(v.index(0, 1, 0), 2);
        assert_eq!(v.index(0, 0, 1), 6);
        assert_eq!(v.index(1, 2, 3), 1 + 2 * 2 + 3 * 6);
    }

    #[test]
    fn test_bounding_box_of_mask() {
        let (nx, ny, nz) = (10, 10, 10);
        let mut mask = vec![0u8; nx * ny * nz];
        mask[vidx(3, 4, 5, nx, ny)] = 1;
        mask[vidx(6, 4, 7, nx, ny)] = 1;

        let bb = BoundingBox::of_mask(&mask, nx, ny, nz).unwrap();
        assert_eq!((bb.x0, bb.x1), (3, 6));
        assert_eq!((bb.y0, bb.y1), (4, 4));
        assert_eq!((bb.z0, bb.z1), (5, 7));

        let empty = vec![0u8; nx * ny * nz];
        assert!(BoundingBox::of_mask(&empty, nx, ny, nz).is_none());
    }

    #[test]
    fn test_bounding_box_expand_clamps() {
        let bb = BoundingBox {
            x0: 1,
            x1: 8,
            y0: 0,
            y1: 9,
            z0: 2,
            z1: 3,
        };
        let e = bb.expanded(3, 10, 10, 10);
        assert_eq!((e.x0, e.x1), (0, 9));
        assert_eq!((e.y0, e.y1), (0, 9));
        assert_eq!((e.z0, e.z1), (0, 6));
    }

    #[test]
    fn test_crop_paste_round_trip() {
        let (nx, ny, nz) = (6, 5, 4);
        let full: Vec<f64> = (0..nx * ny * nz).map(|i| i as f64).collect();
        let bb = BoundingBox {
            x0: 1,
            x1: 4,
            y0: 2,
            y1: 3,
            z0: 0,
            z1: 2,
        };
        let boxed = bb.crop_f64(&full, nx, ny);
        assert_eq!(boxed.len(), bb.num_voxels());
        assert_eq!(boxed[0], full[vidx(1, 2, 0, nx, ny)]);

        let mut restored = vec![0.0; nx * ny * nz];
        bb.paste_f64(&boxed, &mut restored, nx, ny);
        assert_eq!(restored[vidx(3, 3, 1, nx, ny)], full[vidx(3, 3, 1, nx, ny)]);
        // Outside the box stays untouched.
        assert_eq!(restored[vidx(5, 0, 3, nx, ny)], 0.0);
    }
}
