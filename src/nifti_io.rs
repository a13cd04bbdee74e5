//! NIfTI I/O for the topology worker handoff.
//!
//! The worker adapter writes the vessel mask to disk as `.nii.gz`, the
//! external process reads it and writes a radius volume back. Masks are
//! written with a hand-rolled NIfTI-1 header (uint8 payload); volumes
//! are read through the `nifti` crate so any datatype the worker emits
//! comes back as f64.

use std::io::Cursor;
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiObject};

use crate::error::EngineError;

/// Volume loaded from a NIfTI file.
pub struct NiftiVolume {
    /// Values as f64, Fortran order (x fastest).
    pub data: Vec<f64>,
    pub dims: (usize, usize, usize),
    /// Voxel pitch in mm.
    pub spacing: (f64, f64, f64),
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Parse NIfTI bytes (plain or gzipped) into an f64 volume.
pub fn load_volume_bytes(bytes: &[u8]) -> Result<NiftiVolume, EngineError> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        let decoder = GzDecoder::new(Cursor::new(bytes));
        InMemNiftiObject::from_reader(decoder)
            .map_err(|e| EngineError::MaskIo(format!("gzipped NIfTI parse: {}", e)))?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| EngineError::MaskIo(format!("NIfTI parse: {}", e)))?
    };

    let header = obj.header();
    let pixdim = header.pixdim;
    let spacing = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);

    let slope = if header.scl_slope == 0.0 {
        1.0
    } else {
        header.scl_slope as f64
    };
    let inter = header.scl_inter as f64;

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| EngineError::MaskIo(format!("NIfTI to ndarray: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(EngineError::MaskIo(format!(
            "expected 3D volume, got {}D",
            shape.len()
        )));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);

    // Fortran order, first timepoint if 4D.
    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let v = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    array[[i, j, k, 0]]
                };
                data.push(v * slope + inter);
            }
        }
    }

    Ok(NiftiVolume {
        data,
        dims: (nx, ny, nz),
        spacing,
    })
}

/// Read a NIfTI volume from disk, `.nii` or `.nii.gz`.
pub fn read_volume_file(path: &Path) -> Result<NiftiVolume, EngineError> {
    let bytes = std::fs::read(path)?;
    load_volume_bytes(&bytes)
}

/// Serialize a binary mask as an uncompressed NIfTI-1 file (uint8).
pub fn mask_to_nifti_bytes(
    mask: &[u8],
    dims: (usize, usize, usize),
    spacing: (f64, f64, f64),
) -> Result<Vec<u8>, EngineError> {
    let (nx, ny, nz) = dims;
    if mask.len() != nx * ny * nz {
        return Err(EngineError::MaskIo(format!(
            "mask length {} does not match dims {}x{}x{}",
            mask.len(),
            nx,
            ny,
            nz
        )));
    }

    let mut header = [0u8; 348];
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let off = 40 + i * 2;
        header[off..off + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype 2 = UINT8, bitpix 8
    header[70..72].copy_from_slice(&2i16.to_le_bytes());
    header[72..74].copy_from_slice(&8i16.to_le_bytes());

    let pixdim: [f32; 8] = [
        1.0,
        spacing.0 as f32,
        spacing.1 as f32,
        spacing.2 as f32,
        1.0,
        1.0,
        1.0,
        1.0,
    ];
    for (i, &p) in pixdim.iter().enumerate() {
        let off = 76 + i * 4;
        header[off..off + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352, scl_slope = 1, scl_inter = 0
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform: diagonal spacing
    header[254..256].copy_from_slice(&1i16.to_le_bytes());
    let srow_x: [f32; 4] = [spacing.0 as f32, 0.0, 0.0, 0.0];
    let srow_y: [f32; 4] = [0.0, spacing.1 as f32, 0.0, 0.0];
    let srow_z: [f32; 4] = [0.0, 0.0, spacing.2 as f32, 0.0];
    for (i, &v) in srow_x.iter().enumerate() {
        let off = 280 + i * 4;
        header[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }
    for (i, &v) in srow_y.iter().enumerate() {
        let off = 296 + i * 4;
        header[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }
    for (i, &v) in srow_z.iter().enumerate() {
        let off = 312 + i * 4;
        header[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + mask.len());
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; 4]);
    buffer.extend_from_slice(mask);
    Ok(buffer)
}

/// Write a binary mask to disk. Gzips when the path ends with `.nii.gz`.
pub fn write_mask_file(
    path: &Path,
    mask: &[u8],
    dims: (usize, usize, usize),
    spacing: (f64, f64, f64),
) -> Result<(), EngineError> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let raw = mask_to_nifti_bytes(mask, dims, spacing)?;
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .map_err(|e| EngineError::MaskIo(format!("gzip: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| EngineError::MaskIo(format!("gzip finish: {}", e)))?
    } else {
        raw
    };
    std::fs::write(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_detection() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x00]));
        assert!(!is_gzip(&[0x00, 0x00, 0x00]));
        assert!(!is_gzip(&[0x1f]));
    }

    #[test]
    fn test_mask_bytes_header() {
        let mask = vec![0u8; 8];
        let bytes = mask_to_nifti_bytes(&mask, (2, 2, 2), (1.0, 1.0, 1.0)).unwrap();

        assert_eq!(bytes.len(), 352 + 8);
        assert_eq!(&bytes[344..348], b"n+1\0");
        let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);
        assert_eq!(datatype, 2);
        let bitpix = i16::from_le_bytes([bytes[72], bytes[73]]);
        assert_eq!(bitpix, 8);
    }

    #[test]
    fn test_mask_bytes_length_mismatch() {
        let mask = vec![0u8; 7];
        assert!(mask_to_nifti_bytes(&mask, (2, 2, 2), (1.0, 1.0, 1.0)).is_err());
    }

    #[test]
    fn test_mask_roundtrip_plain() {
        let dims = (4, 3, 2);
        let n = dims.0 * dims.1 * dims.2;
        let mask: Vec<u8> = (0..n).map(|i| (i % 2) as u8).collect();
        let spacing = (0.7, 0.7, 1.25);

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mask.nii");
        write_mask_file(&path, &mask, dims, spacing).unwrap();

        let loaded = read_volume_file(&path).unwrap();
        assert_eq!(loaded.dims, dims);
        assert!((loaded.spacing.0 - 0.7).abs() < 1e-5);
        assert!((loaded.spacing.2 - 1.25).abs() < 1e-5);
        for i in 0..n {
            assert!((loaded.data[i] - mask[i] as f64).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mask_roundtrip_gzip() {
        let dims = (3, 3, 3);
        let mut mask = vec![0u8; 27];
        mask[13] = 1;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mask.nii.gz");
        write_mask_file(&path, &mask, dims, (1.0, 1.0, 1.0)).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(is_gzip(&raw));

        let loaded = read_volume_file(&path).unwrap();
        assert_eq!(loaded.dims, dims);
        assert!((loaded.data[13] - 1.0).abs() < 1e-9);
        assert_eq!(loaded.data.iter().filter(|v| **v > 0.5).count(), 1);
    }

    #[test]
    fn test_load_invalid_bytes() {
        assert!(load_volume_bytes(&[0u8; 10]).is_err());
        assert!(load_volume_bytes(&[0x1f, 0x8b, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_volume_file(Path::new("/tmp/does_not_exist_tep.nii"));
        assert!(result.is_err());
    }
}
