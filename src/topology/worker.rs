//! External centerline worker adapter.
//!
//! Contract: the worker is an executable invoked as
//!
//! ```text
//! <command> [args...] --input <mask.nii.gz> --spacing "sx,sy,sz" \
//!     --output-dir <dir>
//! ```
//!
//! and writes into the output directory
//!
//! * `metadata.json` with `ok`, `error`, `n_centerline_points`,
//!   `n_surface_cells` and `truncated_branches`,
//! * `radius_map.nii.gz`, a volume in the mask frame where centerline
//!   voxels carry their inscribed-sphere radius in mm and everything
//!   else is zero.
//!
//! The adapter owns the handoff end to end: scratch directory, mask
//! serialization, process lifetime with a wall-clock timeout, and
//! parsing the artifacts back. Any failure maps to
//! [`EngineError::TopologyWorker`] with the stage that broke, which the
//! resolver treats as a signal to run the skeleton fallback.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::nifti_io::{read_volume_file, write_mask_file};
use crate::topology::{TopologyPort, TopologyRequest, TopologySummary, TruncatedBranch};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct WorkerAdapter {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct WorkerMetadata {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    n_centerline_points: usize,
    #[serde(default)]
    n_surface_cells: usize,
    #[serde(default)]
    truncated_branches: Vec<TruncatedBranch>,
}

impl WorkerAdapter {
    pub fn new(command: String, args: Vec<String>, timeout_secs: u64) -> Self {
        WorkerAdapter {
            command,
            args,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn fail(stage: &'static str, reason: impl Into<String>) -> EngineError {
        EngineError::TopologyWorker {
            stage,
            reason: reason.into(),
        }
    }
}

impl TopologyPort for WorkerAdapter {
    fn extract(&self, request: &TopologyRequest<'_>) -> Result<TopologySummary, EngineError> {
        let (nx, ny, nz) = request.dims;
        if request.mask.len() != nx * ny * nz {
            return Err(EngineError::ShapeMismatch {
                len: request.mask.len(),
                nx,
                ny,
                nz,
            });
        }

        let scratch = tempfile::tempdir()?;
        let input_path = scratch.path().join("vessel_mask.nii.gz");
        let output_dir = scratch.path().join("topology");
        std::fs::create_dir_all(&output_dir)?;
        write_mask_file(&input_path, request.mask, request.dims, request.spacing)?;

        let (sx, sy, sz) = request.spacing;
        let spacing_arg = format!("{},{},{}", sx, sy, sz);
        debug!(command = %self.command, "launching topology worker");
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg("--input")
            .arg(&input_path)
            .arg("--spacing")
            .arg(&spacing_arg)
            .arg("--output-dir")
            .arg(&output_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Self::fail("spawn", e.to_string()))?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if started.elapsed() > self.timeout {
                        child.kill()?;
                        child.wait()?;
                        return Err(Self::fail(
                            "timeout",
                            format!("no exit within {:?}", self.timeout),
                        ));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        };

        let meta_path = output_dir.join("metadata.json");
        let meta_bytes = std::fs::read(&meta_path)
            .map_err(|e| Self::fail("metadata", format!("{}: {}", meta_path.display(), e)))?;
        let meta: WorkerMetadata = serde_json::from_slice(&meta_bytes)
            .map_err(|e| Self::fail("metadata", e.to_string()))?;

        if !status.success() || !meta.ok {
            let reason = meta
                .error
                .unwrap_or_else(|| format!("worker exited with {}", status));
            return Err(Self::fail("exit", reason));
        }

        let radius_path = output_dir.join("radius_map.nii.gz");
        let radius = read_volume_file(&radius_path)?;
        if radius.dims != request.dims {
            return Err(Self::fail(
                "radius",
                format!(
                    "radius map dims {:?} do not match mask dims {:?}",
                    radius.dims, request.dims
                ),
            ));
        }

        let mut centerline_points = Vec::new();
        let mut radii_mm = Vec::new();
        for (idx, &r) in radius.data.iter().enumerate() {
            if r > 0.0 {
                centerline_points.push(idx);
                radii_mm.push(r);
            }
        }
        if centerline_points.is_empty() {
            return Err(Self::fail("centerline", "worker produced no centerline points"));
        }
        if meta.n_centerline_points != centerline_points.len() {
            debug!(
                reported = meta.n_centerline_points,
                parsed = centerline_points.len(),
                "worker centerline count differs from radius map"
            );
        }

        info!(
            points = centerline_points.len(),
            surface_cells = meta.n_surface_cells,
            truncated = meta.truncated_branches.len(),
            "topology worker succeeded"
        );
        Ok(TopologySummary {
            centerline_points,
            radii_mm,
            n_surface_cells: meta.n_surface_cells,
            truncated_branches: meta.truncated_branches,
        })
    }
}
