//! Error taxonomy for the detection engine.
//!
//! Only malformed input or an unrecoverable topology-worker failure with
//! no valid fallback aborts a run. Degraded contrast, fragmented vessel
//! trees and low-confidence anatomy are handled by adaptive fallbacks and
//! surfaced as flags on the result structs instead.

use thiserror::Error;

/// Hard failures that abort a pipeline run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Volume with zero voxels or an all-zero dimension.
    #[error("empty volume: dims ({0}, {1}, {2})")]
    EmptyVolume(usize, usize, usize),

    /// Buffer length does not match the declared dimensions.
    #[error("shape mismatch: {len} values for dims ({nx}, {ny}, {nz})")]
    ShapeMismatch {
        len: usize,
        nx: usize,
        ny: usize,
        nz: usize,
    },

    /// Zero, negative or non-finite voxel spacing.
    #[error("invalid voxel spacing ({0}, {1}, {2}) mm")]
    InvalidSpacing(f64, f64, f64),

    /// Topology worker failed and the skeleton fallback was disabled or
    /// itself unusable.
    #[error("topology worker failed at {stage}: {reason}")]
    TopologyWorker { stage: &'static str, reason: String },

    /// Filesystem error during the worker file handoff.
    #[error("worker handoff I/O: {0}")]
    Io(#[from] std::io::Error),

    /// Mask serialization for the worker handoff failed.
    #[error("mask I/O: {0}")]
    MaskIo(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_offender() {
        let e = EngineError::ShapeMismatch {
            len: 7,
            nx: 2,
            ny: 2,
            nz: 2,
        };
        let msg = format!("{}", e);
        assert!(msg.contains('7'));
        assert!(msg.contains("(2, 2, 2)"));

        let e = EngineError::InvalidSpacing(0.0, 1.0, 1.0);
        assert!(format!("{}", e).contains("0"));
    }
}
