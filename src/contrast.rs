//! Contrast-enhancement verification and the rescue strategies selected
//! from it.
//!
//! Mean arterial density inside the nominal contrast window classifies
//! the bolus into four tiers. Each tier maps to an immutable
//! [`SegmentationStrategy`] that fixes the photometric threshold, the
//! component-retention breadth and the density score weight used further
//! down the pipeline, so quality-dependent behavior is decided once
//! instead of branching per voxel.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ScoringParams, VesselParams};

/// Contrast bolus quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContrastQuality {
    Optimal,
    Good,
    Suboptimal,
    Inadequate,
}

/// Result of the contrast verification measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastReport {
    pub quality: ContrastQuality,
    pub mean_arterial_hu: f64,
    pub sampled_voxels: usize,
    pub has_adequate_contrast: bool,
}

/// Quality-dependent knobs, frozen at selection time.
#[derive(Debug, Clone)]
pub struct SegmentationStrategy {
    pub quality: ContrastQuality,
    /// Lower bound of the arterial segmentation window in HU. Dropped
    /// toward the configured floor as quality degrades.
    pub threshold_hu: f64,
    /// How many disconnected tree fragments to keep.
    pub keep_components: usize,
    /// Weight of the density evidence channel.
    pub density_weight: f64,
}

/// Measure mean arterial density inside the contrast window.
pub fn verify_contrast(data: &[f64], params: &VesselParams) -> ContrastReport {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in data {
        if v >= params.contrast_min_hu && v <= params.contrast_max_hu {
            sum += v;
            count += 1;
        }
    }

    if count == 0 {
        return ContrastReport {
            quality: ContrastQuality::Inadequate,
            mean_arterial_hu: 0.0,
            sampled_voxels: 0,
            has_adequate_contrast: false,
        };
    }

    let mean = sum / count as f64;
    let quality = if mean >= params.optimal_mean_hu {
        ContrastQuality::Optimal
    } else if mean >= params.good_mean_hu {
        ContrastQuality::Good
    } else if mean >= params.suboptimal_mean_hu {
        ContrastQuality::Suboptimal
    } else {
        ContrastQuality::Inadequate
    };
    info!(mean_hu = mean, ?quality, "contrast enhancement verified");

    ContrastReport {
        quality,
        mean_arterial_hu: mean,
        sampled_voxels: count,
        has_adequate_contrast: quality != ContrastQuality::Inadequate,
    }
}

/// Select the strategy for a verified tier.
pub fn select_strategy(
    report: &ContrastReport,
    vessels: &VesselParams,
    scoring: &ScoringParams,
) -> SegmentationStrategy {
    match report.quality {
        ContrastQuality::Optimal | ContrastQuality::Good => SegmentationStrategy {
            quality: report.quality,
            threshold_hu: vessels.contrast_min_hu,
            keep_components: vessels.keep_components,
            density_weight: scoring.density_weight,
        },
        ContrastQuality::Suboptimal => SegmentationStrategy {
            quality: report.quality,
            // Adaptive photometric threshold: halfway to the floor.
            threshold_hu: (vessels.contrast_min_hu + vessels.contrast_floor_hu) / 2.0,
            keep_components: vessels.keep_components,
            density_weight: scoring.density_weight,
        },
        ContrastQuality::Inadequate => SegmentationStrategy {
            quality: report.quality,
            threshold_hu: vessels.contrast_floor_hu,
            // A weak bolus fragments the visible tree further.
            keep_components: vessels.keep_components * 2,
            density_weight: scoring.density_weight_degraded,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> (VesselParams, ScoringParams) {
        (VesselParams::default(), ScoringParams::default())
    }

    #[test]
    fn test_tier_cuts() {
        let (vp, _) = params();
        let cases = [
            (300.0, ContrastQuality::Optimal),
            (220.0, ContrastQuality::Good),
            (170.0, ContrastQuality::Suboptimal),
        ];
        for (hu, expect) in cases {
            let data = vec![hu; 64];
            let report = verify_contrast(&data, &vp);
            assert_eq!(report.quality, expect, "mean {} HU", hu);
            assert!(report.has_adequate_contrast);
        }
    }

    #[test]
    fn test_no_contrast_voxels_is_inadequate() {
        let (vp, _) = params();
        let data = vec![-800.0; 64];
        let report = verify_contrast(&data, &vp);
        assert_eq!(report.quality, ContrastQuality::Inadequate);
        assert_eq!(report.sampled_voxels, 0);
        assert_eq!(report.mean_arterial_hu, 0.0);
        assert!(!report.has_adequate_contrast);
    }

    #[test]
    fn test_strategy_lowers_threshold_not_below_floor() {
        let (vp, sp) = params();
        let report = ContrastReport {
            quality: ContrastQuality::Suboptimal,
            mean_arterial_hu: 160.0,
            sampled_voxels: 1000,
            has_adequate_contrast: true,
        };
        let s = select_strategy(&report, &vp, &sp);
        assert!(s.threshold_hu < vp.contrast_min_hu);
        assert!(s.threshold_hu >= vp.contrast_floor_hu);
        assert_eq!(s.density_weight, sp.density_weight);
    }

    #[test]
    fn test_inadequate_strategy_widens_retention_and_reweights() {
        let (vp, sp) = params();
        let report = ContrastReport {
            quality: ContrastQuality::Inadequate,
            mean_arterial_hu: 90.0,
            sampled_voxels: 12,
            has_adequate_contrast: false,
        };
        let s = select_strategy(&report, &vp, &sp);
        assert_eq!(s.threshold_hu, vp.contrast_floor_hu);
        assert_eq!(s.keep_components, vp.keep_components * 2);
        assert_eq!(s.density_weight, sp.density_weight_degraded);
    }
}
