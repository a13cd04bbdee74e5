//! Differential-geometry descriptors of the vascular tree.
//!
//! Everything in this module operates on the bounding-box frame produced
//! by [`crate::volume::BoundingBox`]; callers crop the volume around the
//! vessel tree first and paste the resulting fields back. Submodules:
//!
//! - `filters`: shared numerics (separable Gaussian smoothing, central
//!   differences, Laplacian, symmetric 3x3 eigen-decomposition)
//! - `hessian`: multiscale Hessian eigenstructure and Frangi vesselness
//! - `coherence`: structure-tensor flow-coherence index
//! - `texture`: local kurtosis and gradient-anisotropy maps
//! - `rugosity`: vessel-wall curvature irregularity and the air-core
//!   bronchus test
//! - `fractal`: box-counting dimension per hemithorax

pub mod coherence;
pub mod filters;
pub mod fractal;
pub mod hessian;
pub mod rugosity;
pub mod texture;
