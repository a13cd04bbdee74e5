//! TEP-Core: deterministic thrombus detection for contrast CT
//!
//! This crate analyzes contrast-enhanced chest CT volumes for pulmonary
//! emboli. The pipeline is purely rule-based: no learned models, no
//! randomness, identical input yields identical output.
//!
//! # Modules
//! - `volume`: validated voxel volumes and bounding boxes
//! - `config`: the frozen engine configuration
//! - `morphology`: masks, connected components, distance transforms
//! - `domain`: anatomical container construction
//! - `contrast`: bolus quality tiers and segmentation strategies
//! - `vessels`: arterial tree segmentation
//! - `geometry`: Hessian, coherence, texture, rugosity, fractal fields
//! - `topology`: centerline extraction (worker port + skeleton fallback)
//! - `scoring`: voxel evidence and finding extraction
//! - `quantify`: clot burden and severity indices
//! - `pipeline`: the [`pipeline::TepEngine`] orchestrator
//! - `nifti_io`: NIfTI handoff for the topology worker

pub mod config;
pub mod contrast;
pub mod domain;
pub mod error;
pub mod geometry;
pub mod morphology;
pub mod pipeline;
pub mod quantify;
pub mod scoring;
pub mod topology;
pub mod vessels;
pub mod volume;

// I/O modules
pub mod nifti_io;

pub use config::EngineConfig;
pub use error::EngineError;
pub use pipeline::{Analysis, TepEngine};
pub use volume::Volume;
