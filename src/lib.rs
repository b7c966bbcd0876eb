//! teletrk - telescope-detector track reconstruction
//!
//! Simulates charged particles through a planar telescope detector inside
//! an inhomogeneous dipole field, then runs a truth-seeded Kalman fit and
//! extracts momentum residuals and smoothed track states as CSV.

pub mod config;
pub mod event_io;
pub mod field;
pub mod fit;
pub mod geometry;
pub mod propagation;
pub mod residuals;
pub mod sim;
pub mod sweep;

use thiserror::Error;

pub use config::GenerationConfig;
pub use field::{FieldMap, GridSpec, MagnetRegion, SlabMagnet};
pub use fit::{FittedTrack, KalmanFitter, SeedGenerator};
pub use geometry::TelescopeDetector;
pub use residuals::{run_truth_fit, TruthFitConfig};
pub use sim::run_simulation;
pub use sweep::{run_sweep, SweepConfig};

#[derive(Debug, Error)]
pub enum TrkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("field map format error: {0}")]
    FieldFormat(String),
    #[error("geometry error: {0}")]
    Geometry(String),
    #[error("propagation failed: {0}")]
    Propagation(String),
    #[error("fit failed: {0}")]
    Fit(String),
    #[error("event data error: {0}")]
    Event(String),
    #[error("track {track} in event {event} has no recorded states")]
    EmptyTrackStates { event: usize, track: usize },
}
