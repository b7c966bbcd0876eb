//! Momentum-sweep orchestration: one field map, one detector, a full
//! simulate-then-fit pipeline per momentum point, and a machine-readable
//! summary of the whole run.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::field::{write_field_text, FieldMap, GridSpec, SlabMagnet};
use crate::geometry::TelescopeDetector;
use crate::residuals::{run_truth_fit, TruthFitConfig};
use crate::sim::run_simulation;
use crate::TrkError;

pub const FIELD_TEXT_FILE_NAME: &str = "bfield.txt";
pub const FIELD_BINARY_FILE_NAME: &str = "bfield.bin";
pub const SUMMARY_FILE_NAME: &str = "sweep-summary.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Momentum points [GeV], one pipeline run each.
    pub momenta_gev: Vec<f64>,
    /// Gun settings shared by every point; `mom_gev` is overridden per
    /// momentum.
    pub generation: GenerationConfig,
    /// RK4 step for the fit [mm].
    pub fit_step_mm: f64,
    /// Dipole strength inside the magnet slabs [T].
    pub by_tesla: f64,
    /// Field-map grid.
    pub grid: GridSpec,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            momenta_gev: vec![0.5, 1.0, 2.0, 4.0],
            generation: GenerationConfig::default(),
            fit_step_mm: 1.0,
            by_tesla: 0.5,
            grid: GridSpec::default(),
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<(), TrkError> {
        if self.momenta_gev.is_empty() {
            return Err(TrkError::InvalidConfig(
                "momentum sweep needs at least one point".to_string(),
            ));
        }
        for &p in &self.momenta_gev {
            if !(p.is_finite() && p > 0.0) {
                return Err(TrkError::InvalidConfig(format!(
                    "momentum point {} is not positive",
                    p
                )));
            }
        }
        if !(self.fit_step_mm.is_finite() && self.fit_step_mm > 0.0) {
            return Err(TrkError::InvalidConfig(
                "fit_step_mm must be positive".to_string(),
            ));
        }
        self.generation.validate()?;
        self.grid.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumSummary {
    pub momentum_gev: f64,
    pub measurements: usize,
    pub fitted_tracks: usize,
    pub residual_path: PathBuf,
    pub state_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSummary {
    pub run_dir: PathBuf,
    pub field_text_path: PathBuf,
    pub field_binary_path: PathBuf,
    pub points: Vec<MomentumSummary>,
}

/// Run the whole sweep under a timestamped directory inside `base_dir`.
///
/// The slab-dipole field map is generated once, converted to its binary
/// form and shared by every momentum point. Each point gets its own
/// `mom-{p}gev/` directory with a `sim/` subdirectory for the event
/// files and the residual and state CSVs next to it.
pub fn run_sweep(
    cfg: &SweepConfig,
    detector: &TelescopeDetector,
    base_dir: &Path,
) -> Result<SweepSummary, TrkError> {
    cfg.validate()?;

    let run_dir = base_dir.join(format!("sweep-{}", Utc::now().format("%Y%m%d-%H%M%S")));
    fs::create_dir_all(&run_dir)?;

    let field_text_path = run_dir.join(FIELD_TEXT_FILE_NAME);
    let field_binary_path = run_dir.join(FIELD_BINARY_FILE_NAME);
    write_field_text(
        &field_text_path,
        &cfg.grid,
        &SlabMagnet::default(),
        cfg.by_tesla,
    )?;
    let field = FieldMap::from_text(&field_text_path)?;
    field.write_binary(&field_binary_path)?;

    let mut points = Vec::with_capacity(cfg.momenta_gev.len());
    for &momentum in &cfg.momenta_gev {
        let mom_dir = run_dir.join(format!("mom-{}gev", momentum));
        let sim_dir = mom_dir.join("sim");

        let generation = GenerationConfig {
            mom_gev: momentum,
            ..cfg.generation.clone()
        };
        let sim = run_simulation(&generation, detector, &field, &sim_dir)?;

        let fit_cfg = TruthFitConfig {
            input_dir: sim_dir,
            events: generation.events,
            skip: 0,
            step_mm: cfg.fit_step_mm,
            seed: generation.seed,
        };
        let fit = run_truth_fit(&fit_cfg, detector, &field, None, &mom_dir)?;

        points.push(MomentumSummary {
            momentum_gev: momentum,
            measurements: sim.measurements,
            fitted_tracks: fit.fitted_tracks,
            residual_path: fit.residual_path,
            state_path: fit.state_path,
        });
    }

    let summary = SweepSummary {
        run_dir: run_dir.clone(),
        field_text_path,
        field_binary_path,
        points,
    };
    let writer = BufWriter::new(File::create(run_dir.join(SUMMARY_FILE_NAME))?);
    serde_json::to_writer_pretty(writer, &summary)?;

    Ok(summary)
}
