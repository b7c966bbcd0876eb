//! Truth-seeded fit driver and CSV extraction.
//!
//! Reads simulated events back from disk, fits every truth candidate and
//! writes two files: `residual.csv` with one momentum-residual row per
//! fitted track (taken from the smoothed state on the first plane) and
//! `state.csv` with the smoothed global position of every track state.

use std::fs;
use std::path::{Path, PathBuf};

use crate::event_io::EventData;
use crate::field::FieldMap;
use crate::fit::{FittedTrack, KalmanFitter, SeedGenerator};
use crate::geometry::{AcceptanceGrid, TelescopeDetector};
use crate::TrkError;

pub const RESIDUAL_FILE_NAME: &str = "residual.csv";
pub const STATE_FILE_NAME: &str = "state.csv";

#[derive(Debug, Clone)]
pub struct TruthFitConfig {
    /// Directory holding the per-event CSV files.
    pub input_dir: PathBuf,
    /// Number of events to fit.
    pub events: usize,
    /// Events to skip at the start of the sample.
    pub skip: usize,
    /// RK4 integration step [mm].
    pub step_mm: f64,
    /// Seed-smearing RNG seed.
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct TruthFitSummary {
    pub events: usize,
    pub fitted_tracks: usize,
    pub residual_path: PathBuf,
    pub state_path: PathBuf,
}

/// Truth momentum projections as charge-over-momentum values:
/// (q/p, q/pT, q/pz).
fn truth_qop_triplet(charge: f64, momentum: &nalgebra::Vector3<f64>) -> (f64, f64, f64) {
    let p = momentum.norm();
    let pt = momentum.x.hypot(momentum.y);
    (charge / p, charge / pt, charge / momentum.z)
}

/// Write one residual row and the per-state position rows for a fitted
/// track. Fails when the track carries no states; everything written so
/// far stays in the writers' buffers for the caller to flush.
fn write_track(
    residual_writer: &mut csv::Writer<fs::File>,
    state_writer: &mut csv::Writer<fs::File>,
    detector: &TelescopeDetector,
    event: usize,
    track: usize,
    fitted: &FittedTrack,
    truth: (f64, f64, f64),
) -> Result<(), TrkError> {
    let first = fitted
        .states
        .first()
        .ok_or(TrkError::EmptyTrackStates { event, track })?;

    let fit = &first.smoothed;
    let (truth_qop, truth_qop_t, truth_qop_z) = truth;
    let values = [
        fit.qop(),
        fit.qop_t(),
        fit.qop_z(),
        truth_qop,
        truth_qop_t,
        truth_qop_z,
        fit.qop() - truth_qop,
        fit.qop_t() - truth_qop_t,
        fit.qop_z() - truth_qop_z,
    ];
    let mut record: Vec<String> = values[..8].iter().map(|v| format!("{}", v)).collect();
    // Historical file layout: the last field carries a trailing space.
    record.push(format!("{} ", values[8]));
    residual_writer.write_record(&record)?;

    for state in &fitted.states {
        let plane = detector.plane(state.plane_id)?;
        let pos = plane.bound_to_global(state.smoothed.loc0(), state.smoothed.loc1());
        state_writer.write_record([
            format!("{}", event),
            format!("{}", track),
            format!("{}", pos.x),
            format!("{}", pos.y),
            format!("{}", pos.z),
        ])?;
    }

    Ok(())
}

fn fit_events(
    cfg: &TruthFitConfig,
    detector: &TelescopeDetector,
    field: &FieldMap,
    acceptance: Option<&AcceptanceGrid>,
    residual_writer: &mut csv::Writer<fs::File>,
    state_writer: &mut csv::Writer<fs::File>,
) -> Result<usize, TrkError> {
    let mut seeds = SeedGenerator::new(detector, cfg.seed);
    let fitter = KalmanFitter::new(detector, field).with_step(cfg.step_mm);
    let mut fitted_tracks = 0usize;

    for event in cfg.skip..cfg.skip + cfg.events {
        let mut data = EventData::read(&cfg.input_dir, event)?;
        if let Some(grid) = acceptance {
            data.apply_acceptance(grid);
        }

        let candidates = seeds.truth_candidates(&data)?;
        let tracks = fitter.fit(&candidates)?;

        for (track_idx, (candidate, fitted)) in
            candidates.iter().zip(tracks.iter()).enumerate()
        {
            let particle = data.particle(candidate.particle_id)?;
            // Truth momentum at the first crossing, falling back to the
            // vertex momentum for a candidate without measurements.
            let truth_mom = match candidate.measurements.first() {
                Some(m) => m.truth_momentum_gev,
                None => particle.momentum_gev,
            };
            let truth = truth_qop_triplet(particle.charge, &truth_mom);
            write_track(
                residual_writer,
                state_writer,
                detector,
                event,
                track_idx,
                fitted,
                truth,
            )?;
            fitted_tracks += 1;
        }
    }

    Ok(fitted_tracks)
}

/// Fit `cfg.events` events and write `residual.csv` and `state.csv` into
/// `output_dir`. Both files are flushed even when the fit aborts, so
/// completed rows survive a mid-run failure.
pub fn run_truth_fit(
    cfg: &TruthFitConfig,
    detector: &TelescopeDetector,
    field: &FieldMap,
    acceptance: Option<&AcceptanceGrid>,
    output_dir: &Path,
) -> Result<TruthFitSummary, TrkError> {
    if cfg.events == 0 {
        return Err(TrkError::InvalidConfig(
            "events must be greater than zero".to_string(),
        ));
    }
    if !(cfg.step_mm.is_finite() && cfg.step_mm > 0.0) {
        return Err(TrkError::InvalidConfig(
            "step_mm must be positive".to_string(),
        ));
    }
    fs::create_dir_all(output_dir)?;

    let residual_path = output_dir.join(RESIDUAL_FILE_NAME);
    let state_path = output_dir.join(STATE_FILE_NAME);

    let mut residual_writer = csv::Writer::from_path(&residual_path)?;
    residual_writer.write_record([
        "fit_qop",
        "fit_qopT",
        "fit_qopz",
        "truth_qop",
        "truth_qopT",
        "truth_qopz",
        "qop_residual",
        "qopT_residual",
        "qopz_residual",
    ])?;

    let mut state_writer = csv::Writer::from_path(&state_path)?;
    state_writer.write_record(["event_id", "fit_track_id", "x", "y", "z"])?;

    let outcome = fit_events(
        cfg,
        detector,
        field,
        acceptance,
        &mut residual_writer,
        &mut state_writer,
    );
    let residual_flush = residual_writer.flush();
    let state_flush = state_writer.flush();

    let fitted_tracks = outcome?;
    residual_flush?;
    state_flush?;

    Ok(TruthFitSummary {
        events: cfg.events,
        fitted_tracks,
        residual_path,
        state_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::sim::run_simulation;
    use nalgebra::Vector3;

    fn zero_field() -> FieldMap {
        FieldMap::uniform(
            [-50.0, -200.0, -200.0],
            [200.0, 200.0, 200.0],
            [3, 3, 3],
            Vector3::zeros(),
        )
        .unwrap()
    }

    fn simulate(dir: &Path, events: usize, nparticles: usize) -> FieldMap {
        let field = zero_field();
        let cfg = GenerationConfig {
            events,
            nparticles,
            ..Default::default()
        };
        run_simulation(&cfg, &TelescopeDetector::default(), &field, dir).unwrap();
        field
    }

    #[test]
    fn residual_and_state_files_have_the_documented_layout() {
        let dir = tempfile::tempdir().unwrap();
        let field = simulate(dir.path(), 2, 4);
        let detector = TelescopeDetector::default();

        let cfg = TruthFitConfig {
            input_dir: dir.path().to_path_buf(),
            events: 2,
            skip: 0,
            step_mm: 1.0,
            seed: 5,
        };
        let summary = run_truth_fit(&cfg, &detector, &field, None, dir.path()).unwrap();
        assert_eq!(summary.fitted_tracks, 8);

        let raw = fs::read_to_string(&summary.residual_path).unwrap();
        let mut lines = raw.lines();
        assert_eq!(
            lines.next().unwrap(),
            "fit_qop,fit_qopT,fit_qopz,truth_qop,truth_qopT,truth_qopz,\
             qop_residual,qopT_residual,qopz_residual"
        );
        let rows: Vec<&str> = lines.collect();
        assert_eq!(rows.len(), 8);
        for row in &rows {
            // The last field keeps its trailing space.
            assert!(row.ends_with(' '));
            let fields: Vec<&str> = row.split(',').collect();
            assert_eq!(fields.len(), 9);
            let fit_qop: f64 = fields[0].parse().unwrap();
            let truth_qop: f64 = fields[3].parse().unwrap();
            let residual: f64 = fields[6].parse().unwrap();
            assert_eq!(residual, fit_qop - truth_qop);
        }

        let states = fs::read_to_string(&summary.state_path).unwrap();
        let mut lines = states.lines();
        assert_eq!(lines.next().unwrap(), "event_id,fit_track_id,x,y,z");
        // Every track crossed all twelve planes.
        assert_eq!(lines.count(), 8 * 12);
    }

    #[test]
    fn fit_recovers_truth_in_zero_field_to_seed_precision() {
        let dir = tempfile::tempdir().unwrap();
        let field = simulate(dir.path(), 1, 2);
        let detector = TelescopeDetector::default();

        let cfg = TruthFitConfig {
            input_dir: dir.path().to_path_buf(),
            events: 1,
            skip: 0,
            step_mm: 1.0,
            seed: 5,
        };
        let summary = run_truth_fit(&cfg, &detector, &field, None, dir.path()).unwrap();
        let raw = fs::read_to_string(&summary.residual_path).unwrap();
        for row in raw.lines().skip(1) {
            let fields: Vec<&str> = row.split(',').collect();
            let residual: f64 = fields[6].trim().parse().unwrap();
            // qop stays within the 5 percent seed prior around q/p = -1.
            assert!(residual.abs() < 0.3, "residual {} too large", residual);
        }
    }

    #[test]
    fn track_without_states_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let detector = TelescopeDetector::default();

        let mut rw = csv::Writer::from_path(dir.path().join("r.csv")).unwrap();
        let mut sw = csv::Writer::from_path(dir.path().join("s.csv")).unwrap();
        let empty = FittedTrack {
            particle_id: 0,
            states: Vec::new(),
        };
        let err = write_track(
            &mut rw,
            &mut sw,
            &detector,
            4,
            1,
            &empty,
            (-1.0, -1.0, -1.0),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TrkError::EmptyTrackStates { event: 4, track: 1 }
        ));
    }
}
