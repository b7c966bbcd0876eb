//! Per-event truth and measurement files.
//!
//! Each event owns two CSV files in the data directory:
//! `event{e:09}-particles.csv` with the generated truth particles and
//! `event{e:09}-measurements.csv` with the smeared plane hits, each hit
//! carrying the truth momentum at the crossing (the measurement-to-
//! parameter map consumed by the truth fit).

use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::geometry::AcceptanceGrid;
use crate::TrkError;

#[derive(Debug, Clone)]
pub struct TruthParticle {
    pub particle_id: u64,
    pub charge: f64,
    pub vertex_mm: Vector3<f64>,
    pub momentum_gev: Vector3<f64>,
}

#[derive(Debug, Clone)]
pub struct Measurement {
    pub measurement_id: u64,
    pub particle_id: u64,
    pub plane_id: u32,
    pub loc0_mm: f64,
    pub loc1_mm: f64,
    pub var0_mm2: f64,
    pub var1_mm2: f64,
    /// Truth momentum at the plane crossing [GeV].
    pub truth_momentum_gev: Vector3<f64>,
}

#[derive(Debug, Clone)]
pub struct EventData {
    pub event: usize,
    pub particles: Vec<TruthParticle>,
    pub measurements: Vec<Measurement>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParticleRow {
    particle_id: u64,
    q: f64,
    vx: f64,
    vy: f64,
    vz: f64,
    px: f64,
    py: f64,
    pz: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MeasurementRow {
    measurement_id: u64,
    particle_id: u64,
    plane_id: u32,
    loc0: f64,
    loc1: f64,
    var0: f64,
    var1: f64,
    tpx: f64,
    tpy: f64,
    tpz: f64,
}

pub fn particles_path(dir: &Path, event: usize) -> PathBuf {
    dir.join(format!("event{:09}-particles.csv", event))
}

pub fn measurements_path(dir: &Path, event: usize) -> PathBuf {
    dir.join(format!("event{:09}-measurements.csv", event))
}

impl EventData {
    pub fn write(&self, dir: &Path) -> Result<(), TrkError> {
        let mut pw = csv::Writer::from_path(particles_path(dir, self.event))?;
        for p in &self.particles {
            pw.serialize(ParticleRow {
                particle_id: p.particle_id,
                q: p.charge,
                vx: p.vertex_mm.x,
                vy: p.vertex_mm.y,
                vz: p.vertex_mm.z,
                px: p.momentum_gev.x,
                py: p.momentum_gev.y,
                pz: p.momentum_gev.z,
            })?;
        }
        pw.flush()?;

        let mut mw = csv::Writer::from_path(measurements_path(dir, self.event))?;
        for m in &self.measurements {
            mw.serialize(MeasurementRow {
                measurement_id: m.measurement_id,
                particle_id: m.particle_id,
                plane_id: m.plane_id,
                loc0: m.loc0_mm,
                loc1: m.loc1_mm,
                var0: m.var0_mm2,
                var1: m.var1_mm2,
                tpx: m.truth_momentum_gev.x,
                tpy: m.truth_momentum_gev.y,
                tpz: m.truth_momentum_gev.z,
            })?;
        }
        mw.flush()?;
        Ok(())
    }

    pub fn read(dir: &Path, event: usize) -> Result<Self, TrkError> {
        let ppath = particles_path(dir, event);
        let mut particles = Vec::new();
        let mut reader = csv::Reader::from_path(&ppath).map_err(|e| {
            TrkError::Event(format!("cannot open {}: {}", ppath.display(), e))
        })?;
        for row in reader.deserialize() {
            let row: ParticleRow = row?;
            particles.push(TruthParticle {
                particle_id: row.particle_id,
                charge: row.q,
                vertex_mm: Vector3::new(row.vx, row.vy, row.vz),
                momentum_gev: Vector3::new(row.px, row.py, row.pz),
            });
        }

        let mpath = measurements_path(dir, event);
        let mut measurements = Vec::new();
        let mut reader = csv::Reader::from_path(&mpath).map_err(|e| {
            TrkError::Event(format!("cannot open {}: {}", mpath.display(), e))
        })?;
        for row in reader.deserialize() {
            let row: MeasurementRow = row?;
            measurements.push(Measurement {
                measurement_id: row.measurement_id,
                particle_id: row.particle_id,
                plane_id: row.plane_id,
                loc0_mm: row.loc0,
                loc1_mm: row.loc1,
                var0_mm2: row.var0,
                var1_mm2: row.var1,
                truth_momentum_gev: Vector3::new(row.tpx, row.tpy, row.tpz),
            });
        }

        Ok(Self {
            event,
            particles,
            measurements,
        })
    }

    pub fn particle(&self, particle_id: u64) -> Result<&TruthParticle, TrkError> {
        self.particles
            .iter()
            .find(|p| p.particle_id == particle_id)
            .ok_or_else(|| {
                TrkError::Event(format!(
                    "event {}: no truth particle with id {}",
                    self.event, particle_id
                ))
            })
    }

    /// Drop measurements outside the configured acceptance windows.
    pub fn apply_acceptance(&mut self, grid: &AcceptanceGrid) {
        self.measurements
            .retain(|m| grid.accepts(m.plane_id, m.loc0_mm, m.loc1_mm));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{AcceptanceGrid, AcceptanceWindow};

    fn sample_event() -> EventData {
        EventData {
            event: 3,
            particles: vec![TruthParticle {
                particle_id: 0,
                charge: -1.0,
                vertex_mm: Vector3::zeros(),
                momentum_gev: Vector3::new(1.0, 0.01, -0.02),
            }],
            measurements: vec![
                Measurement {
                    measurement_id: 0,
                    particle_id: 0,
                    plane_id: 0,
                    loc0_mm: 0.1,
                    loc1_mm: -0.2,
                    var0_mm2: 0.0025,
                    var1_mm2: 0.0025,
                    truth_momentum_gev: Vector3::new(1.0, 0.01, -0.02),
                },
                Measurement {
                    measurement_id: 1,
                    particle_id: 0,
                    plane_id: 1,
                    loc0_mm: 50.0,
                    loc1_mm: 0.0,
                    var0_mm2: 0.0025,
                    var1_mm2: 0.0025,
                    truth_momentum_gev: Vector3::new(1.0, 0.01, -0.02),
                },
            ],
        }
    }

    #[test]
    fn write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let event = sample_event();
        event.write(dir.path()).unwrap();

        let reread = EventData::read(dir.path(), 3).unwrap();
        assert_eq!(reread.particles.len(), 1);
        assert_eq!(reread.measurements.len(), 2);
        assert_eq!(reread.measurements[1].plane_id, 1);
        assert_eq!(reread.particle(0).unwrap().charge, -1.0);
        assert!(reread.particle(7).is_err());
    }

    #[test]
    fn acceptance_filter_drops_out_of_window_hits() {
        let mut event = sample_event();
        let grid = AcceptanceGrid::with_window(
            1,
            AcceptanceWindow {
                min_loc0_mm: -1.0,
                max_loc0_mm: 1.0,
                min_loc1_mm: -1.0,
                max_loc1_mm: 1.0,
            },
        );
        event.apply_acceptance(&grid);
        assert_eq!(event.measurements.len(), 1);
        assert_eq!(event.measurements[0].measurement_id, 0);
    }

    #[test]
    fn missing_event_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            EventData::read(dir.path(), 0),
            Err(TrkError::Event(_))
        ));
    }
}
