//! Runtime configuration for event generation and the truth fit.

use serde::{Deserialize, Serialize};

use crate::TrkError;

/// Particle-gun and measurement-smearing settings for one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Number of events to simulate.
    pub events: usize,
    /// Particles per event.
    pub nparticles: usize,
    /// Momentum magnitude [GeV], shared by every particle.
    pub mom_gev: f64,
    /// Polar angle range [deg], measured from the z axis.
    pub theta_deg_min: f64,
    pub theta_deg_max: f64,
    /// Azimuthal angle range [deg].
    pub phi_deg_min: f64,
    pub phi_deg_max: f64,
    /// Particle charge [e].
    pub charge: f64,
    /// Gun vertex [mm] and its Gaussian spread per axis.
    pub vertex_mm: [f64; 3],
    pub vertex_stddev_mm: [f64; 3],
    /// Measurement smearing sigma per local axis [mm].
    pub smear_mm: f64,
    /// RNG seed; runs are deterministic per seed.
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            events: 10,
            nparticles: 100,
            mom_gev: 1.0,
            theta_deg_min: 89.0,
            theta_deg_max: 91.0,
            phi_deg_min: -1.0,
            phi_deg_max: 1.0,
            charge: -1.0,
            vertex_mm: [0.0, 0.0, 0.0],
            vertex_stddev_mm: [0.0, 0.0, 0.0],
            smear_mm: 0.05,
            seed: 42,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), TrkError> {
        if self.events == 0 {
            return Err(TrkError::InvalidConfig(
                "events must be greater than zero".to_string(),
            ));
        }
        if self.nparticles == 0 {
            return Err(TrkError::InvalidConfig(
                "nparticles must be greater than zero".to_string(),
            ));
        }
        if !(self.mom_gev.is_finite() && self.mom_gev > 0.0) {
            return Err(TrkError::InvalidConfig(
                "mom_gev must be positive".to_string(),
            ));
        }
        if self.theta_deg_min <= 0.0 || self.theta_deg_max >= 180.0 {
            return Err(TrkError::InvalidConfig(
                "theta range must stay inside (0, 180) degrees".to_string(),
            ));
        }
        if self.theta_deg_max < self.theta_deg_min {
            return Err(TrkError::InvalidConfig(
                "theta_deg_max must not be below theta_deg_min".to_string(),
            ));
        }
        if self.phi_deg_max < self.phi_deg_min {
            return Err(TrkError::InvalidConfig(
                "phi_deg_max must not be below phi_deg_min".to_string(),
            ));
        }
        if self.charge == 0.0 {
            return Err(TrkError::InvalidConfig(
                "charge must be non-zero".to_string(),
            ));
        }
        if self.smear_mm < 0.0 || !self.smear_mm.is_finite() {
            return Err(TrkError::InvalidConfig(
                "smear_mm must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        GenerationConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_particles_rejected() {
        let cfg = GenerationConfig {
            nparticles: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(TrkError::InvalidConfig(_))));
    }

    #[test]
    fn inverted_phi_range_rejected() {
        let cfg = GenerationConfig {
            phi_deg_min: 2.0,
            phi_deg_max: -2.0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(TrkError::InvalidConfig(_))));
    }
}
