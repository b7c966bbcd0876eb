//! Truth-seeded Kalman track fit.
//!
//! Bound track parameters live on detector planes as the 6-vector
//! (loc0, loc1, phi, theta, qop, t). Prediction between planes runs the
//! RK4 propagator; the transport Jacobian comes from central finite
//! differences. After the forward filter a Rauch-Tung-Striebel pass
//! produces the smoothed states consumed by the residual writer.

use nalgebra::{SMatrix, SVector, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::event_io::{EventData, Measurement};
use crate::field::FieldMap;
use crate::geometry::{DetectorPlane, TelescopeDetector};
use crate::propagation::{propagate_to_plane, FreeState, DEFAULT_STEP_MM};
use crate::TrkError;

pub type ParamVec = SVector<f64, 6>;
pub type ParamCov = SMatrix<f64, 6, 6>;
type MeasVec = SVector<f64, 2>;
type MeasCov = SMatrix<f64, 2, 2>;
type MeasJac = SMatrix<f64, 2, 6>;

const IDX_LOC0: usize = 0;
const IDX_LOC1: usize = 1;
const IDX_PHI: usize = 2;
const IDX_THETA: usize = 3;
const IDX_QOP: usize = 4;
const IDX_TIME: usize = 5;

/// Bound track parameters on a plane.
#[derive(Debug, Clone, Copy)]
pub struct BoundParams(ParamVec);

impl BoundParams {
    pub fn new(loc0: f64, loc1: f64, phi: f64, theta: f64, qop: f64, time: f64) -> Self {
        Self(ParamVec::from_column_slice(&[
            loc0, loc1, phi, theta, qop, time,
        ]))
    }

    pub fn from_vec(v: ParamVec) -> Self {
        Self(v)
    }

    /// Build parameters from a global direction vector.
    pub fn from_direction(
        loc0: f64,
        loc1: f64,
        dir: &Vector3<f64>,
        qop: f64,
        time: f64,
    ) -> Self {
        let unit = dir.normalize();
        let phi = unit.y.atan2(unit.x);
        let theta = unit.z.clamp(-1.0, 1.0).acos();
        Self::new(loc0, loc1, phi, theta, qop, time)
    }

    pub fn vec(&self) -> &ParamVec {
        &self.0
    }

    pub fn loc0(&self) -> f64 {
        self.0[IDX_LOC0]
    }

    pub fn loc1(&self) -> f64 {
        self.0[IDX_LOC1]
    }

    pub fn phi(&self) -> f64 {
        self.0[IDX_PHI]
    }

    pub fn theta(&self) -> f64 {
        self.0[IDX_THETA]
    }

    /// Charge over momentum magnitude [1/GeV].
    pub fn qop(&self) -> f64 {
        self.0[IDX_QOP]
    }

    pub fn time(&self) -> f64 {
        self.0[IDX_TIME]
    }

    /// Charge over transverse momentum, q/pT.
    pub fn qop_t(&self) -> f64 {
        self.qop() / self.theta().sin()
    }

    /// Charge over longitudinal momentum, q/pz. Signed.
    pub fn qop_z(&self) -> f64 {
        self.qop() / self.theta().cos()
    }

    pub fn dir(&self) -> Vector3<f64> {
        let (sin_t, cos_t) = (self.theta().sin(), self.theta().cos());
        let (sin_p, cos_p) = (self.phi().sin(), self.phi().cos());
        Vector3::new(sin_t * cos_p, sin_t * sin_p, cos_t)
    }
}

/// One truth-seeded fit input: a seed with covariance plus the track's
/// measurements in increasing plane order.
#[derive(Debug, Clone)]
pub struct TrackCandidate {
    pub particle_id: u64,
    pub seed: BoundParams,
    pub seed_cov: ParamCov,
    pub measurements: Vec<Measurement>,
}

/// A fitted state on one plane.
#[derive(Debug, Clone)]
pub struct TrackState {
    pub plane_id: u32,
    pub measurement: Measurement,
    pub predicted: BoundParams,
    pub predicted_cov: ParamCov,
    pub filtered: BoundParams,
    pub filtered_cov: ParamCov,
    pub smoothed: BoundParams,
    pub smoothed_cov: ParamCov,
}

#[derive(Debug, Clone)]
pub struct FittedTrack {
    pub particle_id: u64,
    pub states: Vec<TrackState>,
}

/// Seed-parameter standard deviations: loc0, loc1 [mm], phi, theta [rad],
/// time [ns]. The qop stddev is relative to the truth momentum.
pub const SEED_LOC_STDDEV_MM: f64 = 0.02;
pub const SEED_ANGLE_STDDEV: f64 = 0.0085;
pub const SEED_QOP_REL_STDDEV: f64 = 0.05;
pub const SEED_TIME_STDDEV_NS: f64 = 1.0;

/// Builds truth track candidates by smearing each particle's parameters
/// at its first measured plane.
pub struct SeedGenerator<'a> {
    detector: &'a TelescopeDetector,
    rng: ChaCha8Rng,
}

impl<'a> SeedGenerator<'a> {
    pub fn new(detector: &'a TelescopeDetector, seed: u64) -> Self {
        Self {
            detector,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn gaussian(&mut self, sigma: f64) -> f64 {
        let z: f64 = StandardNormal.sample(&mut self.rng);
        sigma * z
    }

    pub fn truth_candidates(
        &mut self,
        event: &EventData,
    ) -> Result<Vec<TrackCandidate>, TrkError> {
        let mut candidates = Vec::new();

        for particle in &event.particles {
            let mut measurements: Vec<Measurement> = event
                .measurements
                .iter()
                .filter(|m| m.particle_id == particle.particle_id)
                .cloned()
                .collect();
            if measurements.is_empty() {
                continue;
            }

            let mut order: Vec<(f64, Measurement)> = Vec::with_capacity(measurements.len());
            for m in measurements.drain(..) {
                let plane = self.detector.plane(m.plane_id)?;
                order.push((plane.x_mm, m));
            }
            order.sort_by(|a, b| a.0.total_cmp(&b.0));
            let measurements: Vec<Measurement> = order.into_iter().map(|(_, m)| m).collect();

            let first = &measurements[0];
            let mom = first.truth_momentum_gev;
            let p = mom.norm();
            if p <= 0.0 {
                return Err(TrkError::Event(format!(
                    "particle {} carries zero momentum",
                    particle.particle_id
                )));
            }
            let qop = particle.charge / p;
            let qop_stddev = SEED_QOP_REL_STDDEV * particle.charge.abs() / p;

            let truth = BoundParams::from_direction(
                first.loc0_mm,
                first.loc1_mm,
                &mom,
                qop,
                0.0,
            );
            let stddevs = [
                SEED_LOC_STDDEV_MM,
                SEED_LOC_STDDEV_MM,
                SEED_ANGLE_STDDEV,
                SEED_ANGLE_STDDEV,
                qop_stddev,
                SEED_TIME_STDDEV_NS,
            ];

            let mut v = *truth.vec();
            let mut cov = ParamCov::zeros();
            for (idx, &sigma) in stddevs.iter().enumerate() {
                v[idx] += self.gaussian(sigma);
                cov[(idx, idx)] = sigma * sigma;
            }

            candidates.push(TrackCandidate {
                particle_id: particle.particle_id,
                seed: BoundParams::from_vec(v),
                seed_cov: cov,
                measurements,
            });
        }

        Ok(candidates)
    }
}

/// Highland multiple-scattering angle for one sensor traversal.
fn highland_theta0(p_gev: f64, thickness_mm: f64, x0_mm: f64) -> f64 {
    if thickness_mm <= 0.0 || x0_mm <= 0.0 {
        return 0.0;
    }
    let ratio = thickness_mm / x0_mm;
    (0.0136 / p_gev.max(1e-6)) * ratio.sqrt() * (1.0 + 0.038 * ratio.ln()).max(0.1)
}

pub struct KalmanFitter<'a> {
    detector: &'a TelescopeDetector,
    field: &'a FieldMap,
    step_mm: f64,
}

impl<'a> KalmanFitter<'a> {
    pub fn new(detector: &'a TelescopeDetector, field: &'a FieldMap) -> Self {
        Self {
            detector,
            field,
            step_mm: DEFAULT_STEP_MM,
        }
    }

    pub fn with_step(mut self, step_mm: f64) -> Self {
        self.step_mm = step_mm;
        self
    }

    pub fn fit(&self, candidates: &[TrackCandidate]) -> Result<Vec<FittedTrack>, TrkError> {
        candidates.iter().map(|c| self.fit_one(c)).collect()
    }

    fn transport(
        &self,
        params: &ParamVec,
        from_x_mm: f64,
        to_x_mm: f64,
    ) -> Result<ParamVec, TrkError> {
        let bound = BoundParams::from_vec(*params);
        let free = FreeState {
            pos_mm: Vector3::new(from_x_mm, bound.loc0(), bound.loc1()),
            dir: bound.dir(),
            qop: bound.qop(),
        };
        let landed = propagate_to_plane(&free, to_x_mm, self.field, self.step_mm)?;
        let out = BoundParams::from_direction(
            landed.pos_mm.y,
            landed.pos_mm.z,
            &landed.dir,
            landed.qop,
            bound.time(),
        );
        Ok(*out.vec())
    }

    /// Transport plus Jacobian by central finite differences. The time
    /// component maps through unchanged.
    fn transport_with_jacobian(
        &self,
        params: &ParamVec,
        from_x_mm: f64,
        to_x_mm: f64,
    ) -> Result<(ParamVec, ParamCov), TrkError> {
        const EPS: [f64; 6] = [1e-3, 1e-3, 1e-6, 1e-6, 1e-7, 0.0];

        let center = self.transport(params, from_x_mm, to_x_mm)?;
        let mut jac = ParamCov::zeros();
        jac[(IDX_TIME, IDX_TIME)] = 1.0;

        for col in 0..6 {
            if EPS[col] == 0.0 {
                continue;
            }
            let mut plus = *params;
            let mut minus = *params;
            plus[col] += EPS[col];
            minus[col] -= EPS[col];
            let fp = self.transport(&plus, from_x_mm, to_x_mm)?;
            let fm = self.transport(&minus, from_x_mm, to_x_mm)?;
            let d = (fp - fm) / (2.0 * EPS[col]);
            for row in 0..6 {
                if row == IDX_TIME {
                    continue;
                }
                jac[(row, col)] = d[row];
            }
        }

        Ok((center, jac))
    }

    /// Process noise for traversing one sensor: multiple scattering on
    /// the angular components.
    fn scattering_noise(&self, params: &ParamVec, plane: &DetectorPlane) -> ParamCov {
        let bound = BoundParams::from_vec(*params);
        let p_gev = if bound.qop().abs() > 1e-12 {
            1.0 / bound.qop().abs()
        } else {
            1e6
        };
        let theta0 = highland_theta0(p_gev, plane.thickness_mm, plane.material.x0_mm);

        let sin_theta = bound.theta().sin().abs().max(1e-3);
        let mut q = ParamCov::zeros();
        q[(IDX_PHI, IDX_PHI)] = (theta0 / sin_theta).powi(2);
        q[(IDX_THETA, IDX_THETA)] = theta0 * theta0;
        q
    }

    fn fit_one(&self, candidate: &TrackCandidate) -> Result<FittedTrack, TrkError> {
        if candidate.measurements.is_empty() {
            return Ok(FittedTrack {
                particle_id: candidate.particle_id,
                states: Vec::new(),
            });
        }

        let n = candidate.measurements.len();
        let meas_jac = {
            let mut h = MeasJac::zeros();
            h[(0, IDX_LOC0)] = 1.0;
            h[(1, IDX_LOC1)] = 1.0;
            h
        };

        let mut predicted: Vec<(ParamVec, ParamCov)> = Vec::with_capacity(n);
        let mut filtered: Vec<(ParamVec, ParamCov)> = Vec::with_capacity(n);
        let mut transports: Vec<ParamCov> = Vec::with_capacity(n);

        let mut prev_plane: Option<&DetectorPlane> = None;
        for (idx, m) in candidate.measurements.iter().enumerate() {
            let plane = self.detector.plane(m.plane_id)?;

            let (pred_x, pred_p, jac) = if idx == 0 {
                (*candidate.seed.vec(), candidate.seed_cov, ParamCov::identity())
            } else {
                let source = prev_plane.ok_or_else(|| {
                    TrkError::Fit("missing source plane in forward pass".to_string())
                })?;
                let (x_f, p_f) = filtered[idx - 1];
                let (x_pred, jac) =
                    self.transport_with_jacobian(&x_f, source.x_mm, plane.x_mm)?;
                let q = self.scattering_noise(&x_f, source);
                let p_pred = jac * p_f * jac.transpose() + q;
                (x_pred, p_pred, jac)
            };

            let z = MeasVec::new(m.loc0_mm, m.loc1_mm);
            let r = MeasCov::new(m.var0_mm2, 0.0, 0.0, m.var1_mm2);
            let innovation = z - meas_jac * pred_x;
            let s = meas_jac * pred_p * meas_jac.transpose() + r;
            let s_inv = s.try_inverse().ok_or_else(|| {
                TrkError::Fit(format!(
                    "singular innovation covariance on plane {}",
                    m.plane_id
                ))
            })?;
            let gain = pred_p * meas_jac.transpose() * s_inv;
            let x_filt = pred_x + gain * innovation;
            let mut p_filt = (ParamCov::identity() - gain * meas_jac) * pred_p;
            p_filt = 0.5 * (p_filt + p_filt.transpose());

            predicted.push((pred_x, pred_p));
            filtered.push((x_filt, p_filt));
            transports.push(jac);
            prev_plane = Some(plane);
        }

        // Rauch-Tung-Striebel backward pass.
        let mut smoothed: Vec<(ParamVec, ParamCov)> = filtered.clone();
        for k in (0..n.saturating_sub(1)).rev() {
            let (x_f, p_f) = filtered[k];
            let (x_pred_next, p_pred_next) = predicted[k + 1];
            let jac_next = transports[k + 1];

            let Some(pred_inv) = p_pred_next.try_inverse() else {
                continue;
            };
            let g = p_f * jac_next.transpose() * pred_inv;
            let (x_s_next, p_s_next) = smoothed[k + 1];
            let x_s = x_f + g * (x_s_next - x_pred_next);
            let mut p_s = p_f + g * (p_s_next - p_pred_next) * g.transpose();
            p_s = 0.5 * (p_s + p_s.transpose());
            smoothed[k] = (x_s, p_s);
        }

        let states = candidate
            .measurements
            .iter()
            .enumerate()
            .map(|(idx, m)| TrackState {
                plane_id: m.plane_id,
                measurement: m.clone(),
                predicted: BoundParams::from_vec(predicted[idx].0),
                predicted_cov: predicted[idx].1,
                filtered: BoundParams::from_vec(filtered[idx].0),
                filtered_cov: filtered[idx].1,
                smoothed: BoundParams::from_vec(smoothed[idx].0),
                smoothed_cov: smoothed[idx].1,
            })
            .collect();

        Ok(FittedTrack {
            particle_id: candidate.particle_id,
            states,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_io::TruthParticle;

    fn zero_field() -> FieldMap {
        FieldMap::uniform(
            [-50.0, -200.0, -200.0],
            [200.0, 200.0, 200.0],
            [3, 3, 3],
            Vector3::zeros(),
        )
        .unwrap()
    }

    fn straight_event(detector: &TelescopeDetector) -> EventData {
        let mom = Vector3::new(1.0, 0.0, 0.0);
        let measurements = detector
            .planes()
            .iter()
            .enumerate()
            .map(|(idx, plane)| Measurement {
                measurement_id: idx as u64,
                particle_id: 0,
                plane_id: plane.id,
                loc0_mm: 0.0,
                loc1_mm: 0.0,
                var0_mm2: 0.0025,
                var1_mm2: 0.0025,
                truth_momentum_gev: mom,
            })
            .collect();
        EventData {
            event: 0,
            particles: vec![TruthParticle {
                particle_id: 0,
                charge: -1.0,
                vertex_mm: Vector3::zeros(),
                momentum_gev: mom,
            }],
            measurements,
        }
    }

    #[test]
    fn bound_param_momentum_projections() {
        // 2 GeV at 45 degrees from the z axis: pT = pz = 2/sqrt(2).
        let dir = Vector3::new(1.0, 0.0, 1.0);
        let params = BoundParams::from_direction(0.0, 0.0, &dir, -0.5, 0.0);
        let expected = -0.5 * 2.0_f64.sqrt();
        assert!((params.qop_t() - expected).abs() < 1e-12);
        assert!((params.qop_z() - expected).abs() < 1e-12);
    }

    #[test]
    fn seed_generator_emits_one_candidate_per_measured_particle() {
        let detector = TelescopeDetector::default();
        let event = straight_event(&detector);
        let mut sg = SeedGenerator::new(&detector, 7);
        let candidates = sg.truth_candidates(&event).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].measurements.len(), 12);
        // Seed sits near the truth: qop = -1 smeared by 5 percent.
        assert!((candidates[0].seed.qop() + 1.0).abs() < 0.5);
    }

    #[test]
    fn straight_track_fit_recovers_local_position() {
        let detector = TelescopeDetector::default();
        let field = zero_field();
        let event = straight_event(&detector);

        let mut sg = SeedGenerator::new(&detector, 11);
        let candidates = sg.truth_candidates(&event).unwrap();
        let fitter = KalmanFitter::new(&detector, &field);
        let tracks = fitter.fit(&candidates).unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].states.len(), 12);

        let last = tracks[0].states.last().unwrap();
        assert!(last.smoothed.loc0().abs() < 0.1);
        assert!(last.smoothed.loc1().abs() < 0.1);
        // Position measurements in zero field never constrain qop; the
        // smoothed value stays within the seed prior.
        assert!((tracks[0].states[0].smoothed.qop() + 1.0).abs() < 0.3);
    }

    #[test]
    fn empty_candidate_yields_empty_state_list() {
        let detector = TelescopeDetector::default();
        let field = zero_field();
        let candidate = TrackCandidate {
            particle_id: 9,
            seed: BoundParams::new(0.0, 0.0, 0.0, std::f64::consts::FRAC_PI_2, -1.0, 0.0),
            seed_cov: ParamCov::identity(),
            measurements: Vec::new(),
        };
        let fitter = KalmanFitter::new(&detector, &field);
        let tracks = fitter.fit(&[candidate]).unwrap();
        assert!(tracks[0].states.is_empty());
    }

    #[test]
    fn highland_angle_grows_with_thickness() {
        let thin = highland_theta0(1.0, 1.0, 93.7);
        let thick = highland_theta0(1.0, 10.0, 93.7);
        assert!(thick > thin);
        assert!(thin > 0.0);
        assert_eq!(highland_theta0(1.0, 0.0, 93.7), 0.0);
    }
}
