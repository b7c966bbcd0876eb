//! Charged-particle transport through the field map.
//!
//! Fourth-order Runge-Kutta integration of the bending equation
//! d(dir)/ds = C * qop * dir x B, with s the arc length in mm, momentum
//! in GeV and the field in Tesla.

use nalgebra::Vector3;

use crate::field::FieldMap;
use crate::TrkError;

/// 0.299792458 GeV / (T * m), expressed per millimetre.
pub const BEND_FACTOR: f64 = 2.99792458e-4;

/// Default integration step [mm].
pub const DEFAULT_STEP_MM: f64 = 1.0;

const MAX_STEPS: usize = 200_000;
const MIN_FORWARD_SLOPE: f64 = 1.0e-6;

/// Free track state: global position, unit direction, charge over
/// momentum magnitude.
#[derive(Debug, Clone, Copy)]
pub struct FreeState {
    pub pos_mm: Vector3<f64>,
    pub dir: Vector3<f64>,
    pub qop: f64,
}

fn bend(dir: &Vector3<f64>, qop: f64, b_tesla: &Vector3<f64>) -> Vector3<f64> {
    BEND_FACTOR * qop * dir.cross(b_tesla)
}

/// One RK4 step of length `h_mm` along the trajectory. Falls back to a
/// straight line when the field vanishes at every stage point.
pub fn rk4_step(state: &FreeState, field: &FieldMap, h_mm: f64) -> FreeState {
    let b0 = field.sample(&state.pos_mm);
    let b_mid = field.sample(&(state.pos_mm + state.dir * (0.5 * h_mm)));
    let b_end = field.sample(&(state.pos_mm + state.dir * h_mm));

    if b0 == Vector3::zeros() && b_mid == Vector3::zeros() && b_end == Vector3::zeros() {
        return FreeState {
            pos_mm: state.pos_mm + state.dir * h_mm,
            dir: state.dir,
            qop: state.qop,
        };
    }

    let k1_d = bend(&state.dir, state.qop, &b0);
    let k1_p = state.dir;

    let d2 = state.dir + k1_d * (0.5 * h_mm);
    let k2_d = bend(&d2, state.qop, &b_mid);
    let k2_p = d2;

    let d3 = state.dir + k2_d * (0.5 * h_mm);
    let k3_d = bend(&d3, state.qop, &b_mid);
    let k3_p = d3;

    let d4 = state.dir + k3_d * h_mm;
    let k4_d = bend(&d4, state.qop, &b_end);
    let k4_p = d4;

    let pos = state.pos_mm + (k1_p + 2.0 * k2_p + 2.0 * k3_p + k4_p) * (h_mm / 6.0);
    let mut dir = state.dir + (k1_d + 2.0 * k2_d + 2.0 * k3_d + k4_d) * (h_mm / 6.0);
    dir.normalize_mut();

    FreeState {
        pos_mm: pos,
        dir,
        qop: state.qop,
    }
}

/// Propagate forward until the trajectory crosses the plane `x = x_target`,
/// landing exactly on it. Fails when the track stalls, turns back, or the
/// step budget runs out.
pub fn propagate_to_plane(
    state: &FreeState,
    x_target_mm: f64,
    field: &FieldMap,
    step_mm: f64,
) -> Result<FreeState, TrkError> {
    if x_target_mm < state.pos_mm.x {
        return Err(TrkError::Propagation(format!(
            "target plane x={} is behind the track at x={}",
            x_target_mm, state.pos_mm.x
        )));
    }

    let mut current = *state;
    for _ in 0..MAX_STEPS {
        if current.dir.x <= MIN_FORWARD_SLOPE {
            return Err(TrkError::Propagation(format!(
                "track stalled at x={} heading for plane x={}",
                current.pos_mm.x, x_target_mm
            )));
        }

        let remaining = x_target_mm - current.pos_mm.x;
        let full_arc = remaining / current.dir.x;
        if full_arc <= step_mm {
            current = rk4_step(&current, field, full_arc);
            // Newton refinement of the landing point; the bent trajectory
            // rarely hits the plane on the first partial step.
            for _ in 0..8 {
                let miss = x_target_mm - current.pos_mm.x;
                if miss.abs() < 1e-9 {
                    break;
                }
                if current.dir.x.abs() <= MIN_FORWARD_SLOPE {
                    return Err(TrkError::Propagation(
                        "track parallel to plane during landing refinement".to_string(),
                    ));
                }
                current = rk4_step(&current, field, miss / current.dir.x);
            }
            current.pos_mm.x = x_target_mm;
            return Ok(current);
        }

        current = rk4_step(&current, field, step_mm);
    }

    Err(TrkError::Propagation(format!(
        "step budget exhausted before reaching plane x={}",
        x_target_mm
    )))
}
