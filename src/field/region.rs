//! Magnet-region classification for field-map generation.

/// Region test deciding where the dipole field is non-zero.
///
/// The grid walk is agnostic to the region shape; swapping the magnet
/// geometry never touches the enumeration code.
pub trait MagnetRegion {
    fn contains(&self, x: f64, y: f64, z: f64) -> bool;
}

/// The experiment's dipole: two disjoint slabs along the beam (x) axis,
/// intersected with bounded y and z ranges. Units are millimetres.
#[derive(Debug, Clone)]
pub struct SlabMagnet {
    pub x_slabs: [(f64, f64); 2],
    pub half_y_mm: f64,
    pub half_z_mm: f64,
}

impl Default for SlabMagnet {
    fn default() -> Self {
        Self {
            x_slabs: [(40.0, 50.0), (210.0, 220.0)],
            half_y_mm: 10.0,
            half_z_mm: 10.0,
        }
    }
}

impl MagnetRegion for SlabMagnet {
    fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        let in_x = self
            .x_slabs
            .iter()
            .any(|&(lo, hi)| x >= lo && x <= hi);
        in_x && y.abs() <= self.half_y_mm && z.abs() <= self.half_z_mm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_inside_first_slab() {
        let magnet = SlabMagnet::default();
        assert!(magnet.contains(45.0, 0.0, 0.0));
    }

    #[test]
    fn point_outside_transverse_bound() {
        let magnet = SlabMagnet::default();
        assert!(!magnet.contains(45.0, 15.0, 0.0));
    }

    #[test]
    fn point_between_slabs() {
        let magnet = SlabMagnet::default();
        assert!(!magnet.contains(100.0, 0.0, 0.0));
    }

    #[test]
    fn second_slab_and_edges() {
        let magnet = SlabMagnet::default();
        assert!(magnet.contains(215.0, -10.0, 10.0));
        assert!(magnet.contains(40.0, 0.0, 0.0));
        assert!(magnet.contains(220.0, 0.0, 0.0));
        assert!(!magnet.contains(220.1, 0.0, 0.0));
    }
}
