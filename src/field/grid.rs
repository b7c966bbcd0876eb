//! Uniform grid enumeration and the text field-sample writer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::field::region::MagnetRegion;
use crate::TrkError;

/// Half-open interval `[start, end)` sampled at a fixed spacing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AxisSpec {
    pub start_mm: f64,
    pub end_mm: f64,
    pub spacing_mm: f64,
}

impl AxisSpec {
    pub fn new(start_mm: f64, end_mm: f64, spacing_mm: f64) -> Self {
        Self {
            start_mm,
            end_mm,
            spacing_mm,
        }
    }

    /// Number of sample points: every `start + i*spacing` strictly below `end`.
    pub fn len(&self) -> usize {
        if self.end_mm <= self.start_mm || self.spacing_mm <= 0.0 {
            return 0;
        }
        ((self.end_mm - self.start_mm) / self.spacing_mm).ceil() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, idx: usize) -> f64 {
        self.start_mm + idx as f64 * self.spacing_mm
    }

    pub fn validate(&self) -> Result<(), TrkError> {
        if !(self.start_mm.is_finite() && self.end_mm.is_finite()) {
            return Err(TrkError::InvalidConfig(
                "grid axis bounds must be finite".to_string(),
            ));
        }
        if self.spacing_mm <= 0.0 || !self.spacing_mm.is_finite() {
            return Err(TrkError::InvalidConfig(
                "grid spacing must be positive and finite".to_string(),
            ));
        }
        if self.end_mm <= self.start_mm {
            return Err(TrkError::InvalidConfig(
                "grid axis end must be greater than start".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounding box of the field sample grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridSpec {
    pub x: AxisSpec,
    pub y: AxisSpec,
    pub z: AxisSpec,
}

impl Default for GridSpec {
    /// The detector hall box: x in [-100, 1000), y and z in [-500, 500),
    /// 10 mm cells.
    fn default() -> Self {
        Self {
            x: AxisSpec::new(-100.0, 1000.0, 10.0),
            y: AxisSpec::new(-500.0, 500.0, 10.0),
            z: AxisSpec::new(-500.0, 500.0, 10.0),
        }
    }
}

impl GridSpec {
    pub fn validate(&self) -> Result<(), TrkError> {
        self.x.validate()?;
        self.y.validate()?;
        self.z.validate()
    }

    pub fn len(&self) -> usize {
        self.x.len() * self.y.len() * self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazy enumeration of all grid points in x-major, y-middle, z-minor
    /// order. The iterator is finite and restartable.
    pub fn points(&self) -> GridPoints<'_> {
        GridPoints {
            spec: self,
            idx: 0,
            total: self.len(),
        }
    }
}

pub struct GridPoints<'a> {
    spec: &'a GridSpec,
    idx: usize,
    total: usize,
}

impl Iterator for GridPoints<'_> {
    type Item = [f64; 3];

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.total {
            return None;
        }
        let ny = self.spec.y.len();
        let nz = self.spec.z.len();
        let ix = self.idx / (ny * nz);
        let iy = (self.idx / nz) % ny;
        let iz = self.idx % nz;
        self.idx += 1;
        Some([
            self.spec.x.value(ix),
            self.spec.y.value(iy),
            self.spec.z.value(iz),
        ])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.idx;
        (left, Some(left))
    }
}

impl ExactSizeIterator for GridPoints<'_> {}

/// Write one field sample line per grid point: `x y z Bx By Bz`,
/// space-separated. Bx and Bz are identically zero; By is `by_tesla`
/// inside the magnet region and zero elsewhere.
pub fn write_field_text(
    path: &Path,
    spec: &GridSpec,
    region: &dyn MagnetRegion,
    by_tesla: f64,
) -> Result<(), TrkError> {
    spec.validate()?;
    let mut writer = BufWriter::new(File::create(path)?);

    for [x, y, z] in spec.points() {
        let by = if region.contains(x, y, z) { by_tesla } else { 0.0 };
        writeln!(writer, "{} {} {} {} {} {}", x, y, z, 0.0, by, 0.0)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::region::SlabMagnet;

    #[test]
    fn axis_len_counts_half_open_points() {
        let axis = AxisSpec::new(-100.0, 1000.0, 10.0);
        assert_eq!(axis.len(), 110);
        assert_eq!(axis.value(0), -100.0);
        assert_eq!(axis.value(109), 990.0);
    }

    #[test]
    fn default_grid_covers_declared_box() {
        let spec = GridSpec::default();
        assert_eq!(spec.len(), 110 * 100 * 100);
    }

    #[test]
    fn points_enumerate_z_fastest() {
        let spec = GridSpec {
            x: AxisSpec::new(0.0, 20.0, 10.0),
            y: AxisSpec::new(0.0, 20.0, 10.0),
            z: AxisSpec::new(0.0, 20.0, 10.0),
        };
        let pts: Vec<_> = spec.points().collect();
        assert_eq!(pts.len(), 8);
        assert_eq!(pts[0], [0.0, 0.0, 0.0]);
        assert_eq!(pts[1], [0.0, 0.0, 10.0]);
        assert_eq!(pts[2], [0.0, 10.0, 0.0]);
        assert_eq!(pts[4], [10.0, 0.0, 0.0]);
    }

    #[test]
    fn points_iterator_is_restartable() {
        let spec = GridSpec {
            x: AxisSpec::new(0.0, 30.0, 10.0),
            y: AxisSpec::new(0.0, 10.0, 10.0),
            z: AxisSpec::new(0.0, 10.0, 10.0),
        };
        let first: Vec<_> = spec.points().collect();
        let second: Vec<_> = spec.points().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn field_text_has_one_line_per_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bfield.txt");
        let spec = GridSpec {
            x: AxisSpec::new(40.0, 60.0, 10.0),
            y: AxisSpec::new(-10.0, 10.0, 10.0),
            z: AxisSpec::new(0.0, 10.0, 10.0),
        };
        write_field_text(&path, &spec, &SlabMagnet::default(), 0.5).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), spec.len());
        // (40, -10, 0) sits inside the first slab.
        assert_eq!(lines[0], "40 -10 0 0 0.5 0");
        // (50, 0, 0) is the slab's trailing edge, (60, ...) never appears.
        assert!(lines.iter().all(|l| !l.starts_with("60 ")));
    }
}
