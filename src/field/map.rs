//! Binary field-map storage and trilinear sampling.
//!
//! The on-disk layout is little-endian: magic `TFLD`, a u32 version, the
//! per-axis point counts as u64, per-axis origin and spacing as f64, then
//! nx*ny*nz samples of (Bx, By, Bz) in x-major order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use nalgebra::Vector3;

use crate::field::grid::GridSpec;
use crate::field::region::MagnetRegion;
use crate::TrkError;

const MAGIC: &[u8; 4] = b"TFLD";
const VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct FieldMap {
    counts: [usize; 3],
    origin_mm: [f64; 3],
    spacing_mm: [f64; 3],
    samples: Vec<[f64; 3]>,
}

impl FieldMap {
    pub fn new(
        counts: [usize; 3],
        origin_mm: [f64; 3],
        spacing_mm: [f64; 3],
        samples: Vec<[f64; 3]>,
    ) -> Result<Self, TrkError> {
        let expected = counts[0] * counts[1] * counts[2];
        if samples.len() != expected {
            return Err(TrkError::FieldFormat(format!(
                "sample count {} does not match grid {}x{}x{}",
                samples.len(),
                counts[0],
                counts[1],
                counts[2]
            )));
        }
        if counts.iter().any(|&n| n < 2) {
            return Err(TrkError::FieldFormat(
                "field grid needs at least two points per axis".to_string(),
            ));
        }
        if spacing_mm.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
            return Err(TrkError::FieldFormat(
                "field grid spacing must be positive".to_string(),
            ));
        }
        Ok(Self {
            counts,
            origin_mm,
            spacing_mm,
            samples,
        })
    }

    /// Uniform constant field over a box, mostly useful in tests.
    pub fn uniform(
        origin_mm: [f64; 3],
        spacing_mm: [f64; 3],
        counts: [usize; 3],
        field_tesla: Vector3<f64>,
    ) -> Result<Self, TrkError> {
        let n = counts[0] * counts[1] * counts[2];
        let sample = [field_tesla.x, field_tesla.y, field_tesla.z];
        Self::new(counts, origin_mm, spacing_mm, vec![sample; n])
    }

    /// Evaluate a magnet region directly onto a grid, skipping the text
    /// file round trip.
    pub fn from_region(
        spec: &GridSpec,
        region: &dyn MagnetRegion,
        by_tesla: f64,
    ) -> Result<Self, TrkError> {
        spec.validate()?;
        let samples = spec
            .points()
            .map(|[x, y, z]| {
                let by = if region.contains(x, y, z) { by_tesla } else { 0.0 };
                [0.0, by, 0.0]
            })
            .collect();
        Self::new(
            [spec.x.len(), spec.y.len(), spec.z.len()],
            [spec.x.start_mm, spec.y.start_mm, spec.z.start_mm],
            [spec.x.spacing_mm, spec.y.spacing_mm, spec.z.spacing_mm],
            samples,
        )
    }

    fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (ix * self.counts[1] + iy) * self.counts[2] + iz
    }

    pub fn counts(&self) -> [usize; 3] {
        self.counts
    }

    /// Parse the six-column text grid produced by the generator. The grid
    /// geometry is inferred from the coordinates; ragged or non-uniform
    /// input is rejected.
    pub fn from_text(path: &Path) -> Result<Self, TrkError> {
        let text = std::fs::read_to_string(path)?;
        let mut rows: Vec<[f64; 6]> = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<f64> = line
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>().map_err(|_| {
                        TrkError::FieldFormat(format!(
                            "line {}: non-numeric field '{}'",
                            lineno + 1,
                            tok
                        ))
                    })
                })
                .collect::<Result<_, _>>()?;
            if fields.len() != 6 {
                return Err(TrkError::FieldFormat(format!(
                    "line {}: expected 6 columns, got {}",
                    lineno + 1,
                    fields.len()
                )));
            }
            rows.push([
                fields[0], fields[1], fields[2], fields[3], fields[4], fields[5],
            ]);
        }

        if rows.is_empty() {
            return Err(TrkError::FieldFormat("empty field file".to_string()));
        }

        let axes: Vec<(f64, f64, usize)> = (0..3)
            .map(|axis| infer_axis(rows.iter().map(move |r| r[axis])))
            .collect::<Result<_, _>>()?;

        let counts = [axes[0].2, axes[1].2, axes[2].2];
        let origin_mm = [axes[0].0, axes[1].0, axes[2].0];
        let spacing_mm = [axes[0].1, axes[1].1, axes[2].1];

        let total = counts[0] * counts[1] * counts[2];
        if rows.len() != total {
            return Err(TrkError::FieldFormat(format!(
                "got {} samples for a {}x{}x{} grid",
                rows.len(),
                counts[0],
                counts[1],
                counts[2]
            )));
        }

        let mut samples = vec![[f64::NAN; 3]; total];
        let mut filled = vec![false; total];
        for row in &rows {
            let mut idx3 = [0usize; 3];
            for axis in 0..3 {
                let rel = (row[axis] - origin_mm[axis]) / spacing_mm[axis];
                let i = rel.round();
                if (rel - i).abs() > 1e-6 || i < 0.0 || i as usize >= counts[axis] {
                    return Err(TrkError::FieldFormat(format!(
                        "coordinate {} is off the inferred grid",
                        row[axis]
                    )));
                }
                idx3[axis] = i as usize;
            }
            let flat = (idx3[0] * counts[1] + idx3[1]) * counts[2] + idx3[2];
            if filled[flat] {
                return Err(TrkError::FieldFormat(format!(
                    "duplicate grid point ({}, {}, {})",
                    row[0], row[1], row[2]
                )));
            }
            filled[flat] = true;
            samples[flat] = [row[3], row[4], row[5]];
        }

        Self::new(counts, origin_mm, spacing_mm, samples)
    }

    pub fn write_binary(&self, path: &Path) -> Result<(), TrkError> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        for &n in &self.counts {
            w.write_all(&(n as u64).to_le_bytes())?;
        }
        for &v in &self.origin_mm {
            w.write_all(&v.to_le_bytes())?;
        }
        for &v in &self.spacing_mm {
            w.write_all(&v.to_le_bytes())?;
        }
        for sample in &self.samples {
            for &b in sample {
                w.write_all(&b.to_le_bytes())?;
            }
        }
        w.flush()?;
        Ok(())
    }

    pub fn read_binary(path: &Path) -> Result<Self, TrkError> {
        let mut r = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(TrkError::FieldFormat(
                "bad magic, not a field map file".to_string(),
            ));
        }
        let version = read_u32(&mut r)?;
        if version != VERSION {
            return Err(TrkError::FieldFormat(format!(
                "unsupported field map version {}",
                version
            )));
        }

        let mut counts = [0usize; 3];
        for n in &mut counts {
            *n = read_u64(&mut r)? as usize;
        }
        let mut origin_mm = [0f64; 3];
        for v in &mut origin_mm {
            *v = read_f64(&mut r)?;
        }
        let mut spacing_mm = [0f64; 3];
        for v in &mut spacing_mm {
            *v = read_f64(&mut r)?;
        }

        let total = counts[0]
            .checked_mul(counts[1])
            .and_then(|n| n.checked_mul(counts[2]))
            .ok_or_else(|| TrkError::FieldFormat("grid size overflow".to_string()))?;

        let mut samples = Vec::with_capacity(total);
        for _ in 0..total {
            samples.push([read_f64(&mut r)?, read_f64(&mut r)?, read_f64(&mut r)?]);
        }

        Self::new(counts, origin_mm, spacing_mm, samples)
    }

    /// Trilinear interpolation of the field at a position; zero outside
    /// the grid bounding box.
    pub fn sample(&self, pos_mm: &Vector3<f64>) -> Vector3<f64> {
        let p = [pos_mm.x, pos_mm.y, pos_mm.z];
        let mut base = [0usize; 3];
        let mut frac = [0f64; 3];

        for axis in 0..3 {
            let rel = (p[axis] - self.origin_mm[axis]) / self.spacing_mm[axis];
            let max = (self.counts[axis] - 1) as f64;
            if rel < 0.0 || rel > max {
                return Vector3::zeros();
            }
            let cell = rel.floor().min(max - 1.0);
            base[axis] = cell as usize;
            frac[axis] = rel - cell;
        }

        let mut out = Vector3::zeros();
        for corner in 0..8usize {
            let dx = corner >> 2 & 1;
            let dy = corner >> 1 & 1;
            let dz = corner & 1;
            let weight = (if dx == 1 { frac[0] } else { 1.0 - frac[0] })
                * (if dy == 1 { frac[1] } else { 1.0 - frac[1] })
                * (if dz == 1 { frac[2] } else { 1.0 - frac[2] });
            let s = self.samples[self.index(base[0] + dx, base[1] + dy, base[2] + dz)];
            out += weight * Vector3::new(s[0], s[1], s[2]);
        }
        out
    }
}

fn infer_axis(values: impl Iterator<Item = f64>) -> Result<(f64, f64, usize), TrkError> {
    let mut sorted: Vec<f64> = values.collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    if sorted.len() < 2 {
        return Err(TrkError::FieldFormat(
            "axis needs at least two distinct coordinates".to_string(),
        ));
    }

    let spacing = sorted[1] - sorted[0];
    for pair in sorted.windows(2) {
        if ((pair[1] - pair[0]) - spacing).abs() > 1e-6 {
            return Err(TrkError::FieldFormat(
                "non-uniform grid spacing".to_string(),
            ));
        }
    }

    Ok((sorted[0], spacing, sorted.len()))
}

fn read_u32(r: &mut impl Read) -> Result<u32, TrkError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64, TrkError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read) -> Result<f64, TrkError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}
