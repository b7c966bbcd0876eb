//! Telescope detector description: parallel rectangular planes along x.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::TrkError;

/// Sensor material, used for the multiple-scattering noise in the fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    /// Radiation length [mm].
    pub x0_mm: f64,
}

impl Material {
    pub fn silicon() -> Self {
        Self {
            name: "silicon".to_string(),
            x0_mm: 93.7,
        }
    }
}

/// A sensitive plane with its normal along +x. Local coordinates
/// (loc0, loc1) map to global (y, z).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorPlane {
    pub id: u32,
    pub x_mm: f64,
    pub half_width_mm: f64,
    pub half_height_mm: f64,
    pub thickness_mm: f64,
    pub material: Material,
}

impl DetectorPlane {
    pub fn contains_local(&self, loc0_mm: f64, loc1_mm: f64) -> bool {
        loc0_mm.abs() <= self.half_width_mm && loc1_mm.abs() <= self.half_height_mm
    }

    pub fn bound_to_global(&self, loc0_mm: f64, loc1_mm: f64) -> Vector3<f64> {
        Vector3::new(self.x_mm, loc0_mm, loc1_mm)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelescopeDetector {
    planes: Vec<DetectorPlane>,
}

/// The experiment's plane stations: four triplets of silicon strip
/// sensors along the beam axis.
const DEFAULT_PLANE_POSITIONS_MM: [f64; 12] = [
    10.0, 20.0, 30.0, 60.0, 70.0, 80.0, 180.0, 190.0, 200.0, 230.0, 240.0, 250.0,
];

impl Default for TelescopeDetector {
    fn default() -> Self {
        let planes = DEFAULT_PLANE_POSITIONS_MM
            .iter()
            .enumerate()
            .map(|(idx, &x_mm)| DetectorPlane {
                id: idx as u32,
                x_mm,
                half_width_mm: 100.0,
                half_height_mm: 100.0,
                thickness_mm: 5.0,
                material: Material::silicon(),
            })
            .collect();
        Self { planes }
    }
}

impl TelescopeDetector {
    pub fn new(planes: Vec<DetectorPlane>) -> Result<Self, TrkError> {
        if planes.is_empty() {
            return Err(TrkError::Geometry("detector has no planes".to_string()));
        }
        for pair in planes.windows(2) {
            if pair[1].x_mm <= pair[0].x_mm {
                return Err(TrkError::Geometry(format!(
                    "planes {} and {} are not in strictly increasing x order",
                    pair[0].id, pair[1].id
                )));
            }
        }
        Ok(Self { planes })
    }

    pub fn planes(&self) -> &[DetectorPlane] {
        &self.planes
    }

    pub fn plane(&self, id: u32) -> Result<&DetectorPlane, TrkError> {
        self.planes
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| TrkError::Geometry(format!("unknown plane id {}", id)))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, TrkError> {
        let reader = BufReader::new(File::open(path)?);
        let raw: TelescopeDetector = serde_json::from_reader(reader)?;
        Self::new(raw.planes)
    }

    pub fn write_json_file(&self, path: &Path) -> Result<(), TrkError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Apply per-plane material overrides from a material description file.
    pub fn apply_material_file(&mut self, path: &Path) -> Result<(), TrkError> {
        let reader = BufReader::new(File::open(path)?);
        let overrides: Vec<PlaneMaterial> = serde_json::from_reader(reader)?;
        for entry in overrides {
            let plane = self
                .planes
                .iter_mut()
                .find(|p| p.id == entry.plane_id)
                .ok_or_else(|| {
                    TrkError::Geometry(format!(
                        "material override for unknown plane id {}",
                        entry.plane_id
                    ))
                })?;
            plane.material = entry.material;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneMaterial {
    pub plane_id: u32,
    pub material: Material,
}

/// Optional per-plane acceptance windows in local coordinates; hits
/// outside their plane's window are dropped when event data is loaded.
/// Planes without a window accept everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptanceGrid {
    windows: HashMap<u32, AcceptanceWindow>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AcceptanceWindow {
    pub min_loc0_mm: f64,
    pub max_loc0_mm: f64,
    pub min_loc1_mm: f64,
    pub max_loc1_mm: f64,
}

impl AcceptanceGrid {
    pub fn from_json_file(path: &Path) -> Result<Self, TrkError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn accepts(&self, plane_id: u32, loc0_mm: f64, loc1_mm: f64) -> bool {
        match self.windows.get(&plane_id) {
            Some(w) => {
                loc0_mm >= w.min_loc0_mm
                    && loc0_mm <= w.max_loc0_mm
                    && loc1_mm >= w.min_loc1_mm
                    && loc1_mm <= w.max_loc1_mm
            }
            None => true,
        }
    }

    #[cfg(test)]
    pub fn with_window(plane_id: u32, window: AcceptanceWindow) -> Self {
        let mut windows = HashMap::new();
        windows.insert(plane_id, window);
        Self { windows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_detector_has_twelve_ordered_planes() {
        let det = TelescopeDetector::default();
        assert_eq!(det.planes().len(), 12);
        assert!(det
            .planes()
            .windows(2)
            .all(|p| p[1].x_mm > p[0].x_mm));
        assert_eq!(det.plane(0).unwrap().x_mm, 10.0);
        assert_eq!(det.plane(11).unwrap().x_mm, 250.0);
    }

    #[test]
    fn bound_to_global_maps_local_axes_to_y_z() {
        let det = TelescopeDetector::default();
        let g = det.plane(3).unwrap().bound_to_global(-4.0, 7.5);
        assert_eq!(g, Vector3::new(60.0, -4.0, 7.5));
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detector.json");
        let det = TelescopeDetector::default();
        det.write_json_file(&path).unwrap();
        let reread = TelescopeDetector::from_json_file(&path).unwrap();
        assert_eq!(reread.planes().len(), det.planes().len());
        assert_eq!(reread.plane(5).unwrap().x_mm, det.plane(5).unwrap().x_mm);
    }

    #[test]
    fn unordered_planes_are_rejected() {
        let mut planes = TelescopeDetector::default().planes().to_vec();
        planes.swap(0, 1);
        assert!(matches!(
            TelescopeDetector::new(planes),
            Err(TrkError::Geometry(_))
        ));
    }

    #[test]
    fn acceptance_grid_defaults_open() {
        let grid = AcceptanceGrid::default();
        assert!(grid.accepts(3, 99.0, -99.0));

        let narrow = AcceptanceGrid::with_window(
            3,
            AcceptanceWindow {
                min_loc0_mm: -1.0,
                max_loc0_mm: 1.0,
                min_loc1_mm: -1.0,
                max_loc1_mm: 1.0,
            },
        );
        assert!(narrow.accepts(3, 0.5, 0.5));
        assert!(!narrow.accepts(3, 2.0, 0.0));
        assert!(narrow.accepts(4, 50.0, 50.0));
    }
}
