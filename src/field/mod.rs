//! Magnetic field map generation, conversion and sampling.

pub mod grid;
pub mod map;
pub mod region;

pub use grid::{write_field_text, AxisSpec, GridPoints, GridSpec};
pub use map::FieldMap;
pub use region::{MagnetRegion, SlabMagnet};
