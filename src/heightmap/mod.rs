//! Heightmap construction from occupancy maps
//!
//! Collapses each vertical column of a source [`crate::map::OccupancyMap`]
//! into a single heightmap voxel recording the supporting surface height and
//! the clearance above it. Columns are visited by a planar sweep or a flood
//! fill from a reference position; a local cache of recent output patches
//! columns the live pass cannot resolve.

pub mod up_axis;
pub mod voxel;
pub mod column;
pub mod walker;
pub mod builder;

pub use up_axis::UpAxis;
pub use voxel::{
    HeightmapVoxel, HEIGHTMAP_LAYER, SURFACE_VALUE, VACANT_VALUE, VIRTUAL_SURFACE_VALUE,
};
pub use builder::Heightmap;
