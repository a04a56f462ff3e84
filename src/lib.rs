//! Reliefmap - navigable-surface heightmaps from probabilistic voxel occupancy maps
//!
//! The crate collapses a 3D occupancy map (voxels carrying occupancy log-odds)
//! into a single-layer 2D heightmap: for each vertical column the best
//! supporting surface is selected - the occupied voxel nearest the reference
//! height with sufficient clearance above it - and its absolute height and
//! overhead clearance are recorded. The result is a compact representation of
//! traversable ground for robotic navigation.
//!
//! Voxel layer payloads are kept under a memory budget by a background
//! compression queue; see [`block`].

pub mod core;
pub mod math;
pub mod map;
pub mod block;
pub mod heightmap;
