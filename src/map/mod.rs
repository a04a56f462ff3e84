//! Probabilistic occupancy map container
//!
//! Voxels carry an occupancy log-odds value and are classified occupied,
//! free or unknown by thresholding. Storage is regioned: each region holds
//! one contiguous byte block per map layer, registered with an optional
//! compression queue.

pub mod key;
pub mod layout;
pub mod info;
pub mod region;
pub mod occupancy_map;

pub use key::Key;
pub use layout::{MapLayer, MapLayout, OCCUPANCY_LAYER, MEAN_LAYER};
pub use info::{MapInfo, MapValue};
pub use occupancy_map::{OccupancyMap, VoxelKind, VoxelMean, UNOBSERVED_OCCUPANCY};
