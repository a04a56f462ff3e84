//! Global voxel addressing

use crate::core::types::IVec3;

/// Address of a single voxel in a map's global key space.
///
/// The voxel with key `k` is centred at `origin + k * resolution` and spans
/// half a voxel either side. Region membership is derived from the key by
/// floor division with the map's region dimensions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Key {
    pub coord: IVec3,
}

impl Key {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self {
            coord: IVec3::new(x, y, z),
        }
    }

    pub fn from_coord(coord: IVec3) -> Self {
        Self { coord }
    }

    /// Component along `axis` (0 = x, 1 = y, 2 = z).
    pub fn axis(&self, axis: usize) -> i32 {
        self.coord[axis]
    }

    /// Copy of this key with the `axis` component replaced.
    pub fn with_axis(mut self, axis: usize, value: i32) -> Self {
        self.coord[axis] = value;
        self
    }
}
