//! Heightmap voxel records and layer layout

use crate::map::{MapLayer, MapLayout};
use bytemuck::{Pod, Zeroable};

/// Name of the layer holding [`HeightmapVoxel`] records.
pub const HEIGHTMAP_LAYER: &str = "heightmap";

/// Occupancy value of a heightmap cell representing a real supporting
/// surface extracted from the source map.
pub const SURFACE_VALUE: f32 = 1.0;
/// Occupancy value of a heightmap cell representing a virtual surface: a
/// free voxel resting on unknown space.
pub const VIRTUAL_SURFACE_VALUE: f32 = -1.0;
/// Occupancy value of a heightmap cell whose column yielded no surface.
pub const VACANT_VALUE: f32 = 0.0;

/// Per-cell heightmap record.
///
/// `height` is the absolute position of the supporting surface along the up
/// axis; the sign follows the chosen up direction, so negative up axes store
/// inverted heights. `clearance` is the free distance above the surface
/// before the next obstruction; zero means no information - either nothing
/// was observed above the surface within the search range, or the surface is
/// virtual.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HeightmapVoxel {
    pub height: f64,
    pub clearance: f32,
    /// Pads the record to 16 bytes.
    pub reserved: f32,
}

impl HeightmapVoxel {
    pub fn new(height: f64, clearance: f32) -> Self {
        Self {
            height,
            clearance,
            reserved: 0.0,
        }
    }
}

/// Layout for heightmap grids: an occupancy layer plus the heightmap record
/// layer.
pub fn heightmap_layout() -> MapLayout {
    let mut layout = MapLayout::occupancy();
    layout.add_layer(MapLayer::new(
        HEIGHTMAP_LAYER,
        vec![0u8; std::mem::size_of::<HeightmapVoxel>()],
    ));
    layout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_bit_stable() {
        assert_eq!(SURFACE_VALUE.to_bits(), 1.0f32.to_bits());
        assert_eq!(VIRTUAL_SURFACE_VALUE.to_bits(), (-1.0f32).to_bits());
        assert_eq!(VACANT_VALUE.to_bits(), 0.0f32.to_bits());
    }

    #[test]
    fn test_record_size() {
        assert_eq!(std::mem::size_of::<HeightmapVoxel>(), 16);
    }

    #[test]
    fn test_layout_has_both_layers() {
        let layout = heightmap_layout();
        assert_eq!(layout.layer_index(crate::map::OCCUPANCY_LAYER), Some(0));
        assert_eq!(layout.layer_index(HEIGHTMAP_LAYER), Some(1));
        assert_eq!(layout.layer(1).voxel_byte_size(), 16);
    }
}
