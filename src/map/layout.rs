//! Per-voxel layer descriptions for regioned maps

use crate::core::types::IVec3;

/// Name of the occupancy log-odds layer present in every map.
pub const OCCUPANCY_LAYER: &str = "occupancy";
/// Name of the optional sub-voxel sample-mean layer.
pub const MEAN_LAYER: &str = "mean";

/// One named layer: a fixed-size record per voxel, stored contiguously per
/// region in a voxel block.
#[derive(Clone, Debug)]
pub struct MapLayer {
    name: String,
    clear_pattern: Vec<u8>,
}

impl MapLayer {
    /// Create a layer. `clear_pattern` is the byte image of one record in its
    /// initial state; its length fixes the per-voxel record size.
    pub fn new(name: &str, clear_pattern: Vec<u8>) -> Self {
        debug_assert!(!clear_pattern.is_empty());
        Self {
            name: name.to_string(),
            clear_pattern,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of one voxel record in bytes.
    pub fn voxel_byte_size(&self) -> usize {
        self.clear_pattern.len()
    }

    /// Size of this layer's block for a region of `region_dims` voxels.
    pub fn layer_byte_size(&self, region_dims: IVec3) -> usize {
        let voxels = region_dims.x as usize * region_dims.y as usize * region_dims.z as usize;
        voxels * self.voxel_byte_size()
    }

    /// Build the initial block bytes for a region: the clear pattern repeated
    /// once per voxel.
    pub(crate) fn build_block_bytes(&self, region_dims: IVec3) -> Vec<u8> {
        let voxels = region_dims.x as usize * region_dims.y as usize * region_dims.z as usize;
        let mut bytes = Vec::with_capacity(voxels * self.clear_pattern.len());
        for _ in 0..voxels {
            bytes.extend_from_slice(&self.clear_pattern);
        }
        bytes
    }
}

/// Ordered set of layers making up a map's per-voxel storage.
#[derive(Clone, Debug, Default)]
pub struct MapLayout {
    layers: Vec<MapLayer>,
}

impl MapLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout with just the occupancy layer. Voxels start unobserved.
    pub fn occupancy() -> Self {
        let mut layout = Self::new();
        layout.add_layer(MapLayer::new(
            OCCUPANCY_LAYER,
            f32::INFINITY.to_ne_bytes().to_vec(),
        ));
        layout
    }

    /// Layout with occupancy plus the sub-voxel mean layer.
    pub fn occupancy_with_mean() -> Self {
        let mut layout = Self::occupancy();
        // VoxelMean: three f32 offsets + u32 sample count, all zero.
        layout.add_layer(MapLayer::new(MEAN_LAYER, vec![0u8; 16]));
        layout
    }

    /// Append a layer, returning its index.
    pub fn add_layer(&mut self, layer: MapLayer) -> usize {
        self.layers.push(layer);
        self.layers.len() - 1
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.name() == name)
    }

    pub fn layer(&self, index: usize) -> &MapLayer {
        &self.layers[index]
    }

    pub fn layers(&self) -> &[MapLayer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_occupancy_layout() {
        let layout = MapLayout::occupancy();
        assert_eq!(layout.len(), 1);
        assert_eq!(layout.layer_index(OCCUPANCY_LAYER), Some(0));
        assert_eq!(layout.layer(0).voxel_byte_size(), 4);
    }

    #[test]
    fn test_layer_byte_size() {
        let layout = MapLayout::occupancy();
        let dims = IVec3::new(32, 32, 1);
        assert_eq!(layout.layer(0).layer_byte_size(dims), 32 * 32 * 4);
    }

    #[test]
    fn test_block_bytes_repeat_clear_pattern() {
        let layer = MapLayer::new("test", vec![0xab, 0xcd]);
        let bytes = layer.build_block_bytes(IVec3::new(2, 2, 1));
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..2], &[0xab, 0xcd]);
        assert_eq!(&bytes[6..], &[0xab, 0xcd]);
    }

    #[test]
    fn test_mean_layout() {
        let layout = MapLayout::occupancy_with_mean();
        assert_eq!(layout.layer_index(MEAN_LAYER), Some(1));
        assert_eq!(layout.layer(1).voxel_byte_size(), 16);
    }
}
