//! The occupancy map container

use crate::block::CompressionQueue;
use crate::core::error::Error;
use crate::core::types::{DVec3, IVec3, Result};
use crate::map::info::MapInfo;
use crate::map::key::Key;
use crate::map::layout::{MapLayout, MEAN_LAYER, OCCUPANCY_LAYER};
use crate::map::region::Region;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

/// Occupancy value of a voxel that has never been written.
pub const UNOBSERVED_OCCUPANCY: f32 = f32::INFINITY;

/// Classification of a voxel's occupancy value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoxelKind {
    Occupied,
    Free,
    Unknown,
}

/// Sub-voxel positioning record: running mean of integrated sample positions,
/// stored as an offset from the voxel centre.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VoxelMean {
    pub dx: f32,
    pub dy: f32,
    pub dz: f32,
    pub count: u32,
}

/// A regioned 3D voxel map.
///
/// Voxels carry a log-odds occupancy value in the `occupancy` layer and are
/// classified by thresholding; further layers hold fixed-size records per
/// voxel (sub-voxel means, heightmap records). Each region stores one byte
/// block per layer, optionally registered with a [`CompressionQueue`].
pub struct OccupancyMap {
    resolution: f64,
    origin: DVec3,
    region_dims: IVec3,
    layout: MapLayout,
    occupancy_layer: usize,
    mean_layer: Option<usize>,
    occupancy_threshold: f32,
    regions: HashMap<IVec3, Region>,
    info: MapInfo,
    key_extents: Option<(IVec3, IVec3)>,
    queue: Option<Arc<CompressionQueue>>,
}

impl OccupancyMap {
    /// Create a map. The layout must contain an `occupancy` layer.
    pub fn new(resolution: f64, region_dims: IVec3, layout: MapLayout) -> Self {
        debug_assert!(resolution > 0.0);
        debug_assert!(region_dims.min_element() > 0);
        let occupancy_layer = layout
            .layer_index(OCCUPANCY_LAYER)
            .expect("map layout must contain an occupancy layer");
        let mean_layer = layout.layer_index(MEAN_LAYER);
        Self {
            resolution,
            origin: DVec3::ZERO,
            region_dims,
            layout,
            occupancy_layer,
            mean_layer,
            occupancy_threshold: 0.0,
            regions: HashMap::new(),
            info: MapInfo::new(),
            key_extents: None,
            queue: None,
        }
    }

    /// Register every region block with `queue` as regions are created. Must
    /// be called before any voxel is written.
    pub fn with_compression(mut self, queue: Arc<CompressionQueue>) -> Self {
        debug_assert!(self.regions.is_empty());
        self.queue = Some(queue);
        self
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn set_origin(&mut self, origin: DVec3) {
        debug_assert!(self.regions.is_empty());
        self.origin = origin;
    }

    pub fn region_dims(&self) -> IVec3 {
        self.region_dims
    }

    pub fn layout(&self) -> &MapLayout {
        &self.layout
    }

    pub fn info(&self) -> &MapInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut MapInfo {
        &mut self.info
    }

    /// Log-odds value at or above which a voxel counts as occupied.
    pub fn occupancy_threshold(&self) -> f32 {
        self.occupancy_threshold
    }

    pub fn set_occupancy_threshold(&mut self, threshold: f32) {
        self.occupancy_threshold = threshold;
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layout.layer_index(name)
    }

    /// Key of the voxel containing `pos`.
    pub fn key_for_position(&self, pos: DVec3) -> Key {
        let scaled = (pos - self.origin) / self.resolution;
        Key::from_coord(scaled.round().as_ivec3())
    }

    /// World-space centre of the voxel at `key`.
    pub fn voxel_center(&self, key: Key) -> DVec3 {
        self.origin + key.coord.as_dvec3() * self.resolution
    }

    /// Inclusive key-space bounds of all written voxels, if any.
    pub fn key_extents(&self) -> Option<(IVec3, IVec3)> {
        self.key_extents
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Drop all voxel data, preserving layout, origin and metadata.
    pub fn clear(&mut self) {
        self.regions.clear();
        self.key_extents = None;
    }

    /// Classify a raw occupancy value.
    pub fn classify_value(&self, value: f32) -> VoxelKind {
        if value == UNOBSERVED_OCCUPANCY {
            VoxelKind::Unknown
        } else if value >= self.occupancy_threshold {
            VoxelKind::Occupied
        } else {
            VoxelKind::Free
        }
    }

    /// Occupancy value at `key`; unobserved voxels report
    /// [`UNOBSERVED_OCCUPANCY`].
    pub fn occupancy(&self, key: Key) -> Result<f32> {
        let value = self.with_voxel(self.occupancy_layer, key, |bytes| {
            bytemuck::pod_read_unaligned::<f32>(bytes)
        })?;
        Ok(value.unwrap_or(UNOBSERVED_OCCUPANCY))
    }

    /// Classified occupancy at `key`.
    pub fn voxel_kind(&self, key: Key) -> Result<VoxelKind> {
        Ok(self.classify_value(self.occupancy(key)?))
    }

    pub fn set_occupancy(&mut self, key: Key, value: f32) -> Result<()> {
        self.with_voxel_mut(self.occupancy_layer, key, |bytes| {
            bytes.copy_from_slice(&value.to_ne_bytes());
        })
    }

    /// Fold a world-space sample position into the voxel's running mean.
    pub fn integrate_voxel_mean(&mut self, key: Key, sample: DVec3) -> Result<()> {
        let Some(layer) = self.mean_layer else {
            return Err(Error::UnknownLayer(MEAN_LAYER.to_string()));
        };
        let center = self.voxel_center(key);
        self.with_voxel_mut(layer, key, |bytes| {
            let mut mean = bytemuck::pod_read_unaligned::<VoxelMean>(bytes);
            let count = mean.count + 1;
            let offset = sample - center;
            let weight = 1.0 / count as f64;
            mean.dx += ((offset.x - mean.dx as f64) * weight) as f32;
            mean.dy += ((offset.y - mean.dy as f64) * weight) as f32;
            mean.dz += ((offset.z - mean.dz as f64) * weight) as f32;
            mean.count = count;
            bytes.copy_from_slice(bytemuck::bytes_of(&mean));
        })
    }

    /// Sub-voxel mean position of `key`, when the map has a mean layer and
    /// the voxel has integrated samples.
    pub fn voxel_mean(&self, key: Key) -> Result<Option<DVec3>> {
        let Some(layer) = self.mean_layer else {
            return Ok(None);
        };
        let mean = self.with_voxel(layer, key, |bytes| {
            bytemuck::pod_read_unaligned::<VoxelMean>(bytes)
        })?;
        match mean {
            Some(mean) if mean.count > 0 => {
                let center = self.voxel_center(key);
                Ok(Some(
                    center + DVec3::new(mean.dx as f64, mean.dy as f64, mean.dz as f64),
                ))
            }
            _ => Ok(None),
        }
    }

    /// Read a typed record from `layer`. `None` when the voxel's region has
    /// never been written.
    pub fn read_record<T: Pod>(&self, layer: usize, key: Key) -> Result<Option<T>> {
        self.with_voxel(layer, key, |bytes| bytemuck::pod_read_unaligned::<T>(bytes))
    }

    /// Write a typed record to `layer`, creating the region as needed.
    pub fn write_record<T: Pod>(&mut self, layer: usize, key: Key, record: &T) -> Result<()> {
        self.with_voxel_mut(layer, key, |bytes| {
            bytes.copy_from_slice(bytemuck::bytes_of(record));
        })
    }

    fn region_coord(&self, key: Key) -> IVec3 {
        IVec3::new(
            key.coord.x.div_euclid(self.region_dims.x),
            key.coord.y.div_euclid(self.region_dims.y),
            key.coord.z.div_euclid(self.region_dims.z),
        )
    }

    fn voxel_byte_range(&self, layer: usize, key: Key) -> Range<usize> {
        let local = IVec3::new(
            key.coord.x.rem_euclid(self.region_dims.x),
            key.coord.y.rem_euclid(self.region_dims.y),
            key.coord.z.rem_euclid(self.region_dims.z),
        );
        let linear =
            ((local.z * self.region_dims.y + local.y) * self.region_dims.x + local.x) as usize;
        let record = self.layout.layer(layer).voxel_byte_size();
        linear * record..(linear + 1) * record
    }

    fn with_voxel<R>(
        &self,
        layer: usize,
        key: Key,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<Option<R>> {
        let Some(region) = self.regions.get(&self.region_coord(key)) else {
            return Ok(None);
        };
        let range = self.voxel_byte_range(layer, key);
        let block = region.block(layer);
        block.retain()?;
        let out = block.with_data(|bytes| f(&bytes[range]));
        block.release();
        Ok(Some(out))
    }

    fn with_voxel_mut<R>(
        &mut self,
        layer: usize,
        key: Key,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let region_coord = self.region_coord(key);
        if !self.regions.contains_key(&region_coord) {
            let region = Region::new(&self.layout, self.region_dims, self.queue.as_ref());
            self.regions.insert(region_coord, region);
        }
        let range = self.voxel_byte_range(layer, key);
        let block = self.regions[&region_coord].block(layer);
        block.retain()?;
        let out = block.with_data_mut(|bytes| f(&mut bytes[range]));
        block.release();

        match &mut self.key_extents {
            Some((min, max)) => {
                *min = min.min(key.coord);
                *max = max.max(key.coord);
            }
            None => self.key_extents = Some((key.coord, key.coord)),
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_map() -> OccupancyMap {
        OccupancyMap::new(0.5, IVec3::new(16, 16, 16), MapLayout::occupancy())
    }

    #[test]
    fn test_unwritten_voxels_are_unknown() {
        let map = test_map();
        let key = Key::new(3, -7, 100);
        assert_eq!(map.occupancy(key).unwrap(), UNOBSERVED_OCCUPANCY);
        assert_eq!(map.voxel_kind(key).unwrap(), VoxelKind::Unknown);
        assert_eq!(map.region_count(), 0);
    }

    #[test]
    fn test_set_and_classify() {
        let mut map = test_map();
        map.set_occupancy(Key::new(0, 0, 0), 1.2).unwrap();
        map.set_occupancy(Key::new(0, 0, 1), -2.0).unwrap();

        assert_eq!(map.voxel_kind(Key::new(0, 0, 0)).unwrap(), VoxelKind::Occupied);
        assert_eq!(map.voxel_kind(Key::new(0, 0, 1)).unwrap(), VoxelKind::Free);
        // Neighbours in the same region remain unknown.
        assert_eq!(map.voxel_kind(Key::new(1, 0, 0)).unwrap(), VoxelKind::Unknown);
    }

    #[test]
    fn test_negative_keys_cross_regions() {
        let mut map = test_map();
        map.set_occupancy(Key::new(-1, -17, 15), 0.5).unwrap();
        assert_eq!(map.voxel_kind(Key::new(-1, -17, 15)).unwrap(), VoxelKind::Occupied);
        assert_eq!(map.region_count(), 1);
        map.set_occupancy(Key::new(0, 0, 0), 0.5).unwrap();
        assert_eq!(map.region_count(), 2);
    }

    #[test]
    fn test_key_position_round_trip() {
        let mut map = test_map();
        map.set_origin(DVec3::new(0.1, -0.2, 0.3));
        let key = Key::new(5, -3, 2);
        let center = map.voxel_center(key);
        assert_eq!(map.key_for_position(center), key);
        // Points within half a voxel of the centre resolve to the same key.
        assert_eq!(map.key_for_position(center + DVec3::splat(0.24)), key);
    }

    #[test]
    fn test_key_extents_track_writes() {
        let mut map = test_map();
        assert_eq!(map.key_extents(), None);
        map.set_occupancy(Key::new(2, 3, 4), 1.0).unwrap();
        map.set_occupancy(Key::new(-5, 0, 9), 1.0).unwrap();
        let (min, max) = map.key_extents().unwrap();
        assert_eq!(min, IVec3::new(-5, 0, 4));
        assert_eq!(max, IVec3::new(2, 3, 9));
    }

    #[test]
    fn test_voxel_mean_running_average() {
        let mut map = OccupancyMap::new(
            1.0,
            IVec3::new(8, 8, 8),
            MapLayout::occupancy_with_mean(),
        );
        let key = Key::new(2, 2, 2);
        assert_eq!(map.voxel_mean(key).unwrap(), None);

        map.integrate_voxel_mean(key, DVec3::new(2.2, 2.0, 2.0)).unwrap();
        map.integrate_voxel_mean(key, DVec3::new(1.8, 2.0, 2.4)).unwrap();
        let mean = map.voxel_mean(key).unwrap().unwrap();
        assert!((mean.x - 2.0).abs() < 1e-6);
        assert!((mean.y - 2.0).abs() < 1e-6);
        assert!((mean.z - 2.2).abs() < 1e-6);
    }

    #[test]
    fn test_mean_requires_layer() {
        let mut map = test_map();
        assert!(map
            .integrate_voxel_mean(Key::new(0, 0, 0), DVec3::ZERO)
            .is_err());
        assert_eq!(map.voxel_mean(Key::new(0, 0, 0)).unwrap(), None);
    }

    #[test]
    fn test_clear_preserves_layout() {
        let mut map = test_map();
        map.set_occupancy(Key::new(1, 1, 1), 1.0).unwrap();
        map.clear();
        assert_eq!(map.region_count(), 0);
        assert_eq!(map.key_extents(), None);
        assert_eq!(map.voxel_kind(Key::new(1, 1, 1)).unwrap(), VoxelKind::Unknown);
        // Still writable afterwards.
        map.set_occupancy(Key::new(1, 1, 1), 1.0).unwrap();
        assert_eq!(map.voxel_kind(Key::new(1, 1, 1)).unwrap(), VoxelKind::Occupied);
    }

    #[test]
    fn test_compressed_map_reads_back() {
        let queue = Arc::new(CompressionQueue::new_for_test());
        let mut map = OccupancyMap::new(1.0, IVec3::new(8, 8, 8), MapLayout::occupancy())
            .with_compression(Arc::clone(&queue));

        for i in 0..4 {
            map.set_occupancy(Key::new(i * 8, 0, 0), i as f32).unwrap();
        }
        assert_eq!(queue.block_count(), 4);
        let before = queue.estimated_allocation_size();

        queue.set_high_water_mark(0);
        queue.set_low_water_mark(0);
        let mut scratch = Vec::new();
        queue.tick(&mut scratch);
        assert!(queue.estimated_allocation_size() < before);

        // Reads transparently re-inflate the blocks.
        for i in 0..4 {
            assert_eq!(map.occupancy(Key::new(i * 8, 0, 0)).unwrap(), i as f32);
        }
    }
}
