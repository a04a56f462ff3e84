//! Regioned voxel storage

use crate::block::{CompressionQueue, VoxelBlock};
use crate::core::types::IVec3;
use crate::map::layout::MapLayout;
use std::sync::Arc;

/// One region's storage: a voxel block per map layer.
pub struct Region {
    blocks: Vec<Arc<VoxelBlock>>,
}

impl Region {
    /// Allocate blocks for every layer, registering them with the compression
    /// queue when the owning map has one.
    pub(crate) fn new(
        layout: &MapLayout,
        region_dims: IVec3,
        queue: Option<&Arc<CompressionQueue>>,
    ) -> Self {
        let blocks = layout
            .layers()
            .iter()
            .map(|layer| {
                let block = Arc::new(VoxelBlock::new(layer.build_block_bytes(region_dims)));
                if let Some(queue) = queue {
                    queue.push(Arc::clone(&block));
                }
                block
            })
            .collect();
        Self { blocks }
    }

    pub(crate) fn block(&self, layer: usize) -> &Arc<VoxelBlock> {
        &self.blocks[layer]
    }
}
