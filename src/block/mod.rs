//! Voxel block storage and background compression
//!
//! A [`VoxelBlock`] owns the contiguous byte payload for one layer of one map
//! region. Blocks register with a [`CompressionQueue`] which keeps the
//! aggregate uncompressed footprint below a high water mark by compressing
//! blocks that nothing currently holds, and re-inflating them on demand when
//! they are retained again.

pub mod voxel_block;
pub mod compression_queue;

pub use voxel_block::VoxelBlock;
pub use compression_queue::CompressionQueue;
