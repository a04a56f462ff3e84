//! Error types for heightmap construction and voxel block management

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("no source occupancy map set")]
    NoSourceMap,

    #[error("invalid up axis id: {0}")]
    InvalidUpAxis(i32),

    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),

    #[error("voxel block decompression failed: {0}")]
    BlockDecompress(String),

    #[error("voxel block compression failed: {0}")]
    Compression(String),

    #[error("unknown map layer: {0}")]
    UnknownLayer(String),

    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(String),
}
