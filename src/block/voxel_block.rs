//! Reference-counted, compressible voxel layer payloads

use crate::core::error::Error;
use crate::core::types::Result;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// Block flag: the payload is currently held uncompressed.
pub const FLAG_UNCOMPRESSED: u32 = 1 << 0;
/// Block flag: the block is retained (reference count above zero).
pub const FLAG_LOCKED: u32 = 1 << 1;
/// Block flag: the block has been released and may be compressed.
pub const FLAG_MARKED_FOR_COMPRESSION: u32 = 1 << 2;

/// Monotonic stamp source for approximate LRU ordering across all blocks.
static NEXT_TOUCH: AtomicU64 = AtomicU64::new(1);

fn next_touch() -> u64 {
    NEXT_TOUCH.fetch_add(1, Ordering::Relaxed)
}

enum Payload {
    Uncompressed(Vec<u8>),
    Compressed(Vec<u8>),
}

impl Payload {
    fn byte_size(&self) -> usize {
        match self {
            Payload::Uncompressed(bytes) => bytes.len(),
            Payload::Compressed(bytes) => bytes.len(),
        }
    }
}

/// Byte payload for one layer of one map region.
///
/// The payload starts uncompressed. A compression queue may swap it for an
/// LZ4 block while no one holds the block; `retain()` inflates it again.
/// Access to the bytes is only valid between `retain()` and `release()`.
pub struct VoxelBlock {
    layer_byte_size: usize,
    payload: Mutex<Payload>,
    flags: AtomicU32,
    refs: AtomicU32,
    touch: AtomicU64,
}

impl VoxelBlock {
    /// Create a block holding `bytes` uncompressed.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            layer_byte_size: bytes.len(),
            payload: Mutex::new(Payload::Uncompressed(bytes)),
            flags: AtomicU32::new(FLAG_UNCOMPRESSED),
            refs: AtomicU32::new(0),
            touch: AtomicU64::new(next_touch()),
        }
    }

    /// Uncompressed size of the layer payload in bytes.
    pub fn layer_byte_size(&self) -> usize {
        self.layer_byte_size
    }

    /// Current flag set (`FLAG_*` bits).
    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    /// Current reference count. The block is retained while above zero.
    pub fn reference_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Bytes currently held, compressed or not. Used by the regulator's
    /// allocation accounting.
    pub fn current_byte_size(&self) -> usize {
        self.payload.lock().unwrap().byte_size()
    }

    pub(crate) fn last_touch(&self) -> u64 {
        self.touch.load(Ordering::Relaxed)
    }

    /// Eligible for the regulator: uncompressed and not held by anyone.
    pub(crate) fn is_compression_candidate(&self) -> bool {
        self.flags() & FLAG_UNCOMPRESSED != 0 && self.reference_count() == 0
    }

    /// Take a reference to the block, inflating the payload first if it is
    /// currently compressed. Blocks until decompression completes.
    ///
    /// A codec failure here is fatal to the block: the payload stays
    /// unreadable and the error propagates to the caller.
    pub fn retain(&self) -> Result<()> {
        self.refs.fetch_add(1, Ordering::AcqRel);
        self.touch.store(next_touch(), Ordering::Relaxed);

        let mut payload = self.payload.lock().unwrap();
        if let Payload::Compressed(bytes) = &*payload {
            match lz4_flex::block::decompress_size_prepended(bytes) {
                Ok(raw) => *payload = Payload::Uncompressed(raw),
                Err(err) => {
                    self.refs.fetch_sub(1, Ordering::AcqRel);
                    return Err(Error::BlockDecompress(err.to_string()));
                }
            }
        }
        self.flags.fetch_or(FLAG_UNCOMPRESSED | FLAG_LOCKED, Ordering::AcqRel);
        self.flags.fetch_and(!FLAG_MARKED_FOR_COMPRESSION, Ordering::AcqRel);
        Ok(())
    }

    /// Drop a reference taken with `retain()`. At zero the block becomes
    /// eligible for compression again.
    pub fn release(&self) {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "unbalanced VoxelBlock::release");
        if previous == 1 {
            self.flags.fetch_and(!FLAG_LOCKED, Ordering::AcqRel);
            self.flags.fetch_or(FLAG_MARKED_FOR_COMPRESSION, Ordering::AcqRel);
            self.touch.store(next_touch(), Ordering::Relaxed);
        }
    }

    /// Read the payload. Only valid while retained.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let payload = self.payload.lock().unwrap();
        match &*payload {
            Payload::Uncompressed(bytes) => f(bytes),
            Payload::Compressed(_) => {
                panic!("voxel block accessed while compressed; retain() first")
            }
        }
    }

    /// Mutate the payload. Only valid while retained.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut payload = self.payload.lock().unwrap();
        match &mut *payload {
            Payload::Uncompressed(bytes) => f(bytes),
            Payload::Compressed(_) => {
                panic!("voxel block accessed while compressed; retain() first")
            }
        }
    }

    /// Regulator entry: compress the payload into `scratch`, then store a copy
    /// of the compressed bytes. Returns the bytes saved, or 0 when the block
    /// was retained or compressed in the meantime.
    ///
    /// A failed pass (codec error, or output not smaller than input) leaves
    /// the block uncompressed at its full accounted size.
    pub(crate) fn try_compress(&self, scratch: &mut Vec<u8>) -> Result<usize> {
        let mut payload = self.payload.lock().unwrap();
        if self.reference_count() != 0 {
            return Ok(0);
        }
        let Payload::Uncompressed(raw) = &*payload else {
            return Ok(0);
        };

        // Size-prepended LZ4 block: u32 LE uncompressed length + block data.
        scratch.resize(4 + lz4_flex::block::get_maximum_output_size(raw.len()), 0);
        let written = lz4_flex::block::compress_into(raw, &mut scratch[4..])
            .map_err(|err| Error::Compression(err.to_string()))?;
        let size_header = (raw.len() as u32).to_le_bytes();
        scratch[..4].copy_from_slice(&size_header);
        scratch.truncate(4 + written);

        if scratch.len() >= raw.len() {
            return Err(Error::Compression(format!(
                "compressed size {} not below source size {}",
                scratch.len(),
                raw.len()
            )));
        }

        let saved = raw.len() - scratch.len();
        *payload = Payload::Compressed(scratch.clone());
        self.flags.fetch_and(
            !(FLAG_UNCOMPRESSED | FLAG_MARKED_FOR_COMPRESSION),
            Ordering::AcqRel,
        );
        Ok(saved)
    }
}
