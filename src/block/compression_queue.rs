//! Background memory-pressure regulator for voxel blocks

use crate::block::voxel_block::VoxelBlock;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the production worker runs a regulator pass.
const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Membership and watermark state. One coarse mutex guards all of it,
/// including the duration of a regulator pass; ticks are short and never on
/// the column hot path.
struct QueueInner {
    blocks: Vec<Arc<VoxelBlock>>,
    high_water_mark: usize,
    low_water_mark: usize,
}

impl QueueInner {
    /// One regulator pass.
    ///
    /// Blocks owned by no one but the queue are dropped first. If the current
    /// allocation exceeds the high water mark, eligible blocks (uncompressed,
    /// unlocked, reference count zero) are compressed in least-recently-used
    /// order until the allocation drops below the low water mark or no
    /// eligible blocks remain. A block that fails to compress stays
    /// uncompressed at its full accounted size and is skipped.
    fn tick(&mut self, scratch: &mut Vec<u8>) {
        self.blocks.retain(|block| Arc::strong_count(block) > 1);

        let mut total: usize = self
            .blocks
            .iter()
            .map(|block| block.current_byte_size())
            .sum();
        if total <= self.high_water_mark {
            return;
        }

        let mut candidates: Vec<&Arc<VoxelBlock>> = self
            .blocks
            .iter()
            .filter(|block| block.is_compression_candidate())
            .collect();
        candidates.sort_by_key(|block| block.last_touch());

        let mut compressed = 0usize;
        for block in candidates {
            if total < self.low_water_mark {
                break;
            }
            match block.try_compress(scratch) {
                Ok(saved) => {
                    total = total.saturating_sub(saved);
                    if saved > 0 {
                        compressed += 1;
                    }
                }
                Err(err) => {
                    log::debug!("leaving voxel block uncompressed: {err}");
                }
            }
        }
        if compressed > 0 {
            log::debug!(
                "compressed {compressed} voxel blocks, allocation now {total} bytes"
            );
        }
    }

    fn estimated_allocation_size(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| block.current_byte_size())
            .sum()
    }
}

/// Keeps the aggregate footprint of registered voxel blocks below a high
/// water mark by compressing least-recently-used, unretained blocks.
///
/// In production mode a single background worker runs the regulator on a
/// timer and observes shutdown at tick boundaries. In test mode no worker is
/// spawned and the caller drives [`CompressionQueue::tick`] directly; the
/// regulator contract is identical in both modes.
pub struct CompressionQueue {
    inner: Arc<Mutex<QueueInner>>,
    shutdown: Option<crossbeam_channel::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CompressionQueue {
    /// Create a queue with a background regulator worker.
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(QueueInner {
            blocks: Vec::new(),
            high_water_mark: usize::MAX,
            low_water_mark: usize::MAX,
        }));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::spawn(move || {
            let mut scratch = Vec::new();
            loop {
                match shutdown_rx.recv_timeout(TICK_INTERVAL) {
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        worker_inner.lock().unwrap().tick(&mut scratch);
                    }
                }
            }
        });
        Self {
            inner,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        }
    }

    /// Create a queue without a worker, for deterministic testing. The caller
    /// invokes [`CompressionQueue::tick`] explicitly.
    pub fn new_for_test() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                blocks: Vec::new(),
                high_water_mark: usize::MAX,
                low_water_mark: usize::MAX,
            })),
            shutdown: None,
            worker: None,
        }
    }

    /// Register a block. It begins uncompressed.
    pub fn push(&self, block: Arc<VoxelBlock>) {
        self.inner.lock().unwrap().blocks.push(block);
    }

    /// Allocation bound above which the regulator starts compressing.
    pub fn set_high_water_mark(&self, bytes: usize) {
        self.inner.lock().unwrap().high_water_mark = bytes;
    }

    /// Allocation bound the regulator compresses down to. Callers keep
    /// `low <= high`.
    pub fn set_low_water_mark(&self, bytes: usize) {
        self.inner.lock().unwrap().low_water_mark = bytes;
    }

    /// Sum of the per-block byte sizes currently held: uncompressed sizes for
    /// inflated blocks, compressed sizes for deflated ones.
    pub fn estimated_allocation_size(&self) -> usize {
        self.inner.lock().unwrap().estimated_allocation_size()
    }

    /// Run one regulator pass on the calling thread, reusing `scratch` for
    /// codec output. In production the worker calls this on a timer; tests
    /// call it directly for determinism.
    pub fn tick(&self, scratch: &mut Vec<u8>) {
        self.inner.lock().unwrap().tick(scratch);
    }

    /// Number of registered blocks still alive.
    pub fn block_count(&self) -> usize {
        self.inner.lock().unwrap().blocks.len()
    }
}

impl Default for CompressionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CompressionQueue {
    fn drop(&mut self) {
        // Wake the worker so it observes shutdown at the next tick boundary.
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
