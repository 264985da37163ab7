//! Alignment and launch geometry shared by all reduction kernels.

use crate::error::{IntraNodeError, Result};
use crate::types::AllReduceAlgo;

/// Bytes one worker moves per vectorized access.
pub const BYTES_PER_THREAD: usize = 16;
pub const WARP_SIZE: usize = 32;
pub const THREADS_PER_BLOCK: usize = 1024;

/// Compile-time ceiling on blocks per launch; sync counters are allocated
/// per block up to this bound.
pub const MAX_ALL_REDUCE_BLOCKS: usize = 24;

/// bf16 elements per vectorized access.
pub const NUMEL_PER_THREAD: usize = BYTES_PER_THREAD / 2;

/// Vectorization unit: elements covered by one warp-wide access.
pub const NUMEL_PER_WARP: usize = NUMEL_PER_THREAD * WARP_SIZE;

/// Round `n` up to the next multiple of `align`, or `None` on overflow or a
/// zero `align`.
pub const fn align_up(n: usize, align: usize) -> Option<usize> {
    n.checked_next_multiple_of(align)
}

/// Multiplier applied to the vectorization unit when padding for `algo`.
///
/// Sharded pads so the buffer splits into `world_size` equal shards.
pub fn alignment_factor(algo: AllReduceAlgo, world_size: usize) -> usize {
    match algo {
        AllReduceAlgo::Sharded => world_size,
        _ => 1,
    }
}

/// Padded element count for `algo`.
pub fn aligned_numel(numel: usize, algo: AllReduceAlgo, world_size: usize) -> Option<usize> {
    align_up(numel, NUMEL_PER_WARP * alignment_factor(algo, world_size))
}

/// Launch geometry of one kernel on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Caller's element count; nothing at or past this index is written to
    /// the output.
    pub numel: usize,
    pub numel_aligned: usize,
    pub blocks: usize,
    pub threads: usize,
}

impl LaunchPlan {
    pub fn new(
        numel: usize,
        algo: AllReduceAlgo,
        world_size: usize,
        max_blocks: usize,
    ) -> Result<Self> {
        if algo == AllReduceAlgo::None {
            return Err(IntraNodeError::NoAlgorithm);
        }
        if world_size == 0 {
            return Err(IntraNodeError::InvalidWorldSize {
                world_size: 0,
                reason: "at least one rank is required",
            });
        }
        if max_blocks == 0 || max_blocks > MAX_ALL_REDUCE_BLOCKS {
            return Err(IntraNodeError::Config {
                reason: format!("max_blocks {max_blocks} outside 1..={MAX_ALL_REDUCE_BLOCKS}"),
            });
        }

        // The padded byte size must be addressable as well.
        let numel_aligned = aligned_numel(numel, algo, world_size)
            .filter(|n| n.checked_mul(BYTES_PER_THREAD / NUMEL_PER_THREAD).is_some())
            .ok_or(IntraNodeError::SizeOverflow { numel })?;
        let num_warps = numel_aligned / NUMEL_PER_WARP;
        let warps_per_block = THREADS_PER_BLOCK / WARP_SIZE;

        let (blocks, threads) = if num_warps < warps_per_block {
            (1, num_warps * WARP_SIZE)
        } else {
            ((num_warps / warps_per_block).min(max_blocks), THREADS_PER_BLOCK)
        };

        Ok(Self {
            numel,
            numel_aligned,
            blocks,
            threads,
        })
    }

    /// Number of vectorized elements one grid-wide step covers.
    pub fn stride(&self) -> usize {
        self.blocks * self.threads * NUMEL_PER_THREAD
    }

    pub fn block(&self, index: usize) -> BlockIdx {
        BlockIdx {
            index,
            grid_dim: self.blocks,
            block_dim: self.threads,
        }
    }
}

/// Coordinates of one execution block within a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIdx {
    pub index: usize,
    pub grid_dim: usize,
    pub block_dim: usize,
}

impl BlockIdx {
    /// Vector offsets below `limit` visited by this block's workers, each
    /// grid-striding from its own start.
    pub fn lane_offsets(self, limit: usize) -> impl Iterator<Item = usize> {
        let stride = self.grid_dim * self.block_dim * NUMEL_PER_THREAD;
        let base = self.block_dim * self.index;
        (0..self.block_dim).flat_map(move |lane| {
            ((base + lane) * NUMEL_PER_THREAD..limit).step_by(stride.max(1))
        })
    }
}
