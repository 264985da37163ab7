//! Sharded all-reduce.
//!
//! The aligned input splits into `world_size` equal shards and rank r owns
//! shard r. Phase one reduces the owned shard across all ranks and writes the
//! result back into every rank's buffer; phase two gathers the remaining
//! shards from their owners. Each rank reads `1/world_size` of every peer's
//! input instead of all of it, which wins once inputs outgrow the
//! small-buffer path.
//!
//! Peer buffers hold reduced data after a launch, so callers must restage
//! their input before the next one.

use crate::error::Result;
use crate::kernel::KernelArgs;
use crate::launch::BlockIdx;
use crate::memory::Bf16x8;
use crate::sync::Phase;
use crate::types::MAX_DEVICES;

pub(super) fn run_block(args: &KernelArgs<'_>, block: BlockIdx) -> Result<()> {
    let (rank, world) = (args.rank, args.world_size);
    let per_rank = args.plan.numel_aligned / world;
    let start = per_rank * rank;

    args.barrier(block.index, Phase::First, 0..world)?;

    let mut vals = [Bf16x8::ZERO; MAX_DEVICES];
    for off in block.lane_offsets(per_rank) {
        let idx = start + off;
        for step in 0..world {
            let src = (rank + step) % world;
            vals[src] = args.buffers[src].load_vec(idx);
        }
        let sum = Bf16x8::sum(&vals[..world]);
        for step in 0..world {
            let dst = (rank + step) % world;
            args.buffers[dst].store_vec(idx, &sum);
        }
        args.output.store_vec(idx, &sum);
    }

    args.barrier(block.index, Phase::Second, 0..world)?;

    for step in 1..world {
        let owner = (rank + step) % world;
        let owner_start = per_rank * owner;
        for off in block.lane_offsets(per_rank) {
            let idx = owner_start + off;
            args.output.store_vec(idx, &args.buffers[owner].load_vec(idx));
        }
    }

    // Owners of other shards may still be reading ours.
    args.barrier(block.index, Phase::First, 0..world)
}
