//! Mesh-relay all-reduce for the 8-rank hybrid cube mesh.
//!
//! Each rank reaches only four peers directly. Phase one sums the rank's own
//! input with its three mesh neighbors into the scratch half of its own
//! buffer. That partial covers four ranks; the relay's partial covers the
//! other four, so phase two adds the two partials to finish the reduction.

use crate::error::{IntraNodeError, Result};
use crate::kernel::KernelArgs;
use crate::launch::BlockIdx;
use crate::memory::Bf16x8;
use crate::sync::Phase;

pub(super) fn run_block(args: &KernelArgs<'_>, block: BlockIdx) -> Result<()> {
    let rank = args.rank;
    let hcm = args.states[rank]
        .hcm_peers()
        .ok_or(IntraNodeError::AlgorithmMismatch {
            algo: "mesh_relay",
            requirement: "a resolved hybrid cube mesh",
        })?;
    let peers = hcm.all().map(|r| r as usize);
    let mesh = hcm.mesh.map(|r| r as usize);
    let relay = hcm.relay as usize;
    let scratch = args.scratch_offset();
    let own = &args.buffers[rank];

    args.barrier(block.index, Phase::First, peers)?;

    for off in block.lane_offsets(args.plan.numel_aligned) {
        let partial = Bf16x8::sum(&[
            own.load_vec(off),
            args.buffers[mesh[0]].load_vec(off),
            args.buffers[mesh[1]].load_vec(off),
            args.buffers[mesh[2]].load_vec(off),
        ]);
        own.store_vec(scratch + off, &partial);
    }

    args.barrier(block.index, Phase::Second, [relay])?;

    for off in block.lane_offsets(args.plan.numel_aligned) {
        let sum = Bf16x8::sum(&[
            own.load_local_vec(scratch + off),
            args.buffers[relay].load_vec(scratch + off),
        ]);
        args.output.store_vec(off, &sum);
    }

    // Mesh neighbors read our input and the relay reads our scratch.
    args.barrier(block.index, Phase::First, peers)
}
