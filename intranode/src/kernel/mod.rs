//! Device-side reduction kernels.
//!
//! Each kernel is written per block: the runtime invokes the block body once
//! for every block of the plan, and blocks with the same index on different
//! ranks pair up through the per-block signal counters.

mod mesh_relay;
mod sharded;
mod small_buffer;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::DeviceRuntime;
use crate::error::{IntraNodeError, Result};
use crate::launch::LaunchPlan;
use crate::memory::{DeviceBuffer, OutputView};
use crate::sync::{Phase, PeerSyncState, acquire_until, release};
use crate::types::{AllReduceAlgo, Rank};

/// Everything a block needs to take part in one all-reduce.
pub(crate) struct KernelArgs<'a> {
    pub rank: usize,
    pub world_size: usize,
    pub plan: LaunchPlan,
    pub states: &'a [Arc<PeerSyncState>],
    pub buffers: &'a [Arc<DeviceBuffer>],
    pub output: OutputView<'a>,
    pub acquire_timeout: Option<Duration>,
}

impl KernelArgs<'_> {
    /// Start of the relay scratch half of every rank's buffer.
    pub fn scratch_offset(&self) -> usize {
        self.buffers[self.rank].capacity() / 2
    }

    /// Pairwise barrier between this block and the same block on `peers`.
    ///
    /// Releases to every peer before acquiring from any, so two ranks waiting
    /// on each other always make progress.
    pub fn barrier<I>(&self, block: usize, phase: Phase, peers: I) -> Result<()>
    where
        I: IntoIterator<Item = usize>,
        I::IntoIter: Clone,
    {
        let peers = peers.into_iter();
        for peer in peers.clone() {
            release(self.states[peer].signals(phase).slot(block, self.rank)?);
        }

        let deadline = self.acquire_timeout.map(|t| Instant::now() + t);
        let own = self.states[self.rank].signals(phase);
        for peer in peers {
            if !acquire_until(own.slot(block, peer)?, deadline) {
                tracing::warn!(
                    rank = self.rank,
                    peer,
                    block,
                    ?phase,
                    "peer did not signal before the acquire deadline"
                );
                return Err(IntraNodeError::AcquireTimeout {
                    rank: self.rank as Rank,
                    peer: peer as Rank,
                    block,
                    timeout_ms: self.acquire_timeout.map_or(0, |t| t.as_millis() as u64),
                });
            }
        }
        Ok(())
    }
}

/// Launch `algo` on this rank's device and wait for every block.
pub(crate) fn launch(
    runtime: &dyn DeviceRuntime,
    algo: AllReduceAlgo,
    args: &KernelArgs<'_>,
) -> Result<()> {
    let device = args.rank as u32;
    match algo {
        AllReduceAlgo::SmallBuffer => {
            runtime.launch(device, &args.plan, &|block| small_buffer::run_block(args, block))
        }
        AllReduceAlgo::Sharded => {
            runtime.launch(device, &args.plan, &|block| sharded::run_block(args, block))
        }
        AllReduceAlgo::MeshRelay => {
            runtime.launch(device, &args.plan, &|block| mesh_relay::run_block(args, block))
        }
        AllReduceAlgo::None => Err(IntraNodeError::NoAlgorithm),
    }
}
