use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use half::bf16;

use crate::config::IntraNodeConfig;
use crate::device::DeviceRuntime;
use crate::error::{IntraNodeError, Result};
use crate::handle::{LaunchQueue, ReduceHandle};
use crate::kernel::{self, KernelArgs};
use crate::launch::LaunchPlan;
use crate::memory::{DeviceBuffer, OutputView};
use crate::select;
use crate::sync::{PeerSyncState, agree_on_shape};
use crate::topology::{HCM_WORLD_SIZE, HcmPeers, Topology};
use crate::types::{AllReduceAlgo, DataType, MAX_DEVICES, Rank, TensorDesc};

/// One rank's view of an intra-node all-reduce group.
///
/// Every rank of the group holds its own `IntraNodeComm` over the same set of
/// peer sync states and registered buffers, and all ranks must issue the
/// same sequence of operations with the same sizes and algorithms.
pub struct IntraNodeComm {
    rank: Rank,
    world_size: u32,
    topology: Topology,
    config: IntraNodeConfig,
    states: Vec<Arc<PeerSyncState>>,
    buffers: Vec<Arc<DeviceBuffer>>,
    runtime: Arc<dyn DeviceRuntime>,
    queue: LaunchQueue,
    completed: AtomicU64,
}

impl IntraNodeComm {
    /// Assemble a rank's communicator from already-registered peer state.
    ///
    /// `states[r]` and `buffers[r]` belong to rank r; every buffer must have
    /// the same capacity.
    pub fn new(
        rank: Rank,
        topology: Topology,
        states: Vec<Arc<PeerSyncState>>,
        buffers: Vec<Arc<DeviceBuffer>>,
        runtime: Arc<dyn DeviceRuntime>,
        config: IntraNodeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let world = states.len();
        if world == 0 || world > MAX_DEVICES {
            return Err(IntraNodeError::InvalidWorldSize {
                world_size: world as u32,
                reason: "must be between 1 and 8",
            });
        }
        if rank as usize >= world {
            return Err(IntraNodeError::InvalidRank {
                rank,
                world_size: world as u32,
            });
        }
        if buffers.len() != world {
            return Err(IntraNodeError::Config {
                reason: format!("{} buffers registered for {world} ranks", buffers.len()),
            });
        }
        for (r, state) in states.iter().enumerate() {
            if state.rank() as usize != r {
                return Err(IntraNodeError::Config {
                    reason: format!("sync state of rank {} registered at index {r}", state.rank()),
                });
            }
        }
        let capacity = buffers[0].capacity_bytes();
        for (r, buf) in buffers.iter().enumerate() {
            if buf.device() as usize != r {
                return Err(IntraNodeError::Config {
                    reason: format!("buffer on device {} registered at index {r}", buf.device()),
                });
            }
            if buf.capacity_bytes() != capacity {
                return Err(IntraNodeError::Config {
                    reason: format!(
                        "buffer {r} holds {} bytes, buffer 0 holds {capacity}",
                        buf.capacity_bytes()
                    ),
                });
            }
        }
        if topology == Topology::HybridCubeMesh
            && (world != HCM_WORLD_SIZE || states.iter().any(|s| s.hcm_peers().is_none()))
        {
            return Err(IntraNodeError::Topology {
                reason: format!("hybrid cube mesh needs 8 ranks with resolved peers, got {world}"),
            });
        }

        Ok(Self {
            rank,
            world_size: world as u32,
            topology,
            config,
            states,
            buffers,
            runtime,
            queue: LaunchQueue::start(rank)?,
            completed: AtomicU64::new(0),
        })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn config(&self) -> &IntraNodeConfig {
        &self.config
    }

    /// Registered buffer capacity per rank, in bytes.
    pub fn capacity_bytes(&self) -> usize {
        self.buffers[self.rank as usize].capacity_bytes()
    }

    /// Number of all-reduces this rank has completed.
    pub fn usage_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// This rank's mesh slots and relay, when the group is a hybrid cube mesh.
    pub fn hcm_peers(&self) -> Option<&HcmPeers> {
        self.states[self.rank as usize].hcm_peers()
    }

    /// Pick the algorithm for `desc` on this group, or `AllReduceAlgo::None`
    /// when the caller should use its fallback collective.
    pub fn select_algorithm(&self, desc: &TensorDesc) -> Result<AllReduceAlgo> {
        if !self.config.enabled {
            return Ok(AllReduceAlgo::None);
        }
        let algo = select::select_algorithm_within(
            desc,
            self.topology,
            self.world_size as usize,
            self.capacity_bytes(),
        )?;
        if algo == AllReduceAlgo::None {
            tracing::warn!(
                rank = self.rank,
                dtype = %desc.dtype,
                numel = desc.numel,
                "no intra-node algorithm applies, caller must fall back"
            );
        } else {
            tracing::debug!(
                rank = self.rank,
                dtype = %desc.dtype,
                numel = desc.numel,
                %algo,
                "selected all-reduce algorithm"
            );
        }
        Ok(algo)
    }

    /// Sum `data` elementwise across all ranks in place using `algo`.
    ///
    /// Blocks until this rank's reduction has completed. Every rank of the
    /// group must call this with the same length and algorithm. Await every
    /// outstanding [`ReduceHandle`] first: a blocking call does not go
    /// through the launch queue.
    pub fn all_reduce(&self, desc: &TensorDesc, data: &mut [bf16], algo: AllReduceAlgo) -> Result<()> {
        let plan = self.validate(desc, data.len(), algo)?;
        let timeout = self.config.acquire_timeout;
        if self.config.verify_shape {
            agree_on_shape(self.states.as_slice(), self.rank, plan.numel_aligned, algo, timeout)?;
        }
        if plan.numel == 0 {
            return Ok(());
        }

        let rank = self.rank as usize;
        self.runtime.copy_to_device(data, &self.buffers[rank], 0)?;

        tracing::debug!(
            rank,
            %algo,
            numel = plan.numel,
            numel_aligned = plan.numel_aligned,
            blocks = plan.blocks,
            threads = plan.threads,
            "launching all-reduce"
        );

        let args = KernelArgs {
            rank,
            world_size: self.world_size as usize,
            plan,
            states: &self.states,
            buffers: &self.buffers,
            output: OutputView::new(data),
            acquire_timeout: timeout,
        };
        kernel::launch(self.runtime.as_ref(), algo, &args)?;

        let count = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(rank, %algo, count, "all-reduce complete");
        Ok(())
    }

    /// Select and run in one step. Returns `Ok(false)` without touching
    /// `data` when no algorithm applies.
    pub fn try_all_reduce(&self, desc: &TensorDesc, data: &mut [bf16]) -> Result<bool> {
        match self.select_algorithm(desc)? {
            AllReduceAlgo::None => Ok(false),
            algo => {
                self.all_reduce(desc, data, algo)?;
                Ok(true)
            }
        }
    }

    /// Queue [`all_reduce`](Self::all_reduce) on this rank's launch stream,
    /// taking ownership of `data` and handing it back reduced.
    ///
    /// Launches run one at a time in issue order, so several reductions may
    /// be outstanding before any of them is awaited.
    pub fn all_reduce_async(
        self: &Arc<Self>,
        desc: TensorDesc,
        mut data: Vec<bf16>,
        algo: AllReduceAlgo,
    ) -> ReduceHandle {
        let comm = Arc::clone(self);
        self.queue.submit(move || {
            comm.all_reduce(&desc, &mut data, algo)?;
            Ok(data)
        })
    }

    fn validate(&self, desc: &TensorDesc, len: usize, algo: AllReduceAlgo) -> Result<LaunchPlan> {
        if algo == AllReduceAlgo::None {
            return Err(IntraNodeError::NoAlgorithm);
        }
        if desc.dtype != DataType::BF16 {
            return Err(IntraNodeError::UnsupportedDType {
                dtype: desc.dtype,
                op: "all_reduce",
            });
        }
        if !desc.contiguous {
            return Err(IntraNodeError::NonContiguous);
        }
        if desc.device != self.rank {
            return Err(IntraNodeError::WrongDevice {
                expected: self.rank,
                actual: desc.device,
            });
        }
        if len != desc.numel {
            return Err(IntraNodeError::BufferSizeMismatch {
                expected: desc.numel,
                actual: len,
            });
        }
        match (algo, self.topology) {
            (AllReduceAlgo::MeshRelay, Topology::FullyConnected) => {
                return Err(IntraNodeError::AlgorithmMismatch {
                    algo: algo.name(),
                    requirement: "a hybrid cube mesh topology",
                });
            }
            (AllReduceAlgo::SmallBuffer | AllReduceAlgo::Sharded, Topology::HybridCubeMesh) => {
                return Err(IntraNodeError::AlgorithmMismatch {
                    algo: algo.name(),
                    requirement: "a fully connected topology",
                });
            }
            _ => {}
        }

        let plan = LaunchPlan::new(
            desc.numel,
            algo,
            self.world_size as usize,
            self.config.max_blocks,
        )?;
        // Mesh relay also needs an equally sized scratch half.
        let halves = if algo == AllReduceAlgo::MeshRelay { 2 } else { 1 };
        let required = plan
            .numel_aligned
            .checked_mul(std::mem::size_of::<bf16>() * halves)
            .ok_or(IntraNodeError::SizeOverflow { numel: desc.numel })?;
        if required > self.capacity_bytes() {
            return Err(IntraNodeError::CapacityExceeded {
                required,
                capacity: self.capacity_bytes(),
            });
        }
        Ok(plan)
    }
}

impl std::fmt::Debug for IntraNodeComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntraNodeComm")
            .field("rank", &self.rank)
            .field("world_size", &self.world_size)
            .field("topology", &self.topology)
            .field("capacity_bytes", &self.capacity_bytes())
            .field("usage_count", &self.usage_count())
            .finish()
    }
}
