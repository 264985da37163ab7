//! Algorithm selection: a pure function of element format, topology, size
//! and world size.

use crate::config::DEFAULT_BUFFER_BYTES;
use crate::error::{IntraNodeError, Result};
use crate::launch::{NUMEL_PER_WARP, align_up};
use crate::topology::{HCM_WORLD_SIZE, Topology};
use crate::types::{AllReduceAlgo, DataType, MAX_DEVICES, TensorDesc};

/// Largest aligned input the small-buffer path accepts.
pub const SMALL_BUFFER_MAX_BYTES: usize = 256 * 1024; // 256 KiB

/// Largest aligned input the mesh-relay path accepts.
pub const MESH_RELAY_MAX_BYTES: usize = 256 * 1024; // 256 KiB

/// Largest aligned input the sharded path accepts.
pub const SHARDED_MAX_BYTES: usize = 10 * 1024 * 1024; // 10 MiB

/// Bytes covered by one vectorization unit of the supported format.
const UNIT_BYTES: usize = NUMEL_PER_WARP * 2;

/// Pick an algorithm assuming the default registered buffer capacity.
pub fn select_algorithm(
    desc: &TensorDesc,
    topology: Topology,
    world_size: usize,
) -> Result<AllReduceAlgo> {
    select_algorithm_within(desc, topology, world_size, DEFAULT_BUFFER_BYTES)
}

/// Pick an algorithm for buffers of `capacity_bytes` per rank.
///
/// Returns [`AllReduceAlgo::None`] whenever the engine cannot serve the
/// request and the caller must use its fallback collective. A hybrid cube
/// mesh with any world size other than 8 is a hard error.
pub fn select_algorithm_within(
    desc: &TensorDesc,
    topology: Topology,
    world_size: usize,
    capacity_bytes: usize,
) -> Result<AllReduceAlgo> {
    if desc.dtype != DataType::BF16 {
        return Ok(AllReduceAlgo::None);
    }
    if world_size == 0 || world_size > MAX_DEVICES {
        return Err(IntraNodeError::InvalidWorldSize {
            world_size: world_size as u32,
            reason: "must be between 1 and 8",
        });
    }

    // A size that overflows once padded can only go to the fallback.
    let Some(bytes) = desc.size_in_bytes() else {
        return Ok(AllReduceAlgo::None);
    };
    match topology {
        Topology::HybridCubeMesh => {
            if world_size != HCM_WORLD_SIZE {
                return Err(IntraNodeError::InvalidWorldSize {
                    world_size: world_size as u32,
                    reason: "hybrid cube mesh all-reduce needs exactly 8 ranks",
                });
            }
            // Input half plus an equally sized relay scratch half.
            if let Some(aligned) = align_up(bytes, UNIT_BYTES)
                && aligned <= MESH_RELAY_MAX_BYTES
                && aligned <= capacity_bytes / 2
            {
                return Ok(AllReduceAlgo::MeshRelay);
            }
        }
        Topology::FullyConnected => {
            if let Some(aligned) = align_up(bytes, UNIT_BYTES)
                && aligned <= SMALL_BUFFER_MAX_BYTES
                && aligned <= capacity_bytes
            {
                return Ok(AllReduceAlgo::SmallBuffer);
            }
            if let Some(aligned) = align_up(bytes, UNIT_BYTES * world_size)
                && aligned <= SHARDED_MAX_BYTES
                && aligned <= capacity_bytes
            {
                return Ok(AllReduceAlgo::Sharded);
            }
        }
    }
    Ok(AllReduceAlgo::None)
}
