//! In-process group setup: allocate every rank's sync state and registered
//! buffer, then hand out one communicator per rank.

use std::sync::Arc;

use crate::comm::IntraNodeComm;
use crate::config::IntraNodeConfig;
use crate::device::DeviceRuntime;
use crate::error::{IntraNodeError, Result};
use crate::memory::DeviceBuffer;
use crate::sync::{PeerSyncState, init_peer_state};
use crate::topology::{LinkMatrix, Topology, detect_topology};
use crate::types::{MAX_DEVICES, Rank};

/// Create a fully wired group of `world_size` communicators sharing
/// `runtime`.
///
/// `topology` must agree with what `links` describes; mesh slots and relays
/// are resolved from `links` once here.
pub fn bootstrap_local(
    world_size: usize,
    topology: Topology,
    links: &LinkMatrix,
    config: IntraNodeConfig,
    runtime: Arc<dyn DeviceRuntime>,
) -> Result<Vec<IntraNodeComm>> {
    config.validate()?;
    if world_size == 0 || world_size > MAX_DEVICES {
        return Err(IntraNodeError::InvalidWorldSize {
            world_size: world_size as u32,
            reason: "must be between 1 and 8",
        });
    }
    match detect_topology(links, world_size) {
        Some(found) if found == topology => {}
        found => {
            return Err(IntraNodeError::Topology {
                reason: format!(
                    "links describe {}, requested {topology}",
                    found.map_or_else(|| "an unsupported wiring".to_string(), |t| t.to_string())
                ),
            });
        }
    }

    let states: Vec<Arc<PeerSyncState>> = (0..world_size)
        .map(|r| init_peer_state(topology, links, r as Rank).map(Arc::new))
        .collect::<Result<_>>()?;
    let buffers: Vec<Arc<DeviceBuffer>> = (0..world_size)
        .map(|r| Arc::new(DeviceBuffer::zeroed(r as u32, config.buffer_bytes)))
        .collect();

    for state in &states {
        if let Some(peers) = state.hcm_peers() {
            tracing::info!(
                rank = state.rank(),
                mesh = ?peers.mesh,
                relay = peers.relay,
                "resolved hybrid cube mesh peers"
            );
        }
    }
    tracing::info!(
        world_size,
        %topology,
        buffer_bytes = config.buffer_bytes,
        max_blocks = config.max_blocks,
        "intra-node group ready"
    );

    (0..world_size)
        .map(|r| {
            IntraNodeComm::new(
                r as Rank,
                topology,
                states.clone(),
                buffers.clone(),
                Arc::clone(&runtime),
                config.clone(),
            )
        })
        .collect()
}
