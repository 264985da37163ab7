//! Link-matrix interpretation: which devices are directly connected, and
//! how a 4-link hybrid cube mesh splits into mesh slots and a relay peer.

use crate::error::{IntraNodeError, Result};
use crate::types::{MAX_DEVICES, Rank};

/// Pairwise link weights between devices; nonzero means a direct link.
pub type LinkMatrix = [[u32; MAX_DEVICES]; MAX_DEVICES];

/// Direct links a rank must have in a hybrid cube mesh.
pub const HCM_LINKS: usize = 4;

/// Ranks in a hybrid cube mesh.
pub const HCM_WORLD_SIZE: usize = 8;

/// How the devices of a group are wired together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Topology {
    /// Every rank reaches every other rank over a direct link.
    FullyConnected = 0,
    /// Eight ranks, each with exactly four direct links.
    HybridCubeMesh = 1,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::FullyConnected => f.write_str("fully_connected"),
            Topology::HybridCubeMesh => f.write_str("hybrid_cube_mesh"),
        }
    }
}

impl TryFrom<u8> for Topology {
    type Error = IntraNodeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Topology::FullyConnected),
            1 => Ok(Topology::HybridCubeMesh),
            _ => Err(IntraNodeError::UnknownTopology { value }),
        }
    }
}

/// One rank's row of the hybrid cube mesh mapping.
///
/// `mesh[k]` is symmetric: if rank X's slot k holds Y, Y's slot k holds X.
/// The relay shares no direct neighbor with this rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HcmPeers {
    pub mesh: [Rank; 3],
    pub relay: Rank,
}

impl HcmPeers {
    /// Every direct neighbor: the three mesh slots followed by the relay.
    pub fn all(&self) -> [Rank; HCM_LINKS] {
        [self.mesh[0], self.mesh[1], self.mesh[2], self.relay]
    }
}

/// Full mesh mapping, indexed by rank.
pub type HybridCubeMesh = [HcmPeers; HCM_WORLD_SIZE];

/// Link matrix with every pair among the first `world_size` devices connected.
pub fn fully_connected_links(world_size: usize) -> LinkMatrix {
    let mut links = [[0; MAX_DEVICES]; MAX_DEVICES];
    for (i, row) in links.iter_mut().enumerate().take(world_size) {
        for (j, w) in row.iter_mut().enumerate().take(world_size) {
            if i != j {
                *w = 1;
            }
        }
    }
    links
}

fn neighbor_masks(links: &LinkMatrix) -> Result<[u16; MAX_DEVICES]> {
    let mut masks = [0u16; MAX_DEVICES];
    for i in 0..MAX_DEVICES {
        for j in 0..MAX_DEVICES {
            if i == j {
                continue;
            }
            let there = links[i][j] > 0;
            if there != (links[j][i] > 0) {
                return Err(IntraNodeError::Topology {
                    reason: format!("link {i}->{j} is not mirrored by {j}->{i}"),
                });
            }
            if there {
                masks[i] |= 1 << j;
            }
        }
    }
    Ok(masks)
}

fn ranks_in(mask: u16) -> impl Iterator<Item = usize> {
    (0..MAX_DEVICES).filter(move |j| mask & (1 << j) != 0)
}

/// Split every rank's four links into three symmetric mesh slots and one
/// relay.
///
/// Fails if any rank lacks exactly four links, has no unique
/// neighbor-disjoint peer, or if the mesh slots cannot all be paired.
pub fn resolve_hybrid_cube_mesh(links: &LinkMatrix) -> Result<HybridCubeMesh> {
    let masks = neighbor_masks(links)?;
    let mut slots: [[Option<usize>; HCM_LINKS]; HCM_WORLD_SIZE] = [[None; HCM_LINKS]; HCM_WORLD_SIZE];
    let mut available = [0u16; HCM_WORLD_SIZE];

    for i in 0..HCM_WORLD_SIZE {
        let links_of_i = masks[i].count_ones() as usize;
        if links_of_i != HCM_LINKS {
            return Err(IntraNodeError::Topology {
                reason: format!("rank {i} has {links_of_i} links, expected {HCM_LINKS}"),
            });
        }

        let mut relays = ranks_in(masks[i]).filter(|&j| masks[i] & masks[j] == 0);
        let relay = match (relays.next(), relays.next()) {
            (Some(j), None) => j,
            (None, _) => {
                return Err(IntraNodeError::Topology {
                    reason: format!("rank {i} has no neighbor-disjoint peer"),
                });
            }
            (Some(_), Some(_)) => {
                return Err(IntraNodeError::Topology {
                    reason: format!("rank {i} has more than one neighbor-disjoint peer"),
                });
            }
        };
        slots[i][3] = Some(relay);
        available[i] = masks[i] & !(1 << relay);
    }

    for i in 0..HCM_WORLD_SIZE {
        for k in 0..3 {
            if slots[i][k].is_some() {
                continue;
            }
            let peer = ranks_in(available[i])
                .find(|&j| slots[j][k].is_none())
                .ok_or_else(|| IntraNodeError::Topology {
                    reason: format!("cannot pair mesh slot {k} of rank {i}"),
                })?;
            slots[i][k] = Some(peer);
            slots[peer][k] = Some(i);
            available[i] &= !(1 << peer);
            available[peer] &= !(1 << i);
        }
    }

    let mut hcm = [HcmPeers {
        mesh: [0; 3],
        relay: 0,
    }; HCM_WORLD_SIZE];
    for (i, row) in slots.iter().enumerate() {
        let mut filled = [0 as Rank; HCM_LINKS];
        for (k, slot) in row.iter().enumerate() {
            filled[k] = slot.ok_or_else(|| IntraNodeError::Topology {
                reason: format!("slot {k} of rank {i} left unresolved"),
            })? as Rank;
        }
        hcm[i] = HcmPeers {
            mesh: [filled[0], filled[1], filled[2]],
            relay: filled[3],
        };
    }
    Ok(hcm)
}

/// Classify the first `world_size` devices of `links`.
///
/// Returns `None` when the wiring is neither fully connected nor a valid
/// 8-rank hybrid cube mesh; the engine cannot serve such a group.
pub fn detect_topology(links: &LinkMatrix, world_size: usize) -> Option<Topology> {
    if world_size == 0 || world_size > MAX_DEVICES {
        return None;
    }
    let fully_connected = (0..world_size)
        .all(|i| (0..world_size).all(|j| i == j || links[i][j] > 0));
    if fully_connected {
        return Some(Topology::FullyConnected);
    }
    if world_size == HCM_WORLD_SIZE && resolve_hybrid_cube_mesh(links).is_ok() {
        return Some(Topology::HybridCubeMesh);
    }
    None
}
