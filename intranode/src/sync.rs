//! Cross-device signaling.
//!
//! Peers never share a lock. Each rank owns a [`PeerSyncState`] that every
//! other rank can reach with direct loads and stores; it holds one counter per
//! (block, peer) pair for each barrier phase. A peer announces "my writes are
//! published" with [`release`] on the counter keyed by its own rank in the
//! target's state, and the target consumes exactly one such announcement with
//! [`acquire`]. Once `acquire` returns, everything the releasing peer wrote
//! before its `release` is visible to the acquiring block.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{IntraNodeError, Result};
use crate::launch::MAX_ALL_REDUCE_BLOCKS;
use crate::topology::{HCM_WORLD_SIZE, HcmPeers, LinkMatrix, Topology, resolve_hybrid_cube_mesh};
use crate::types::{AllReduceAlgo, MAX_DEVICES, Rank};

/// Spins between deadline checks and scheduler yields in [`acquire_until`].
const SPINS_PER_YIELD: u32 = 256;

/// A counter in device memory operated on at system scope, so that
/// increments from one device are observed by every other device.
pub trait SystemAtomic: Send + Sync {
    /// Atomic add visible to all devices; orders every earlier store of the
    /// caller before the increment.
    fn add_system(&self, v: u32) -> u32;

    /// Uncached read of the current value.
    fn load_volatile(&self) -> u32;

    /// Replace `current` with `new` if unchanged. On success, every store
    /// ordered before the increments being consumed is visible to the caller.
    fn compare_exchange_system(&self, current: u32, new: u32) -> bool;
}

impl SystemAtomic for AtomicU32 {
    #[inline]
    fn add_system(&self, v: u32) -> u32 {
        self.fetch_add(v, Ordering::Release)
    }

    #[inline]
    fn load_volatile(&self) -> u32 {
        self.load(Ordering::Relaxed)
    }

    #[inline]
    fn compare_exchange_system(&self, current: u32, new: u32) -> bool {
        self.compare_exchange(current, new, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

/// Signal one pending arrival on `signal`.
#[inline]
pub fn release<A: SystemAtomic + ?Sized>(signal: &A) {
    signal.add_system(1);
}

/// Wait for an arrival on `signal` and consume exactly one.
///
/// Spins without bound; a peer that never releases blocks the caller
/// forever.
pub fn acquire<A: SystemAtomic + ?Sized>(signal: &A) {
    let mut spins = 0u32;
    while !try_consume(signal) {
        spin(&mut spins);
    }
}

/// [`acquire`] with a diagnostic deadline. Returns `false` if the deadline
/// passed before an arrival could be consumed.
pub fn acquire_until<A: SystemAtomic + ?Sized>(signal: &A, deadline: Option<Instant>) -> bool {
    let mut spins = 0u32;
    loop {
        if try_consume(signal) {
            return true;
        }
        if spins % SPINS_PER_YIELD == SPINS_PER_YIELD - 1
            && let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            return false;
        }
        spin(&mut spins);
    }
}

#[inline]
fn try_consume<A: SystemAtomic + ?Sized>(signal: &A) -> bool {
    let seen = signal.load_volatile();
    seen != 0 && signal.compare_exchange_system(seen, seen - 1)
}

#[inline]
fn spin(spins: &mut u32) {
    *spins = spins.wrapping_add(1);
    if *spins % SPINS_PER_YIELD == 0 {
        // Simulated devices share host cores with their peers.
        std::thread::yield_now();
    } else {
        std::hint::spin_loop();
    }
}

/// Barrier phase selecting which counter set a round uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    First = 0,
    Second = 1,
}

/// Counters indexed by (block, peer), bounded by the compile-time maxima.
pub struct SignalSet {
    words: Box<[AtomicU32]>,
}

impl SignalSet {
    fn zeroed() -> Self {
        Self {
            words: (0..MAX_ALL_REDUCE_BLOCKS * MAX_DEVICES)
                .map(|_| AtomicU32::new(0))
                .collect(),
        }
    }

    /// Counter a `peer` releases into for `block`.
    pub fn slot(&self, block: usize, peer: usize) -> Result<&AtomicU32> {
        if block >= MAX_ALL_REDUCE_BLOCKS || peer >= MAX_DEVICES {
            return Err(IntraNodeError::Config {
                reason: format!(
                    "signal slot (block {block}, peer {peer}) outside \
                     {MAX_ALL_REDUCE_BLOCKS} blocks x {MAX_DEVICES} devices"
                ),
            });
        }
        Ok(&self.words[block * MAX_DEVICES + peer])
    }

    fn is_quiescent(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Relaxed) == 0)
    }
}

/// Per-rank synchronization state resident in device memory.
pub struct PeerSyncState {
    rank: Rank,
    phases: [SignalSet; 2],
    shape_signals: Box<[AtomicU32]>,
    announced_numel: AtomicU64,
    announced_algo: AtomicU8,
    hcm: Option<HcmPeers>,
}

impl PeerSyncState {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn signals(&self, phase: Phase) -> &SignalSet {
        &self.phases[phase as usize]
    }

    /// This rank's mesh slots and relay; set once at init.
    pub fn hcm_peers(&self) -> Option<&HcmPeers> {
        self.hcm.as_ref()
    }

    /// True when no arrival is pending in any counter.
    pub fn is_quiescent(&self) -> bool {
        self.phases.iter().all(SignalSet::is_quiescent)
            && self
                .shape_signals
                .iter()
                .all(|w| w.load(Ordering::Relaxed) == 0)
    }

    fn shape_slot(&self, peer: usize) -> Result<&AtomicU32> {
        self.shape_signals
            .get(peer)
            .ok_or_else(|| IntraNodeError::Config {
                reason: format!("shape slot {peer} outside {MAX_DEVICES} devices"),
            })
    }
}

impl std::fmt::Debug for PeerSyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSyncState")
            .field("rank", &self.rank)
            .field("hcm", &self.hcm)
            .finish()
    }
}

/// Allocate zeroed sync state for `rank`, populating mesh slots when the
/// group is a hybrid cube mesh.
pub fn init_peer_state(topology: Topology, links: &LinkMatrix, rank: Rank) -> Result<PeerSyncState> {
    if rank as usize >= MAX_DEVICES {
        return Err(IntraNodeError::InvalidRank {
            rank,
            world_size: MAX_DEVICES as u32,
        });
    }
    let hcm = match topology {
        Topology::FullyConnected => None,
        Topology::HybridCubeMesh => {
            if rank as usize >= HCM_WORLD_SIZE {
                return Err(IntraNodeError::InvalidRank {
                    rank,
                    world_size: HCM_WORLD_SIZE as u32,
                });
            }
            Some(resolve_hybrid_cube_mesh(links)?[rank as usize])
        }
    };
    Ok(PeerSyncState {
        rank,
        phases: [SignalSet::zeroed(), SignalSet::zeroed()],
        shape_signals: (0..MAX_DEVICES).map(|_| AtomicU32::new(0)).collect(),
        announced_numel: AtomicU64::new(0),
        announced_algo: AtomicU8::new(AllReduceAlgo::None as u8),
        hcm,
    })
}

/// Confirm every rank is about to launch the same algorithm over the same
/// aligned length.
///
/// Each rank publishes its length and algorithm, takes a world-wide round on
/// the shape counters, compares every published pair, then takes a second
/// round so no rank republishes before all have read. Every rank sees the
/// same set of pairs, so all of them fail together on a mismatch.
pub fn agree_on_shape<S: AsRef<PeerSyncState>>(
    states: &[S],
    rank: Rank,
    numel_aligned: usize,
    algo: AllReduceAlgo,
    timeout: Option<Duration>,
) -> Result<()> {
    let me = rank as usize;
    let own = states
        .get(me)
        .ok_or(IntraNodeError::InvalidRank {
            rank,
            world_size: states.len() as u32,
        })?
        .as_ref();
    own.announced_numel
        .store(numel_aligned as u64, Ordering::Relaxed);
    own.announced_algo.store(algo as u8, Ordering::Relaxed);

    shape_round(states, me, timeout)?;
    let mismatch = states.iter().enumerate().find_map(|(peer, state)| {
        let state = state.as_ref();
        let remote = state.announced_numel.load(Ordering::Relaxed) as usize;
        let remote_algo = state.announced_algo.load(Ordering::Relaxed);
        if remote != numel_aligned {
            Some(IntraNodeError::ShapeMismatch {
                rank,
                peer: peer as Rank,
                local: numel_aligned,
                remote,
            })
        } else if remote_algo != algo as u8 {
            Some(IntraNodeError::AlgorithmDisagreement {
                rank,
                peer: peer as Rank,
                local: algo,
                remote: AllReduceAlgo::try_from(remote_algo).unwrap_or(AllReduceAlgo::None),
            })
        } else {
            None
        }
    });
    shape_round(states, me, timeout)?;

    match mismatch {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn shape_round<S: AsRef<PeerSyncState>>(
    states: &[S],
    me: usize,
    timeout: Option<Duration>,
) -> Result<()> {
    for state in states {
        release(state.as_ref().shape_slot(me)?);
    }
    let deadline = timeout.map(|t| Instant::now() + t);
    let own = states[me].as_ref();
    for peer in 0..states.len() {
        if !acquire_until(own.shape_slot(peer)?, deadline) {
            tracing::warn!(rank = me, peer, "shape agreement timed out");
            return Err(IntraNodeError::AcquireTimeout {
                rank: me as Rank,
                peer: peer as Rank,
                block: 0,
                timeout_ms: timeout.map_or(0, |t| t.as_millis() as u64),
            });
        }
    }
    Ok(())
}
