pub mod bootstrap;
pub mod comm;
pub mod config;
pub mod device;
pub mod error;
pub mod handle;
mod kernel;
pub mod launch;
pub mod memory;
pub mod select;
pub mod sync;
pub mod topology;
pub mod types;

pub use bootstrap::bootstrap_local;
pub use comm::IntraNodeComm;
pub use config::IntraNodeConfig;
pub use device::{DeviceRuntime, HostRuntime};
pub use error::{ErrorKind, IntraNodeError, Result};
pub use handle::ReduceHandle;
pub use launch::LaunchPlan;
pub use memory::DeviceBuffer;
pub use select::{select_algorithm, select_algorithm_within};
pub use topology::{HcmPeers, LinkMatrix, Topology, detect_topology, fully_connected_links};
pub use types::{AllReduceAlgo, DataType, MAX_DEVICES, Rank, TensorDesc};
