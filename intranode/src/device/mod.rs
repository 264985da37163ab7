mod host;
mod runtime;

pub use host::HostRuntime;
pub use runtime::{BlockFn, DeviceRuntime};
