use half::bf16;

use crate::error::Result;
use crate::launch::{BlockIdx, LaunchPlan};
use crate::memory::DeviceBuffer;

/// Body of a kernel, invoked once per execution block.
pub type BlockFn<'a> = dyn Fn(BlockIdx) -> Result<()> + Sync + 'a;

/// Executes kernels and host/device copies for the devices of one node.
///
/// - `HostRuntime` (built-in): simulates each device in-process, one OS
///   thread per block, over atomically-accessed host memory.
/// - Accelerator runtimes: map launches onto device streams (implemented
///   externally).
///
/// All ranks of a group must launch with identical block counts; the signal
/// protocol pairs blocks by index across devices.
pub trait DeviceRuntime: Send + Sync {
    /// Run `kernel` once for every block of `plan` on `device`, returning
    /// after every block has finished. The first block error is returned.
    fn launch(&self, device: u32, plan: &LaunchPlan, kernel: &BlockFn<'_>) -> Result<()>;

    /// Copy host elements into `dst` starting at element `offset`.
    ///
    /// Default implementation stores element by element through the buffer's
    /// device-visible path.
    fn copy_to_device(&self, src: &[bf16], dst: &DeviceBuffer, offset: usize) -> Result<()> {
        dst.write_from(offset, src)
    }
}
