use crate::device::runtime::{BlockFn, DeviceRuntime};
use crate::error::{IntraNodeError, Result};
use crate::launch::LaunchPlan;

/// DeviceRuntime that runs every block of a launch on its own scoped host
/// thread. Blocks of different ranks must be live at the same time for the
/// barrier rounds to complete, so blocks are never multiplexed onto a pool.
#[derive(Debug, Clone, Default)]
pub struct HostRuntime;

impl HostRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceRuntime for HostRuntime {
    fn launch(&self, device: u32, plan: &LaunchPlan, kernel: &BlockFn<'_>) -> Result<()> {
        if plan.blocks == 0 || plan.threads == 0 {
            return Ok(());
        }

        std::thread::scope(|s| {
            let mut handles = Vec::with_capacity(plan.blocks);
            for b in 0..plan.blocks {
                let block = plan.block(b);
                let handle = std::thread::Builder::new()
                    .name(format!("intranode-d{device}-b{b}"))
                    .spawn_scoped(s, move || kernel(block))
                    .map_err(|e| {
                        IntraNodeError::device_with_source(
                            format!("failed to launch block {b} on device {device}"),
                            e,
                        )
                    })?;
                handles.push(handle);
            }

            let mut first_err = None;
            for (b, handle) in handles.into_iter().enumerate() {
                let outcome = handle.join().unwrap_or_else(|payload| {
                    let reason = panic_message(payload.as_ref());
                    tracing::error!(device, block = b, %reason, "kernel block panicked");
                    Err(IntraNodeError::device(format!(
                        "block {b} on device {device} panicked: {reason}"
                    )))
                });
                if let Err(e) = outcome
                    && first_err.is_none()
                {
                    first_err = Some(e);
                }
            }
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
