use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use half::bf16;
use tokio::sync::{mpsc, oneshot};

use crate::error::{IntraNodeError, Result};
use crate::types::Rank;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Per-rank launch stream: submitted reductions run one at a time, in the
/// order they were issued.
///
/// Every rank pairs its n-th launch with the n-th launch of its peers, so two
/// reductions on one rank must never overlap or reorder. The worker thread
/// exits once the queue is dropped and its backlog has drained.
pub(crate) struct LaunchQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl LaunchQueue {
    pub(crate) fn start(rank: Rank) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name(format!("intranode-queue-r{rank}"))
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    // A panicking job drops its result sender; keep serving the rest.
                    if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!(rank, "all-reduce launch panicked");
                    }
                }
            })
            .map_err(|e| {
                IntraNodeError::device_with_source(
                    format!("failed to start launch queue for rank {rank}"),
                    e,
                )
            })?;
        Ok(Self { tx })
    }

    /// Enqueue `op` behind every earlier submission.
    pub(crate) fn submit(
        &self,
        op: impl FnOnce() -> Result<Vec<bf16>> + Send + 'static,
    ) -> ReduceHandle {
        let (result_tx, result_rx) = oneshot::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let job: Job = Box::new(move || {
            let result = op();
            flag.store(true, Ordering::Release);
            // The caller may have dropped its handle.
            let _ = result_tx.send(result);
        });
        if self.tx.send(job).is_err() {
            // The dropped job closes the result channel; wait() reports it.
            tracing::error!("launch queue worker is gone, reduction dropped");
        }
        ReduceHandle {
            result: result_rx,
            finished,
        }
    }
}

/// A handle to an all-reduce queued on its communicator's launch stream.
///
/// Call `wait()` to collect the reduced buffer, or check `is_finished()` to
/// poll. Dropping the handle does not cancel the launch; it still runs to
/// completion, since peer ranks are waiting on its signals.
pub struct ReduceHandle {
    result: oneshot::Receiver<Result<Vec<bf16>>>,
    finished: Arc<AtomicBool>,
}

impl ReduceHandle {
    /// Wait for the all-reduce to complete and return the reduced data.
    pub async fn wait(self) -> Result<Vec<bf16>> {
        self.result.await.map_err(|e| {
            IntraNodeError::device_with_source("all-reduce launch did not complete", e)
        })?
    }

    /// Check if the all-reduce has finished (non-blocking).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}
