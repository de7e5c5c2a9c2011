//! Ordered hand-off of in-flight analyses from capture to delivery.
//!
//! The capture loop pushes a [`PendingAnalysis`] for every submitted frame:
//! a handle to a task that is already running, not its result. The delivery
//! loop pops handles in FIFO order and resolves each against its deadline, so
//! results come out in capture order no matter which task finishes first.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flume::{Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::trace;

use crate::capture::Frame;
use crate::error::{AnalysisError, BoxError, GrabberError, Result};

/// Finalized analysis of one frame.
///
/// Exactly one of `result`, `timed_out` and `failure` is set.
#[derive(Debug)]
pub struct AnalysisOutcome<R> {
    pub frame: Arc<Frame>,
    pub result: Option<R>,
    pub timed_out: bool,
    pub failure: Option<AnalysisError>,
}

impl<R> AnalysisOutcome<R> {
    fn completed(frame: Arc<Frame>, result: R) -> Self {
        Self {
            frame,
            result: Some(result),
            timed_out: false,
            failure: None,
        }
    }

    fn timed_out(frame: Arc<Frame>) -> Self {
        Self {
            frame,
            result: None,
            timed_out: true,
            failure: None,
        }
    }

    fn failed(frame: Arc<Frame>, failure: AnalysisError) -> Self {
        Self {
            frame,
            result: None,
            timed_out: false,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }
}

/// An analysis task that has been started but not yet collected.
pub struct PendingAnalysis<R> {
    frame: Arc<Frame>,
    task: JoinHandle<Result<R, BoxError>>,
    deadline: Instant,
}

impl<R> PendingAnalysis<R> {
    pub fn new(frame: Arc<Frame>, task: JoinHandle<Result<R, BoxError>>, timeout: Duration) -> Self {
        Self {
            frame,
            task,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence()
    }

    /// Wait for the task up to its deadline. On timeout the task is aborted;
    /// that only takes effect at its next `.await`, and work it handed off
    /// elsewhere keeps running.
    pub async fn resolve(self) -> AnalysisOutcome<R> {
        let Self {
            frame,
            mut task,
            deadline,
        } = self;

        match timeout_at(deadline, &mut task).await {
            Ok(Ok(Ok(result))) => AnalysisOutcome::completed(frame, result),
            Ok(Ok(Err(e))) => AnalysisOutcome::failed(frame, AnalysisError::Failed(e)),
            Ok(Err(join_err)) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                AnalysisOutcome::failed(frame, AnalysisError::Panicked(message))
            }
            Ok(Err(_)) => AnalysisOutcome::failed(frame, AnalysisError::Cancelled),
            Err(_elapsed) => {
                task.abort();
                AnalysisOutcome::timed_out(frame)
            }
        }
    }
}

/// Producer side of the analysis queue.
///
/// Unbounded: capture is paced by the frame timer, not by queue depth.
/// Closing drops the sender; the consumer then drains what is left.
pub struct AnalysisQueue<R> {
    tx: Mutex<Option<Sender<PendingAnalysis<R>>>>,
}

/// Consumer side of the analysis queue.
pub struct AnalysisQueueReceiver<R> {
    rx: Receiver<PendingAnalysis<R>>,
}

pub fn analysis_queue<R>() -> (AnalysisQueue<R>, AnalysisQueueReceiver<R>) {
    let (tx, rx) = flume::unbounded();
    (
        AnalysisQueue {
            tx: Mutex::new(Some(tx)),
        },
        AnalysisQueueReceiver { rx },
    )
}

impl<R> AnalysisQueue<R> {
    pub fn push(&self, pending: PendingAnalysis<R>) -> Result<()> {
        let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.as_ref().ok_or(GrabberError::QueueClosed)?;
        let sequence = pending.sequence();
        tx.send(pending).map_err(|_| GrabberError::QueueClosed)?;
        trace!(sequence, depth = tx.len(), "Queued analysis");
        Ok(())
    }

    /// Refuse further additions. Idempotent.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }
}

impl<R> AnalysisQueueReceiver<R> {
    /// Next pending analysis in submission order. Waits while the queue is
    /// empty and open; `None` once it is closed and drained.
    pub async fn next(&self) -> Option<PendingAnalysis<R>> {
        self.rx.recv_async().await.ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
