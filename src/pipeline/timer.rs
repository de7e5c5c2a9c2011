//! Periodic frame-grab timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::trace;

use crate::pipeline::signal::TickSignal;
use crate::pipeline::stats::GrabberStats;

/// Arms a [`TickSignal`] every `period`, starting immediately. The task does
/// nothing else: no I/O, no frame work.
pub struct FrameTimer {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl FrameTimer {
    pub fn spawn(
        rt: &Handle,
        period: Duration,
        signal: Arc<TickSignal>,
        stats: Arc<GrabberStats>,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel();

        let task = rt.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut iteration: u64 = 0;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if signal.arm() {
                            stats.record_missed_tick();
                            trace!(tick = iteration.saturating_sub(1), "Timer: missed frame-grab");
                        }
                        trace!(tick = iteration, "Timer: grab frame");
                        iteration += 1;
                    }
                }
            }
            trace!("Timer: stopped after {} ticks", iteration);
        });

        Self { shutdown, task }
    }

    /// Stop the timer and wait until its task has fully exited.
    ///
    /// Must be called from outside the runtime's worker threads (the capture
    /// loop runs on a blocking thread).
    pub fn stop_blocking(self, rt: &Handle) {
        let _ = self.shutdown.send(());
        let _ = rt.block_on(self.task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ticks_arm_signal_and_count_misses() {
        let signal = Arc::new(TickSignal::new());
        let stats = Arc::new(GrabberStats::default());
        let rt = Handle::current();

        let timer = FrameTimer::spawn(&rt, Duration::from_millis(5), signal.clone(), stats.clone());

        // Nobody consumes the signal, so every tick after the first is a miss.
        tokio::time::sleep(Duration::from_millis(60)).await;
        tokio::task::spawn_blocking(move || timer.stop_blocking(&rt))
            .await
            .unwrap();

        assert!(stats.snapshot().missed_ticks >= 3);
        assert!(signal.arm(), "signal should still hold the last tick");
    }
}
