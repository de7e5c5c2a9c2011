//! Pipeline counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use metrics::counter;

#[derive(Default)]
struct Counters {
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    missed_ticks: AtomicU64,
    frames_submitted: AtomicU64,
    results_delivered: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

/// Counters shared by the timer, capture loop and delivery loop.
///
/// Every increment is mirrored to the `metrics` facade so an installed
/// recorder sees the same numbers.
#[derive(Default)]
pub struct GrabberStats {
    counters: CachePadded<Counters>,
}

/// Point-in-time copy of [`GrabberStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub missed_ticks: u64,
    pub frames_submitted: u64,
    pub results_delivered: u64,
    pub timeouts: u64,
    pub failures: u64,
}

impl GrabberStats {
    pub fn record_frame(&self) {
        self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);
        counter!("framegrabber_frames_captured").increment(1);
    }

    pub fn record_read_failure(&self) {
        self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
        counter!("framegrabber_read_failures").increment(1);
    }

    pub fn record_missed_tick(&self) {
        self.counters.missed_ticks.fetch_add(1, Ordering::Relaxed);
        counter!("framegrabber_missed_ticks").increment(1);
    }

    pub fn record_submission(&self) {
        self.counters.frames_submitted.fetch_add(1, Ordering::Relaxed);
        counter!("framegrabber_frames_submitted").increment(1);
    }

    pub fn record_delivery(&self, timed_out: bool, failed: bool) {
        self.counters.results_delivered.fetch_add(1, Ordering::Relaxed);
        counter!("framegrabber_results_delivered").increment(1);
        if timed_out {
            self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            counter!("framegrabber_analysis_timeouts").increment(1);
        }
        if failed {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            counter!("framegrabber_analysis_failures").increment(1);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            frames_captured: c.frames_captured.load(Ordering::Relaxed),
            read_failures: c.read_failures.load(Ordering::Relaxed),
            missed_ticks: c.missed_ticks.load(Ordering::Relaxed),
            frames_submitted: c.frames_submitted.load(Ordering::Relaxed),
            results_delivered: c.results_delivered.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_splits_timeouts_and_failures() {
        let stats = GrabberStats::default();
        stats.record_frame();
        stats.record_submission();
        stats.record_delivery(false, false);
        stats.record_delivery(true, false);
        stats.record_delivery(false, true);

        let snap = stats.snapshot();
        assert_eq!(snap.frames_captured, 1);
        assert_eq!(snap.frames_submitted, 1);
        assert_eq!(snap.results_delivered, 3);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.failures, 1);
    }
}
