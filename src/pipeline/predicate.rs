//! Dispatch predicates: which captured frames go to analysis.

use std::time::{Duration, Instant};

use crate::capture::Frame;

/// Decides per captured frame whether it should be analyzed.
///
/// Evaluated only on the capture loop, so implementations may keep plain
/// mutable state.
pub trait DispatchPredicate: Send {
    fn should_analyze(&mut self, frame: &Frame) -> bool;

    /// Forget any schedule state. Called whenever processing (re)starts.
    fn reset(&mut self) {}
}

impl<F> DispatchPredicate for F
where
    F: FnMut(&Frame) -> bool + Send,
{
    fn should_analyze(&mut self, frame: &Frame) -> bool {
        self(frame)
    }
}

/// Analyze every captured frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct EveryFrame;

impl DispatchPredicate for EveryFrame {
    fn should_analyze(&mut self, _frame: &Frame) -> bool {
        true
    }
}

/// Analyze at most one frame per `interval` of frame time.
///
/// The schedule is anchored on the first frame seen and advances by exactly
/// `interval` on every accepted frame, so a late trigger does not push the
/// following ones later.
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    interval: Duration,
    next_due: Option<Instant>,
}

impl IntervalTrigger {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl DispatchPredicate for IntervalTrigger {
    fn should_analyze(&mut self, frame: &Frame) -> bool {
        let due = match self.next_due {
            None => {
                self.next_due = Some(frame.timestamp);
                true
            }
            Some(next) => frame.timestamp > next,
        };
        if due {
            if let Some(next) = self.next_due.as_mut() {
                *next += self.interval;
            }
        }
        due
    }

    fn reset(&mut self) {
        self.next_due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat};
    use bytes::Bytes;

    fn frame_at(sequence: u64, timestamp: Instant) -> Frame {
        Frame::new(
            Bytes::new(),
            FrameMetadata {
                sequence,
                width: 0,
                height: 0,
                format: PixelFormat::Rgb24,
            },
            timestamp,
        )
    }

    #[test]
    fn first_frame_always_triggers() {
        let mut trigger = IntervalTrigger::new(Duration::from_secs(3600));
        let t0 = Instant::now();
        assert!(trigger.should_analyze(&frame_at(0, t0)));
        assert!(!trigger.should_analyze(&frame_at(1, t0 + Duration::from_secs(1))));
    }

    #[test]
    fn equal_to_due_time_is_not_enough() {
        let interval = Duration::from_millis(100);
        let mut trigger = IntervalTrigger::new(interval);
        let t0 = Instant::now();
        assert!(trigger.should_analyze(&frame_at(0, t0)));
        assert!(!trigger.should_analyze(&frame_at(1, t0 + interval)));
        assert!(trigger.should_analyze(&frame_at(2, t0 + interval + Duration::from_nanos(1))));
    }

    #[test]
    fn schedule_does_not_drift() {
        // 30 fps capture, one analysis per second, 1000 frames.
        let delta = Duration::from_micros(33_333);
        let interval = Duration::from_secs(1);
        let mut trigger = IntervalTrigger::new(interval);
        let t0 = Instant::now();

        let accepted: Vec<Instant> = (0..1000u64)
            .map(|k| frame_at(k, t0 + delta * k as u32))
            .filter(|f| trigger.should_analyze(f))
            .map(|f| f.timestamp)
            .collect();

        // ~33 seconds of frames, one trigger per second plus the anchor.
        assert_eq!(accepted.len(), 34);
        for (n, ts) in accepted.iter().enumerate().skip(1) {
            // Frame n is the first one strictly after t0 + n*I, so it lies
            // within one frame period of that slot, never further behind.
            let ideal = t0 + interval * n as u32;
            let lag = ts.duration_since(ideal);
            assert!(lag > Duration::ZERO && lag <= delta, "frame {n} lag {lag:?}");
        }
    }

    #[test]
    fn late_trigger_keeps_schedule() {
        let interval = Duration::from_millis(100);
        let mut trigger = IntervalTrigger::new(interval);
        let t0 = Instant::now();
        assert!(trigger.should_analyze(&frame_at(0, t0)));
        // A big capture stall: frame arrives at 250ms.
        assert!(trigger.should_analyze(&frame_at(1, t0 + Duration::from_millis(250))));
        // Next due is t0 + 200ms, not 350ms, so 260ms also fires.
        assert!(trigger.should_analyze(&frame_at(2, t0 + Duration::from_millis(260))));
        assert!(!trigger.should_analyze(&frame_at(3, t0 + Duration::from_millis(290))));
    }

    #[test]
    fn reset_re_anchors_on_next_frame() {
        let mut trigger = IntervalTrigger::new(Duration::from_secs(10));
        let t0 = Instant::now();
        assert!(trigger.should_analyze(&frame_at(0, t0)));
        assert!(!trigger.should_analyze(&frame_at(1, t0 + Duration::from_secs(1))));
        trigger.reset();
        assert!(trigger.should_analyze(&frame_at(2, t0 + Duration::from_secs(2))));
    }

    #[test]
    fn closures_are_predicates() {
        let mut even = |f: &Frame| f.sequence() % 2 == 0;
        let t0 = Instant::now();
        assert!(even.should_analyze(&frame_at(0, t0)));
        assert!(!even.should_analyze(&frame_at(1, t0)));
        assert!(EveryFrame.should_analyze(&frame_at(1, t0)));
    }
}
