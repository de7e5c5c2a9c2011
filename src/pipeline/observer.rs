//! Notifications raised by the grabber.
//!
//! Callbacks run synchronously on whichever loop raises them: lifecycle
//! events on the caller of `start_*`/`stop`, frames on the capture thread,
//! results on the delivery task. Observers that need a particular thread must
//! re-dispatch themselves.

use std::sync::{Arc, RwLock};

use flume::{Receiver, Sender};

use crate::capture::Frame;
use crate::pipeline::queue::AnalysisOutcome;

/// Receives grabber notifications. All methods default to doing nothing.
pub trait GrabberObserver<R>: Send + Sync {
    fn processing_starting(&self) {}
    fn processing_started(&self) {}
    fn processing_stopping(&self) {}
    fn processing_stopped(&self) {}

    /// A frame was captured. This is the place to attach user data; it runs
    /// before the frame is offered to the dispatch predicate.
    fn new_frame(&self, _frame: &Arc<Frame>) {}

    /// An analysis finished, failed or timed out. Raised in capture order.
    fn new_result(&self, _outcome: &Arc<AnalysisOutcome<R>>) {}
}

/// Grabber notification as a value, for [`ChannelObserver`].
#[derive(Debug)]
pub enum GrabberEvent<R> {
    ProcessingStarting,
    ProcessingStarted,
    ProcessingStopping,
    ProcessingStopped,
    NewFrame(Arc<Frame>),
    NewResult(Arc<AnalysisOutcome<R>>),
}

/// Forwards every notification into a channel.
///
/// Ordering is preserved, but the receiver handles events after the raising
/// loop has moved on. User data must be attached by a synchronous observer if
/// analysis is expected to see it.
pub struct ChannelObserver<R> {
    tx: Sender<GrabberEvent<R>>,
}

impl<R> ChannelObserver<R> {
    pub fn new() -> (Self, Receiver<GrabberEvent<R>>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    fn send(&self, event: GrabberEvent<R>) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl<R: Send + Sync> GrabberObserver<R> for ChannelObserver<R> {
    fn processing_starting(&self) {
        self.send(GrabberEvent::ProcessingStarting);
    }

    fn processing_started(&self) {
        self.send(GrabberEvent::ProcessingStarted);
    }

    fn processing_stopping(&self) {
        self.send(GrabberEvent::ProcessingStopping);
    }

    fn processing_stopped(&self) {
        self.send(GrabberEvent::ProcessingStopped);
    }

    fn new_frame(&self, frame: &Arc<Frame>) {
        self.send(GrabberEvent::NewFrame(frame.clone()));
    }

    fn new_result(&self, outcome: &Arc<AnalysisOutcome<R>>) {
        self.send(GrabberEvent::NewResult(outcome.clone()));
    }
}

/// Registered observers, shared between the loops.
pub(crate) struct Observers<R> {
    list: RwLock<Vec<Arc<dyn GrabberObserver<R>>>>,
}

impl<R> Default for Observers<R> {
    fn default() -> Self {
        Self {
            list: RwLock::new(Vec::new()),
        }
    }
}

impl<R> Observers<R> {
    pub(crate) fn add(&self, observer: Arc<dyn GrabberObserver<R>>) {
        self.list
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub(crate) fn remove(&self, observer: &Arc<dyn GrabberObserver<R>>) -> bool {
        let mut list = self.list.write().unwrap_or_else(|e| e.into_inner());
        let before = list.len();
        list.retain(|o| !Arc::ptr_eq(o, observer));
        list.len() != before
    }

    /// Invoke `f` on every observer. The list is snapshotted first so an
    /// observer may register or remove observers from inside a callback.
    pub(crate) fn each(&self, f: impl Fn(&dyn GrabberObserver<R>)) {
        let snapshot: Vec<_> = self
            .list
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in &snapshot {
            f(observer.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl GrabberObserver<u8> for Counting {
        fn processing_started(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn add_remove_and_fan_out() {
        let observers = Observers::<u8>::default();
        let counting = Arc::new(Counting::default());
        let as_dyn: Arc<dyn GrabberObserver<u8>> = counting.clone();

        observers.add(as_dyn.clone());
        observers.each(|o| o.processing_started());
        // Default methods are no-ops.
        observers.each(|o| o.processing_stopped());
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);

        assert!(observers.remove(&as_dyn));
        assert!(!observers.remove(&as_dyn));
        observers.each(|o| o.processing_started());
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_observer_preserves_order() {
        let (observer, rx) = ChannelObserver::<u8>::new();
        observer.processing_starting();
        observer.processing_started();
        observer.processing_stopped();
        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(
            events.as_slice(),
            [
                GrabberEvent::ProcessingStarting,
                GrabberEvent::ProcessingStarted,
                GrabberEvent::ProcessingStopped
            ]
        ));
    }
}
