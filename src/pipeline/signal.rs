//! Single-slot wake-up signal between the frame timer and the capture loop.

use std::sync::{Condvar, Mutex};

/// An auto-resetting flag. Arming an already armed signal does not queue a
/// second wake-up; `arm` reports it so the caller can count a missed tick.
#[derive(Default)]
pub struct TickSignal {
    armed: Mutex<bool>,
    cv: Condvar,
}

impl TickSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the signal and wake the waiter. Returns `true` if it was already
    /// armed, meaning the previous tick was never consumed.
    pub fn arm(&self) -> bool {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        let missed = *armed;
        *armed = true;
        self.cv.notify_one();
        missed
    }

    /// Block until armed, then reset.
    pub fn wait(&self) {
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        while !*armed {
            armed = self.cv.wait(armed).unwrap_or_else(|e| e.into_inner());
        }
        *armed = false;
    }

    /// Clear a pending tick without waiting.
    pub fn reset(&self) {
        *self.armed.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }
}
