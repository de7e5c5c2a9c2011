//! Test-pattern camera.
//!
//! Produces RGB24 frames with a moving gradient so downstream analysis has
//! something that changes over time. Used by the demo binary when no real
//! device is configured, and by the test suite.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::capture::frame::PixelFormat;
use crate::capture::source::{CameraOpener, CapturedImage, SourceKind, VideoSource};
use crate::error::{GrabberError, Result};

/// Live synthetic camera.
pub struct SyntheticCamera {
    index: u32,
    width: u32,
    height: u32,
    tick: u64,
}

impl SyntheticCamera {
    pub fn new(index: u32, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            tick: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let shift = (self.tick % 256) as usize;
        let mut pixels = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let r = ((x * 255 / w.max(1)) + shift) % 256;
                let g = ((y * 255 / h.max(1)) + shift) % 256;
                let b = (self.index as usize * 64) % 256;
                pixels.extend_from_slice(&[r as u8, g as u8, b as u8]);
            }
        }
        pixels
    }
}

impl VideoSource for SyntheticCamera {
    fn read_frame(&mut self) -> Result<CapturedImage> {
        let data = Bytes::from(self.render());
        self.tick += 1;
        Ok(CapturedImage {
            data,
            format: PixelFormat::Rgb24,
        })
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }
}

/// Opener exposing a fixed number of synthetic cameras.
///
/// Counts how many times a camera was opened, which lets callers check that a
/// restart on the same index did not reacquire the device.
#[derive(Clone)]
pub struct SyntheticOpener {
    cameras: u32,
    width: u32,
    height: u32,
    opens: Arc<AtomicUsize>,
}

impl SyntheticOpener {
    pub fn new(cameras: u32, width: u32, height: u32) -> Self {
        Self {
            cameras,
            width,
            height,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl CameraOpener for SyntheticOpener {
    fn open(&self, index: u32) -> Result<Box<dyn VideoSource>> {
        if index >= self.cameras {
            return Err(GrabberError::CameraOpen {
                index,
                reason: format!("only {} synthetic cameras", self.cameras),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        debug!(index, "Opened synthetic camera");
        Ok(Box::new(SyntheticCamera::new(index, self.width, self.height)))
    }
}
