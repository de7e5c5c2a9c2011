//! Video source abstraction consumed by the capture loop.

use bytes::Bytes;

use crate::capture::frame::PixelFormat;
use crate::error::Result;

/// Whether a failed read means "try again" or "we're done".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Camera or other endless source; read failures are transient.
    Live,
    /// File or recorded stream; a failed read means end of stream.
    Finite,
}

/// Raw image handed back by a source. Becomes a `Frame` once the capture
/// loop assigns a sequence index and timestamp.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub data: Bytes,
    pub format: PixelFormat,
}

/// A readable video source.
///
/// `read_frame` is allowed to block; the capture loop runs on a dedicated
/// blocking thread.
pub trait VideoSource: Send {
    fn read_frame(&mut self) -> Result<CapturedImage>;

    /// Frame width and height in pixels.
    fn dimensions(&self) -> (u32, u32);

    fn kind(&self) -> SourceKind;
}

impl<S: VideoSource + ?Sized> VideoSource for Box<S> {
    fn read_frame(&mut self) -> Result<CapturedImage> {
        (**self).read_frame()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn kind(&self) -> SourceKind {
        (**self).kind()
    }
}

/// Opens live cameras by index.
pub trait CameraOpener: Send + Sync {
    fn open(&self, index: u32) -> Result<Box<dyn VideoSource>>;
}
