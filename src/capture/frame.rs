use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Opaque value an observer can hang on a frame between capture and analysis.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// A captured frame.
///
/// Pixel data and metadata are immutable once the frame is built. The only
/// mutable part is the `user_data` slot, which observers of the "new frame"
/// notification may fill before the frame reaches analysis.
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Capture timestamp, used by the dispatch predicate
    pub timestamp: Instant,

    user_data: Mutex<Option<UserData>>,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Zero-based index within the current run
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Pixel formats we know how to label. The pipeline never looks inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
    Png,
}

impl Frame {
    pub fn new(data: Bytes, meta: FrameMetadata, timestamp: Instant) -> Self {
        Self {
            data,
            meta,
            timestamp,
            user_data: Mutex::new(None),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn set_user_data(&self, value: UserData) {
        *self.user_data.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
    }

    pub fn user_data(&self) -> Option<UserData> {
        self.user_data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Typed view of the user data slot. `None` if unset or of another type.
    pub fn user_data_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.user_data()?.downcast::<T>().ok()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("bytes", &self.data.len())
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            Bytes::from_static(&[1, 2, 3]),
            FrameMetadata {
                sequence,
                width: 1,
                height: 1,
                format: PixelFormat::Rgb24,
            },
            Instant::now(),
        )
    }

    #[test]
    fn user_data_is_typed_and_overwritable() {
        let f = frame(0);
        assert!(f.user_data().is_none());

        f.set_user_data(Arc::new(vec![(1u32, 2u32)]));
        let rects = f.user_data_as::<Vec<(u32, u32)>>().unwrap();
        assert_eq!(rects.as_slice(), &[(1, 2)]);
        assert!(f.user_data_as::<String>().is_none());

        f.set_user_data(Arc::new(String::from("faces")));
        assert_eq!(f.user_data_as::<String>().unwrap().as_str(), "faces");
    }

    #[test]
    fn debug_omits_pixels() {
        let rendered = format!("{:?}", frame(7));
        assert!(rendered.contains("sequence: 7"));
        assert!(rendered.contains("bytes: 3"));
    }
}
