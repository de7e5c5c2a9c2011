pub mod frame;
pub mod image_seq;
pub mod source;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use frame::{Frame, FrameMetadata, PixelFormat, UserData};
pub use image_seq::ImageSequenceSource;
pub use source::{CameraOpener, CapturedImage, SourceKind, VideoSource};
pub use synthetic::{SyntheticCamera, SyntheticOpener};
#[cfg(feature = "v4l2")]
pub use v4l2::{V4l2Opener, V4l2Source};
