//! V4L2 camera source with memory-mapped buffers

use bytes::Bytes;
use tracing::{info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::PixelFormat;
use crate::capture::source::{CameraOpener, CapturedImage, SourceKind, VideoSource};
use crate::error::{GrabberError, Result};
use crate::SourceConfig;

/// Live V4L2 camera
pub struct V4l2Source {
    // Keeps the device open for the lifetime of the stream
    _device: Box<Device>,
    stream: MmapStream<'static>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl V4l2Source {
    /// Open `/dev/video{index}` and start streaming
    pub fn open(index: u32, config: &SourceConfig) -> Result<Self> {
        let open_err = |reason: String| GrabberError::CameraOpen { index, reason };

        info!("Initializing V4L2 capture: /dev/video{}", index);
        let device = Device::new(index as usize).map_err(|e| open_err(e.to_string()))?;

        let caps = device.query_caps().map_err(|e| open_err(e.to_string()))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(open_err("device doesn't support video capture".into()));
        }

        let mut fmt = device.format().map_err(|e| open_err(e.to_string()))?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            other => return Err(open_err(format!("unsupported pixel format {:?}", other))),
        };
        // Drivers may round to the nearest supported size
        let fmt = device.set_format(&fmt).map_err(|e| open_err(e.to_string()))?;

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            .map_err(|e| open_err(e.to_string()))?;
        info!("Capture stream started with {} buffers", config.buffer_count);

        Ok(Self {
            _device: Box::new(device),
            stream,
            width: fmt.width,
            height: fmt.height,
            format: config.format,
        })
    }
}

impl VideoSource for V4l2Source {
    #[instrument(level = "trace", skip(self))]
    fn read_frame(&mut self) -> Result<CapturedImage> {
        let (buf, _meta) = self
            .stream
            .next()
            .map_err(|e| GrabberError::Read(e.to_string()))?;

        Ok(CapturedImage {
            data: Bytes::copy_from_slice(buf),
            format: self.format,
        })
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }
}

/// Opens `/dev/videoN` devices with a shared capture configuration
pub struct V4l2Opener {
    config: SourceConfig,
}

impl V4l2Opener {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }
}

impl CameraOpener for V4l2Opener {
    fn open(&self, index: u32) -> Result<Box<dyn VideoSource>> {
        Ok(Box::new(V4l2Source::open(index, &self.config)?))
    }
}
