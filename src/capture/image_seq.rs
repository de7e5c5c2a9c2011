//! Finite source over a directory of still images.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::info;

use crate::capture::frame::PixelFormat;
use crate::capture::source::{CapturedImage, SourceKind, VideoSource};
use crate::error::{GrabberError, Result};

/// Plays back the JPEG/PNG files of a directory in file-name order, then
/// reports end of stream. Files are passed through encoded; the pipeline never
/// decodes them.
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| format_for(p).is_some())
            .collect();
        files.sort();

        // Dimensions come from the first image; the rest are assumed to match.
        let (width, height) = match files.first() {
            Some(first) => image::image_dimensions(first)?,
            None => (0, 0),
        };

        info!(dir = %dir.display(), frames = files.len(), width, height, "Opened image sequence");

        Ok(Self {
            files,
            next: 0,
            width,
            height,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn format_for(path: &Path) -> Option<PixelFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some(PixelFormat::Mjpeg),
        "png" => Some(PixelFormat::Png),
        _ => None,
    }
}

impl VideoSource for ImageSequenceSource {
    fn read_frame(&mut self) -> Result<CapturedImage> {
        let path = self.files.get(self.next).ok_or(GrabberError::EndOfStream)?;
        let format = format_for(path).unwrap_or(PixelFormat::Mjpeg);
        let data = fs::read(path)?;
        self.next += 1;
        Ok(CapturedImage {
            data: Bytes::from(data),
            format,
        })
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Finite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) {
        let img = image::RgbImage::new(w, h);
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn plays_images_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", 6, 4);
        write_png(dir.path(), "a.png", 6, 4);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut src = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(src.len(), 2);
        assert_eq!(src.dimensions(), (6, 4));
        assert_eq!(src.kind(), SourceKind::Finite);

        let first = src.read_frame().unwrap();
        assert_eq!(first.format, PixelFormat::Png);
        assert_eq!(first.data, fs::read(dir.path().join("a.png")).unwrap());
        src.read_frame().unwrap();
        assert!(matches!(src.read_frame(), Err(GrabberError::EndOfStream)));
    }

    #[test]
    fn empty_directory_is_an_empty_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = ImageSequenceSource::open(dir.path()).unwrap();
        assert!(src.is_empty());
        assert_eq!(src.dimensions(), (0, 0));
        assert!(src.read_frame().is_err());
    }
}
