pub mod capture;
pub mod error;
pub mod grabber;
pub mod pipeline;

use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::{Frame, FrameMetadata, SourceKind, VideoSource};
pub use error::{AnalysisError, GrabberError, Result};
pub use grabber::{FrameGrabber, LifecycleState};
pub use pipeline::{AnalysisOutcome, DispatchPredicate, GrabberObserver};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Frame rate used when none (or zero) is configured
pub const DEFAULT_FPS: f64 = 30.0;

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub grabber: GrabberConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabberConfig {
    /// Capture rate in frames per second; 0 means [`DEFAULT_FPS`]
    pub fps: f64,
    pub analysis_timeout_ms: u64,
    /// Analyze at most one frame per interval; unset analyzes every frame
    pub analysis_interval_ms: Option<u64>,
    pub camera_index: u32,
}

/// Where frames come from when the binary starts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory of still images to play back instead of a camera
    pub image_dir: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Number of synthetic cameras exposed when no real device backend is built
    pub synthetic_cameras: u32,
}

impl Default for GrabberConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            analysis_timeout_ms: 5000,
            analysis_interval_ms: None,
            camera_index: 0,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            image_dir: None,
            width: 640,
            height: 480,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            synthetic_cameras: 1,
        }
    }
}

impl GrabberConfig {
    /// Delay between frame grabs
    pub fn frame_delay(&self) -> Duration {
        frame_delay(self.fps)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    pub fn analysis_interval(&self) -> Option<Duration> {
        self.analysis_interval_ms.map(Duration::from_millis)
    }
}

/// Inter-frame delay for `fps`, falling back to [`DEFAULT_FPS`] for zero,
/// negative or non-finite rates.
pub fn frame_delay(fps: f64) -> Duration {
    let fps = if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        DEFAULT_FPS
    };
    Duration::from_secs_f64(1.0 / fps)
}

impl Config {
    /// Load defaults, then an optional TOML file, then `FRAMEGRABBER__*`
    /// environment variables (e.g. `FRAMEGRABBER__GRABBER__FPS=15`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("FRAMEGRABBER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn frame_delay_defaults_to_thirty_fps() {
        assert_eq!(frame_delay(0.0), frame_delay(DEFAULT_FPS));
        assert_eq!(frame_delay(-5.0), frame_delay(DEFAULT_FPS));
        assert_eq!(frame_delay(f64::NAN), frame_delay(DEFAULT_FPS));
        assert_eq!(frame_delay(10.0), Duration::from_millis(100));
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.grabber.analysis_timeout(), Duration::from_millis(5000));
        assert_eq!(cfg.grabber.camera_index, 0);
        assert!(cfg.grabber.analysis_interval().is_none());
        assert_eq!(cfg.grabber.frame_delay(), frame_delay(30.0));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[grabber]\nfps = 15.0\nanalysis_interval_ms = 1000\n\n[source]\nsynthetic_cameras = 3"
        )
        .unwrap();

        let cfg = Config::load(Some(file.path())).unwrap();
        assert_eq!(cfg.grabber.fps, 15.0);
        assert_eq!(cfg.grabber.analysis_interval(), Some(Duration::from_secs(1)));
        assert_eq!(cfg.grabber.analysis_timeout_ms, 5000);
        assert_eq!(cfg.source.synthetic_cameras, 3);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/framegrabber.toml"))).is_err());
    }
}
