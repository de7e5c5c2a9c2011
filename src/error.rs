use thiserror::Error;

/// Boxed error returned by an injected analysis function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the grabber itself.
#[derive(Debug, Error)]
pub enum GrabberError {
    #[error("failed to open camera {index}: {reason}")]
    CameraOpen { index: u32, reason: String },

    #[error("failed to read frame: {0}")]
    Read(String),

    #[error("source exhausted")]
    EndOfStream,

    #[error("analysis queue is closed for new entries")]
    QueueClosed,

    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Why an individual analysis produced no result.
///
/// Never fatal to the pipeline, it is carried per frame inside an
/// [`AnalysisOutcome`](crate::pipeline::AnalysisOutcome).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis failed: {0}")]
    Failed(#[source] BoxError),

    #[error("analysis panicked: {0}")]
    Panicked(String),

    #[error("analysis task was cancelled")]
    Cancelled,
}

pub type Result<T, E = GrabberError> = std::result::Result<T, E>;
