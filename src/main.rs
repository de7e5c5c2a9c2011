//! Frame grabber demo: capture, analyze a subset of frames, log results in order

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use framegrabber::capture::{CameraOpener, ImageSequenceSource};
use framegrabber::pipeline::{AnalysisOutcome, GrabberEvent, GrabberObserver};
use framegrabber::{Config, Frame, FrameGrabber};

/// Mean byte value of the frame, a stand-in for a remote vision call.
async fn mean_brightness(frame: Arc<Frame>) -> Result<f64, std::io::Error> {
    // Vary latency per frame so out-of-order completion actually happens
    let delay = 50 + (frame.sequence() * 37 % 200);
    tokio::time::sleep(Duration::from_millis(delay)).await;

    if frame.data.is_empty() {
        return Err(std::io::Error::other("empty frame"));
    }
    let sum: u64 = frame.data.iter().map(|&b| b as u64).sum();
    Ok(sum as f64 / frame.data.len() as f64)
}

struct ResultLogger;

impl GrabberObserver<f64> for ResultLogger {
    fn new_result(&self, outcome: &Arc<AnalysisOutcome<f64>>) {
        let seq = outcome.frame.sequence();
        match (&outcome.result, &outcome.failure) {
            (Some(mean), _) => info!(frame = seq, mean = *mean, "Result"),
            (None, Some(e)) => warn!(frame = seq, error = %e, "Analysis failed"),
            (None, None) => warn!(frame = seq, "Analysis timed out"),
        }
    }
}

fn camera_opener(config: &Config) -> Arc<dyn CameraOpener> {
    #[cfg(feature = "v4l2")]
    {
        Arc::new(framegrabber::capture::V4l2Opener::new(config.source.clone()))
    }
    #[cfg(not(feature = "v4l2"))]
    {
        Arc::new(framegrabber::capture::SyntheticOpener::new(
            config.source.synthetic_cameras,
            config.source.width,
            config.source.height,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framegrabber=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Frame grabber launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    framegrabber::CONFIG.store(Arc::new(config.clone()));

    let grabber: FrameGrabber<f64> = FrameGrabber::new(camera_opener(&config));
    grabber.set_analysis_function(mean_brightness);
    grabber.add_observer(Arc::new(ResultLogger));
    let events = grabber.subscribe();

    match &config.source.image_dir {
        Some(dir) => {
            let source = ImageSequenceSource::open(dir)?;
            grabber.start_source(Box::new(source), None).await?;
        }
        None => {
            info!("Cameras available: {}", grabber.camera_count());
            grabber
                .start_camera(config.grabber.camera_index, None)
                .await?;
        }
    }
    info!(
        "Capturing {}x{} at {} fps",
        grabber.width(),
        grabber.height(),
        config.grabber.fps
    );

    // Run until Ctrl-C, or until a finite source stops the pipeline itself
    let finished = async {
        while let Ok(event) = events.recv_async().await {
            if matches!(event, GrabberEvent::ProcessingStopped) {
                break;
            }
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = finished => info!("Source finished"),
    }

    grabber.stop().await;

    let stats = grabber.stats();
    info!(?stats, "Frame grabber shutting down");
    Ok(())
}
