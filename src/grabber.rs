//! The frame grabber: timer-paced capture, rate-limited dispatch to an
//! injected analysis function, and in-order result delivery.
//!
//! While running, three activities are live:
//!
//! - the frame timer, which only arms a single-slot [`TickSignal`];
//! - the capture loop, on a blocking thread, which reads one frame per tick,
//!   announces it, and submits accepted frames for analysis;
//! - the delivery loop, an async task, which resolves submitted analyses in
//!   submission order and announces each outcome.
//!
//! The [`AnalysisQueue`] is the only hand-off between capture and delivery.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use once_cell::sync::OnceCell;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::capture::{CameraOpener, Frame, FrameMetadata, SourceKind, VideoSource};
use crate::error::{BoxError, GrabberError, Result};
use crate::pipeline::observer::Observers;
use crate::pipeline::{
    analysis_queue, AnalysisQueue, AnalysisQueueReceiver, ChannelObserver,
    DispatchPredicate, EveryFrame, FrameTimer, GrabberEvent, GrabberObserver, GrabberStats,
    IntervalTrigger, PendingAnalysis, StatsSnapshot, TickSignal,
};
use crate::{GrabberConfig, CONFIG};

/// Upper bound for the camera count probe.
const MAX_CAMERAS: u32 = 100;

type AnalysisFuture<R> = Pin<Box<dyn Future<Output = std::result::Result<R, BoxError>> + Send>>;

struct Analyzer<R> {
    run: Box<dyn Fn(Arc<Frame>) -> AnalysisFuture<R> + Send + Sync>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Captures frames and feeds a subset of them to an async analysis function,
/// delivering outcomes in capture order.
///
/// Cheap to clone; clones share the same pipeline.
pub struct FrameGrabber<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for FrameGrabber<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<R> {
    opener: Arc<dyn CameraOpener>,
    observers: Observers<R>,
    analyzer: ArcSwapOption<Analyzer<R>>,
    predicate: Mutex<Box<dyn DispatchPredicate>>,
    analysis_timeout: Mutex<Duration>,
    default_fps: f64,
    /// Serializes start/stop; holds the active run, if any.
    run: tokio::sync::Mutex<Option<ActiveRun>>,
    state: Mutex<LifecycleState>,
    dimensions: Mutex<(u32, u32)>,
    num_cameras: OnceCell<u32>,
    next_run_id: AtomicU64,
    stats: Arc<GrabberStats>,
}

struct ActiveRun {
    id: u64,
    /// Set only for live cameras opened by index.
    camera_index: Option<u32>,
    stopping: Arc<AtomicBool>,
    signal: Arc<TickSignal>,
    capture: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

/// Everything the capture loop owns for one run.
struct CaptureContext<R> {
    run_id: u64,
    rt: Handle,
    source: Box<dyn VideoSource>,
    signal: Arc<TickSignal>,
    stopping: Arc<AtomicBool>,
    queue: AnalysisQueue<R>,
    timer: FrameTimer,
}

impl<R: Send + Sync + 'static> FrameGrabber<R> {
    /// Grabber using the process-wide [`CONFIG`] for its defaults.
    pub fn new(opener: Arc<dyn CameraOpener>) -> Self {
        Self::with_config(opener, &CONFIG.load().grabber)
    }

    pub fn with_config(opener: Arc<dyn CameraOpener>, config: &GrabberConfig) -> Self {
        let predicate: Box<dyn DispatchPredicate> = match config.analysis_interval() {
            Some(interval) => Box::new(IntervalTrigger::new(interval)),
            None => Box::new(EveryFrame),
        };

        Self {
            inner: Arc::new(Inner {
                opener,
                observers: Observers::default(),
                analyzer: ArcSwapOption::empty(),
                predicate: Mutex::new(predicate),
                analysis_timeout: Mutex::new(config.analysis_timeout()),
                default_fps: config.fps,
                run: tokio::sync::Mutex::new(None),
                state: Mutex::new(LifecycleState::Idle),
                dimensions: Mutex::new((0, 0)),
                num_cameras: OnceCell::new(),
                next_run_id: AtomicU64::new(0),
                stats: Arc::new(GrabberStats::default()),
            }),
        }
    }

    /// Install the analysis function. Frames submitted while no function is
    /// installed are not analyzed and produce no outcome.
    pub fn set_analysis_function<F, Fut, E>(&self, f: F)
    where
        F: Fn(Arc<Frame>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let analyzer = Analyzer {
            run: Box::new(move |frame| {
                let fut = f(frame);
                Box::pin(async move { fut.await.map_err(Into::into) }) as AnalysisFuture<R>
            }),
        };
        self.inner.analyzer.store(Some(Arc::new(analyzer)));
    }

    pub fn clear_analysis_function(&self) {
        self.inner.analyzer.store(None);
    }

    /// How long an analysis may take, counted from submission, before its
    /// outcome is reported as timed out.
    pub fn set_analysis_timeout(&self, timeout: Duration) {
        *lock(&self.inner.analysis_timeout) = timeout;
    }

    pub fn analysis_timeout(&self) -> Duration {
        *lock(&self.inner.analysis_timeout)
    }

    /// Replace the dispatch predicate. Takes effect from the next frame.
    pub fn set_predicate(&self, predicate: impl DispatchPredicate + 'static) {
        *lock(&self.inner.predicate) = Box::new(predicate);
    }

    pub fn trigger_analysis_on_interval(&self, interval: Duration) {
        self.set_predicate(IntervalTrigger::new(interval));
    }

    pub fn trigger_analysis_on_every_frame(&self) {
        self.set_predicate(EveryFrame);
    }

    pub fn add_observer(&self, observer: Arc<dyn GrabberObserver<R>>) {
        self.inner.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn GrabberObserver<R>>) -> bool {
        self.inner.observers.remove(observer)
    }

    /// Register a [`ChannelObserver`] and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<GrabberEvent<R>> {
        let (observer, rx) = ChannelObserver::new();
        self.add_observer(Arc::new(observer));
        rx
    }

    pub fn state(&self) -> LifecycleState {
        *lock(&self.inner.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Width of the current (or last) source's frames.
    pub fn width(&self) -> u32 {
        lock(&self.inner.dimensions).0
    }

    pub fn height(&self) -> u32 {
        lock(&self.inner.dimensions).1
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Number of cameras, found by opening indices 0, 1, ... until one fails.
    ///
    /// The first call opens every camera in turn, so make it before starting
    /// capture. The count is cached afterwards.
    pub fn camera_count(&self) -> u32 {
        *self.inner.num_cameras.get_or_init(|| {
            let mut count = 0;
            while count < MAX_CAMERAS {
                match self.inner.opener.open(count) {
                    Ok(source) => {
                        drop(source);
                        count += 1;
                    }
                    Err(e) => {
                        debug!(index = count, error = %e, "Camera probe stopped");
                        break;
                    }
                }
            }
            info!(cameras = count, "Counted cameras");
            count
        })
    }

    /// Start processing a live camera, stopping any current source first.
    ///
    /// Asking for the camera that is already running is a no-op. `fps` of
    /// `None` uses the configured rate; zero means 30 fps.
    #[instrument(skip(self))]
    pub async fn start_camera(&self, index: u32, fps: Option<f64>) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        if run.as_ref().is_some_and(|r| r.camera_index == Some(index)) {
            debug!(index, "Camera already running");
            return Ok(());
        }

        self.inner.stop_locked(&mut run).await;

        let opener = self.inner.opener.clone();
        let source = tokio::task::spawn_blocking(move || opener.open(index))
            .await
            .map_err(|e| GrabberError::CameraOpen {
                index,
                reason: e.to_string(),
            })??;

        let active = self.inner.launch(source, fps, Some(index))?;
        *run = Some(active);
        Ok(())
    }

    /// Start processing an arbitrary source, stopping any current one first.
    /// A finite source stops the pipeline by itself once it runs dry.
    #[instrument(skip(self, source))]
    pub async fn start_source(&self, source: Box<dyn VideoSource>, fps: Option<f64>) -> Result<()> {
        let mut run = self.inner.run.lock().await;
        self.inner.stop_locked(&mut run).await;
        let active = self.inner.launch(source, fps, None)?;
        *run = Some(active);
        Ok(())
    }

    /// Stop capturing and wait for both loops to exit.
    ///
    /// Analyses already queued are still delivered (each bounded by its
    /// timeout) before this returns. Calling it while idle does nothing.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.inner.stop_run(None).await;
    }
}

impl<R: Send + Sync + 'static> Inner<R> {
    fn set_state(&self, state: LifecycleState) {
        *lock(&self.state) = state;
    }

    fn launch(
        self: &Arc<Self>,
        source: Box<dyn VideoSource>,
        fps: Option<f64>,
        camera_index: Option<u32>,
    ) -> Result<ActiveRun> {
        let rt = Handle::try_current()?;
        let frame_delay = crate::frame_delay(fps.unwrap_or(self.default_fps));
        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);

        self.set_state(LifecycleState::Starting);
        self.observers.each(|o| o.processing_starting());

        *lock(&self.dimensions) = source.dimensions();
        lock(&self.predicate).reset();

        let (queue, rx) = analysis_queue();
        let signal = Arc::new(TickSignal::new());
        let stopping = Arc::new(AtomicBool::new(false));

        let delivery = rt.spawn(self.clone().delivery_loop(rx));

        let timer = FrameTimer::spawn(&rt, frame_delay, signal.clone(), self.stats.clone());
        let ctx = CaptureContext {
            run_id: id,
            rt: rt.clone(),
            source,
            signal: signal.clone(),
            stopping: stopping.clone(),
            queue,
            timer,
        };
        let inner = self.clone();
        let capture = rt.spawn_blocking(move || inner.capture_loop(ctx));

        info!(run = id, ?camera_index, ?frame_delay, "Processing started");
        self.set_state(LifecycleState::Running);
        self.observers.each(|o| o.processing_started());

        Ok(ActiveRun {
            id,
            camera_index,
            stopping,
            signal,
            capture,
            delivery,
        })
    }

    /// Stop the active run. With `only` set, stop it only if it is that run;
    /// a finite source uses this so its self-stop cannot hit a newer run.
    async fn stop_run(&self, only: Option<u64>) {
        let mut run = self.run.lock().await;
        if let Some(id) = only {
            if run.as_ref().map(|r| r.id) != Some(id) {
                debug!(run = id, "Run already replaced, skipping self-stop");
                return;
            }
        }
        self.stop_locked(&mut run).await;
    }

    async fn stop_locked(&self, run: &mut Option<ActiveRun>) {
        let Some(active) = run.take() else {
            return;
        };

        self.set_state(LifecycleState::Stopping);
        self.observers.each(|o| o.processing_stopping());

        active.stopping.store(true, Ordering::SeqCst);
        active.signal.arm();

        if let Err(e) = active.capture.await {
            warn!(run = active.id, error = %e, "Capture loop ended abnormally");
        }
        if let Err(e) = active.delivery.await {
            warn!(run = active.id, error = %e, "Delivery loop ended abnormally");
        }

        info!(run = active.id, "Processing stopped");
        self.set_state(LifecycleState::Idle);
        self.observers.each(|o| o.processing_stopped());
    }

    fn capture_loop(self: Arc<Self>, ctx: CaptureContext<R>) {
        let CaptureContext {
            run_id,
            rt,
            mut source,
            signal,
            stopping,
            queue,
            timer,
        } = ctx;
        let (width, height) = source.dimensions();
        let kind = source.kind();
        let mut sequence: u64 = 0;
        let mut exhausted = false;

        loop {
            trace!("Producer: waiting for timer");
            signal.wait();
            if stopping.load(Ordering::SeqCst) {
                break;
            }

            let started = Instant::now();
            let image = match source.read_frame() {
                Ok(image) => image,
                Err(e) if kind == SourceKind::Finite => {
                    info!(run = run_id, frames = sequence, reason = %e, "Source exhausted, stopping");
                    exhausted = true;
                    break;
                }
                Err(e) => {
                    self.stats.record_read_failure();
                    debug!(error = %e, "Producer: read failed on live source, retrying");
                    continue;
                }
            };

            let frame = Arc::new(Frame::new(
                image.data,
                FrameMetadata {
                    sequence,
                    width,
                    height,
                    format: image.format,
                },
                started,
            ));
            sequence += 1;
            self.stats.record_frame();

            self.observers.each(|o| o.new_frame(&frame));

            let accepted = lock(&self.predicate).should_analyze(&frame);
            if accepted {
                if let Some(pending) = self.submit(&rt, frame.clone()) {
                    trace!(sequence = frame.sequence(), "Producer: analysis submitted");
                    if let Err(e) = queue.push(pending) {
                        warn!(error = %e, "Producer: dropping analysis");
                    }
                }
            } else {
                trace!(sequence = frame.sequence(), "Producer: not analyzing frame");
            }
            trace!(elapsed = ?started.elapsed(), "Producer: iteration done");
        }

        debug!(run = run_id, "Producer: closing queue, releasing source and timer");
        queue.close();
        drop(source);
        timer.stop_blocking(&rt);

        if exhausted {
            let inner = self.clone();
            rt.spawn(async move { inner.stop_run(Some(run_id)).await });
        }
        debug!(run = run_id, "Producer: stopped");
    }

    /// Start the analysis for `frame` and return a handle to it. `None` when
    /// no analysis function is installed.
    fn submit(&self, rt: &Handle, frame: Arc<Frame>) -> Option<PendingAnalysis<R>> {
        let analyzer = self.analyzer.load_full()?;
        let timeout = *lock(&self.analysis_timeout);
        let task = rt.spawn((analyzer.run)(frame.clone()));
        self.stats.record_submission();
        Some(PendingAnalysis::new(frame, task, timeout))
    }

    async fn delivery_loop(self: Arc<Self>, rx: AnalysisQueueReceiver<R>) {
        while let Some(pending) = rx.next().await {
            let sequence = pending.sequence();
            trace!(sequence, "Consumer: waiting for result");

            let outcome = Arc::new(pending.resolve().await);
            if outcome.timed_out {
                warn!(sequence, "Analysis timed out");
            } else if let Some(failure) = &outcome.failure {
                warn!(sequence, error = %failure, "Analysis failed");
            } else {
                debug!(sequence, queued = rx.len(), "Consumer: got result");
            }

            self.stats
                .record_delivery(outcome.timed_out, outcome.failure.is_some());
            self.observers.each(|o| o.new_result(&outcome));
        }
        debug!("Consumer: stopped");
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticOpener;

    fn grabber() -> FrameGrabber<u64> {
        FrameGrabber::with_config(
            Arc::new(SyntheticOpener::new(3, 4, 4)),
            &GrabberConfig::default(),
        )
    }

    #[test]
    fn camera_count_is_probed_once() {
        let opener = SyntheticOpener::new(3, 4, 4);
        let g: FrameGrabber<u64> =
            FrameGrabber::with_config(Arc::new(opener.clone()), &GrabberConfig::default());
        assert_eq!(g.camera_count(), 3);
        assert_eq!(opener.open_count(), 3);
        assert_eq!(g.camera_count(), 3);
        assert_eq!(opener.open_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lifecycle_states() {
        let g = grabber();
        assert_eq!(g.state(), LifecycleState::Idle);

        g.start_camera(1, Some(100.0)).await.unwrap();
        assert!(g.is_running());
        assert_eq!((g.width(), g.height()), (4, 4));

        g.stop().await;
        assert_eq!(g.state(), LifecycleState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_camera_is_reported_from_start() {
        let g = grabber();
        let err = g.start_camera(7, None).await.unwrap_err();
        assert!(matches!(err, GrabberError::CameraOpen { index: 7, .. }));
        assert_eq!(g.state(), LifecycleState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unset_analysis_function_produces_no_outcomes() {
        let g = grabber();
        g.start_camera(0, Some(200.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        g.stop().await;

        let stats = g.stats();
        assert!(stats.frames_captured > 0);
        assert_eq!(stats.frames_submitted, 0);
        assert_eq!(stats.results_delivered, 0);
    }

    #[test]
    fn start_outside_runtime_fails() {
        let g = grabber();
        let source = Box::new(crate::capture::SyntheticCamera::new(0, 2, 2));
        assert!(matches!(
            g.inner.launch(source, None, None),
            Err(GrabberError::NoRuntime(_))
        ));
        assert_eq!(g.state(), LifecycleState::Idle);
    }
}
