pub mod observer;
pub mod predicate;
pub mod queue;
pub mod signal;
pub mod stats;
pub mod timer;

pub use observer::{ChannelObserver, GrabberEvent, GrabberObserver};
pub use predicate::{DispatchPredicate, EveryFrame, IntervalTrigger};
pub use queue::{analysis_queue, AnalysisOutcome, AnalysisQueue, AnalysisQueueReceiver, PendingAnalysis};
pub use signal::TickSignal;
pub use stats::{GrabberStats, StatsSnapshot};
pub use timer::FrameTimer;
