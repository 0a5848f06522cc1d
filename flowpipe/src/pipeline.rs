//! Pipeline coordinator
//!
//! Wires `Source -> [Transform]* -> Sink` with one bounded [`Link`] per
//! pair of adjacent stages and drives all stages concurrently inside the
//! task that awaits [`Pipeline::run`].
//!
//! ```text
//!  Source ──link 0──▶ Transform ──link 1──▶ ... ──link n──▶ Sink
//!           reserve/send          recv/release
//! ```
//!
//! - A stage is never asked for the next unit before it finished the
//!   current one
//! - A link holds at most `min(upstream hwm, downstream hwm)` weight
//! - The first failing stage aborts every link; buffered units are not
//!   delivered and every driver returns at its next link operation
//! - A stop closes the source; buffered units drain normally

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, trace, warn};

use crate::error::PipelineError;
use crate::idgen::{IdGen, IntCanBeHandle};
use crate::link::{Link, LinkError, LinkStats, Reader, Writer};
use crate::notification_queue::NotificationQueueArc;
use crate::stage::{Sink, Source, Stage, Transform};
use crate::unit::{DataUnit, Mode};

/// Lifecycle of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl PipelineState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Unit accounting of a finished run
///
/// On success `acknowledged == produced - dropped + flushed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Units the source produced
    pub produced: u64,
    /// Units transforms dropped
    pub dropped: u64,
    /// Units transforms emitted from `flush`
    pub flushed: u64,
    /// Units the sink acknowledged
    pub acknowledged: u64,
    /// Production ended because of a stop request
    pub stopped: bool,
}

type CompletionCallback = Box<dyn FnOnce(&Result<PipelineReport, PipelineError>) + Send>;

/// Stops production of a pipeline from anywhere
#[derive(Clone)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    first_link: Link,
}

impl StopHandle {
    /// Ask the source to stop producing
    ///
    /// Units already produced still reach the sink.
    pub fn stop(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("pipeline: stop requested");
        }
        self.first_link.request_stop();
    }

    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StopHandle(requested={})", self.is_stop_requested())
    }
}

/// Assembles a pipeline stage by stage
///
/// ```
/// use flowpipe::{CollectSink, CounterSource, Mode, PipelineBuilder, WrapTransform};
///
/// # async fn demo() -> Result<(), flowpipe::PipelineError> {
/// let sink = CollectSink::new(Mode::Object);
/// let collected = sink.collected();
/// let report = PipelineBuilder::new(Mode::Object)
///     .source(CounterSource::range(Mode::Object, 1, 5))
///     .transform(WrapTransform::new(Mode::Object))
///     .sink(sink)
///     .build()?
///     .run()
///     .await?;
/// assert_eq!(report.acknowledged, 5);
/// assert_eq!(collected.len(), 5);
/// # Ok(())
/// # }
/// ```
pub struct PipelineBuilder {
    mode: Mode,
    source: Option<Stage>,
    transforms: Vec<Stage>,
    sink: Option<Stage>,
    on_complete: Option<CompletionCallback>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            source: None,
            transforms: Vec::new(),
            sink: None,
            on_complete: None,
        }
    }

    #[must_use]
    pub fn source(mut self, source: impl Source + 'static) -> Self {
        self.source = Some(Stage::source(source));
        self
    }

    /// Append a transform after the ones added so far
    #[must_use]
    pub fn transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Stage::transform(transform));
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Some(Stage::sink(sink));
        self
    }

    /// Callback invoked exactly once with the outcome of the run
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Result<PipelineReport, PipelineError>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// # Errors
    ///
    /// [`PipelineError::Config`] if the source or sink is missing, or a
    /// stage does not fit the pipeline, see [`Pipeline::from_stages`].
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let source = self
            .source
            .ok_or_else(|| PipelineError::Config("pipeline has no source".to_string()))?;
        let sink = self
            .sink
            .ok_or_else(|| PipelineError::Config("pipeline has no sink".to_string()))?;

        let mut stages = Vec::with_capacity(self.transforms.len() + 2);
        stages.push(source);
        stages.extend(self.transforms);
        stages.push(sink);

        let mut pipeline = Pipeline::from_stages(self.mode, stages)?;
        pipeline.on_complete = self.on_complete;
        Ok(pipeline)
    }
}

/// Outcome of the first failure; later failures are dropped
struct RunControl {
    failure: Mutex<Option<PipelineError>>,
    links: Vec<Link>,
}

impl RunControl {
    fn fail(&self, error: PipelineError) {
        {
            let mut failure = self.failure.lock();
            if failure.is_some() {
                debug!(error = %error, "pipeline: dropping later failure");
                return;
            }
            warn!(error = %error, "pipeline: stage failed");
            *failure = Some(error);
        }
        for link in &self.links {
            link.abort();
        }
    }

    fn is_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    fn take_failure(&self) -> Option<PipelineError> {
        self.failure.lock().take()
    }
}

#[derive(Default)]
struct RunStats {
    produced: AtomicU64,
    dropped: AtomicU64,
    flushed: AtomicU64,
    acknowledged: AtomicU64,
    stopped: AtomicBool,
}

impl RunStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self) -> PipelineReport {
        PipelineReport {
            produced: self.produced.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            stopped: self.stopped.load(Ordering::Relaxed),
        }
    }
}

/// A validated, ready-to-run chain of stages
pub struct Pipeline {
    mode: Mode,
    source: Box<dyn Source>,
    transforms: Vec<Box<dyn Transform>>,
    sink: Box<dyn Sink>,
    links: Vec<Link>,
    /// Link feeding the sink; link 0 lives in the stop handle
    last_link: Link,
    on_complete: Option<CompletionCallback>,
    state: watch::Sender<PipelineState>,
    stop: StopHandle,
}

impl Pipeline {
    /// Validate and wire a list of stages
    ///
    /// The first stage must be a source, the last a sink, everything in
    /// between a transform. Every stage must run in `mode` and have a
    /// non-zero high-water-mark.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] describing the first offending stage.
    pub fn from_stages(mode: Mode, stages: Vec<Stage>) -> Result<Self, PipelineError> {
        if stages.len() < 2 {
            return Err(PipelineError::Config(format!(
                "a pipeline needs a source and a sink, got {} stage(s)",
                stages.len()
            )));
        }
        for (index, stage) in stages.iter().enumerate() {
            let config = stage.config();
            if config.mode != mode {
                return Err(PipelineError::Config(format!(
                    "stage #{index} `{}` runs in {} mode, the pipeline in {mode} mode",
                    config.name, config.mode
                )));
            }
            if config.high_water_mark == 0 {
                return Err(PipelineError::Config(format!(
                    "stage #{index} `{}` has a zero high-water-mark",
                    config.name
                )));
            }
        }

        // Link capacities, computed before the stages are taken apart
        let capacities: Vec<(usize, String)> = stages
            .windows(2)
            .map(|pair| {
                let (up, down) = (pair[0].config(), pair[1].config());
                (
                    up.high_water_mark.min(down.high_water_mark),
                    format!("{}->{}", up.name, down.name),
                )
            })
            .collect();

        let last = stages.len() - 1;
        let mut source = None;
        let mut transforms = Vec::with_capacity(stages.len().saturating_sub(2));
        let mut sink = None;
        for (index, stage) in stages.into_iter().enumerate() {
            let capability = stage.capability();
            match (index, stage) {
                (0, Stage::Source(s)) => source = Some(s),
                (i, Stage::Sink(s)) if i == last => sink = Some(s),
                (i, Stage::Transform(t)) if i != 0 && i != last => transforms.push(t),
                (i, stage) => {
                    let expected = if i == 0 {
                        "produces"
                    } else if i == last {
                        "consumes"
                    } else {
                        "both"
                    };
                    return Err(PipelineError::Config(format!(
                        "stage #{i} `{}` {capability}, position requires {expected}",
                        stage.config().name
                    )));
                }
            }
        }
        let (Some(source), Some(sink)) = (source, sink) else {
            return Err(PipelineError::Config("pipeline has no source or sink".to_string()));
        };

        let idgen = IdGen::new();
        let queue = NotificationQueueArc::new();
        let links: Vec<Link> = capacities
            .iter()
            .map(|(capacity, hint)| Link::new(&idgen, queue.clone(), mode, *capacity, hint))
            .collect();
        let (Some(first_link), Some(last_link)) = (links.first().cloned(), links.last().cloned())
        else {
            return Err(PipelineError::Config("pipeline has no links".to_string()));
        };

        let (state, _) = watch::channel(PipelineState::Idle);
        Ok(Self {
            mode,
            source,
            transforms,
            sink,
            links,
            last_link,
            on_complete: None,
            state,
            stop: StopHandle {
                requested: Arc::new(AtomicBool::new(false)),
                first_link,
            },
        })
    }

    /// Replace the completion callback
    #[must_use]
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Result<PipelineReport, PipelineError>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Number of stages, source and sink included
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.transforms.len() + 2
    }

    /// Observe state transitions
    #[must_use]
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Capacity, current and peak buffered weight of every link
    #[must_use]
    pub fn link_stats(&self) -> Vec<LinkStats> {
        self.links.iter().map(Link::stats).collect()
    }

    /// Buffered levels of link `index`, reported after every append
    ///
    /// `None` if there is no such link or it is already closed.
    #[must_use]
    pub fn subscribe_link(
        &self,
        index: usize,
        channel_capacity: usize,
    ) -> Option<broadcast::Receiver<IntCanBeHandle>> {
        self.links.get(index)?.subscribe(channel_capacity)
    }

    /// Run the pipeline to completion
    ///
    /// Returns after every stage stopped. The completion callback, if
    /// any, is invoked exactly once before returning.
    ///
    /// # Errors
    ///
    /// The first stage failure.
    pub async fn run(mut self) -> Result<PipelineReport, PipelineError> {
        self.state.send_replace(PipelineState::Running);
        info!(mode = %self.mode, stages = self.stage_count(), "pipeline: started");

        let control = RunControl {
            failure: Mutex::new(None),
            links: self.links.clone(),
        };
        let stats = RunStats::default();

        // Transform i reads link i and writes link i + 1
        let transform_drivers = self
            .transforms
            .iter_mut()
            .zip(self.links.windows(2))
            .map(|(transform, pair)| {
                drive_transform(transform.as_mut(), pair[0].reader(), pair[1].writer(), &control, &stats)
            })
            .collect::<Vec<_>>();
        let source_writer = self.stop.first_link.writer();
        let sink_reader = self.last_link.reader();

        futures::future::join3(
            drive_source(self.source.as_mut(), source_writer, &control, &stats),
            futures::future::join_all(transform_drivers),
            drive_sink(self.sink.as_mut(), sink_reader, &control, &stats),
        )
        .await;

        let report = stats.report();
        let result = match control.take_failure() {
            Some(error) => Err(error),
            None => Ok(report),
        };

        match &result {
            Ok(report) => {
                info!(
                    produced = report.produced,
                    dropped = report.dropped,
                    flushed = report.flushed,
                    acknowledged = report.acknowledged,
                    stopped = report.stopped,
                    "pipeline: succeeded"
                );
                self.state.send_replace(PipelineState::Succeeded);
            }
            Err(error) => {
                warn!(error = %error, acknowledged = report.acknowledged, "pipeline: failed");
                self.state.send_replace(PipelineState::Failed);
            }
        }

        if let Some(callback) = self.on_complete.take() {
            callback(&result);
        }
        result
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline(mode={}, stages={}, state={})",
            self.mode,
            self.stage_count(),
            *self.state.borrow()
        )
    }
}

async fn drive_source(
    source: &mut dyn Source,
    writer: Writer,
    control: &RunControl,
    stats: &RunStats,
) {
    let name = source.config().name.clone();
    loop {
        match writer.reserve().await {
            Ok(()) => {}
            Err(LinkError::Stopped) => {
                info!(stage = %name, "source stopped");
                stats.stopped.store(true, Ordering::Relaxed);
                break;
            }
            Err(e) => {
                debug!(stage = %name, error = %e, "source halted");
                break;
            }
        }

        match source.produce().await {
            Ok(Some(unit)) => {
                RunStats::bump(&stats.produced);
                trace!(stage = %name, "produced");
                if let Err(e) = writer.send(unit).await {
                    if let LinkError::ModeMismatch { .. } = e {
                        control.fail(PipelineError::production(&name, e));
                    } else {
                        debug!(stage = %name, error = %e, "source halted");
                    }
                    break;
                }
            }
            Ok(None) => {
                debug!(stage = %name, "end of data");
                break;
            }
            Err(e) => {
                control.fail(PipelineError::production(&name, e));
                break;
            }
        }
    }
    source.close();
    writer.close();
}

async fn drive_transform(
    transform: &mut dyn Transform,
    mut reader: Reader,
    writer: Writer,
    control: &RunControl,
    stats: &RunStats,
) {
    let name = transform.config().name.clone();
    loop {
        let unit = match reader.recv().await {
            Ok(Some(unit)) => unit,
            Ok(None) => break,
            Err(e) => {
                debug!(stage = %name, error = %e, "transform halted");
                return;
            }
        };
        match transform.transform(unit).await {
            Ok(Some(out)) => {
                if let Err(e) = send_downstream(&writer, out, &name, control).await {
                    debug!(stage = %name, error = %e, "transform halted");
                    return;
                }
            }
            Ok(None) => {
                RunStats::bump(&stats.dropped);
                trace!(stage = %name, "dropped");
            }
            Err(e) => {
                control.fail(PipelineError::transform(&name, e));
                return;
            }
        }
        reader.release();
    }

    if control.is_failed() {
        return;
    }
    match transform.flush().await {
        Ok(Some(out)) => {
            RunStats::bump(&stats.flushed);
            if let Err(e) = send_downstream(&writer, out, &name, control).await {
                debug!(stage = %name, error = %e, "transform halted");
                return;
            }
        }
        Ok(None) => {}
        Err(e) => {
            control.fail(PipelineError::transform(&name, e));
            return;
        }
    }
    debug!(stage = %name, "drained");
    writer.close();
}

/// Send a transform output; a unit of the wrong mode fails the transform
async fn send_downstream(
    writer: &Writer,
    unit: DataUnit,
    name: &str,
    control: &RunControl,
) -> Result<(), LinkError> {
    let result = writer.send(unit).await;
    if let Err(e @ LinkError::ModeMismatch { .. }) = result {
        control.fail(PipelineError::transform(name, e));
    }
    result
}

async fn drive_sink(sink: &mut dyn Sink, mut reader: Reader, control: &RunControl, stats: &RunStats) {
    let name = sink.config().name.clone();
    loop {
        match reader.recv().await {
            Ok(Some(unit)) => match sink.consume(unit).await {
                Ok(()) => {
                    RunStats::bump(&stats.acknowledged);
                    trace!(stage = %name, "ack");
                    reader.release();
                }
                Err(e) => {
                    control.fail(PipelineError::consume(&name, e));
                    break;
                }
            },
            Ok(None) => {
                debug!(stage = %name, "drained");
                break;
            }
            Err(e) => {
                debug!(stage = %name, error = %e, "sink halted");
                break;
            }
        }
    }
}
