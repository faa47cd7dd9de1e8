//! ScanRunner - state machine for one raster acquisition.
//!
//! The runner drives the scan head over the grid, samples every requested
//! trace at each point and persists the resulting grids. It runs on its own
//! tokio task; the controller talks to it only through a [`ScanControl`]
//! (pause/stop flags) and listens on an ordered [`ScanEvent`] channel.
//!
//! # State Machine
//!
//! ```text
//! ┌────────────┐   ┌────────┐   ┌──────────┐   ┌────────┐   ┌──────────────┐
//! │ Connecting │──▶│ Homing │──▶│ Scanning │──▶│ Saving │──▶│ Finished(ok) │
//! └────────────┘   └────────┘   └───┬──▲───┘   └────────┘   └──────────────┘
//!       │               │   pause() │  │ resume()                  ▲
//!       │               │           ▼  │                           │
//!       │               │         ┌────┴───┐                       │
//!       │               │         │ Paused │                       │
//!       │               │         └────────┘                       │
//!       └───────────────┴──── error / stop ───────────────── Finished(failed)
//! ```
//!
//! Stop is cooperative: the flag is checked before every motion command and
//! surfaces as [`ScanError::UserStopped`], which is reported as an ordinary
//! failure. Whatever the outcome, both drivers are disconnected before the
//! single `Finished` event is sent.
//!
//! # Usage
//!
//! ```rust,ignore
//! let job = ScanJob::new(params, traces, scans_dir);
//! let mut handle = ScanRunner::new(job, motion, instrument).spawn(256);
//!
//! while let Some(event) = handle.events.recv().await {
//!     match event {
//!         ScanEvent::Progress { done, total } => println!("{done}/{total}"),
//!         ScanEvent::Status(text) => println!("{text}"),
//!         ScanEvent::Finished { ok, message, .. } => println!("{ok} {message}"),
//!     }
//! }
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, info_span, warn, Instrument as _};
use uuid::Uuid;

use super::ledger::{TaskLedger, TaskStatus};
use super::params::{ScanParams, TraceInfo};
use super::task_files::{now_timestamp, ScanManifest, TaskDir};
use super::trace_store::{sanitize_trace_name, TraceGrid};
use crate::error::{ScanError, ScanResult};
use crate::hardware::{Instrument, MotionControl};

/// Progress is reported every this many completed points (and on the last one).
pub const PROGRESS_EVERY: usize = 5;

/// Default interval between pause-flag polls.
pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_millis(50);

/// Where the runner currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Created, not started
    Idle,
    Connecting,
    Homing,
    Scanning,
    /// Holding between points until resumed or stopped
    Paused,
    Saving,
    Finished { ok: bool },
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Connecting => write!(f, "connecting"),
            ScanState::Homing => write!(f, "homing"),
            ScanState::Scanning => write!(f, "scanning"),
            ScanState::Paused => write!(f, "paused"),
            ScanState::Saving => write!(f, "saving"),
            ScanState::Finished { ok: true } => write!(f, "finished"),
            ScanState::Finished { ok: false } => write!(f, "failed"),
        }
    }
}

/// Notification emitted by a running scan, delivered in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Progress { done: usize, total: usize },
    Status(String),
    Finished {
        task_id: String,
        ok: bool,
        message: String,
    },
}

struct ControlInner {
    stop: AtomicBool,
    pause: AtomicBool,
    state: RwLock<ScanState>,
}

/// Controller-side handle on a run: pause/stop requests and state queries.
///
/// Cloneable and safe to use from any thread.
#[derive(Clone)]
pub struct ScanControl {
    inner: Arc<ControlInner>,
}

impl Default for ScanControl {
    fn default() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                stop: AtomicBool::new(false),
                pause: AtomicBool::new(false),
                state: RwLock::new(ScanState::Idle),
            }),
        }
    }
}

impl fmt::Debug for ScanControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanControl")
            .field("stop", &self.is_stopped())
            .field("pause", &self.is_paused())
            .field("state", &self.state())
            .finish()
    }
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop before its next motion command.
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.inner.stop.store(true, Ordering::SeqCst);
    }

    /// Hold (`true`) or release (`false`) the run between points.
    pub fn request_pause(&self, on: bool) {
        info!(pause = on, "Pause toggled");
        self.inner.pause.store(on, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pause.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ScanState {
        *self.inner.state.read()
    }

    fn set_state(&self, state: ScanState) {
        *self.inner.state.write() = state;
    }
}

/// What to scan and where to put it.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub task_id: String,
    pub task_name: String,
    pub scans_dir: PathBuf,
    pub params: ScanParams,
    pub traces: Vec<TraceInfo>,
}

impl ScanJob {
    /// A job with a fresh task id and a timestamped name.
    pub fn new(params: ScanParams, traces: Vec<TraceInfo>, scans_dir: impl Into<PathBuf>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_name: format!("Scan {}", now_timestamp()),
            scans_dir: scans_dir.into(),
            params,
            traces,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = name.into();
        self
    }

    /// Reject jobs that cannot even start.
    ///
    /// Every trace must map to its own bundle file, so names that are equal
    /// or sanitise to the same key are refused.
    pub fn validate(&self) -> ScanResult<()> {
        self.params.validate()?;
        if self.traces.is_empty() {
            return Err(ScanError::InvalidParams("no traces selected".to_string()));
        }
        let mut keys: HashMap<String, &str> = HashMap::with_capacity(self.traces.len());
        for trace in &self.traces {
            let key = sanitize_trace_name(&trace.name);
            if let Some(first) = keys.insert(key.clone(), &trace.name) {
                let detail = if first == trace.name {
                    format!("trace '{first}' selected twice")
                } else {
                    format!("traces '{first}' and '{}' both store as '{key}'", trace.name)
                };
                return Err(ScanError::InvalidParams(detail));
            }
        }
        Ok(())
    }

    pub fn task_dir(&self) -> TaskDir {
        TaskDir::locate(&self.scans_dir, &self.task_id)
    }
}

/// Result of one run, mirroring the `Finished` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub task_id: String,
    pub ok: bool,
    pub message: String,
}

/// A spawned run.
pub struct ScanHandle {
    pub task_id: String,
    pub control: ScanControl,
    pub events: mpsc::Receiver<ScanEvent>,
    join: JoinHandle<ScanOutcome>,
}

impl ScanHandle {
    /// Drain every remaining event, then wait for the task.
    pub async fn finish(mut self) -> ScanResult<(Vec<ScanEvent>, ScanOutcome)> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let outcome = self.wait().await?;
        Ok((events, outcome))
    }

    /// Wait for the task, discarding undelivered events.
    pub async fn wait(self) -> ScanResult<ScanOutcome> {
        drop(self.events);
        self.join
            .await
            .map_err(|e| ScanError::Acquisition(format!("scan task aborted: {e}")))
    }
}

struct EventSink {
    tx: mpsc::Sender<ScanEvent>,
}

impl EventSink {
    async fn emit(&self, event: ScanEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("Scan event dropped: no listener");
        }
    }

    async fn status(&self, text: &str) {
        self.emit(ScanEvent::Status(text.to_string())).await;
    }

    /// Heartbeat that must never stall the worker.
    fn try_status(&self, text: &str) {
        let _ = self.tx.try_send(ScanEvent::Status(text.to_string()));
    }
}

fn driver_err(op: &'static str) -> impl FnOnce(anyhow::Error) -> ScanError {
    move |e| ScanError::Acquisition(format!("{op}: {e:#}"))
}

/// Executes one [`ScanJob`] against injected drivers.
pub struct ScanRunner {
    job: ScanJob,
    motion: Arc<dyn MotionControl>,
    instrument: Arc<dyn Instrument>,
    control: ScanControl,
    ledger: Option<Arc<dyn TaskLedger>>,
    pause_poll: Duration,
    point_timeout: Option<Duration>,
}

impl ScanRunner {
    pub fn new(
        job: ScanJob,
        motion: Arc<dyn MotionControl>,
        instrument: Arc<dyn Instrument>,
    ) -> Self {
        Self {
            job,
            motion,
            instrument,
            control: ScanControl::new(),
            ledger: None,
            pause_poll: DEFAULT_PAUSE_POLL,
            point_timeout: None,
        }
    }

    /// Record the task in `ledger` (created `running`, flipped at the end).
    pub fn with_ledger(mut self, ledger: Arc<dyn TaskLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Use an externally created control handle.
    pub fn with_control(mut self, control: ScanControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_pause_poll(mut self, interval: Duration) -> Self {
        self.pause_poll = interval;
        self
    }

    /// Fail a point whose measurement takes longer than `limit`.
    pub fn with_point_timeout(mut self, limit: Option<Duration>) -> Self {
        self.point_timeout = limit;
        self
    }

    pub fn control(&self) -> ScanControl {
        self.control.clone()
    }

    pub fn job(&self) -> &ScanJob {
        &self.job
    }

    /// Run on a new tokio task with an event buffer of `capacity`.
    pub fn spawn(self, capacity: usize) -> ScanHandle {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task_id = self.job.task_id.clone();
        let control = self.control.clone();
        let join = tokio::spawn(self.run(tx));
        ScanHandle {
            task_id,
            control,
            events: rx,
            join,
        }
    }

    /// Run to completion on the current task, emitting on `events`.
    pub async fn run(self, events: mpsc::Sender<ScanEvent>) -> ScanOutcome {
        let span = info_span!("scan", task_id = %self.job.task_id);
        self.run_inner(EventSink { tx: events }).instrument(span).await
    }

    async fn run_inner(self, sink: EventSink) -> ScanOutcome {
        let job = &self.job;
        info!(
            name = %job.task_name,
            traces = job.traces.len(),
            points = job.params.point_count(),
            "Scan starting"
        );
        let (registered, result) = match job.validate() {
            Ok(()) => (self.register_task(), self.execute(&sink).await),
            Err(e) => (false, Err(e)),
        };
        self.disconnect_all().await;

        let (ok, message) = match &result {
            Ok(points) => {
                info!(points, "Scan finished");
                (true, "OK".to_string())
            }
            Err(e) if e.is_user_stop() => {
                warn!("Scan stopped by user");
                (false, e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Scan failed");
                (false, e.to_string())
            }
        };
        self.control.set_state(ScanState::Finished { ok });
        if registered {
            self.close_task(result.as_ref().ok().copied());
        }

        let outcome = ScanOutcome {
            task_id: job.task_id.clone(),
            ok,
            message,
        };
        sink.emit(ScanEvent::Finished {
            task_id: outcome.task_id.clone(),
            ok: outcome.ok,
            message: outcome.message.clone(),
        })
        .await;
        outcome
    }

    /// Connect, home, sweep and save. Returns the number of points sampled.
    async fn execute(&self, sink: &EventSink) -> ScanResult<usize> {
        let job = &self.job;
        let params = &job.params;

        let task_dir = TaskDir::create(&job.scans_dir, &job.task_id)?;
        let xs = params.xs();
        let ys = params.ys();
        let total = xs.len() * ys.len();

        let mut grids: Vec<TraceGrid> = job
            .traces
            .iter()
            .map(|t| {
                TraceGrid::filled(
                    t.name.clone(),
                    t.unit_or_default(),
                    xs.clone(),
                    ys.clone(),
                    vec![params.freq],
                    0.0,
                )
            })
            .collect();

        self.control.set_state(ScanState::Connecting);
        sink.status("Connecting drivers...").await;
        self.motion.connect().await.map_err(driver_err("motion connect"))?;
        self.instrument
            .connect()
            .await
            .map_err(driver_err("instrument connect"))?;
        self.instrument
            .set_frequency(params.freq)
            .await
            .map_err(driver_err("set_frequency"))?;

        self.check_stop()?;
        self.control.set_state(ScanState::Homing);
        sink.status("Homing...").await;
        self.motion.home().await.map_err(driver_err("home"))?;

        self.control.set_state(ScanState::Scanning);
        sink.status("Scanning...").await;
        let mut done = 0usize;
        for (iy, &y) in ys.iter().enumerate() {
            for (ix, &x) in xs.iter().enumerate() {
                self.check_stop()?;
                self.hold_while_paused(sink).await?;

                self.motion
                    .move_to(x, y, params.z_height, params.feed)
                    .await
                    .map_err(driver_err("move_to"))?;

                for (grid, trace) in grids.iter_mut().zip(&job.traces) {
                    let value = self.measure(&trace.name).await?;
                    grid.set(iy, ix, 0, value);
                }

                done += 1;
                if done % PROGRESS_EVERY == 0 || done == total {
                    sink.emit(ScanEvent::Progress { done, total }).await;
                }
            }
        }

        self.control.set_state(ScanState::Saving);
        sink.status("Saving...").await;
        let store = task_dir.trace_store()?;
        for grid in &grids {
            store.save(grid)?;
        }
        let manifest = ScanManifest::new(
            job.task_id.clone(),
            job.task_name.clone(),
            *params,
            job.traces.clone(),
        );
        task_dir.write_manifest(&manifest)?;
        Ok(total)
    }

    fn check_stop(&self) -> ScanResult<()> {
        if self.control.is_stopped() {
            Err(ScanError::UserStopped)
        } else {
            Ok(())
        }
    }

    /// Block between points while paused, re-announcing "Paused" each poll.
    async fn hold_while_paused(&self, sink: &EventSink) -> ScanResult<()> {
        if !self.control.is_paused() {
            return Ok(());
        }
        self.control.set_state(ScanState::Paused);
        info!("Scan paused");
        while self.control.is_paused() && !self.control.is_stopped() {
            sink.try_status("Paused");
            sleep(self.pause_poll).await;
        }
        self.check_stop()?;
        info!("Scan resumed");
        self.control.set_state(ScanState::Scanning);
        sink.status("Scanning...").await;
        Ok(())
    }

    async fn measure(&self, trace_name: &str) -> ScanResult<f64> {
        let read = self.instrument.measure_trace_point(trace_name);
        let value = match self.point_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| ScanError::PointTimeout(trace_name.to_string()))?,
            None => read.await,
        };
        value.map_err(driver_err("measure_trace_point"))
    }

    /// Best-effort: errors are logged and dropped.
    async fn disconnect_all(&self) {
        if let Err(e) = self.motion.disconnect().await {
            debug!(error = %e, "Motion disconnect failed (ignored)");
        }
        if let Err(e) = self.instrument.disconnect().await {
            debug!(error = %e, "Instrument disconnect failed (ignored)");
        }
    }

    /// Record the task as `running`. Returns whether a ledger row exists.
    fn register_task(&self) -> bool {
        let Some(ledger) = &self.ledger else {
            return false;
        };
        let job = &self.job;
        let config = serde_json::json!({
            "params": job.params,
            "trace_list": job.traces,
        });
        if let Err(e) = ledger.create_task(
            &job.task_id,
            &job.task_name,
            &now_timestamp(),
            TaskStatus::Running,
            config,
            "",
        ) {
            warn!(error = %e, "Could not record task in ledger");
            return false;
        }
        true
    }

    fn close_task(&self, points: Option<usize>) {
        let Some(ledger) = &self.ledger else { return };
        let id = &self.job.task_id;
        let status = if points.is_some() {
            TaskStatus::Done
        } else {
            TaskStatus::Failed
        };
        if let Err(e) = ledger.update_status(id, status) {
            warn!(error = %e, "Could not update task status in ledger");
        }
        if let Some(n) = points {
            if let Err(e) = ledger.set_point_count(id, n) {
                warn!(error = %e, "Could not record point count in ledger");
            }
        }
    }
}
