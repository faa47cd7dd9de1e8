//! QueueController - drains the scan queue one item at a time.
//!
//! Items run strictly in FIFO order and never concurrently. Each item is
//! marked `running`, handed to a fresh [`ScanRunner`], and closed as `done`
//! or `failed` from the runner's outcome. A failed item does not stop the
//! drain; [`QueueController::halt`] does.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use super::ledger::TaskLedger;
use super::queue::{QueueItem, QueueStatus, ScanQueue};
use super::runner::{ScanControl, ScanEvent, ScanJob, ScanRunner, DEFAULT_PAUSE_POLL};
use crate::error::{ScanError, ScanResult};
use crate::hardware::{Instrument, MotionControl};

/// Per-run knobs shared by every item the controller executes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSettings {
    pub event_capacity: usize,
    pub pause_poll: Duration,
    pub point_timeout: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            pause_poll: DEFAULT_PAUSE_POLL,
            point_timeout: None,
        }
    }
}

/// Tally of one [`QueueController::run_all`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub done: usize,
    pub failed: usize,
}

struct ActiveScan {
    item_id: String,
    control: ScanControl,
}

pub struct QueueController {
    queue: Arc<ScanQueue>,
    motion: Arc<dyn MotionControl>,
    instrument: Arc<dyn Instrument>,
    scans_dir: PathBuf,
    ledger: Option<Arc<dyn TaskLedger>>,
    settings: RunSettings,
    active: Mutex<Option<ActiveScan>>,
    halted: AtomicBool,
}

impl QueueController {
    pub fn new(
        queue: Arc<ScanQueue>,
        motion: Arc<dyn MotionControl>,
        instrument: Arc<dyn Instrument>,
        scans_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue,
            motion,
            instrument,
            scans_dir: scans_dir.into(),
            ledger: None,
            settings: RunSettings::default(),
            active: Mutex::new(None),
            halted: AtomicBool::new(false),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn TaskLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn queue(&self) -> &Arc<ScanQueue> {
        &self.queue
    }

    /// Control handle of the scan in progress, with its queue item id.
    pub fn current(&self) -> Option<(String, ScanControl)> {
        self.active
            .lock()
            .as_ref()
            .map(|a| (a.item_id.clone(), a.control.clone()))
    }

    /// Stop the running item; the drain moves on to the next one.
    pub fn stop_current(&self) -> bool {
        match self.current() {
            Some((_, control)) => {
                control.request_stop();
                true
            }
            None => false,
        }
    }

    /// Pause or resume the running item.
    pub fn pause_current(&self, on: bool) -> bool {
        match self.current() {
            Some((_, control)) => {
                control.request_pause(on);
                true
            }
            None => false,
        }
    }

    /// Stop the running item and do not start another.
    ///
    /// A halt requested while no drain is active makes the next
    /// [`QueueController::run_all`] return without starting anything.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.stop_current();
    }

    /// Run queued items until none are left or the controller is halted.
    ///
    /// Every runner event is forwarded to `observer` tagged with its item id.
    pub async fn run_all(
        &self,
        observer: Option<mpsc::Sender<(String, ScanEvent)>>,
    ) -> ScanResult<DrainSummary> {
        let mut summary = DrainSummary::default();
        let drained = async {
            while !self.halted.load(Ordering::SeqCst) {
                let Some(item) = self.queue.next_queued() else {
                    break;
                };
                if self.run_item(item, observer.as_ref()).await? {
                    summary.done += 1;
                } else {
                    summary.failed += 1;
                }
            }
            Ok::<_, ScanError>(())
        }
        .await;
        if self.halted.swap(false, Ordering::SeqCst) {
            info!("Queue halted");
        }
        drained?;
        info!(done = summary.done, failed = summary.failed, "Queue drained");
        Ok(summary)
    }

    /// Execute one item. Returns whether it finished `done`.
    async fn run_item(
        &self,
        item: QueueItem,
        observer: Option<&mpsc::Sender<(String, ScanEvent)>>,
    ) -> ScanResult<bool> {
        let id = item.id;
        let job = ScanJob::new(item.params, item.trace_list, self.scans_dir.clone());
        if let Err(e) = job.validate() {
            warn!(item_id = %id, error = %e, "Queue item rejected");
            self.queue
                .update_status(&id, QueueStatus::Failed, &e.to_string())?;
            return Ok(false);
        }

        self.queue.update_status(&id, QueueStatus::Running, "")?;
        self.queue.bind_task(&id, &job.task_id)?;
        info!(item_id = %id, task_id = %job.task_id, "Queue item started");

        let mut runner = ScanRunner::new(job, self.motion.clone(), self.instrument.clone())
            .with_pause_poll(self.settings.pause_poll)
            .with_point_timeout(self.settings.point_timeout);
        if let Some(ledger) = &self.ledger {
            runner = runner.with_ledger(ledger.clone());
        }
        *self.active.lock() = Some(ActiveScan {
            item_id: id.clone(),
            control: runner.control(),
        });
        if self.halted.load(Ordering::SeqCst) {
            runner.control().request_stop();
        }

        let mut handle = runner.spawn(self.settings.event_capacity);
        while let Some(event) = handle.events.recv().await {
            if let Some(tx) = observer {
                let _ = tx.send((id.clone(), event)).await;
            }
        }
        let outcome = handle.wait().await;
        *self.active.lock() = None;

        let (ok, message) = match outcome {
            Ok(outcome) => (outcome.ok, outcome.message),
            Err(e) => (false, e.to_string()),
        };
        let status = if ok {
            QueueStatus::Done
        } else {
            QueueStatus::Failed
        };
        self.queue.update_status(&id, status, &message)?;
        info!(item_id = %id, status = %status, "Queue item finished");
        Ok(ok)
    }
}
