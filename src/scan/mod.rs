//! Scan core: parameters, the acquisition runner, persistence and the queue.

pub mod controller;
pub mod json_store;
pub mod ledger;
pub mod params;
pub mod queue;
pub mod runner;
pub mod task_files;
pub mod trace_store;

pub use controller::{DrainSummary, QueueController, RunSettings};
pub use ledger::{JsonTaskLedger, ScanTask, TaskLedger, TaskStatus};
pub use params::{ScanParams, TraceInfo};
pub use queue::{QueueItem, QueueStatus, ScanQueue};
pub use runner::{ScanControl, ScanEvent, ScanHandle, ScanJob, ScanOutcome, ScanRunner, ScanState};
pub use task_files::{ScanManifest, TaskDir};
pub use trace_store::{TraceGrid, TraceStore};
