//! Serial scan queue.
//!
//! A persisted FIFO of scan requests. Only one item executes at a time: the
//! controller pulls [`ScanQueue::next_queued`], marks it `running`, runs it,
//! and records the outcome before pulling again.
//!
//! # Lifecycle
//!
//! ```text
//!            ┌──────────┐
//!  add() ───▶│  queued  │──────────────┬───────────┬──────────┐
//!            └────┬─────┘              │           │          │
//!                 │ start              │ skip()    │ cancel() │ cannot start
//!                 ▼                    ▼           ▼          ▼
//!            ┌──────────┐         ┌─────────┐ ┌──────────┐ ┌────────┐
//!            │ running  │────────▶│  done   │ │ skipped  │ │ failed │
//!            └────┬─────┘         └─────────┘ └──────────┘ └────────┘
//!                 └──── failed / canceled
//! ```
//!
//! No status ever returns to `queued`, and a `running` item cannot be deleted.
//!
//! The whole queue is one JSON document. Every mutation is applied to a copy,
//! written to disk, and only then published, so a failed write leaves the
//! queue exactly as it was.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use super::json_store;
use super::params::{ScanParams, TraceInfo};
use crate::error::{ScanError, ScanResult};

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Running,
    Done,
    Failed,
    Skipped,
    Canceled,
}

impl QueueStatus {
    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: QueueStatus) -> bool {
        use QueueStatus::*;
        matches!(
            (self, next),
            (Queued, Running | Failed | Skipped | Canceled) | (Running, Done | Failed | Canceled)
        )
    }

    /// No further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueStatus::Done | QueueStatus::Failed | QueueStatus::Skipped | QueueStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Running => "running",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
            QueueStatus::Skipped => "skipped",
            QueueStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(QueueStatus::Queued),
            "running" => Ok(QueueStatus::Running),
            "done" => Ok(QueueStatus::Done),
            "failed" => Ok(QueueStatus::Failed),
            "skipped" => Ok(QueueStatus::Skipped),
            "canceled" | "cancelled" => Ok(QueueStatus::Canceled),
            other => Err(ScanError::Config(format!("unknown queue status '{other}'"))),
        }
    }
}

/// One scan request in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    /// Monotonic creation sequence; the FIFO key.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub params: ScanParams,
    pub trace_list: Vec<TraceInfo>,
    /// Task produced by executing this item.
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    next_seq: u64,
    items: Vec<QueueItem>,
}

/// Persisted FIFO of [`QueueItem`]s.
pub struct ScanQueue {
    path: PathBuf,
    doc: Mutex<QueueDocument>,
}

impl ScanQueue {
    /// Open (or start) the queue document at `path`.
    pub fn open(path: impl AsRef<Path>) -> ScanResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut doc: QueueDocument = json_store::load_or_default(&path)?;
        doc.items.sort_by_key(|item| item.seq);
        let max_seq = doc.items.iter().map(|i| i.seq + 1).max().unwrap_or(0);
        doc.next_seq = doc.next_seq.max(max_seq);

        let stale = doc
            .items
            .iter()
            .filter(|i| i.status == QueueStatus::Running)
            .count();
        if stale > 0 {
            warn!(count = stale, "Queue has items left in 'running' from a previous session");
        }

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<R>(&self, edit: impl FnOnce(&mut QueueDocument) -> ScanResult<R>) -> ScanResult<R> {
        let mut guard = self.doc.lock();
        let mut next = QueueDocument {
            next_seq: guard.next_seq,
            items: guard.items.clone(),
        };
        let out = edit(&mut next)?;
        json_store::store(&self.path, &next)?;
        *guard = next;
        Ok(out)
    }

    /// Append a new `queued` item with a generated id.
    pub fn add(&self, params: ScanParams, trace_list: Vec<TraceInfo>) -> ScanResult<String> {
        let id = Uuid::new_v4().to_string();
        self.add_with_id(&id, params, trace_list)?;
        Ok(id)
    }

    /// Append a new `queued` item with a caller-chosen id.
    pub fn add_with_id(
        &self,
        id: &str,
        params: ScanParams,
        trace_list: Vec<TraceInfo>,
    ) -> ScanResult<()> {
        self.mutate(|doc| {
            if doc.items.iter().any(|i| i.id == id) {
                return Err(ScanError::Config(format!("queue item {id} already exists")));
            }
            let seq = doc.next_seq;
            doc.next_seq += 1;
            doc.items.push(QueueItem {
                id: id.to_string(),
                seq,
                created_at: Utc::now(),
                status: QueueStatus::Queued,
                params,
                trace_list,
                task_id: None,
                message: String::new(),
            });
            Ok(())
        })?;
        info!(item_id = %id, "Scan queued");
        Ok(())
    }

    /// The first `limit` items in creation order.
    pub fn list(&self, limit: usize) -> Vec<QueueItem> {
        self.doc.lock().items.iter().take(limit).cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.doc.lock().items.iter().find(|i| i.id == id).cloned()
    }

    /// Oldest item still in `queued`, if any.
    pub fn next_queued(&self) -> Option<QueueItem> {
        self.doc
            .lock()
            .items
            .iter()
            .filter(|i| i.status == QueueStatus::Queued)
            .min_by_key(|i| i.seq)
            .cloned()
    }

    /// Number of items per status, in lifecycle order.
    pub fn counts(&self) -> Vec<(QueueStatus, usize)> {
        use QueueStatus::*;
        let doc = self.doc.lock();
        [Queued, Running, Done, Failed, Skipped, Canceled]
            .into_iter()
            .map(|s| (s, doc.items.iter().filter(|i| i.status == s).count()))
            .collect()
    }

    /// Move one item to `status`, recording `message`.
    pub fn update_status(&self, id: &str, status: QueueStatus, message: &str) -> ScanResult<()> {
        self.bulk_update(&[id], status, message)
    }

    /// Move every item in `ids` to `status`. Either all move or none do.
    pub fn bulk_update<S: AsRef<str>>(
        &self,
        ids: &[S],
        status: QueueStatus,
        message: &str,
    ) -> ScanResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let wanted: HashSet<&str> = ids.iter().map(|s| s.as_ref()).collect();
        self.mutate(|doc| {
            for id in &wanted {
                let item = doc
                    .items
                    .iter()
                    .find(|i| i.id == *id)
                    .ok_or_else(|| ScanError::QueueItemNotFound(id.to_string()))?;
                if !item.status.can_transition_to(status) {
                    return Err(ScanError::InvalidTransition {
                        id: id.to_string(),
                        from: item.status.to_string(),
                        to: status.to_string(),
                    });
                }
            }
            for item in doc.items.iter_mut().filter(|i| wanted.contains(i.id.as_str())) {
                item.status = status;
                item.message = message.to_string();
            }
            Ok(())
        })?;
        info!(count = wanted.len(), status = %status, "Queue status updated");
        Ok(())
    }

    /// Record the task produced by an item.
    pub fn bind_task(&self, id: &str, task_id: &str) -> ScanResult<()> {
        self.mutate(|doc| {
            let item = doc
                .items
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or_else(|| ScanError::QueueItemNotFound(id.to_string()))?;
            item.task_id = Some(task_id.to_string());
            Ok(())
        })
    }

    /// Mark a waiting item `skipped`.
    pub fn skip(&self, id: &str) -> ScanResult<()> {
        self.update_status(id, QueueStatus::Skipped, "skipped by user")
    }

    /// Mark an item `canceled`.
    pub fn cancel(&self, id: &str) -> ScanResult<()> {
        self.update_status(id, QueueStatus::Canceled, "canceled by user")
    }

    /// Remove an item. Rejected while it is `running`.
    pub fn delete(&self, id: &str) -> ScanResult<()> {
        self.mutate(|doc| {
            let pos = doc
                .items
                .iter()
                .position(|i| i.id == id)
                .ok_or_else(|| ScanError::QueueItemNotFound(id.to_string()))?;
            if doc.items[pos].status == QueueStatus::Running {
                return Err(ScanError::QueueItemRunning(id.to_string()));
            }
            doc.items.remove(pos);
            Ok(())
        })?;
        info!(item_id = %id, "Queue item deleted");
        Ok(())
    }
}
