//! Task ledger: the record of which scan tasks exist and how they ended.
//!
//! The scan core only needs the [`TaskLedger`] signatures. [`JsonTaskLedger`]
//! is the bundled implementation, a single `tasks.json` document.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use super::json_store;
use crate::error::{ScanError, ScanResult};

/// Lifecycle of a scan task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Done,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        })
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTask {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub status: TaskStatus,
    /// Snapshot of the request that produced the task.
    pub config: serde_json::Value,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub point_count: usize,
}

/// Persistence calls the scan core makes about tasks.
pub trait TaskLedger: Send + Sync {
    fn create_task(
        &self,
        id: &str,
        name: &str,
        created_at: &str,
        status: TaskStatus,
        config: serde_json::Value,
        note: &str,
    ) -> ScanResult<()>;

    fn get_task(&self, id: &str) -> ScanResult<Option<ScanTask>>;

    fn count_points(&self, id: &str) -> ScanResult<usize>;

    fn update_status(&self, id: &str, status: TaskStatus) -> ScanResult<()>;

    fn set_point_count(&self, id: &str, count: usize) -> ScanResult<()>;

    /// Most recent first.
    fn list_tasks(&self, limit: usize) -> ScanResult<Vec<ScanTask>>;
}

/// `tasks.json`-backed ledger.
pub struct JsonTaskLedger {
    path: PathBuf,
    tasks: Mutex<Vec<ScanTask>>,
}

impl JsonTaskLedger {
    pub fn open(path: impl AsRef<Path>) -> ScanResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tasks: Vec<ScanTask> = json_store::load_or_default(&path)?;
        Ok(Self {
            path,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `edit` to a copy, persist it, and only then publish it.
    fn mutate<R>(&self, edit: impl FnOnce(&mut Vec<ScanTask>) -> ScanResult<R>) -> ScanResult<R> {
        let mut guard = self.tasks.lock();
        let mut next = guard.clone();
        let out = edit(&mut next)?;
        json_store::store(&self.path, &next)?;
        *guard = next;
        Ok(out)
    }
}

impl TaskLedger for JsonTaskLedger {
    fn create_task(
        &self,
        id: &str,
        name: &str,
        created_at: &str,
        status: TaskStatus,
        config: serde_json::Value,
        note: &str,
    ) -> ScanResult<()> {
        self.mutate(|tasks| {
            if tasks.iter().any(|t| t.id == id) {
                return Err(ScanError::Config(format!("task {id} already exists")));
            }
            tasks.push(ScanTask {
                id: id.to_string(),
                name: name.to_string(),
                created_at: created_at.to_string(),
                status,
                config,
                note: note.to_string(),
                point_count: 0,
            });
            Ok(())
        })?;
        info!(task_id = %id, name = %name, "ScanTask created");
        Ok(())
    }

    fn get_task(&self, id: &str) -> ScanResult<Option<ScanTask>> {
        Ok(self.tasks.lock().iter().find(|t| t.id == id).cloned())
    }

    fn count_points(&self, id: &str) -> ScanResult<usize> {
        self.get_task(id)?
            .map(|t| t.point_count)
            .ok_or_else(|| ScanError::TaskNotFound(id.to_string()))
    }

    fn update_status(&self, id: &str, status: TaskStatus) -> ScanResult<()> {
        self.mutate(|tasks| {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| ScanError::TaskNotFound(id.to_string()))?;
            task.status = status;
            Ok(())
        })?;
        info!(task_id = %id, status = %status, "ScanTask status updated");
        Ok(())
    }

    fn set_point_count(&self, id: &str, count: usize) -> ScanResult<()> {
        self.mutate(|tasks| {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| ScanError::TaskNotFound(id.to_string()))?;
            task.point_count = count;
            Ok(())
        })
    }

    fn list_tasks(&self, limit: usize) -> ScanResult<Vec<ScanTask>> {
        let tasks = self.tasks.lock();
        // Insertion order is creation order; newest first.
        Ok(tasks.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_update_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let ledger = JsonTaskLedger::open(&path).unwrap();

        ledger
            .create_task(
                "t1",
                "Scan 1",
                "2024-01-01 10:00:00",
                TaskStatus::Running,
                serde_json::json!({"step": 1.0}),
                "",
            )
            .unwrap();
        ledger.update_status("t1", TaskStatus::Done).unwrap();
        ledger.set_point_count("t1", 9).unwrap();

        let reopened = JsonTaskLedger::open(&path).unwrap();
        let task = reopened.get_task("t1").unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert_eq!(reopened.count_points("t1").unwrap(), 9);
        assert_eq!(task.config["step"], 1.0);
    }

    #[test]
    fn test_missing_task_errors() {
        let dir = tempdir().unwrap();
        let ledger = JsonTaskLedger::open(dir.path().join("tasks.json")).unwrap();
        assert!(ledger.get_task("x").unwrap().is_none());
        assert!(matches!(ledger.count_points("x"), Err(ScanError::TaskNotFound(_))));
        assert!(matches!(
            ledger.update_status("x", TaskStatus::Failed),
            Err(ScanError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected_and_list_newest_first() {
        let dir = tempdir().unwrap();
        let ledger = JsonTaskLedger::open(dir.path().join("tasks.json")).unwrap();
        for id in ["a", "b", "c"] {
            ledger
                .create_task(id, id, "now", TaskStatus::Running, serde_json::Value::Null, "")
                .unwrap();
        }
        assert!(ledger
            .create_task("a", "a", "now", TaskStatus::Running, serde_json::Value::Null, "")
            .is_err());

        let ids: Vec<_> = ledger.list_tasks(2).unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }
}
