//! On-disk layout of one scan task and its manifest.
//!
//! ```text
//! <scans_dir>/<task_id>/
//!     meta.json        manifest, written last on success
//!     traces/*.grid    one bundle per trace
//!     exports/         CSV / PNG exports, regenerable
//! ```

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::params::{ScanParams, TraceInfo};
use super::trace_store::{sanitize_trace_name, TraceStore};
use crate::error::{ScanError, ScanResult};

/// Manifest file name inside a task directory.
pub const MANIFEST_FILE: &str = "meta.json";

/// Timestamp format used in manifests and ledger records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Structured record describing a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanManifest {
    pub task_id: String,
    pub task_name: String,
    pub params: ScanParams,
    pub trace_list: Vec<TraceInfo>,
    pub generated_at: String,
}

impl ScanManifest {
    pub fn new(
        task_id: impl Into<String>,
        task_name: impl Into<String>,
        params: ScanParams,
        trace_list: Vec<TraceInfo>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_name: task_name.into(),
            params,
            trace_list,
            generated_at: now_timestamp(),
        }
    }

    pub fn trace_names(&self) -> impl Iterator<Item = &str> {
        self.trace_list.iter().map(|t| t.name.as_str())
    }
}

/// Handle on `<scans_dir>/<task_id>`.
#[derive(Debug, Clone)]
pub struct TaskDir {
    task_id: String,
    root: PathBuf,
}

impl TaskDir {
    /// Path of a task directory without touching the filesystem.
    pub fn locate(scans_dir: impl AsRef<Path>, task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            root: scans_dir.as_ref().join(task_id),
        }
    }

    /// Create the task directory with its `traces/` and `exports/` children.
    pub fn create(scans_dir: impl AsRef<Path>, task_id: &str) -> ScanResult<Self> {
        let dir = Self::locate(scans_dir, task_id);
        fs::create_dir_all(dir.traces_dir())?;
        fs::create_dir_all(dir.exports_dir())?;
        Ok(dir)
    }

    /// Open an existing task directory.
    pub fn open(scans_dir: impl AsRef<Path>, task_id: &str) -> ScanResult<Self> {
        let dir = Self::locate(scans_dir, task_id);
        if !dir.root.is_dir() {
            return Err(ScanError::TaskNotFound(task_id.to_string()));
        }
        Ok(dir)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn traces_dir(&self) -> PathBuf {
        self.root.join("traces")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Whether the scan finished and wrote its manifest.
    pub fn is_complete(&self) -> bool {
        self.manifest_path().is_file() && self.traces_dir().is_dir()
    }

    pub fn trace_store(&self) -> ScanResult<TraceStore> {
        TraceStore::open(&self.root)
    }

    /// Write `meta.json` (pretty JSON, overwriting).
    pub fn write_manifest(&self, manifest: &ScanManifest) -> ScanResult<PathBuf> {
        let path = self.manifest_path();
        let json = serde_json::to_string_pretty(manifest)?;
        fs::write(&path, json)?;
        info!(task_id = %self.task_id, path = %path.display(), "Manifest written");
        Ok(path)
    }

    pub fn read_manifest(&self) -> ScanResult<ScanManifest> {
        let path = self.manifest_path();
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScanError::TaskNotFound(self.task_id.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&json)?)
    }

    /// `exports/points_<trace>.csv`
    pub fn csv_export_path(&self, trace_name: &str) -> PathBuf {
        self.exports_dir()
            .join(format!("points_{}.csv", sanitize_trace_name(trace_name)))
    }

    /// `exports/heatmap_<trace>.png`
    pub fn png_export_path(&self, trace_name: &str) -> PathBuf {
        self.exports_dir()
            .join(format!("heatmap_{}.png", sanitize_trace_name(trace_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_layout_and_manifest_roundtrip() {
        let scans = tempdir().unwrap();
        let dir = TaskDir::create(scans.path(), "task-1").unwrap();
        assert!(dir.traces_dir().is_dir());
        assert!(dir.exports_dir().is_dir());
        assert!(!dir.is_complete());

        let manifest = ScanManifest::new(
            "task-1",
            "Scan A",
            ScanParams::default(),
            vec![TraceInfo::new("T1").with_kind("S21")],
        );
        dir.write_manifest(&manifest).unwrap();

        assert!(dir.is_complete());
        let loaded = TaskDir::open(scans.path(), "task-1")
            .unwrap()
            .read_manifest()
            .unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.trace_names().collect::<Vec<_>>(), vec!["T1"]);
    }

    #[test]
    fn test_manifest_json_field_names() {
        let manifest = ScanManifest::new("id", "n", ScanParams::default(), vec![]);
        let value = serde_json::to_value(&manifest).unwrap();
        for key in ["task_id", "task_name", "params", "trace_list", "generated_at"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_missing_task_dir() {
        let scans = tempdir().unwrap();
        assert!(matches!(
            TaskDir::open(scans.path(), "nope"),
            Err(ScanError::TaskNotFound(_))
        ));
        let dir = TaskDir::create(scans.path(), "empty").unwrap();
        assert!(matches!(dir.read_manifest(), Err(ScanError::TaskNotFound(_))));
    }

    #[test]
    fn test_export_paths_are_sanitized() {
        let dir = TaskDir::locate("/data/scans", "t");
        assert!(dir
            .csv_export_path("Trc 1")
            .ends_with("t/exports/points_Trc_1.csv"));
        assert!(dir.png_export_path("a/b").ends_with("t/exports/heatmap_a_b.png"));
    }
}
