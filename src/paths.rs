//! Application home and directory layout.
//!
//! ```text
//! <home>/
//!     config/config.toml   user configuration
//!     config/colormaps/    extra LUT definitions (*.json)
//!     logs/
//!     data/queue.json      scan queue
//!     data/tasks.json      task ledger
//!     data/scans/<task>/   per-task results
//!     exports/
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ScanResult;

pub const APP_NAME: &str = "NFSScanner";

/// Overrides the default home when set.
pub const HOME_ENV: &str = "NFS_APP_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub home: PathBuf,
    pub config: PathBuf,
    pub logs: PathBuf,
    pub data: PathBuf,
    pub scans: PathBuf,
    pub exports: PathBuf,
}

impl AppPaths {
    /// `$NFS_APP_HOME`, else `<platform data dir>/NFSScanner`.
    pub fn default_home() -> PathBuf {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(home);
        }
        dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
    }

    /// Layout under `home`, or under [`AppPaths::default_home`].
    pub fn resolve(home: Option<&Path>) -> Self {
        Self::from_home(home.map_or_else(Self::default_home, Path::to_path_buf))
    }

    pub fn from_home(home: PathBuf) -> Self {
        let data = home.join("data");
        Self {
            config: home.join("config"),
            logs: home.join("logs"),
            scans: data.join("scans"),
            exports: home.join("exports"),
            data,
            home,
        }
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> ScanResult<()> {
        for dir in [
            &self.home,
            &self.config,
            &self.logs,
            &self.data,
            &self.scans,
            &self.exports,
        ] {
            fs::create_dir_all(dir)?;
        }
        debug!(home = %self.home.display(), "App directories ready");
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    pub fn colormaps_dir(&self) -> PathBuf {
        self.config.join("colormaps")
    }

    pub fn queue_file(&self) -> PathBuf {
        self.data.join("queue.json")
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.data.join("tasks.json")
    }
}
