//! Configuration System using Figment
//!
//! Strongly-typed configuration for the scanner. Layers, later wins:
//! 1. Built-in defaults
//! 2. A TOML file (usually `<home>/config/config.toml`)
//! 3. Environment variables prefixed with `NFS_SCANNER_`, nested keys
//!    separated by `__` (e.g. `NFS_SCANNER_VISUALIZATION__LUT=turbo`)
//!
//! # Example
//! ```no_run
//! use nfs_scanner::config::ScannerConfig;
//!
//! let config = ScannerConfig::load_from("config.toml")?;
//! println!("LUT: {}", config.visualization.lut);
//! # Ok::<(), nfs_scanner::error::ScanError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

use crate::error::{ScanError, ScanResult};
use crate::logging::{OutputFormat, LOG_LEVELS};
use crate::render::RenderOptions;
use crate::scan::{RunSettings, ScanParams};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NFS_SCANNER_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub application: ApplicationConfig,
    pub storage: StorageConfig,
    pub scan: ScanConfig,
    pub visualization: VisualizationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "NFS Scanner".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

/// Where data lives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Application home; unset means `$NFS_APP_HOME` or the platform data dir.
    pub home: Option<PathBuf>,
}

/// Acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Buffered scan events before the runner waits for the listener
    pub event_capacity: usize,
    pub pause_poll_ms: u64,
    /// Per-point measurement limit; unset means wait indefinitely
    pub point_timeout_ms: Option<u64>,
    /// Parameters used when a request does not give its own
    pub defaults: ScanParams,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            pause_poll_ms: 50,
            point_timeout_ms: None,
            defaults: ScanParams::default(),
        }
    }
}

impl ScanConfig {
    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            event_capacity: self.event_capacity,
            pause_poll: Duration::from_millis(self.pause_poll_ms),
            point_timeout: self.point_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Heatmap display and export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub lut: String,
    pub opacity: f64,
    pub autoscale: bool,
    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
    /// Extra `*.json` LUT definitions
    pub lut_dir: Option<PathBuf>,
    pub export: ExportConfig,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            lut: "viridis".to_string(),
            opacity: 1.0,
            autoscale: true,
            vmin: None,
            vmax: None,
            lut_dir: None,
            export: ExportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub min_size: u32,
    pub scale: u32,
    pub smooth: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            min_size: 800,
            scale: 20,
            smooth: true,
        }
    }
}

impl VisualizationConfig {
    /// Render options for file export.
    pub fn render_options(&self, colorbar: bool) -> RenderOptions {
        RenderOptions {
            lut: self.lut.clone(),
            opacity: self.opacity,
            autoscale: self.autoscale,
            vmin: self.vmin,
            vmax: self.vmax,
            scale: self.export.scale,
            min_size: self.export.min_size,
            smooth: self.export.smooth,
            colorbar,
        }
    }
}

impl ScannerConfig {
    /// Defaults plus environment overrides, no file.
    pub fn load_env() -> ScanResult<Self> {
        Self::extract(Self::base_figment())
    }

    /// Defaults, then `path` (if it exists), then environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        let figment = Figment::from(Serialized::defaults(ScannerConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(ScannerConfig::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> ScanResult<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| ScanError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScanResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ScanError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        let vis = &self.visualization;
        if !(0.0..=1.0).contains(&vis.opacity) {
            return Err(ScanError::Config(format!(
                "Invalid opacity {}. Must be within [0, 1]",
                vis.opacity
            )));
        }
        if vis.export.scale == 0 {
            return Err(ScanError::Config("export.scale must be at least 1".into()));
        }
        if let (false, Some(lo), Some(hi)) = (vis.autoscale, vis.vmin, vis.vmax) {
            if lo >= hi {
                return Err(ScanError::Config(format!(
                    "vmin ({lo}) must be below vmax ({hi}) when autoscale is off"
                )));
            }
        }

        if self.scan.event_capacity == 0 {
            return Err(ScanError::Config("scan.event_capacity must be at least 1".into()));
        }
        if self.scan.pause_poll_ms == 0 {
            return Err(ScanError::Config("scan.pause_poll_ms must be at least 1".into()));
        }
        if self.scan.point_timeout_ms == Some(0) {
            return Err(ScanError::Config("scan.point_timeout_ms must be positive".into()));
        }
        self.scan
            .defaults
            .validate()
            .map_err(|e| ScanError::Config(format!("scan.defaults: {e}")))
    }

    /// Write this configuration as TOML, creating parent directories.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> ScanResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ScanError::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }
}
