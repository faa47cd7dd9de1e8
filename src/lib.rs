//! # NFS Scanner Core Library
//!
//! Near-field scanning: a scan head is rastered over a rectangular area while
//! an instrument is sampled at every grid point for one or more named traces.
//! The resulting scalar fields are persisted per task and rendered as
//! colour-mapped heatmaps.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: Capability traits (`MotionControl`, `Instrument`) consumed by the
//!   scan core, plus mock drivers for running without a bench.
//! - **`scan`**: The acquisition state machine (`ScanRunner`), its pause/stop protocol and
//!   event channel, trace grid persistence, task directories, the persisted serial
//!   `ScanQueue` and the `QueueController` that drains it.
//! - **`render`**: Colour LUTs, value grids, heatmap composition (normalise, colour-map,
//!   resample, colourbar) and pixel ↔ physical coordinate mapping.
//! - **`export`**: CSV value tables and PNG heatmaps written next to each task.
//! - **`config`**: Figment-based `ScannerConfig` (defaults → TOML → environment).
//! - **`logging`**: `tracing-subscriber` setup in pretty, compact or JSON format.
//! - **`paths`**: Application home and directory layout.
//! - **`error`**: The `ScanError` taxonomy shared by every module.

pub mod config;
pub mod error;
pub mod export;
pub mod hardware;
pub mod logging;
pub mod paths;
pub mod render;
pub mod scan;

pub use error::{ScanError, ScanResult};
