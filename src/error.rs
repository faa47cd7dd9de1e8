//! Custom error types for the scanner core.
//!
//! This module defines `ScanError`, the single error type returned by every
//! fallible operation in the library. It is built with `thiserror` and groups
//! failures into the classes callers actually branch on:
//!
//! - **Configuration**: an operation was asked to do something impossible with
//!   the inputs it got (a LUT with fewer than two control points, an empty grid,
//!   scan parameters with `step <= 0`). Fatal to that one call, never retried.
//! - **Acquisition**: a driver raised during a scan, a point measurement timed
//!   out, or the operator pressed stop. These end the current run; the queue
//!   moves on to the next item.
//! - **NotFound**: a trace bundle, task, queue item or colour map is missing.
//! - **Conflict**: a queue rule was violated (deleting a running item, moving an
//!   item backwards in its lifecycle).
//! - **Storage**: I/O, JSON, bundle decoding, CSV and image encoding failures.
//!
//! Drivers speak `anyhow::Result` (see [`crate::hardware::capabilities`]); the
//! scan runner folds those into [`ScanError::Acquisition`] at the seam.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Coarse classification of a [`ScanError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid inputs; the single operation fails.
    Configuration,
    /// The current scan run failed or was stopped.
    Acquisition,
    /// A referenced resource does not exist.
    NotFound,
    /// A queue lifecycle rule was violated.
    Conflict,
    /// Persistence or encoding failed.
    Storage,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid LUT definition: {0}")]
    InvalidLutDefinition(String),

    #[error("Grid is empty (zero rows or columns)")]
    EmptyGrid,

    #[error("Invalid scan parameters: {0}")]
    InvalidParams(String),

    #[error("Configuration validation error: {0}")]
    Config(String),

    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    #[error("User stopped")]
    UserStopped,

    #[error("Measurement of trace '{0}' timed out")]
    PointTimeout(String),

    #[error("Trace not found: {0}")]
    TraceNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Queue item not found: {0}")]
    QueueItemNotFound(String),

    #[error("Color map not found: {0}")]
    LutNotFound(String),

    #[error("Queue item {0} is running and cannot be modified this way")]
    QueueItemRunning(String),

    #[error("Queue item {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed grid bundle: {0}")]
    BundleFormat(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("CSV error: {0}")]
    Csv(String),
}

impl ScanError {
    /// Which class of the error taxonomy this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            ScanError::InvalidLutDefinition(_)
            | ScanError::EmptyGrid
            | ScanError::InvalidParams(_)
            | ScanError::Config(_) => ErrorClass::Configuration,
            ScanError::Acquisition(_) | ScanError::UserStopped | ScanError::PointTimeout(_) => {
                ErrorClass::Acquisition
            }
            ScanError::TraceNotFound(_)
            | ScanError::TaskNotFound(_)
            | ScanError::QueueItemNotFound(_)
            | ScanError::LutNotFound(_) => ErrorClass::NotFound,
            ScanError::QueueItemRunning(_) | ScanError::InvalidTransition { .. } => {
                ErrorClass::Conflict
            }
            ScanError::Io(_)
            | ScanError::Serialization(_)
            | ScanError::BundleFormat(_)
            | ScanError::Image(_)
            | ScanError::Csv(_) => ErrorClass::Storage,
        }
    }

    /// True when the operator asked the run to stop.
    pub fn is_user_stop(&self) -> bool {
        matches!(self, ScanError::UserStopped)
    }
}

impl From<image::ImageError> for ScanError {
    fn from(value: image::ImageError) -> Self {
        ScanError::Image(value.to_string())
    }
}

impl From<csv::Error> for ScanError {
    fn from(value: csv::Error) -> Self {
        ScanError::Csv(value.to_string())
    }
}

impl From<anyhow::Error> for ScanError {
    fn from(value: anyhow::Error) -> Self {
        ScanError::Acquisition(format!("{value:#}"))
    }
}
