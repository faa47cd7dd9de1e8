//! Hardware Capabilities
//!
//! The scan core never talks to a concrete driver. It depends on two small
//! capability traits that the motion stage and the measurement instrument
//! implement:
//!
//! - A scan head (CNC gantry, XYZ stage) implements [`MotionControl`]
//! - A network/spectrum analyser implements [`Instrument`]
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Is handed to the scan runner as an owned `Arc<dyn ...>` handle
//!
//! # Example
//!
//! ```rust,ignore
//! async fn read_origin<M, I>(motion: &M, instrument: &I) -> Result<f64>
//! where
//!     M: MotionControl,
//!     I: Instrument,
//! {
//!     motion.connect().await?;
//!     instrument.connect().await?;
//!     motion.move_to(0.0, 0.0, 1.0, 1000.0).await?;
//!     instrument.measure_trace_point("Trc1_S21").await
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::scan::params::TraceInfo;

/// Capability: Scan Head Motion
///
/// Devices that position the scan head in three axes.
///
/// # Contract
/// - Coordinates are in millimetres, `feed` in device units (mm/min for G-code heads)
/// - `move_to` returns once the head has reached the target
/// - Every call may block for the duration of the motion
/// - Any error aborts the current scan
#[async_trait]
pub trait MotionControl: Send + Sync {
    /// Open the link to the controller.
    async fn connect(&self) -> Result<()>;

    /// Close the link. Called on every exit path of a scan; errors are ignored there.
    async fn disconnect(&self) -> Result<()>;

    /// Run the homing cycle.
    async fn home(&self) -> Result<()>;

    /// Move to an absolute position at the given feed rate.
    async fn move_to(&self, x: f64, y: f64, z: f64, feed: f64) -> Result<()>;
}

/// Capability: Trace Measurement
///
/// Instruments that expose one or more named traces and can read a scalar
/// from each at the current head position.
///
/// # Contract
/// - `list_traces` reflects the instrument's current setup; names are unique
/// - `set_frequency` applies to subsequent `measure_trace_point` calls
/// - `measure_trace_point` returns one scalar in the trace's unit
/// - There is no built-in timeout; a stuck call blocks the caller
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Open the link to the instrument.
    async fn connect(&self) -> Result<()>;

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;

    /// Traces currently configured on the instrument.
    async fn list_traces(&self) -> Result<Vec<TraceInfo>>;

    /// Select the measurement frequency in Hz.
    async fn set_frequency(&self, hz: f64) -> Result<()>;

    /// Read one scalar from the named trace.
    async fn measure_trace_point(&self, trace_name: &str) -> Result<f64>;
}
