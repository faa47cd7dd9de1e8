//! Hardware abstraction: capability traits consumed by the scan core and
//! mock drivers for running without a bench.

pub mod capabilities;
pub mod mock;

pub use capabilities::{Instrument, MotionControl};
