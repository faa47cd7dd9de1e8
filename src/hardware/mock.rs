//! Mock Hardware Implementations
//!
//! Provides simulated drivers for running scans without a gantry or analyser.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockMotion` - Simulated scan head that records every commanded position
//! - `MockInstrument` - Simulated analyser with two S-parameter traces
//!
//! Both keep call counters so tests can assert on the exact driver traffic,
//! and both can be told to fail at a chosen point.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::hardware::capabilities::{Instrument, MotionControl};
use crate::scan::params::TraceInfo;

/// Call counters shared by both mocks.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub connect: AtomicUsize,
    pub disconnect: AtomicUsize,
    pub home: AtomicUsize,
    pub move_to: AtomicUsize,
    pub set_frequency: AtomicUsize,
    pub measure: AtomicUsize,
}

impl CallCounts {
    fn bump(counter: &AtomicUsize) -> usize {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

// =============================================================================
// MockMotion - Simulated Scan Head
// =============================================================================

/// Mock scan head.
///
/// Simulates a gantry with:
/// - 50ms homing cycle (configurable)
/// - 10ms per move (configurable, independent of distance)
/// - A log of every `move_to` target
///
/// # Example
///
/// ```rust,ignore
/// let head = MockMotion::instant();
/// head.move_to(1.0, 2.0, 1.0, 1000.0).await?;
/// assert_eq!(head.moves().len(), 1);
/// ```
pub struct MockMotion {
    home_delay: Duration,
    move_delay: Duration,
    moves: Mutex<Vec<[f64; 4]>>,
    counts: Arc<CallCounts>,
    fail_on_move: Option<usize>,
    fail_disconnect: AtomicBool,
}

impl MockMotion {
    /// Mock head with the default timings.
    pub fn new() -> Self {
        Self::with_delays(Duration::from_millis(50), Duration::from_millis(10))
    }

    /// Mock head that never sleeps (for tests).
    pub fn instant() -> Self {
        Self::with_delays(Duration::ZERO, Duration::ZERO)
    }

    /// Mock head with custom homing and per-move delays.
    pub fn with_delays(home_delay: Duration, move_delay: Duration) -> Self {
        Self {
            home_delay,
            move_delay,
            moves: Mutex::new(Vec::new()),
            counts: Arc::new(CallCounts::default()),
            fail_on_move: None,
            fail_disconnect: AtomicBool::new(false),
        }
    }

    /// Make the n-th `move_to` call (1-based) fail.
    pub fn failing_on_move(mut self, n: usize) -> Self {
        self.fail_on_move = Some(n);
        self
    }

    /// Make `disconnect` fail.
    pub fn failing_disconnect(self) -> Self {
        self.fail_disconnect.store(true, Ordering::SeqCst);
        self
    }

    /// Every `move_to` target as `[x, y, z, feed]`, in call order.
    pub fn moves(&self) -> Vec<[f64; 4]> {
        self.moves.lock().clone()
    }

    pub fn counts(&self) -> &CallCounts {
        &self.counts
    }
}

impl Default for MockMotion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotionControl for MockMotion {
    async fn connect(&self) -> Result<()> {
        CallCounts::bump(&self.counts.connect);
        debug!("MockMotion: connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        CallCounts::bump(&self.counts.disconnect);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            bail!("MockMotion: link already closed");
        }
        debug!("MockMotion: disconnected");
        Ok(())
    }

    async fn home(&self) -> Result<()> {
        CallCounts::bump(&self.counts.home);
        // CRITICAL: Use tokio::time::sleep, NOT std::thread::sleep
        sleep(self.home_delay).await;
        debug!("MockMotion: homed");
        Ok(())
    }

    async fn move_to(&self, x: f64, y: f64, z: f64, feed: f64) -> Result<()> {
        let n = CallCounts::bump(&self.counts.move_to);
        if self.fail_on_move == Some(n) {
            bail!("MockMotion: axis fault at move {n}");
        }
        sleep(self.move_delay).await;
        self.moves.lock().push([x, y, z, feed]);
        Ok(())
    }
}

// =============================================================================
// MockInstrument - Simulated Analyser
// =============================================================================

/// How the mock analyser produces readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Base level per trace kind + frequency ripple + uniform noise.
    Simulated,
    /// Every measurement returns this value.
    Constant(f64),
}

/// Mock network analyser.
///
/// Simulates an instrument with:
/// - Two traces by default: `Trc1_S21` and `Trc2_S31` (both in dB)
/// - S21 around 10 dB, S31 around 6 dB, ±0.15 dB noise
/// - Optional per-measurement delay
pub struct MockInstrument {
    traces: Vec<TraceInfo>,
    reading: Reading,
    frequency_hz: Arc<RwLock<f64>>,
    measure_delay: Duration,
    counts: Arc<CallCounts>,
    fail_on_measure: Option<usize>,
}

impl MockInstrument {
    /// Mock analyser with the two default traces and simulated readings.
    pub fn new() -> Self {
        Self {
            traces: vec![
                TraceInfo::new("Trc1_S21").with_kind("S21"),
                TraceInfo::new("Trc2_S31").with_kind("S31"),
            ],
            reading: Reading::Simulated,
            frequency_hz: Arc::new(RwLock::new(5e9)),
            measure_delay: Duration::ZERO,
            counts: Arc::new(CallCounts::default()),
            fail_on_measure: None,
        }
    }

    /// Mock analyser with custom traces, all returning `value`.
    pub fn constant(traces: Vec<TraceInfo>, value: f64) -> Self {
        Self {
            traces,
            reading: Reading::Constant(value),
            ..Self::new()
        }
    }

    /// Sleep this long inside every measurement.
    pub fn with_measure_delay(mut self, delay: Duration) -> Self {
        self.measure_delay = delay;
        self
    }

    /// Make the n-th measurement (1-based) fail.
    pub fn failing_on_measure(mut self, n: usize) -> Self {
        self.fail_on_measure = Some(n);
        self
    }

    pub fn counts(&self) -> &CallCounts {
        &self.counts
    }

    /// Frequency most recently set.
    pub async fn frequency(&self) -> f64 {
        *self.frequency_hz.read().await
    }

    fn simulated_value(&self, trace_name: &str, freq_hz: f64) -> f64 {
        let base = if trace_name.contains("S21") {
            10.0
        } else if trace_name.contains("S31") {
            6.0
        } else {
            0.0
        };
        let f_ghz = freq_hz / 1e9;
        let noise = rand::thread_rng().gen_range(-0.15..0.15);
        base + (f_ghz * 0.6).sin() * 0.8 + noise
    }
}

impl Default for MockInstrument {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Instrument for MockInstrument {
    async fn connect(&self) -> Result<()> {
        CallCounts::bump(&self.counts.connect);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        CallCounts::bump(&self.counts.disconnect);
        Ok(())
    }

    async fn list_traces(&self) -> Result<Vec<TraceInfo>> {
        Ok(self.traces.clone())
    }

    async fn set_frequency(&self, hz: f64) -> Result<()> {
        CallCounts::bump(&self.counts.set_frequency);
        *self.frequency_hz.write().await = hz;
        Ok(())
    }

    async fn measure_trace_point(&self, trace_name: &str) -> Result<f64> {
        let n = CallCounts::bump(&self.counts.measure);
        if self.fail_on_measure == Some(n) {
            bail!("MockInstrument: trace '{trace_name}' read failed");
        }
        if !self.traces.iter().any(|t| t.name == trace_name) {
            bail!("MockInstrument: unknown trace '{trace_name}'");
        }
        if !self.measure_delay.is_zero() {
            sleep(self.measure_delay).await;
        }
        match self.reading {
            Reading::Constant(v) => Ok(v),
            Reading::Simulated => {
                let freq = *self.frequency_hz.read().await;
                Ok(self.simulated_value(trace_name, freq))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_motion_records_moves() {
        let head = MockMotion::instant();
        head.connect().await.unwrap();
        head.home().await.unwrap();
        head.move_to(1.0, 2.0, 0.5, 900.0).await.unwrap();
        head.move_to(2.0, 2.0, 0.5, 900.0).await.unwrap();

        assert_eq!(head.moves(), vec![[1.0, 2.0, 0.5, 900.0], [2.0, 2.0, 0.5, 900.0]]);
        assert_eq!(head.counts().home.load(Ordering::SeqCst), 1);
        assert_eq!(head.counts().move_to.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mock_motion_failure_injection() {
        let head = MockMotion::instant().failing_on_move(2).failing_disconnect();
        assert!(head.move_to(0.0, 0.0, 0.0, 1.0).await.is_ok());
        assert!(head.move_to(1.0, 0.0, 0.0, 1.0).await.is_err());
        assert!(head.disconnect().await.is_err());
        assert_eq!(head.moves().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_instrument_simulated_ranges() {
        let vna = MockInstrument::new();
        vna.set_frequency(2e9).await.unwrap();
        assert_eq!(vna.frequency().await, 2e9);

        let ripple = (2.0f64 * 0.6).sin() * 0.8;
        for _ in 0..20 {
            let s21 = vna.measure_trace_point("Trc1_S21").await.unwrap();
            assert!((s21 - (10.0 + ripple)).abs() <= 0.15 + 1e-12);
            let s31 = vna.measure_trace_point("Trc2_S31").await.unwrap();
            assert!((s31 - (6.0 + ripple)).abs() <= 0.15 + 1e-12);
        }
    }

    #[tokio::test]
    async fn test_mock_instrument_constant_and_unknown_trace() {
        let vna = MockInstrument::constant(vec![TraceInfo::new("T1")], 5.0);
        assert_eq!(vna.measure_trace_point("T1").await.unwrap(), 5.0);
        assert!(vna.measure_trace_point("nope").await.is_err());
        assert_eq!(vna.counts().measure.load(Ordering::SeqCst), 2);
    }
}
