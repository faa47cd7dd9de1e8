//! Scan request types: the area/pitch/height of a raster sweep and the traces
//! sampled at each point.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Tolerance used so that floating-point step accumulation still reaches the
/// far edge of the scan area.
pub const AXIS_EPSILON: f64 = 1e-9;

/// Largest raster accepted by [`ScanParams::validate`] (a 4096 x 4096 grid).
pub const MAX_GRID_POINTS: usize = 1 << 24;

/// Parameters of one raster scan. Distances are in millimetres, `feed` is the
/// actuator speed and `freq_hz` the instrument frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    #[serde(alias = "step_mm")]
    pub step: f64,
    #[serde(alias = "z_height_mm")]
    pub z_height: f64,
    pub feed: f64,
    #[serde(alias = "freq_hz")]
    pub freq: f64,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            x_min: -5.0,
            x_max: 5.0,
            y_min: -5.0,
            y_max: 5.0,
            step: 1.0,
            z_height: 1.0,
            feed: 1000.0,
            freq: 5e9,
        }
    }
}

impl ScanParams {
    /// Check the geometric invariants: finite values, non-inverted extents and
    /// a positive pitch.
    pub fn validate(&self) -> ScanResult<()> {
        let all = [
            self.x_min,
            self.x_max,
            self.y_min,
            self.y_max,
            self.step,
            self.z_height,
            self.feed,
            self.freq,
        ];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(ScanError::InvalidParams(
                "all parameters must be finite".to_string(),
            ));
        }
        if self.x_max < self.x_min {
            return Err(ScanError::InvalidParams(format!(
                "x_max ({}) < x_min ({})",
                self.x_max, self.x_min
            )));
        }
        if self.y_max < self.y_min {
            return Err(ScanError::InvalidParams(format!(
                "y_max ({}) < y_min ({})",
                self.y_max, self.y_min
            )));
        }
        if self.step <= 0.0 {
            return Err(ScanError::InvalidParams(format!(
                "step must be > 0, got {}",
                self.step
            )));
        }
        let nx = axis_len(self.x_min, self.x_max, self.step);
        let ny = axis_len(self.y_min, self.y_max, self.step);
        match nx.zip(ny).and_then(|(nx, ny)| nx.checked_mul(ny)) {
            Some(n) if n <= MAX_GRID_POINTS => Ok(()),
            _ => Err(ScanError::InvalidParams(format!(
                "step {} over {} x {} mm exceeds {MAX_GRID_POINTS} grid points",
                self.step,
                self.x_max - self.x_min,
                self.y_max - self.y_min
            ))),
        }
    }

    /// Ordered x sample coordinates, `x_min..=x_max` at `step`.
    pub fn xs(&self) -> Vec<f64> {
        axis_points(self.x_min, self.x_max, self.step)
    }

    /// Ordered y sample coordinates, `y_min..=y_max` at `step`.
    pub fn ys(&self) -> Vec<f64> {
        axis_points(self.y_min, self.y_max, self.step)
    }

    /// Number of raster points (`len(xs) * len(ys)`), saturating for
    /// parameters that [`ScanParams::validate`] rejects.
    pub fn point_count(&self) -> usize {
        let nx = axis_len(self.x_min, self.x_max, self.step).unwrap_or(usize::MAX);
        let ny = axis_len(self.y_min, self.y_max, self.step).unwrap_or(usize::MAX);
        nx.saturating_mul(ny)
    }
}

/// Sample coordinates from `min` to `max` inclusive at `step`.
///
/// Each coordinate is computed as `min + i * step` rather than by repeated
/// addition, so the sequence is strictly ascending and the endpoint is kept
/// whenever `max - min` is a multiple of `step` up to [`AXIS_EPSILON`].
/// Returns an empty vector for a non-positive step, an inverted range or an
/// axis longer than [`MAX_GRID_POINTS`].
pub fn axis_points(min: f64, max: f64, step: f64) -> Vec<f64> {
    match axis_len(min, max, step) {
        Some(count) if count <= MAX_GRID_POINTS => {
            (0..count).map(|i| min + i as f64 * step).collect()
        }
        _ => Vec::new(),
    }
}

/// Number of samples [`axis_points`] yields, computed without allocating.
///
/// `Some(0)` for a non-positive step or inverted range; `None` when the count
/// is not representable.
pub fn axis_len(min: f64, max: f64, step: f64) -> Option<usize> {
    if !(step > 0.0) || !(max >= min) {
        return Some(0);
    }
    let intervals = ((max - min) / step + AXIS_EPSILON).floor();
    if !intervals.is_finite() || intervals >= u64::MAX as f64 {
        return None;
    }
    usize::try_from(intervals as u64).ok()?.checked_add(1)
}

fn default_unit() -> String {
    "dB".to_string()
}

/// One named measurement channel reported by the instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceInfo {
    pub name: String,
    /// Optional classification such as `S21`.
    #[serde(default)]
    pub kind: String,
    #[serde(default = "default_unit")]
    pub unit: String,
}

impl TraceInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: String::new(),
            unit: default_unit(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Display unit, falling back to `dB` when the instrument left it blank.
    pub fn unit_or_default(&self) -> &str {
        if self.unit.is_empty() {
            "dB"
        } else {
            &self.unit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_includes_both_endpoints() {
        let xs = axis_points(0.0, 2.0, 1.0);
        assert_eq!(xs, vec![0.0, 1.0, 2.0]);

        let xs = axis_points(-5.0, 5.0, 0.5);
        assert_eq!(xs.len(), 21);
        assert_eq!(xs[0], -5.0);
        assert!((xs[20] - 5.0).abs() < AXIS_EPSILON);
    }

    #[test]
    fn axis_tolerates_inexact_steps() {
        // 0.3 / 0.1 is 2.9999999999999996 in binary floating point.
        let xs = axis_points(0.0, 0.3, 0.1);
        assert_eq!(xs.len(), 4);
        assert!((xs[3] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn axis_is_strictly_ascending() {
        for &(min, max, step) in &[(0.0, 10.0, 0.25), (-3.3, 7.7, 1.1), (1.0, 1.0, 0.5)] {
            let pts = axis_points(min, max, step);
            assert!(!pts.is_empty());
            assert!((pts[0] - min).abs() < AXIS_EPSILON);
            assert!(pts.windows(2).all(|w| w[1] > w[0]));
            assert!(*pts.last().unwrap() <= max + AXIS_EPSILON);
        }
    }

    #[test]
    fn axis_single_point_and_degenerate_inputs() {
        assert_eq!(axis_points(3.0, 3.0, 1.0), vec![3.0]);
        assert!(axis_points(0.0, 1.0, 0.0).is_empty());
        assert!(axis_points(1.0, 0.0, 1.0).is_empty());
    }

    #[test]
    fn validate_rejects_bad_params() {
        let ok = ScanParams::default();
        assert!(ok.validate().is_ok());

        let bad_step = ScanParams { step: 0.0, ..ok };
        assert!(matches!(bad_step.validate(), Err(ScanError::InvalidParams(_))));

        let inverted = ScanParams {
            x_min: 1.0,
            x_max: 0.0,
            ..ok
        };
        assert!(inverted.validate().is_err());

        let nan = ScanParams { y_max: f64::NAN, ..ok };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn tiny_step_is_rejected_without_allocating() {
        let params = ScanParams {
            x_min: 0.0,
            x_max: 10.0,
            y_min: 0.0,
            y_max: 10.0,
            step: 1e-300,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(ScanError::InvalidParams(m)) if m.contains("grid points")));
        assert_eq!(axis_len(0.0, 10.0, 1e-300), None);
        assert!(axis_points(0.0, 10.0, 1e-300).is_empty());
        assert_eq!(params.point_count(), usize::MAX);

        let fine = ScanParams { step: 1e-10, ..params };
        assert!(fine.validate().is_err());
        assert!(fine.xs().is_empty());

        // 4096 x 4096 is the largest accepted raster.
        let edge = ScanParams {
            x_max: 4095.0,
            y_max: 4095.0,
            step: 1.0,
            ..params
        };
        assert_eq!(edge.point_count(), MAX_GRID_POINTS);
        assert!(edge.validate().is_ok());
        let over = ScanParams { y_max: 4096.0, ..edge };
        assert!(over.validate().is_err());
    }

    #[test]
    fn params_accept_original_field_names() {
        let json = r#"{"x_min":0,"x_max":2,"y_min":0,"y_max":2,"step_mm":1,
            "z_height_mm":1.5,"feed":800,"freq_hz":5e9}"#;
        let params: ScanParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.step, 1.0);
        assert_eq!(params.z_height, 1.5);
        assert_eq!(params.point_count(), 9);
    }

    #[test]
    fn trace_info_defaults_unit() {
        let t: TraceInfo = serde_json::from_str(r#"{"name":"Trc1_S21"}"#).unwrap();
        assert_eq!(t.unit, "dB");
        assert_eq!(t.kind, "");
        assert_eq!(TraceInfo::new("a").with_unit("").unit_or_default(), "dB");
    }
}
