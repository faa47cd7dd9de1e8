//! Dense value grids for rendering.
//!
//! A [`ValueGrid`] is row-major `ny × nx`; row 0 holds the smallest y.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};
use crate::scan::trace_store::TraceGrid;

/// One scattered sample `(x, y, z, value)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub value: f64,
}

impl SamplePoint {
    pub fn new(x: f64, y: f64, z: f64, value: f64) -> Self {
        Self { x, y, z, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueGrid {
    xs: Vec<f64>,
    ys: Vec<f64>,
    values: Vec<f64>,
}

impl ValueGrid {
    pub fn new(xs: Vec<f64>, ys: Vec<f64>, values: Vec<f64>) -> ScanResult<Self> {
        if values.len() != xs.len() * ys.len() {
            return Err(ScanError::InvalidParams(format!(
                "grid has {} values for {} x {} cells",
                values.len(),
                ys.len(),
                xs.len()
            )));
        }
        Ok(Self { xs, ys, values })
    }

    /// Grid over the distinct x and y coordinates of `points`.
    ///
    /// Later points overwrite earlier ones at the same cell. Cells no point
    /// lands on take the minimum observed value (0 when there are none).
    /// This is a plain gap fill, not interpolation.
    pub fn from_points(points: &[SamplePoint]) -> Self {
        let xs = distinct_sorted(points.iter().map(|p| p.x));
        let ys = distinct_sorted(points.iter().map(|p| p.y));
        let nx = xs.len();

        let mut cells: Vec<Option<f64>> = vec![None; nx * ys.len()];
        for p in points {
            if let (Some(ix), Some(iy)) = (position(&xs, p.x), position(&ys, p.y)) {
                cells[iy * nx + ix] = Some(p.value);
            }
        }

        let fill = cells
            .iter()
            .flatten()
            .copied()
            .filter(|v| !v.is_nan())
            .reduce(f64::min)
            .unwrap_or(0.0);
        let values = cells.into_iter().map(|c| c.unwrap_or(fill)).collect();
        Self { xs, ys, values }
    }

    /// Frequency plane `k` of a stored trace grid.
    pub fn from_trace_grid(grid: &TraceGrid, k: usize) -> ScanResult<Self> {
        let plane = grid.plane(k).ok_or_else(|| {
            ScanError::InvalidParams(format!(
                "trace '{}' has no frequency index {k}",
                grid.trace_name
            ))
        })?;
        Self::new(grid.xs.clone(), grid.ys.clone(), plane)
    }

    pub fn nx(&self) -> usize {
        self.xs.len()
    }

    pub fn ny(&self) -> usize {
        self.ys.len()
    }

    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, iy: usize, ix: usize) -> Option<f64> {
        if iy < self.ny() && ix < self.nx() {
            self.values.get(iy * self.nx() + ix).copied()
        } else {
            None
        }
    }

    /// Smallest and largest non-NaN value.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// `(x_min, x_max, y_min, y_max)`.
    pub fn extents(&self) -> Option<(f64, f64, f64, f64)> {
        Some((
            *self.xs.first()?,
            *self.xs.last()?,
            *self.ys.first()?,
            *self.ys.last()?,
        ))
    }

    /// Every cell as a point, y outer and x inner.
    pub fn to_points(&self, z: f64) -> Vec<SamplePoint> {
        let mut out = Vec::with_capacity(self.values.len());
        for (iy, &y) in self.ys.iter().enumerate() {
            for (ix, &x) in self.xs.iter().enumerate() {
                out.push(SamplePoint::new(x, y, z, self.values[iy * self.nx() + ix]));
            }
        }
        out
    }
}

fn distinct_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    // `+ 0.0` folds -0.0 into 0.0 so lookups agree with the dedup.
    let mut out: Vec<f64> = values.filter(|v| !v.is_nan()).map(|v| v + 0.0).collect();
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
}

fn position(sorted: &[f64], value: f64) -> Option<usize> {
    let value = value + 0.0;
    sorted.binary_search_by(|v| v.total_cmp(&value)).ok()
}
