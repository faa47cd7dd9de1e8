//! Pixel / grid-cell / physical coordinate mapping for rendered heatmaps.
//!
//! Pixel rows grow downward while y grows upward, so pixel row 0 is `y_max`.
//! Cell indices returned here are in image order: `gy = 0` is the top row.

use serde::{Deserialize, Serialize};

use super::grid::ValueGrid;

/// What a viewer needs to hit-test a rendered heatmap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatmapMeta {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub nx: usize,
    pub ny: usize,
    /// Width of the plot area in pixels (colourbar excluded).
    pub width: u32,
    pub height: u32,
}

impl HeatmapMeta {
    /// Metadata for `grid` drawn into a `width × height` plot area.
    pub fn for_grid(grid: &ValueGrid, width: u32, height: u32) -> Self {
        let (x_min, x_max, y_min, y_max) = grid.extents().unwrap_or((0.0, 0.0, 0.0, 0.0));
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
            nx: grid.nx(),
            ny: grid.ny(),
            width,
            height,
        }
    }

    pub fn contains_pixel(&self, px: f64, py: f64) -> bool {
        px >= 0.0 && py >= 0.0 && px < f64::from(self.width) && py < f64::from(self.height)
    }

    /// Cell under a pixel, `(gx, gy)`; `None` outside the plot area.
    pub fn pixel_to_cell(&self, px: f64, py: f64) -> Option<(usize, usize)> {
        if !self.contains_pixel(px, py) || self.nx == 0 || self.ny == 0 {
            return None;
        }
        let gx = axis_cell(px, self.nx, self.width);
        let gy = axis_cell(py, self.ny, self.height);
        Some((gx, gy))
    }

    /// Physical `(x, y)` of a cell.
    pub fn cell_to_physical(&self, gx: usize, gy: usize) -> (f64, f64) {
        let x = self.x_min + (self.x_max - self.x_min) * fraction(gx, self.nx);
        let y = self.y_max - (self.y_max - self.y_min) * fraction(gy, self.ny);
        (x, y)
    }

    /// Pixel at the centre of a cell.
    pub fn cell_center_pixel(&self, gx: usize, gy: usize) -> (f64, f64) {
        let cw = f64::from(self.width) / self.nx.max(1) as f64;
        let ch = f64::from(self.height) / self.ny.max(1) as f64;
        ((gx as f64 + 0.5) * cw, (gy as f64 + 0.5) * ch)
    }

    pub fn pixel_to_physical(&self, px: f64, py: f64) -> Option<(f64, f64)> {
        self.pixel_to_cell(px, py)
            .map(|(gx, gy)| self.cell_to_physical(gx, gy))
    }
}

fn axis_cell(pixel: f64, cells: usize, extent: u32) -> usize {
    let raw = (pixel * cells as f64 / f64::from(extent)).floor();
    // Non-negative after the bounds check; clamp covers the far edge.
    (raw.max(0.0) as usize).min(cells - 1)
}

/// `index / (n - 1)`, or 0 for a single cell.
fn fraction(index: usize, n: usize) -> f64 {
    if n <= 1 {
        0.0
    } else {
        index as f64 / (n - 1) as f64
    }
}

/// Hover read-out: physical position and value under a pixel.
pub fn value_at_pixel(grid: &ValueGrid, meta: &HeatmapMeta, px: f64, py: f64) -> Option<(f64, f64, f64)> {
    let (gx, gy) = meta.pixel_to_cell(px, py)?;
    let iy = grid.ny().checked_sub(1)?.checked_sub(gy)?;
    let value = grid.get(iy, gx)?;
    let (x, y) = meta.cell_to_physical(gx, gy);
    Some((x, y, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_5x5() -> HeatmapMeta {
        HeatmapMeta {
            x_min: 0.0,
            x_max: 4.0,
            y_min: 0.0,
            y_max: 4.0,
            nx: 5,
            ny: 5,
            width: 500,
            height: 500,
        }
    }

    #[test]
    fn test_round_trip_at_cell_centre() {
        let meta = meta_5x5();
        assert_eq!(meta.cell_to_physical(2, 2), (2.0, 2.0));
        let (px, py) = meta.cell_center_pixel(2, 2);
        assert_eq!(meta.pixel_to_cell(px, py), Some((2, 2)));

        for gx in 0..5 {
            for gy in 0..5 {
                let (px, py) = meta.cell_center_pixel(gx, gy);
                assert_eq!(meta.pixel_to_cell(px, py), Some((gx, gy)));
            }
        }
    }

    #[test]
    fn test_top_row_is_y_max() {
        let meta = meta_5x5();
        assert_eq!(meta.pixel_to_physical(0.0, 0.0), Some((0.0, 4.0)));
        assert_eq!(meta.pixel_to_physical(499.0, 499.0), Some((4.0, 0.0)));
    }

    #[test]
    fn test_outside_and_single_cell() {
        let meta = meta_5x5();
        assert_eq!(meta.pixel_to_cell(-1.0, 10.0), None);
        assert_eq!(meta.pixel_to_cell(500.0, 10.0), None);

        let single = HeatmapMeta {
            x_min: 3.0,
            x_max: 3.0,
            y_min: 7.0,
            y_max: 7.0,
            nx: 1,
            ny: 1,
            width: 10,
            height: 10,
        };
        assert_eq!(single.pixel_to_physical(9.0, 9.0), Some((3.0, 7.0)));
    }

    #[test]
    fn test_value_at_pixel_flips_rows() {
        // Row 0 (y = 0) holds 1, 2; row 1 (y = 1) holds 3, 4.
        let grid = ValueGrid::new(vec![0.0, 1.0], vec![0.0, 1.0], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let meta = HeatmapMeta::for_grid(&grid, 100, 100);
        assert_eq!(value_at_pixel(&grid, &meta, 10.0, 10.0), Some((0.0, 1.0, 3.0)));
        assert_eq!(value_at_pixel(&grid, &meta, 90.0, 90.0), Some((1.0, 0.0, 2.0)));
    }
}
