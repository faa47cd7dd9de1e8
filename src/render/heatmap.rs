//! Value grid → colour-mapped RGBA image.
//!
//! Pipeline:
//!
//! 1. Normalisation bounds (autoscale or fixed `vmin`/`vmax`)
//! 2. One pixel per cell through the LUT, uniform alpha from `opacity`
//! 3. Integer magnification (`scale`, then up to `min_size`)
//! 4. Optional colourbar strip on the right
//!
//! Image row 0 shows the largest y.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use super::coords::HeatmapMeta;
use super::glyphs::{draw_text, format_g, label_font, LABEL_PX};
use super::grid::ValueGrid;
use super::lut::{lut_index, Lut};
use crate::error::{ScanError, ScanResult};

/// Below this span the grid is treated as constant.
pub const FLAT_SPAN: f64 = 1e-12;

/// Colourbar strip width.
pub const COLORBAR_WIDTH: u32 = 40;
/// Gap between plot and colourbar.
pub const COLORBAR_GAP: u32 = 20;
/// Total width added to the right of the plot.
pub const COLORBAR_MARGIN: u32 = COLORBAR_WIDTH + 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub lut: String,
    pub opacity: f64,
    pub autoscale: bool,
    pub vmin: Option<f64>,
    pub vmax: Option<f64>,
    pub scale: u32,
    pub min_size: u32,
    pub smooth: bool,
    pub colorbar: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            lut: "viridis".to_string(),
            opacity: 1.0,
            autoscale: true,
            vmin: None,
            vmax: None,
            scale: 1,
            min_size: 0,
            smooth: false,
            colorbar: false,
        }
    }
}

/// A rendered heatmap.
#[derive(Debug, Clone)]
pub struct HeatmapImage {
    pub image: RgbaImage,
    /// Normalisation bounds actually used.
    pub vmin: f64,
    pub vmax: f64,
    pub width: u32,
    pub height: u32,
    /// Hit-testing data for the plot area.
    pub meta: HeatmapMeta,
}

/// Effective `(vmin, vmax)`.
///
/// Autoscale, or a missing bound, derives both from the data.
pub fn normalization_bounds(grid: &ValueGrid, opts: &RenderOptions) -> ScanResult<(f64, f64)> {
    match (opts.autoscale, opts.vmin, opts.vmax) {
        (false, Some(lo), Some(hi)) => Ok((lo, hi)),
        _ => grid.min_max().ok_or(ScanError::EmptyGrid),
    }
}

/// Map `value` into `[0, 1]`; a flat range maps everything to 0.
pub fn normalize(value: f64, vmin: f64, vmax: f64) -> f64 {
    let span = vmax - vmin;
    if span < FLAT_SPAN {
        0.0
    } else {
        ((value - vmin) / span).clamp(0.0, 1.0)
    }
}

/// `round(clamp(opacity) * 255)`
pub fn alpha_byte(opacity: f64) -> u8 {
    let o = if opacity.is_nan() { 1.0 } else { opacity.clamp(0.0, 1.0) };
    (o * 255.0).round() as u8
}

/// One pixel per cell, rows flipped so the top row is the largest y.
pub fn colorize(grid: &ValueGrid, lut: &Lut, vmin: f64, vmax: f64, opacity: f64) -> ScanResult<RgbaImage> {
    let (nx, ny) = grid_dims(grid)?;
    let alpha = alpha_byte(opacity);
    let mut img = RgbaImage::new(nx, ny);
    for (px, py, pixel) in img.enumerate_pixels_mut() {
        let iy = (ny - 1 - py) as usize;
        let value = grid.get(iy, px as usize).unwrap_or(f64::NAN);
        let [r, g, b] = lut.color(lut_index(normalize(value, vmin, vmax)));
        *pixel = Rgba([r, g, b, alpha]);
    }
    Ok(img)
}

fn grid_dims(grid: &ValueGrid) -> ScanResult<(u32, u32)> {
    if grid.nx() == 0 || grid.ny() == 0 {
        return Err(ScanError::EmptyGrid);
    }
    let nx = u32::try_from(grid.nx()).map_err(|_| ScanError::InvalidParams("grid too wide".into()))?;
    let ny = u32::try_from(grid.ny()).map_err(|_| ScanError::InvalidParams("grid too tall".into()))?;
    Ok((nx, ny))
}

/// Final plot size for an `nx × ny` grid.
///
/// Multiply by `scale`, then by the smallest integer that lifts the shorter
/// side to at least `min_size`.
pub fn output_size(nx: u32, ny: u32, scale: u32, min_size: u32) -> (u32, u32) {
    let scale = scale.max(1);
    let (mut w, mut h) = (nx.saturating_mul(scale), ny.saturating_mul(scale));
    let short = w.min(h);
    if short > 0 && short < min_size {
        let m = min_size.div_ceil(short);
        w = w.saturating_mul(m);
        h = h.saturating_mul(m);
    }
    (w, h)
}

/// Bilinear when `smooth`, nearest-neighbour otherwise.
pub fn resample(img: &RgbaImage, width: u32, height: u32, smooth: bool) -> RgbaImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    let filter = if smooth {
        FilterType::Triangle
    } else {
        FilterType::Nearest
    };
    imageops::resize(img, width, height, filter)
}

/// Plot plus a vertical LUT strip (`vmax` at the top) and min/max labels.
pub fn compose_colorbar(plot: &RgbaImage, lut: &Lut, vmin: f64, vmax: f64) -> ScanResult<RgbaImage> {
    let (w, h) = plot.dimensions();
    let mut out = RgbaImage::from_pixel(w + COLORBAR_MARGIN, h, Rgba([255, 255, 255, 255]));
    imageops::replace(&mut out, plot, 0, 0);

    let bar_x0 = w + COLORBAR_GAP;
    let bar_x1 = bar_x0 + COLORBAR_WIDTH;
    let denom = f64::from(h.saturating_sub(1).max(1));
    for y in 0..h {
        let t = 1.0 - f64::from(y) / denom;
        let [r, g, b] = lut.sample(t);
        for x in bar_x0..bar_x1 {
            out.put_pixel(x, y, Rgba([r, g, b, 255]));
        }
    }

    let font = label_font()?;
    let black = Rgba([0, 0, 0, 255]);
    let label_x = i64::from(bar_x1) + 10;
    let max_label = format!("max: {}", format_g(vmax));
    let min_label = format!("min: {}", format_g(vmin));
    draw_text(&mut out, font, label_x, 5, &max_label, LABEL_PX, black);
    draw_text(&mut out, font, label_x, i64::from(h) - 15, &min_label, LABEL_PX, black);
    Ok(out)
}

/// Full pipeline.
pub fn render_heatmap(grid: &ValueGrid, lut: &Lut, opts: &RenderOptions) -> ScanResult<HeatmapImage> {
    let (nx, ny) = grid_dims(grid)?;
    let (vmin, vmax) = normalization_bounds(grid, opts)?;
    let raw = colorize(grid, lut, vmin, vmax, opts.opacity)?;

    let (pw, ph) = output_size(nx, ny, opts.scale, opts.min_size);
    let plot = resample(&raw, pw, ph, opts.smooth);
    let meta = HeatmapMeta::for_grid(grid, pw, ph);

    let image = if opts.colorbar {
        compose_colorbar(&plot, lut, vmin, vmax)?
    } else {
        plot
    };
    let (width, height) = image.dimensions();
    Ok(HeatmapImage {
        image,
        vmin,
        vmax,
        width,
        height,
        meta,
    })
}
