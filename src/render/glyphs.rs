//! Colourbar label text.
//!
//! Labels are rasterised with `fontdue` from an embedded monospace font and
//! blended onto the image by glyph coverage.

use fontdue::{Font, FontSettings};
use image::{Rgba, RgbaImage};
use std::sync::OnceLock;

use crate::error::{ScanError, ScanResult};

/// Embedded label font (DejaVu Sans Mono, see assets/fonts/LICENSE-DejaVu.txt)
const EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSansMono.ttf");

/// Label size in pixels.
pub const LABEL_PX: f32 = 12.0;

static LABEL_FONT: OnceLock<Result<Font, &'static str>> = OnceLock::new();

/// The embedded font, parsed once per process.
pub fn label_font() -> ScanResult<&'static Font> {
    LABEL_FONT
        .get_or_init(|| Font::from_bytes(EMBEDDED_FONT, FontSettings::default()))
        .as_ref()
        .map_err(|e| ScanError::Image(format!("label font: {e}")))
}

/// Pixel width of `text` at `px`.
pub fn text_width(font: &Font, text: &str, px: f32) -> u32 {
    let width: f32 = text.chars().map(|c| font.metrics(c, px).advance_width).sum();
    width.ceil().max(0.0) as u32
}

/// Draw `text` with the top of its line box at `(x, y)`. Pixels outside the
/// image are clipped.
pub fn draw_text(img: &mut RgbaImage, font: &Font, x: i64, y: i64, text: &str, px: f32, color: Rgba<u8>) {
    let ascent = font
        .horizontal_line_metrics(px)
        .map_or(px, |m| m.ascent)
        .round() as i64;
    let baseline = y + ascent;
    let mut pen = x as f32;

    for c in text.chars() {
        let (metrics, coverage) = font.rasterize(c, px);
        let left = pen.round() as i64 + i64::from(metrics.xmin);
        let top = baseline - i64::from(metrics.ymin) - metrics.height as i64;
        for (i, &cov) in coverage.iter().enumerate() {
            if cov == 0 {
                continue;
            }
            let gx = left + (i % metrics.width) as i64;
            let gy = top + (i / metrics.width) as i64;
            let (Ok(ux), Ok(uy)) = (u32::try_from(gx), u32::try_from(gy)) else {
                continue;
            };
            if ux < img.width() && uy < img.height() {
                blend(img.get_pixel_mut(ux, uy), color, cov);
            }
        }
        pen += metrics.advance_width;
    }
}

fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, coverage: u8) {
    let a = f32::from(coverage) / 255.0;
    for c in 0..3 {
        let mixed = f32::from(src.0[c]) * a + f32::from(dst.0[c]) * (1.0 - a);
        dst.0[c] = mixed.round() as u8;
    }
    dst.0[3] = dst.0[3].max(coverage);
}

/// Format like C's `%.6g`: six significant digits, trailing zeros dropped,
/// scientific notation below 1e-4 or from 1e6 up.
pub fn format_g(value: f64) -> String {
    const PRECISION: i32 = 6;
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    // Rust's `{:e}` rounds the mantissa first, which fixes the exponent.
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exp < -4 || exp >= PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
