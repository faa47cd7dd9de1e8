//! Heatmap rendering: colour LUTs, value grids, image composition and
//! pixel hit-testing.

pub mod coords;
pub mod glyphs;
pub mod grid;
pub mod heatmap;
pub mod lut;

pub use coords::{value_at_pixel, HeatmapMeta};
pub use grid::{SamplePoint, ValueGrid};
pub use heatmap::{render_heatmap, HeatmapImage, RenderOptions};
pub use lut::{ColorPoint, Lut, LutRegistry};
