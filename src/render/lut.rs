//! Colour lookup tables.
//!
//! A LUT is built from sparse control points `(t, [r, g, b])` by per-channel
//! linear interpolation at 256 evenly spaced positions in `[0, 1]`. Tables are
//! pure functions of their points, so the [`LutRegistry`] caches them by name.
//!
//! Definition files use the JSON shape
//!
//! ```json
//! { "name": "viridis", "points": [[0.0, [68, 1, 84]], [1.0, [253, 231, 37]]] }
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ScanError, ScanResult};

/// Number of entries in every table.
pub const LUT_SIZE: usize = 256;

/// Names of the tables compiled into the crate.
pub const BUILTIN_LUTS: [&str; 4] = ["gray", "viridis", "turbo", "jet"];

/// One control point: position `t` in `[0, 1]` and its colour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorPoint(pub f64, pub [f64; 3]);

impl ColorPoint {
    pub fn new(t: f64, rgb: [u8; 3]) -> Self {
        Self(t, rgb.map(f64::from))
    }

    pub fn t(&self) -> f64 {
        self.0
    }

    pub fn rgb(&self) -> [f64; 3] {
        self.1
    }
}

/// On-disk LUT definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LutDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub points: Vec<ColorPoint>,
}

/// A dense 256-entry RGB table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lut {
    pub name: String,
    table: [[u8; 3]; LUT_SIZE],
}

impl Lut {
    pub fn from_points(name: impl Into<String>, points: &[ColorPoint]) -> ScanResult<Self> {
        Ok(Self {
            name: name.into(),
            table: build_table(points)?,
        })
    }

    pub fn table(&self) -> &[[u8; 3]; LUT_SIZE] {
        &self.table
    }

    pub fn color(&self, index: u8) -> [u8; 3] {
        self.table[usize::from(index)]
    }

    /// Colour for a normalised value (clamped to `[0, 1]`).
    pub fn sample(&self, t: f64) -> [u8; 3] {
        self.color(lut_index(t))
    }
}

/// Table index for a normalised value: `round(clamp(t) * 255)`.
pub fn lut_index(t: f64) -> u8 {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    // In 0.0..=255.0 after the clamp.
    (t * 255.0).round() as u8
}

/// Interpolate `points` into a 256-entry table.
///
/// Points are sorted by `t` first. Positions outside the first/last point
/// take the end colours.
pub fn build_table(points: &[ColorPoint]) -> ScanResult<[[u8; 3]; LUT_SIZE]> {
    if points.len() < 2 {
        return Err(ScanError::InvalidLutDefinition(format!(
            "need at least 2 control points, got {}",
            points.len()
        )));
    }
    if let Some(bad) = points.iter().find(|p| !(0.0..=1.0).contains(&p.t())) {
        return Err(ScanError::InvalidLutDefinition(format!(
            "control point t={} outside [0, 1]",
            bad.t()
        )));
    }

    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.t().total_cmp(&b.t()));

    let mut table = [[0u8; 3]; LUT_SIZE];
    for (i, entry) in table.iter_mut().enumerate() {
        let x = i as f64 / (LUT_SIZE - 1) as f64;
        let rgb = interpolate(&pts, x);
        for c in 0..3 {
            entry[c] = rgb[c].clamp(0.0, 255.0).round() as u8;
        }
    }
    Ok(table)
}

fn interpolate(pts: &[ColorPoint], x: f64) -> [f64; 3] {
    let first = pts[0];
    let last = pts[pts.len() - 1];
    if x <= first.t() {
        return first.rgb();
    }
    if x >= last.t() {
        return last.rgb();
    }
    // Last segment whose left end is <= x.
    let j = pts.iter().rposition(|p| p.t() <= x).unwrap_or(0);
    let (a, b) = (pts[j], pts[(j + 1).min(pts.len() - 1)]);
    let span = b.t() - a.t();
    if span <= 0.0 {
        return b.rgb();
    }
    let w = (x - a.t()) / span;
    let (ca, cb) = (a.rgb(), b.rgb());
    [0, 1, 2].map(|c| ca[c] + (cb[c] - ca[c]) * w)
}

/// Control points of a built-in table.
pub fn builtin_points(name: &str) -> Option<Vec<ColorPoint>> {
    let raw: &[(f64, [u8; 3])] = match name {
        "gray" | "grey" => &[(0.0, [0, 0, 0]), (1.0, [255, 255, 255])],
        "viridis" => &[
            (0.0, [68, 1, 84]),
            (0.125, [71, 44, 122]),
            (0.25, [59, 82, 139]),
            (0.375, [44, 114, 142]),
            (0.5, [33, 145, 140]),
            (0.625, [40, 174, 128]),
            (0.75, [94, 201, 98]),
            (0.875, [170, 220, 50]),
            (1.0, [253, 231, 37]),
        ],
        "turbo" => &[
            (0.0, [48, 18, 59]),
            (0.13, [70, 117, 237]),
            (0.25, [27, 207, 212]),
            (0.38, [61, 249, 132]),
            (0.5, [164, 252, 60]),
            (0.63, [225, 221, 55]),
            (0.75, [254, 155, 45]),
            (0.88, [228, 74, 14]),
            (1.0, [122, 4, 3]),
        ],
        "jet" => &[
            (0.0, [0, 0, 128]),
            (0.125, [0, 0, 255]),
            (0.375, [0, 255, 255]),
            (0.625, [255, 255, 0]),
            (0.875, [255, 0, 0]),
            (1.0, [128, 0, 0]),
        ],
        _ => return None,
    };
    Some(raw.iter().map(|&(t, rgb)| ColorPoint::new(t, rgb)).collect())
}

/// Named LUT source with a build cache.
///
/// Lookup order: cache, `<dir>/<name>.json`, built-ins.
#[derive(Default)]
pub struct LutRegistry {
    dir: Option<PathBuf>,
    cache: Mutex<HashMap<String, Arc<Lut>>>,
}

impl LutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also search `dir` for JSON definitions.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> ScanResult<Arc<Lut>> {
        if let Some(lut) = self.cache.lock().get(name) {
            return Ok(lut.clone());
        }
        let lut = Arc::new(self.build(name)?);
        debug!(lut = %name, "LUT built");
        self.cache
            .lock()
            .insert(name.to_string(), lut.clone());
        Ok(lut)
    }

    fn build(&self, name: &str) -> ScanResult<Lut> {
        if let Some(path) = self.definition_path(name) {
            if path.is_file() {
                return load_definition(&path, name);
            }
        }
        match builtin_points(name) {
            Some(points) => Lut::from_points(name, &points),
            None => Err(ScanError::LutNotFound(name.to_string())),
        }
    }

    fn definition_path(&self, name: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{name}.json")))
    }

    /// Every name [`LutRegistry::get`] can resolve, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = BUILTIN_LUTS.iter().map(|s| s.to_string()).collect();
        if let Some(Ok(entries)) = self.dir.as_ref().map(fs::read_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.insert(stem.to_string());
                    }
                }
            }
        }
        names.into_iter().collect()
    }
}

fn load_definition(path: &Path, fallback_name: &str) -> ScanResult<Lut> {
    let json = fs::read_to_string(path)?;
    let def: LutDefinition = serde_json::from_str(&json).map_err(|e| {
        ScanError::InvalidLutDefinition(format!("{}: {e}", path.display()))
    })?;
    let name = def.name.unwrap_or_else(|| fallback_name.to_string());
    Lut::from_points(name, &def.points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_black_to_white_is_monotonic() {
        let table = build_table(&builtin_points("gray").unwrap()).unwrap();
        assert_eq!(table[0], [0, 0, 0]);
        assert_eq!(table[255], [255, 255, 255]);
        for pair in table.windows(2) {
            for c in 0..3 {
                assert!(pair[1][c] >= pair[0][c]);
            }
        }
        assert_eq!(table[128], [128, 128, 128]);
    }

    #[test]
    fn test_unsorted_points_are_sorted() {
        let sorted = [ColorPoint::new(0.0, [0, 0, 0]), ColorPoint::new(1.0, [255, 0, 0])];
        let reversed = [sorted[1], sorted[0]];
        assert_eq!(build_table(&sorted).unwrap(), build_table(&reversed).unwrap());
    }

    #[test]
    fn test_invalid_definitions() {
        let one = [ColorPoint::new(0.5, [1, 2, 3])];
        assert!(matches!(build_table(&one), Err(ScanError::InvalidLutDefinition(_))));

        let out_of_range = [ColorPoint::new(0.0, [0, 0, 0]), ColorPoint::new(1.5, [0, 0, 0])];
        assert!(matches!(
            build_table(&out_of_range),
            Err(ScanError::InvalidLutDefinition(_))
        ));
    }

    #[test]
    fn test_ends_are_held_outside_points() {
        let pts = [ColorPoint::new(0.25, [10, 10, 10]), ColorPoint::new(0.75, [200, 200, 200])];
        let table = build_table(&pts).unwrap();
        assert_eq!(table[0], [10, 10, 10]);
        assert_eq!(table[255], [200, 200, 200]);
    }

    #[test]
    fn test_lut_index_rounds_and_clamps() {
        assert_eq!(lut_index(-1.0), 0);
        assert_eq!(lut_index(0.5), 128);
        assert_eq!(lut_index(2.0), 255);
        assert_eq!(lut_index(f64::NAN), 0);
    }

    #[test]
    fn test_registry_caches_and_reads_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("redramp.json"),
            r#"{"name": "redramp", "points": [[0, [0, 0, 0]], [1, [255, 0, 0]]]}"#,
        )
        .unwrap();
        let registry = LutRegistry::with_dir(dir.path());

        let a = registry.get("redramp").unwrap();
        let b = registry.get("redramp").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.color(255), [255, 0, 0]);

        for name in BUILTIN_LUTS {
            assert_eq!(registry.get(name).unwrap().name, name);
        }
        assert!(registry.names().contains(&"redramp".to_string()));
        assert!(matches!(registry.get("nope"), Err(ScanError::LutNotFound(_))));
    }
}
