//! Per-trace grid persistence.
//!
//! Each completed scan writes one bundle per trace under
//! `<task_dir>/traces/<sanitized name>.grid`. A bundle is self-describing:
//!
//! ```text
//! +----------+-----------------+----------------------+---------------------+
//! | magic 8B | header len u32  | JSON header          | f64 LE array data   |
//! | NFSGRID1 | little endian   | name/unit/arrays[]   | in header order     |
//! +----------+-----------------+----------------------+---------------------+
//! ```
//!
//! The header lists every array with its dtype and shape, so a reader needs
//! no out-of-band schema.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ScanError, ScanResult};

const MAGIC: &[u8; 8] = b"NFSGRID1";
const FORMAT_VERSION: u32 = 1;
const DTYPE_F64_LE: &str = "<f8";
/// File extension of trace bundles.
pub const BUNDLE_EXTENSION: &str = "grid";

/// One scalar grid per trace: `values[iy][ix][k]` over `ys × xs × freqs`.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceGrid {
    pub trace_name: String,
    pub unit: String,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub freqs: Vec<f64>,
    values: Vec<f64>,
}

impl TraceGrid {
    /// Build a grid from flat row-major values (`iy` outermost, then `ix`, then `k`).
    pub fn new(
        trace_name: impl Into<String>,
        unit: impl Into<String>,
        xs: Vec<f64>,
        ys: Vec<f64>,
        freqs: Vec<f64>,
        values: Vec<f64>,
    ) -> ScanResult<Self> {
        let expected = xs.len() * ys.len() * freqs.len();
        if values.len() != expected {
            return Err(ScanError::BundleFormat(format!(
                "values has {} elements, expected {} ({} y × {} x × {} f)",
                values.len(),
                expected,
                ys.len(),
                xs.len(),
                freqs.len()
            )));
        }
        Ok(Self {
            trace_name: trace_name.into(),
            unit: unit.into(),
            xs,
            ys,
            freqs,
            values,
        })
    }

    /// A grid of the given axes with every value set to `fill`.
    pub fn filled(
        trace_name: impl Into<String>,
        unit: impl Into<String>,
        xs: Vec<f64>,
        ys: Vec<f64>,
        freqs: Vec<f64>,
        fill: f64,
    ) -> Self {
        let len = xs.len() * ys.len() * freqs.len();
        Self {
            trace_name: trace_name.into(),
            unit: unit.into(),
            xs,
            ys,
            freqs,
            values: vec![fill; len],
        }
    }

    pub fn nx(&self) -> usize {
        self.xs.len()
    }

    pub fn ny(&self) -> usize {
        self.ys.len()
    }

    pub fn nf(&self) -> usize {
        self.freqs.len()
    }

    /// Shape as `[ny, nx, nf]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.ny(), self.nx(), self.nf()]
    }

    fn offset(&self, iy: usize, ix: usize, k: usize) -> usize {
        (iy * self.nx() + ix) * self.nf() + k
    }

    pub fn value(&self, iy: usize, ix: usize, k: usize) -> Option<f64> {
        if iy < self.ny() && ix < self.nx() && k < self.nf() {
            self.values.get(self.offset(iy, ix, k)).copied()
        } else {
            None
        }
    }

    /// Write one cell. Out-of-range indices are ignored and return `false`.
    pub fn set(&mut self, iy: usize, ix: usize, k: usize, value: f64) -> bool {
        if iy < self.ny() && ix < self.nx() && k < self.nf() {
            let off = self.offset(iy, ix, k);
            self.values[off] = value;
            true
        } else {
            false
        }
    }

    /// Flat values in `[iy][ix][k]` order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The 2D slice for frequency index `k`, row-major `ny × nx`.
    pub fn plane(&self, k: usize) -> Option<Vec<f64>> {
        if k >= self.nf() {
            return None;
        }
        Some(self.values.iter().skip(k).step_by(self.nf()).copied().collect())
    }

    /// `(x_min, x_max, y_min, y_max)` of the sample coordinates.
    pub fn extents(&self) -> Option<(f64, f64, f64, f64)> {
        let (x0, x1) = min_max(&self.xs)?;
        let (y0, y1) = min_max(&self.ys)?;
        Some((x0, x1, y0, y1))
    }

    /// Encode into the bundle format.
    pub fn encode(&self) -> ScanResult<Vec<u8>> {
        let header = BundleHeader {
            format_version: FORMAT_VERSION,
            trace_name: self.trace_name.clone(),
            unit: self.unit.clone(),
            arrays: vec![
                ArrayHeader::f64("xs", vec![self.nx()]),
                ArrayHeader::f64("ys", vec![self.ny()]),
                ArrayHeader::f64("freqs", vec![self.nf()]),
                ArrayHeader::f64("values", self.shape().to_vec()),
            ],
        };
        let header_bytes = serde_json::to_vec(&header)?;
        let header_len = u32::try_from(header_bytes.len())
            .map_err(|_| ScanError::BundleFormat("header too large".to_string()))?;

        let n_values = self.xs.len() + self.ys.len() + self.freqs.len() + self.values.len();
        let mut buf = BytesMut::with_capacity(MAGIC.len() + 4 + header_bytes.len() + n_values * 8);
        buf.put_slice(MAGIC);
        buf.put_u32_le(header_len);
        buf.put_slice(&header_bytes);
        for array in [&self.xs, &self.ys, &self.freqs, &self.values] {
            for v in array.iter() {
                buf.put_f64_le(*v);
            }
        }
        Ok(buf.to_vec())
    }

    /// Decode a bundle produced by [`TraceGrid::encode`].
    pub fn decode(bytes: &[u8]) -> ScanResult<Self> {
        let mut buf = bytes;
        if buf.remaining() < MAGIC.len() + 4 || &buf[..MAGIC.len()] != MAGIC {
            return Err(ScanError::BundleFormat("bad magic".to_string()));
        }
        buf.advance(MAGIC.len());
        let header_len = buf.get_u32_le() as usize;
        if buf.remaining() < header_len {
            return Err(ScanError::BundleFormat("truncated header".to_string()));
        }
        let header: BundleHeader = serde_json::from_slice(&buf[..header_len])?;
        buf.advance(header_len);
        if header.format_version != FORMAT_VERSION {
            return Err(ScanError::BundleFormat(format!(
                "unsupported format version {}",
                header.format_version
            )));
        }

        let mut xs = None;
        let mut ys = None;
        let mut freqs = None;
        let mut values = None;
        for array in &header.arrays {
            if array.dtype != DTYPE_F64_LE {
                return Err(ScanError::BundleFormat(format!(
                    "array '{}' has unsupported dtype {}",
                    array.name, array.dtype
                )));
            }
            let len: usize = array.shape.iter().product();
            if buf.remaining() < len * 8 {
                return Err(ScanError::BundleFormat(format!(
                    "array '{}' truncated",
                    array.name
                )));
            }
            let data: Vec<f64> = (0..len).map(|_| buf.get_f64_le()).collect();
            match array.name.as_str() {
                "xs" => xs = Some(data),
                "ys" => ys = Some(data),
                "freqs" => freqs = Some(data),
                "values" => values = Some((array.shape.clone(), data)),
                other => debug!(array = other, "Skipping unknown bundle array"),
            }
        }
        if buf.has_remaining() {
            return Err(ScanError::BundleFormat(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }

        let missing = |name: &str| ScanError::BundleFormat(format!("missing array '{name}'"));
        let xs = xs.ok_or_else(|| missing("xs"))?;
        let ys = ys.ok_or_else(|| missing("ys"))?;
        let freqs = freqs.ok_or_else(|| missing("freqs"))?;
        let (shape, values) = values.ok_or_else(|| missing("values"))?;
        if shape != [ys.len(), xs.len(), freqs.len()] {
            return Err(ScanError::BundleFormat(format!(
                "values shape {shape:?} does not match axes"
            )));
        }
        Self::new(header.trace_name, header.unit, xs, ys, freqs, values)
    }
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct BundleHeader {
    format_version: u32,
    trace_name: String,
    unit: String,
    arrays: Vec<ArrayHeader>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArrayHeader {
    name: String,
    dtype: String,
    shape: Vec<usize>,
}

impl ArrayHeader {
    fn f64(name: &str, shape: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            dtype: DTYPE_F64_LE.to_string(),
            shape,
        }
    }
}

/// Map a trace name to a filesystem-safe storage key.
///
/// Every character outside `[A-Za-z0-9_.-]` becomes `_`.
pub fn sanitize_trace_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Reads and writes trace bundles inside one task directory.
#[derive(Debug, Clone)]
pub struct TraceStore {
    traces_dir: PathBuf,
}

impl TraceStore {
    /// Open the store for `task_dir`, creating `task_dir/traces` if needed.
    pub fn open(task_dir: impl AsRef<Path>) -> ScanResult<Self> {
        let traces_dir = task_dir.as_ref().join("traces");
        fs::create_dir_all(&traces_dir)?;
        Ok(Self { traces_dir })
    }

    pub fn traces_dir(&self) -> &Path {
        &self.traces_dir
    }

    /// Bundle path for a trace name (sanitized).
    pub fn trace_path(&self, trace_name: &str) -> PathBuf {
        self.traces_dir.join(format!(
            "{}.{}",
            sanitize_trace_name(trace_name),
            BUNDLE_EXTENSION
        ))
    }

    /// Persist `grid`, overwriting any existing bundle for the same key.
    pub fn save(&self, grid: &TraceGrid) -> ScanResult<PathBuf> {
        let path = self.trace_path(&grid.trace_name);
        let bytes = grid.encode()?;
        let tmp = path.with_extension(format!("{BUNDLE_EXTENSION}.tmp"));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        info!(
            trace = %grid.trace_name,
            path = %path.display(),
            ny = grid.ny(),
            nx = grid.nx(),
            "Trace grid saved"
        );
        Ok(path)
    }

    /// Load the bundle for `trace_name`.
    pub fn load(&self, trace_name: &str) -> ScanResult<TraceGrid> {
        let path = self.trace_path(trace_name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScanError::TraceNotFound(trace_name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        TraceGrid::decode(&bytes)
    }

    /// Sorted sanitized keys of every bundle in the directory.
    pub fn list(&self) -> ScanResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.traces_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BUNDLE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_grid(name: &str) -> TraceGrid {
        let xs = vec![0.0, 0.5, 1.0];
        let ys = vec![-1.0, 1.0];
        let values = vec![1.25, -3.5, f64::MIN_POSITIVE, 7.0, 0.1 + 0.2, -0.0];
        TraceGrid::new(name, "dBm", xs, ys, vec![5e9], values).unwrap()
    }

    #[test]
    fn test_sanitize_trace_name() {
        assert_eq!(sanitize_trace_name("Trc1_S21"), "Trc1_S21");
        assert_eq!(sanitize_trace_name("Trc 1/S21:a"), "Trc_1_S21_a");
        assert_eq!(sanitize_trace_name("v1.2-x"), "v1.2-x");
        assert_eq!(sanitize_trace_name("µ"), "_");
    }

    #[test]
    fn test_grid_shape_validation() {
        let err = TraceGrid::new("t", "dB", vec![0.0, 1.0], vec![0.0], vec![1.0], vec![1.0]);
        assert!(matches!(err, Err(ScanError::BundleFormat(_))));
    }

    #[test]
    fn test_grid_indexing_and_plane() {
        let mut grid = TraceGrid::filled("t", "dB", vec![0.0, 1.0], vec![0.0, 1.0], vec![1.0, 2.0], 0.0);
        assert!(grid.set(1, 0, 1, 9.0));
        assert!(!grid.set(2, 0, 0, 1.0));
        assert_eq!(grid.value(1, 0, 1), Some(9.0));
        assert_eq!(grid.plane(1).unwrap(), vec![0.0, 0.0, 9.0, 0.0]);
        assert!(grid.plane(2).is_none());
    }

    #[test]
    fn test_save_load_is_bit_identical() {
        let dir = tempdir().unwrap();
        let store = TraceStore::open(dir.path()).unwrap();
        let grid = sample_grid("Trc1 S21");

        store.save(&grid).unwrap();
        let loaded = store.load("Trc1 S21").unwrap();

        assert_eq!(loaded.trace_name, "Trc1 S21");
        assert_eq!(loaded.unit, "dBm");
        let bits = |v: &[f64]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&loaded.xs), bits(&grid.xs));
        assert_eq!(bits(&loaded.ys), bits(&grid.ys));
        assert_eq!(bits(&loaded.freqs), bits(&grid.freqs));
        assert_eq!(bits(loaded.values()), bits(grid.values()));
    }

    #[test]
    fn test_save_overwrites_and_lists_sanitized_keys() {
        let dir = tempdir().unwrap();
        let store = TraceStore::open(dir.path()).unwrap();

        store.save(&sample_grid("b/trace")).unwrap();
        store.save(&sample_grid("a")).unwrap();
        let mut changed = sample_grid("a");
        changed.set(0, 0, 0, 42.0);
        store.save(&changed).unwrap();

        assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b_trace".to_string()]);
        assert_eq!(store.load("a").unwrap().value(0, 0, 0), Some(42.0));
    }

    #[test]
    fn test_missing_trace_is_not_found() {
        let dir = tempdir().unwrap();
        let store = TraceStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load("absent"),
            Err(ScanError::TraceNotFound(name)) if name == "absent"
        ));
    }

    #[test]
    fn test_decode_rejects_corrupt_bundles() {
        let bytes = sample_grid("t").encode().unwrap();
        assert!(TraceGrid::decode(&bytes[..bytes.len() - 3]).is_err());
        assert!(TraceGrid::decode(b"NOTAGRID\0\0\0\0").is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(TraceGrid::decode(&trailing).is_err());
    }
}
