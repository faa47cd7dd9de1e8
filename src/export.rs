//! Derived artifacts: `x,y,value` tables and rendered PNG heatmaps.
//!
//! Exports are regenerable from the stored trace grids and are never read
//! back by the scanner.

use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::VisualizationConfig;
use crate::error::ScanResult;
use crate::render::{render_heatmap, HeatmapImage, Lut, LutRegistry, RenderOptions, SamplePoint, ValueGrid};
use crate::scan::task_files::TaskDir;
use crate::scan::trace_store::TraceGrid;

/// CSV header row.
pub const CSV_HEADER: [&str; 3] = ["x", "y", "value"];

fn ensure_parent(path: &Path) -> ScanResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write `x,y,value` rows, y outer and x inner.
pub fn export_grid_csv(grid: &ValueGrid, path: &Path) -> ScanResult<PathBuf> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record(CSV_HEADER)?;
    for p in grid.to_points(0.0) {
        writer.serialize((p.x, p.y, p.value))?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = grid.values().len(), "CSV exported");
    Ok(path.to_path_buf())
}

/// Frequency plane 0 of a stored trace as `x,y,value` rows.
pub fn export_trace_csv(grid: &TraceGrid, path: &Path) -> ScanResult<PathBuf> {
    export_grid_csv(&ValueGrid::from_trace_grid(grid, 0)?, path)
}

/// Save a rendered heatmap as PNG.
pub fn export_heatmap_png(heatmap: &HeatmapImage, path: &Path) -> ScanResult<PathBuf> {
    ensure_parent(path)?;
    heatmap.image.save_with_format(path, image::ImageFormat::Png)?;
    info!(
        path = %path.display(),
        width = heatmap.width,
        height = heatmap.height,
        "Heatmap exported"
    );
    Ok(path.to_path_buf())
}

/// Summary of [`export_points_png`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointsExport {
    pub out: PathBuf,
    pub nx: usize,
    pub ny: usize,
    pub vmin: f64,
    pub vmax: f64,
}

/// Grid scattered points (minimum gap fill), render with a colourbar and save.
pub fn export_points_png(
    points: &[SamplePoint],
    lut: &Lut,
    opts: &RenderOptions,
    path: &Path,
) -> ScanResult<PointsExport> {
    let grid = ValueGrid::from_points(points);
    let opts = RenderOptions {
        colorbar: true,
        ..opts.clone()
    };
    let heatmap = render_heatmap(&grid, lut, &opts)?;
    let out = export_heatmap_png(&heatmap, path)?;
    Ok(PointsExport {
        out,
        nx: grid.nx(),
        ny: grid.ny(),
        vmin: heatmap.vmin,
        vmax: heatmap.vmax,
    })
}

/// Load one trace of a task and render it.
pub fn render_task_trace(
    task: &TaskDir,
    trace_name: &str,
    luts: &LutRegistry,
    opts: &RenderOptions,
) -> ScanResult<(ValueGrid, HeatmapImage)> {
    let stored = task.trace_store()?.load(trace_name)?;
    let grid = ValueGrid::from_trace_grid(&stored, 0)?;
    let lut = luts.get(&opts.lut)?;
    let heatmap = render_heatmap(&grid, &lut, opts)?;
    Ok((grid, heatmap))
}

/// Files written by [`export_task_trace`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskExport {
    pub csv: PathBuf,
    pub png: PathBuf,
    pub vmin: f64,
    pub vmax: f64,
}

/// Write `exports/points_<trace>.csv` and `exports/heatmap_<trace>.png`.
pub fn export_task_trace(
    task: &TaskDir,
    trace_name: &str,
    luts: &LutRegistry,
    vis: &VisualizationConfig,
) -> ScanResult<TaskExport> {
    let opts = vis.render_options(true);
    let (grid, heatmap) = render_task_trace(task, trace_name, luts, &opts)?;
    let csv = export_grid_csv(&grid, &task.csv_export_path(trace_name))?;
    let png = export_heatmap_png(&heatmap, &task.png_export_path(trace_name))?;
    Ok(TaskExport {
        csv,
        png,
        vmin: heatmap.vmin,
        vmax: heatmap.vmax,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::lut::builtin_points;
    use tempfile::tempdir;

    #[test]
    fn test_csv_rows_are_row_major() {
        let dir = tempdir().unwrap();
        let grid = TraceGrid::new(
            "T1",
            "dB",
            vec![0.0, 1.0],
            vec![0.0, 2.0],
            vec![1e9],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        let path = export_trace_csv(&grid, &dir.path().join("out").join("t.csv")).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            vec!["x", "y", "value"]
        );
        let rows: Vec<(f64, f64, f64)> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(
            rows,
            vec![(0.0, 0.0, 1.0), (1.0, 0.0, 2.0), (0.0, 2.0, 3.0), (1.0, 2.0, 4.0)]
        );
    }

    #[test]
    fn test_points_png_reports_grid_and_bounds() {
        let dir = tempdir().unwrap();
        let lut = Lut::from_points("gray", &builtin_points("gray").unwrap()).unwrap();
        let points = [
            SamplePoint::new(0.0, 0.0, 1.0, -2.0),
            SamplePoint::new(1.0, 0.0, 1.0, 4.0),
            SamplePoint::new(2.0, 1.0, 1.0, 1.0),
        ];
        let opts = RenderOptions {
            scale: 10,
            ..Default::default()
        };
        let out = dir.path().join("heatmap.png");
        let summary = export_points_png(&points, &lut, &opts, &out).unwrap();

        assert_eq!((summary.nx, summary.ny), (3, 2));
        assert_eq!((summary.vmin, summary.vmax), (-2.0, 4.0));
        let img = image::open(&out).unwrap();
        assert_eq!(img.height(), 20);
        assert_eq!(img.width(), 30 + crate::render::heatmap::COLORBAR_MARGIN);
    }
}
