// src/diagnostics.rs

use log::{debug, info, warn};
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::ThreadSafeStdError;
use crate::matrix_io;
use crate::named_matrix::NamedMatrix;

/// How a block of draw variables was correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawMethod {
    /// Independent columns scaled by their standard deviation.
    DiagonalScaling,
    /// Projection through a randomized eigendecomposition.
    EigenProjection,
}

/// Per-block details of one draw.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupDrawDetail {
    pub group_name: String,
    pub num_vars: usize,
    pub method: Option<DrawMethod>,
    /// Minimum diagonal variance used to condition the block.
    pub scale_factor: Option<f64>,
    pub largest_eigenvalue: Option<f64>,
    pub smallest_eigenvalue: Option<f64>,
    /// Negative eigenvalues set to zero before the square root.
    pub clamped_eigenvalues: usize,
}

/// Summary of a draw, serializable to JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrawReport {
    pub num_reals: usize,
    pub num_draw_vars: usize,
    pub grouped: bool,
    pub seed: u64,
    pub groups: Vec<GroupDrawDetail>,
    pub elapsed_seconds: f64,
    pub notes: String,
}

/// Collects events, writes matrix dumps and the draw report.
///
/// Level 0 is silent, level 1 records events, levels above 2 also dump
/// intermediate matrices as ascii files under `output_dir`.
#[derive(Debug, Clone)]
pub struct DiagnosticsSink {
    level: u8,
    output_dir: PathBuf,
    events: Vec<String>,
    reports: Vec<DrawReport>,
}

impl Default for DiagnosticsSink {
    fn default() -> Self {
        DiagnosticsSink::new(1, std::env::temp_dir())
    }
}

impl DiagnosticsSink {
    pub fn new<P: Into<PathBuf>>(level: u8, output_dir: P) -> Self {
        Self {
            level,
            output_dir: output_dir.into(),
            events: Vec::new(),
            reports: Vec::new(),
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn log_event(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.level > 0 {
            info!("{}", message);
            self.events.push(message);
        } else {
            debug!("{}", message);
        }
    }

    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn record_report(&mut self, report: DrawReport) {
        self.reports.push(report);
    }

    pub fn reports(&self) -> &[DrawReport] {
        &self.reports
    }

    pub fn last_report(&self) -> Option<&DrawReport> {
        self.reports.last()
    }

    /// Writes `matrix` as `<tag>.mat` when the level asks for dumps.
    pub fn dump_matrix(&mut self, tag: &str, matrix: &NamedMatrix) -> Result<(), ThreadSafeStdError> {
        if self.level <= 2 {
            return Ok(());
        }
        let path = self.output_dir.join(format!("{}.mat", tag));
        matrix.to_ascii(&path)?;
        self.log_event(format!("saved {} to {:?}", tag, path));
        Ok(())
    }

    /// Dense variant of [`dump_matrix`](Self::dump_matrix) for unlabelled intermediates.
    pub fn dump_array(&mut self, tag: &str, values: &ArrayView2<f64>) -> Result<(), ThreadSafeStdError> {
        if self.level <= 2 {
            return Ok(());
        }
        let rows: Vec<String> = (0..values.nrows()).map(|i| format!("ROW_{}", i)).collect();
        let cols: Vec<String> = (0..values.ncols()).map(|j| format!("COL_{}", j)).collect();
        let matrix = NamedMatrix::from_dense(rows, cols, &values.to_owned())?;
        self.dump_matrix(tag, &matrix)
    }

    /// Always writes `trouble.csv`; returns its path.
    pub fn dump_trouble(
        &mut self,
        real_names: &[String],
        var_names: &[String],
        values: &ArrayView2<f64>,
    ) -> Result<PathBuf, ThreadSafeStdError> {
        let path = self.output_dir.join("trouble.csv");
        matrix_io::write_labeled_csv(&path, "real_name", real_names, var_names, values)?;
        warn!("invalid values found in draw, offending matrix saved to {:?}", path);
        self.events.push(format!("trouble matrix saved to {:?}", path));
        Ok(path)
    }

    /// Writes the most recent draw report as pretty JSON.
    pub fn write_report_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ThreadSafeStdError> {
        let report = self.reports.last().ok_or("no draw report has been recorded")?;
        let file = File::create(path.as_ref())
            .map_err(|e| format!("Failed to create report file {:?}: {}", path.as_ref(), e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), report)
            .map_err(|e| format!("Failed to serialize draw report: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn silent_sink_keeps_no_events() {
        let mut sink = DiagnosticsSink::new(0, std::env::temp_dir());
        sink.log_event("hidden");
        assert!(sink.events().is_empty());
    }

    #[test]
    fn matrix_dumps_only_above_level_two() {
        let dir = tempfile::tempdir().unwrap();
        let m = NamedMatrix::from_diagonal(vec!["A".into()], array![1.0]).unwrap();
        let mut quiet = DiagnosticsSink::new(2, dir.path());
        quiet.dump_matrix("quiet", &m).unwrap();
        assert!(!dir.path().join("quiet.mat").exists());
        let mut loud = DiagnosticsSink::new(3, dir.path());
        loud.dump_matrix("loud", &m).unwrap();
        assert!(dir.path().join("loud.mat").exists());
    }

    #[test]
    fn report_serializes_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DiagnosticsSink::new(1, dir.path());
        sink.record_report(DrawReport {
            num_reals: 5,
            num_draw_vars: 2,
            groups: vec![GroupDrawDetail {
                group_name: "ALL".into(),
                num_vars: 2,
                method: Some(DrawMethod::DiagonalScaling),
                ..Default::default()
            }],
            ..Default::default()
        });
        let path = dir.path().join("report.json");
        sink.write_report_json(&path).unwrap();
        let parsed: DrawReport = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(parsed.num_reals, 5);
        assert_eq!(parsed.groups[0].method, Some(DrawMethod::DiagonalScaling));
    }
}
