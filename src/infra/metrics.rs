// ============================================================
// Layer 6 — Scalar Summary Writer
// ============================================================
// Records tagged scalars (per-step losses, per-epoch validation
// metrics) as CSV rows, one file per writer:
//
//   summary_dir/
//     20240101-120000/          ← one directory per run
//       train/scalars.csv
//       valid/scalars.csv
//
// Row format:
//   tag,step,value
//   loss,0,4.158312
//   logit_loss,0,4.158312
//   ...
//
// The directory and header are created on the first write, and
// rows are appended, so a writer that never records anything
// leaves no trace on disk.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

const HEADER: &str = "tag,step,value";

/// One recorded scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRow {
    pub tag:   String,
    pub step:  usize,
    pub value: f64,
}

/// `<summary_dir>/<YYYYmmdd-HHMMSS>` for a run starting now.
pub fn run_dir(summary_dir: &Path) -> PathBuf {
    summary_dir.join(Local::now().format("%Y%m%d-%H%M%S").to_string())
}

pub struct SummaryWriter {
    csv_path: PathBuf,
}

impl SummaryWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { csv_path: dir.into().join("scalars.csv") }
    }

    pub fn scalar(&self, tag: &str, step: usize, value: f64) -> Result<()> {
        self.scalars(step, &[(tag, value)])
    }

    pub fn scalars(&self, step: usize, values: &[(&str, f64)]) -> Result<()> {
        let mut f = self.open()?;
        for (tag, value) in values {
            writeln!(f, "{tag},{step},{value:.6}")
                .with_context(|| format!("Cannot append to '{}'", self.csv_path.display()))?;
        }
        Ok(())
    }

    fn open(&self) -> Result<fs::File> {
        if !self.csv_path.exists() {
            if let Some(parent) = self.csv_path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create '{}'", parent.display()))?;
            }
            let mut f = fs::File::create(&self.csv_path)
                .with_context(|| format!("Cannot create '{}'", self.csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created summary file '{}'", self.csv_path.display());
        }
        OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))
    }

    /// Read back every recorded row, in write order.
    pub fn read_all(&self) -> Result<Vec<ScalarRow>> {
        if !self.csv_path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.csv_path)
            .with_context(|| format!("Cannot read '{}'", self.csv_path.display()))?;
        text.lines()
            .skip(1)
            .filter(|line| !line.is_empty())
            .map(|line| {
                let mut parts = line.rsplitn(3, ',');
                let value = parts.next().unwrap_or_default();
                let step  = parts.next().unwrap_or_default();
                let tag   = parts.next().unwrap_or_default();
                Ok(ScalarRow {
                    tag:   tag.to_string(),
                    step:  step.parse().with_context(|| format!("Bad step in row '{line}'"))?,
                    value: value.parse().with_context(|| format!("Bad value in row '{line}'"))?,
                })
            })
            .collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_round_trip() {
        let dir    = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(dir.path().join("run").join("valid"));
        writer.scalars(3, &[("acc", 0.75), ("r=tpr", 0.5)]).unwrap();
        writer.scalar("acc", 4, 0.8).unwrap();

        let rows = writer.read_all().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], ScalarRow { tag: "r=tpr".into(), step: 3, value: 0.5 });
        assert_eq!(rows[2].step, 4);
    }

    #[test]
    fn test_nothing_written_until_first_scalar() {
        let dir    = tempfile::tempdir().unwrap();
        let writer = SummaryWriter::new(dir.path().join("train"));
        assert!(!dir.path().join("train").exists());
        assert!(writer.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_run_dir_is_timestamped() {
        let dir  = run_dir(Path::new("summary"));
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), "20240101-120000".len());
        assert_eq!(&name[8..9], "-");
    }
}
