//! Plain-text fixture files: feature and label matrices and score columns.
//!
//! Features and labels are written without header or index using fixed
//! eight-decimal formatting; scores use the shortest representation that
//! reads back to the same `f32`.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use tracing::debug;

use crate::dataset::Dataset;

fn write_text(path: &Path, content: &str, what: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content)
        .with_context(|| format!("failed to write {what} to {}", path.display()))?;
    debug!(path = %path.display(), what, bytes = content.len(), "wrote fixture file");
    Ok(())
}

/// One comma-separated row per sample.
pub fn write_features<P: AsRef<Path>>(path: P, dataset: &Dataset) -> Result<()> {
    let mut out = String::new();
    for row in &dataset.features {
        for (col, value) in row.iter().enumerate() {
            if col > 0 {
                out.push(',');
            }
            let _ = write!(out, "{value:.8}");
        }
        out.push('\n');
    }
    write_text(path.as_ref(), &out, "features")
}

pub fn write_labels<P: AsRef<Path>>(path: P, dataset: &Dataset) -> Result<()> {
    let mut out = String::new();
    for label in &dataset.labels {
        let _ = writeln!(out, "{label:.8}");
    }
    write_text(path.as_ref(), &out, "labels")
}

pub fn write_scores<P: AsRef<Path>>(path: P, scores: &[f32]) -> Result<()> {
    let mut out = String::new();
    for score in scores {
        let _ = writeln!(out, "{score}");
    }
    write_text(path.as_ref(), &out, "scores")
}

pub fn read_scores<P: AsRef<Path>>(path: P) -> Result<Vec<f32>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read scores at {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            line.trim().parse::<f32>().with_context(|| {
                format!("{}:{}: invalid score {:?}", path.display(), idx + 1, line)
            })
        })
        .collect()
}

/// Rows of comma-separated numbers; an empty cell reads as `NaN`.
pub fn read_matrix<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<f32>>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read matrix at {}", path.display()))?;

    let mut rows: Vec<Vec<f32>> = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split(',')
            .map(str::trim)
            .map(|cell| {
                if cell.is_empty() {
                    Ok(f32::NAN)
                } else {
                    cell.parse::<f32>().with_context(|| {
                        format!("{}:{}: invalid number {:?}", path.display(), idx + 1, cell)
                    })
                }
            })
            .collect::<Result<Vec<f32>>>()?;
        if let Some(first) = rows.first() {
            ensure!(
                first.len() == row.len(),
                "{}:{}: expected {} columns, got {}",
                path.display(),
                idx + 1,
                first.len(),
                row.len()
            );
        }
        rows.push(row);
    }
    Ok(rows)
}
