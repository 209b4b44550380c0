use std::path::Path;

use crate::compare::ComparisonReport;
use crate::pipeline::FixtureReport;

/// One line of the artifact table printed after a run.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub artifact: String,
    pub status: &'static str,
}

pub fn summary_rows(report: &FixtureReport) -> Vec<SummaryRow> {
    let layout = &report.layout;
    [
        &layout.model,
        &layout.features,
        &layout.labels,
        &layout.reference_scores,
        &layout.annotation,
        &layout.library,
        &layout.compiled_scores,
    ]
    .into_iter()
    .map(|path| SummaryRow {
        artifact: file_name(path),
        status: if path.exists() { "ok" } else { "missing" },
    })
    .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn format_comparison(report: &ComparisonReport) -> String {
    format!(
        "{}/{} within {:e} (decimal={}), max |diff| = {:e}",
        report.total - report.mismatched,
        report.total,
        report.tolerance(),
        report.decimal,
        report.max_abs_diff
    )
}

pub fn format_rows(report: &FixtureReport) -> String {
    match report.train_rows {
        Some(train) => format!("{} train / {} test", train, report.test_rows),
        None => format!("{} test", report.test_rows),
    }
}

/// Print the artifact table and comparison line to stdout.
pub fn print_summary(report: &FixtureReport) {
    let rows = summary_rows(report);
    let width = rows
        .iter()
        .map(|r| r.artifact.len())
        .max()
        .unwrap_or(0)
        .max("Artifact".len());

    println!();
    println!("Fixture: {}", report.layout.dir.display());
    println!("{:<width$}  Status", "Artifact");
    println!("{}  {}", "-".repeat(width), "-".repeat(7));
    for row in &rows {
        println!("{:<width$}  {}", row.artifact, row.status);
    }
    println!();
    println!("Rows: {}", format_rows(report));
    println!("Trees: {}", report.num_trees);
    println!("Predictions: {}", format_comparison(&report.comparison));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FixtureLayout;

    fn report(dir: &Path) -> FixtureReport {
        FixtureReport {
            layout: FixtureLayout::new(dir),
            train_rows: Some(455),
            test_rows: 114,
            num_trees: 100,
            comparison: ComparisonReport {
                decimal: 5,
                total: 114,
                mismatched: 0,
                max_abs_diff: 0.0,
                max_rel_diff: 0.0,
            },
        }
    }

    #[test]
    fn test_summary_rows_mark_missing_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("feature.csv"), "1.0\n").expect("write");
        let rows = summary_rows(&report(tmp.path()));
        assert_eq!(rows.len(), 7);
        let features = rows.iter().find(|r| r.artifact == "feature.csv").expect("row");
        assert_eq!(features.status, "ok");
        let model = rows.iter().find(|r| r.artifact == "xgboost.model").expect("row");
        assert_eq!(model.status, "missing");
    }

    #[test]
    fn test_format_comparison() {
        let line = format_comparison(&report(Path::new(".")).comparison);
        assert!(line.starts_with("114/114 within"), "{line}");
        assert!(line.contains("decimal=5"), "{line}");
    }

    #[test]
    fn test_format_rows_with_and_without_train_split() {
        let mut generated = report(Path::new("."));
        assert_eq!(format_rows(&generated), "455 train / 114 test");
        generated.train_rows = Some(0);
        assert_eq!(format_rows(&generated), "0 train / 114 test");
        generated.train_rows = None;
        assert_eq!(format_rows(&generated), "114 test");
    }
}
