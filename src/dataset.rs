//! Canned tabular dataset loading and the seeded train/test split.
//!
//! CSV layout: a header line `n_samples,n_features,<class name>...` followed
//! by one row per sample holding `n_features` numeric values and an integer
//! class label in the last column.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail, ensure};
use tracing::info;

use crate::random::Mt19937;

const BREAST_CANCER_CSV: &str = include_str!("../data/breast_cancer.csv");

pub const BREAST_CANCER_FEATURES: [&str; 30] = [
    "mean radius",
    "mean texture",
    "mean perimeter",
    "mean area",
    "mean smoothness",
    "mean compactness",
    "mean concavity",
    "mean concave points",
    "mean symmetry",
    "mean fractal dimension",
    "radius error",
    "texture error",
    "perimeter error",
    "area error",
    "smoothness error",
    "compactness error",
    "concavity error",
    "concave points error",
    "symmetry error",
    "fractal dimension error",
    "worst radius",
    "worst texture",
    "worst perimeter",
    "worst area",
    "worst smoothness",
    "worst compactness",
    "worst concavity",
    "worst concave points",
    "worst symmetry",
    "worst fractal dimension",
];

/// Samples with named numeric features and a class label per row.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub target_names: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<f64>,
}

/// Both halves of a seeded split plus the original row indices they came from.
#[derive(Clone, Debug)]
pub struct Split {
    pub train: Dataset,
    pub test: Dataset,
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

impl Dataset {
    /// The bundled binary classification dataset (569 rows, 30 features).
    ///
    /// The values are synthetic: they follow the shape, feature names and
    /// class balance of scikit-learn's `load_breast_cancer` but are not the
    /// real measurements. Load an export of the real data with
    /// [`Dataset::from_csv`] to reproduce fixtures built from it.
    pub fn breast_cancer() -> Result<Self> {
        let names = BREAST_CANCER_FEATURES.iter().map(|s| s.to_string()).collect();
        Self::from_csv_str(BREAST_CANCER_CSV, Some(names))
            .context("bundled breast cancer dataset is malformed")
    }

    /// Load a dataset file; features get positional names (`f0`, `f1`, ...)
    /// unless the column count matches the bundled dataset.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dataset at {}", path.display()))?;
        let dataset = Self::from_csv_str(&content, None)
            .with_context(|| format!("failed to parse dataset at {}", path.display()))?;
        info!(
            path = %path.display(),
            rows = dataset.len(),
            features = dataset.num_features(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    pub fn from_csv_str(content: &str, feature_names: Option<Vec<String>>) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        let (_, header) = lines.next().ok_or_else(|| anyhow!("dataset is empty"))?;
        let header: Vec<&str> = header.split(',').map(str::trim).collect();
        ensure!(
            header.len() >= 2,
            "header must hold at least the sample and feature counts"
        );
        let n_samples: usize = header[0]
            .parse()
            .with_context(|| format!("invalid sample count {:?} in header", header[0]))?;
        let n_features: usize = header[1]
            .parse()
            .with_context(|| format!("invalid feature count {:?} in header", header[1]))?;
        ensure!(n_features > 0, "dataset declares zero features");
        let target_names = header[2..].iter().map(|s| s.to_string()).collect();

        let feature_names = match feature_names {
            Some(names) => {
                ensure!(
                    names.len() == n_features,
                    "expected {} feature names, got {}",
                    n_features,
                    names.len()
                );
                names
            }
            None if n_features == BREAST_CANCER_FEATURES.len() => {
                BREAST_CANCER_FEATURES.iter().map(|s| s.to_string()).collect()
            }
            None => (0..n_features).map(|i| format!("f{i}")).collect(),
        };

        let mut features = Vec::with_capacity(n_samples);
        let mut labels = Vec::with_capacity(n_samples);
        for (line_no, line) in lines {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() != n_features + 1 {
                bail!(
                    "line {}: expected {} columns, got {}",
                    line_no,
                    n_features + 1,
                    parts.len()
                );
            }

            let mut row = Vec::with_capacity(n_features);
            for (col, part) in parts[..n_features].iter().enumerate() {
                let value = part.parse::<f64>().with_context(|| {
                    format!("line {}, column {}: invalid number {:?}", line_no, col + 1, part)
                })?;
                ensure!(
                    value.is_finite() || value.is_nan(),
                    "line {}, column {}: infinite value {:?}",
                    line_no,
                    col + 1,
                    part
                );
                row.push(value);
            }
            let label = parts[n_features]
                .parse::<i64>()
                .with_context(|| format!("line {}: invalid label {:?}", line_no, parts[n_features]))?;

            features.push(row);
            labels.push(label as f64);
        }

        ensure!(!features.is_empty(), "dataset has no rows");
        ensure!(
            features.len() == n_samples,
            "header declares {} samples but {} rows were read",
            n_samples,
            features.len()
        );

        Ok(Self {
            feature_names,
            target_names,
            features,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            feature_names: self.feature_names.clone(),
            target_names: self.target_names.clone(),
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

/// Number of test rows for a fractional test size: `ceil(test_size * n)`.
pub fn test_rows(n_samples: usize, test_size: f64) -> usize {
    (test_size * n_samples as f64).ceil() as usize
}

/// Shuffle with the seeded generator, take the first `ceil(test_size * n)`
/// permuted rows as test and the rest as train.
pub fn train_test_split(dataset: &Dataset, test_size: f64, seed: u32) -> Result<Split> {
    ensure!(
        test_size > 0.0 && test_size < 1.0,
        "test_size must be within (0, 1), got {test_size}"
    );
    let n = dataset.len();
    let n_test = test_rows(n, test_size);
    ensure!(
        n_test > 0 && n_test < n,
        "test_size {} leaves an empty partition for {} samples",
        test_size,
        n
    );

    let permutation = Mt19937::new(seed).permutation(n);
    let test_indices = permutation[..n_test].to_vec();
    let train_indices = permutation[n_test..].to_vec();

    info!(
        seed,
        test_size,
        train = train_indices.len(),
        test = test_indices.len(),
        "split dataset"
    );

    Ok(Split {
        train: dataset.select(&train_indices),
        test: dataset.select(&test_indices),
        train_indices,
        test_indices,
    })
}
