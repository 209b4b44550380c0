//! Dense single-precision feature matrix shared by training and both
//! inference paths. `NaN` marks a missing value.

use anyhow::{Result, ensure};
use ndarray::{Array2, ArrayView1};

use crate::dataset::Dataset;

#[derive(Clone, Debug)]
pub struct DMatrix {
    data: Array2<f32>,
    labels: Option<Vec<f32>>,
    feature_names: Vec<String>,
}

impl DMatrix {
    pub fn new(data: Array2<f32>, labels: Option<Vec<f32>>) -> Result<Self> {
        if let Some(labels) = &labels {
            ensure!(
                labels.len() == data.nrows(),
                "got {} labels for {} rows",
                labels.len(),
                data.nrows()
            );
        }
        let feature_names = (0..data.ncols()).map(|i| format!("f{i}")).collect();
        Ok(Self {
            data,
            labels,
            feature_names,
        })
    }

    /// Narrow the dataset's `f64` values to `f32`, keeping labels and names.
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let rows = dataset.len();
        let cols = dataset.num_features();
        let flat: Vec<f32> = dataset
            .features
            .iter()
            .flat_map(|row| row.iter().map(|&v| v as f32))
            .collect();
        ensure!(
            flat.len() == rows * cols,
            "ragged dataset: expected {} values, got {}",
            rows * cols,
            flat.len()
        );
        let data = Array2::from_shape_vec((rows, cols), flat)?;
        let labels = dataset.labels.iter().map(|&y| y as f32).collect();
        Ok(Self {
            data,
            labels: Some(labels),
            feature_names: dataset.feature_names.clone(),
        })
    }

    /// Row-major values without labels, e.g. read back from `feature.csv`.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        ensure!(
            rows.iter().all(|row| row.len() == cols),
            "rows have differing widths"
        );
        let flat = rows.iter().flatten().copied().collect();
        Self::new(Array2::from_shape_vec((rows.len(), cols), flat)?, None)
    }

    pub fn num_row(&self) -> usize {
        self.data.nrows()
    }

    pub fn num_col(&self) -> usize {
        self.data.ncols()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f32> {
        self.data.row(index)
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[[row, col]]
    }

    pub fn labels(&self) -> Option<&[f32]> {
        self.labels.as_deref()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}
