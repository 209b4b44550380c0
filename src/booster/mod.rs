//! Gradient-boosted tree ensemble: training, in-process inference and the
//! on-disk model format.
//!
//! # Submodules
//! - [`tree`]: node storage and the exact greedy grower
//! - [`model_io`]: JSON model document (xgboost layout)

pub mod model_io;
pub mod tree;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, ensure};
use tracing::{debug, info};

use crate::matrix::DMatrix;
use tree::{GradientPair, RegTree, TreeGrower};

const MIN_HESSIAN: f32 = 1e-16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Objective {
    BinaryLogistic,
    RegSquaredError,
}

impl Objective {
    pub fn name(self) -> &'static str {
        match self {
            Objective::BinaryLogistic => "binary:logistic",
            Objective::RegSquaredError => "reg:squarederror",
        }
    }

    /// Name of the output transform applied on top of the raw margin.
    pub fn pred_transform(self) -> &'static str {
        match self {
            Objective::BinaryLogistic => "sigmoid",
            Objective::RegSquaredError => "identity",
        }
    }

    pub fn prob_to_margin(self, base_score: f32) -> Result<f32> {
        match self {
            Objective::BinaryLogistic => {
                ensure!(
                    base_score > 0.0 && base_score < 1.0,
                    "base_score must be in (0, 1) for binary:logistic, got {base_score}"
                );
                Ok(-(1.0 / base_score - 1.0).ln())
            }
            Objective::RegSquaredError => Ok(base_score),
        }
    }

    pub fn transform(self, margin: f32) -> f32 {
        match self {
            Objective::BinaryLogistic => sigmoid(margin),
            Objective::RegSquaredError => margin,
        }
    }

    fn gradient(self, margin: f32, label: f32) -> GradientPair {
        match self {
            Objective::BinaryLogistic => {
                let p = sigmoid(margin);
                GradientPair {
                    grad: p - label,
                    hess: (p * (1.0 - p)).max(MIN_HESSIAN),
                }
            }
            Objective::RegSquaredError => GradientPair {
                grad: margin - label,
                hess: 1.0,
            },
        }
    }

    fn check_label(self, label: f32) -> Result<()> {
        if self == Objective::BinaryLogistic {
            ensure!(
                (0.0..=1.0).contains(&label),
                "label must be in [0, 1] for binary:logistic, got {label}"
            );
        }
        Ok(())
    }
}

impl FromStr for Objective {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary:logistic" => Ok(Objective::BinaryLogistic),
            "reg:squarederror" => Ok(Objective::RegSquaredError),
            other => Err(anyhow!("unsupported objective {other:?}")),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoosterParams {
    pub max_depth: usize,
    pub eta: f64,
    pub objective: Objective,
    pub seed: u64,
    pub lambda: f64,
    pub gamma: f64,
    pub min_child_weight: f64,
    pub base_score: f32,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            eta: 0.3,
            objective: Objective::BinaryLogistic,
            seed: 0,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            base_score: 0.5,
        }
    }
}

impl BoosterParams {
    fn validate(&self) -> Result<()> {
        ensure!(self.eta > 0.0, "eta must be positive, got {}", self.eta);
        ensure!(self.lambda >= 0.0, "lambda must be non-negative");
        ensure!(self.gamma >= 0.0, "gamma must be non-negative");
        ensure!(self.min_child_weight >= 0.0, "min_child_weight must be non-negative");
        self.objective.prob_to_margin(self.base_score)?;
        Ok(())
    }

    /// Parameters recorded in the saved model's `attributes` map.
    fn attributes(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("eta".to_string(), self.eta.to_string()),
            ("gamma".to_string(), self.gamma.to_string()),
            ("lambda".to_string(), self.lambda.to_string()),
            ("max_depth".to_string(), self.max_depth.to_string()),
            ("min_child_weight".to_string(), self.min_child_weight.to_string()),
            ("seed".to_string(), self.seed.to_string()),
        ])
    }
}

/// A trained ensemble.
#[derive(Clone, Debug, PartialEq)]
pub struct Booster {
    trees: Vec<RegTree>,
    objective: Objective,
    base_score: f32,
    base_margin: f32,
    num_feature: usize,
    feature_names: Vec<String>,
    attributes: BTreeMap<String, String>,
}

/// Train `num_boost_round` trees on a labelled matrix.
pub fn train(params: &BoosterParams, dtrain: &DMatrix, num_boost_round: usize) -> Result<Booster> {
    params.validate()?;
    let labels = dtrain
        .labels()
        .ok_or_else(|| anyhow!("training matrix has no labels"))?;
    ensure!(dtrain.num_row() > 0, "training matrix is empty");
    for &label in labels {
        params.objective.check_label(label)?;
    }

    let base_margin = params.objective.prob_to_margin(params.base_score)?;
    let mut margins = vec![base_margin; dtrain.num_row()];
    let mut trees = Vec::with_capacity(num_boost_round);

    info!(
        rows = dtrain.num_row(),
        features = dtrain.num_col(),
        rounds = num_boost_round,
        max_depth = params.max_depth,
        eta = params.eta,
        objective = %params.objective,
        "training booster"
    );

    for round in 0..num_boost_round {
        let gpairs: Vec<GradientPair> = margins
            .iter()
            .zip(labels)
            .map(|(&margin, &label)| params.objective.gradient(margin, label))
            .collect();

        let tree = TreeGrower::new(dtrain, &gpairs, params)?.grow();
        for (row, margin) in margins.iter_mut().enumerate() {
            *margin += tree.predict(|col| dtrain.get(row, col));
        }

        debug!(
            round,
            nodes = tree.num_nodes(),
            leaves = tree.num_leaves(),
            depth = tree.max_depth(),
            "grew tree"
        );
        trees.push(tree);
    }

    Ok(Booster {
        trees,
        objective: params.objective,
        base_score: params.base_score,
        base_margin,
        num_feature: dtrain.num_col(),
        feature_names: dtrain.feature_names().to_vec(),
        attributes: params.attributes(),
    })
}

impl Booster {
    pub fn trees(&self) -> &[RegTree] {
        &self.trees
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn base_score(&self) -> f32 {
        self.base_score
    }

    /// `base_score` mapped into margin space by the objective.
    pub fn base_margin(&self) -> f32 {
        self.base_margin
    }

    pub fn num_feature(&self) -> usize {
        self.num_feature
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    fn check_width(&self, dmat: &DMatrix) -> Result<()> {
        ensure!(
            dmat.num_col() == self.num_feature,
            "model expects {} features, matrix has {}",
            self.num_feature,
            dmat.num_col()
        );
        Ok(())
    }

    /// Sum of leaf outputs on top of the base margin, accumulated tree by
    /// tree in `f32`.
    pub fn predict_margin_row<F: Fn(usize) -> f32>(&self, fvalue: F) -> f32 {
        let mut margin = self.base_margin();
        for tree in &self.trees {
            margin += tree.predict(&fvalue);
        }
        margin
    }

    /// One score per row; the objective's transform applies unless
    /// `output_margin` is set.
    pub fn predict(&self, dmat: &DMatrix, output_margin: bool) -> Result<Vec<f32>> {
        self.check_width(dmat)?;
        let scores = (0..dmat.num_row())
            .map(|row| {
                let margin = self.predict_margin_row(|col| dmat.get(row, col));
                if output_margin {
                    margin
                } else {
                    self.objective.transform(margin)
                }
            })
            .collect();
        Ok(scores)
    }

    /// `[P(class 0), P(class 1)]` per row.
    pub fn predict_proba(&self, dmat: &DMatrix) -> Result<Vec<[f32; 2]>> {
        ensure!(
            self.objective == Objective::BinaryLogistic,
            "class probabilities need a binary:logistic model, got {}",
            self.objective
        );
        Ok(self
            .predict(dmat, false)?
            .into_iter()
            .map(|p| [1.0 - p, p])
            .collect())
    }

    pub fn predict_class(&self, dmat: &DMatrix, threshold: f32) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(dmat)?
            .into_iter()
            .map(|[_, p]| u8::from(p > threshold))
            .collect())
    }

    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = model_io::to_json(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write model to {}", path.display()))?;
        info!(path = %path.display(), trees = self.trees.len(), "saved model");
        Ok(())
    }

    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model from {}", path.display()))?;
        let booster = model_io::from_json(&json)
            .with_context(|| format!("failed to parse model at {}", path.display()))?;
        info!(path = %path.display(), trees = booster.trees.len(), "loaded model");
        Ok(booster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn separable_matrix() -> DMatrix {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let x = i as f32 / 4.0;
            values.push(x);
            values.push((i % 3) as f32);
            labels.push(if x >= 5.0 { 1.0 } else { 0.0 });
        }
        DMatrix::new(Array2::from_shape_vec((40, 2), values).unwrap(), Some(labels)).unwrap()
    }

    fn params() -> BoosterParams {
        BoosterParams {
            max_depth: 3,
            eta: 0.3,
            ..Default::default()
        }
    }

    #[test]
    fn test_objective_parse() {
        assert_eq!(
            "binary:logistic".parse::<Objective>().unwrap(),
            Objective::BinaryLogistic
        );
        assert!("multi:softmax".parse::<Objective>().is_err());
        assert_eq!(Objective::RegSquaredError.to_string(), "reg:squarederror");
    }

    #[test]
    fn test_base_margin_for_half_is_zero() {
        assert_eq!(Objective::BinaryLogistic.prob_to_margin(0.5).unwrap(), 0.0);
        assert!(Objective::BinaryLogistic.prob_to_margin(1.0).is_err());
    }

    #[test]
    fn test_train_learns_separable_labels() -> Result<()> {
        let dmat = separable_matrix();
        let booster = train(&params(), &dmat, 20)?;
        assert_eq!(booster.trees().len(), 20);

        let preds = booster.predict(&dmat, false)?;
        let labels = dmat.labels().unwrap();
        for (p, y) in preds.iter().zip(labels) {
            assert!((p - y).abs() < 0.5, "pred {p} label {y}");
        }
        Ok(())
    }

    #[test]
    fn test_margin_and_transform_agree() -> Result<()> {
        let dmat = separable_matrix();
        let booster = train(&params(), &dmat, 5)?;
        let margins = booster.predict(&dmat, true)?;
        let probs = booster.predict(&dmat, false)?;
        for (m, p) in margins.iter().zip(&probs) {
            assert_eq!(sigmoid(*m), *p);
        }
        Ok(())
    }

    #[test]
    fn test_predict_proba_and_class() -> Result<()> {
        let dmat = separable_matrix();
        let booster = train(&params(), &dmat, 20)?;
        let proba = booster.predict_proba(&dmat)?;
        let classes = booster.predict_class(&dmat, 0.5)?;
        for ([p0, p1], class) in proba.iter().zip(&classes) {
            assert!((p0 + p1 - 1.0).abs() < 1e-6);
            assert_eq!(*class, u8::from(*p1 > 0.5));
        }
        Ok(())
    }

    #[test]
    fn test_training_is_deterministic() -> Result<()> {
        let dmat = separable_matrix();
        let a = train(&params(), &dmat, 10)?;
        let b = train(&params(), &dmat, 10)?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_rejects_non_binary_labels() {
        let dmat = DMatrix::new(
            Array2::from_shape_vec((2, 1), vec![1.0, 2.0]).unwrap(),
            Some(vec![0.0, 2.0]),
        )
        .unwrap();
        assert!(train(&params(), &dmat, 1).is_err());
    }

    #[test]
    fn test_rejects_width_mismatch() -> Result<()> {
        let booster = train(&params(), &separable_matrix(), 2)?;
        let narrow = DMatrix::new(Array2::zeros((3, 1)), None)?;
        assert!(booster.predict(&narrow, false).is_err());
        Ok(())
    }
}
