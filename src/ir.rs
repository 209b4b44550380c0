//! Library-neutral forest representation consumed by annotation and code
//! generation. Converting from a [`Booster`] checks the tree shape once so
//! later stages can index nodes without re-validating.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::booster::Booster;

/// Comparison between a feature value and a node threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }

    pub fn eval(self, lhs: f32, rhs: f32) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f32,
    },
    Test {
        split_index: usize,
        threshold: f32,
        op: Operator,
        default_left: bool,
        left: usize,
        right: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Node ids visited from the root to the reached leaf, inclusive.
    pub fn visit<F: FnMut(usize)>(&self, row: &[Entry], mut on_node: F) -> f32 {
        let mut nid = 0;
        loop {
            on_node(nid);
            match &self.nodes[nid] {
                Node::Leaf { value } => return *value,
                Node::Test {
                    split_index,
                    threshold,
                    op,
                    default_left,
                    left,
                    right,
                } => {
                    let go_left = match row[*split_index] {
                        Entry::Missing => *default_left,
                        Entry::Value(v) => op.eval(v, *threshold),
                    };
                    nid = if go_left { *left } else { *right };
                }
            }
        }
    }

    pub fn eval(&self, row: &[Entry]) -> f32 {
        self.visit(row, |_| {})
    }
}

/// One feature cell as the compiled predictor sees it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Entry {
    Missing,
    Value(f32),
}

impl Entry {
    pub fn from_f32(value: f32) -> Self {
        if value.is_nan() {
            Entry::Missing
        } else {
            Entry::Value(value)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub num_feature: usize,
    pub base_margin: f32,
    pub pred_transform: String,
    pub sigmoid_alpha: f32,
    pub trees: Vec<Tree>,
}

impl Model {
    pub fn from_booster(booster: &Booster) -> Result<Self> {
        let num_feature = booster.num_feature();
        let mut trees = Vec::with_capacity(booster.trees().len());

        for (tree_id, src) in booster.trees().iter().enumerate() {
            let n = src.num_nodes();
            ensure!(n > 0, "tree {tree_id} has no nodes");
            let mut nodes = Vec::with_capacity(n);
            for nid in 0..n {
                if src.is_leaf(nid) {
                    nodes.push(Node::Leaf {
                        value: src.split_conditions[nid],
                    });
                    continue;
                }
                let left = src.left_children[nid] as usize;
                let right = src.right_children[nid] as usize;
                ensure!(
                    left < n && right < n && left > nid && right > nid,
                    "tree {tree_id}: node {nid} has invalid children ({left}, {right})"
                );
                let split_index = src.split_indices[nid] as usize;
                ensure!(
                    split_index < num_feature,
                    "tree {tree_id}: node {nid} uses feature {split_index} of {num_feature}"
                );
                nodes.push(Node::Test {
                    split_index,
                    threshold: src.split_conditions[nid],
                    op: Operator::Lt,
                    default_left: src.default_left[nid],
                    left,
                    right,
                });
            }
            trees.push(Tree { nodes });
        }

        let model = Self {
            num_feature,
            base_margin: booster.base_margin(),
            pred_transform: booster.objective().pred_transform().to_string(),
            sigmoid_alpha: 1.0,
            trees,
        };
        info!(
            trees = model.trees.len(),
            nodes = model.num_nodes(),
            pred_transform = %model.pred_transform,
            "converted booster to tree IR"
        );
        Ok(model)
    }

    pub fn num_nodes(&self) -> usize {
        self.trees.iter().map(|t| t.nodes.len()).sum()
    }

    pub fn predict_margin(&self, row: &[Entry]) -> f32 {
        let mut sum = self.base_margin;
        for tree in &self.trees {
            sum += tree.eval(row);
        }
        sum
    }

    pub fn predict_row(&self, row: &[Entry], pred_margin: bool) -> f32 {
        let margin = self.predict_margin(row);
        if pred_margin || self.pred_transform != "sigmoid" {
            return margin;
        }
        1.0 / (1.0 + (-self.sigmoid_alpha * margin).exp())
    }

    pub fn dump_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("failed to serialize tree IR")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write tree IR to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booster::{BoosterParams, train};
    use crate::matrix::DMatrix;
    use ndarray::Array2;

    fn stump() -> Model {
        Model {
            num_feature: 1,
            base_margin: 0.0,
            pred_transform: "sigmoid".to_string(),
            sigmoid_alpha: 1.0,
            trees: vec![Tree {
                nodes: vec![
                    Node::Test {
                        split_index: 0,
                        threshold: 0.5,
                        op: Operator::Lt,
                        default_left: false,
                        left: 1,
                        right: 2,
                    },
                    Node::Leaf { value: -1.0 },
                    Node::Leaf { value: 2.0 },
                ],
            }],
        }
    }

    #[test]
    fn test_missing_follows_default() {
        let model = stump();
        assert_eq!(model.predict_margin(&[Entry::Value(0.1)]), -1.0);
        assert_eq!(model.predict_margin(&[Entry::Value(0.9)]), 2.0);
        assert_eq!(model.predict_margin(&[Entry::Missing]), 2.0);
    }

    #[test]
    fn test_visit_reports_path() {
        let model = stump();
        let mut path = Vec::new();
        model.trees[0].visit(&[Entry::Value(0.1)], |nid| path.push(nid));
        assert_eq!(path, vec![0, 1]);
    }

    #[test]
    fn test_matches_booster_predictions() -> Result<()> {
        let values: Vec<f32> = (0..60).map(|i| ((i * 7) % 23) as f32).collect();
        let labels = (0..20).map(|i| (i % 2) as f32).collect();
        let dmat = DMatrix::new(Array2::from_shape_vec((20, 3), values)?, Some(labels))?;
        let booster = train(&BoosterParams::default(), &dmat, 8)?;
        let model = Model::from_booster(&booster)?;

        let expected = booster.predict(&dmat, false)?;
        for (row, want) in expected.iter().enumerate() {
            let entries: Vec<Entry> = dmat.row(row).iter().map(|&v| Entry::from_f32(v)).collect();
            assert_eq!(model.predict_row(&entries, false), *want);
        }
        Ok(())
    }

    #[test]
    fn test_dump_json_reads_back() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("ir.json");
        stump().dump_json(&path)?;

        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("\"kind\": \"test\""), "{text}");
        let loaded: Model = serde_json::from_str(&text)?;
        assert_eq!(loaded, stump());
        Ok(())
    }

    #[test]
    fn test_operator_symbols() {
        assert_eq!(Operator::Lt.symbol(), "<");
        assert!(Operator::Ge.eval(1.0, 1.0));
        assert!(!Operator::Gt.eval(1.0, 1.0));
    }
}
