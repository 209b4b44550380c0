//! Branch annotation: how many rows of a matrix pass through every node.
//!
//! Saved as a JSON array holding one array of counts per tree, indexed by
//! node id. Code generation reads it back to mark the hotter child of each
//! test as the likely branch.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ir::{Entry, Model};
use crate::matrix::DMatrix;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchAnnotation {
    pub counts: Vec<Vec<u64>>,
}

impl BranchAnnotation {
    fn zeroed(model: &Model) -> Self {
        Self {
            counts: model.trees.iter().map(|t| vec![0; t.nodes.len()]).collect(),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                *a += b;
            }
        }
        self
    }

    /// Checks that the counts line up with the model's trees and nodes.
    pub fn check_shape(&self, model: &Model) -> Result<()> {
        ensure!(
            self.counts.len() == model.trees.len(),
            "annotation covers {} trees, model has {}",
            self.counts.len(),
            model.trees.len()
        );
        for (tree_id, (counts, tree)) in self.counts.iter().zip(&model.trees).enumerate() {
            ensure!(
                counts.len() == tree.nodes.len(),
                "annotation for tree {} has {} nodes, model has {}",
                tree_id,
                counts.len(),
                tree.nodes.len()
            );
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string(self).context("failed to serialize branch annotation")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write annotation to {}", path.display()))?;
        info!(path = %path.display(), "saved branch annotation");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read annotation at {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("failed to parse annotation at {}", path.display()))
    }
}

/// Count node visits for every row of `dmat`, spreading rows over `nthread`
/// workers.
pub fn annotate_branch(model: &Model, dmat: &DMatrix, nthread: usize) -> Result<BranchAnnotation> {
    ensure!(
        dmat.num_col() == model.num_feature,
        "model expects {} features, matrix has {}",
        model.num_feature,
        dmat.num_col()
    );
    let nthread = nthread.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(nthread)
        .build()
        .context("failed to build annotation thread pool")?;

    let annotation = pool.install(|| {
        (0..dmat.num_row())
            .into_par_iter()
            .fold(
                || BranchAnnotation::zeroed(model),
                |mut acc, row| {
                    let entries: Vec<Entry> =
                        dmat.row(row).iter().map(|&v| Entry::from_f32(v)).collect();
                    for (tree_id, tree) in model.trees.iter().enumerate() {
                        let counts = &mut acc.counts[tree_id];
                        tree.visit(&entries, |nid| counts[nid] += 1);
                    }
                    acc
                },
            )
            .reduce(|| BranchAnnotation::zeroed(model), BranchAnnotation::merge)
    });

    debug!(rows = dmat.num_row(), nthread, "counted branch visits");
    info!(
        trees = annotation.counts.len(),
        rows = dmat.num_row(),
        "annotated branches"
    );
    Ok(annotation)
}
