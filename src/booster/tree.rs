//! Regression tree storage and the exact greedy tree grower.
//!
//! Nodes live in parallel arrays indexed by node id, children of a split are
//! allocated as a consecutive pair, the root is node 0 and leaves carry their
//! (already learning-rate scaled) output in `split_conditions`.

use std::cmp::Ordering;

use anyhow::{Result, ensure};

use crate::matrix::DMatrix;

use super::BoosterParams;

pub const NO_CHILD: i32 = -1;
pub const ROOT_PARENT: i32 = i32::MAX;
const RT_EPS: f64 = 1e-6;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GradientPair {
    pub grad: f32,
    pub hess: f32,
}

#[derive(Clone, Copy, Debug, Default)]
struct GradStats {
    sum_grad: f64,
    sum_hess: f64,
}

impl GradStats {
    fn add(&mut self, gpair: GradientPair) {
        self.sum_grad += gpair.grad as f64;
        self.sum_hess += gpair.hess as f64;
    }

    fn sub(self, other: GradStats) -> GradStats {
        GradStats {
            sum_grad: self.sum_grad - other.sum_grad,
            sum_hess: self.sum_hess - other.sum_hess,
        }
    }

    fn plus(self, other: GradStats) -> GradStats {
        GradStats {
            sum_grad: self.sum_grad + other.sum_grad,
            sum_hess: self.sum_hess + other.sum_hess,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegTree {
    pub left_children: Vec<i32>,
    pub right_children: Vec<i32>,
    pub parents: Vec<i32>,
    pub split_indices: Vec<u32>,
    pub split_conditions: Vec<f32>,
    pub default_left: Vec<bool>,
    pub base_weights: Vec<f32>,
    pub loss_changes: Vec<f32>,
    pub sum_hessian: Vec<f32>,
}

impl RegTree {
    pub fn num_nodes(&self) -> usize {
        self.left_children.len()
    }

    pub fn is_leaf(&self, nid: usize) -> bool {
        self.left_children[nid] == NO_CHILD
    }

    pub fn num_leaves(&self) -> usize {
        (0..self.num_nodes()).filter(|&nid| self.is_leaf(nid)).count()
    }

    /// Longest root-to-leaf edge count.
    pub fn max_depth(&self) -> usize {
        fn walk(tree: &RegTree, nid: usize) -> usize {
            if tree.is_leaf(nid) {
                return 0;
            }
            let left = walk(tree, tree.left_children[nid] as usize);
            let right = walk(tree, tree.right_children[nid] as usize);
            1 + left.max(right)
        }
        if self.num_nodes() == 0 { 0 } else { walk(self, 0) }
    }

    /// Leaf reached by a row; `fvalue` returns `NaN` for missing entries.
    pub fn leaf_index<F: Fn(usize) -> f32>(&self, fvalue: F) -> usize {
        let mut nid = 0usize;
        while !self.is_leaf(nid) {
            let value = fvalue(self.split_indices[nid] as usize);
            let go_left = if value.is_nan() {
                self.default_left[nid]
            } else {
                value < self.split_conditions[nid]
            };
            nid = if go_left {
                self.left_children[nid] as usize
            } else {
                self.right_children[nid] as usize
            };
        }
        nid
    }

    pub fn predict<F: Fn(usize) -> f32>(&self, fvalue: F) -> f32 {
        self.split_conditions[self.leaf_index(fvalue)]
    }

    fn alloc_node(&mut self, parent: i32) -> usize {
        self.left_children.push(NO_CHILD);
        self.right_children.push(NO_CHILD);
        self.parents.push(parent);
        self.split_indices.push(0);
        self.split_conditions.push(0.0);
        self.default_left.push(false);
        self.base_weights.push(0.0);
        self.loss_changes.push(0.0);
        self.sum_hessian.push(0.0);
        self.left_children.len() - 1
    }
}

#[derive(Clone, Copy, Debug)]
struct SplitEntry {
    feature: usize,
    threshold: f32,
    default_left: bool,
    loss_chg: f64,
    left: GradStats,
    right: GradStats,
}

/// Grows one tree from per-row gradient pairs with exact greedy search over
/// every distinct feature value.
pub struct TreeGrower<'a> {
    dmat: &'a DMatrix,
    gpairs: &'a [GradientPair],
    params: &'a BoosterParams,
}

impl<'a> TreeGrower<'a> {
    pub fn new(
        dmat: &'a DMatrix,
        gpairs: &'a [GradientPair],
        params: &'a BoosterParams,
    ) -> Result<Self> {
        ensure!(
            dmat.num_row() == gpairs.len(),
            "got {} gradient pairs for {} rows",
            gpairs.len(),
            dmat.num_row()
        );
        Ok(Self {
            dmat,
            gpairs,
            params,
        })
    }

    pub fn grow(&self) -> RegTree {
        let mut tree = RegTree::default();
        let rows: Vec<usize> = (0..self.dmat.num_row()).collect();
        let root = tree.alloc_node(ROOT_PARENT);
        self.expand(&mut tree, root, &rows, 0);
        tree
    }

    fn calc_weight(&self, stats: GradStats) -> f64 {
        if stats.sum_hess < self.params.min_child_weight || stats.sum_hess <= 0.0 {
            return 0.0;
        }
        -stats.sum_grad / (stats.sum_hess + self.params.lambda)
    }

    fn calc_gain(&self, stats: GradStats) -> f64 {
        if stats.sum_hess < self.params.min_child_weight {
            return 0.0;
        }
        stats.sum_grad * stats.sum_grad / (stats.sum_hess + self.params.lambda)
    }

    fn node_stats(&self, rows: &[usize]) -> GradStats {
        let mut stats = GradStats::default();
        for &row in rows {
            stats.add(self.gpairs[row]);
        }
        stats
    }

    fn expand(&self, tree: &mut RegTree, nid: usize, rows: &[usize], depth: usize) {
        let stats = self.node_stats(rows);
        let weight = self.calc_weight(stats);
        tree.base_weights[nid] = weight as f32;
        tree.sum_hessian[nid] = stats.sum_hess as f32;

        let split = if depth < self.params.max_depth
            && stats.sum_hess >= 2.0 * self.params.min_child_weight
        {
            self.find_split(rows, stats)
        } else {
            None
        };

        let Some(split) = split else {
            tree.split_conditions[nid] = (weight * self.params.eta) as f32;
            return;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&row| {
            let value = self.dmat.get(row, split.feature);
            if value.is_nan() {
                split.default_left
            } else {
                value < split.threshold
            }
        });

        let left = tree.alloc_node(nid as i32);
        let right = tree.alloc_node(nid as i32);
        tree.left_children[nid] = left as i32;
        tree.right_children[nid] = right as i32;
        tree.split_indices[nid] = split.feature as u32;
        tree.split_conditions[nid] = split.threshold;
        tree.default_left[nid] = split.default_left;
        tree.loss_changes[nid] = split.loss_chg as f32;

        tracing::trace!(
            nid,
            feature = split.feature,
            threshold = split.threshold,
            gain = split.loss_chg,
            left = left_rows.len(),
            right = right_rows.len(),
            "split node"
        );

        self.expand(tree, left, &left_rows, depth + 1);
        self.expand(tree, right, &right_rows, depth + 1);
    }

    fn find_split(&self, rows: &[usize], total: GradStats) -> Option<SplitEntry> {
        let root_gain = self.calc_gain(total);
        let min_gain = self.params.gamma.max(RT_EPS);
        let mut best: Option<SplitEntry> = None;

        for feature in 0..self.dmat.num_col() {
            let mut present: Vec<(f32, GradientPair)> = rows
                .iter()
                .map(|&row| (self.dmat.get(row, feature), self.gpairs[row]))
                .filter(|(value, _)| !value.is_nan())
                .collect();
            if present.len() < 2 {
                continue;
            }
            present.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

            let mut present_total = GradStats::default();
            for &(_, gpair) in &present {
                present_total.add(gpair);
            }
            let missing = total.sub(present_total);
            let has_missing = present.len() < rows.len();

            let mut left_present = GradStats::default();
            for i in 0..present.len() - 1 {
                left_present.add(present[i].1);
                let (value, next) = (present[i].0, present[i + 1].0);
                if value == next {
                    continue;
                }
                let threshold = split_threshold(value, next);

                let directions: &[bool] = if has_missing { &[true, false] } else { &[true] };
                for &default_left in directions {
                    let left = if default_left {
                        left_present.plus(missing)
                    } else {
                        left_present
                    };
                    let right = total.sub(left);
                    if left.sum_hess < self.params.min_child_weight
                        || right.sum_hess < self.params.min_child_weight
                    {
                        continue;
                    }

                    let loss_chg = self.calc_gain(left) + self.calc_gain(right) - root_gain;
                    if loss_chg <= min_gain {
                        continue;
                    }
                    if best.is_none_or(|b| loss_chg > b.loss_chg) {
                        best = Some(SplitEntry {
                            feature,
                            threshold,
                            default_left,
                            loss_chg,
                            left,
                            right,
                        });
                    }
                }
            }
        }

        if let Some(split) = &best {
            tracing::trace!(
                left_hess = split.left.sum_hess,
                right_hess = split.right.sum_hess,
                "best split found"
            );
        }
        best
    }
}

/// Midpoint of two adjacent distinct values, nudged so `lower < t <= upper`
/// holds in `f32`.
fn split_threshold(lower: f32, upper: f32) -> f32 {
    let mid = ((lower as f64 + upper as f64) * 0.5) as f32;
    if mid <= lower || mid > upper { upper } else { mid }
}
