//! JSON model document following xgboost's `save_model` layout, so tree
//! tooling that reads that schema can load the fixture model.
//!
//! Everything is emitted in a fixed order with no timestamps: saving the same
//! booster twice yields identical bytes.

use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, ensure};
use serde::{Deserialize, Serialize};

use super::tree::{NO_CHILD, RegTree};
use super::{Booster, Objective};

const FORMAT_VERSION: [u32; 3] = [2, 0, 0];

#[derive(Debug, Serialize, Deserialize)]
struct ModelDocument {
    learner: Learner,
    version: [u32; 3],
}

#[derive(Debug, Serialize, Deserialize)]
struct Learner {
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default)]
    feature_types: Vec<String>,
    gradient_booster: GradientBooster,
    learner_model_param: LearnerModelParam,
    objective: ObjectiveSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct GradientBooster {
    model: GbTreeModel,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct GbTreeModel {
    gbtree_model_param: GbTreeModelParam,
    tree_info: Vec<i32>,
    trees: Vec<TreeDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GbTreeModelParam {
    num_parallel_tree: String,
    num_trees: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeDocument {
    base_weights: Vec<f32>,
    #[serde(default)]
    categories: Vec<i32>,
    #[serde(default)]
    categories_nodes: Vec<i32>,
    #[serde(default)]
    categories_segments: Vec<i64>,
    #[serde(default)]
    categories_sizes: Vec<i64>,
    default_left: Vec<u8>,
    id: usize,
    left_children: Vec<i32>,
    loss_changes: Vec<f32>,
    parents: Vec<i32>,
    right_children: Vec<i32>,
    split_conditions: Vec<f32>,
    split_indices: Vec<u32>,
    #[serde(default)]
    split_type: Vec<u8>,
    sum_hessian: Vec<f32>,
    tree_param: TreeParam,
}

#[derive(Debug, Serialize, Deserialize)]
struct TreeParam {
    num_deleted: String,
    num_feature: String,
    num_nodes: String,
    size_leaf_vector: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LearnerModelParam {
    base_score: String,
    boost_from_average: String,
    num_class: String,
    num_feature: String,
    num_target: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectiveSection {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    reg_loss_param: Option<RegLossParam>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegLossParam {
    scale_pos_weight: String,
}

pub fn to_json(booster: &Booster) -> Result<String> {
    let num_feature = booster.num_feature.to_string();
    let trees = booster
        .trees
        .iter()
        .enumerate()
        .map(|(id, tree)| TreeDocument {
            base_weights: tree.base_weights.clone(),
            categories: Vec::new(),
            categories_nodes: Vec::new(),
            categories_segments: Vec::new(),
            categories_sizes: Vec::new(),
            default_left: tree.default_left.iter().map(|&d| u8::from(d)).collect(),
            id,
            left_children: tree.left_children.clone(),
            loss_changes: tree.loss_changes.clone(),
            parents: tree.parents.clone(),
            right_children: tree.right_children.clone(),
            split_conditions: tree.split_conditions.clone(),
            split_indices: tree.split_indices.clone(),
            split_type: vec![0; tree.num_nodes()],
            sum_hessian: tree.sum_hessian.clone(),
            tree_param: TreeParam {
                num_deleted: "0".to_string(),
                num_feature: num_feature.clone(),
                num_nodes: tree.num_nodes().to_string(),
                size_leaf_vector: "1".to_string(),
            },
        })
        .collect::<Vec<_>>();

    let reg_loss_param = (booster.objective == Objective::BinaryLogistic).then(|| RegLossParam {
        scale_pos_weight: "1".to_string(),
    });

    let document = ModelDocument {
        learner: Learner {
            attributes: booster.attributes.clone(),
            feature_names: booster.feature_names.clone(),
            feature_types: vec!["float".to_string(); booster.feature_names.len()],
            gradient_booster: GradientBooster {
                model: GbTreeModel {
                    gbtree_model_param: GbTreeModelParam {
                        num_parallel_tree: "1".to_string(),
                        num_trees: trees.len().to_string(),
                    },
                    tree_info: vec![0; trees.len()],
                    trees,
                },
                name: "gbtree".to_string(),
            },
            learner_model_param: LearnerModelParam {
                base_score: format!("{:E}", booster.base_score),
                boost_from_average: "1".to_string(),
                num_class: "0".to_string(),
                num_feature,
                num_target: "1".to_string(),
            },
            objective: ObjectiveSection {
                name: booster.objective.name().to_string(),
                reg_loss_param,
            },
        },
        version: FORMAT_VERSION,
    };

    serde_json::to_string(&document).context("failed to serialize model document")
}

pub fn from_json(json: &str) -> Result<Booster> {
    let document: ModelDocument =
        serde_json::from_str(json).context("model document does not match the expected layout")?;
    let learner = document.learner;

    ensure!(
        learner.gradient_booster.name == "gbtree",
        "unsupported booster {:?}",
        learner.gradient_booster.name
    );
    let objective: Objective = learner.objective.name.parse()?;
    let params = &learner.learner_model_param;
    let base_score: f32 = params
        .base_score
        .parse()
        .with_context(|| format!("invalid base_score {:?}", params.base_score))?;
    let base_margin = objective
        .prob_to_margin(base_score)
        .with_context(|| format!("base_score {base_score} is invalid for {objective}"))?;
    let num_feature: usize = params
        .num_feature
        .parse()
        .with_context(|| format!("invalid num_feature {:?}", params.num_feature))?;
    ensure!(
        params.num_class == "0" || params.num_class == "1",
        "multiclass models are not supported (num_class = {})",
        params.num_class
    );

    let trees = learner
        .gradient_booster
        .model
        .trees
        .into_iter()
        .map(|doc| tree_from_document(doc, num_feature))
        .collect::<Result<Vec<_>>>()?;

    let feature_names = if learner.feature_names.is_empty() {
        (0..num_feature).map(|i| format!("f{i}")).collect()
    } else {
        learner.feature_names
    };

    Ok(Booster {
        trees,
        objective,
        base_score,
        base_margin,
        num_feature,
        feature_names,
        attributes: learner.attributes,
    })
}

fn tree_from_document(doc: TreeDocument, num_feature: usize) -> Result<RegTree> {
    let n = doc.left_children.len();
    let id = doc.id;
    ensure!(n > 0, "tree {id} has no nodes");
    let lengths = [
        doc.right_children.len(),
        doc.parents.len(),
        doc.split_indices.len(),
        doc.split_conditions.len(),
        doc.default_left.len(),
        doc.base_weights.len(),
        doc.loss_changes.len(),
        doc.sum_hessian.len(),
    ];
    ensure!(
        lengths.iter().all(|&len| len == n),
        "tree {id}: node arrays disagree in length"
    );

    for nid in 0..n {
        let (left, right) = (doc.left_children[nid], doc.right_children[nid]);
        if left == NO_CHILD {
            continue;
        }
        let in_range = |child: i32| child > nid as i32 && (child as usize) < n;
        if !in_range(left) || !in_range(right) {
            return Err(anyhow!("tree {id}: node {nid} has out-of-range children"));
        }
        ensure!(
            (doc.split_indices[nid] as usize) < num_feature,
            "tree {id}: node {nid} splits on feature {} of {}",
            doc.split_indices[nid],
            num_feature
        );
    }

    Ok(RegTree {
        left_children: doc.left_children,
        right_children: doc.right_children,
        parents: doc.parents,
        split_indices: doc.split_indices,
        split_conditions: doc.split_conditions,
        default_left: doc.default_left.into_iter().map(|d| d != 0).collect(),
        base_weights: doc.base_weights,
        loss_changes: doc.loss_changes,
        sum_hessian: doc.sum_hessian,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booster::{BoosterParams, train};
    use crate::matrix::DMatrix;
    use ndarray::Array2;

    fn booster() -> Booster {
        let values: Vec<f32> = (0..30).map(|i| i as f32).collect();
        let labels = (0..15).map(|i| if i < 7 { 0.0 } else { 1.0 }).collect();
        let dmat = DMatrix::new(Array2::from_shape_vec((15, 2), values).unwrap(), Some(labels))
            .unwrap();
        train(&BoosterParams::default(), &dmat, 3).unwrap()
    }

    #[test]
    fn test_document_layout() -> Result<()> {
        let json = to_json(&booster())?;
        let value: serde_json::Value = serde_json::from_str(&json)?;
        let learner = &value["learner"];
        assert_eq!(learner["objective"]["name"], "binary:logistic");
        assert_eq!(learner["learner_model_param"]["base_score"], "5E-1");
        assert_eq!(learner["learner_model_param"]["num_feature"], "2");
        assert_eq!(learner["gradient_booster"]["name"], "gbtree");
        let trees = learner["gradient_booster"]["model"]["trees"].as_array().unwrap();
        assert_eq!(trees.len(), 3);
        assert_eq!(trees[0]["parents"][0], i32::MAX);
        Ok(())
    }

    #[test]
    fn test_reload_preserves_model() -> Result<()> {
        let original = booster();
        let reloaded = from_json(&to_json(&original)?)?;
        assert_eq!(reloaded, original);
        Ok(())
    }

    #[test]
    fn test_serialization_is_byte_stable() -> Result<()> {
        let b = booster();
        assert_eq!(to_json(&b)?, to_json(&b)?);
        Ok(())
    }

    #[test]
    fn test_rejects_bad_child_index() -> Result<()> {
        let json = to_json(&booster())?;
        let mut value: serde_json::Value = serde_json::from_str(&json)?;
        value["learner"]["gradient_booster"]["model"]["trees"][0]["left_children"][0] =
            serde_json::json!(999);
        let err = from_json(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("out-of-range"));
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_objective() -> Result<()> {
        let json = to_json(&booster())?;
        let mut value: serde_json::Value = serde_json::from_str(&json)?;
        value["learner"]["objective"]["name"] = serde_json::json!("multi:softprob");
        assert!(from_json(&value.to_string()).is_err());
        Ok(())
    }

    #[test]
    fn test_rejects_base_score_outside_objective_range() -> Result<()> {
        let json = to_json(&booster())?;
        let mut value: serde_json::Value = serde_json::from_str(&json)?;
        value["learner"]["learner_model_param"]["base_score"] = serde_json::json!("1E0");
        let err = from_json(&value.to_string()).unwrap_err();
        assert!(format!("{err:#}").contains("base_score"), "{err:#}");
        Ok(())
    }

    #[test]
    fn test_reload_keeps_nonzero_base_margin() -> Result<()> {
        let json = to_json(&booster())?;
        let mut value: serde_json::Value = serde_json::from_str(&json)?;
        value["learner"]["learner_model_param"]["base_score"] = serde_json::json!("7.5E-1");
        let reloaded = from_json(&value.to_string())?;
        let expected = -(1.0f32 / 0.75 - 1.0).ln();
        assert!((reloaded.base_margin() - expected).abs() < 1e-6);
        Ok(())
    }
}
