//! Generator module: tree IR to C source generation.
//!
//! # Submodules
//! - [`render`]: header, `main.c` and translation-unit rendering
//!
//! # Entry points
//! - [`generate_c_code`]: write sources plus a `recipe.json` into a directory
//! - [`split_units`]: partition trees across translation units

pub mod render;

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Serialize;
use tracing::{debug, info};

use crate::annotate::BranchAnnotation;
use crate::ir::Model;
use render::{render_header, render_main, render_unit_file};

#[derive(Clone, Debug, Default)]
pub struct CodegenParams {
    /// Number of translation units to spread trees over; `0` keeps every
    /// tree in `main.c`.
    pub parallel_comp: usize,
    pub annotation: Option<BranchAnnotation>,
}

#[derive(Clone, Debug)]
pub struct GeneratedSources {
    pub dir: PathBuf,
    pub header: PathBuf,
    /// `main.c` first, then `tu0.c`, `tu1.c`, ...
    pub sources: Vec<PathBuf>,
}

#[derive(Serialize)]
struct Recipe<'a> {
    target: &'a str,
    sources: Vec<RecipeSource>,
}

#[derive(Serialize)]
struct RecipeSource {
    name: String,
    length: usize,
}

/// Contiguous, nearly equal tree ranges; earlier units take the remainder.
/// Never produces an empty unit unless there are no trees at all.
pub fn split_units(num_trees: usize, parallel_comp: usize) -> Vec<Range<usize>> {
    let units = parallel_comp.clamp(1, num_trees.max(1));
    let base = num_trees / units;
    let extra = num_trees % units;

    let mut ranges = Vec::with_capacity(units);
    let mut start = 0;
    for unit in 0..units {
        let len = base + usize::from(unit < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

pub fn generate_c_code(model: &Model, params: &CodegenParams, dir: &Path) -> Result<GeneratedSources> {
    ensure!(!model.trees.is_empty(), "model has no trees to generate");
    if let Some(annotation) = &params.annotation {
        annotation
            .check_shape(model)
            .context("branch annotation does not match the model")?;
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create source dir {}", dir.display()))?;

    let units = split_units(model.trees.len(), params.parallel_comp);
    let inline_units = params.parallel_comp == 0;
    let annotation = params.annotation.as_ref();

    let mut files: Vec<(String, String)> = Vec::with_capacity(units.len() + 1);
    files.push((
        "main".to_string(),
        render_main(model, &units, inline_units, annotation),
    ));
    if !inline_units {
        for (unit, range) in units.iter().enumerate() {
            debug!(unit, trees = ?range, "rendering translation unit");
            files.push((
                format!("tu{unit}"),
                render_unit_file(model, unit, range.clone(), annotation),
            ));
        }
    }

    let header = dir.join("header.h");
    fs::write(&header, render_header(units.len())).context("failed to write header.h")?;

    let mut sources = Vec::with_capacity(files.len());
    let mut recipe = Recipe {
        target: "predictor",
        sources: Vec::with_capacity(files.len()),
    };
    for (name, code) in files {
        let path = dir.join(format!("{name}.c"));
        fs::write(&path, &code)
            .with_context(|| format!("failed to write {}", path.display()))?;
        recipe.sources.push(RecipeSource {
            name,
            length: code.lines().count(),
        });
        sources.push(path);
    }

    let recipe_json =
        serde_json::to_string_pretty(&recipe).context("failed to serialize recipe.json")?;
    fs::write(dir.join("recipe.json"), recipe_json).context("failed to write recipe.json")?;

    info!(
        path = %dir.display(),
        files = sources.len(),
        units = units.len(),
        annotated = annotation.is_some(),
        "generated C sources"
    );

    Ok(GeneratedSources {
        dir: dir.to_path_buf(),
        header,
        sources,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::ir::{Node, Operator, Tree};

    use super::*;

    fn forest(num_trees: usize) -> Model {
        let tree = Tree {
            nodes: vec![
                Node::Test {
                    split_index: 0,
                    threshold: 1.5,
                    op: Operator::Lt,
                    default_left: true,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { value: 0.25 },
                Node::Leaf { value: -0.25 },
            ],
        };
        Model {
            num_feature: 1,
            base_margin: 0.0,
            pred_transform: "sigmoid".to_string(),
            sigmoid_alpha: 1.0,
            trees: vec![tree; num_trees],
        }
    }

    // ── split_units ───────────────────────────────────────────────────────────

    #[test]
    fn test_split_units_even_and_remainder() {
        assert_eq!(split_units(100, 4), vec![0..25, 25..50, 50..75, 75..100]);
        assert_eq!(split_units(10, 3), vec![0..4, 4..7, 7..10]);
    }

    #[test]
    fn test_split_units_caps_at_tree_count() {
        assert_eq!(split_units(2, 8), vec![0..1, 1..2]);
        assert_eq!(split_units(5, 0), vec![0..5]);
    }

    // ── generate_c_code ───────────────────────────────────────────────────────

    #[test]
    fn test_generate_inline_writes_main_only() -> Result<()> {
        let tmp = tempdir()?;
        let out = generate_c_code(&forest(3), &CodegenParams::default(), tmp.path())?;
        assert_eq!(out.sources, vec![tmp.path().join("main.c")]);
        assert!(out.header.exists());
        assert!(tmp.path().join("recipe.json").exists());

        let main = fs::read_to_string(tmp.path().join("main.c"))?;
        assert!(main.contains("void predict_unit0(union Entry* data, float* result) {"));
        assert!(main.contains("/* tree 2 */"));
        Ok(())
    }

    #[test]
    fn test_generate_parallel_units() -> Result<()> {
        let tmp = tempdir()?;
        let params = CodegenParams {
            parallel_comp: 2,
            annotation: None,
        };
        let out = generate_c_code(&forest(5), &params, tmp.path())?;
        assert_eq!(out.sources.len(), 3);

        let tu0 = fs::read_to_string(tmp.path().join("tu0.c"))?;
        let tu1 = fs::read_to_string(tmp.path().join("tu1.c"))?;
        assert_eq!(tu0.matches("/* tree").count(), 3);
        assert_eq!(tu1.matches("/* tree").count(), 2);

        let recipe: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(tmp.path().join("recipe.json"))?)?;
        assert_eq!(recipe["sources"][1]["name"], "tu0");
        Ok(())
    }

    #[test]
    fn test_generate_rejects_mismatched_annotation() {
        let tmp = tempdir().unwrap();
        let params = CodegenParams {
            parallel_comp: 0,
            annotation: Some(BranchAnnotation {
                counts: vec![vec![1, 1, 0]],
            }),
        };
        assert!(generate_c_code(&forest(2), &params, tmp.path()).is_err());
    }
}
