//! C source rendering for compiled predictors.
//!
//! Produces `header.h`, `main.c` and per-unit translation files. Trees are
//! emitted as nested `if`/`else` blocks that add their leaf value to a running
//! `float` sum, in tree order, starting from the base margin.

use std::fmt::Write;
use std::ops::Range;

use crate::annotate::BranchAnnotation;
use crate::ir::{Model, Node, Tree};

/// Symbols the predictor looks up once the library is loaded.
pub const EXPORTED_SYMBOLS: [&str; 6] = [
    "get_num_feature",
    "get_num_tree",
    "get_pred_transform",
    "get_sigmoid_alpha",
    "get_global_bias",
    "predict",
];

const HEADER_PRELUDE: &str = r#"#include <stddef.h>
#include <math.h>

#if defined(__GNUC__) || defined(__clang__)
#define LIKELY(x)   __builtin_expect(!!(x), 1)
#define UNLIKELY(x) __builtin_expect(!!(x), 0)
#else
#define LIKELY(x)   (x)
#define UNLIKELY(x) (x)
#endif

#if defined(_WIN32)
#define FIXTURE_EXPORT __declspec(dllexport)
#else
#define FIXTURE_EXPORT __attribute__((visibility("default")))
#endif

union Entry {
  int missing;
  float fvalue;
  int qvalue;
};
"#;

/// C expression for an `f32` that evaluates to the same value. Non-finite
/// values use the `<math.h>` macros.
pub fn float_literal(value: f32) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value == f32::INFINITY {
        "INFINITY".to_string()
    } else if value == f32::NEG_INFINITY {
        "(-INFINITY)".to_string()
    } else {
        format!("{value:?}f")
    }
}

pub fn unit_fn_name(unit: usize) -> String {
    format!("predict_unit{unit}")
}

pub fn render_header(num_units: usize) -> String {
    let mut out = String::from(HEADER_PRELUDE);
    out.push('\n');
    out.push_str("FIXTURE_EXPORT size_t get_num_feature(void);\n");
    out.push_str("FIXTURE_EXPORT size_t get_num_tree(void);\n");
    out.push_str("FIXTURE_EXPORT const char* get_pred_transform(void);\n");
    out.push_str("FIXTURE_EXPORT float get_sigmoid_alpha(void);\n");
    out.push_str("FIXTURE_EXPORT float get_global_bias(void);\n");
    out.push_str("FIXTURE_EXPORT float predict(union Entry* data, int pred_margin);\n");
    out.push('\n');
    for unit in 0..num_units {
        let _ = writeln!(out, "void {}(union Entry* data, float* result);", unit_fn_name(unit));
    }
    out
}

/// `main.c`: metadata getters, the `predict` entry point and, when
/// `inline_units` is set, the unit bodies themselves.
pub fn render_main(
    model: &Model,
    units: &[Range<usize>],
    inline_units: bool,
    annotation: Option<&BranchAnnotation>,
) -> String {
    let mut out = String::from("#include \"header.h\"\n\n");
    let _ = writeln!(
        out,
        "size_t get_num_feature(void) {{\n  return {};\n}}\n",
        model.num_feature
    );
    let _ = writeln!(
        out,
        "size_t get_num_tree(void) {{\n  return {};\n}}\n",
        model.trees.len()
    );
    let _ = writeln!(
        out,
        "const char* get_pred_transform(void) {{\n  return \"{}\";\n}}\n",
        model.pred_transform
    );
    let _ = writeln!(
        out,
        "float get_sigmoid_alpha(void) {{\n  return {};\n}}\n",
        float_literal(model.sigmoid_alpha)
    );
    let _ = writeln!(
        out,
        "float get_global_bias(void) {{\n  return {};\n}}\n",
        float_literal(model.base_margin)
    );

    if inline_units {
        for (unit, range) in units.iter().enumerate() {
            out.push_str(&render_unit_fn(model, unit, range.clone(), annotation));
            out.push('\n');
        }
    }

    out.push_str("float predict(union Entry* data, int pred_margin) {\n");
    let _ = writeln!(out, "  float sum = {};", float_literal(model.base_margin));
    for unit in 0..units.len() {
        let _ = writeln!(out, "  {}(data, &sum);", unit_fn_name(unit));
    }
    if model.pred_transform == "sigmoid" {
        out.push_str("  if (!pred_margin) {\n");
        let _ = writeln!(
            out,
            "    return 1.0f / (1.0f + expf(-{} * sum));",
            float_literal(model.sigmoid_alpha)
        );
        out.push_str("  }\n");
    }
    out.push_str("  return sum;\n}\n");
    out
}

/// A standalone translation unit holding one unit function.
pub fn render_unit_file(
    model: &Model,
    unit: usize,
    range: Range<usize>,
    annotation: Option<&BranchAnnotation>,
) -> String {
    let mut out = String::from("#include \"header.h\"\n\n");
    out.push_str(&render_unit_fn(model, unit, range, annotation));
    out
}

fn render_unit_fn(
    model: &Model,
    unit: usize,
    range: Range<usize>,
    annotation: Option<&BranchAnnotation>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "void {}(union Entry* data, float* result) {{",
        unit_fn_name(unit)
    );
    for tree_id in range {
        let _ = writeln!(out, "  /* tree {tree_id} */");
        let counts = annotation.map(|a| a.counts[tree_id].as_slice());
        render_node(&mut out, &model.trees[tree_id], 0, counts, 1);
    }
    out.push_str("}\n");
    out
}

fn render_node(out: &mut String, tree: &Tree, nid: usize, counts: Option<&[u64]>, depth: usize) {
    let indent = "  ".repeat(depth);
    match &tree.nodes[nid] {
        Node::Leaf { value } => {
            let _ = writeln!(out, "{indent}*result += {};", float_literal(*value));
        }
        Node::Test {
            split_index,
            threshold,
            op,
            default_left,
            left,
            right,
        } => {
            let compare = format!(
                "data[{split_index}].fvalue {} {}",
                op.symbol(),
                float_literal(*threshold)
            );
            let cond = if *default_left {
                format!("!(data[{split_index}].missing != -1) || ({compare})")
            } else {
                format!("(data[{split_index}].missing != -1) && ({compare})")
            };
            let cond = match counts {
                Some(counts) if counts[*left] > counts[*right] => format!("LIKELY({cond})"),
                Some(_) => format!("UNLIKELY({cond})"),
                None => cond,
            };

            let _ = writeln!(out, "{indent}if ({cond}) {{");
            render_node(out, tree, *left, counts, depth + 1);
            let _ = writeln!(out, "{indent}}} else {{");
            render_node(out, tree, *right, counts, depth + 1);
            let _ = writeln!(out, "{indent}}}");
        }
    }
}
