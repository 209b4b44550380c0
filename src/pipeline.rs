//! End-to-end fixture generation and verification.
//!
//! `generate_fixture` runs every stage in order and writes the artifacts into
//! one directory; `verify_fixture` reloads such a directory and recomputes
//! both prediction paths against the stored reference scores.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::annotate::{BranchAnnotation, annotate_branch};
use crate::booster::{Booster, BoosterParams, Objective, train};
use crate::builder::{ExportParams, Toolchain, export_lib, shared_library_name};
use crate::compare::{ComparisonReport, assert_array_almost_equal};
use crate::dataset::{Dataset, train_test_split};
use crate::fixture_io::{read_matrix, read_scores, write_features, write_labels, write_scores};
use crate::ir::Model;
use crate::matrix::DMatrix;
use crate::predictor::Predictor;

#[derive(Clone, Debug)]
pub struct FixtureConfig {
    pub output: PathBuf,
    /// CSV in the bundled dataset's layout; `None` uses the bundled data.
    pub dataset: Option<PathBuf>,
    pub seed: u32,
    pub test_size: f64,
    pub max_depth: usize,
    pub eta: f64,
    pub num_boost_round: usize,
    pub objective: Objective,
    pub toolchain: Toolchain,
    pub nthread: usize,
    pub decimal: u32,
    pub keep_sources: Option<PathBuf>,
    /// Also write the tree IR as JSON to this path.
    pub dump_ir: Option<PathBuf>,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("."),
            dataset: None,
            seed: 42,
            test_size: 0.2,
            max_depth: 6,
            eta: 0.01,
            num_boost_round: 100,
            objective: Objective::BinaryLogistic,
            toolchain: Toolchain::Gcc("gcc".to_string()),
            nthread: num_cpus::get(),
            decimal: 5,
            keep_sources: None,
            dump_ir: None,
        }
    }
}

impl FixtureConfig {
    fn booster_params(&self) -> BoosterParams {
        BoosterParams {
            max_depth: self.max_depth,
            eta: self.eta,
            objective: self.objective,
            seed: u64::from(self.seed),
            ..BoosterParams::default()
        }
    }
}

/// Artifact paths inside a fixture directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixtureLayout {
    pub dir: PathBuf,
    pub model: PathBuf,
    pub features: PathBuf,
    pub labels: PathBuf,
    pub reference_scores: PathBuf,
    pub compiled_scores: PathBuf,
    pub annotation: PathBuf,
    pub library: PathBuf,
}

impl FixtureLayout {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            model: dir.join("xgboost.model"),
            features: dir.join("feature.csv"),
            labels: dir.join("label.csv"),
            reference_scores: dir.join("score-xgboost.csv"),
            compiled_scores: dir.join("score-treelite.csv"),
            annotation: dir.join("annotation.json"),
            library: dir.join(shared_library_name("compiled-model")),
            dir,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FixtureReport {
    pub layout: FixtureLayout,
    /// `None` when the report comes from `verify_fixture`.
    pub train_rows: Option<usize>,
    pub test_rows: usize,
    pub num_trees: usize,
    pub comparison: ComparisonReport,
}

fn load_dataset(config: &FixtureConfig) -> Result<Dataset> {
    match &config.dataset {
        Some(path) => Dataset::from_csv(path),
        None => Dataset::breast_cancer(),
    }
}

/// Train, export, compile and cross-check a model, writing every artifact to
/// `config.output`. Fails with the comparison error if the two prediction
/// paths disagree.
pub fn generate_fixture(config: &FixtureConfig) -> Result<FixtureReport> {
    let layout = FixtureLayout::new(&config.output);
    std::fs::create_dir_all(&layout.dir)
        .with_context(|| format!("failed to create output dir {}", layout.dir.display()))?;
    info!(output = %layout.dir.display(), seed = config.seed, "generating fixture");

    let dataset = load_dataset(config)?;
    let split = train_test_split(&dataset, config.test_size, config.seed)?;
    let dtrain = DMatrix::from_dataset(&split.train)?;
    let dvalid = DMatrix::from_dataset(&split.test)?;

    let booster = train(&config.booster_params(), &dtrain, config.num_boost_round)?;
    booster.save_model(&layout.model)?;

    write_features(&layout.features, &split.test)?;
    write_labels(&layout.labels, &split.test)?;

    let reference = booster.predict(&dvalid, false)?;
    write_scores(&layout.reference_scores, &reference)?;

    let model = Model::from_booster(&booster)?;
    if let Some(path) = &config.dump_ir {
        model.dump_json(path)?;
        info!(path = %path.display(), "dumped tree IR");
    }
    let annotation = annotate_branch(&model, &dvalid, config.nthread)?;
    annotation.save(&layout.annotation)?;

    let export = ExportParams {
        parallel_comp: config.nthread,
        annotation: Some(annotation),
        keep_sources: config.keep_sources.clone(),
    };
    export_lib(&model, &config.toolchain, &layout.library, &export)?;

    let predictor = Predictor::load(&layout.library, config.nthread)?;
    let compiled = predictor.predict(&dvalid, false)?;
    write_scores(&layout.compiled_scores, &compiled)?;

    let comparison = assert_array_almost_equal(&reference, &compiled, config.decimal)
        .context("compiled predictions disagree with in-process predictions")?;

    info!(
        output = %layout.dir.display(),
        trees = model.trees.len(),
        test_rows = split.test.len(),
        "fixture generated"
    );

    Ok(FixtureReport {
        train_rows: Some(split.train.len()),
        test_rows: split.test.len(),
        num_trees: model.trees.len(),
        comparison,
        layout,
    })
}

/// Recompute both prediction paths for an existing fixture and compare them
/// with its stored reference scores.
pub fn verify_fixture<P: AsRef<Path>>(dir: P, decimal: u32, nthread: usize) -> Result<FixtureReport> {
    let layout = FixtureLayout::new(dir);
    info!(dir = %layout.dir.display(), decimal, "verifying fixture");

    let booster = Booster::load_model(&layout.model)?;
    let dmat = DMatrix::from_rows(&read_matrix(&layout.features)?)?;
    let stored = read_scores(&layout.reference_scores)?;

    let in_process = booster.predict(&dmat, false)?;
    assert_array_almost_equal(&stored, &in_process, decimal)
        .context("reloaded model disagrees with score-xgboost.csv")?;

    let model = Model::from_booster(&booster)?;
    if layout.annotation.exists() {
        BranchAnnotation::load(&layout.annotation)?
            .check_shape(&model)
            .context("annotation.json does not match the model")?;
    }

    let predictor = Predictor::load(&layout.library, nthread)?;
    let compiled = predictor.predict(&dmat, false)?;
    let comparison = assert_array_almost_equal(&stored, &compiled, decimal)
        .context("compiled library disagrees with score-xgboost.csv")?;

    if layout.compiled_scores.exists() {
        let stored_compiled = read_scores(&layout.compiled_scores)?;
        assert_array_almost_equal(&stored, &stored_compiled, decimal)
            .context("score-treelite.csv disagrees with score-xgboost.csv")?;
    }

    Ok(FixtureReport {
        train_rows: None,
        test_rows: dmat.num_row(),
        num_trees: booster.trees().len(),
        comparison,
        layout,
    })
}
