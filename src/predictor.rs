use std::ffi::{CStr, c_char, c_int};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, ensure};
use libloading::{Library, Symbol};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::matrix::DMatrix;

/// Feature cell layout shared with the generated C code.
#[repr(C)]
#[derive(Clone, Copy)]
union RawEntry {
    missing: c_int,
    fvalue: f32,
    qvalue: c_int,
}

impl RawEntry {
    fn from_f32(value: f32) -> Self {
        if value.is_nan() {
            RawEntry { missing: -1 }
        } else {
            RawEntry { fvalue: value }
        }
    }
}

type PredictFn = unsafe extern "C" fn(*mut RawEntry, c_int) -> f32;

/// A compiled predictor library loaded into this process.
pub struct Predictor {
    path: PathBuf,
    num_feature: usize,
    num_tree: usize,
    pred_transform: String,
    sigmoid_alpha: f32,
    global_bias: f32,
    nthread: usize,
    predict_fn: PredictFn,
    _lib: Library,
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("path", &self.path)
            .field("num_feature", &self.num_feature)
            .field("num_tree", &self.num_tree)
            .field("pred_transform", &self.pred_transform)
            .field("nthread", &self.nthread)
            .finish()
    }
}

impl Predictor {
    pub fn load<P: AsRef<Path>>(libpath: P, nthread: usize) -> Result<Self> {
        let path = libpath.as_ref();
        // The library comes from our own code generator and exposes only
        // plain C functions without initialisers.
        let lib = unsafe { Library::new(path) }
            .with_context(|| format!("failed to load compiled model at {}", path.display()))?;

        let (num_feature, num_tree, pred_transform, sigmoid_alpha, global_bias, predict_fn) = unsafe {
            let get_num_feature: Symbol<unsafe extern "C" fn() -> usize> = lib
                .get(b"get_num_feature\0")
                .context("missing symbol get_num_feature")?;
            let get_num_tree: Symbol<unsafe extern "C" fn() -> usize> = lib
                .get(b"get_num_tree\0")
                .context("missing symbol get_num_tree")?;
            let get_pred_transform: Symbol<unsafe extern "C" fn() -> *const c_char> = lib
                .get(b"get_pred_transform\0")
                .context("missing symbol get_pred_transform")?;
            let get_sigmoid_alpha: Symbol<unsafe extern "C" fn() -> f32> = lib
                .get(b"get_sigmoid_alpha\0")
                .context("missing symbol get_sigmoid_alpha")?;
            let get_global_bias: Symbol<unsafe extern "C" fn() -> f32> = lib
                .get(b"get_global_bias\0")
                .context("missing symbol get_global_bias")?;
            let predict: Symbol<PredictFn> =
                lib.get(b"predict\0").context("missing symbol predict")?;

            let transform_ptr = get_pred_transform();
            if transform_ptr.is_null() {
                return Err(anyhow!("get_pred_transform returned null"));
            }
            let pred_transform = CStr::from_ptr(transform_ptr)
                .to_str()
                .context("pred_transform is not valid UTF-8")?
                .to_string();

            (
                get_num_feature(),
                get_num_tree(),
                pred_transform,
                get_sigmoid_alpha(),
                get_global_bias(),
                *predict,
            )
        };

        info!(
            path = %path.display(),
            num_feature,
            num_tree,
            pred_transform = %pred_transform,
            nthread,
            "loaded compiled predictor"
        );

        Ok(Self {
            path: path.to_path_buf(),
            num_feature,
            num_tree,
            pred_transform,
            sigmoid_alpha,
            global_bias,
            nthread: nthread.max(1),
            predict_fn,
            _lib: lib,
        })
    }

    pub fn num_feature(&self) -> usize {
        self.num_feature
    }

    pub fn num_tree(&self) -> usize {
        self.num_tree
    }

    pub fn pred_transform(&self) -> &str {
        &self.pred_transform
    }

    pub fn sigmoid_alpha(&self) -> f32 {
        self.sigmoid_alpha
    }

    pub fn global_bias(&self) -> f32 {
        self.global_bias
    }

    /// One score per row, rows spread across `nthread` workers.
    pub fn predict(&self, dmat: &DMatrix, pred_margin: bool) -> Result<Vec<f32>> {
        ensure!(
            dmat.num_col() == self.num_feature,
            "compiled model expects {} features, matrix has {}",
            self.num_feature,
            dmat.num_col()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.nthread)
            .build()
            .context("failed to build prediction thread pool")?;
        let predict_fn = self.predict_fn;
        let flag = c_int::from(pred_margin);

        let scores: Vec<f32> = pool.install(|| {
            (0..dmat.num_row())
                .into_par_iter()
                .map(|row| {
                    let mut entries: Vec<RawEntry> =
                        dmat.row(row).iter().map(|&v| RawEntry::from_f32(v)).collect();
                    // `entries` holds exactly `num_feature` cells, checked above.
                    unsafe { predict_fn(entries.as_mut_ptr(), flag) }
                })
                .collect()
        });

        debug!(rows = scores.len(), "compiled predictor finished batch");
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_entry_marks_missing() {
        let missing = RawEntry::from_f32(f32::NAN);
        let present = RawEntry::from_f32(1.5);
        unsafe {
            assert_eq!(missing.missing, -1);
            assert_eq!(present.fvalue, 1.5);
            assert_ne!(present.qvalue, -1);
        }
    }

    #[test]
    fn test_load_missing_library_fails() {
        let err = Predictor::load("/nonexistent/compiled-model.so", 1).unwrap_err();
        assert!(err.to_string().contains("failed to load compiled model"));
    }
}
