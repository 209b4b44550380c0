/// gbdt-fixture library crate.
///
/// Exposes every pipeline stage as a public module so that integration
/// tests in tests/ and the benches can drive them via `gbdt_fixture::`.
///
/// The binary entry point (src/main.rs) uses these same modules.
pub mod annotate;
pub mod booster;
pub mod builder;
pub mod compare;
pub mod dataset;
pub mod fixture_io;
pub mod generator;
pub mod ir;
pub mod matrix;
pub mod pipeline;
pub mod predictor;
pub mod random;
pub mod utils;
