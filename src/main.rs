use std::path::PathBuf;

use gbdt_fixture::booster::Objective;
use gbdt_fixture::builder::Toolchain;
use gbdt_fixture::compare;
use gbdt_fixture::fixture_io;
use gbdt_fixture::pipeline::{self, FixtureConfig};
use gbdt_fixture::utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "gbdt-fixture",
    about = "Train a boosted tree model, compile it to a native library and emit cross-checked test fixtures",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train, compile and write every fixture artifact
    Generate {
        /// Output directory for the fixture files
        #[arg(long, default_value = ".")]
        output: PathBuf,
        /// Dataset CSV (header: n_samples,n_features,target names...); defaults to the bundled data
        #[arg(long)]
        dataset: Option<PathBuf>,
        /// Seed for the train/test shuffle
        #[arg(long, default_value_t = 42)]
        seed: u32,
        /// Fraction of rows held out for the test set
        #[arg(long, default_value_t = 0.2)]
        test_size: f64,
        /// Number of boosting rounds
        #[arg(long, default_value_t = 100)]
        rounds: usize,
        /// Maximum tree depth
        #[arg(long, default_value_t = 6)]
        max_depth: usize,
        /// Learning rate
        #[arg(long, default_value_t = 0.01)]
        eta: f64,
        /// Training objective
        #[arg(long, default_value = "binary:logistic")]
        objective: Objective,
        /// C compiler used to build the shared library (gcc or clang)
        #[arg(long, default_value = "gcc")]
        toolchain: Toolchain,
        /// Worker threads for annotation, compilation and prediction (default: CPU count)
        #[arg(long)]
        nthread: Option<usize>,
        /// Decimal places the two prediction paths must agree to
        #[arg(long, default_value_t = 5)]
        decimal: u32,
        /// Keep generated C sources in this directory
        #[arg(long)]
        keep_sources: Option<PathBuf>,
        /// Write the converted tree IR as JSON to this path
        #[arg(long)]
        dump_ir: Option<PathBuf>,
    },
    /// Recompute predictions for an existing fixture and check them
    Verify {
        /// Fixture directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long, default_value_t = 5)]
        decimal: u32,
        /// Prediction threads (default: CPU count)
        #[arg(long)]
        nthread: Option<usize>,
    },
    /// Compare two score files element-wise
    Compare {
        expected: PathBuf,
        actual: PathBuf,
        #[arg(long, default_value_t = 5)]
        decimal: u32,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Generate {
            output,
            dataset,
            seed,
            test_size,
            rounds,
            max_depth,
            eta,
            objective,
            toolchain,
            nthread,
            decimal,
            keep_sources,
            dump_ir,
        } => {
            let config = FixtureConfig {
                output,
                dataset,
                seed,
                test_size,
                max_depth,
                eta,
                num_boost_round: rounds,
                objective,
                toolchain,
                nthread: nthread.unwrap_or_else(num_cpus::get),
                decimal,
                keep_sources,
                dump_ir,
            };
            info!(
                output = %config.output.display(),
                dataset = ?config.dataset,
                seed,
                rounds,
                toolchain = %config.toolchain,
                nthread = config.nthread,
                "starting generate"
            );
            let report = pipeline::generate_fixture(&config)?;
            utils::print_summary(&report);
        }
        Commands::Verify {
            dir,
            decimal,
            nthread,
        } => {
            let nthread = nthread.unwrap_or_else(num_cpus::get);
            info!(dir = %dir.display(), decimal, nthread, "starting verify");
            let report = pipeline::verify_fixture(&dir, decimal, nthread)?;
            utils::print_summary(&report);
        }
        Commands::Compare {
            expected,
            actual,
            decimal,
        } => {
            let expected = fixture_io::read_scores(&expected)?;
            let actual = fixture_io::read_scores(&actual)?;
            let report = compare::assert_array_almost_equal(&expected, &actual, decimal)?;
            println!("{}", utils::format_comparison(&report));
        }
    }

    Ok(())
}
